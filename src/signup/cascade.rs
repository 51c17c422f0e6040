//! Option lists for the cascading location selects.
//!
//! Every level carries a sequence number. A fetch takes a [`RequestTicket`]
//! before it awaits the backend and may only apply its result while the
//! ticket is still the latest one issued for that level. Invalidating a
//! level bumps its sequence number, so fetches started earlier are dropped
//! when they land.

use serde::Serialize;
use tracing::debug;

use super::model::{GeographicSelection, LocationLevel};
use crate::backend::LookupClient;
use crate::error::BackendError;

/// Proof that a fetch for `level` was started at sequence `seq`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestTicket {
    pub level: LocationLevel,
    pub seq: u64,
}

/// Loaded options and request sequence numbers per location level.
#[derive(Debug, Clone, Default)]
pub struct GeographicCascade {
    options: [Vec<String>; 4],
    issued: [u64; 4],
}

impl GeographicCascade {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn options(&self, level: LocationLevel) -> &[String] {
        &self.options[level.index()]
    }

    /// Start a fetch for `level`, superseding any fetch already in flight.
    pub fn begin(&mut self, level: LocationLevel) -> RequestTicket {
        let seq = &mut self.issued[level.index()];
        *seq += 1;
        RequestTicket { level, seq: *seq }
    }

    pub fn is_current(&self, ticket: RequestTicket) -> bool {
        self.issued[ticket.level.index()] == ticket.seq
    }

    /// Apply a fetch result. Stale results are discarded and reported as false.
    pub fn complete(&mut self, ticket: RequestTicket, options: Vec<String>) -> bool {
        if !self.is_current(ticket) {
            debug!(
                level = %ticket.level,
                seq = ticket.seq,
                latest = self.issued[ticket.level.index()],
                "Discarding stale location options"
            );
            return false;
        }
        self.options[ticket.level.index()] = options;
        true
    }

    /// Clear the options of `level` and everything below it and supersede
    /// their in-flight fetches.
    pub fn invalidate_from(&mut self, level: LocationLevel) {
        for l in level.and_downstream() {
            self.options[l.index()].clear();
            self.issued[l.index()] += 1;
        }
    }

    /// Supersede every in-flight fetch, keeping the lists already loaded.
    pub fn supersede_all(&mut self) {
        for seq in &mut self.issued {
            *seq += 1;
        }
    }

    pub fn view(&self) -> LocationOptions {
        LocationOptions {
            countries: self.options(LocationLevel::Country).to_vec(),
            states: self.options(LocationLevel::State).to_vec(),
            cities: self.options(LocationLevel::City).to_vec(),
            zipcodes: self.options(LocationLevel::Zipcode).to_vec(),
        }
    }
}

/// Serializable snapshot of the loaded option lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationOptions {
    pub countries: Vec<String>,
    pub states: Vec<String>,
    pub cities: Vec<String>,
    pub zipcodes: Vec<String>,
}

/// Query the backend for the options of `level`, using the upstream values
/// from `selection`.
pub async fn fetch_options(
    client: &dyn LookupClient,
    level: LocationLevel,
    selection: &GeographicSelection,
) -> Result<Vec<String>, BackendError> {
    let country = selection.country.as_deref().unwrap_or_default();
    let state = selection.state.as_deref().unwrap_or_default();
    let city = selection.city.as_deref().unwrap_or_default();
    match level {
        LocationLevel::Country => client.list_countries().await,
        LocationLevel::State => client.list_states(country).await,
        LocationLevel::City => client.list_cities(country, state).await,
        LocationLevel::Zipcode => client.list_zipcodes(country, state, city).await,
    }
}
