//! Signup draft and the value types it is built from.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::state::{RegularStep, WizardStep, WorkerStep};

/// Which kind of account the draft will create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountType {
    /// A customer booking services.
    Regular,
    /// A worker offering services in a handful of cities.
    Worker,
}

impl std::fmt::Display for AccountType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Regular => write!(f, "REGULAR"),
            Self::Worker => write!(f, "WORKER"),
        }
    }
}

/// Identity returned by the external identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub email: String,
}

impl Identity {
    /// Split the display name into first and last name. Everything after the
    /// first whitespace run is the last name.
    pub fn split_name(&self) -> (Option<String>, Option<String>) {
        let trimmed = self.name.trim();
        match trimmed.split_once(char::is_whitespace) {
            Some((first, rest)) => (Some(first.to_string()), non_empty(rest)),
            None => (non_empty(trimmed), None),
        }
    }
}

/// One level of the cascading location selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationLevel {
    Country,
    State,
    City,
    Zipcode,
}

impl LocationLevel {
    pub const ALL: [LocationLevel; 4] = [Self::Country, Self::State, Self::City, Self::Zipcode];

    pub fn index(self) -> usize {
        self as usize
    }

    /// The level whose options depend on this one.
    pub fn next(self) -> Option<LocationLevel> {
        Self::ALL.get(self.index() + 1).copied()
    }

    /// Levels that must be chosen before this one, outermost first.
    pub fn upstream(self) -> &'static [LocationLevel] {
        &Self::ALL[..self.index()]
    }

    /// This level and every level after it.
    pub fn and_downstream(self) -> &'static [LocationLevel] {
        &Self::ALL[self.index()..]
    }
}

impl std::fmt::Display for LocationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Country => "country",
            Self::State => "state",
            Self::City => "city",
            Self::Zipcode => "zipcode",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for LocationLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "country" => Ok(Self::Country),
            "state" => Ok(Self::State),
            "city" => Ok(Self::City),
            "zipcode" | "zip" => Ok(Self::Zipcode),
            other => Err(format!("unknown location level: {other}")),
        }
    }
}

/// Cascading (country, state, city, zipcode) selection.
///
/// Changing a level resets every level after it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeographicSelection {
    pub country: Option<String>,
    pub state: Option<String>,
    pub city: Option<String>,
    pub zipcode: Option<String>,
}

impl GeographicSelection {
    pub fn get(&self, level: LocationLevel) -> Option<&str> {
        self.slot(level).as_deref()
    }

    /// Set `level` to `value`, clearing all downstream levels. Returns false
    /// (and leaves everything untouched) when the value is unchanged.
    pub fn set(&mut self, level: LocationLevel, value: String) -> bool {
        if self.get(level) == Some(value.as_str()) {
            return false;
        }
        for downstream in level.and_downstream().iter().skip(1) {
            *self.slot_mut(*downstream) = None;
        }
        *self.slot_mut(level) = Some(value);
        true
    }

    /// First upstream level of `level` that has not been chosen yet.
    pub fn missing_upstream(&self, level: LocationLevel) -> Option<LocationLevel> {
        level
            .upstream()
            .iter()
            .copied()
            .find(|l| self.get(*l).is_none())
    }

    pub fn is_complete(&self) -> bool {
        LocationLevel::ALL.iter().all(|l| self.get(*l).is_some())
    }

    fn slot(&self, level: LocationLevel) -> &Option<String> {
        match level {
            LocationLevel::Country => &self.country,
            LocationLevel::State => &self.state,
            LocationLevel::City => &self.city,
            LocationLevel::Zipcode => &self.zipcode,
        }
    }

    fn slot_mut(&mut self, level: LocationLevel) -> &mut Option<String> {
        match level {
            LocationLevel::Country => &mut self.country,
            LocationLevel::State => &mut self.state,
            LocationLevel::City => &mut self.city,
            LocationLevel::Zipcode => &mut self.zipcode,
        }
    }
}

/// Bounded, insertion-ordered set of city names a worker serves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceCities {
    cities: Vec<String>,
    capacity: usize,
}

impl ServiceCities {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            cities: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Add a city. Blank names, case-insensitive duplicates and inserts into a
    /// full set are no-ops returning false.
    pub fn insert(&mut self, city: &str) -> bool {
        let city = city.trim();
        if city.is_empty() || self.is_full() || self.contains(city) {
            return false;
        }
        self.cities.push(city.to_string());
        true
    }

    pub fn remove(&mut self, city: &str) -> bool {
        let city = city.trim();
        let before = self.cities.len();
        self.cities.retain(|c| !c.eq_ignore_ascii_case(city));
        self.cities.len() != before
    }

    pub fn contains(&self, city: &str) -> bool {
        self.cities.iter().any(|c| c.eq_ignore_ascii_case(city.trim()))
    }

    pub fn is_full(&self) -> bool {
        self.cities.len() >= self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.cities.is_empty()
    }

    pub fn len(&self) -> usize {
        self.cities.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn as_slice(&self) -> &[String] {
        &self.cities
    }
}

/// Form values submitted from one wizard step.
///
/// Every field is optional; only the fields present are merged into the draft.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftUpdate {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub password: Option<String>,
    pub password_confirmation: Option<String>,
    pub account_type: Option<AccountType>,
    pub address_line: Option<String>,
    pub accepted_terms: Option<bool>,
    pub trade: Option<String>,
}

impl DraftUpdate {
    /// Keep only the fields collected by `step`. The email can only change on
    /// the Email step and the account type only on the Profile step; location
    /// values go through the cascade instead.
    pub fn for_step(self, step: WizardStep) -> Self {
        match step {
            WizardStep::Email => Self {
                email: self.email,
                ..Default::default()
            },
            WizardStep::Profile => Self {
                first_name: self.first_name,
                last_name: self.last_name,
                phone: self.phone,
                password: self.password,
                password_confirmation: self.password_confirmation,
                account_type: self.account_type,
                ..Default::default()
            },
            WizardStep::Regular(RegularStep::Address) => Self {
                address_line: self.address_line,
                accepted_terms: self.accepted_terms,
                ..Default::default()
            },
            WizardStep::Worker(WorkerStep::ServiceArea) => Self {
                trade: self.trade,
                ..Default::default()
            },
            WizardStep::Regular(RegularStep::Location) | WizardStep::Submitted(_) => {
                Self::default()
            }
        }
    }
}

/// Signup data accumulated across the wizard steps.
///
/// Fields are only ever added or overwritten, never cleared by moving between
/// steps. Location fields follow the cascade rules of [`GeographicSelection`].
#[derive(Debug, Clone)]
pub struct SignupDraft {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub password: Option<SecretString>,
    pub password_confirmation: Option<SecretString>,
    pub account_type: Option<AccountType>,
    pub location: GeographicSelection,
    pub address_line: Option<String>,
    pub accepted_terms: Option<bool>,
    pub trade: Option<String>,
    pub service_cities: ServiceCities,
}

impl SignupDraft {
    pub fn new(max_service_cities: usize) -> Self {
        Self {
            email: None,
            first_name: None,
            last_name: None,
            phone: None,
            password: None,
            password_confirmation: None,
            account_type: None,
            location: GeographicSelection::default(),
            address_line: None,
            accepted_terms: None,
            trade: None,
            service_cities: ServiceCities::with_capacity(max_service_cities),
        }
    }

    /// Fold a step's form values into the draft.
    ///
    /// Text fields are trimmed and the email is lowercased. Values are only
    /// added or overwritten, with one exception: a field sent blank clears its
    /// previous value, so the validator reports it as missing instead of
    /// silently keeping what the form no longer shows.
    pub fn merge(mut self, update: DraftUpdate) -> Self {
        let DraftUpdate {
            email,
            first_name,
            last_name,
            phone,
            password,
            password_confirmation,
            account_type,
            address_line,
            accepted_terms,
            trade,
        } = update;

        if let Some(email) = email {
            self.email = non_empty(&email.to_lowercase());
        }
        if let Some(first_name) = first_name {
            self.first_name = non_empty(&first_name);
        }
        if let Some(last_name) = last_name {
            self.last_name = non_empty(&last_name);
        }
        if let Some(phone) = phone {
            self.phone = non_empty(&phone);
        }
        if let Some(password) = password {
            self.password = (!password.is_empty()).then(|| SecretString::from(password));
        }
        if let Some(confirmation) = password_confirmation {
            self.password_confirmation =
                (!confirmation.is_empty()).then(|| SecretString::from(confirmation));
        }
        if let Some(account_type) = account_type {
            self.account_type = Some(account_type);
        }
        if let Some(address_line) = address_line {
            self.address_line = non_empty(&address_line);
        }
        if let Some(accepted) = accepted_terms {
            self.accepted_terms = Some(accepted);
        }
        if let Some(trade) = trade {
            self.trade = non_empty(&trade);
        }
        self
    }

    /// Pre-fill identity fields from the identity provider.
    pub fn with_identity(self, identity: &Identity) -> Self {
        let (first_name, last_name) = identity.split_name();
        self.merge(DraftUpdate {
            email: Some(identity.email.clone()),
            first_name,
            last_name,
            ..Default::default()
        })
    }

    /// Read-only view safe to hand to the UI. Secrets are reduced to flags.
    pub fn view(&self) -> DraftView {
        DraftView {
            email: self.email.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            phone: self.phone.clone(),
            has_password: self
                .password
                .as_ref()
                .is_some_and(|p| !p.expose_secret().is_empty()),
            account_type: self.account_type,
            location: self.location.clone(),
            address_line: self.address_line.clone(),
            accepted_terms: self.accepted_terms,
            trade: self.trade.clone(),
            service_cities: self.service_cities.as_slice().to_vec(),
            max_service_cities: self.service_cities.capacity(),
        }
    }
}

/// Serializable snapshot of a draft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftView {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub has_password: bool,
    pub account_type: Option<AccountType>,
    pub location: GeographicSelection,
    pub address_line: Option<String>,
    pub accepted_terms: Option<bool>,
    pub trade: Option<String>,
    pub service_cities: Vec<String>,
    pub max_service_cities: usize,
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
