//! In-memory backend used by unit tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use super::{LookupClient, RegistrationClient, RegistrationReceipt, UserStatus};
use crate::error::BackendError;
use crate::signup::model::Identity;
use crate::signup::submission::{RegularRegistration, WorkerRegistration};

/// Holds `list_states(country)` until `release` is notified, signalling
/// `started` once the call is in flight.
pub struct Gate {
    pub country: String,
    pub started: Arc<Notify>,
    pub release: Arc<Notify>,
}

/// Deterministic backend with a tiny location table and recorded registrations.
#[derive(Default)]
pub struct StubBackend {
    pub users: Mutex<HashMap<String, UserStatus>>,
    pub identity: Mutex<Option<Identity>>,
    pub fail_lookups: AtomicBool,
    pub registration_failure: Mutex<Option<(u16, String)>>,
    pub registration_delay: Mutex<Option<Duration>>,
    pub state_gate: Mutex<Option<Gate>>,
    pub registrations: Mutex<Vec<(String, serde_json::Value)>>,
    pub lookup_calls: AtomicUsize,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(self, email: &str, status: UserStatus) -> Self {
        self.users
            .lock()
            .unwrap()
            .insert(email.to_string(), status);
        self
    }

    pub fn with_identity(self, name: &str, email: &str) -> Self {
        *self.identity.lock().unwrap() = Some(Identity {
            name: name.to_string(),
            email: email.to_string(),
        });
        self
    }

    pub fn registration_count(&self) -> usize {
        self.registrations.lock().unwrap().len()
    }

    fn lookup<T>(&self, endpoint: &str, value: T) -> Result<T, BackendError> {
        self.lookup_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(BackendError::Transport {
                endpoint: endpoint.to_string(),
                reason: "connection reset".to_string(),
            });
        }
        Ok(value)
    }

    async fn record(
        &self,
        endpoint: &str,
        payload: serde_json::Value,
    ) -> Result<RegistrationReceipt, BackendError> {
        let delay = *self.registration_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let failure = self.registration_failure.lock().unwrap().clone();
        if let Some((status, message)) = failure {
            return Err(BackendError::Status {
                endpoint: endpoint.to_string(),
                status,
                message,
            });
        }
        let mut registrations = self.registrations.lock().unwrap();
        registrations.push((endpoint.to_string(), payload));
        Ok(RegistrationReceipt {
            id: Some(format!("acct-{}", registrations.len())),
            message: Some("Account created".to_string()),
        })
    }
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

#[async_trait]
impl LookupClient for StubBackend {
    async fn check_user_exists(&self, email: &str) -> Result<UserStatus, BackendError> {
        let status = self
            .users
            .lock()
            .unwrap()
            .get(email)
            .copied()
            .unwrap_or_default();
        self.lookup("/auth/check-user", status)
    }

    async fn list_countries(&self) -> Result<Vec<String>, BackendError> {
        self.lookup("/locations/countries", strings(&["Canada", "Mexico"]))
    }

    async fn list_states(&self, country: &str) -> Result<Vec<String>, BackendError> {
        let gate = self
            .state_gate
            .lock()
            .unwrap()
            .as_ref()
            .filter(|g| g.country == country)
            .map(|g| (Arc::clone(&g.started), Arc::clone(&g.release)));
        if let Some((started, release)) = gate {
            started.notify_one();
            release.notified().await;
        }
        let states = match country {
            "Canada" => strings(&["Ontario", "Quebec"]),
            "Mexico" => strings(&["Jalisco"]),
            _ => Vec::new(),
        };
        self.lookup("/locations/states", states)
    }

    async fn list_cities(&self, country: &str, state: &str) -> Result<Vec<String>, BackendError> {
        let cities = match (country, state) {
            ("Canada", "Ontario") => strings(&["Ottawa", "Toronto"]),
            ("Canada", "Quebec") => strings(&["Montreal"]),
            ("Mexico", "Jalisco") => strings(&["Guadalajara"]),
            _ => Vec::new(),
        };
        self.lookup("/locations/cities", cities)
    }

    async fn list_zipcodes(
        &self,
        _country: &str,
        _state: &str,
        city: &str,
    ) -> Result<Vec<String>, BackendError> {
        let zipcodes = match city {
            "Toronto" => strings(&["M4C", "M5V"]),
            "Ottawa" => strings(&["K1A"]),
            "Montreal" => strings(&["H2X"]),
            "Guadalajara" => strings(&["44100"]),
            _ => Vec::new(),
        };
        self.lookup("/locations/zipcodes", zipcodes)
    }

    async fn sign_in_with_identity_provider(&self) -> Result<Identity, BackendError> {
        let identity = self.identity.lock().unwrap().clone();
        match identity {
            Some(identity) => self.lookup("/oauth2/authorize/google", identity),
            None => Err(BackendError::Status {
                endpoint: "/oauth2/authorize/google".to_string(),
                status: 401,
                message: "Sign-in was cancelled".to_string(),
            }),
        }
    }
}

#[async_trait]
impl RegistrationClient for StubBackend {
    async fn register_regular(
        &self,
        registration: &RegularRegistration,
    ) -> Result<RegistrationReceipt, BackendError> {
        let payload = serde_json::to_value(registration).unwrap();
        self.record("/auth/register", payload).await
    }

    async fn register_worker(
        &self,
        registration: &WorkerRegistration,
    ) -> Result<RegistrationReceipt, BackendError> {
        let payload = serde_json::to_value(registration).unwrap();
        self.record("/auth/labour/sign-up", payload).await
    }
}
