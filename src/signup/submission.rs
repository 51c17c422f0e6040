//! Terminal-step dispatch: build the account payload, validate it locally,
//! and send it to the endpoint for the chosen account type.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use secrecy::{ExposeSecret, SecretString};
use serde::{Serialize, Serializer};
use tracing::{info, warn};

use super::model::{AccountType, SignupDraft};
use super::validation::{ValidationErrors, validate_regular, validate_worker};
use crate::backend::{RegistrationClient, RegistrationReceipt};
use crate::error::SubmissionError;

fn expose<S: Serializer>(secret: &SecretString, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose_secret())
}

/// Payload for `POST /auth/register`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegularRegistration {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
    #[serde(serialize_with = "expose")]
    pub password: SecretString,
    pub country: String,
    pub state: String,
    pub city: String,
    pub zipcode: String,
    pub address_line: String,
    pub accepted_terms: bool,
}

impl RegularRegistration {
    /// Check the draft against the full regular schema and build the payload.
    pub fn from_draft(draft: &SignupDraft) -> Result<Self, ValidationErrors> {
        validate_regular(draft).into_result()?;
        let (email, first_name, last_name, phone, password) = identity_fields(draft);
        let location = &draft.location;
        Ok(Self {
            email,
            first_name,
            last_name,
            phone,
            password,
            country: location.country.clone().unwrap_or_default(),
            state: location.state.clone().unwrap_or_default(),
            city: location.city.clone().unwrap_or_default(),
            zipcode: location.zipcode.clone().unwrap_or_default(),
            address_line: draft.address_line.clone().unwrap_or_default(),
            accepted_terms: draft.accepted_terms.unwrap_or_default(),
        })
    }
}

/// Payload for `POST /auth/labour/sign-up`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerRegistration {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
    #[serde(serialize_with = "expose")]
    pub password: SecretString,
    pub trade: String,
    pub service_cities: Vec<String>,
    pub subscription: String,
}

impl WorkerRegistration {
    /// Check the draft against the worker schema and build the payload with
    /// the given subscription tier attached.
    pub fn from_draft(draft: &SignupDraft, subscription: &str) -> Result<Self, ValidationErrors> {
        validate_worker(draft).into_result()?;
        let (email, first_name, last_name, phone, password) = identity_fields(draft);
        Ok(Self {
            email,
            first_name,
            last_name,
            phone,
            password,
            trade: draft.trade.clone().unwrap_or_default(),
            service_cities: draft.service_cities.as_slice().to_vec(),
            subscription: subscription.to_string(),
        })
    }
}

/// Shared identity fields; only called on validated drafts.
fn identity_fields(draft: &SignupDraft) -> (String, String, String, String, SecretString) {
    (
        draft.email.clone().unwrap_or_default(),
        draft.first_name.clone().unwrap_or_default(),
        draft.last_name.clone().unwrap_or_default(),
        super::validation::normalize_phone(draft.phone.as_deref().unwrap_or_default()),
        draft
            .password
            .clone()
            .unwrap_or_else(|| SecretString::from(String::new())),
    )
}

/// Releases the in-flight flag when dropped.
struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Submits completed drafts, one attempt at a time.
pub struct SubmissionCoordinator {
    client: Arc<dyn RegistrationClient>,
    worker_subscription: String,
    in_flight: AtomicBool,
}

impl SubmissionCoordinator {
    pub fn new(client: Arc<dyn RegistrationClient>, worker_subscription: impl Into<String>) -> Self {
        Self {
            client,
            worker_subscription: worker_subscription.into(),
            in_flight: AtomicBool::new(false),
        }
    }

    /// Whether a submission is currently awaiting the backend.
    pub fn is_pending(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Validate and send `draft` as an `account_type` account.
    ///
    /// Schema violations come back as `SubmissionError::Validation` without a
    /// network call. A second call while one is pending gets `InFlight`.
    pub async fn submit(
        &self,
        draft: &SignupDraft,
        account_type: AccountType,
    ) -> Result<RegistrationReceipt, SubmissionError> {
        let _guard = InFlightGuard::acquire(&self.in_flight).ok_or(SubmissionError::InFlight)?;

        let email = draft.email.as_deref().unwrap_or_default();
        let result = match account_type {
            AccountType::Regular => {
                let payload =
                    RegularRegistration::from_draft(draft).map_err(SubmissionError::Validation)?;
                info!(%email, %account_type, "Submitting registration");
                self.client.register_regular(&payload).await
            }
            AccountType::Worker => {
                let payload = WorkerRegistration::from_draft(draft, &self.worker_subscription)
                    .map_err(SubmissionError::Validation)?;
                info!(
                    %email,
                    %account_type,
                    cities = payload.service_cities.len(),
                    subscription = %payload.subscription,
                    "Submitting registration"
                );
                self.client.register_worker(&payload).await
            }
        };

        match result {
            Ok(receipt) => {
                info!(%email, %account_type, id = ?receipt.id, "Registration accepted");
                Ok(receipt)
            }
            Err(e) => {
                warn!(%email, %account_type, error = %e, "Registration failed");
                Err(SubmissionError::from(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::backend::stub::StubBackend;
    use crate::signup::model::{DraftUpdate, LocationLevel};
    use crate::signup::validation::Field;

    fn identity(account_type: AccountType) -> DraftUpdate {
        DraftUpdate {
            email: Some("ana@example.com".into()),
            first_name: Some("Ana".into()),
            last_name: Some("Lima".into()),
            phone: Some("+1 415 555 0123".into()),
            password: Some("correct horse".into()),
            password_confirmation: Some("correct horse".into()),
            account_type: Some(account_type),
            ..Default::default()
        }
    }

    fn regular_draft() -> SignupDraft {
        let mut draft = SignupDraft::new(3).merge(identity(AccountType::Regular));
        for (level, value) in [
            (LocationLevel::Country, "Canada"),
            (LocationLevel::State, "Ontario"),
            (LocationLevel::City, "Toronto"),
            (LocationLevel::Zipcode, "M5V"),
        ] {
            draft.location.set(level, value.into());
        }
        draft.merge(DraftUpdate {
            address_line: Some("1 Front St W".into()),
            accepted_terms: Some(true),
            ..Default::default()
        })
    }

    fn worker_draft() -> SignupDraft {
        let mut draft = SignupDraft::new(3)
            .merge(identity(AccountType::Worker))
            .merge(DraftUpdate {
                trade: Some("Carpentry".into()),
                ..Default::default()
            });
        draft.service_cities.insert("Austin");
        draft.service_cities.insert("Dallas");
        draft
    }

    fn coordinator(backend: &Arc<StubBackend>) -> SubmissionCoordinator {
        SubmissionCoordinator::new(backend.clone(), "BASIC")
    }

    #[tokio::test]
    async fn regular_payload_carries_exactly_the_visited_fields() {
        let backend = Arc::new(StubBackend::new());
        let receipt = coordinator(&backend)
            .submit(&regular_draft(), AccountType::Regular)
            .await
            .unwrap();
        assert_eq!(receipt.id.as_deref(), Some("acct-1"));

        let registrations = backend.registrations.lock().unwrap();
        let (endpoint, payload) = &registrations[0];
        assert_eq!(endpoint, "/auth/register");
        assert_eq!(
            payload,
            &serde_json::json!({
                "email": "ana@example.com",
                "firstName": "Ana",
                "lastName": "Lima",
                "phone": "+14155550123",
                "password": "correct horse",
                "country": "Canada",
                "state": "Ontario",
                "city": "Toronto",
                "zipcode": "M5V",
                "addressLine": "1 Front St W",
                "acceptedTerms": true
            })
        );
    }

    #[tokio::test]
    async fn worker_payload_gets_subscription_default() {
        let backend = Arc::new(StubBackend::new());
        coordinator(&backend)
            .submit(&worker_draft(), AccountType::Worker)
            .await
            .unwrap();

        let registrations = backend.registrations.lock().unwrap();
        let (endpoint, payload) = &registrations[0];
        assert_eq!(endpoint, "/auth/labour/sign-up");
        assert_eq!(payload["subscription"], "BASIC");
        assert_eq!(payload["serviceCities"], serde_json::json!(["Austin", "Dallas"]));
        assert_eq!(payload["trade"], "Carpentry");
        assert!(payload.get("country").is_none());
    }

    #[tokio::test]
    async fn worker_without_cities_never_reaches_network() {
        let backend = Arc::new(StubBackend::new());
        let mut draft = worker_draft();
        draft.service_cities.remove("Austin");
        draft.service_cities.remove("Dallas");

        let err = coordinator(&backend)
            .submit(&draft, AccountType::Worker)
            .await
            .unwrap_err();
        match err {
            SubmissionError::Validation(errors) => {
                assert!(errors.contains(Field::ServiceCities))
            }
            other => panic!("expected validation error, got {other:?}"),
        }
        assert_eq!(backend.registration_count(), 0);
    }

    #[tokio::test]
    async fn backend_rejection_is_classified() {
        let backend = Arc::new(StubBackend::new());
        *backend.registration_failure.lock().unwrap() =
            Some((409, "Email already registered".into()));
        let coordinator = coordinator(&backend);

        let err = coordinator
            .submit(&regular_draft(), AccountType::Regular)
            .await
            .unwrap_err();
        assert!(
            matches!(err, SubmissionError::Rejected { ref message } if message == "Email already registered")
        );
        assert!(!coordinator.is_pending(), "guard released after failure");

        *backend.registration_failure.lock().unwrap() = Some((502, String::new()));
        let err = coordinator
            .submit(&regular_draft(), AccountType::Regular)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn concurrent_submission_is_refused() {
        let backend = Arc::new(StubBackend::new());
        *backend.registration_delay.lock().unwrap() = Some(Duration::from_millis(100));
        let coordinator = Arc::new(coordinator(&backend));

        let first = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move {
                coordinator
                    .submit(&regular_draft(), AccountType::Regular)
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(coordinator.is_pending());

        let second = coordinator
            .submit(&regular_draft(), AccountType::Regular)
            .await;
        assert!(matches!(second, Err(SubmissionError::InFlight)));

        assert!(first.await.unwrap().is_ok());
        assert!(!coordinator.is_pending());
        assert_eq!(backend.registration_count(), 1);
    }

    #[test]
    fn payload_debug_does_not_leak_password() {
        let payload = RegularRegistration::from_draft(&regular_draft()).unwrap();
        assert!(!format!("{payload:?}").contains("correct horse"));
    }
}
