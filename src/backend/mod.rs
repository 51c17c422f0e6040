//! Marketplace backend collaborators.
//!
//! The wizard only talks to the backend through these traits. The HTTP
//! implementation lives in [`http`]; tests use an in-memory stub.

pub mod http;
#[cfg(test)]
pub(crate) mod stub;

pub use http::HttpBackend;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::BackendError;
use crate::signup::model::Identity;
use crate::signup::submission::{RegularRegistration, WorkerRegistration};

/// What the backend knows about an email address.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStatus {
    /// An account with this email exists.
    #[serde(default)]
    pub exists: bool,
    /// The existing account finished signup.
    #[serde(default)]
    pub profile_complete: bool,
}

/// Confirmation returned after an account is created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationReceipt {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Lookups the wizard performs while the user fills in the steps.
#[async_trait]
pub trait LookupClient: Send + Sync {
    /// Whether an account already exists for `email`.
    async fn check_user_exists(&self, email: &str) -> Result<UserStatus, BackendError>;

    async fn list_countries(&self) -> Result<Vec<String>, BackendError>;

    async fn list_states(&self, country: &str) -> Result<Vec<String>, BackendError>;

    async fn list_cities(&self, country: &str, state: &str) -> Result<Vec<String>, BackendError>;

    async fn list_zipcodes(
        &self,
        country: &str,
        state: &str,
        city: &str,
    ) -> Result<Vec<String>, BackendError>;

    /// Identity of the user signed in with the external identity provider.
    async fn sign_in_with_identity_provider(&self) -> Result<Identity, BackendError>;
}

/// Account creation endpoints.
#[async_trait]
pub trait RegistrationClient: Send + Sync {
    async fn register_regular(
        &self,
        registration: &RegularRegistration,
    ) -> Result<RegistrationReceipt, BackendError>;

    async fn register_worker(
        &self,
        registration: &WorkerRegistration,
    ) -> Result<RegistrationReceipt, BackendError>;
}
