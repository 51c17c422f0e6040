//! reqwest implementation of the backend collaborators.

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::{LookupClient, RegistrationClient, RegistrationReceipt, UserStatus};
use crate::config::BackendConfig;
use crate::error::BackendError;
use crate::signup::model::Identity;
use crate::signup::submission::{RegularRegistration, WorkerRegistration};

const CHECK_USER_PATH: &str = "/auth/check-user";
const COUNTRIES_PATH: &str = "/locations/countries";
const STATES_PATH: &str = "/locations/states";
const CITIES_PATH: &str = "/locations/cities";
const ZIPCODES_PATH: &str = "/locations/zipcodes";
const GOOGLE_IDENTITY_PATH: &str = "/oauth2/authorize/google";
const REGISTER_PATH: &str = "/auth/register";
const WORKER_SIGN_UP_PATH: &str = "/auth/labour/sign-up";

/// Error body the backend sends with non-2xx responses.
#[derive(serde::Deserialize)]
struct ErrorPayload {
    message: String,
}

#[derive(Serialize)]
struct CheckUserRequest<'a> {
    email: &'a str,
}

/// HTTP client for the marketplace backend.
pub struct HttpBackend {
    base_url: String,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| BackendError::Client(e.to_string()))?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, BackendError> {
        let resp = self
            .client
            .get(self.url(path))
            .query(query)
            .send()
            .await
            .map_err(|e| transport(path, e))?;
        read_json(path, resp).await
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, BackendError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let resp = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| transport(path, e))?;
        read_json(path, resp).await
    }
}

fn transport(path: &str, err: reqwest::Error) -> BackendError {
    BackendError::Transport {
        endpoint: path.to_string(),
        reason: err.to_string(),
    }
}

/// Decode a success body as `T`, or turn an error status into
/// `BackendError::Status` carrying the backend's `{message}` when present.
async fn read_json<T: DeserializeOwned>(
    path: &str,
    resp: reqwest::Response,
) -> Result<T, BackendError> {
    let status = resp.status();
    let body = resp.text().await.map_err(|e| transport(path, e))?;

    if !status.is_success() {
        let message = serde_json::from_str::<ErrorPayload>(&body)
            .map(|p| p.message)
            .unwrap_or_default();
        tracing::warn!(endpoint = path, status = status.as_u16(), %message, "Backend returned error");
        return Err(BackendError::Status {
            endpoint: path.to_string(),
            status: status.as_u16(),
            message,
        });
    }

    // Some endpoints answer 201/204 with an empty body.
    let body = if body.trim().is_empty() { "{}" } else { body.as_str() };
    serde_json::from_str(body).map_err(|e| BackendError::Decode {
        endpoint: path.to_string(),
        reason: e.to_string(),
    })
}

#[async_trait]
impl LookupClient for HttpBackend {
    async fn check_user_exists(&self, email: &str) -> Result<UserStatus, BackendError> {
        self.post_json(CHECK_USER_PATH, &CheckUserRequest { email })
            .await
    }

    async fn list_countries(&self) -> Result<Vec<String>, BackendError> {
        self.get_json(COUNTRIES_PATH, &[]).await
    }

    async fn list_states(&self, country: &str) -> Result<Vec<String>, BackendError> {
        self.get_json(STATES_PATH, &[("country", country)]).await
    }

    async fn list_cities(&self, country: &str, state: &str) -> Result<Vec<String>, BackendError> {
        self.get_json(CITIES_PATH, &[("country", country), ("state", state)])
            .await
    }

    async fn list_zipcodes(
        &self,
        country: &str,
        state: &str,
        city: &str,
    ) -> Result<Vec<String>, BackendError> {
        self.get_json(
            ZIPCODES_PATH,
            &[("country", country), ("state", state), ("city", city)],
        )
        .await
    }

    async fn sign_in_with_identity_provider(&self) -> Result<Identity, BackendError> {
        self.get_json(GOOGLE_IDENTITY_PATH, &[]).await
    }
}

#[async_trait]
impl RegistrationClient for HttpBackend {
    async fn register_regular(
        &self,
        registration: &RegularRegistration,
    ) -> Result<RegistrationReceipt, BackendError> {
        self.post_json(REGISTER_PATH, registration).await
    }

    async fn register_worker(
        &self,
        registration: &WorkerRegistration,
    ) -> Result<RegistrationReceipt, BackendError> {
        self.post_json(WORKER_SIGN_UP_PATH, registration).await
    }
}
