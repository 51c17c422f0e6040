//! REST endpoints the browser UI uses to drive signup sessions.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use super::manager::{AdvanceOutcome, NoticeKind, SignupWizard};
use super::model::{DraftUpdate, Identity, LocationLevel};
use crate::backend::{LookupClient, RegistrationClient};
use crate::config::WizardConfig;
use crate::error::{SubmissionError, WizardError};

/// Where the UI should send the user after a successful signup.
pub const LOGIN_REDIRECT: &str = "/login";

/// How often the sweeper looks for idle sessions.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Live signup sessions keyed by id.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<Uuid, Arc<SignupWizard>>>,
    lookup: Arc<dyn LookupClient>,
    registration: Arc<dyn RegistrationClient>,
    config: WizardConfig,
}

impl SessionRegistry {
    pub fn new(
        lookup: Arc<dyn LookupClient>,
        registration: Arc<dyn RegistrationClient>,
        config: WizardConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
            lookup,
            registration,
            config,
        })
    }

    /// Start a fresh wizard with an empty draft.
    pub async fn create(&self) -> Arc<SignupWizard> {
        let wizard = Arc::new(SignupWizard::new(
            Arc::clone(&self.lookup),
            Arc::clone(&self.registration),
            &self.config,
        ));
        self.sessions
            .write()
            .await
            .insert(wizard.id(), Arc::clone(&wizard));
        info!(session_id = %wizard.id(), "Signup session started");
        wizard
    }

    /// Look up a session and record the access as activity.
    pub async fn get(&self, id: Uuid) -> Result<Arc<SignupWizard>, WizardError> {
        let wizard = self
            .sessions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(WizardError::SessionNotFound(id))?;
        wizard.touch().await;
        Ok(wizard)
    }

    /// Drop a session and its draft. In-flight lookups finish against the
    /// detached wizard and are never observed.
    pub async fn remove(&self, id: Uuid) -> bool {
        let removed = self.sessions.write().await.remove(&id).is_some();
        if removed {
            info!(session_id = %id, "Signup session discarded");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Discard sessions idle for at least `max_idle`. Sessions with a
    /// submission in flight are kept. Returns how many were removed.
    pub async fn prune_idle(&self, max_idle: Duration) -> usize {
        let sessions: Vec<(Uuid, Arc<SignupWizard>)> = self
            .sessions
            .read()
            .await
            .iter()
            .map(|(id, wizard)| (*id, Arc::clone(wizard)))
            .collect();

        let mut stale = Vec::new();
        for (id, wizard) in sessions {
            if !wizard.is_submitting() && wizard.idle_for().await >= max_idle {
                stale.push(id);
            }
        }
        if stale.is_empty() {
            return 0;
        }

        let mut map = self.sessions.write().await;
        let pruned = stale.iter().filter(|id| map.remove(*id).is_some()).count();
        info!(pruned, remaining = map.len(), "Pruned idle signup sessions");
        pruned
    }
}

/// Spawn a background task that periodically discards idle sessions.
pub fn spawn_session_sweeper(registry: Arc<SessionRegistry>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        interval.tick().await; // Skip immediate first tick
        loop {
            interval.tick().await;
            registry.prune_idle(registry.config.session_idle_timeout).await;
        }
    })
}

/// Build the signup REST routes.
pub fn signup_routes(registry: Arc<SessionRegistry>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/signup/sessions", post(create_session))
        .route(
            "/api/signup/sessions/{id}",
            get(get_session).delete(delete_session),
        )
        .route("/api/signup/sessions/{id}/advance", post(advance))
        .route("/api/signup/sessions/{id}/back", post(back))
        .route("/api/signup/sessions/{id}/identity", post(identity))
        .route("/api/signup/sessions/{id}/location/{level}", post(select_location))
        .route(
            "/api/signup/sessions/{id}/location/{level}/options",
            get(refresh_options),
        )
        .route("/api/signup/sessions/{id}/service-cities", post(add_city))
        .route(
            "/api/signup/sessions/{id}/service-cities/{city}",
            delete(remove_city),
        )
        .route("/api/signup/sessions/{id}/notice/dismiss", post(dismiss_notice))
        .route("/api/signup/sessions/{id}/submit", post(submit))
        .with_state(registry)
}

type Registry = State<Arc<SessionRegistry>>;

fn error_body(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn parse_id(id: &str) -> Result<Uuid, Response> {
    Uuid::parse_str(id).map_err(|_| error_body(StatusCode::BAD_REQUEST, "Invalid session ID"))
}

fn wizard_error(err: WizardError) -> Response {
    let status = match err {
        WizardError::SessionNotFound(_) => StatusCode::NOT_FOUND,
        WizardError::WrongStep { .. } | WizardError::AlreadySubmitted => StatusCode::CONFLICT,
        WizardError::UpstreamUnset { .. } | WizardError::NotAnOption { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
    };
    error_body(status, err.to_string())
}

async fn session(registry: &SessionRegistry, id: &str) -> Result<Arc<SignupWizard>, Response> {
    let id = parse_id(id)?;
    registry.get(id).await.map_err(wizard_error)
}

async fn status_response(status: StatusCode, wizard: &SignupWizard) -> Response {
    (status, Json(wizard.status().await)).into_response()
}

// ── Sessions ────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "booking-signup"
    }))
}

async fn create_session(State(registry): Registry) -> Response {
    let wizard = registry.create().await;
    status_response(StatusCode::CREATED, &wizard).await
}

async fn get_session(State(registry): Registry, Path(id): Path<String>) -> Response {
    match session(&registry, &id).await {
        Ok(wizard) => status_response(StatusCode::OK, &wizard).await,
        Err(resp) => resp,
    }
}

async fn delete_session(State(registry): Registry, Path(id): Path<String>) -> Response {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    if registry.remove(id).await {
        StatusCode::NO_CONTENT.into_response()
    } else {
        wizard_error(WizardError::SessionNotFound(id))
    }
}

// ── Steps ───────────────────────────────────────────────────────────────

async fn outcome_response(wizard: &SignupWizard, outcome: AdvanceOutcome) -> Response {
    match outcome {
        AdvanceOutcome::Moved(_) | AdvanceOutcome::ReadyToSubmit | AdvanceOutcome::Superseded => {
            status_response(StatusCode::OK, wizard).await
        }
        AdvanceOutcome::Invalid(errors) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "errors": errors, "status": wizard.status().await })),
        )
            .into_response(),
        AdvanceOutcome::Blocked(notice) => {
            let status = match notice.kind {
                NoticeKind::AccountExists => StatusCode::CONFLICT,
                NoticeKind::LookupFailed | NoticeKind::SubmissionFailed => StatusCode::BAD_GATEWAY,
            };
            (
                status,
                Json(json!({ "notice": notice, "status": wizard.status().await })),
            )
                .into_response()
        }
    }
}

async fn advance(
    State(registry): Registry,
    Path(id): Path<String>,
    Json(update): Json<DraftUpdate>,
) -> Response {
    let wizard = match session(&registry, &id).await {
        Ok(wizard) => wizard,
        Err(resp) => return resp,
    };
    match wizard.advance(update).await {
        Ok(outcome) => outcome_response(&wizard, outcome).await,
        Err(e) => wizard_error(e),
    }
}

async fn back(State(registry): Registry, Path(id): Path<String>) -> Response {
    let wizard = match session(&registry, &id).await {
        Ok(wizard) => wizard,
        Err(resp) => return resp,
    };
    wizard.retreat().await;
    status_response(StatusCode::OK, &wizard).await
}

async fn identity(
    State(registry): Registry,
    Path(id): Path<String>,
    body: Option<Json<Identity>>,
) -> Response {
    let wizard = match session(&registry, &id).await {
        Ok(wizard) => wizard,
        Err(resp) => return resp,
    };
    match wizard.enter_with_identity(body.map(|Json(i)| i)).await {
        Ok(outcome) => outcome_response(&wizard, outcome).await,
        Err(e) => wizard_error(e),
    }
}

// ── Location cascade ────────────────────────────────────────────────────

#[derive(Deserialize)]
struct SelectRequest {
    value: String,
}

fn parse_level(level: &str) -> Result<LocationLevel, Response> {
    level
        .parse()
        .map_err(|e: String| error_body(StatusCode::NOT_FOUND, e))
}

async fn select_location(
    State(registry): Registry,
    Path((id, level)): Path<(String, String)>,
    Json(body): Json<SelectRequest>,
) -> Response {
    let (wizard, level) = match (session(&registry, &id).await, parse_level(&level)) {
        (Ok(wizard), Ok(level)) => (wizard, level),
        (Err(resp), _) | (_, Err(resp)) => return resp,
    };
    match wizard.select_location(level, &body.value).await {
        Ok(_) => status_response(StatusCode::OK, &wizard).await,
        Err(e) => wizard_error(e),
    }
}

async fn refresh_options(
    State(registry): Registry,
    Path((id, level)): Path<(String, String)>,
) -> Response {
    let (wizard, level) = match (session(&registry, &id).await, parse_level(&level)) {
        (Ok(wizard), Ok(level)) => (wizard, level),
        (Err(resp), _) | (_, Err(resp)) => return resp,
    };
    match wizard.refresh_options(level).await {
        Ok(_) => status_response(StatusCode::OK, &wizard).await,
        Err(e) => wizard_error(e),
    }
}

// ── Worker service area ─────────────────────────────────────────────────

#[derive(Deserialize)]
struct CityRequest {
    city: String,
}

async fn add_city(
    State(registry): Registry,
    Path(id): Path<String>,
    Json(body): Json<CityRequest>,
) -> Response {
    let wizard = match session(&registry, &id).await {
        Ok(wizard) => wizard,
        Err(resp) => return resp,
    };
    match wizard.add_service_city(&body.city).await {
        Ok(_) => status_response(StatusCode::OK, &wizard).await,
        Err(e) => wizard_error(e),
    }
}

async fn remove_city(
    State(registry): Registry,
    Path((id, city)): Path<(String, String)>,
) -> Response {
    let wizard = match session(&registry, &id).await {
        Ok(wizard) => wizard,
        Err(resp) => return resp,
    };
    match wizard.remove_service_city(&city).await {
        Ok(_) => status_response(StatusCode::OK, &wizard).await,
        Err(e) => wizard_error(e),
    }
}

async fn dismiss_notice(State(registry): Registry, Path(id): Path<String>) -> Response {
    let wizard = match session(&registry, &id).await {
        Ok(wizard) => wizard,
        Err(resp) => return resp,
    };
    wizard.dismiss_notice().await;
    status_response(StatusCode::OK, &wizard).await
}

// ── Submission ──────────────────────────────────────────────────────────

async fn submit(State(registry): Registry, Path(id): Path<String>) -> Response {
    let wizard = match session(&registry, &id).await {
        Ok(wizard) => wizard,
        Err(resp) => return resp,
    };
    match wizard.submit().await {
        Ok(receipt) => {
            // The draft is no longer needed once the account exists.
            registry.remove(wizard.id()).await;
            (
                StatusCode::OK,
                Json(json!({ "receipt": receipt, "redirect": LOGIN_REDIRECT })),
            )
                .into_response()
        }
        Err(SubmissionError::Validation(errors)) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "errors": errors })),
        )
            .into_response(),
        Err(e) => {
            let status = match e {
                SubmissionError::Rejected { .. } => StatusCode::BAD_REQUEST,
                SubmissionError::InFlight | SubmissionError::NotReady { .. } => {
                    StatusCode::CONFLICT
                }
                SubmissionError::Server { .. } | SubmissionError::Transport(_) => {
                    StatusCode::BAD_GATEWAY
                }
                SubmissionError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            };
            (
                status,
                Json(json!({
                    "error": e.to_string(),
                    "retryable": e.is_retryable(),
                    "status": wizard.status().await,
                })),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::backend::stub::StubBackend;
    use crate::signup::model::AccountType;

    fn app() -> (Router, Arc<SessionRegistry>) {
        let backend = Arc::new(StubBackend::new());
        let registry = SessionRegistry::new(backend.clone(), backend, WizardConfig::default());
        (signup_routes(Arc::clone(&registry)), registry)
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();
        let resp = app.clone().oneshot(request).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn create_and_fetch_session() {
        let (app, registry) = app();
        let (status, body) = call(&app, "POST", "/api/signup/sessions", None).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["step"], "email");
        assert_eq!(body["stepNumber"], 1);
        assert_eq!(registry.len().await, 1);

        let id = body["id"].as_str().unwrap();
        let (status, body) = call(&app, "GET", &format!("/api/signup/sessions/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["submitting"], false);
    }

    #[tokio::test]
    async fn unknown_and_malformed_ids() {
        let (app, _) = app();
        let (status, _) = call(&app, "GET", "/api/signup/sessions/not-a-uuid", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let uri = format!("/api/signup/sessions/{}", Uuid::new_v4());
        let (status, body) = call(&app, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn validation_errors_are_unprocessable() {
        let (app, _) = app();
        let (_, body) = call(&app, "POST", "/api/signup/sessions", None).await;
        let id = body["id"].as_str().unwrap().to_string();

        let (status, body) = call(
            &app,
            "POST",
            &format!("/api/signup/sessions/{id}/advance"),
            Some(json!({ "email": "broken" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["errors"]["email"], "Enter a valid email");
        assert_eq!(body["status"]["draft"]["email"], "broken");
    }

    #[tokio::test]
    async fn wrong_step_and_bad_level() {
        let (app, _) = app();
        let (_, body) = call(&app, "POST", "/api/signup/sessions", None).await;
        let id = body["id"].as_str().unwrap().to_string();

        let (status, _) = call(
            &app,
            "POST",
            &format!("/api/signup/sessions/{id}/location/country"),
            Some(json!({ "value": "Canada" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = call(
            &app,
            "POST",
            &format!("/api/signup/sessions/{id}/location/planet"),
            Some(json!({ "value": "Mars" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = call(&app, "POST", &format!("/api/signup/sessions/{id}/submit"), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["retryable"], false);
    }

    #[tokio::test]
    async fn delete_discards_session() {
        let (app, registry) = app();
        let (_, body) = call(&app, "POST", "/api/signup/sessions", None).await;
        let id = body["id"].as_str().unwrap().to_string();

        let (status, _) = call(&app, "DELETE", &format!("/api/signup/sessions/{id}"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(registry.len().await, 0);

        let (status, _) = call(&app, "DELETE", &format!("/api/signup/sessions/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn idle_sessions_are_pruned() {
        let backend = Arc::new(StubBackend::new());
        let config = WizardConfig {
            session_idle_timeout: Duration::from_millis(50),
            ..WizardConfig::default()
        };
        let registry = SessionRegistry::new(backend.clone(), backend, config.clone());
        let active = registry.create().await;
        let abandoned = registry.create().await;

        tokio::time::sleep(Duration::from_millis(80)).await;
        registry.get(active.id()).await.unwrap();

        assert_eq!(registry.prune_idle(config.session_idle_timeout).await, 1);
        assert_eq!(registry.len().await, 1);
        assert!(registry.get(active.id()).await.is_ok());
        assert!(matches!(
            registry.get(abandoned.id()).await,
            Err(WizardError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn concurrent_submit_conflicts_while_pending() {
        let backend = Arc::new(StubBackend::new());
        *backend.registration_delay.lock().unwrap() = Some(Duration::from_millis(150));
        let registry = SessionRegistry::new(backend.clone(), backend.clone(), WizardConfig::default());
        let app = signup_routes(Arc::clone(&registry));

        let wizard = registry.create().await;
        wizard
            .advance(DraftUpdate {
                email: Some("bo@example.com".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        wizard
            .advance(DraftUpdate {
                first_name: Some("Bo".into()),
                last_name: Some("Diaz".into()),
                phone: Some("+14155550123".into()),
                password: Some("correct horse".into()),
                password_confirmation: Some("correct horse".into()),
                account_type: Some(AccountType::Worker),
                ..Default::default()
            })
            .await
            .unwrap();
        wizard.add_service_city("Austin").await.unwrap();
        wizard
            .advance(DraftUpdate {
                trade: Some("Roofing".into()),
                ..Default::default()
            })
            .await
            .unwrap();

        let base = format!("/api/signup/sessions/{}", wizard.id());
        let first = {
            let app = app.clone();
            let uri = format!("{base}/submit");
            tokio::spawn(async move { call(&app, "POST", &uri, None).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;

        let (status, body) = call(&app, "GET", &base, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["submitting"], true);

        let (status, body) = call(&app, "POST", &format!("{base}/submit"), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["retryable"], true);
        assert_eq!(body["status"]["submitting"], true);

        let (status, body) = first.await.unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["redirect"], LOGIN_REDIRECT);
        assert_eq!(backend.registration_count(), 1);
    }
}
