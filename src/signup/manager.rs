//! One signup session: draft, step sequencing, cascading
//! lookups, notices, and the final submission.
//!
//! All methods take `&self`. Session state sits behind a tokio `RwLock` that
//! is never held across a backend call, so location lookups started by
//! overlapping requests can race; the cascade tickets decide which result
//! survives.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::cascade::{GeographicCascade, LocationOptions, RequestTicket, fetch_options};
use super::model::{DraftUpdate, DraftView, GeographicSelection, Identity, LocationLevel, SignupDraft};
use super::state::{Advance, RegularStep, StepSequencer, WizardStep, WorkerStep};
use super::submission::SubmissionCoordinator;
use super::validation::{ValidationErrors, validate_step};
use crate::backend::{LookupClient, RegistrationClient, RegistrationReceipt};
use crate::config::WizardConfig;
use crate::error::{BackendError, SubmissionError, WizardError};

/// Category of a user-visible notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    /// The email belongs to an account that already finished signup.
    AccountExists,
    /// A lookup (user check, locations, identity provider) failed.
    LookupFailed,
    /// The registration request failed.
    SubmissionFailed,
}

/// Dismissible message shown above the current step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
}

impl Notice {
    pub fn new(kind: NoticeKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// What happened when the user pressed "next".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvanceOutcome {
    /// The wizard moved to this step.
    Moved(WizardStep),
    /// The current step is terminal and valid; call `submit`.
    ReadyToSubmit,
    /// Field errors on the current step.
    Invalid(ValidationErrors),
    /// Advancement blocked by a notice (existing account or failed lookup).
    Blocked(Notice),
    /// The step or email changed while the user check was in flight; its
    /// result was ignored.
    Superseded,
}

/// Snapshot of a session for the UI.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WizardStatus {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub step: String,
    pub step_number: usize,
    pub total_steps: usize,
    pub submitted: bool,
    /// The submit action must be disabled while this is true.
    pub submitting: bool,
    pub draft: DraftView,
    pub options: LocationOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notice: Option<Notice>,
}

struct Session {
    sequencer: StepSequencer,
    draft: SignupDraft,
    cascade: GeographicCascade,
    notice: Option<Notice>,
    last_active_at: DateTime<Utc>,
}

impl Session {
    /// Replace the draft with `f(draft)`.
    fn update_draft(&mut self, f: impl FnOnce(SignupDraft) -> SignupDraft) {
        let capacity = self.draft.service_cities.capacity();
        let current = std::mem::replace(&mut self.draft, SignupDraft::new(capacity));
        self.draft = f(current);
    }
}

/// One signup wizard session.
pub struct SignupWizard {
    id: Uuid,
    started_at: DateTime<Utc>,
    lookup: Arc<dyn LookupClient>,
    submission: SubmissionCoordinator,
    session: RwLock<Session>,
}

impl SignupWizard {
    pub fn new(
        lookup: Arc<dyn LookupClient>,
        registration: Arc<dyn RegistrationClient>,
        config: &WizardConfig,
    ) -> Self {
        let started_at = Utc::now();
        Self {
            id: Uuid::new_v4(),
            started_at,
            lookup,
            submission: SubmissionCoordinator::new(
                registration,
                config.worker_subscription.clone(),
            ),
            session: RwLock::new(Session {
                sequencer: StepSequencer::new(),
                draft: SignupDraft::new(config.max_service_cities),
                cascade: GeographicCascade::new(),
                notice: None,
                last_active_at: started_at,
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Record user activity, postponing idle expiry.
    pub async fn touch(&self) {
        self.session.write().await.last_active_at = Utc::now();
    }

    /// Time since the last recorded activity.
    pub async fn idle_for(&self) -> Duration {
        let last = self.session.read().await.last_active_at;
        (Utc::now() - last).to_std().unwrap_or_default()
    }

    pub fn is_submitting(&self) -> bool {
        self.submission.is_pending()
    }

    pub async fn current_step(&self) -> WizardStep {
        self.session.read().await.sequencer.step()
    }

    /// Clone of the accumulated draft.
    pub async fn draft(&self) -> SignupDraft {
        self.session.read().await.draft.clone()
    }

    pub async fn status(&self) -> WizardStatus {
        let session = self.session.read().await;
        let step = session.sequencer.step();
        WizardStatus {
            id: self.id,
            started_at: self.started_at,
            step: step.to_string(),
            step_number: step.number(),
            total_steps: session.sequencer.total_steps(&session.draft),
            submitted: matches!(step, WizardStep::Submitted(_)),
            submitting: self.submission.is_pending(),
            draft: session.draft.view(),
            options: session.cascade.view(),
            notice: session.notice.clone(),
        }
    }

    /// Merge the current step's form values and try to move forward.
    ///
    /// Only the fields the current step collects are taken from `update`; the
    /// rest are ignored. The values are kept even when validation fails. On the
    /// Email step the backend is asked whether the account already exists
    /// before moving.
    pub async fn advance(&self, update: DraftUpdate) -> Result<AdvanceOutcome, WizardError> {
        let (from, moved) = {
            let mut session = self.session.write().await;
            let from = session.sequencer.step();
            if let WizardStep::Submitted(_) = from {
                return Err(WizardError::AlreadySubmitted);
            }
            let scoped = update.clone().for_step(from);
            if scoped != update {
                debug!(session_id = %self.id, step = %from, "Ignoring fields outside the current step");
            }
            session.update_draft(|draft| draft.merge(scoped));

            if from == WizardStep::Email {
                let errors = validate_step(from, &session.draft);
                if !errors.is_empty() {
                    return Ok(AdvanceOutcome::Invalid(errors));
                }
                let email = session.draft.email.clone().unwrap_or_default();
                drop(session);
                return self.advance_from_email(email).await;
            }

            let Session {
                sequencer, draft, ..
            } = &mut *session;
            match sequencer.advance(draft) {
                Ok(Advance::Moved(next)) => (from, next),
                Ok(Advance::ReadyToSubmit) => return Ok(AdvanceOutcome::ReadyToSubmit),
                Err(errors) => return Ok(AdvanceOutcome::Invalid(errors)),
            }
        };

        info!(session_id = %self.id, %from, to = %moved, "Wizard advanced");
        self.on_enter(moved).await;
        Ok(AdvanceOutcome::Moved(moved))
    }

    async fn advance_from_email(&self, email: String) -> Result<AdvanceOutcome, WizardError> {
        let status = match self.lookup.check_user_exists(&email).await {
            Ok(status) => status,
            Err(e) => {
                warn!(session_id = %self.id, %email, error = %e, "User check failed");
                let notice = lookup_notice(&e);
                self.session.write().await.notice = Some(notice.clone());
                return Ok(AdvanceOutcome::Blocked(notice));
            }
        };

        let mut session = self.session.write().await;
        if session.sequencer.step() != WizardStep::Email
            || session.draft.email.as_deref() != Some(email.as_str())
        {
            return Ok(AdvanceOutcome::Superseded);
        }

        if status.profile_complete {
            info!(session_id = %self.id, %email, "Signup blocked, account exists");
            let notice = Notice::new(
                NoticeKind::AccountExists,
                "An account with this email already exists. Please log in instead.",
            );
            session.notice = Some(notice.clone());
            return Ok(AdvanceOutcome::Blocked(notice));
        }

        let Session {
            sequencer,
            draft,
            notice,
            ..
        } = &mut *session;
        match sequencer.advance(draft) {
            Ok(Advance::Moved(next)) => {
                *notice = None;
                info!(
                    session_id = %self.id,
                    %email,
                    resuming = status.exists,
                    "Email accepted"
                );
                Ok(AdvanceOutcome::Moved(next))
            }
            Ok(Advance::ReadyToSubmit) => Ok(AdvanceOutcome::ReadyToSubmit),
            Err(errors) => Ok(AdvanceOutcome::Invalid(errors)),
        }
    }

    /// Go back one step. Nothing entered so far is lost.
    ///
    /// Leaving the Location step supersedes its in-flight lookups, so their
    /// results (or failures) never reach the session.
    pub async fn retreat(&self) -> WizardStep {
        let mut session = self.session.write().await;
        let from = session.sequencer.step();
        let to = session.sequencer.retreat();
        if from != to {
            if from == WizardStep::Regular(RegularStep::Location) {
                session.cascade.supersede_all();
            }
            info!(session_id = %self.id, %from, %to, "Wizard retreated");
        }
        to
    }

    /// OAuth entry action on the Email step.
    ///
    /// With `identity` supplied out-of-band (redirect state) it is used as-is;
    /// otherwise the identity provider is queried. The identity fields are
    /// pre-filled and the wizard skips to Profile.
    pub async fn enter_with_identity(
        &self,
        identity: Option<Identity>,
    ) -> Result<AdvanceOutcome, WizardError> {
        self.require_step(WizardStep::Email).await?;

        let identity = match identity {
            Some(identity) => identity,
            None => match self.lookup.sign_in_with_identity_provider().await {
                Ok(identity) => identity,
                Err(e) => {
                    warn!(session_id = %self.id, error = %e, "Identity provider sign-in failed");
                    let notice = lookup_notice(&e);
                    self.session.write().await.notice = Some(notice.clone());
                    return Ok(AdvanceOutcome::Blocked(notice));
                }
            },
        };

        let mut session = self.session.write().await;
        if session.sequencer.step() != WizardStep::Email {
            return Ok(AdvanceOutcome::Superseded);
        }
        session.update_draft(|draft| draft.with_identity(&identity));
        session.sequencer.skip_to_profile();
        session.notice = None;
        info!(session_id = %self.id, email = %identity.email, "Identity pre-filled");
        Ok(AdvanceOutcome::Moved(WizardStep::Profile))
    }

    /// Choose `value` for a location level on the Location step.
    ///
    /// Downstream selections and option lists are reset and the next level's
    /// options are fetched. Returns whether the fetched options were applied
    /// (false if superseded or the lookup failed).
    pub async fn select_location(
        &self,
        level: LocationLevel,
        value: &str,
    ) -> Result<bool, WizardError> {
        let value = value.trim();
        let fetch = {
            let mut session = self.session.write().await;
            check_step(
                session.sequencer.step(),
                WizardStep::Regular(RegularStep::Location),
            )?;
            if let Some(missing) = session.draft.location.missing_upstream(level) {
                return Err(WizardError::UpstreamUnset {
                    level: level.to_string(),
                    missing: missing.to_string(),
                });
            }
            if !session.cascade.options(level).iter().any(|o| o == value) {
                return Err(WizardError::NotAnOption {
                    level: level.to_string(),
                    value: value.to_string(),
                });
            }

            if !session.draft.location.set(level, value.to_string()) {
                return Ok(true);
            }
            info!(session_id = %self.id, %level, value, "Location selected");

            match level.next() {
                Some(next) => {
                    session.cascade.invalidate_from(next);
                    let ticket = session.cascade.begin(next);
                    Some((ticket, session.draft.location.clone()))
                }
                None => None,
            }
        };

        match fetch {
            Some((ticket, selection)) => Ok(self.load_options(ticket, selection).await),
            None => Ok(true),
        }
    }

    /// Re-query the options for `level`, e.g. after a failed lookup.
    pub async fn refresh_options(&self, level: LocationLevel) -> Result<bool, WizardError> {
        let (ticket, selection) = {
            let mut session = self.session.write().await;
            check_step(
                session.sequencer.step(),
                WizardStep::Regular(RegularStep::Location),
            )?;
            if let Some(missing) = session.draft.location.missing_upstream(level) {
                return Err(WizardError::UpstreamUnset {
                    level: level.to_string(),
                    missing: missing.to_string(),
                });
            }
            let ticket = session.cascade.begin(level);
            (ticket, session.draft.location.clone())
        };
        Ok(self.load_options(ticket, selection).await)
    }

    async fn load_options(
        &self,
        ticket: RequestTicket,
        selection: GeographicSelection,
    ) -> bool {
        let result = fetch_options(self.lookup.as_ref(), ticket.level, &selection).await;

        let mut session = self.session.write().await;
        match result {
            Ok(options) => {
                let applied = session.cascade.complete(ticket, options);
                if applied {
                    clear_lookup_notice(&mut session.notice);
                }
                applied
            }
            Err(e) => {
                if session.cascade.is_current(ticket) {
                    warn!(session_id = %self.id, level = %ticket.level, error = %e, "Location lookup failed");
                    session.notice = Some(lookup_notice(&e));
                }
                false
            }
        }
    }

    /// Add a city to the worker's service area. A full set or a duplicate is
    /// a no-op returning false.
    pub async fn add_service_city(&self, city: &str) -> Result<bool, WizardError> {
        let mut session = self.session.write().await;
        check_step(
            session.sequencer.step(),
            WizardStep::Worker(WorkerStep::ServiceArea),
        )?;
        let added = session.draft.service_cities.insert(city);
        if added {
            info!(session_id = %self.id, city = city.trim(), "Service city added");
        }
        Ok(added)
    }

    pub async fn remove_service_city(&self, city: &str) -> Result<bool, WizardError> {
        let mut session = self.session.write().await;
        check_step(
            session.sequencer.step(),
            WizardStep::Worker(WorkerStep::ServiceArea),
        )?;
        Ok(session.draft.service_cities.remove(city))
    }

    pub async fn dismiss_notice(&self) {
        self.session.write().await.notice = None;
    }

    /// Submit the draft from the terminal step.
    ///
    /// On success the wizard becomes `Submitted` and the caller should send
    /// the user to login. On failure the draft is untouched and, for backend
    /// failures, a notice is raised.
    pub async fn submit(&self) -> Result<RegistrationReceipt, SubmissionError> {
        let (draft, account_type) = {
            let session = self.session.read().await;
            let step = session.sequencer.step();
            match (step.is_terminal(), step.branch()) {
                (true, Some(account_type)) => (session.draft.clone(), account_type),
                _ => {
                    return Err(SubmissionError::NotReady {
                        step: step.to_string(),
                    });
                }
            }
        };

        let result = self.submission.submit(&draft, account_type).await;

        let mut session = self.session.write().await;
        match &result {
            Ok(_) => {
                session.sequencer.mark_submitted();
                session.notice = None;
                info!(session_id = %self.id, %account_type, "Signup submitted");
            }
            Err(SubmissionError::Rejected { message }) => {
                session.notice = Some(Notice::new(NoticeKind::SubmissionFailed, message.clone()));
            }
            Err(e) if e.is_retryable() && !matches!(e, SubmissionError::InFlight) => {
                session.notice = Some(Notice::new(
                    NoticeKind::SubmissionFailed,
                    "We could not create your account right now. Please try again.",
                ));
            }
            Err(_) => {}
        }
        result
    }

    /// Entry action for the Location step: load every option list that is
    /// still empty but whose upstream values are chosen. On first entry that
    /// is just the country list; on re-entry it refills lists whose lookups
    /// were superseded when the user went back.
    async fn on_enter(&self, step: WizardStep) {
        if step != WizardStep::Regular(RegularStep::Location) {
            return;
        }
        let fetches: Vec<(RequestTicket, GeographicSelection)> = {
            let mut session = self.session.write().await;
            let pending: Vec<LocationLevel> = LocationLevel::ALL
                .into_iter()
                .filter(|level| {
                    session.cascade.options(*level).is_empty()
                        && session.draft.location.missing_upstream(*level).is_none()
                })
                .collect();
            pending
                .into_iter()
                .map(|level| (session.cascade.begin(level), session.draft.location.clone()))
                .collect()
        };
        for (ticket, selection) in fetches {
            self.load_options(ticket, selection).await;
        }
    }

    async fn require_step(&self, expected: WizardStep) -> Result<(), WizardError> {
        check_step(self.current_step().await, expected)
    }
}

fn check_step(actual: WizardStep, expected: WizardStep) -> Result<(), WizardError> {
    if actual == expected {
        Ok(())
    } else if let WizardStep::Submitted(_) = actual {
        Err(WizardError::AlreadySubmitted)
    } else {
        Err(WizardError::WrongStep {
            expected: expected.to_string(),
            actual: actual.to_string(),
        })
    }
}

fn lookup_notice(err: &BackendError) -> Notice {
    Notice::new(NoticeKind::LookupFailed, err.user_message())
}

fn clear_lookup_notice(notice: &mut Option<Notice>) {
    if notice.as_ref().is_some_and(|n| n.kind == NoticeKind::LookupFailed) {
        *notice = None;
    }
}
