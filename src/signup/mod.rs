//! Signup wizard: multi-step account creation.
//!
//! A session walks the user through email, profile, and then either the
//! regular location/address steps or the worker service-area step. Each
//! step's form values are merged into a `SignupDraft`; the terminal step
//! hands the draft to the `SubmissionCoordinator`.

pub mod cascade;
pub mod manager;
pub mod model;
pub mod routes;
pub mod state;
pub mod submission;
pub mod validation;

pub use cascade::{GeographicCascade, LocationOptions, RequestTicket};
pub use manager::{AdvanceOutcome, Notice, NoticeKind, SignupWizard, WizardStatus};
pub use model::{AccountType, DraftUpdate, GeographicSelection, Identity, LocationLevel, SignupDraft};
pub use routes::{SessionRegistry, signup_routes, spawn_session_sweeper};
pub use state::{StepSequencer, WizardStep};
pub use submission::{RegularRegistration, SubmissionCoordinator, WorkerRegistration};
pub use validation::{Field, ValidationErrors};
