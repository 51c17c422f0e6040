//! Wizard step state machine.
//!
//! Regular accounts walk Email → Profile → Location → Address (4 steps);
//! workers walk Email → Profile → ServiceArea (3 steps). The branch is taken
//! from the account type chosen on the Profile step.

use super::model::{AccountType, SignupDraft};
use super::validation::{ValidationErrors, validate_step};

/// Steps only regular accounts visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegularStep {
    Location,
    Address,
}

/// Steps only worker accounts visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerStep {
    ServiceArea,
}

/// Where the wizard currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WizardStep {
    Email,
    Profile,
    Regular(RegularStep),
    Worker(WorkerStep),
    Submitted(AccountType),
}

impl WizardStep {
    /// 1-based position shown to the user.
    pub fn number(&self) -> usize {
        match self {
            Self::Email => 1,
            Self::Profile => 2,
            Self::Regular(RegularStep::Location) => 3,
            Self::Regular(RegularStep::Address) => 4,
            Self::Worker(WorkerStep::ServiceArea) => 3,
            Self::Submitted(account_type) => total_steps(Some(*account_type)),
        }
    }

    /// The branch this step belongs to, if it is branch-specific.
    pub fn branch(&self) -> Option<AccountType> {
        match self {
            Self::Email | Self::Profile => None,
            Self::Regular(_) => Some(AccountType::Regular),
            Self::Worker(_) => Some(AccountType::Worker),
            Self::Submitted(account_type) => Some(*account_type),
        }
    }

    /// Last input step of its branch; advancing from here submits.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Regular(RegularStep::Address) | Self::Worker(WorkerStep::ServiceArea)
        )
    }

    /// The step after this one given the chosen account type. `None` at a
    /// terminal step, after submission, or when the branch is still unknown.
    pub fn next(&self, account_type: Option<AccountType>) -> Option<WizardStep> {
        match self {
            Self::Email => Some(Self::Profile),
            Self::Profile => match account_type? {
                AccountType::Regular => Some(Self::Regular(RegularStep::Location)),
                AccountType::Worker => Some(Self::Worker(WorkerStep::ServiceArea)),
            },
            Self::Regular(RegularStep::Location) => Some(Self::Regular(RegularStep::Address)),
            Self::Regular(RegularStep::Address)
            | Self::Worker(WorkerStep::ServiceArea)
            | Self::Submitted(_) => None,
        }
    }

    /// The step before this one. `None` at the first step and after submission.
    pub fn previous(&self) -> Option<WizardStep> {
        match self {
            Self::Email | Self::Submitted(_) => None,
            Self::Profile => Some(Self::Email),
            Self::Regular(RegularStep::Location) | Self::Worker(WorkerStep::ServiceArea) => {
                Some(Self::Profile)
            }
            Self::Regular(RegularStep::Address) => Some(Self::Regular(RegularStep::Location)),
        }
    }
}

impl std::fmt::Display for WizardStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Email => "email",
            Self::Profile => "profile",
            Self::Regular(RegularStep::Location) => "location",
            Self::Regular(RegularStep::Address) => "address",
            Self::Worker(WorkerStep::ServiceArea) => "service_area",
            Self::Submitted(_) => "submitted",
        };
        write!(f, "{s}")
    }
}

/// Number of input steps for an account type. Unknown counts as the longer
/// regular path.
pub fn total_steps(account_type: Option<AccountType>) -> usize {
    match account_type {
        Some(AccountType::Worker) => 3,
        Some(AccountType::Regular) | None => 4,
    }
}

/// Result of a successful `advance`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// Moved to the given step.
    Moved(WizardStep),
    /// At a terminal step with valid data; the caller should submit.
    ReadyToSubmit,
}

/// Drives the wizard between steps. Owns the current step exclusively.
#[derive(Debug, Clone)]
pub struct StepSequencer {
    step: WizardStep,
}

impl Default for StepSequencer {
    fn default() -> Self {
        Self::new()
    }
}

impl StepSequencer {
    pub fn new() -> Self {
        Self {
            step: WizardStep::Email,
        }
    }

    pub fn step(&self) -> WizardStep {
        self.step
    }

    /// Step count for the branch in progress, falling back to the draft's
    /// account type before the branch is entered.
    pub fn total_steps(&self, draft: &SignupDraft) -> usize {
        total_steps(self.step.branch().or(draft.account_type))
    }

    /// Validate the current step against `draft` and move forward.
    ///
    /// On validation failure the step is unchanged and the field errors are
    /// returned. After submission, advancing is a no-op that reports the
    /// submitted step.
    pub fn advance(&mut self, draft: &SignupDraft) -> Result<Advance, ValidationErrors> {
        if let WizardStep::Submitted(_) = self.step {
            return Ok(Advance::Moved(self.step));
        }

        validate_step(self.step, draft).into_result()?;

        if self.step.is_terminal() {
            return Ok(Advance::ReadyToSubmit);
        }

        match self.step.next(draft.account_type) {
            Some(next) => {
                self.step = next;
                Ok(Advance::Moved(next))
            }
            // Profile validation guarantees the account type, so this only
            // fires if a step is added without a transition.
            None => Ok(Advance::Moved(self.step)),
        }
    }

    /// Go back one step without validating. Returns the new current step.
    pub fn retreat(&mut self) -> WizardStep {
        if let Some(previous) = self.step.previous() {
            self.step = previous;
        }
        self.step
    }

    /// OAuth entry action: jump from Email straight to Profile.
    pub fn skip_to_profile(&mut self) -> bool {
        if self.step == WizardStep::Email {
            self.step = WizardStep::Profile;
            true
        } else {
            false
        }
    }

    /// Record a successful submission from a terminal step.
    pub fn mark_submitted(&mut self) -> bool {
        match (self.step.is_terminal(), self.step.branch()) {
            (true, Some(account_type)) => {
                self.step = WizardStep::Submitted(account_type);
                true
            }
            _ => false,
        }
    }
}
