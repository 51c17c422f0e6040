//! Per-step validation rules and the full account schemas.
//!
//! Validation never fails loudly: every check returns a [`ValidationErrors`]
//! map that is empty when the draft is acceptable.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use secrecy::ExposeSecret;
use serde::Serialize;

use super::model::SignupDraft;
use super::state::{RegularStep, WizardStep, WorkerStep};

pub const MIN_NAME_LEN: usize = 2;
pub const MIN_PASSWORD_LEN: usize = 8;
pub const MIN_ADDRESS_LEN: usize = 5;
pub const MIN_TRADE_LEN: usize = 2;

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern compiles")
});

/// Optional leading `+`, no leading zero, 8 to 15 digits.
static PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+?[1-9]\d{7,14}$").expect("phone pattern compiles"));

/// Draft fields that can carry a validation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Field {
    Email,
    FirstName,
    LastName,
    Phone,
    Password,
    PasswordConfirmation,
    AccountType,
    Country,
    State,
    City,
    Zipcode,
    AddressLine,
    AcceptedTerms,
    Trade,
    ServiceCities,
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Email => "email",
            Self::FirstName => "firstName",
            Self::LastName => "lastName",
            Self::Phone => "phone",
            Self::Password => "password",
            Self::PasswordConfirmation => "passwordConfirmation",
            Self::AccountType => "accountType",
            Self::Country => "country",
            Self::State => "state",
            Self::City => "city",
            Self::Zipcode => "zipcode",
            Self::AddressLine => "addressLine",
            Self::AcceptedTerms => "acceptedTerms",
            Self::Trade => "trade",
            Self::ServiceCities => "serviceCities",
        };
        write!(f, "{s}")
    }
}

/// Field → message map. Keeps the first message reported per field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(BTreeMap<Field, String>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: Field, message: impl Into<String>) {
        self.0.entry(field).or_insert_with(|| message.into());
    }

    pub fn extend(&mut self, other: ValidationErrors) {
        for (field, message) in other.0 {
            self.add(field, message);
        }
    }

    pub fn get(&self, field: Field) -> Option<&str> {
        self.0.get(&field).map(String::as_str)
    }

    pub fn contains(&self, field: Field) -> bool {
        self.0.contains_key(&field)
    }

    pub fn fields(&self) -> impl Iterator<Item = Field> + '_ {
        self.0.keys().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// `Ok(())` when empty, otherwise `Err(self)`.
    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl std::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|(field, message)| format!("{field}: {message}"))
            .collect();
        write!(f, "{}", parts.join("; "))
    }
}

/// Check the fields collected by `step`. Steps without input (the submitted
/// state) always pass.
pub fn validate_step(step: WizardStep, draft: &SignupDraft) -> ValidationErrors {
    let mut errors = ValidationErrors::new();
    match step {
        WizardStep::Email => check_email(draft, &mut errors),
        WizardStep::Profile => check_profile(draft, &mut errors),
        WizardStep::Regular(RegularStep::Location) => check_location(draft, &mut errors),
        WizardStep::Regular(RegularStep::Address) => check_address(draft, &mut errors),
        WizardStep::Worker(WorkerStep::ServiceArea) => check_service_area(draft, &mut errors),
        WizardStep::Submitted(_) => {}
    }
    errors
}

/// Full schema for a regular account.
pub fn validate_regular(draft: &SignupDraft) -> ValidationErrors {
    let mut errors = ValidationErrors::new();
    check_email(draft, &mut errors);
    check_profile(draft, &mut errors);
    check_location(draft, &mut errors);
    check_address(draft, &mut errors);
    errors
}

/// Full schema for a worker account.
pub fn validate_worker(draft: &SignupDraft) -> ValidationErrors {
    let mut errors = ValidationErrors::new();
    check_email(draft, &mut errors);
    check_profile(draft, &mut errors);
    check_service_area(draft, &mut errors);
    errors
}

/// Strip the formatting characters people type into phone fields: spaces,
/// dashes, dots and parentheses.
pub fn normalize_phone(raw: &str) -> String {
    raw.chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')' | '.'))
        .collect()
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

pub fn is_valid_phone(phone: &str) -> bool {
    PHONE_RE.is_match(&normalize_phone(phone))
}

fn check_email(draft: &SignupDraft, errors: &mut ValidationErrors) {
    match draft.email.as_deref() {
        None => errors.add(Field::Email, "Email is required"),
        Some(email) if !is_valid_email(email) => errors.add(Field::Email, "Enter a valid email"),
        Some(_) => {}
    }
}

fn check_profile(draft: &SignupDraft, errors: &mut ValidationErrors) {
    check_min_len(errors, Field::FirstName, draft.first_name.as_deref(), MIN_NAME_LEN, "First name");
    check_min_len(errors, Field::LastName, draft.last_name.as_deref(), MIN_NAME_LEN, "Last name");

    match draft.phone.as_deref() {
        None => errors.add(Field::Phone, "Phone number is required"),
        Some(phone) if !is_valid_phone(phone) => errors.add(
            Field::Phone,
            "Enter a phone number in international format, e.g. +14155550123",
        ),
        Some(_) => {}
    }

    let password = draft.password.as_ref().map(|p| p.expose_secret());
    match password {
        None => errors.add(Field::Password, "Password is required"),
        Some(p) if p.chars().count() < MIN_PASSWORD_LEN => errors.add(
            Field::Password,
            format!("Password must be at least {MIN_PASSWORD_LEN} characters"),
        ),
        Some(_) => {}
    }
    let confirmation = draft.password_confirmation.as_ref().map(|p| p.expose_secret());
    if password.is_some() && confirmation != password {
        errors.add(Field::PasswordConfirmation, "Passwords do not match");
    }

    if draft.account_type.is_none() {
        errors.add(Field::AccountType, "Choose an account type");
    }
}

fn check_location(draft: &SignupDraft, errors: &mut ValidationErrors) {
    let location = &draft.location;
    let required = [
        (Field::Country, location.country.is_some(), "Country is required"),
        (Field::State, location.state.is_some(), "State is required"),
        (Field::City, location.city.is_some(), "City is required"),
        (Field::Zipcode, location.zipcode.is_some(), "Zipcode is required"),
    ];
    for (field, present, message) in required {
        if !present {
            errors.add(field, message);
        }
    }
}

fn check_address(draft: &SignupDraft, errors: &mut ValidationErrors) {
    check_min_len(
        errors,
        Field::AddressLine,
        draft.address_line.as_deref(),
        MIN_ADDRESS_LEN,
        "Address",
    );
    if draft.accepted_terms != Some(true) {
        errors.add(Field::AcceptedTerms, "You must accept the terms of service");
    }
}

fn check_service_area(draft: &SignupDraft, errors: &mut ValidationErrors) {
    check_min_len(errors, Field::Trade, draft.trade.as_deref(), MIN_TRADE_LEN, "Trade");
    let cities = &draft.service_cities;
    if cities.is_empty() {
        errors.add(Field::ServiceCities, "Select at least one service city");
    } else if cities.len() > cities.capacity() {
        errors.add(
            Field::ServiceCities,
            format!("Select at most {} service cities", cities.capacity()),
        );
    }
}

fn check_min_len(
    errors: &mut ValidationErrors,
    field: Field,
    value: Option<&str>,
    min: usize,
    label: &str,
) {
    match value {
        None => errors.add(field, format!("{label} is required")),
        Some(v) if v.trim().chars().count() < min => {
            errors.add(field, format!("{label} must be at least {min} characters"))
        }
        Some(_) => {}
    }
}
