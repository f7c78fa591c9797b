//! Request/response types for auth endpoints.
//!
//! Every request type has a `validate` that trims and normalizes its fields
//! and returns the cleaned values the flows operate on.

use super::AuthError;
use crate::store::IdentityKey;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use utoipa::ToSchema;

const EMAIL_MIN: usize = 3;
const EMAIL_MAX: usize = 30;
const PHONE_MAX: usize = 20;
const PASSWORD_MIN: usize = 6;
const PASSWORD_MAX: usize = 30;
const CODE_MAX: usize = 20;
const NAME_MAX: usize = 50;

static EMAIL_RE: OnceLock<Option<Regex>> = OnceLock::new();

#[must_use]
pub fn valid_email(email: &str) -> bool {
    let re = EMAIL_RE.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").ok());
    (EMAIL_MIN..=EMAIL_MAX).contains(&email.chars().count())
        && re.as_ref().is_some_and(|re| re.is_match(email))
}

#[must_use]
pub fn valid_phone(phone: &str) -> bool {
    !phone.is_empty() && phone.len() <= PHONE_MAX && phone.chars().all(|c| c.is_ascii_digit())
}

#[must_use]
pub fn valid_password(password: &str) -> bool {
    (PASSWORD_MIN..=PASSWORD_MAX).contains(&password.chars().count())
}

#[must_use]
pub fn valid_code(code: &str) -> bool {
    !code.is_empty() && code.len() <= CODE_MAX && code.chars().all(|c| c.is_ascii_alphanumeric())
}

fn clean(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

/// Normalized identity pair: email lowercased, at least one present.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub email: Option<String>,
    pub phone: Option<String>,
    key: IdentityKey,
}

impl Identity {
    /// # Errors
    /// `Validation` if both are missing or either is malformed.
    pub fn parse(email: Option<&str>, phone: Option<&str>) -> Result<Self, AuthError> {
        let email = clean(email).map(str::to_lowercase);
        let phone = clean(phone).map(str::to_string);
        if let Some(email) = &email {
            if !valid_email(email) {
                return Err(AuthError::validation("email is invalid"));
            }
        }
        if let Some(phone) = &phone {
            if !valid_phone(phone) {
                return Err(AuthError::validation("phone must contain digits only"));
            }
        }
        let key = IdentityKey::from_parts(email.as_deref(), phone.as_deref())
            .ok_or_else(|| AuthError::validation("email or phone is required"))?;
        Ok(Self { email, phone, key })
    }

    #[must_use]
    pub fn key(&self) -> &IdentityKey {
        &self.key
    }
}

fn check_password(password: &str) -> Result<(), AuthError> {
    if valid_password(password) {
        Ok(())
    } else {
        Err(AuthError::validation(format!(
            "password must be {PASSWORD_MIN}-{PASSWORD_MAX} characters"
        )))
    }
}

fn check_code(code: &str) -> Result<String, AuthError> {
    let code = code.trim();
    if valid_code(code) {
        Ok(code.to_string())
    } else {
        Err(AuthError::validation("code is invalid"))
    }
}

fn check_name(field: &str, value: Option<&str>) -> Result<Option<String>, AuthError> {
    match clean(value) {
        Some(value) if value.chars().count() > NAME_MAX => Err(AuthError::validation(format!(
            "{field} must be at most {NAME_MAX} characters"
        ))),
        other => Ok(other.map(str::to_string)),
    }
}

/// Email/phone plus password. Used by signup and login.
#[derive(ToSchema, Serialize, Deserialize, Debug, Clone)]
pub struct Credentials {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub password: String,
}

impl Credentials {
    /// # Errors
    /// `Validation` on malformed input.
    pub fn validate(&self) -> Result<Identity, AuthError> {
        let identity = Identity::parse(self.email.as_deref(), self.phone.as_deref())?;
        check_password(&self.password)?;
        Ok(identity)
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone)]
pub struct CodeConfirmation {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub code: String,
}

impl CodeConfirmation {
    /// # Errors
    /// `Validation` on malformed input.
    pub fn validate(&self) -> Result<(Identity, String), AuthError> {
        let identity = Identity::parse(self.email.as_deref(), self.phone.as_deref())?;
        Ok((identity, check_code(&self.code)?))
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone)]
pub struct IdentityInput {
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl IdentityInput {
    /// # Errors
    /// `Validation` on malformed input.
    pub fn validate(&self) -> Result<Identity, AuthError> {
        Identity::parse(self.email.as_deref(), self.phone.as_deref())
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone)]
pub struct PasswordResetConfirmation {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub code: String,
    pub password: String,
}

impl PasswordResetConfirmation {
    /// # Errors
    /// `Validation` on malformed input.
    pub fn validate(&self) -> Result<(Identity, String), AuthError> {
        let identity = Identity::parse(self.email.as_deref(), self.phone.as_deref())?;
        let code = check_code(&self.code)?;
        check_password(&self.password)?;
        Ok((identity, code))
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub surname: Option<String>,
    pub other_names: Option<String>,
}

impl ProfileUpdate {
    /// Trimmed names; blank fields are dropped.
    ///
    /// # Errors
    /// `Validation` if a name is too long or nothing is left to update.
    pub fn validate(&self) -> Result<(Option<String>, Option<String>), AuthError> {
        let surname = check_name("surname", self.surname.as_deref())?;
        let other_names = check_name("other_names", self.other_names.as_deref())?;
        if surname.is_none() && other_names.is_none() {
            return Err(AuthError::validation("nothing to update"));
        }
        Ok((surname, other_names))
    }
}

/// One person in a bulk subagent request.
#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, Default)]
pub struct SubAgentInput {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub surname: Option<String>,
    pub other_names: Option<String>,
}

impl SubAgentInput {
    /// # Errors
    /// `Validation` on malformed input.
    pub fn validate(&self) -> Result<(Identity, Option<String>, Option<String>), AuthError> {
        let identity = Identity::parse(self.email.as_deref(), self.phone.as_deref())?;
        let surname = check_name("surname", self.surname.as_deref())?;
        let other_names = check_name("other_names", self.other_names.as_deref())?;
        Ok((identity, surname, other_names))
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
