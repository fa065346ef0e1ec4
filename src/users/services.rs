use lazy_static::lazy_static;
use rand::{distributions::Alphanumeric, rngs::OsRng, Rng};
use regex::Regex;
use time::OffsetDateTime;
use tracing::warn;
use uuid::Uuid;

use crate::error::{AppError, ValidationErrors};
use crate::users::repo_types::{NewUser, User, NON_SENSITIVE_ATTRIBUTES};

const API_KEY_LEN: usize = 32;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Trims a handle and drops a leading `@`.
pub fn normalize_handle(handle: &str) -> String {
    handle.trim().trim_start_matches('@').to_string()
}

pub fn generate_api_key() -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(API_KEY_LEN)
        .map(char::from)
        .collect()
}

/// Validates `new` and builds the record to persist, with a fresh id and api key.
pub fn build_user(new: NewUser) -> Result<User, AppError> {
    let mut errors = ValidationErrors::new();

    let github_handle = new
        .github_handle
        .as_deref()
        .map(normalize_handle)
        .unwrap_or_default();
    if github_handle.is_empty() {
        errors.add("github_handle", "can't be blank");
    }

    let email = new.email.trim().to_lowercase();
    if !email.is_empty() && !is_valid_email(&email) {
        errors.add("email", "is invalid");
    }

    if !errors.is_empty() {
        warn!(%errors, "rejected user");
    }
    errors.into_result()?;

    Ok(User {
        id: Uuid::new_v4(),
        name: new.name.trim().to_string(),
        email,
        github_handle,
        api_key: generate_api_key(),
        admin: new.admin,
        created_at: OffsetDateTime::now_utc(),
    })
}

/// Names of the attributes a user exposes once serialized, in output order.
///
/// The same for every user and every embedding: `PublicUser` is the only
/// serializable form of a [`User`].
pub fn serializable_attributes(_user: &User) -> &'static [&'static str] {
    &NON_SENSITIVE_ATTRIBUTES
}

/// Attribute names in the order they appear in a serialized user object.
#[cfg(test)]
pub(crate) fn key_order(json: &str) -> Vec<&'static str> {
    let mut found: Vec<(usize, &'static str)> = NON_SENSITIVE_ATTRIBUTES
        .iter()
        .filter_map(|key| json.find(&format!("\"{key}\":")).map(|pos| (pos, *key)))
        .collect();
    found.sort();
    found.into_iter().map(|(_, key)| key).collect()
}
