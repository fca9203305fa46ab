use std::sync::LazyLock;

use regex::Regex;
use uuid::Uuid;

use crate::error::AppError::{self, InvalidArgument, NotFound};

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static EMAIL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+$").unwrap());

/// Trims and collapses whitespace runs to a single space. Case is kept.
pub fn sanitize(input: &str) -> String {
    WHITESPACE.replace_all(input.trim(), " ").into_owned()
}

pub fn require_name(name: Option<&str>, entity: &str) -> Result<String, AppError> {
    let name = sanitize(name.unwrap_or_default());

    if name.is_empty() {
        return Err(InvalidArgument(format!("{entity} name is required")));
    }

    Ok(name)
}

pub fn require_email(email: Option<&str>) -> Result<String, AppError> {
    let email = email.unwrap_or_default().trim().to_lowercase();

    if email.is_empty() {
        return Err(InvalidArgument("Student email is required".to_string()));
    }
    if !EMAIL.is_match(&email) {
        return Err(InvalidArgument(format!("Invalid email address: {email}")));
    }

    Ok(email)
}

/// Blank descriptions are stored as absent.
pub fn optional_text(text: Option<&str>) -> Option<String> {
    text.map(sanitize).filter(|text| !text.is_empty())
}

/// An id that does not parse cannot name a stored row.
pub fn parse_id(raw: &str, entity: &'static str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw.trim()).map_err(|_| NotFound(entity))
}
