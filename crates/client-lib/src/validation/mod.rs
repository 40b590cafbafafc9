// ============================
// crates/client-lib/src/validation/mod.rs
// ============================
//! Form validation for the create/join handshake.

use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

/// Shape of generated room identifiers, e.g. `a1b2-c3d4`
static ROOM_ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9a-f]{4}-[0-9a-f]{4}$").unwrap());

/// Possible validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
}

/// Result type for validation operations
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Require a non-blank form value and return it trimmed
pub fn require<'a>(field: &'static str, value: &'a str) -> ValidationResult<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::MissingField(field));
    }
    Ok(trimmed)
}

/// Whether `room_id` has the shape of a generated identifier.
///
/// Join requests are not rejected on shape; the server decides whether the
/// room exists.
pub fn looks_like_room_id(room_id: &str) -> bool {
    ROOM_ID_REGEX.is_match(room_id)
}
