//! Path parameter validation.

use crate::error::{AppError, Result};

/// Shape of an Italian fiscal code, omocodia letters included.
const FISCAL_CODE_PATTERN: &str =
    r"^[A-Z]{6}[0-9LMNPQRSTUV]{2}[ABCDEHLMPRST][0-9LMNPQRSTUV]{2}[A-Z][0-9LMNPQRSTUV]{3}[A-Z]$";

/// Normalize and validate a holder id taken from the URL.
///
/// # Errors
///
/// Returns `BadRequest` if the id is not a fiscal code.
pub fn holder_id(raw: &str) -> Result<String> {
    let normalized = raw.trim().to_ascii_uppercase();
    let pattern = regex::Regex::new(FISCAL_CODE_PATTERN)
        .map_err(|e| AppError::Internal(format!("Invalid holder id pattern: {e}")))?;

    if pattern.is_match(&normalized) {
        Ok(normalized)
    } else {
        Err(AppError::BadRequest(format!("'{raw}' is not a valid fiscal code")))
    }
}
