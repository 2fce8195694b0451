//! Extension trait for best-effort operations.
//!
//! Some steps (early termination, dependent enqueue) must never fail the
//! caller. These combinators log the error and carry on.

use std::fmt::Display;

/// Logged conversions for results whose failure is tolerated.
pub trait ResultExt<T, E> {
    /// Convert a Result to an Option, logging the error if present.
    fn into_option_logged(self, context: &str) -> Option<T>;
}

impl<T, E: Display> ResultExt<T, E> for std::result::Result<T, E> {
    fn into_option_logged(self, context: &str) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(context, error = %e, "Best-effort operation failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_option_ok() {
        let result: Result<i32, String> = Ok(42);
        assert_eq!(result.into_option_logged("test"), Some(42));
    }

    #[test]
    fn test_into_option_err() {
        let result: Result<i32, String> = Err("boom".into());
        assert_eq!(result.into_option_logged("test"), None);
    }
}
