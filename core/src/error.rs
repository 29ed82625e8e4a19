//! Domain rejections that callers need to tell apart.
//!
//! These are carried inside `anyhow::Error`; the REST layer downcasts them to
//! pick a status code.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("User {0} not found")]
    UserNotFound(i64),

    #[error("Invalid window: from ({from}) is after to ({to})")]
    InvalidWindow { from: i64, to: i64 },

    #[error("Invalid glucose interval {0}. Use 1, 2 or 3")]
    InvalidInterval(i64),

    #[error("A profile's glucose interval must be 1 or 2 (got {0})")]
    InvalidProfileInterval(u8),

    #[error("Invalid day count {0}. Use 1 to 366")]
    InvalidDayCount(i64),

    #[error("Anchor {0} is outside the supported date range")]
    InvalidAnchor(i64),

    #[error("Invalid meal category '{0}'. Use fasting, breakfast, lunch or dinner")]
    InvalidCategory(String),
}

impl EngineError {
    /// True for rejections caused by the caller's input rather than missing data.
    #[must_use]
    pub fn is_bad_request(&self) -> bool {
        !matches!(self, EngineError::UserNotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        assert_eq!(EngineError::UserNotFound(7).to_string(), "User 7 not found");
        assert!(
            EngineError::InvalidWindow { from: 5, to: 1 }
                .to_string()
                .contains("after")
        );
    }

    #[test]
    fn test_downcast_through_anyhow() {
        let err: anyhow::Error = EngineError::UserNotFound(3).into();
        let inner = err.downcast_ref::<EngineError>().unwrap();
        assert!(!inner.is_bad_request());
        assert!(EngineError::InvalidInterval(9).is_bad_request());
        assert!(EngineError::InvalidDayCount(0).is_bad_request());
        assert!(EngineError::InvalidAnchor(i64::MIN).is_bad_request());
    }
}
