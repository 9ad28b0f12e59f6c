//! The module contains the errors the engine can return.
//!
//! Every public operation returns one of five kinds:
//!
//! - [`NotFound`] the group, bill or settlement input does not exist.
//! - [`Forbidden`] the caller lacks the capability, or the group is hidden
//!   behind the permission check.
//! - [`Conflict`] the request clashes with existing state (group already
//!   settled, member already assigned).
//! - [`Invalid`] malformed input (empty names, negative amounts, overflow).
//! - [`Upstream`] the storage layer failed. The underlying [`DbErr`] is logged
//!   and never handed to the caller.
//!
//!  [`NotFound`]: EngineError::NotFound
//!  [`Forbidden`]: EngineError::Forbidden
//!  [`Conflict`]: EngineError::Conflict
//!  [`Invalid`]: EngineError::Invalid
//!  [`Upstream`]: EngineError::Upstream
use sea_orm::DbErr;
use thiserror::Error;

/// Engine custom errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Permission denied: {0}")]
    Forbidden(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Invalid input: {0}")]
    Invalid(String),
    #[error("Operation failed: {0}")]
    Upstream(String),
}

/// Coarse error kind, for callers that map errors onto their own surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Forbidden,
    Conflict,
    Invalid,
    Upstream,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Invalid(_) => ErrorKind::Invalid,
            Self::Upstream(_) => ErrorKind::Upstream,
        }
    }

    /// Returns a closure translating a storage error into [`EngineError::Upstream`].
    ///
    /// The storage error is logged in the current span; only `message` reaches
    /// the caller.
    pub(crate) fn upstream(message: &'static str) -> impl FnOnce(DbErr) -> EngineError {
        move |err| {
            tracing::error!(error = %err, "{message}");
            EngineError::Upstream(message.to_string())
        }
    }
}

impl From<DbErr> for EngineError {
    fn from(err: DbErr) -> Self {
        tracing::error!(error = %err, "storage operation failed");
        Self::Upstream("storage operation failed".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_errors_do_not_leak_into_the_message() {
        let err = EngineError::from(DbErr::Custom(
            "UNIQUE constraint failed: groups.id = 42".to_string(),
        ));
        assert_eq!(err.kind(), ErrorKind::Upstream);
        assert!(!err.to_string().contains("42"));
        assert!(!err.to_string().contains("UNIQUE"));
    }

    #[test]
    fn upstream_keeps_the_operation_message() {
        let err = EngineError::upstream("failed to store settlement")(DbErr::Custom(
            "disk I/O error".to_string(),
        ));
        assert_eq!(
            err,
            EngineError::Upstream("failed to store settlement".to_string())
        );
    }
}
