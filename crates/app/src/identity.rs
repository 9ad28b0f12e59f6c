//! Caller verification.
//!
//! The engine takes user ids on trust; whoever drives it must establish who
//! the caller is first.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("no caller identity supplied")]
    Missing,
    #[error("invalid caller identity")]
    Invalid,
}

/// What the transport knows about the caller before verification.
#[derive(Debug, Clone, Default)]
pub struct CallerContext {
    /// Raw user claim, as received.
    pub user: Option<String>,
}

pub trait IdentityProvider {
    /// Returns the verified user id of the caller.
    fn verify_caller(&self, context: &CallerContext) -> Result<i64, IdentityError>;
}

/// Trusts the operator-supplied user id.
///
/// Meant for a local, single-operator setup where whoever runs the binary is
/// allowed to act as any user.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalIdentity;

impl IdentityProvider for LocalIdentity {
    fn verify_caller(&self, context: &CallerContext) -> Result<i64, IdentityError> {
        let raw = context
            .user
            .as_deref()
            .map(str::trim)
            .filter(|raw| !raw.is_empty())
            .ok_or(IdentityError::Missing)?;
        match raw.parse::<i64>() {
            Ok(id) if id > 0 => Ok(id),
            _ => Err(IdentityError::Invalid),
        }
    }
}
