//! Result codes shared by every hub operation.
//!
//! Success is `Ok(..)`. Everything else is a closed set of codes so that a
//! scripting binding on top of this crate can translate them one-to-one into
//! host-level errors.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Non-success result codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HubError {
    /// The operation was accepted but has not finished. Never a failure.
    Again,
    /// An argument was out of range or otherwise malformed.
    InvalidArg,
    /// The operation is not allowed in the current state.
    InvalidOp,
    /// The capability is not compiled into this firmware.
    NotSupported,
    /// No device is set up on the requested port or slot.
    NoDev,
    /// A hardware driver reported an I/O failure.
    Io,
    /// Generic driver failure.
    Failed,
}

/// Result alias used across the crate.
pub type HubResult<T = ()> = Result<T, HubError>;

impl HubError {
    /// `Again` is the only code that callers are expected to retry.
    pub const fn is_transient(&self) -> bool {
        matches!(self, HubError::Again)
    }

    /// Short stable label for logs.
    pub const fn as_label(&self) -> &'static str {
        match self {
            HubError::Again => "again",
            HubError::InvalidArg => "invalid_arg",
            HubError::InvalidOp => "invalid_op",
            HubError::NotSupported => "not_supported",
            HubError::NoDev => "no_dev",
            HubError::Io => "io",
            HubError::Failed => "failed",
        }
    }
}

impl fmt::Display for HubError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let msg = match self {
            HubError::Again => "operation in progress",
            HubError::InvalidArg => "invalid argument",
            HubError::InvalidOp => "invalid operation for the current state",
            HubError::NotSupported => "not supported by this firmware",
            HubError::NoDev => "no such device",
            HubError::Io => "I/O error",
            HubError::Failed => "operation failed",
        };
        f.write_str(msg)
    }
}

/// Outcome of polling an asynchronous command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Command still running.
    Pending,
    /// Command finished with the given result.
    Done(HubResult),
}

impl Completion {
    pub const fn is_pending(&self) -> bool {
        matches!(self, Completion::Pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_again_is_transient() {
        assert!(HubError::Again.is_transient());
        for e in [
            HubError::InvalidArg,
            HubError::InvalidOp,
            HubError::NotSupported,
            HubError::NoDev,
            HubError::Io,
            HubError::Failed,
        ] {
            assert!(!e.is_transient(), "{} should not be retried", e.as_label());
        }
    }
}
