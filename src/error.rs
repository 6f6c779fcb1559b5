// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the `plugfleet` library.
//!
//! The error kinds mirror the terminal outcomes of a command cycle:
//! validation failures are rejected before any I/O, offline is the explicit
//! end state of the reuse → reconnect → rediscover escalation, operation
//! errors mean the device was reached but the action itself failed, and
//! timeouts belong to the caller's wait, not the worker.

use thiserror::Error;

use crate::session::SessionError;

/// The main error type for this library.
#[derive(Debug, Error)]
pub enum Error {
    /// Request was rejected before any network I/O.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Device is confirmed unreachable after the full escalation sequence.
    #[error("device {name} is offline")]
    Offline {
        /// Display name of the unreachable device.
        name: String,
    },

    /// Device was reached but the requested operation failed.
    #[error("operation failed: {message}")]
    Operation {
        /// Description of the underlying failure.
        message: String,
    },

    /// Caller's wait for command completion exceeded its deadline.
    #[error("command timed out after {waited_ms} ms")]
    Timeout {
        /// How long the caller waited, in milliseconds.
        waited_ms: u64,
    },

    /// Error reported by the device SDK session layer.
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// The engine has been shut down and accepts no further work.
    #[error("engine is shut down")]
    ShutDown,
}

/// Errors raised by pre-I/O request validation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Input does not decode to exactly 12 hex digits.
    #[error("invalid hardware address: {0}")]
    InvalidHardwareAddr(String),

    /// The device id is not present in the whitelist.
    #[error("unknown device: {0}")]
    UnknownDevice(String),

    /// The child outlet id does not exist on the target device.
    #[error("unknown child outlet: {0}")]
    UnknownChild(String),

    /// The requested action string is not `on` or `off`.
    #[error("invalid action: {0} (use 'on' or 'off')")]
    InvalidAction(String),
}

/// A specialized Result type for this library.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_display() {
        let err = ValidationError::InvalidHardwareAddr("zz:zz".to_string());
        assert_eq!(err.to_string(), "invalid hardware address: zz:zz");
    }

    #[test]
    fn error_from_validation_error() {
        let err: Error = ValidationError::UnknownDevice("abc123".to_string()).into();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::UnknownDevice(_))
        ));
    }

    #[test]
    fn offline_error_display() {
        let err = Error::Offline {
            name: "Desk Lamp".to_string(),
        };
        assert_eq!(err.to_string(), "device Desk Lamp is offline");
    }

    #[test]
    fn timeout_error_display() {
        let err = Error::Timeout { waited_ms: 30_000 };
        assert_eq!(err.to_string(), "command timed out after 30000 ms");
    }
}
