//! Error types for the notification broker.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! Fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use notification_broker::{Broker, Result, UserId};
//!
//! async fn attach(broker: &Broker, user: UserId) -> Result<()> {
//!     let (handle, mailbox) = broker.connect(user)?;
//!     // hand `mailbox` to a write pump ...
//!     Ok(())
//! }
//! ```
//!
//! Delivery is fire-and-forget: sending a notification never yields an
//! error. Errors only come out of configuration, registration, binding and
//! the connection handshake.
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Registration | [`Error::RegistrationRejected`], [`Error::DispatcherOverloaded`], [`Error::ShuttingDown`] |
//! | Connection | [`Error::Connection`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when broker configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Registration Errors
    // ========================================================================
    /// No resolvable user identifier for a connection.
    ///
    /// The connection is refused before the dispatcher is involved.
    #[error("Registration rejected: {reason}")]
    RegistrationRejected {
        /// Why no identity could be resolved.
        reason: String,
    },

    /// The dispatcher's register input is full.
    ///
    /// The caller should close the connection; the client is expected to
    /// reconnect later.
    #[error("Dispatcher overloaded: register queue at capacity {capacity}")]
    DispatcherOverloaded {
        /// Configured capacity of the register queue.
        capacity: usize,
    },

    /// The broker is shutting down or already stopped.
    #[error("Broker is shutting down")]
    ShuttingDown,

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// WebSocket connection failed.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a registration rejected error.
    #[inline]
    pub fn registration_rejected(reason: impl Into<String>) -> Self {
        Self::RegistrationRejected {
            reason: reason.into(),
        }
    }

    /// Creates a dispatcher overloaded error.
    #[inline]
    pub fn dispatcher_overloaded(capacity: usize) -> Self {
        Self::DispatcherOverloaded { capacity }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::WebSocket(_))
    }

    /// Returns `true` if the client may succeed by reconnecting later.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::DispatcherOverloaded { .. } | Self::Connection { .. }
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::ErrorKind;

    #[test]
    fn test_error_display() {
        let err = Error::connection("handshake failed");
        assert_eq!(err.to_string(), "Connection failed: handshake failed");
    }

    #[test]
    fn test_config_error() {
        let err = Error::config("mailbox capacity must be > 0");
        assert_eq!(
            err.to_string(),
            "Configuration error: mailbox capacity must be > 0"
        );
    }

    #[test]
    fn test_overloaded_display() {
        let err = Error::dispatcher_overloaded(64);
        assert!(err.to_string().contains("64"));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_is_connection_error() {
        assert!(Error::connection("test").is_connection_error());
        assert!(Error::WebSocket(WsError::ConnectionClosed).is_connection_error());
        assert!(!Error::ShuttingDown.is_connection_error());
        assert!(!Error::registration_rejected("no user id").is_connection_error());
    }

    #[test]
    fn test_websocket_error_is_not_recoverable() {
        let err: Error = WsError::AlreadyClosed.into();
        assert!(matches!(err, Error::WebSocket(_)));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_rejection_is_not_recoverable() {
        assert!(!Error::registration_rejected("missing").is_recoverable());
        assert!(!Error::ShuttingDown.is_recoverable());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoError::new(ErrorKind::AddrInUse, "port taken");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }
}
