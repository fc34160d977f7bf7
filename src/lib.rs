//! Notification Broker - In-process real-time notification fan-out.
//!
//! This library routes notifications produced by business logic to every
//! live WebSocket connection of the target user.
//!
//! # Architecture
//!
//! The broker follows a hub-and-pumps model:
//!
//! - **Dispatcher**: a single task owning the user → connection registry
//! - **Connection**: a bounded mailbox plus a read pump and a write pump
//! - **Facade**: typed [`Notifications`] methods per event kind
//!
//! Key design principles:
//!
//! - The registry is only touched by the dispatcher (no shared locks)
//! - The dispatcher never waits on a client: a full mailbox disconnects it
//! - Delivery is best-effort and in-memory only
//! - Shutdown is explicit and bounded by a grace period
//!
//! # Quick Start
//!
//! ```no_run
//! use std::net::{IpAddr, Ipv4Addr};
//! use notification_broker::{Broker, BrokerConfig, Result, UserId};
//! use notification_broker::transport::{NotificationServer, QueryParamAuthenticator};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let broker = Broker::start(BrokerConfig::default())?;
//!
//!     // Clients connect to ws://127.0.0.1:8080/ws?user_id=...
//!     let server = NotificationServer::bind(
//!         broker.clone(),
//!         QueryParamAuthenticator::default(),
//!         IpAddr::V4(Ipv4Addr::LOCALHOST),
//!         8080,
//!     )
//!     .await?;
//!
//!     // Business logic emits events through the facade.
//!     let user = UserId::new("user-42").expect("non-blank id");
//!     broker.notifications().earnings_update(&user, 500, "Coffee habits").await;
//!
//!     server.shutdown();
//!     broker.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`broker`] | Broker, dispatcher, connection handles, facade |
//! | [`config`] | [`BrokerConfig`] and builder |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | [`UserId`] and [`ConnectionId`] |
//! | [`protocol`] | Wire message types |
//! | [`transport`] | WebSocket server and pumps |

// ============================================================================
// Modules
// ============================================================================

/// Broker, dispatcher, connection handles and the notification facade.
///
/// - [`Broker`] - Explicitly started broker instance
/// - [`ConnectionHandle`] - One live connection and its mailbox producer
/// - [`Notifications`] - Typed senders per event kind
pub mod broker;

/// Broker configuration.
///
/// Use [`BrokerConfig::builder()`] for validated construction.
pub mod config;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers for users and connections.
pub mod identifiers;

/// Wire message types.
pub mod protocol;

/// WebSocket transport layer.
///
/// Server, authentication hook and per-connection pumps.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Broker types
pub use broker::{
    Broker, BrokerStats, ConnectionHandle, ConnectionState, Mailbox, Notifications,
    ShutdownReport,
};

// Configuration
pub use config::{BrokerConfig, BrokerConfigBuilder};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{ConnectionId, UserId};

// Protocol types
pub use protocol::{Notification, NotificationKind};
