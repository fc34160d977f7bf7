//! Notification broker.
//!
//! Routes notifications to every live connection of a user.
//!
//! # Architecture
//!
//! ```text
//! Business logic ──► Notifications ──► Broker ──► Dispatcher task ──► Mailbox ──► write pump
//!                                        ▲             │ owns
//!                          read pump ────┘ unregister  ▼
//!                                                   Registry
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `core` | [`Broker`] instance and lifecycle |
//! | `dispatcher` | Single task owning the registry |
//! | `handle` | [`ConnectionHandle`], [`Mailbox`], lifecycle state |
//! | `notifications` | Typed facade per event kind |
//! | `registry` | User → connection mapping |

// ============================================================================
// Submodules
// ============================================================================

/// Broker instance.
pub mod core;

/// Dispatcher task.
mod dispatcher;

/// Connection handle and mailbox.
pub mod handle;

/// Typed notification facade.
pub mod notifications;

/// User → connection registry.
mod registry;

// ============================================================================
// Re-exports
// ============================================================================

pub use self::core::{Broker, ShutdownReport};
pub use dispatcher::BrokerStats;
pub use handle::{ConnectionHandle, ConnectionState, Mailbox};
pub use notifications::Notifications;

pub(crate) use handle::PumpGuard;
pub(crate) use notifications::welcome;
