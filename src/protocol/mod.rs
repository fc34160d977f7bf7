//! Wire message types.
//!
//! The broker only writes to clients; inbound frames are used for liveness
//! tracking and are never parsed.
//!
//! | Frame | Direction | Purpose |
//! |-------|-----------|---------|
//! | Text (`Notification` JSON) | Server → Client | Event delivery |
//! | Ping | Server → Client | Liveness probe when idle |
//! | Any | Client → Server | Extends the read deadline |
//! | Close | Either | Connection teardown |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `notification` | [`Notification`] and [`NotificationKind`] |

// ============================================================================
// Submodules
// ============================================================================

/// Notification message and event kind catalog.
pub mod notification;

// ============================================================================
// Re-exports
// ============================================================================

pub use notification::{Notification, NotificationKind};
