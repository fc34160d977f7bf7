//! WebSocket transport layer.
//!
//! Connects clients to the [`Broker`](crate::Broker) over WebSocket.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐                              ┌─────────────────────┐
//! │  Client         │         WebSocket            │  NotificationServer │
//! │  (browser/app)  │◄────────────────────────────►│  → Authenticator    │
//! │                 │    ws://HOST:PORT?user_id    │  → read/write pumps │
//! └─────────────────┘                              └─────────────────────┘
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. `NotificationServer::bind` - Bind and start accepting
//! 2. Upgrade to WebSocket, capture the request
//! 3. `Authenticator::authenticate` - Resolve the user or drop the socket
//! 4. `spawn_connection` - Register and start both pumps
//! 5. First pump to exit unregisters; the other follows
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `auth` | Upgrade request view and authenticators |
//! | `connection` | Registration and pump startup |
//! | `pump` | Read and write pumps |
//! | `server` | WebSocket server and accept loop |

// ============================================================================
// Submodules
// ============================================================================

/// Upgrade request view and authenticators.
pub mod auth;

/// Registration and pump startup.
pub mod connection;

/// Read and write pumps.
mod pump;

/// WebSocket server for client connections.
pub mod server;

// ============================================================================
// Re-exports
// ============================================================================

pub use auth::{Authenticator, ConnectRequest, QueryParamAuthenticator};
pub use connection::spawn_connection;
pub use server::NotificationServer;
