//! Connection setup.
//!
//! Turns an upgraded WebSocket stream into a registered connection:
//!
//! 1. Create the [`ConnectionHandle`] and take both pump guards
//! 2. Register with the broker (with the welcome greeting when enabled)
//! 3. Split the stream and spawn the write and read pumps
//! 4. Attach the pump tasks to the handle for forced shutdown
//!
//! Guards are taken before registering, so a connection that is unregistered
//! before its pumps start still cannot reach `Closed` until they have run.

// ============================================================================
// Imports
// ============================================================================

use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::WebSocketStream;
use tracing::{info, warn};

use crate::broker::{Broker, ConnectionHandle, ConnectionState, welcome};
use crate::error::Result;
use crate::identifiers::UserId;

use super::pump::{read_pump, write_pump};

// ============================================================================
// spawn_connection
// ============================================================================

/// Registers `ws_stream` as a connection of `user_id` and starts its pumps.
///
/// Must be called from within a Tokio runtime. The returned handle can be
/// used to observe the connection's lifecycle; the pumps own the transport.
///
/// # Errors
///
/// - [`Error::DispatcherOverloaded`](crate::Error::DispatcherOverloaded) if
///   the broker cannot accept more registrations right now
/// - [`Error::ShuttingDown`](crate::Error::ShuttingDown) if the broker is
///   stopping
///
/// On error the stream is dropped, which closes the transport.
pub fn spawn_connection<S>(
    broker: &Broker,
    user_id: UserId,
    ws_stream: WebSocketStream<S>,
) -> Result<ConnectionHandle>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (handle, mailbox) = ConnectionHandle::new(user_id, broker.config().mailbox_capacity);
    let writer_guard = handle.pump_guard();
    let reader_guard = handle.pump_guard();

    let registered = if broker.config().welcome_message {
        broker.register_with_greeting(&handle, welcome())
    } else {
        broker.register(&handle)
    };

    if let Err(e) = registered {
        warn!(
            user_id = %handle.user_id(),
            connection_id = %handle.id(),
            error = %e,
            "Connection refused"
        );
        drop(writer_guard);
        drop(reader_guard);
        handle.close();
        return Err(e);
    }

    let (sink, stream) = ws_stream.split();
    let writer = tokio::spawn(write_pump(broker.clone(), writer_guard, mailbox, sink));
    let reader = tokio::spawn(read_pump(broker.clone(), reader_guard, stream));
    handle.attach_task(writer.abort_handle());
    handle.attach_task(reader.abort_handle());
    handle.advance(ConnectionState::Active);

    info!(
        user_id = %handle.user_id(),
        connection_id = %handle.id(),
        "Connection established"
    );

    Ok(handle)
}

// ============================================================================
// Tests
// ============================================================================
