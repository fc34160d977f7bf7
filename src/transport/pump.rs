//! Per-connection read and write pumps.
//!
//! Each registered connection runs exactly one of each:
//!
//! - **Write pump**: sole writer to the transport. Drains the mailbox into
//!   JSON text frames and sends a ping after every idle keepalive interval.
//! - **Read pump**: sole reader. Inbound frames are not interpreted; any
//!   frame re-arms the read deadline, and close, error or an elapsed
//!   deadline ends the connection.
//!
//! Both pumps are generic over the frame sink/stream so they run over a TCP
//! socket or an in-memory duplex alike. Whichever pump exits first
//! unregisters the connection, which closes the mailbox and so stops the
//! other pump.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::time::{Instant, MissedTickBehavior, interval_at, timeout};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, error, trace, warn};

use crate::broker::{Broker, Mailbox, PumpGuard};
use crate::error::{Error, Result};

// ============================================================================
// Write Pump
// ============================================================================

/// Drains `mailbox` into `sink` until the mailbox closes or a write fails.
///
/// Every write is bounded by the configured write timeout. The keepalive
/// timer restarts after each write, so pings are only sent on idle
/// connections.
pub(crate) async fn write_pump<S>(
    broker: Broker,
    guard: PumpGuard,
    mut mailbox: Mailbox,
    mut sink: S,
)
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    let handle = guard.handle().clone();
    let keepalive_interval = broker.config().keepalive_interval;
    let write_timeout = broker.config().write_timeout;

    let mut keepalive = interval_at(Instant::now() + keepalive_interval, keepalive_interval);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            notification = mailbox.recv() => {
                let Some(notification) = notification else {
                    debug!(connection_id = %handle.id(), "Mailbox closed, closing transport");
                    let _ = write_frame(&mut sink, Message::Close(None), write_timeout).await;
                    let _ = timeout(write_timeout, sink.close()).await;
                    break;
                };

                let json = match notification.to_json() {
                    Ok(json) => json,
                    Err(e) => {
                        error!(
                            connection_id = %handle.id(),
                            kind = %notification.kind,
                            error = %e,
                            "Failed to serialize notification"
                        );
                        continue;
                    }
                };

                let frame = Message::Text(json.into());
                if let Err(e) = write_frame(&mut sink, frame, write_timeout).await {
                    warn!(
                        user_id = %handle.user_id(),
                        connection_id = %handle.id(),
                        error = %e,
                        "Write failed"
                    );
                    break;
                }

                trace!(
                    connection_id = %handle.id(),
                    kind = %notification.kind,
                    "Notification written"
                );
                keepalive.reset();
            }

            _ = keepalive.tick() => {
                let ping = Message::Ping(Default::default());
                if let Err(e) = write_frame(&mut sink, ping, write_timeout).await {
                    warn!(
                        user_id = %handle.user_id(),
                        connection_id = %handle.id(),
                        error = %e,
                        "Keepalive ping failed"
                    );
                    break;
                }
                trace!(connection_id = %handle.id(), "Keepalive ping sent");
            }
        }
    }

    broker.unregister(&handle);
    debug!(connection_id = %handle.id(), "Write pump terminated");
    drop(guard);
}

/// Sends one frame, failing if it does not complete within `limit`.
async fn write_frame<S>(sink: &mut S, frame: Message, limit: Duration) -> Result<()>
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    timeout(limit, sink.send(frame))
        .await
        .map_err(|_| Error::connection(format!("write timed out after {}ms", limit.as_millis())))??;
    Ok(())
}

// ============================================================================
// Read Pump
// ============================================================================

/// Reads from `stream` until close, error, an elapsed read deadline, or the
/// connection being unregistered elsewhere.
///
/// Frame contents are ignored. Pongs, client pings and any data frame all
/// count as activity.
pub(crate) async fn read_pump<S>(broker: Broker, guard: PumpGuard, mut stream: S)
where
    S: Stream<Item = std::result::Result<Message, WsError>> + Unpin,
{
    let handle = guard.handle().clone();
    let read_deadline = broker.config().read_deadline;

    loop {
        tokio::select! {
            biased;

            () = handle.wait_unregistering() => {
                debug!(connection_id = %handle.id(), "Connection unregistered, stopping reads");
                break;
            }

            frame = timeout(read_deadline, stream.next()) => match frame {
                Ok(Some(Ok(Message::Close(frame)))) => {
                    debug!(connection_id = %handle.id(), ?frame, "WebSocket closed by peer");
                    break;
                }

                Ok(Some(Ok(_))) => {
                    trace!(connection_id = %handle.id(), "Inbound frame, read deadline re-armed");
                }

                Ok(Some(Err(e))) => {
                    warn!(
                        user_id = %handle.user_id(),
                        connection_id = %handle.id(),
                        error = %e,
                        "WebSocket read error"
                    );
                    break;
                }

                Ok(None) => {
                    debug!(connection_id = %handle.id(), "WebSocket stream ended");
                    break;
                }

                Err(_) => {
                    warn!(
                        user_id = %handle.user_id(),
                        connection_id = %handle.id(),
                        deadline_secs = read_deadline.as_secs_f64(),
                        "Read deadline elapsed, dropping dead connection"
                    );
                    break;
                }
            },
        }
    }

    broker.unregister(&handle);
    debug!(connection_id = %handle.id(), "Read pump terminated");
    drop(guard);
}

// ============================================================================
// Tests
// ============================================================================
