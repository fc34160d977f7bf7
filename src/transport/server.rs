//! WebSocket notification server.
//!
//! Accepts TCP connections, upgrades them to WebSocket, authenticates the
//! upgrade request and hands accepted connections to the broker.
//!
//! # Connection Flow
//!
//! 1. Client connects to `ws://HOST:PORT/...?user_id=...`
//! 2. The upgrade request is captured during the handshake
//! 3. The [`Authenticator`] resolves a [`UserId`](crate::UserId)
//! 4. Rejected: the socket is dropped, nothing is registered
//! 5. Accepted: [`spawn_connection`] registers it and starts the pumps

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tracing::{debug, error, info, warn};

use crate::broker::{Broker, ConnectionHandle};
use crate::error::{Error, Result};

use super::auth::{Authenticator, ConnectRequest};
use super::connection::spawn_connection;

// ============================================================================
// Constants
// ============================================================================

/// Upper bound on the WebSocket upgrade after the TCP accept.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// NotificationServer
// ============================================================================

/// A bound WebSocket server feeding connections into a [`Broker`].
///
/// The accept loop runs in a background task until [`shutdown`] is called
/// or the server is dropped. Stopping the server does not disconnect
/// existing connections; that is [`Broker::shutdown`]'s job.
///
/// # Example
///
/// ```no_run
/// use std::net::{IpAddr, Ipv4Addr};
/// use notification_broker::{Broker, BrokerConfig};
/// use notification_broker::transport::{NotificationServer, QueryParamAuthenticator};
///
/// # async fn example() -> notification_broker::Result<()> {
/// let broker = Broker::start(BrokerConfig::default())?;
/// let server = NotificationServer::bind(
///     broker.clone(),
///     QueryParamAuthenticator::default(),
///     IpAddr::V4(Ipv4Addr::LOCALHOST),
///     0,
/// )
/// .await?;
///
/// println!("Listening on {}", server.ws_url());
/// # Ok(())
/// # }
/// ```
///
/// [`shutdown`]: NotificationServer::shutdown
pub struct NotificationServer {
    /// Address the listener is bound to.
    local_addr: SocketAddr,
    /// Flipped to `true` to stop the accept loop.
    shutdown_tx: watch::Sender<bool>,
}

impl NotificationServer {
    /// Binds to `ip:port` and starts accepting connections.
    ///
    /// Use port 0 to let the OS assign a random available port.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if binding fails.
    pub async fn bind(
        broker: Broker,
        authenticator: impl Authenticator,
        ip: IpAddr,
        port: u16,
    ) -> Result<Self> {
        let listener = TcpListener::bind(SocketAddr::new(ip, port)).await?;
        let local_addr = listener.local_addr()?;

        info!(%local_addr, "Notification server listening");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let authenticator: Arc<dyn Authenticator> = Arc::new(authenticator);

        tokio::spawn(accept_loop(listener, broker, authenticator, shutdown_rx));

        Ok(Self {
            local_addr,
            shutdown_tx,
        })
    }

    /// Returns the port the server is bound to.
    #[inline]
    #[must_use]
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Returns the local socket address.
    #[inline]
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns the WebSocket URL for this server.
    ///
    /// Format: `ws://{ip}:{port}`
    #[must_use]
    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.local_addr)
    }

    /// Stops accepting new connections. Safe to call repeatedly.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_if_modified(|stopped| !std::mem::replace(stopped, true));
    }
}

impl Drop for NotificationServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ============================================================================
// Accept Loop
// ============================================================================

/// Background task that accepts new connections.
async fn accept_loop(
    listener: TcpListener,
    broker: Broker,
    authenticator: Arc<dyn Authenticator>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    debug!("Accept loop started");

    loop {
        tokio::select! {
            biased;

            // Also resolves once the sender is dropped.
            _ = shutdown_rx.changed() => {
                debug!("Accept loop shutting down");
                break;
            }

            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    let broker = broker.clone();
                    let authenticator = Arc::clone(&authenticator);
                    tokio::spawn(async move {
                        let result =
                            handle_connection(&broker, authenticator.as_ref(), stream, addr).await;
                        if let Err(e) = result {
                            warn!(error = %e, ?addr, "Connection handling failed");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Accept failed");
                }
            },
        }
    }

    info!("Notification server stopped accepting connections");
}

/// Upgrades, authenticates and registers a single connection.
async fn handle_connection(
    broker: &Broker,
    authenticator: &dyn Authenticator,
    stream: TcpStream,
    addr: SocketAddr,
) -> Result<ConnectionHandle> {
    debug!(?addr, "New TCP connection");

    let (ws_stream, request) = upgrade(stream, HANDSHAKE_TIMEOUT).await?;

    // Dropping the stream on rejection closes the socket without a message.
    let user_id = authenticator.authenticate(&request).await?;

    debug!(?addr, user_id = %user_id, path = request.path(), "Connection authenticated");
    spawn_connection(broker, user_id, ws_stream)
}

/// Completes the WebSocket handshake within `limit`, capturing the request.
async fn upgrade<S>(stream: S, limit: Duration) -> Result<(WebSocketStream<S>, ConnectRequest)>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut captured = None;
    let capture = |request: &Request,
                   response: Response|
     -> std::result::Result<Response, ErrorResponse> {
        captured = Some(ConnectRequest::from_handshake(request));
        Ok(response)
    };

    let ws_stream = timeout(limit, tokio_tungstenite::accept_hdr_async(stream, capture))
        .await
        .map_err(|_| {
            Error::connection(format!(
                "WebSocket handshake timed out after {}ms",
                limit.as_millis()
            ))
        })?
        .map_err(|e| Error::connection(format!("WebSocket upgrade failed: {e}")))?;

    let request = captured.ok_or_else(|| Error::connection("upgrade request was not captured"))?;
    Ok((ws_stream, request))
}

// ============================================================================
// Tests
// ============================================================================
