//! Broker instance.
//!
//! [`Broker`] is the explicitly constructed entry point: created once at
//! process start, cloned into every component that registers connections or
//! publishes notifications, and shut down explicitly at process stop.
//!
//! # Example
//!
//! ```no_run
//! use notification_broker::{Broker, BrokerConfig, Notification, NotificationKind, UserId};
//!
//! # async fn example() -> notification_broker::Result<()> {
//! let broker = Broker::start(BrokerConfig::default())?;
//!
//! let user = UserId::new("u1").expect("non-blank");
//! let (_handle, mut mailbox) = broker.connect(user.clone())?;
//!
//! broker
//!     .send_to_user(&user, Notification::new(NotificationKind::SystemAlert, "Hi", "there"))
//!     .await;
//! assert!(mailbox.recv().await.is_some());
//!
//! broker.shutdown().await;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::BrokerConfig;
use crate::error::{Error, Result};
use crate::identifiers::UserId;
use crate::protocol::Notification;

use super::dispatcher::{
    BrokerStats, Control, Dispatcher, DispatcherInputs, RegisterRequest, SendRequest,
};
use super::handle::{ConnectionHandle, ConnectionState, Mailbox};
use super::notifications::Notifications;

// ============================================================================
// Types
// ============================================================================

/// Outcome of [`Broker::shutdown`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    /// Connections whose pumps exited within the grace period.
    pub closed: usize,
    /// Connections whose pumps had to be aborted.
    pub forced: usize,
}

/// Internal shared state for the broker.
struct BrokerInner {
    /// Validated configuration.
    config: BrokerConfig,
    /// Dispatcher inputs.
    inputs: DispatcherInputs,
    /// Set once shutdown begins.
    shutting_down: AtomicBool,
}

// ============================================================================
// Broker
// ============================================================================

/// Handle to a running notification broker.
///
/// Cheap to clone; all clones drive the same dispatcher.
#[derive(Clone)]
pub struct Broker {
    inner: Arc<BrokerInner>,
}

impl fmt::Debug for Broker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Broker")
            .field("config", &self.inner.config)
            .field("shutting_down", &self.is_shutting_down())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Broker - Constructor
// ============================================================================

impl Broker {
    /// Validates `config` and spawns the dispatcher task.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is invalid.
    pub fn start(config: BrokerConfig) -> Result<Self> {
        config.validate()?;

        let (dispatcher, inputs) = Dispatcher::new(config.dispatcher_capacity);
        tokio::spawn(dispatcher.run());

        info!(
            mailbox_capacity = config.mailbox_capacity,
            dispatcher_capacity = config.dispatcher_capacity,
            keepalive_secs = config.keepalive_interval.as_secs_f64(),
            read_deadline_secs = config.read_deadline.as_secs_f64(),
            "Notification broker started"
        );

        Ok(Self {
            inner: Arc::new(BrokerInner {
                config,
                inputs,
                shutting_down: AtomicBool::new(false),
            }),
        })
    }

    /// Returns the active configuration.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &BrokerConfig {
        &self.inner.config
    }

    /// Returns `true` once [`shutdown`](Self::shutdown) has been called.
    #[inline]
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::SeqCst)
    }

    /// Returns the typed notification facade.
    #[inline]
    #[must_use]
    pub fn notifications(&self) -> Notifications<'_> {
        Notifications::new(self)
    }
}

// ============================================================================
// Broker - Registration
// ============================================================================

impl Broker {
    /// Creates a handle with the configured mailbox capacity and registers it.
    ///
    /// # Errors
    ///
    /// - [`Error::DispatcherOverloaded`] if the register input is full
    /// - [`Error::ShuttingDown`] if the broker is stopping
    pub fn connect(&self, user_id: UserId) -> Result<(ConnectionHandle, Mailbox)> {
        let (handle, mailbox) = ConnectionHandle::new(user_id, self.inner.config.mailbox_capacity);
        self.register(&handle)?;
        Ok((handle, mailbox))
    }

    /// Queues a handle for registration.
    ///
    /// Returns as soon as the request is queued. Registering the same handle
    /// twice leaves a single registry entry.
    ///
    /// # Errors
    ///
    /// - [`Error::DispatcherOverloaded`] if the register input is full
    /// - [`Error::ShuttingDown`] if the broker is stopping
    pub fn register(&self, handle: &ConnectionHandle) -> Result<()> {
        self.submit_register(handle, None)
    }

    /// Queues a handle for registration with a greeting for that handle.
    pub(crate) fn register_with_greeting(
        &self,
        handle: &ConnectionHandle,
        greeting: Notification,
    ) -> Result<()> {
        self.submit_register(handle, Some(Arc::new(greeting.stamped())))
    }

    fn submit_register(
        &self,
        handle: &ConnectionHandle,
        greeting: Option<Arc<Notification>>,
    ) -> Result<()> {
        if self.is_shutting_down() {
            return Err(Error::ShuttingDown);
        }

        let request = RegisterRequest {
            handle: handle.clone(),
            greeting,
        };

        match self.inner.inputs.register.try_send(request) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(
                    user_id = %handle.user_id(),
                    capacity = self.inner.config.dispatcher_capacity,
                    "Register queue full, rejecting connection"
                );
                Err(Error::dispatcher_overloaded(
                    self.inner.config.dispatcher_capacity,
                ))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(Error::ShuttingDown),
        }
    }

    /// Unregisters a handle and closes its mailbox.
    ///
    /// The mailbox is closed before this returns, so nothing enqueued
    /// afterwards reaches the connection. Safe to call any number of times
    /// from any task.
    pub fn unregister(&self, handle: &ConnectionHandle) {
        handle.close();
        if self.inner.inputs.unregister.send(handle.clone()).is_err() {
            debug!(connection_id = %handle.id(), "Dispatcher stopped, unregister skipped");
        }
    }
}

// ============================================================================
// Broker - Delivery
// ============================================================================

impl Broker {
    /// Delivers a notification to every connection of `user_id`.
    ///
    /// Fire-and-forget: waits only for room in the dispatcher input, never
    /// for a connection. A user with no connections is not an error, and a
    /// connection whose mailbox is full is disconnected instead of
    /// delaying anyone else.
    pub async fn send_to_user(&self, user_id: &UserId, notification: Notification) {
        self.enqueue(user_id, Arc::new(notification.stamped())).await;
    }

    /// Delivers a notification to every connected user.
    ///
    /// Targets the users connected when the dispatcher answers the snapshot
    /// request. Users connecting while the broadcast is in progress may or
    /// may not receive it.
    pub async fn broadcast_all(&self, notification: Notification) {
        let notification = Arc::new(notification.stamped());
        let user_ids = self
            .query(|reply| Control::UserIds { reply })
            .await
            .unwrap_or_default();

        debug!(users = user_ids.len(), kind = %notification.kind, "Broadcasting notification");

        for user_id in &user_ids {
            self.enqueue(user_id, Arc::clone(&notification)).await;
        }
    }

    async fn enqueue(&self, user_id: &UserId, notification: Arc<Notification>) {
        if self.is_shutting_down() {
            debug!(
                user_id = %user_id,
                kind = %notification.kind,
                "Broker stopping, notification dropped"
            );
            return;
        }

        let request = SendRequest {
            user_id: user_id.clone(),
            notification,
        };

        if self.inner.inputs.send.send(request).await.is_err() {
            debug!(user_id = %user_id, "Dispatcher stopped, notification dropped");
        }
    }
}

// ============================================================================
// Broker - Statistics
// ============================================================================

impl Broker {
    /// Number of live connections of one user.
    pub async fn active_connections(&self, user_id: &UserId) -> usize {
        let user_id = user_id.clone();
        self.query(|reply| Control::ActiveConnections { user_id, reply })
            .await
            .unwrap_or(0)
    }

    /// Number of live connections across all users.
    pub async fn total_connections(&self) -> usize {
        self.stats().await.total_connections
    }

    /// Snapshot of the broker statistics.
    ///
    /// Returns zeroed statistics once the dispatcher has stopped.
    pub async fn stats(&self) -> BrokerStats {
        self.query(|reply| Control::Stats { reply })
            .await
            .unwrap_or_default()
    }

    /// Routes a query through the dispatcher so it is answered between
    /// registry mutations, never during one.
    async fn query<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Control) -> Option<T> {
        let (reply, rx) = oneshot::channel();
        self.inner.inputs.control.send(build(reply)).ok()?;
        rx.await.ok()
    }
}

// ============================================================================
// Broker - Lifecycle
// ============================================================================

impl Broker {
    /// Stops the broker.
    ///
    /// Closes every mailbox, waits up to the configured grace period for each
    /// connection to reach [`ConnectionState::Closed`], then aborts the pumps
    /// of the remaining ones. Later registrations fail with
    /// [`Error::ShuttingDown`] and later sends are dropped.
    ///
    /// Only the first call does any work; repeated calls return an empty
    /// report.
    pub async fn shutdown(&self) -> ShutdownReport {
        if self.inner.shutting_down.swap(true, Ordering::SeqCst) {
            return ShutdownReport::default();
        }

        info!("Notification broker shutting down");

        let handles = self
            .query(|reply| Control::Shutdown { reply })
            .await
            .unwrap_or_default();

        let grace = self.inner.config.shutdown_grace;
        let pending = join_all(handles.iter().map(|handle| handle.wait_closed()));
        if timeout(grace, pending).await.is_err() {
            warn!(
                grace_ms = grace.as_millis() as u64,
                "Shutdown grace period elapsed, aborting remaining connections"
            );
        }

        let mut report = ShutdownReport::default();
        for handle in &handles {
            if handle.state() == ConnectionState::Closed {
                report.closed += 1;
            } else {
                handle.abort_tasks();
                report.forced += 1;
            }
        }

        info!(
            closed = report.closed,
            forced = report.forced,
            "Notification broker shutdown complete"
        );

        report
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use serde_json::json;
    use tokio_test::assert_ok;

    use crate::protocol::NotificationKind;

    fn user(id: &str) -> UserId {
        UserId::new(id).unwrap()
    }

    fn earnings(amount: i64) -> Notification {
        Notification::new(NotificationKind::EarningsUpdate, "Earnings Updated!", "Survey")
            .with_field("amount", amount)
    }

    fn broker_with(capacity: usize) -> Broker {
        let config = BrokerConfig::builder()
            .mailbox_capacity(capacity)
            .shutdown_grace(Duration::from_millis(100))
            .build()
            .unwrap();
        Broker::start(config).unwrap()
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_config() {
        let config = BrokerConfig {
            mailbox_capacity: 0,
            ..BrokerConfig::default()
        };
        assert!(matches!(Broker::start(config), Err(Error::Config { .. })));
    }

    #[tokio::test]
    async fn test_send_to_user_without_connections_is_noop() {
        let broker = broker_with(4);
        broker.send_to_user(&user("nobody"), earnings(1)).await;
        assert_eq!(broker.total_connections().await, 0);
    }

    #[tokio::test]
    async fn test_multi_device_fan_out() {
        let broker = broker_with(4);
        let u1 = user("u1");
        let (_c1, mut m1) = broker.connect(u1.clone()).unwrap();
        let (_c2, mut m2) = broker.connect(u1.clone()).unwrap();
        let (_other, mut other) = broker.connect(user("u2")).unwrap();

        broker.send_to_user(&u1, earnings(500)).await;

        let first = m1.recv().await.unwrap();
        let second = m2.recv().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.data.as_ref().unwrap()["amount"], json!(500));
        assert!(!first.read);

        assert_eq!(broker.total_connections().await, 3);
        assert!(other.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_disconnected_handle_stops_receiving() {
        let broker = broker_with(4);
        let u1 = user("u1");
        let (c1, mut m1) = broker.connect(u1.clone()).unwrap();
        let (_c2, mut m2) = broker.connect(u1.clone()).unwrap();

        broker.send_to_user(&u1, earnings(500)).await;
        assert!(m1.recv().await.is_some());
        assert!(m2.recv().await.is_some());

        // Transport failure on c1: its read pump unregisters it.
        broker.unregister(&c1);
        assert_eq!(broker.active_connections(&u1).await, 1);

        broker.send_to_user(&u1, earnings(20)).await;
        assert_eq!(m2.recv().await.unwrap().data.as_ref().unwrap()["amount"], json!(20));
        assert!(m1.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_mailbox_overflow_disconnects_handle() {
        let broker = broker_with(2);
        let u1 = user("u1");
        let (slow, _mailbox) = broker.connect(u1.clone()).unwrap();
        let (_fast, mut fast_mailbox) = broker.connect(user("u2")).unwrap();
        assert_eq!(broker.total_connections().await, 2);

        for amount in 0..3 {
            broker.send_to_user(&u1, earnings(amount)).await;
        }

        let stats = broker.stats().await;
        assert_eq!(stats.total_connections, 1);
        assert_eq!(stats.overflow_disconnects, 1);
        assert!(slow.is_closed());

        // Subsequent sends to that user find no connection; others unaffected.
        broker.send_to_user(&u1, earnings(4)).await;
        broker.send_to_user(&user("u2"), earnings(5)).await;
        assert_eq!(broker.active_connections(&u1).await, 0);
        assert!(fast_mailbox.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_double_register_single_unregister() {
        let broker = broker_with(4);
        let (handle, _mailbox) = ConnectionHandle::new(user("u1"), 4);

        assert_ok!(broker.register(&handle));
        assert_ok!(broker.register(&handle));
        assert_eq!(broker.active_connections(handle.user_id()).await, 1);

        broker.unregister(&handle);
        assert_eq!(broker.active_connections(handle.user_id()).await, 0);
        assert_eq!(broker.total_connections().await, 0);

        // Redundant unregister from the other pump.
        broker.unregister(&handle);
        assert_eq!(broker.total_connections().await, 0);
    }

    #[tokio::test]
    async fn test_register_after_unregister_is_ignored() {
        let broker = broker_with(4);
        let (handle, _mailbox) = ConnectionHandle::new(user("u1"), 4);

        broker.unregister(&handle);
        assert_ok!(broker.register(&handle));
        assert_eq!(broker.total_connections().await, 0);
    }

    #[tokio::test]
    async fn test_total_is_sum_of_active() {
        let broker = broker_with(4);
        let users = ["a", "b", "c"].map(user);
        let mut keep = Vec::new();
        for (i, u) in users.iter().enumerate() {
            for _ in 0..=i {
                keep.push(broker.connect(u.clone()).unwrap());
            }
        }
        broker.unregister(&keep[0].0);

        let mut sum = 0;
        for u in &users {
            sum += broker.active_connections(u).await;
        }
        assert_eq!(broker.total_connections().await, sum);
        assert_eq!(sum, 5);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_user() {
        let broker = broker_with(4);
        let (_a, mut ma) = broker.connect(user("a")).unwrap();
        let (_b1, mut mb1) = broker.connect(user("b")).unwrap();
        let (_b2, mut mb2) = broker.connect(user("b")).unwrap();

        broker
            .broadcast_all(Notification::new(NotificationKind::SystemAlert, "Maintenance", "soon"))
            .await;

        for mailbox in [&mut ma, &mut mb1, &mut mb2] {
            assert_eq!(mailbox.recv().await.unwrap().title, "Maintenance");
            assert!(mailbox.try_recv().is_err());
        }
    }

    #[tokio::test]
    async fn test_broadcast_races_with_registration() {
        let broker = broker_with(8);
        let (_a, mut ma) = broker.connect(user("a")).unwrap();

        let racer = broker.clone();
        let join = tokio::spawn(async move { racer.connect(user("late")).unwrap() });

        broker
            .broadcast_all(Notification::new(NotificationKind::SystemAlert, "All", ""))
            .await;
        let (_late, mut late_mailbox) = join.await.unwrap();
        // Drain the dispatcher so any delivery has happened.
        broker.total_connections().await;

        assert_eq!(ma.recv().await.unwrap().title, "All");
        assert!(ma.try_recv().is_err());
        // Either zero or one copy, never more.
        let mut late_copies = 0;
        while late_mailbox.try_recv().is_ok() {
            late_copies += 1;
        }
        assert!(late_copies <= 1);
    }

    #[tokio::test]
    async fn test_register_overload_is_reported() {
        let config = BrokerConfig::builder().dispatcher_capacity(1).build().unwrap();
        let broker = Broker::start(config).unwrap();

        // No await point between these, so the dispatcher cannot drain.
        let (first, _m1) = ConnectionHandle::new(user("u1"), 4);
        let (second, _m2) = ConnectionHandle::new(user("u2"), 4);
        assert_ok!(broker.register(&first));
        let err = broker.register(&second).unwrap_err();
        assert!(matches!(err, Error::DispatcherOverloaded { capacity: 1 }));
    }

    #[tokio::test]
    async fn test_shutdown_closes_mailboxes() {
        let broker = broker_with(4);
        let (handle, mut mailbox) = broker.connect(user("u1")).unwrap();
        broker.send_to_user(handle.user_id(), earnings(1)).await;

        let report = broker.shutdown().await;
        assert_eq!(report, ShutdownReport { closed: 1, forced: 0 });
        assert!(broker.is_shutting_down());

        // Queued message still drains, then the mailbox reports closed.
        assert!(mailbox.recv().await.is_some());
        assert!(mailbox.recv().await.is_none());

        assert!(matches!(broker.connect(user("u2")), Err(Error::ShuttingDown)));
        assert_eq!(broker.total_connections().await, 0);
        assert_eq!(broker.shutdown().await, ShutdownReport::default());
    }

    #[tokio::test]
    async fn test_shutdown_aborts_stuck_pumps() {
        let broker = broker_with(4);
        let (handle, _mailbox) = broker.connect(user("u1")).unwrap();

        // A pump that never notices the closed mailbox.
        let guard = handle.pump_guard();
        let task = tokio::spawn(async move {
            let _guard = guard;
            std::future::pending::<()>().await;
        });
        handle.attach_task(task.abort_handle());

        let report = broker.shutdown().await;
        assert_eq!(report, ShutdownReport { closed: 0, forced: 1 });
        assert_eq!(handle.state(), ConnectionState::Closed);
        assert!(task.await.unwrap_err().is_cancelled());
    }
}
