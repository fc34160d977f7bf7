//! Per-connection handle and mailbox.
//!
//! A [`ConnectionHandle`] is shared by three owners: the dispatcher's
//! registry entry, the write pump (which drains the [`Mailbox`]) and the read
//! pump. Its lifecycle only moves forward:
//!
//! ```text
//! Connecting → Registered → Active → Unregistering → Closed
//! ```
//!
//! `Unregistering` is entered the moment the mailbox is closed, whoever
//! triggers it (either pump, mailbox overflow, shutdown). `Closed` follows
//! once every pump guard has been dropped.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;
use tracing::{debug, trace};

use crate::identifiers::{ConnectionId, UserId};
use crate::protocol::Notification;

// ============================================================================
// Types
// ============================================================================

/// Receiving end of a connection's mailbox, drained by its write pump.
pub type Mailbox = mpsc::Receiver<Arc<Notification>>;

/// Lifecycle of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConnectionState {
    /// Handle created, registration not yet processed.
    Connecting,
    /// Present in the dispatcher's registry.
    Registered,
    /// Pumps are running.
    Active,
    /// Mailbox closed; waiting for pumps to exit.
    Unregistering,
    /// Pumps exited and the transport is released.
    Closed,
}

/// Result of a non-blocking enqueue attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Enqueue {
    /// Message is in the mailbox.
    Queued,
    /// Mailbox at capacity; the message was not queued.
    Full,
    /// Mailbox already closed.
    Closed,
}

// ============================================================================
// ConnectionHandle
// ============================================================================

/// Shared state of one live connection.
struct HandleInner {
    /// Connection identity.
    id: ConnectionId,
    /// Owning user.
    user_id: UserId,
    /// Mailbox capacity.
    capacity: usize,
    /// Producer side of the mailbox. `None` once closed.
    sender: Mutex<Option<mpsc::Sender<Arc<Notification>>>>,
    /// Lifecycle state, observable by waiters.
    state: watch::Sender<ConnectionState>,
    /// Number of live pump guards.
    pumps: AtomicUsize,
    /// Abort handles of the pump tasks, used by forced shutdown.
    tasks: Mutex<Vec<AbortHandle>>,
}

/// Handle to one connection: identity, mailbox producer and lifecycle.
///
/// Cloning is cheap; clones refer to the same connection. Equality and
/// hashing use the [`ConnectionId`] only.
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<HandleInner>,
}

impl ConnectionHandle {
    /// Creates a handle and its mailbox with room for `capacity` messages.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero. [`BrokerConfig`](crate::BrokerConfig)
    /// validation rules this out for handles created by the broker.
    #[must_use]
    pub fn new(user_id: UserId, capacity: usize) -> (Self, Mailbox) {
        let (sender, mailbox) = mpsc::channel(capacity);
        let (state, _) = watch::channel(ConnectionState::Connecting);

        let handle = Self {
            inner: Arc::new(HandleInner {
                id: ConnectionId::next(),
                user_id,
                capacity,
                sender: Mutex::new(Some(sender)),
                state,
                pumps: AtomicUsize::new(0),
                tasks: Mutex::new(Vec::new()),
            }),
        };

        (handle, mailbox)
    }

    /// Returns the connection ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    /// Returns the owning user.
    #[inline]
    #[must_use]
    pub fn user_id(&self) -> &UserId {
        &self.inner.user_id
    }

    /// Returns the mailbox capacity.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Returns the current lifecycle state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Returns `true` once the mailbox has been closed.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state() >= ConnectionState::Unregistering
    }

    /// Waits until the mailbox has been closed.
    pub async fn wait_unregistering(&self) {
        self.wait_for(ConnectionState::Unregistering).await;
    }

    /// Waits until the connection reaches [`ConnectionState::Closed`].
    pub async fn wait_closed(&self) {
        self.wait_for(ConnectionState::Closed).await;
    }

    async fn wait_for(&self, target: ConnectionState) {
        let mut rx = self.inner.state.subscribe();
        // The sender lives in `self`, so the channel cannot close while waiting.
        let _ = rx.wait_for(|state| *state >= target).await;
    }
}

// ============================================================================
// ConnectionHandle - Broker Internals
// ============================================================================

impl ConnectionHandle {
    /// Attempts to queue a message without waiting.
    pub(crate) fn try_enqueue(&self, notification: Arc<Notification>) -> Enqueue {
        let guard = self.inner.sender.lock();
        let Some(sender) = guard.as_ref() else {
            return Enqueue::Closed;
        };

        match sender.try_send(notification) {
            Ok(()) => Enqueue::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => Enqueue::Full,
            Err(mpsc::error::TrySendError::Closed(_)) => Enqueue::Closed,
        }
    }

    /// Closes the mailbox and enters `Unregistering`.
    ///
    /// Messages already queued are still drained by the write pump, which
    /// then observes the closed mailbox and exits. Returns `true` only for
    /// the call that actually closed it.
    pub(crate) fn close(&self) -> bool {
        let sender = self.inner.sender.lock().take();
        if sender.is_none() {
            return false;
        }
        drop(sender);

        self.advance(ConnectionState::Unregistering);
        debug!(
            connection_id = %self.id(),
            user_id = %self.user_id(),
            "Mailbox closed"
        );
        self.finish_if_idle();
        true
    }

    /// Moves the state forward to `next`. Never moves backwards.
    pub(crate) fn advance(&self, next: ConnectionState) {
        let changed = self.inner.state.send_if_modified(|state| {
            if next > *state {
                *state = next;
                true
            } else {
                false
            }
        });

        if changed {
            trace!(connection_id = %self.id(), state = ?next, "Connection state changed");
        }
    }

    /// Registers a running pump. The connection cannot reach `Closed`
    /// while the guard is alive.
    pub(crate) fn pump_guard(&self) -> PumpGuard {
        self.inner.pumps.fetch_add(1, Ordering::SeqCst);
        PumpGuard {
            handle: self.clone(),
        }
    }

    /// Remembers a pump task so shutdown can abort it.
    pub(crate) fn attach_task(&self, task: AbortHandle) {
        self.inner.tasks.lock().push(task);
    }

    /// Aborts every attached pump task and forces `Closed`.
    pub(crate) fn abort_tasks(&self) {
        self.close();
        let tasks: Vec<_> = self.inner.tasks.lock().drain(..).collect();
        for task in &tasks {
            task.abort();
        }
        self.advance(ConnectionState::Closed);
        debug!(
            connection_id = %self.id(),
            aborted = tasks.len(),
            "Connection pumps aborted"
        );
    }

    /// Enters `Closed` if the mailbox is closed and no pump is running.
    fn finish_if_idle(&self) {
        if self.inner.pumps.load(Ordering::SeqCst) == 0 && self.is_closed() {
            self.advance(ConnectionState::Closed);
        }
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for ConnectionHandle {}

impl Hash for ConnectionHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.inner.id)
            .field("user_id", &self.inner.user_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// PumpGuard
// ============================================================================

/// Keeps a connection out of `Closed` while a pump runs.
pub(crate) struct PumpGuard {
    handle: ConnectionHandle,
}

impl PumpGuard {
    /// Returns the guarded handle.
    #[inline]
    pub(crate) fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }
}

impl Drop for PumpGuard {
    fn drop(&mut self) {
        self.handle.inner.pumps.fetch_sub(1, Ordering::SeqCst);
        self.handle.finish_if_idle();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::protocol::NotificationKind;

    fn user(id: &str) -> UserId {
        UserId::new(id).unwrap()
    }

    fn message(title: &str) -> Arc<Notification> {
        Arc::new(Notification::new(NotificationKind::SystemAlert, title, "body"))
    }

    #[test]
    fn test_new_handle_is_connecting() {
        let (handle, _mailbox) = ConnectionHandle::new(user("u1"), 4);
        assert_eq!(handle.state(), ConnectionState::Connecting);
        assert_eq!(handle.capacity(), 4);
        assert_eq!(handle.user_id().as_str(), "u1");
        assert!(!handle.is_closed());
    }

    #[test]
    fn test_enqueue_reports_full_instead_of_blocking() {
        let (handle, _mailbox) = ConnectionHandle::new(user("u1"), 2);
        assert_eq!(handle.try_enqueue(message("1")), Enqueue::Queued);
        assert_eq!(handle.try_enqueue(message("2")), Enqueue::Queued);
        assert_eq!(handle.try_enqueue(message("3")), Enqueue::Full);
    }

    #[test]
    fn test_enqueue_after_close_is_noop() {
        let (handle, _mailbox) = ConnectionHandle::new(user("u1"), 2);
        assert!(handle.close());
        assert_eq!(handle.try_enqueue(message("late")), Enqueue::Closed);
    }

    #[test]
    fn test_close_is_idempotent() {
        let (handle, _mailbox) = ConnectionHandle::new(user("u1"), 2);
        assert!(handle.close());
        assert!(!handle.close());
        assert!(handle.is_closed());
    }

    #[test]
    fn test_state_never_moves_backwards() {
        let (handle, _mailbox) = ConnectionHandle::new(user("u1"), 2);
        handle.advance(ConnectionState::Active);
        handle.advance(ConnectionState::Registered);
        assert_eq!(handle.state(), ConnectionState::Active);
    }

    #[test]
    fn test_close_without_pumps_reaches_closed() {
        let (handle, _mailbox) = ConnectionHandle::new(user("u1"), 2);
        handle.close();
        assert_eq!(handle.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_closed_waits_for_pump_guards() {
        let (handle, _mailbox) = ConnectionHandle::new(user("u1"), 2);
        let writer = handle.pump_guard();
        let reader = handle.pump_guard();

        handle.close();
        assert_eq!(handle.state(), ConnectionState::Unregistering);

        drop(writer);
        assert_eq!(handle.state(), ConnectionState::Unregistering);

        drop(reader);
        assert_eq!(handle.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_pumps_exiting_first_do_not_close() {
        let (handle, _mailbox) = ConnectionHandle::new(user("u1"), 2);
        drop(handle.pump_guard());
        assert_eq!(handle.state(), ConnectionState::Connecting);

        handle.close();
        assert_eq!(handle.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_queued_messages_drain_before_close_is_seen() {
        let (handle, mut mailbox) = ConnectionHandle::new(user("u1"), 4);
        handle.try_enqueue(message("first"));
        handle.try_enqueue(message("second"));
        handle.close();

        assert_eq!(mailbox.recv().await.unwrap().title, "first");
        assert_eq!(mailbox.recv().await.unwrap().title, "second");
        assert!(mailbox.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_wait_closed_resolves_after_abort() {
        let (handle, _mailbox) = ConnectionHandle::new(user("u1"), 2);
        let _guard = handle.pump_guard();

        let task = tokio::spawn(std::future::pending::<()>());
        handle.attach_task(task.abort_handle());

        handle.abort_tasks();
        handle.wait_closed().await;
        assert_eq!(handle.state(), ConnectionState::Closed);
        assert!(task.await.unwrap_err().is_cancelled());
    }

    #[test]
    fn test_equality_uses_connection_id() {
        let (a, _ma) = ConnectionHandle::new(user("u1"), 2);
        let (b, _mb) = ConnectionHandle::new(user("u1"), 2);
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }
}
