//! Dispatcher task.
//!
//! The single coordinating worker that owns the [`Registry`]. It reads four
//! inputs with a fixed priority and handles one item per iteration:
//!
//! | Priority | Input | Bound |
//! |----------|-------|-------|
//! | 1 | unregister | unbounded (at most one per admitted connection) |
//! | 2 | register | bounded, overflow rejected at the caller |
//! | 3 | send | bounded, callers wait for space |
//! | 4 | control (queries, shutdown) | unbounded |
//!
//! Because a request is only ever answered after every higher-priority item
//! already queued has been applied, a caller that registers and then sends
//! (or queries statistics) always observes its own registration.
//!
//! The dispatcher never waits on a connection: enqueueing into a mailbox is
//! a `try_send`, and a full mailbox disconnects that connection.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

use crate::identifiers::UserId;
use crate::protocol::Notification;

use super::handle::{ConnectionHandle, ConnectionState, Enqueue};
use super::registry::Registry;

// ============================================================================
// Types
// ============================================================================

/// A connection waiting to be added to the registry.
pub(crate) struct RegisterRequest {
    /// Handle to add.
    pub handle: ConnectionHandle,
    /// Delivered to this handle only, right after it is added.
    pub greeting: Option<Arc<Notification>>,
}

/// A notification addressed to every connection of one user.
pub(crate) struct SendRequest {
    /// Target user.
    pub user_id: UserId,
    /// Shared message, cloned by pointer into each mailbox.
    pub notification: Arc<Notification>,
}

/// Queries and lifecycle commands.
pub(crate) enum Control {
    /// Count connections of one user.
    ActiveConnections {
        user_id: UserId,
        reply: oneshot::Sender<usize>,
    },
    /// Snapshot of the statistics.
    Stats { reply: oneshot::Sender<BrokerStats> },
    /// Snapshot of connected user IDs.
    UserIds { reply: oneshot::Sender<Vec<UserId>> },
    /// Close every mailbox and stop.
    Shutdown {
        reply: oneshot::Sender<Vec<ConnectionHandle>>,
    },
}

/// Read-only broker statistics.
///
/// Serialized as-is by the admin statistics endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BrokerStats {
    /// Live connections across all users.
    pub total_connections: usize,
    /// Users with at least one live connection.
    pub total_users: usize,
    /// Connections dropped because their mailbox was full.
    pub overflow_disconnects: u64,
}

/// Producer ends of the dispatcher inputs.
pub(crate) struct DispatcherInputs {
    pub register: mpsc::Sender<RegisterRequest>,
    pub unregister: mpsc::UnboundedSender<ConnectionHandle>,
    pub send: mpsc::Sender<SendRequest>,
    pub control: mpsc::UnboundedSender<Control>,
}

// ============================================================================
// Dispatcher
// ============================================================================

/// State owned by the dispatcher task.
pub(crate) struct Dispatcher {
    registry: Registry,
    register_rx: mpsc::Receiver<RegisterRequest>,
    unregister_rx: mpsc::UnboundedReceiver<ConnectionHandle>,
    send_rx: mpsc::Receiver<SendRequest>,
    control_rx: mpsc::UnboundedReceiver<Control>,
    overflow_disconnects: u64,
}

impl Dispatcher {
    /// Creates the dispatcher and the producer ends of its inputs.
    ///
    /// `capacity` bounds the register and send inputs.
    pub(crate) fn new(capacity: usize) -> (Self, DispatcherInputs) {
        let (register, register_rx) = mpsc::channel(capacity);
        let (unregister, unregister_rx) = mpsc::unbounded_channel();
        let (send, send_rx) = mpsc::channel(capacity);
        let (control, control_rx) = mpsc::unbounded_channel();

        let dispatcher = Self {
            registry: Registry::default(),
            register_rx,
            unregister_rx,
            send_rx,
            control_rx,
            overflow_disconnects: 0,
        };

        let inputs = DispatcherInputs {
            register,
            unregister,
            send,
            control,
        };

        (dispatcher, inputs)
    }

    /// Runs until shutdown is requested or every producer is dropped.
    pub(crate) async fn run(mut self) {
        debug!("Dispatcher started");

        loop {
            tokio::select! {
                biased;

                handle = self.unregister_rx.recv() => match handle {
                    Some(handle) => self.handle_unregister(&handle),
                    None => break,
                },

                request = self.register_rx.recv() => match request {
                    Some(request) => self.handle_register(request),
                    None => break,
                },

                request = self.send_rx.recv() => match request {
                    Some(request) => self.deliver(&request.user_id, &request.notification),
                    None => break,
                },

                command = self.control_rx.recv() => match command {
                    Some(Control::Shutdown { reply }) => {
                        let handles = self.close_all();
                        let _ = reply.send(handles);
                        break;
                    }
                    Some(command) => self.handle_query(command),
                    None => break,
                },
            }
        }

        // Producers gone without an explicit shutdown: still release everyone.
        if self.registry.total() > 0 {
            self.close_all();
        }

        debug!("Dispatcher terminated");
    }

    /// Adds a handle, ignoring duplicates and handles closed in the meantime.
    fn handle_register(&mut self, request: RegisterRequest) {
        let RegisterRequest { handle, greeting } = request;

        if handle.is_closed() {
            debug!(
                connection_id = %handle.id(),
                user_id = %handle.user_id(),
                "Skipping registration of closed connection"
            );
            return;
        }

        if !self.registry.insert(handle.clone()) {
            trace!(connection_id = %handle.id(), "Connection already registered");
            return;
        }

        handle.advance(ConnectionState::Registered);
        info!(
            user_id = %handle.user_id(),
            connection_id = %handle.id(),
            user_connections = self.registry.active(handle.user_id()),
            total_connections = self.registry.total(),
            "Connection registered"
        );

        if let Some(greeting) = greeting {
            self.enqueue(&handle, greeting);
        }
    }

    /// Removes a handle and closes its mailbox. Safe to repeat.
    fn handle_unregister(&mut self, handle: &ConnectionHandle) {
        handle.close();
        if self.registry.remove(handle) {
            info!(
                user_id = %handle.user_id(),
                connection_id = %handle.id(),
                total_connections = self.registry.total(),
                "Connection unregistered"
            );
        }
    }

    /// Enqueues a notification into every mailbox of a user.
    fn deliver(&mut self, user_id: &UserId, notification: &Arc<Notification>) {
        let handles = self.registry.handles(user_id);
        if handles.is_empty() {
            trace!(user_id = %user_id, kind = %notification.kind, "No connections for user");
            return;
        }

        for handle in &handles {
            self.enqueue(handle, Arc::clone(notification));
        }
    }

    /// Non-blocking enqueue with disconnect-on-overflow.
    fn enqueue(&mut self, handle: &ConnectionHandle, notification: Arc<Notification>) {
        let kind = notification.kind.clone();

        match handle.try_enqueue(notification) {
            Enqueue::Queued => {
                trace!(
                    user_id = %handle.user_id(),
                    connection_id = %handle.id(),
                    kind = %kind,
                    "Notification queued"
                );
            }
            Enqueue::Full => {
                handle.close();
                self.registry.remove(handle);
                self.overflow_disconnects += 1;
                warn!(
                    user_id = %handle.user_id(),
                    connection_id = %handle.id(),
                    capacity = handle.capacity(),
                    "Mailbox full, disconnecting slow connection"
                );
            }
            Enqueue::Closed => {
                // Closed by a pump whose unregister is still queued behind us.
                self.registry.remove(handle);
                debug!(
                    connection_id = %handle.id(),
                    "Dropped closed connection found during delivery"
                );
            }
        }
    }

    /// Answers read-only queries.
    fn handle_query(&self, command: Control) {
        match command {
            Control::ActiveConnections { user_id, reply } => {
                let _ = reply.send(self.registry.active(&user_id));
            }
            Control::Stats { reply } => {
                let _ = reply.send(BrokerStats {
                    total_connections: self.registry.total(),
                    total_users: self.registry.user_count(),
                    overflow_disconnects: self.overflow_disconnects,
                });
            }
            Control::UserIds { reply } => {
                let _ = reply.send(self.registry.user_ids());
            }
            Control::Shutdown { .. } => unreachable!("shutdown is handled by the run loop"),
        }
    }

    /// Closes every mailbox, including registrations still queued.
    fn close_all(&mut self) -> Vec<ConnectionHandle> {
        self.register_rx.close();

        let mut queued = Vec::new();
        while let Ok(request) = self.register_rx.try_recv() {
            if !self.registry.contains(&request.handle) {
                queued.push(request.handle);
            }
        }

        let mut handles = self.registry.drain();
        handles.extend(queued);

        for handle in &handles {
            handle.close();
        }

        info!(count = handles.len(), "Closed all connection mailboxes");
        handles
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

    fn note(title: &str) -> Arc<Notification> {
        Arc::new(Notification::new(NotificationKind::SystemAlert, title, ""))
    }

    fn register(dispatcher: &mut Dispatcher, handle: &ConnectionHandle) {
        dispatcher.handle_register(RegisterRequest {
            handle: handle.clone(),
            greeting: None,
        });
    }

    #[test]
    fn test_register_marks_registered() {
        let (mut dispatcher, _inputs) = Dispatcher::new(4);
        let (handle, _mailbox) = ConnectionHandle::new(user("u1"), 4);

        register(&mut dispatcher, &handle);
        assert_eq!(handle.state(), ConnectionState::Registered);
        assert_eq!(dispatcher.registry.total(), 1);
    }

    #[test]
    fn test_register_closed_handle_is_ignored() {
        let (mut dispatcher, _inputs) = Dispatcher::new(4);
        let (handle, _mailbox) = ConnectionHandle::new(user("u1"), 4);
        handle.close();

        register(&mut dispatcher, &handle);
        assert_eq!(dispatcher.registry.total(), 0);
    }

    #[test]
    fn test_greeting_goes_to_new_handle_only() {
        let (mut dispatcher, _inputs) = Dispatcher::new(4);
        let (first, mut first_mailbox) = ConnectionHandle::new(user("u1"), 4);
        let (second, mut second_mailbox) = ConnectionHandle::new(user("u1"), 4);

        register(&mut dispatcher, &first);
        dispatcher.handle_register(RegisterRequest {
            handle: second,
            greeting: Some(note("Connected")),
        });

        assert!(first_mailbox.try_recv().is_err());
        assert_eq!(second_mailbox.try_recv().unwrap().title, "Connected");
    }

    #[test]
    fn test_overflow_disconnects_and_counts() {
        let (mut dispatcher, _inputs) = Dispatcher::new(4);
        let (handle, _mailbox) = ConnectionHandle::new(user("u1"), 2);
        register(&mut dispatcher, &handle);

        let user_id = user("u1");
        dispatcher.deliver(&user_id, &note("1"));
        dispatcher.deliver(&user_id, &note("2"));
        assert_eq!(dispatcher.registry.total(), 1);

        dispatcher.deliver(&user_id, &note("3"));
        assert_eq!(dispatcher.registry.total(), 0);
        assert_eq!(dispatcher.overflow_disconnects, 1);
        assert!(handle.is_closed());
    }

    #[test]
    fn test_delivery_prunes_handles_closed_by_pumps() {
        let (mut dispatcher, _inputs) = Dispatcher::new(4);
        let (handle, _mailbox) = ConnectionHandle::new(user("u1"), 2);
        register(&mut dispatcher, &handle);

        handle.close();
        dispatcher.deliver(&user("u1"), &note("late"));
        assert_eq!(dispatcher.registry.total(), 0);
        assert_eq!(dispatcher.overflow_disconnects, 0);
    }

    #[test]
    fn test_close_all_includes_queued_registrations() {
        let (mut dispatcher, inputs) = Dispatcher::new(4);
        let (registered, _m1) = ConnectionHandle::new(user("u1"), 2);
        let (queued, _m2) = ConnectionHandle::new(user("u2"), 2);
        register(&mut dispatcher, &registered);

        let queued_request = RegisterRequest {
            handle: queued.clone(),
            greeting: None,
        };
        assert!(inputs.register.try_send(queued_request).is_ok());

        // A repeated registration of a live handle is reported once.
        let repeated = RegisterRequest {
            handle: registered.clone(),
            greeting: None,
        };
        assert!(inputs.register.try_send(repeated).is_ok());

        let handles = dispatcher.close_all();
        assert_eq!(handles.len(), 2);
        assert_eq!(handles.iter().filter(|h| **h == registered).count(), 1);
        assert!(registered.is_closed());
        assert!(queued.is_closed());
        assert!(inputs.register.is_closed());
    }
}
