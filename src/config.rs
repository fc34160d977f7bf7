//! Broker configuration.
//!
//! Provides [`BrokerConfig`] and its fluent, validating builder.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use notification_broker::BrokerConfig;
//!
//! # fn example() -> notification_broker::Result<()> {
//! let config = BrokerConfig::builder()
//!     .mailbox_capacity(64)
//!     .keepalive_interval(Duration::from_secs(20))
//!     .read_deadline(Duration::from_secs(30))
//!     .build()?;
//!
//! assert_eq!(config.mailbox_capacity, 64);
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default per-connection mailbox capacity.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 256;

/// Default idle interval between liveness probes.
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(54);

/// Default window without inbound traffic before a peer is considered dead.
pub const DEFAULT_READ_DEADLINE: Duration = Duration::from_secs(60);

/// Default bound on a single transport write.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default time pumps get to exit during shutdown before being aborted.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Default capacity of each bounded dispatcher input.
pub const DEFAULT_DISPATCHER_CAPACITY: usize = 1024;

// ============================================================================
// BrokerConfig
// ============================================================================

/// Tunables for a [`Broker`](crate::Broker) and its connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    /// Maximum undrained notifications per connection before it is
    /// disconnected.
    pub mailbox_capacity: usize,

    /// Idle time after which the write pump sends a ping.
    pub keepalive_interval: Duration,

    /// Read deadline, re-armed on every inbound frame.
    pub read_deadline: Duration,

    /// Bound on every single transport write.
    pub write_timeout: Duration,

    /// How long shutdown waits for pumps before aborting them.
    pub shutdown_grace: Duration,

    /// Capacity of the register and send inputs of the dispatcher.
    pub dispatcher_capacity: usize,

    /// Send a `system_alert` greeting right after a connection registers.
    pub welcome_message: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            read_deadline: DEFAULT_READ_DEADLINE,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            dispatcher_capacity: DEFAULT_DISPATCHER_CAPACITY,
            welcome_message: true,
        }
    }
}

impl BrokerConfig {
    /// Creates a configuration builder seeded with defaults.
    #[inline]
    #[must_use]
    pub fn builder() -> BrokerConfigBuilder {
        BrokerConfigBuilder::new()
    }

    /// Checks the configuration for values the broker cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.mailbox_capacity == 0 {
            return Err(Error::config(
                "mailbox_capacity must be at least 1. Use .mailbox_capacity(n) with n > 0.",
            ));
        }

        if self.dispatcher_capacity == 0 {
            return Err(Error::config(
                "dispatcher_capacity must be at least 1. Use .dispatcher_capacity(n) with n > 0.",
            ));
        }

        for (name, value) in [
            ("keepalive_interval", self.keepalive_interval),
            ("read_deadline", self.read_deadline),
            ("write_timeout", self.write_timeout),
        ] {
            if value.is_zero() {
                return Err(Error::config(format!("{name} must be non-zero")));
            }
        }

        if self.keepalive_interval >= self.read_deadline {
            return Err(Error::config(format!(
                "keepalive_interval ({:?}) must be shorter than read_deadline ({:?}); \
                 otherwise idle peers are dropped before they can answer a ping",
                self.keepalive_interval, self.read_deadline
            )));
        }

        Ok(())
    }
}

// ============================================================================
// BrokerConfigBuilder
// ============================================================================

/// Builder for a validated [`BrokerConfig`].
#[derive(Debug, Default, Clone)]
pub struct BrokerConfigBuilder {
    config: BrokerConfig,
}

impl BrokerConfigBuilder {
    /// Creates a builder with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the per-connection mailbox capacity.
    #[inline]
    #[must_use]
    pub fn mailbox_capacity(mut self, capacity: usize) -> Self {
        self.config.mailbox_capacity = capacity;
        self
    }

    /// Sets the idle keepalive interval.
    #[inline]
    #[must_use]
    pub fn keepalive_interval(mut self, interval: Duration) -> Self {
        self.config.keepalive_interval = interval;
        self
    }

    /// Sets the read deadline.
    #[inline]
    #[must_use]
    pub fn read_deadline(mut self, deadline: Duration) -> Self {
        self.config.read_deadline = deadline;
        self
    }

    /// Sets the per-write timeout.
    #[inline]
    #[must_use]
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.config.write_timeout = timeout;
        self
    }

    /// Sets the shutdown grace period.
    #[inline]
    #[must_use]
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.config.shutdown_grace = grace;
        self
    }

    /// Sets the capacity of the dispatcher's bounded inputs.
    #[inline]
    #[must_use]
    pub fn dispatcher_capacity(mut self, capacity: usize) -> Self {
        self.config.dispatcher_capacity = capacity;
        self
    }

    /// Enables or disables the greeting sent on connect.
    #[inline]
    #[must_use]
    pub fn welcome_message(mut self, enabled: bool) -> Self {
        self.config.welcome_message = enabled;
        self
    }

    /// Builds the configuration with validation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if any value is out of range.
    pub fn build(self) -> Result<BrokerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// ============================================================================
// Tests
// ============================================================================
