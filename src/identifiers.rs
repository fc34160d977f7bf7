//! Type-safe identifiers for broker entities.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`UserId`] | Verified user identity supplied by the authentication layer |
//! | [`ConnectionId`] | Process-unique identity of one live connection |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

// ============================================================================
// UserId
// ============================================================================

/// Stable, already-verified user identifier.
///
/// Cheap to clone (shared string). Never empty: construction trims
/// surrounding whitespace and rejects blank input.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(Arc<str>);

impl UserId {
    /// Creates a user ID, returning `None` if the input is blank.
    #[must_use]
    pub fn new(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(Self(Arc::from(trimmed)))
    }

    /// Returns the identifier as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserId({})", self.0)
    }
}

impl Serialize for UserId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for UserId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::new(&raw).ok_or_else(|| serde::de::Error::custom("user id must not be blank"))
    }
}

// ============================================================================
// ConnectionId
// ============================================================================

/// Counter backing [`ConnectionId::next`]. Starts at 1 so zero is never issued.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of a single connection.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocates the next connection ID.
    #[inline]
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw numeric value.
    #[inline]
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

impl fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionId({})", self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_id_trims_whitespace() {
        let id = UserId::new("  u1 \n").expect("non-blank");
        assert_eq!(id.as_str(), "u1");
        assert_eq!(id.to_string(), "u1");
    }

    #[test]
    fn test_user_id_rejects_blank() {
        assert!(UserId::new("").is_none());
        assert!(UserId::new("   ").is_none());
    }

    #[test]
    fn test_user_id_serde() {
        let id = UserId::new("user-42").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"user-42\"");

        let blank = serde_json::from_str::<UserId>("\"  \"");
        assert!(blank.is_err());
    }

    #[test]
    fn test_connection_ids_are_unique_and_non_zero() {
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        assert_ne!(a, b);
        assert!(a.as_u64() > 0);
        assert!(b.as_u64() > a.as_u64());
        assert!(a.to_string().starts_with("conn-"));
    }
}
