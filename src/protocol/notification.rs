//! Notification wire message.
//!
//! Every notification is written to the client as one JSON text frame.
//!
//! # Format
//!
//! ```json
//! {
//!   "type": "earnings_update",
//!   "title": "Earnings Updated!",
//!   "message": "Customer Satisfaction Survey",
//!   "data": { "amount": 500, "survey_title": "Customer Satisfaction Survey" },
//!   "timestamp": "2024-05-01T12:00:00.000Z",
//!   "read": false
//! }
//! ```
//!
//! `data` is omitted when the notification carries no payload.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::Result;

// ============================================================================
// NotificationKind
// ============================================================================

/// Value of the `type` field.
///
/// Unknown strings are preserved in [`NotificationKind::Other`] and written
/// back unchanged, so new event kinds can be emitted before this enum
/// learns about them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    /// A new survey matching the user is available.
    NewSurvey,
    /// The user finished a survey.
    SurveyCompleted,
    /// The user's earnings changed.
    EarningsUpdate,
    /// A payment was processed.
    PaymentReceived,
    /// A withdrawal request was approved.
    WithdrawalApproved,
    /// Operational or account message.
    SystemAlert,
    /// A creator's survey received a response.
    ResponseReceived,
    /// A creator's survey was approved.
    SurveyApproved,
    /// Any kind not cataloged above.
    Other(String),
}

impl NotificationKind {
    /// Returns the wire representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::NewSurvey => "new_survey",
            Self::SurveyCompleted => "survey_completed",
            Self::EarningsUpdate => "earnings_update",
            Self::PaymentReceived => "payment_received",
            Self::WithdrawalApproved => "withdrawal_approved",
            Self::SystemAlert => "system_alert",
            Self::ResponseReceived => "response_received",
            Self::SurveyApproved => "survey_approved",
            Self::Other(raw) => raw,
        }
    }

    /// Returns `true` for kinds in the built-in catalog.
    #[inline]
    #[must_use]
    pub fn is_cataloged(&self) -> bool {
        !matches!(self, Self::Other(_))
    }
}

impl From<&str> for NotificationKind {
    fn from(raw: &str) -> Self {
        match raw {
            "new_survey" => Self::NewSurvey,
            "survey_completed" => Self::SurveyCompleted,
            "earnings_update" => Self::EarningsUpdate,
            "payment_received" => Self::PaymentReceived,
            "withdrawal_approved" => Self::WithdrawalApproved,
            "system_alert" => Self::SystemAlert,
            "response_received" => Self::ResponseReceived,
            "survey_approved" => Self::SurveyApproved,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for NotificationKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for NotificationKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::from(raw.as_str()))
    }
}

// ============================================================================
// Notification
// ============================================================================

/// A single event pushed to a user's connections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Event kind.
    #[serde(rename = "type")]
    pub kind: NotificationKind,

    /// Short headline.
    pub title: String,

    /// Body text.
    pub message: String,

    /// Optional structured payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,

    /// Server-side creation instant.
    pub timestamp: DateTime<Utc>,

    /// Read marker. Always `false` when enqueued.
    pub read: bool,
}

impl Notification {
    /// Creates a notification stamped with the current time.
    #[must_use]
    pub fn new(
        kind: impl Into<NotificationKind>,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            title: title.into(),
            message: message.into(),
            data: None,
            timestamp: Utc::now(),
            read: false,
        }
    }

    /// Replaces the payload.
    #[must_use]
    pub fn with_data(mut self, data: Map<String, Value>) -> Self {
        self.data = Some(data);
        self
    }

    /// Adds one payload field, creating the payload if needed.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data
            .get_or_insert_with(Map::new)
            .insert(key.into(), value.into());
        self
    }

    /// Re-stamps the timestamp and clears the read marker.
    ///
    /// Applied on every entry into the broker so a caller cannot enqueue a
    /// back-dated or already-read notification.
    #[must_use]
    pub fn stamped(mut self) -> Self {
        self.timestamp = Utc::now();
        self.read = false;
        self
    }

    /// Trims text fields and drops an empty payload.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        let title = self.title.trim();
        if title.len() != self.title.len() {
            self.title = title.to_string();
        }
        let message = self.message.trim();
        if message.len() != self.message.len() {
            self.message = message.to_string();
        }
        if self.data.as_ref().is_some_and(Map::is_empty) {
            self.data = None;
        }
        self
    }

    /// Serializes to the JSON text frame body.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`](crate::Error::Json) if a payload value cannot
    /// be serialized.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_cataloged_kinds_serialize_snake_case() {
        let cases = [
            (NotificationKind::NewSurvey, "new_survey"),
            (NotificationKind::SurveyCompleted, "survey_completed"),
            (NotificationKind::EarningsUpdate, "earnings_update"),
            (NotificationKind::PaymentReceived, "payment_received"),
            (NotificationKind::WithdrawalApproved, "withdrawal_approved"),
            (NotificationKind::SystemAlert, "system_alert"),
            (NotificationKind::ResponseReceived, "response_received"),
            (NotificationKind::SurveyApproved, "survey_approved"),
        ];

        for (kind, expected) in cases {
            assert_eq!(serde_json::to_value(&kind).unwrap(), json!(expected));
            assert_eq!(NotificationKind::from(expected), kind);
            assert!(kind.is_cataloged());
        }
    }

    #[test]
    fn test_unknown_kind_passes_through() {
        let kind: NotificationKind = serde_json::from_value(json!("kyc_verified")).unwrap();
        assert_eq!(kind, NotificationKind::Other("kyc_verified".into()));
        assert!(!kind.is_cataloged());
        assert_eq!(serde_json::to_value(&kind).unwrap(), json!("kyc_verified"));
    }

    #[test]
    fn test_wire_shape() {
        let notification = Notification::new(NotificationKind::EarningsUpdate, "Earnings Updated!", "Survey A")
            .with_field("amount", 500);

        let value: Value = serde_json::from_str(&notification.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "earnings_update");
        assert_eq!(value["title"], "Earnings Updated!");
        assert_eq!(value["message"], "Survey A");
        assert_eq!(value["data"]["amount"], 500);
        assert_eq!(value["read"], false);

        let timestamp = value["timestamp"].as_str().expect("timestamp is a string");
        assert!(DateTime::parse_from_rfc3339(timestamp).is_ok());
    }

    #[test]
    fn test_data_omitted_when_absent() {
        let notification = Notification::new(NotificationKind::SystemAlert, "Hi", "there");
        let value: Value = serde_json::from_str(&notification.to_json().unwrap()).unwrap();
        assert!(value.get("data").is_none());
    }

    #[test]
    fn test_stamped_resets_read_and_time() {
        let mut notification = Notification::new(NotificationKind::SystemAlert, "t", "m");
        notification.read = true;
        notification.timestamp = DateTime::<Utc>::MIN_UTC;

        let stamped = notification.stamped();
        assert!(!stamped.read);
        assert!(stamped.timestamp > DateTime::<Utc>::MIN_UTC);
    }

    #[test]
    fn test_normalized_trims_and_drops_empty_data() {
        let notification = Notification::new(NotificationKind::SystemAlert, "  Title ", " body\n")
            .with_data(Map::new())
            .normalized();

        assert_eq!(notification.title, "Title");
        assert_eq!(notification.message, "body");
        assert!(notification.data.is_none());
    }

    #[test]
    fn test_with_data_replaces_payload() {
        let mut data = Map::new();
        data.insert("credits".into(), json!(10));
        let notification = Notification::new(NotificationKind::PaymentReceived, "t", "m")
            .with_field("amount", 1)
            .with_data(data);

        let payload = notification.data.unwrap();
        assert_eq!(payload.len(), 1);
        assert_eq!(payload["credits"], 10);
    }
}
