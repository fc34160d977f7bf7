//! Typed notification facade.
//!
//! One method per cataloged event kind. Each method fixes the wire shape of
//! its event (title, message, `data` keys) and forwards to
//! [`Broker::send_to_user`]. No business rules are evaluated here.
//!
//! | Method | `type` | `data` keys |
//! |--------|--------|-------------|
//! | [`new_survey`](Notifications::new_survey) | `new_survey` | `survey_title`, `reward` |
//! | [`survey_completed`](Notifications::survey_completed) | `survey_completed` | `survey_title`, `reward` |
//! | [`earnings_update`](Notifications::earnings_update) | `earnings_update` | `amount`, `survey_title` |
//! | [`payment_received`](Notifications::payment_received) | `payment_received` | `amount`, `credits` |
//! | [`withdrawal_approved`](Notifications::withdrawal_approved) | `withdrawal_approved` | `amount` |
//! | [`system_alert`](Notifications::system_alert) | `system_alert` | none |
//! | [`response_received`](Notifications::response_received) | `response_received` | `survey_title`, `response_count` |
//! | [`survey_approved`](Notifications::survey_approved) | `survey_approved` | `survey_title` |

// ============================================================================
// Imports
// ============================================================================

use serde_json::{Map, Value};

use crate::identifiers::UserId;
use crate::protocol::{Notification, NotificationKind};

use super::core::Broker;

// ============================================================================
// Constants
// ============================================================================

const NEW_SURVEY_TITLE: &str = "New Survey Available!";
const SURVEY_COMPLETED_TITLE: &str = "Survey Completed!";
const EARNINGS_TITLE: &str = "Earnings Updated!";
const RESPONSE_TITLE: &str = "New Survey Response";
const PAYMENT_TITLE: &str = "Payment Received";
const PAYMENT_MESSAGE: &str = "Your payment has been processed successfully";
const WITHDRAWAL_TITLE: &str = "Withdrawal Approved";
const WITHDRAWAL_MESSAGE: &str = "Your withdrawal request has been approved";
const SURVEY_APPROVED_TITLE: &str = "Survey Approved";

const WELCOME_TITLE: &str = "Connected";
const WELCOME_MESSAGE: &str = "You are now connected to real-time notifications";

// ============================================================================
// Notifications
// ============================================================================

/// Typed sender for the cataloged event kinds.
///
/// Obtained from [`Broker::notifications`].
#[derive(Debug, Clone, Copy)]
pub struct Notifications<'a> {
    broker: &'a Broker,
}

impl<'a> Notifications<'a> {
    pub(crate) fn new(broker: &'a Broker) -> Self {
        Self { broker }
    }

    /// A survey matching the user was published.
    pub async fn new_survey(&self, user_id: &UserId, survey_title: &str, reward: i64) {
        let notification = Notification::new(
            NotificationKind::NewSurvey,
            NEW_SURVEY_TITLE,
            survey_title,
        )
        .with_field("survey_title", survey_title.trim())
        .with_field("reward", reward);

        self.send(user_id, notification).await;
    }

    /// The user finished a survey.
    pub async fn survey_completed(&self, user_id: &UserId, survey_title: &str, reward: i64) {
        let notification = Notification::new(
            NotificationKind::SurveyCompleted,
            SURVEY_COMPLETED_TITLE,
            survey_title,
        )
        .with_field("survey_title", survey_title.trim())
        .with_field("reward", reward);

        self.send(user_id, notification).await;
    }

    /// The user's balance changed after completing a survey.
    pub async fn earnings_update(&self, user_id: &UserId, amount: i64, survey_title: &str) {
        let notification = Notification::new(
            NotificationKind::EarningsUpdate,
            EARNINGS_TITLE,
            survey_title,
        )
        .with_field("amount", amount)
        .with_field("survey_title", survey_title.trim());

        self.send(user_id, notification).await;
    }

    /// A payment was processed and credits were added.
    pub async fn payment_received(&self, user_id: &UserId, amount: i64, credits: i64) {
        let notification = Notification::new(
            NotificationKind::PaymentReceived,
            PAYMENT_TITLE,
            PAYMENT_MESSAGE,
        )
        .with_field("amount", amount)
        .with_field("credits", credits);

        self.send(user_id, notification).await;
    }

    /// A withdrawal request was approved.
    pub async fn withdrawal_approved(&self, user_id: &UserId, amount: i64) {
        let notification = Notification::new(
            NotificationKind::WithdrawalApproved,
            WITHDRAWAL_TITLE,
            WITHDRAWAL_MESSAGE,
        )
        .with_field("amount", amount);

        self.send(user_id, notification).await;
    }

    /// Free-form operational message for one user.
    pub async fn system_alert(&self, user_id: &UserId, title: &str, message: &str) {
        let notification = Notification::new(NotificationKind::SystemAlert, title, message);
        self.send(user_id, notification).await;
    }

    /// A survey owned by the user received a new response.
    pub async fn response_received(
        &self,
        user_id: &UserId,
        survey_title: &str,
        response_count: u64,
    ) {
        let notification = Notification::new(
            NotificationKind::ResponseReceived,
            RESPONSE_TITLE,
            survey_title,
        )
        .with_field("survey_title", survey_title.trim())
        .with_field("response_count", response_count);

        self.send(user_id, notification).await;
    }

    /// A survey owned by the user passed review.
    pub async fn survey_approved(&self, user_id: &UserId, survey_title: &str) {
        let notification = Notification::new(
            NotificationKind::SurveyApproved,
            SURVEY_APPROVED_TITLE,
            survey_title,
        )
        .with_field("survey_title", survey_title.trim());

        self.send(user_id, notification).await;
    }

    /// Any event kind, including ones not in the catalog.
    ///
    /// An empty `data` map is omitted from the wire.
    pub async fn custom(
        &self,
        user_id: &UserId,
        kind: impl Into<NotificationKind>,
        title: &str,
        message: &str,
        data: Map<String, Value>,
    ) {
        let notification = Notification::new(kind, title, message).with_data(data);
        self.send(user_id, notification).await;
    }

    /// Operational message for every connected user.
    pub async fn broadcast_system_alert(&self, title: &str, message: &str) {
        let notification =
            Notification::new(NotificationKind::SystemAlert, title, message).normalized();
        self.broker.broadcast_all(notification).await;
    }

    async fn send(&self, user_id: &UserId, notification: Notification) {
        self.broker
            .send_to_user(user_id, notification.normalized())
            .await;
    }
}

/// Greeting queued for a freshly registered connection.
pub(crate) fn welcome() -> Notification {
    Notification::new(NotificationKind::SystemAlert, WELCOME_TITLE, WELCOME_MESSAGE)
}

// ============================================================================
// Tests
// ============================================================================
