//! Notification job contract
//!
//! The core does not render or deliver notifications. It builds
//! `{template, variables}` jobs, checks that the variables satisfy the
//! template's required fields, and hands them to a [`NotificationQueue`]
//! (see [`crate::ports`]). Delivery retries follow [`RetryPolicy`].
//!
//! [`NotificationQueue`]: crate::ports::NotificationQueue

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use core_kernel::NotificationJobId;

use crate::error::LendingError;
use crate::workflow::ActionId;

/// Delivery channel of a template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    WhatsApp,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::WhatsApp => "whatsapp",
        }
    }

    /// Variable the channel needs to address the recipient
    pub fn address_field(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::WhatsApp => "phone",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = LendingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(Channel::Email),
            "whatsapp" => Ok(Channel::WhatsApp),
            other => Err(LendingError::validation(format!("Unknown channel: {}", other))),
        }
    }
}

/// A template known to the notification subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotificationTemplate {
    pub name: &'static str,
    pub channel: Channel,
    /// Fields the template body needs besides the channel address
    pub fields: &'static [&'static str],
}

impl NotificationTemplate {
    /// The address field followed by the template's own fields
    pub fn required_fields(&self) -> impl Iterator<Item = &'static str> + '_ {
        std::iter::once(self.channel.address_field()).chain(self.fields.iter().copied())
    }
}

const BASE: &[&str] = &["customer_name", "request_id", "status"];
const OFFER: &[&str] = &["customer_name", "request_id", "status", "offer_amount", "tenure_months"];
const INSPECTION: &[&str] = &["customer_name", "request_id", "status", "inspection_date"];
const DISBURSAL: &[&str] = &["customer_name", "request_id", "status", "emi_amount"];

macro_rules! both_channels {
    ($name:literal, $fields:expr) => {
        [
            NotificationTemplate { name: $name, channel: Channel::Email, fields: $fields },
            NotificationTemplate { name: $name, channel: Channel::WhatsApp, fields: $fields },
        ]
    };
}

static SUBMITTED: [NotificationTemplate; 2] = both_channels!("request_submitted", BASE);
static OFFER_MADE: [NotificationTemplate; 2] = both_channels!("offer_made", OFFER);
static INSPECTION_SCHEDULED: [NotificationTemplate; 2] = both_channels!("inspection_scheduled", INSPECTION);
static STATUS_CHANGED: [NotificationTemplate; 2] = both_channels!("status_changed", BASE);
static BANK_DETAILS_REQUESTED: [NotificationTemplate; 2] = both_channels!("bank_details_requested", BASE);
static DISBURSED: [NotificationTemplate; 2] = both_channels!("amount_disbursed", DISBURSAL);
static OVERDUE: [NotificationTemplate; 2] = both_channels!("payment_overdue", BASE);
static COMPLETED: [NotificationTemplate; 2] = both_channels!("loan_completed", BASE);

/// Templates to send after an action commits
pub fn templates_for(action: ActionId) -> &'static [NotificationTemplate] {
    match action {
        ActionId::SubmitRequest => &SUBMITTED,
        ActionId::MakeOffer => &OFFER_MADE,
        ActionId::ScheduleInspection => &INSPECTION_SCHEDULED,
        ActionId::RequestBankDetails => &BANK_DETAILS_REQUESTED,
        ActionId::DisburseAmount => &DISBURSED,
        ActionId::MarkOverdue => &OVERDUE,
        ActionId::CompleteLoan => &COMPLETED,
        ActionId::AcceptOffer
        | ActionId::DeclineOffer
        | ActionId::CancelRequest
        | ActionId::RejectRequest
        | ActionId::ApproveRequest
        | ActionId::MarkDefaulted => &STATUS_CHANGED,
        ActionId::StartReview
        | ActionId::StartInspection
        | ActionId::CompleteInspection
        | ActionId::SubmitBankDetails
        | ActionId::ClearOverdue => &[],
    }
}

/// A validated `{template, variables}` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationJob {
    pub id: NotificationJobId,
    pub template: String,
    pub channel: Channel,
    pub variables: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl NotificationJob {
    /// Builds a job, reporting the first required field that is absent
    ///
    /// `null` and blank strings count as absent.
    pub fn new(
        template: &NotificationTemplate,
        variables: Map<String, Value>,
        now: DateTime<Utc>,
    ) -> Result<Self, LendingError> {
        if let Some(field) = template.required_fields().find(|f| !is_present(variables.get(*f))) {
            return Err(LendingError::MissingTemplateField {
                template: format!("{}/{}", template.name, template.channel),
                field: field.to_string(),
            });
        }

        Ok(Self {
            id: NotificationJobId::new_v7(),
            template: template.name.to_string(),
            channel: template.channel,
            variables,
            created_at: now,
        })
    }
}

fn is_present(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(_) => true,
    }
}

/// Delivery state of a queued job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Queued,
    Delivered,
    /// Gave up after the bounded number of attempts
    Dead,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Queued => "queued",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Dead => "dead",
        }
    }
}

impl FromStr for DeliveryStatus {
    type Err = LendingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(DeliveryStatus::Queued),
            "delivered" => Ok(DeliveryStatus::Delivered),
            "dead" => Ok(DeliveryStatus::Dead),
            other => Err(LendingError::validation(format!("Unknown delivery status: {}", other))),
        }
    }
}

/// A job as held by the outbox
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedNotification {
    pub job: NotificationJob,
    pub status: DeliveryStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

/// Exponential backoff with a bounded attempt count
///
/// The delay before retry `n` (1-based) is `base * 2^(n-1)`, capped at
/// `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(3600),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            ..Default::default()
        }
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// When to try again after `attempts` failed deliveries, or `None` to give up
    pub fn next_attempt_at(&self, attempts: u32, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if attempts >= self.max_attempts {
            return None;
        }
        let delay = chrono::Duration::from_std(self.delay_for_attempt(attempts)).ok()?;
        now.checked_add_signed(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_missing_phone_is_reported_for_whatsapp() {
        let template = &templates_for(ActionId::SubmitRequest)[1];
        let result = NotificationJob::new(
            template,
            vars(json!({"customer_name": "Asha", "request_id": "LRQ-1", "status": "pending"})),
            Utc::now(),
        );

        match result {
            Err(LendingError::MissingTemplateField { field, .. }) => assert_eq!(field, "phone"),
            other => panic!("expected MissingTemplateField, got {:?}", other),
        }
    }

    #[test]
    fn test_blank_values_count_as_missing() {
        let template = &templates_for(ActionId::SubmitRequest)[0];
        let result = NotificationJob::new(
            template,
            vars(json!({"email": "  ", "customer_name": "Asha", "request_id": "x", "status": "pending"})),
            Utc::now(),
        );
        assert!(matches!(result, Err(LendingError::MissingTemplateField { .. })));
    }

    #[test]
    fn test_complete_variables_build_a_job() {
        let template = &templates_for(ActionId::MakeOffer)[0];
        let job = NotificationJob::new(
            template,
            vars(json!({
                "email": "asha@example.com",
                "customer_name": "Asha",
                "request_id": "LRQ-1",
                "status": "offer_made",
                "offer_amount": "45000",
                "tenure_months": 12
            })),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(job.template, "offer_made");
        assert_eq!(job.channel, Channel::Email);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(200),
        };
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(30));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(60));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(120));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(200));
    }

    #[test]
    fn test_gives_up_after_max_attempts() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1));
        let now = Utc::now();
        assert!(policy.next_attempt_at(2, now).is_some());
        assert!(policy.next_attempt_at(3, now).is_none());
    }
}
