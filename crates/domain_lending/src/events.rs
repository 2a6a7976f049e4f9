//! Domain events published after every committed change
//!
//! The bus is a `tokio::sync::broadcast` channel. Publishing never blocks and
//! never fails the operation that produced the event; a bus with no
//! subscribers simply drops it.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use core_kernel::{LoanId, LoanRequestId, PartyId};

use crate::loan::LoanStatus;
use crate::request::{RequestStatus, Role};
use crate::workflow::ActionId;

/// Default number of events a slow subscriber may lag behind
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LendingEvent {
    RequestSubmitted {
        request_id: LoanRequestId,
        customer_id: PartyId,
        at: DateTime<Utc>,
    },
    Transitioned {
        request_id: LoanRequestId,
        action: ActionId,
        actor_id: PartyId,
        actor_role: Role,
        prior_status: RequestStatus,
        next_status: RequestStatus,
        at: DateTime<Utc>,
    },
    LoanOriginated {
        loan_id: LoanId,
        request_id: LoanRequestId,
        principal: Decimal,
        emi_amount: Decimal,
        at: DateTime<Utc>,
    },
    PaymentApplied {
        loan_id: LoanId,
        external_reference: String,
        installments: u32,
        amount: Decimal,
        loan_status: LoanStatus,
        at: DateTime<Utc>,
    },
    InstallmentsOverdue {
        loan_id: LoanId,
        newly_overdue: u64,
        overdue_installments: u32,
        at: DateTime<Utc>,
    },
}

impl LendingEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LendingEvent::RequestSubmitted { .. } => "request_submitted",
            LendingEvent::Transitioned { .. } => "transitioned",
            LendingEvent::LoanOriginated { .. } => "loan_originated",
            LendingEvent::PaymentApplied { .. } => "payment_applied",
            LendingEvent::InstallmentsOverdue { .. } => "installments_overdue",
        }
    }
}

/// Cloneable handle to the event channel
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<LendingEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LendingEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: LendingEvent) {
        let name = event.name();
        match self.sender.send(event) {
            Ok(receivers) => tracing::trace!(event = name, receivers, "Event published"),
            Err(_) => tracing::trace!(event = name, "Event dropped, no subscribers"),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscriber_receives_published_event() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.publish(LendingEvent::RequestSubmitted {
            request_id: LoanRequestId::new(),
            customer_id: PartyId::new(),
            at: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.name(), "request_submitted");
    }

    #[test]
    fn test_publish_without_subscribers_is_silent() {
        let bus = EventBus::new(4);
        bus.publish(LendingEvent::RequestSubmitted {
            request_id: LoanRequestId::new(),
            customer_id: PartyId::new(),
            at: Utc::now(),
        });
    }
}
