//! Checkout: payment orders and gateway callbacks
//!
//! Creating an order re-derives the amount owed from the stored schedule and
//! refuses any claimed amount that differs. The gateway callback for an order
//! is verified, then handed to the reconciler with the gateway's transaction
//! id as the external reference.
//!
//! Captured money is never partly applied. When the confirmed amount no
//! longer settles whole installments (a late fee was assessed after the
//! order was priced, or the installments were paid another way) the order
//! moves to [`OrderStatus::Review`] with the gateway transaction recorded,
//! and the callback is acknowledged so the gateway stops redelivering.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use core_kernel::{InstallmentId, LoanId, PartyId, PaymentOrderId};

use crate::error::LendingError;
use crate::gateway::{GatewayAdapter, GatewayEvent, SignedGatewayRequest};
use crate::loan::amount_due;
use crate::ports::{LoanRequestPort, PaymentOrderPort, RepaymentPort};
use crate::reconciler::{ApplyOutcome, PaymentConfirmation, PaymentReconciler};
use crate::request::{Actor, Role};
use crate::workflow::Guard;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Created,
    Completed,
    Failed,
    /// Money was captured but could not be applied as priced
    Review,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Created => "created",
            OrderStatus::Completed => "completed",
            OrderStatus::Failed => "failed",
            OrderStatus::Review => "review",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = LendingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(OrderStatus::Created),
            "completed" => Ok(OrderStatus::Completed),
            "failed" => Ok(OrderStatus::Failed),
            "review" => Ok(OrderStatus::Review),
            other => Err(LendingError::validation(format!("Unknown order status: {}", other))),
        }
    }
}

/// A checkout attempt for one or more installments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentOrder {
    pub id: PaymentOrderId,
    /// Our id for the order as known to the gateway
    pub merchant_transaction_id: String,
    pub loan_id: LoanId,
    /// Earliest open installment at order time
    pub installment_id: InstallmentId,
    pub installment_count: u32,
    pub amount: Decimal,
    pub status: OrderStatus,
    pub gateway_transaction_id: Option<String>,
    pub created_by: PartyId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating an order
#[derive(Debug, Clone, PartialEq)]
pub struct CreateOrder {
    pub loan_id: LoanId,
    pub installment_id: InstallmentId,
    pub installment_count: u32,
    pub claimed_amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckoutOrder {
    pub order: PaymentOrder,
    pub gateway_request: SignedGatewayRequest,
}

/// What a verified callback did
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CallbackOutcome {
    Payment { order_id: PaymentOrderId, outcome: ApplyOutcome },
    OrderFailed { order_id: PaymentOrderId, code: String },
    Pending { order_id: PaymentOrderId },
    /// Captured but unapplied; the order awaits manual settlement
    HeldForReview {
        order_id: PaymentOrderId,
        confirmed: Decimal,
        reason: String,
    },
}

pub struct CheckoutService {
    requests: Arc<dyn LoanRequestPort>,
    repayments: Arc<dyn RepaymentPort>,
    orders: Arc<dyn PaymentOrderPort>,
    gateway: GatewayAdapter,
    reconciler: Arc<PaymentReconciler>,
}

impl CheckoutService {
    pub fn new(
        requests: Arc<dyn LoanRequestPort>,
        repayments: Arc<dyn RepaymentPort>,
        orders: Arc<dyn PaymentOrderPort>,
        gateway: GatewayAdapter,
        reconciler: Arc<PaymentReconciler>,
    ) -> Self {
        Self {
            requests,
            repayments,
            orders,
            gateway,
            reconciler,
        }
    }

    /// Validates the claimed amount against the schedule and opens an order
    pub async fn create_order(&self, actor: &Actor, input: CreateOrder) -> Result<CheckoutOrder, LendingError> {
        let loan = self.repayments.get_loan(input.loan_id).await?;
        if actor.role != Role::Admin {
            let request = self.requests.get_request(loan.request_id).await?;
            if request.customer_id != actor.id {
                return Err(LendingError::Forbidden { guard: Guard::Ownership });
            }
        }
        if !loan.is_active() {
            return Err(LendingError::validation(format!("Loan {} is {}", loan.id, loan.status)));
        }

        let mut open: Vec<_> = self
            .repayments
            .installments(loan.id)
            .await?
            .into_iter()
            .filter(|i| i.status.is_open())
            .collect();
        open.sort_by_key(|i| (i.due_date, i.sequence));

        let first = open
            .first()
            .ok_or_else(|| LendingError::NothingToApply(loan.id.to_string()))?;
        if first.id != input.installment_id {
            return Err(LendingError::validation(format!(
                "Installment {} is not the earliest open installment",
                input.installment_id
            )));
        }
        let expected = amount_due(&open, input.installment_count)?;
        if expected != input.claimed_amount {
            tracing::warn!(
                loan_id = %loan.id,
                expected = %expected,
                claimed = %input.claimed_amount,
                "Rejected order with mismatched amount"
            );
            return Err(LendingError::AmountMismatch {
                expected,
                claimed: input.claimed_amount,
            });
        }

        let now = Utc::now();
        let id = PaymentOrderId::new_v7();
        let order = PaymentOrder {
            id,
            merchant_transaction_id: format!("MT{}", id.as_uuid().simple()),
            loan_id: loan.id,
            installment_id: input.installment_id,
            installment_count: input.installment_count,
            amount: expected,
            status: OrderStatus::Created,
            gateway_transaction_id: None,
            created_by: actor.id,
            created_at: now,
            updated_at: now,
        };
        let gateway_request = self.gateway.payment_request(&order)?;
        self.orders.insert_order(&order).await?;

        tracing::info!(
            loan_id = %order.loan_id,
            order = %order.merchant_transaction_id,
            amount = %order.amount,
            installments = order.installment_count,
            "Payment order created"
        );
        Ok(CheckoutOrder { order, gateway_request })
    }

    /// Verifies and applies a gateway callback
    ///
    /// Repeated deliveries of a confirmed callback return
    /// [`ApplyOutcome::AlreadyProcessed`].
    pub async fn handle_callback(&self, payload: &str, signature: &str) -> Result<CallbackOutcome, LendingError> {
        let event = self.gateway.parse_callback(payload, signature).map_err(|error| {
            tracing::warn!(error = %error, "Rejected gateway callback");
            error
        })?;

        let mut order = self
            .orders
            .order_by_merchant_transaction(event.merchant_transaction_id())
            .await?;

        match event {
            GatewayEvent::PaymentConfirmed {
                transaction_id,
                amount,
                method,
                ..
            } => {
                if order.status == OrderStatus::Review {
                    return Ok(CallbackOutcome::HeldForReview {
                        order_id: order.id,
                        confirmed: amount,
                        reason: "order is already held for review".to_string(),
                    });
                }
                if amount != order.amount {
                    let reason = format!("gateway confirmed {} against an order of {}", amount, order.amount);
                    return self.hold_for_review(order, transaction_id, amount, reason).await;
                }

                let applied = self
                    .reconciler
                    .apply_payment(PaymentConfirmation {
                        loan_id: order.loan_id,
                        external_reference: transaction_id.clone(),
                        amount,
                        installment_count: order.installment_count,
                        method,
                        processed_by: Actor::system().id,
                    })
                    .await;
                let outcome = match applied {
                    Ok(outcome) => outcome,
                    Err(error @ (LendingError::AmountMismatch { .. } | LendingError::NothingToApply(_))) => {
                        return self.hold_for_review(order, transaction_id, amount, error.to_string()).await;
                    }
                    Err(error) => return Err(error),
                };

                if order.status != OrderStatus::Completed {
                    order.status = OrderStatus::Completed;
                    order.gateway_transaction_id = Some(transaction_id);
                    order.updated_at = Utc::now();
                    self.orders.update_order(&order).await?;
                }
                Ok(CallbackOutcome::Payment { order_id: order.id, outcome })
            }
            GatewayEvent::PaymentFailed { code, .. } => {
                if order.status == OrderStatus::Created {
                    order.status = OrderStatus::Failed;
                    order.updated_at = Utc::now();
                    self.orders.update_order(&order).await?;
                }
                tracing::info!(order = %order.merchant_transaction_id, code = %code, "Gateway reported failure");
                Ok(CallbackOutcome::OrderFailed { order_id: order.id, code })
            }
            GatewayEvent::PaymentPending { .. } => Ok(CallbackOutcome::Pending { order_id: order.id }),
        }
    }

    async fn hold_for_review(
        &self,
        mut order: PaymentOrder,
        transaction_id: String,
        confirmed: Decimal,
        reason: String,
    ) -> Result<CallbackOutcome, LendingError> {
        tracing::warn!(
            order = %order.merchant_transaction_id,
            transaction = %transaction_id,
            confirmed = %confirmed,
            reason = %reason,
            "Captured payment held for review"
        );
        order.status = OrderStatus::Review;
        order.gateway_transaction_id = Some(transaction_id);
        order.updated_at = Utc::now();
        self.orders.update_order(&order).await?;

        Ok(CallbackOutcome::HeldForReview {
            order_id: order.id,
            confirmed,
            reason,
        })
    }
}
