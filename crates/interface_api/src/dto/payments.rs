//! Payment and checkout DTOs

use rust_decimal::Decimal;
use serde::Deserialize;
use validator::Validate;

use core_kernel::InstallmentId;

fn one() -> u32 {
    1
}

/// A payment recorded by an administrator outside the gateway
#[derive(Debug, Deserialize, Validate)]
pub struct ManualPaymentRequest {
    /// Receipt number; repeats of the same reference are not applied twice
    #[validate(length(min = 1, max = 100))]
    pub external_reference: String,
    pub amount: Decimal,
    #[serde(default = "one")]
    #[validate(range(min = 1, max = 120))]
    pub installment_count: u32,
    pub method: Option<domain_lending::PaymentMethod>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateOrderRequest {
    pub installment_id: InstallmentId,
    #[serde(default = "one")]
    #[validate(range(min = 1, max = 120))]
    pub installment_count: u32,
    /// Amount shown to the customer; must equal the amount owed
    pub amount: Decimal,
}

/// Gateway server-to-server callback body
#[derive(Debug, Deserialize, Validate)]
pub struct GatewayCallbackRequest {
    /// Base64-encoded JSON payload
    #[validate(length(min = 1))]
    pub response: String,
}
