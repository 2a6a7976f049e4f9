//! Payment gateway boundary
//!
//! Callbacks arrive as a base64 JSON payload plus a `hash###saltIndex`
//! signature header, where `hash = hex(sha256(payload + secret))`. The
//! signature is verified on the raw payload before anything is decoded;
//! a callback that fails verification never reaches storage.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use core_kernel::Currency;

use crate::checkout::PaymentOrder;
use crate::error::LendingError;
use crate::payment::PaymentMethod;

const SEPARATOR: &str = "###";

/// The only currency the gateway settles in; loans are denominated in it
pub const SETTLEMENT_CURRENCY: Currency = Currency::INR;

/// Shared-secret credentials issued by the gateway
#[derive(Clone)]
pub struct GatewayCredentials {
    pub merchant_id: String,
    pub secret: String,
    pub salt_index: u32,
    /// Where the gateway should post callbacks for orders we create
    pub callback_url: Option<String>,
}

impl fmt::Debug for GatewayCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayCredentials")
            .field("merchant_id", &self.merchant_id)
            .field("secret", &"***")
            .field("salt_index", &self.salt_index)
            .field("callback_url", &self.callback_url)
            .finish()
    }
}

/// A payload ready to send to the gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedGatewayRequest {
    /// Base64-encoded JSON body
    pub payload: String,
    /// Value of the signature header
    pub signature: String,
}

/// A verified callback, normalized
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    PaymentConfirmed {
        merchant_transaction_id: String,
        transaction_id: String,
        amount: Decimal,
        method: PaymentMethod,
    },
    PaymentFailed {
        merchant_transaction_id: String,
        code: String,
    },
    PaymentPending {
        merchant_transaction_id: String,
    },
}

impl GatewayEvent {
    pub fn merchant_transaction_id(&self) -> &str {
        match self {
            GatewayEvent::PaymentConfirmed { merchant_transaction_id, .. }
            | GatewayEvent::PaymentFailed { merchant_transaction_id, .. }
            | GatewayEvent::PaymentPending { merchant_transaction_id } => merchant_transaction_id,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CallbackBody {
    #[serde(default)]
    success: bool,
    code: String,
    data: CallbackData,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CallbackData {
    merchant_transaction_id: String,
    #[serde(default)]
    transaction_id: Option<String>,
    /// Minor units (paise)
    amount: i64,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    payment_instrument: Option<PaymentInstrument>,
}

#[derive(Debug, Deserialize)]
struct PaymentInstrument {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PayRequestBody<'a> {
    merchant_id: &'a str,
    merchant_transaction_id: &'a str,
    merchant_user_id: String,
    amount: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    callback_url: Option<&'a str>,
    payment_instrument: PayInstrument,
}

#[derive(Debug, Serialize)]
struct PayInstrument {
    #[serde(rename = "type")]
    kind: &'static str,
}

/// Signs outbound requests and verifies inbound callbacks
#[derive(Debug, Clone)]
pub struct GatewayAdapter {
    credentials: GatewayCredentials,
}

impl GatewayAdapter {
    pub fn new(credentials: GatewayCredentials) -> Self {
        Self { credentials }
    }

    /// Signature header value for a base64 payload
    pub fn sign(&self, payload: &str) -> String {
        format!("{}{}{}", self.digest(payload), SEPARATOR, self.credentials.salt_index)
    }

    /// Checks a signature header against the raw payload
    pub fn verify(&self, payload: &str, signature: &str) -> Result<(), LendingError> {
        let (hash, salt_index) = signature
            .rsplit_once(SEPARATOR)
            .ok_or_else(|| LendingError::SignatureInvalid("malformed signature header".into()))?;

        if salt_index.trim().parse::<u32>().ok() != Some(self.credentials.salt_index) {
            return Err(LendingError::SignatureInvalid("unknown salt index".into()));
        }

        let expected = self.digest(payload);
        if !constant_time_eq(expected.as_bytes(), hash.trim().to_ascii_lowercase().as_bytes()) {
            return Err(LendingError::SignatureInvalid("hash mismatch".into()));
        }
        Ok(())
    }

    /// Verifies, then decodes and normalizes a callback
    pub fn parse_callback(&self, payload: &str, signature: &str) -> Result<GatewayEvent, LendingError> {
        self.verify(payload, signature)?;

        let raw = BASE64
            .decode(payload.trim())
            .map_err(|e| LendingError::validation(format!("Callback payload is not base64: {}", e)))?;
        let body: CallbackBody = serde_json::from_slice(&raw)
            .map_err(|e| LendingError::validation(format!("Callback payload is not valid JSON: {}", e)))?;

        let data = body.data;
        let state = data.state.as_deref().unwrap_or_default().to_ascii_uppercase();

        if body.success && body.code == "PAYMENT_SUCCESS" && state == "COMPLETED" {
            let transaction_id = data
                .transaction_id
                .filter(|id| !id.trim().is_empty())
                .ok_or_else(|| LendingError::validation("Confirmed callback carries no transaction id"))?;
            let method = data
                .payment_instrument
                .map(|p| PaymentMethod::from_instrument(&p.kind))
                .unwrap_or(PaymentMethod::Other);

            return Ok(GatewayEvent::PaymentConfirmed {
                merchant_transaction_id: data.merchant_transaction_id,
                transaction_id,
                amount: SETTLEMENT_CURRENCY.from_minor_units(data.amount),
                method,
            });
        }

        if body.code == "PAYMENT_PENDING" || state == "PENDING" {
            return Ok(GatewayEvent::PaymentPending {
                merchant_transaction_id: data.merchant_transaction_id,
            });
        }

        Ok(GatewayEvent::PaymentFailed {
            merchant_transaction_id: data.merchant_transaction_id,
            code: body.code,
        })
    }

    /// Builds the signed pay-page request for an order
    pub fn payment_request(&self, order: &PaymentOrder) -> Result<SignedGatewayRequest, LendingError> {
        let body = PayRequestBody {
            merchant_id: &self.credentials.merchant_id,
            merchant_transaction_id: &order.merchant_transaction_id,
            merchant_user_id: order.created_by.to_string(),
            amount: SETTLEMENT_CURRENCY.to_minor_units(order.amount)?,
            callback_url: self.credentials.callback_url.as_deref(),
            payment_instrument: PayInstrument { kind: "PAY_PAGE" },
        };
        let json = serde_json::to_vec(&body)
            .map_err(|e| LendingError::validation(format!("Failed to encode gateway request: {}", e)))?;
        let payload = BASE64.encode(json);
        let signature = self.sign(&payload);
        Ok(SignedGatewayRequest { payload, signature })
    }

    fn digest(&self, payload: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(payload.as_bytes());
        hasher.update(self.credentials.secret.as_bytes());
        hex::encode(hasher.finalize())
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
