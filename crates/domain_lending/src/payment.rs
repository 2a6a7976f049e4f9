//! Payment ledger entries

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use core_kernel::{InstallmentId, LoanId, PartyId, PaymentId};

use crate::error::LendingError;

/// How the money arrived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Upi,
    Card,
    NetBanking,
    Wallet,
    Cash,
    Other,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Upi => "upi",
            PaymentMethod::Card => "card",
            PaymentMethod::NetBanking => "net_banking",
            PaymentMethod::Wallet => "wallet",
            PaymentMethod::Cash => "cash",
            PaymentMethod::Other => "other",
        }
    }

    /// Maps a gateway instrument type such as `UPI` or `CARD`
    pub fn from_instrument(instrument: &str) -> Self {
        match instrument.to_ascii_uppercase().as_str() {
            "UPI" | "UPI_COLLECT" | "UPI_INTENT" | "UPI_QR" => PaymentMethod::Upi,
            "CARD" | "CREDIT_CARD" | "DEBIT_CARD" => PaymentMethod::Card,
            "NETBANKING" | "NET_BANKING" => PaymentMethod::NetBanking,
            "WALLET" => PaymentMethod::Wallet,
            _ => PaymentMethod::Other,
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = LendingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upi" => Ok(PaymentMethod::Upi),
            "card" => Ok(PaymentMethod::Card),
            "net_banking" => Ok(PaymentMethod::NetBanking),
            "wallet" => Ok(PaymentMethod::Wallet),
            "cash" => Ok(PaymentMethod::Cash),
            "other" => Ok(PaymentMethod::Other),
            other => Err(LendingError::validation(format!("Unknown payment method: {}", other))),
        }
    }
}

/// One confirmed transfer applied to one installment
///
/// Immutable once written. Every row produced by the same confirmation
/// carries the same external reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub loan_id: LoanId,
    pub installment_id: InstallmentId,
    pub amount: Decimal,
    pub method: PaymentMethod,
    /// Gateway transaction id; the idempotency key
    pub external_reference: String,
    pub processed_by: PartyId,
    pub created_at: DateTime<Utc>,
}
