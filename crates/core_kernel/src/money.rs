//! Currency amounts and the rounding policy
//!
//! Amounts are carried as `rust_decimal::Decimal` values. Every figure that is
//! persisted or shown to a customer goes through [`round_currency`], which is
//! the single rounding policy of the system: round half away from zero
//! ("half-up") to the currency's minor unit. The amortization engine depends
//! on this policy being fixed, because the final installment absorbs whatever
//! drift the policy produces on the earlier rows.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Currency codes following ISO 4217
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    #[default]
    INR,
    USD,
    EUR,
    GBP,
    JPY,
}

impl Currency {
    /// Returns the number of decimal places for this currency
    pub fn decimal_places(&self) -> u32 {
        match self {
            Currency::JPY => 0,
            _ => 2,
        }
    }

    /// Returns the ISO 4217 code
    pub fn code(&self) -> &'static str {
        match self {
            Currency::INR => "INR",
            Currency::USD => "USD",
            Currency::EUR => "EUR",
            Currency::GBP => "GBP",
            Currency::JPY => "JPY",
        }
    }

    /// Rounds an amount to this currency's minor unit
    pub fn round(&self, amount: Decimal) -> Decimal {
        amount.round_dp_with_strategy(self.decimal_places(), RoundingStrategy::MidpointAwayFromZero)
    }

    /// Converts a major-unit amount into integer minor units (e.g. rupees to paise)
    pub fn to_minor_units(&self, amount: Decimal) -> Result<i64, MoneyError> {
        let scaled = self.round(amount) * Decimal::from(10_i64.pow(self.decimal_places()));
        scaled.trunc().to_i64().ok_or(MoneyError::Overflow)
    }

    /// Converts integer minor units back into a major-unit amount
    pub fn from_minor_units(&self, minor: i64) -> Decimal {
        Decimal::new(minor, self.decimal_places())
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl std::str::FromStr for Currency {
    type Err = MoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "INR" => Ok(Currency::INR),
            "USD" => Ok(Currency::USD),
            "EUR" => Ok(Currency::EUR),
            "GBP" => Ok(Currency::GBP),
            "JPY" => Ok(Currency::JPY),
            other => Err(MoneyError::UnknownCurrency(other.to_string())),
        }
    }
}

/// Errors that can occur during money operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MoneyError {
    #[error("Unknown currency: {0}")]
    UnknownCurrency(String),

    #[error("Overflow during calculation")]
    Overflow,
}

/// Rounds an amount to two decimal places, half away from zero
///
/// This is the rounding policy used for every scheduled amount, interest
/// component, late fee and payment.
pub fn round_currency(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// An annual interest rate expressed as a percentage (e.g. 12 for 12%)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Rate {
    annual_percent: Decimal,
}

impl Rate {
    /// Creates a rate from an annual percentage
    pub fn annual_percent(percent: Decimal) -> Self {
        Self {
            annual_percent: percent,
        }
    }

    /// Returns the annual rate as a percentage
    pub fn as_percentage(&self) -> Decimal {
        self.annual_percent
    }

    /// Monthly periodic rate: `annual / 100 / 12`, unrounded
    pub fn monthly(&self) -> Decimal {
        self.annual_percent / dec!(100) / dec!(12)
    }

    /// Returns true for an interest-free rate
    pub fn is_zero(&self) -> bool {
        self.annual_percent.is_zero()
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.annual_percent.round_dp(4))
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn rounding_moves_less_than_half_a_paisa(minor in -1_000_000_000i64..1_000_000_000i64) {
            let amount = Decimal::new(minor, 4);
            let rounded = round_currency(amount);
            prop_assert!((rounded - amount).abs() <= dec!(0.005));
        }
    }
}
