//! Property-Based Test Generators
//!
//! Proptest strategies for loan terms, parties and workflow vocabulary.

use chrono::{Duration, NaiveDate};
use core_kernel::{LoanRequestId, PartyId};
use domain_lending::workflow::ActionId;
use domain_lending::{RequestStatus, Role};
use proptest::prelude::*;
use rust_decimal::Decimal;

/// Principal between 1,000.00 and 10,000,000.00
pub fn principal_strategy() -> impl Strategy<Value = Decimal> {
    (100_000i64..1_000_000_000i64).prop_map(|minor| Decimal::new(minor, 2))
}

/// Annual percentage rate between 0% and 36%, two decimal places
pub fn annual_rate_strategy() -> impl Strategy<Value = Decimal> {
    (0u32..=3600u32).prop_map(|n| Decimal::new(n as i64, 2))
}

/// Strictly positive annual rate, as an offer requires
pub fn offer_rate_strategy() -> impl Strategy<Value = Decimal> {
    (1u32..=3600u32).prop_map(|n| Decimal::new(n as i64, 2))
}

pub fn tenure_strategy() -> impl Strategy<Value = u32> {
    1u32..=60u32
}

/// First payment dates across several years, including month ends
pub fn first_payment_date_strategy() -> impl Strategy<Value = NaiveDate> {
    (0i64..(365 * 4)).prop_map(|days| {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + Duration::days(days)
    })
}

/// Complete loan terms: (principal, annual rate percent, tenure, first payment)
pub fn loan_terms_strategy() -> impl Strategy<Value = (Decimal, Decimal, u32, NaiveDate)> {
    (
        principal_strategy(),
        annual_rate_strategy(),
        tenure_strategy(),
        first_payment_date_strategy(),
    )
}

pub fn request_status_strategy() -> impl Strategy<Value = RequestStatus> {
    proptest::sample::select(RequestStatus::ALL.to_vec())
}

pub fn role_strategy() -> impl Strategy<Value = Role> {
    proptest::sample::select(Role::ALL.to_vec())
}

pub fn action_strategy() -> impl Strategy<Value = ActionId> {
    proptest::sample::select(ActionId::ALL.to_vec())
}

pub fn district_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("Ernakulam".to_string()),
        Just("Thrissur".to_string()),
        Just("Kozhikode".to_string()),
        "[A-Z][a-z]{3,12}",
    ]
}

/// Gateway-style transaction references
pub fn external_reference_strategy() -> impl Strategy<Value = String> {
    "GW-[A-Z0-9]{12}"
}

pub fn party_id_strategy() -> impl Strategy<Value = PartyId> {
    any::<[u8; 16]>().prop_map(|bytes| PartyId::from_uuid(uuid::Uuid::from_bytes(bytes)))
}

pub fn request_id_strategy() -> impl Strategy<Value = LoanRequestId> {
    any::<[u8; 16]>().prop_map(|bytes| LoanRequestId::from_uuid(uuid::Uuid::from_bytes(bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn test_principal_has_two_decimal_places(principal in principal_strategy()) {
            prop_assert!(principal >= Decimal::new(1000, 0));
            prop_assert_eq!(principal.scale(), 2);
        }

        #[test]
        fn test_offer_rate_is_positive(rate in offer_rate_strategy()) {
            prop_assert!(rate > Decimal::ZERO);
        }

        #[test]
        fn test_tenure_in_range(tenure in tenure_strategy()) {
            prop_assert!((1..=60).contains(&tenure));
        }

        #[test]
        fn test_reference_shape(reference in external_reference_strategy()) {
            prop_assert!(reference.starts_with("GW-"));
            prop_assert_eq!(reference.len(), 15);
        }
    }
}
