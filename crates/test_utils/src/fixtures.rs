//! Pre-built Test Fixtures
//!
//! Ready-to-use test data for the lending tests. The amounts and dates are
//! the reference scenario (45,000 at 12% over 12 months) so expected figures
//! can be written down once.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use core_kernel::{Currency, PartyId, Rate};
use domain_lending::{Actor, BankDetails, ContactDetails};
use fake::faker::internet::en::SafeEmail;
use fake::faker::name::en::Name;
use fake::Fake;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Fixture for loan amounts and terms
pub struct AmountFixtures;

impl AmountFixtures {
    pub fn currency() -> Currency {
        Currency::INR
    }

    /// Reference principal
    pub fn principal() -> Decimal {
        dec!(45000)
    }

    pub fn annual_rate_percent() -> Decimal {
        dec!(12)
    }

    pub fn annual_rate() -> Rate {
        Rate::annual_percent(Self::annual_rate_percent())
    }

    pub fn tenure_months() -> u32 {
        12
    }

    /// Monthly installment for the reference terms
    pub fn emi() -> Decimal {
        dec!(3998.20)
    }

    /// Sum of every scheduled payment for the reference terms
    pub fn total_payable() -> Decimal {
        dec!(47978.36)
    }
}

/// Fixture for dates and timestamps
pub struct TemporalFixtures;

impl TemporalFixtures {
    pub fn submitted_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 9, 30, 0).unwrap()
    }

    pub fn disbursed_on() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()
    }

    /// One month after disbursal
    pub fn first_payment_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 2, 15).unwrap()
    }

    /// Inspection slot two days after submission
    pub fn inspection_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 4, 11, 0, 0).unwrap()
    }
}

/// Fixture for string identifiers
pub struct StringFixtures;

impl StringFixtures {
    pub fn district() -> &'static str {
        "Ernakulam"
    }

    pub fn other_district() -> &'static str {
        "Thrissur"
    }

    pub fn asset_descriptor() -> &'static str {
        "22k gold chain, 18g"
    }

    pub fn external_reference() -> &'static str {
        "GW-TXN-0001"
    }
}

/// Fixture for parties and their contact details
pub struct PartyFixtures;

impl PartyFixtures {
    pub fn customer() -> Actor {
        Actor::customer(PartyId::new())
    }

    pub fn agent() -> Actor {
        Actor::agent(PartyId::new())
    }

    /// Administrator scoped to the fixture district
    pub fn admin() -> Actor {
        Actor::admin(PartyId::new(), vec![StringFixtures::district().to_string()])
    }

    pub fn contact() -> ContactDetails {
        ContactDetails {
            name: Some("Anjali Menon".to_string()),
            email: Some("anjali@example.com".to_string()),
            phone: Some("+919800000001".to_string()),
        }
    }

    /// A distinct customer identity per call, for tests that submit many requests
    pub fn random_contact() -> ContactDetails {
        ContactDetails {
            name: Some(Name().fake()),
            email: Some(SafeEmail().fake()),
            phone: Some(format!("+9198{:08}", (0u32..100_000_000).fake::<u32>())),
        }
    }

    pub fn bank_details() -> BankDetails {
        BankDetails {
            account_holder: "Anjali Menon".to_string(),
            account_number: "001234567890".to_string(),
            ifsc: "SBIN0001234".to_string(),
        }
    }
}
