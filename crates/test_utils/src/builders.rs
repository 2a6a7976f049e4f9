//! Test Data Builders
//!
//! Builders for seeding stores directly, without walking the workflow.
//! Tests specify only the fields they care about; everything else comes from
//! the fixtures.

use chrono::{DateTime, NaiveDate, Utc};
use core_kernel::{Currency, LoanRequestId, PartyId, Rate};
use domain_lending::{
    AmortizationCalculator, BankDetails, ContactDetails, EmiInstallment, HistoryEntry, Loan,
    LoanRequest, NewLoanRequest, OfferTerms, RequestStatus,
};
use domain_lending::workflow::ActionId;
use rust_decimal::Decimal;

use crate::fixtures::{AmountFixtures, PartyFixtures, StringFixtures, TemporalFixtures};

/// Builder for loan requests in any status
pub struct TestLoanRequestBuilder {
    customer_id: PartyId,
    requested_amount: Decimal,
    currency: Currency,
    district: String,
    status: RequestStatus,
    offer: Option<OfferTerms>,
    assigned_agent_id: Option<PartyId>,
    inspection_date: Option<DateTime<Utc>>,
    bank_details: Option<BankDetails>,
    contact: ContactDetails,
    created_at: DateTime<Utc>,
}

impl Default for TestLoanRequestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestLoanRequestBuilder {
    pub fn new() -> Self {
        Self {
            customer_id: PartyId::new(),
            requested_amount: AmountFixtures::principal(),
            currency: AmountFixtures::currency(),
            district: StringFixtures::district().to_string(),
            status: RequestStatus::Pending,
            offer: None,
            assigned_agent_id: None,
            inspection_date: None,
            bank_details: None,
            contact: PartyFixtures::contact(),
            created_at: TemporalFixtures::submitted_at(),
        }
    }

    pub fn with_customer(mut self, customer_id: PartyId) -> Self {
        self.customer_id = customer_id;
        self
    }

    pub fn with_amount(mut self, amount: Decimal) -> Self {
        self.requested_amount = amount;
        self
    }

    pub fn with_district(mut self, district: impl Into<String>) -> Self {
        self.district = district.into();
        self
    }

    pub fn with_status(mut self, status: RequestStatus) -> Self {
        self.status = status;
        self
    }

    /// Records the reference offer terms
    pub fn with_offer(mut self) -> Self {
        self.offer = Some(OfferTerms {
            amount: AmountFixtures::principal(),
            tenure_months: AmountFixtures::tenure_months(),
            annual_rate: AmountFixtures::annual_rate_percent(),
        });
        self
    }

    pub fn with_agent(mut self, agent_id: PartyId) -> Self {
        self.assigned_agent_id = Some(agent_id);
        self.inspection_date = Some(TemporalFixtures::inspection_at());
        self
    }

    pub fn with_bank_details(mut self) -> Self {
        self.bank_details = Some(PartyFixtures::bank_details());
        self
    }

    pub fn with_contact(mut self, contact: ContactDetails) -> Self {
        self.contact = contact;
        self
    }

    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = at;
        self
    }

    /// The submission a customer would send for this request
    pub fn submission(&self) -> NewLoanRequest {
        NewLoanRequest {
            customer_id: self.customer_id,
            requested_amount: self.requested_amount,
            currency: self.currency,
            asset_descriptor: StringFixtures::asset_descriptor().to_string(),
            district: self.district.clone(),
            contact: self.contact.clone(),
        }
    }

    pub fn build(self) -> LoanRequest {
        LoanRequest {
            id: LoanRequestId::new_v7(),
            customer_id: self.customer_id,
            requested_amount: self.requested_amount,
            currency: self.currency,
            asset_descriptor: StringFixtures::asset_descriptor().to_string(),
            district: self.district,
            status: self.status,
            offer: self.offer,
            assigned_agent_id: self.assigned_agent_id,
            inspection_date: self.inspection_date,
            bank_details: self.bank_details,
            contact: self.contact,
            created_at: self.created_at,
            updated_at: self.created_at,
        }
    }

    /// The request together with the history entry its submission writes
    pub fn build_submitted(self) -> (LoanRequest, HistoryEntry) {
        let customer = domain_lending::Actor::customer(self.customer_id);
        let request = self.build();
        let entry = HistoryEntry::new(
            request.id,
            ActionId::SubmitRequest,
            &customer,
            None,
            request.status,
            request.created_at,
        );
        (request, entry)
    }
}

/// Builder for an originated loan and its schedule
pub struct TestLoanBuilder {
    request_id: LoanRequestId,
    principal: Decimal,
    annual_rate: Rate,
    tenure_months: u32,
    disbursed_on: NaiveDate,
    first_payment_date: NaiveDate,
}

impl TestLoanBuilder {
    pub fn new(request_id: LoanRequestId) -> Self {
        Self {
            request_id,
            principal: AmountFixtures::principal(),
            annual_rate: AmountFixtures::annual_rate(),
            tenure_months: AmountFixtures::tenure_months(),
            disbursed_on: TemporalFixtures::disbursed_on(),
            first_payment_date: TemporalFixtures::first_payment_date(),
        }
    }

    pub fn with_terms(mut self, principal: Decimal, annual_rate_percent: Decimal, tenure_months: u32) -> Self {
        self.principal = principal;
        self.annual_rate = Rate::annual_percent(annual_rate_percent);
        self.tenure_months = tenure_months;
        self
    }

    pub fn first_payment_on(mut self, date: NaiveDate) -> Self {
        self.first_payment_date = date;
        self
    }

    /// # Panics
    ///
    /// Panics if the terms do not produce a schedule
    pub fn build(self) -> (Loan, Vec<EmiInstallment>) {
        let schedule = AmortizationCalculator::new()
            .schedule(self.principal, self.annual_rate, self.tenure_months, self.first_payment_date)
            .expect("test loan terms must be valid");
        Loan::originate(
            self.request_id,
            AmountFixtures::currency(),
            &schedule,
            self.disbursed_on,
            Utc::now(),
        )
    }
}
