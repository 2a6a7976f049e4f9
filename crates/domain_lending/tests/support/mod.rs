//! Shared harness for the lending integration tests

#![allow(dead_code)]

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

use core_kernel::{Currency, PartyId};

use domain_lending::ports::mock::{MockLendingStore, MockNotificationQueue};
use domain_lending::{
    ActionInput, Actor, BankDetails, CheckoutService, ContactDetails, EventBus, GatewayAdapter,
    GatewayCredentials, Loan, LoanRequest, NewLoanRequest, OverdueSweeper, PaymentConfirmation,
    PaymentMethod, PaymentReconciler, RepaymentPort, SweeperConfig, WorkflowEngine,
};

pub const DISTRICT: &str = "Ernakulam";

pub struct Parties {
    pub customer: Actor,
    pub admin: Actor,
    pub agent: Actor,
}

impl Parties {
    pub fn new() -> Self {
        Self {
            customer: Actor::customer(PartyId::new()),
            admin: Actor::admin(PartyId::new(), vec![DISTRICT.to_string()]),
            agent: Actor::agent(PartyId::new()),
        }
    }
}

pub struct Harness {
    pub store: MockLendingStore,
    pub queue: Arc<MockNotificationQueue>,
    pub events: EventBus,
    pub engine: Arc<WorkflowEngine>,
    pub reconciler: Arc<PaymentReconciler>,
}

impl Harness {
    pub fn new() -> Self {
        let store = MockLendingStore::new();
        let queue = Arc::new(MockNotificationQueue::new());
        let events = EventBus::default();
        let engine = Arc::new(WorkflowEngine::new(
            Arc::new(store.clone()),
            queue.clone(),
            events.clone(),
        ));
        let reconciler = Arc::new(PaymentReconciler::new(
            Arc::new(store.clone()),
            engine.clone(),
            events.clone(),
        ));
        Self {
            store,
            queue,
            events,
            engine,
            reconciler,
        }
    }

    pub fn sweeper(&self, config: SweeperConfig) -> Arc<OverdueSweeper> {
        Arc::new(OverdueSweeper::new(
            Arc::new(self.store.clone()),
            self.engine.clone(),
            self.events.clone(),
            config,
        ))
    }

    pub fn checkout(&self, gateway: GatewayAdapter) -> CheckoutService {
        CheckoutService::new(
            Arc::new(self.store.clone()),
            Arc::new(self.store.clone()),
            Arc::new(self.store.clone()),
            gateway,
            self.reconciler.clone(),
        )
    }

    pub fn repayments(&self) -> &dyn RepaymentPort {
        &self.store
    }

    pub async fn submit(&self, customer: &Actor, contact: ContactDetails) -> LoanRequest {
        self.engine
            .submit(
                customer,
                NewLoanRequest {
                    customer_id: customer.id,
                    requested_amount: dec!(45000),
                    currency: Currency::INR,
                    asset_descriptor: "22k gold chain, 18g".to_string(),
                    district: DISTRICT.to_string(),
                    contact,
                },
            )
            .await
            .unwrap()
    }

    pub async fn act(&self, request: &LoanRequest, action: &str, actor: &Actor, input: ActionInput) -> LoanRequest {
        self.engine
            .apply(request.id, action, actor, input)
            .await
            .unwrap_or_else(|e| panic!("{} failed: {}", action, e))
            .request
    }

    /// Drives a fresh request through every step up to disbursal
    pub async fn disburse(&self, parties: &Parties) -> (LoanRequest, Loan) {
        let request = self.submit(&parties.customer, contact()).await;
        let request = self.act(&request, "start-review", &parties.admin, ActionInput::default()).await;
        let request = self
            .act(&request, "make-offer", &parties.admin, ActionInput::offer(dec!(45000), 12, dec!(12)))
            .await;
        let request = self.act(&request, "accept-offer", &parties.customer, ActionInput::default()).await;
        let request = self
            .act(
                &request,
                "schedule-inspection",
                &parties.admin,
                ActionInput::inspection(parties.agent.id, Utc::now() + Duration::days(2)),
            )
            .await;
        let request = self.act(&request, "start-inspection", &parties.agent, ActionInput::default()).await;
        let request = self.act(&request, "complete-inspection", &parties.agent, ActionInput::default()).await;
        let request = self.act(&request, "approve-request", &parties.admin, ActionInput::default()).await;
        let request = self.act(&request, "request-bank-details", &parties.admin, ActionInput::default()).await;
        let request = self
            .act(&request, "submit-bank-details", &parties.customer, ActionInput::bank_details(bank()))
            .await;

        let outcome = self
            .engine
            .apply(request.id, "disburse-amount", &parties.admin, ActionInput::default())
            .await
            .unwrap();
        let loan = outcome.loan.expect("disbursal originates a loan");
        (outcome.request, loan)
    }
}

pub fn confirmation(loan: &Loan, reference: &str, amount: Decimal, count: u32) -> PaymentConfirmation {
    PaymentConfirmation {
        loan_id: loan.id,
        external_reference: reference.to_string(),
        amount,
        installment_count: count,
        method: PaymentMethod::Upi,
        processed_by: Actor::system().id,
    }
}

pub fn contact() -> ContactDetails {
    ContactDetails {
        name: Some("Asha Menon".to_string()),
        email: Some("asha@example.com".to_string()),
        phone: Some("+919800000000".to_string()),
    }
}

pub fn bank() -> BankDetails {
    BankDetails {
        account_holder: "Asha Menon".to_string(),
        account_number: "001122334455".to_string(),
        ifsc: "SBIN0001234".to_string(),
    }
}

pub fn gateway() -> GatewayAdapter {
    GatewayAdapter::new(GatewayCredentials {
        merchant_id: "LENDCORE".to_string(),
        secret: "test-secret".to_string(),
        salt_index: 1,
        callback_url: None,
    })
}
