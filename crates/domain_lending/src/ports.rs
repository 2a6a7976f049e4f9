//! Lending Domain Ports
//!
//! The engine, reconciler, sweeper and checkout receive these traits as
//! `Arc<dyn ...>` constructor arguments. `infra_db` provides the PostgreSQL
//! adapters; the `mock` module provides in-memory adapters for tests.
//!
//! # Units of work
//!
//! Everything that mutates installments, payments or loan aggregates runs
//! inside a [`RepaymentTx`] obtained from [`RepaymentPort::begin`]. Dropping
//! the transaction without calling [`RepaymentTx::commit`] discards every
//! write. Within a transaction the loan row is always locked before any of
//! its installments.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;

use core_kernel::{DomainPort, LoanId, LoanRequestId, NotificationJobId, PartyId, PortError};

use crate::checkout::PaymentOrder;
use crate::loan::{EmiInstallment, Loan};
use crate::notification::{DeliveryStatus, NotificationJob, QueuedNotification};
use crate::payment::Payment;
use crate::request::{LoanRequest, RequestStatus};
use crate::workflow::{CommittedTransition, HistoryEntry};

/// Filters for listing loan requests
#[derive(Debug, Clone, Default)]
pub struct RequestQuery {
    pub customer_id: Option<PartyId>,
    pub assigned_agent_id: Option<PartyId>,
    /// Matches any of the listed districts, case-insensitively
    pub districts: Option<Vec<String>>,
    pub status: Option<RequestStatus>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl RequestQuery {
    pub fn matches(&self, request: &LoanRequest) -> bool {
        if let Some(customer_id) = self.customer_id {
            if request.customer_id != customer_id {
                return false;
            }
        }
        if let Some(agent_id) = self.assigned_agent_id {
            if request.assigned_agent_id != Some(agent_id) {
                return false;
            }
        }
        if let Some(ref districts) = self.districts {
            if !districts.iter().any(|d| d.eq_ignore_ascii_case(&request.district)) {
                return false;
            }
        }
        if let Some(status) = self.status {
            if request.status != status {
                return false;
            }
        }
        true
    }
}

/// Storage for loan requests and their history
#[async_trait]
pub trait LoanRequestPort: DomainPort {
    /// Stores a newly submitted request together with its submission entry
    async fn insert_request(&self, request: &LoanRequest, entry: &HistoryEntry) -> Result<(), PortError>;

    async fn get_request(&self, id: LoanRequestId) -> Result<LoanRequest, PortError>;

    async fn list_requests(&self, query: &RequestQuery) -> Result<Vec<LoanRequest>, PortError>;

    /// Writes a transition atomically: the status change (only if the stored
    /// status still equals `transition.prior_status`, otherwise `Conflict`),
    /// the history entry and the loan effect, if any
    async fn record_transition(&self, transition: &CommittedTransition) -> Result<(), PortError>;

    /// History entries in commit order
    async fn history(&self, id: LoanRequestId) -> Result<Vec<HistoryEntry>, PortError>;
}

/// One atomic unit of work over loans, installments and payments
#[async_trait]
pub trait RepaymentTx: Send {
    /// Reads the loan and holds its row lock until commit or drop
    async fn lock_loan(&mut self, loan_id: LoanId) -> Result<Loan, PortError>;

    /// Every payment row recorded under a gateway reference
    async fn payments_by_reference(&mut self, external_reference: &str) -> Result<Vec<Payment>, PortError>;

    /// Pending and overdue installments, earliest due first
    async fn open_installments(&mut self, loan_id: LoanId) -> Result<Vec<EmiInstallment>, PortError>;

    /// All installments by sequence
    async fn installments(&mut self, loan_id: LoanId) -> Result<Vec<EmiInstallment>, PortError>;

    async fn save_installment(&mut self, installment: &EmiInstallment) -> Result<(), PortError>;

    /// Fails with `Conflict` if the (reference, installment) pair exists
    async fn insert_payment(&mut self, payment: &Payment) -> Result<(), PortError>;

    async fn save_loan(&mut self, loan: &Loan) -> Result<(), PortError>;

    /// Active loans having a pending installment due strictly before `cutoff`,
    /// ordered by id
    async fn loans_with_pending_due_before(&mut self, cutoff: NaiveDate) -> Result<Vec<LoanId>, PortError>;

    /// Moves the loan's pending installments due before `cutoff` to overdue,
    /// assessing `late_fee` on each; returns how many moved
    async fn mark_overdue(
        &mut self,
        loan_id: LoanId,
        cutoff: NaiveDate,
        late_fee: Decimal,
    ) -> Result<u64, PortError>;

    async fn commit(self: Box<Self>) -> Result<(), PortError>;
}

/// Storage for loans, installments and the payment ledger
#[async_trait]
pub trait RepaymentPort: DomainPort {
    async fn begin(&self) -> Result<Box<dyn RepaymentTx>, PortError>;

    async fn get_loan(&self, id: LoanId) -> Result<Loan, PortError>;

    async fn loan_for_request(&self, request_id: LoanRequestId) -> Result<Loan, PortError>;

    async fn installments(&self, loan_id: LoanId) -> Result<Vec<EmiInstallment>, PortError>;

    async fn payments(&self, loan_id: LoanId) -> Result<Vec<Payment>, PortError>;

    /// Loans whose request status disagrees with the loan, ordered by id:
    /// active with overdue installments while the request is disbursed,
    /// active without any while the request is overdue, and completed while
    /// the request is still open. Matches `status_sync::reconciling_action`.
    async fn loans_out_of_step(&self) -> Result<Vec<LoanId>, PortError>;
}

/// Storage for checkout orders
#[async_trait]
pub trait PaymentOrderPort: DomainPort {
    async fn insert_order(&self, order: &PaymentOrder) -> Result<(), PortError>;

    async fn order_by_merchant_transaction(&self, merchant_transaction_id: &str) -> Result<PaymentOrder, PortError>;

    async fn update_order(&self, order: &PaymentOrder) -> Result<(), PortError>;
}

/// Durable outbox for notification jobs
#[async_trait]
pub trait NotificationQueue: DomainPort {
    async fn enqueue(&self, job: &NotificationJob) -> Result<(), PortError>;

    /// Queued jobs whose next attempt is due, oldest first
    async fn claim_due(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<QueuedNotification>, PortError>;

    async fn mark_delivered(&self, id: NotificationJobId) -> Result<(), PortError>;

    /// Records a failed attempt and schedules a retry or gives up
    async fn mark_failed(
        &self,
        id: NotificationJobId,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<DeliveryStatus, PortError>;
}

/// In-memory adapters
#[cfg(any(test, feature = "mock"))]
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

    use core_kernel::{AdapterHealth, HealthCheckResult, HealthCheckable};

    use crate::loan::{InstallmentStatus, LoanStatus};
    use crate::notification::RetryPolicy;
    use crate::status_sync::reconciling_action;
    use crate::workflow::LoanEffect;

    #[derive(Debug, Default, Clone)]
    struct LedgerState {
        loans: HashMap<LoanId, Loan>,
        installments: HashMap<LoanId, Vec<EmiInstallment>>,
        payments: Vec<Payment>,
    }

    /// In-memory store implementing every storage port
    ///
    /// Ledger transactions hold one store-wide lock, which serializes them
    /// the way row locks serialize writers of the same loan.
    #[derive(Debug, Default, Clone)]
    pub struct MockLendingStore {
        requests: Arc<RwLock<HashMap<LoanRequestId, LoanRequest>>>,
        history: Arc<RwLock<Vec<HistoryEntry>>>,
        ledger: Arc<Mutex<LedgerState>>,
        orders: Arc<RwLock<HashMap<String, PaymentOrder>>>,
    }

    impl MockLendingStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Seeds a loan and its installments directly
        pub async fn with_loan(self, loan: Loan, installments: Vec<EmiInstallment>) -> Self {
            let mut ledger = self.ledger.lock().await;
            ledger.installments.insert(loan.id, installments);
            ledger.loans.insert(loan.id, loan);
            drop(ledger);
            self
        }

        /// Seeds a request without history
        pub async fn with_request(self, request: LoanRequest) -> Self {
            self.requests.write().await.insert(request.id, request);
            self
        }

        /// Every payment row in the ledger
        pub async fn all_payments(&self) -> Vec<Payment> {
            self.ledger.lock().await.payments.clone()
        }
    }

    impl DomainPort for MockLendingStore {}

    #[async_trait]
    impl HealthCheckable for MockLendingStore {
        async fn health_check(&self) -> HealthCheckResult {
            HealthCheckResult {
                adapter_id: "mock-lending-store".to_string(),
                status: AdapterHealth::Healthy,
                latency_ms: 0,
                message: Some("Mock adapter always healthy".to_string()),
                checked_at: Utc::now(),
            }
        }
    }

    #[async_trait]
    impl LoanRequestPort for MockLendingStore {
        async fn insert_request(&self, request: &LoanRequest, entry: &HistoryEntry) -> Result<(), PortError> {
            let mut requests = self.requests.write().await;
            if requests.contains_key(&request.id) {
                return Err(PortError::conflict(format!("request {} already exists", request.id)));
            }
            requests.insert(request.id, request.clone());
            self.history.write().await.push(entry.clone());
            Ok(())
        }

        async fn get_request(&self, id: LoanRequestId) -> Result<LoanRequest, PortError> {
            self.requests
                .read()
                .await
                .get(&id)
                .cloned()
                .ok_or_else(|| PortError::not_found("LoanRequest", id))
        }

        async fn list_requests(&self, query: &RequestQuery) -> Result<Vec<LoanRequest>, PortError> {
            let requests = self.requests.read().await;
            let mut results: Vec<_> = requests.values().filter(|r| query.matches(r)).cloned().collect();
            results.sort_by(|a, b| b.created_at.cmp(&a.created_at));

            let offset = query.offset.unwrap_or(0) as usize;
            let limit = query.limit.map(|l| l as usize).unwrap_or(usize::MAX);
            Ok(results.into_iter().skip(offset).take(limit).collect())
        }

        async fn record_transition(&self, transition: &CommittedTransition) -> Result<(), PortError> {
            let mut requests = self.requests.write().await;
            let stored = requests
                .get(&transition.request.id)
                .ok_or_else(|| PortError::not_found("LoanRequest", transition.request.id))?;
            if stored.status != transition.prior_status {
                return Err(PortError::conflict(format!(
                    "request {} moved to {} concurrently",
                    stored.id, stored.status
                )));
            }

            let mut ledger = self.ledger.lock().await;
            match &transition.effect {
                Some(LoanEffect::Originate { loan, installments }) => {
                    if ledger.loans.values().any(|l| l.request_id == loan.request_id) {
                        return Err(PortError::conflict(format!(
                            "loan already originated for request {}",
                            loan.request_id
                        )));
                    }
                    ledger.installments.insert(loan.id, installments.clone());
                    ledger.loans.insert(loan.id, loan.clone());
                }
                Some(LoanEffect::MarkDefaulted { at }) => {
                    let loan = ledger
                        .loans
                        .values_mut()
                        .find(|l| l.request_id == transition.request.id)
                        .ok_or_else(|| PortError::not_found("Loan", transition.request.id))?;
                    loan.status = LoanStatus::Defaulted;
                    loan.updated_at = *at;
                    let loan_id = loan.id;
                    for installment in ledger.installments.get_mut(&loan_id).into_iter().flatten() {
                        if installment.status.is_open() {
                            installment.status = InstallmentStatus::Defaulted;
                        }
                    }
                }
                None => {}
            }

            requests.insert(transition.request.id, transition.request.clone());
            self.history.write().await.push(transition.entry.clone());
            Ok(())
        }

        async fn history(&self, id: LoanRequestId) -> Result<Vec<HistoryEntry>, PortError> {
            Ok(self
                .history
                .read()
                .await
                .iter()
                .filter(|e| e.request_id == id)
                .cloned()
                .collect())
        }
    }

    /// Transaction over a private copy of the ledger, published on commit
    pub struct MockRepaymentTx {
        guard: OwnedMutexGuard<LedgerState>,
        working: LedgerState,
    }

    impl MockRepaymentTx {
        fn installments_of(&mut self, loan_id: LoanId) -> &mut Vec<EmiInstallment> {
            self.working.installments.entry(loan_id).or_default()
        }
    }

    #[async_trait]
    impl RepaymentTx for MockRepaymentTx {
        async fn lock_loan(&mut self, loan_id: LoanId) -> Result<Loan, PortError> {
            self.working
                .loans
                .get(&loan_id)
                .cloned()
                .ok_or_else(|| PortError::not_found("Loan", loan_id))
        }

        async fn payments_by_reference(&mut self, external_reference: &str) -> Result<Vec<Payment>, PortError> {
            Ok(self
                .working
                .payments
                .iter()
                .filter(|p| p.external_reference == external_reference)
                .cloned()
                .collect())
        }

        async fn open_installments(&mut self, loan_id: LoanId) -> Result<Vec<EmiInstallment>, PortError> {
            let mut open: Vec<_> = self
                .installments_of(loan_id)
                .iter()
                .filter(|i| i.status.is_open())
                .cloned()
                .collect();
            open.sort_by_key(|i| (i.due_date, i.sequence));
            Ok(open)
        }

        async fn installments(&mut self, loan_id: LoanId) -> Result<Vec<EmiInstallment>, PortError> {
            let mut all = self.installments_of(loan_id).clone();
            all.sort_by_key(|i| i.sequence);
            Ok(all)
        }

        async fn save_installment(&mut self, installment: &EmiInstallment) -> Result<(), PortError> {
            let slot = self
                .installments_of(installment.loan_id)
                .iter_mut()
                .find(|i| i.id == installment.id)
                .ok_or_else(|| PortError::not_found("Installment", installment.id))?;
            *slot = installment.clone();
            Ok(())
        }

        async fn insert_payment(&mut self, payment: &Payment) -> Result<(), PortError> {
            let duplicate = self.working.payments.iter().any(|p| {
                p.external_reference == payment.external_reference
                    && p.installment_id == payment.installment_id
            });
            if duplicate {
                return Err(PortError::conflict(format!(
                    "payment {} already recorded for installment {}",
                    payment.external_reference, payment.installment_id
                )));
            }
            self.working.payments.push(payment.clone());
            Ok(())
        }

        async fn save_loan(&mut self, loan: &Loan) -> Result<(), PortError> {
            if !self.working.loans.contains_key(&loan.id) {
                return Err(PortError::not_found("Loan", loan.id));
            }
            self.working.loans.insert(loan.id, loan.clone());
            Ok(())
        }

        async fn loans_with_pending_due_before(&mut self, cutoff: NaiveDate) -> Result<Vec<LoanId>, PortError> {
            let mut ids: Vec<_> = self
                .working
                .loans
                .values()
                .filter(|loan| loan.status == LoanStatus::Active)
                .filter(|loan| {
                    self.working
                        .installments
                        .get(&loan.id)
                        .map(|all| {
                            all.iter()
                                .any(|i| i.status == InstallmentStatus::Pending && i.due_date < cutoff)
                        })
                        .unwrap_or(false)
                })
                .map(|loan| loan.id)
                .collect();
            ids.sort_by_key(|id| *id.as_uuid());
            Ok(ids)
        }

        async fn mark_overdue(
            &mut self,
            loan_id: LoanId,
            cutoff: NaiveDate,
            late_fee: Decimal,
        ) -> Result<u64, PortError> {
            let mut moved = 0;
            for installment in self.installments_of(loan_id).iter_mut() {
                if installment.status == InstallmentStatus::Pending && installment.due_date < cutoff {
                    installment.status = InstallmentStatus::Overdue;
                    installment.late_fee += late_fee;
                    moved += 1;
                }
            }
            Ok(moved)
        }

        async fn commit(self: Box<Self>) -> Result<(), PortError> {
            let MockRepaymentTx { mut guard, working } = *self;
            *guard = working;
            Ok(())
        }
    }

    #[async_trait]
    impl RepaymentPort for MockLendingStore {
        async fn begin(&self) -> Result<Box<dyn RepaymentTx>, PortError> {
            let guard = self.ledger.clone().lock_owned().await;
            let working = guard.clone();
            Ok(Box::new(MockRepaymentTx { guard, working }))
        }

        async fn get_loan(&self, id: LoanId) -> Result<Loan, PortError> {
            self.ledger
                .lock()
                .await
                .loans
                .get(&id)
                .cloned()
                .ok_or_else(|| PortError::not_found("Loan", id))
        }

        async fn loan_for_request(&self, request_id: LoanRequestId) -> Result<Loan, PortError> {
            self.ledger
                .lock()
                .await
                .loans
                .values()
                .find(|l| l.request_id == request_id)
                .cloned()
                .ok_or_else(|| PortError::not_found("Loan for request", request_id))
        }

        async fn installments(&self, loan_id: LoanId) -> Result<Vec<EmiInstallment>, PortError> {
            let mut all = self
                .ledger
                .lock()
                .await
                .installments
                .get(&loan_id)
                .cloned()
                .unwrap_or_default();
            all.sort_by_key(|i| i.sequence);
            Ok(all)
        }

        async fn payments(&self, loan_id: LoanId) -> Result<Vec<Payment>, PortError> {
            Ok(self
                .ledger
                .lock()
                .await
                .payments
                .iter()
                .filter(|p| p.loan_id == loan_id)
                .cloned()
                .collect())
        }

        async fn loans_out_of_step(&self) -> Result<Vec<LoanId>, PortError> {
            let requests = self.requests.read().await;
            let ledger = self.ledger.lock().await;
            let mut ids: Vec<_> = ledger
                .loans
                .values()
                .filter(|loan| {
                    requests
                        .get(&loan.request_id)
                        .map(|request| reconciling_action(loan, request.status).is_some())
                        .unwrap_or(false)
                })
                .map(|loan| loan.id)
                .collect();
            ids.sort_by_key(|id| *id.as_uuid());
            Ok(ids)
        }
    }

    #[async_trait]
    impl PaymentOrderPort for MockLendingStore {
        async fn insert_order(&self, order: &PaymentOrder) -> Result<(), PortError> {
            let mut orders = self.orders.write().await;
            if orders.contains_key(&order.merchant_transaction_id) {
                return Err(PortError::conflict(format!(
                    "order {} already exists",
                    order.merchant_transaction_id
                )));
            }
            orders.insert(order.merchant_transaction_id.clone(), order.clone());
            Ok(())
        }

        async fn order_by_merchant_transaction(&self, merchant_transaction_id: &str) -> Result<PaymentOrder, PortError> {
            self.orders
                .read()
                .await
                .get(merchant_transaction_id)
                .cloned()
                .ok_or_else(|| PortError::not_found("PaymentOrder", merchant_transaction_id))
        }

        async fn update_order(&self, order: &PaymentOrder) -> Result<(), PortError> {
            let mut orders = self.orders.write().await;
            let slot = orders
                .get_mut(&order.merchant_transaction_id)
                .ok_or_else(|| PortError::not_found("PaymentOrder", &order.merchant_transaction_id))?;
            *slot = order.clone();
            Ok(())
        }
    }

    /// In-memory outbox that can be told to refuse jobs
    #[derive(Debug, Default)]
    pub struct MockNotificationQueue {
        jobs: Arc<RwLock<Vec<QueuedNotification>>>,
        fail_enqueue: AtomicBool,
        policy: RetryPolicy,
    }

    impl MockNotificationQueue {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_policy(policy: RetryPolicy) -> Self {
            Self {
                policy,
                ..Default::default()
            }
        }

        /// Makes every subsequent enqueue fail with a connection error
        pub fn fail_enqueues(&self, fail: bool) {
            self.fail_enqueue.store(fail, Ordering::SeqCst);
        }

        pub async fn jobs(&self) -> Vec<QueuedNotification> {
            self.jobs.read().await.clone()
        }
    }

    impl DomainPort for MockNotificationQueue {}

    #[async_trait]
    impl NotificationQueue for MockNotificationQueue {
        async fn enqueue(&self, job: &NotificationJob) -> Result<(), PortError> {
            if self.fail_enqueue.load(Ordering::SeqCst) {
                return Err(PortError::connection("notification queue unavailable"));
            }
            self.jobs.write().await.push(QueuedNotification {
                job: job.clone(),
                status: DeliveryStatus::Queued,
                attempts: 0,
                max_attempts: self.policy.max_attempts,
                next_attempt_at: job.created_at,
                last_error: None,
            });
            Ok(())
        }

        async fn claim_due(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<QueuedNotification>, PortError> {
            Ok(self
                .jobs
                .read()
                .await
                .iter()
                .filter(|q| q.status == DeliveryStatus::Queued && q.next_attempt_at <= now)
                .take(limit as usize)
                .cloned()
                .collect())
        }

        async fn mark_delivered(&self, id: NotificationJobId) -> Result<(), PortError> {
            let mut jobs = self.jobs.write().await;
            let queued = jobs
                .iter_mut()
                .find(|q| q.job.id == id)
                .ok_or_else(|| PortError::not_found("NotificationJob", id))?;
            queued.status = DeliveryStatus::Delivered;
            Ok(())
        }

        async fn mark_failed(
            &self,
            id: NotificationJobId,
            error: &str,
            now: DateTime<Utc>,
        ) -> Result<DeliveryStatus, PortError> {
            let mut jobs = self.jobs.write().await;
            let queued = jobs
                .iter_mut()
                .find(|q| q.job.id == id)
                .ok_or_else(|| PortError::not_found("NotificationJob", id))?;
            queued.attempts += 1;
            queued.last_error = Some(error.to_string());
            match self.policy.next_attempt_at(queued.attempts, now) {
                Some(next) => queued.next_attempt_at = next,
                None => queued.status = DeliveryStatus::Dead,
            }
            Ok(queued.status)
        }
    }
}
