//! Loans, installments, the payment ledger and checkout orders
//!
//! A [`PgRepaymentTx`] wraps one database transaction. `lock_loan` takes the
//! loan row with `SELECT ... FOR UPDATE`, so two units of work over the same
//! loan (a payment and a sweep, or two deliveries of one callback) queue
//! behind each other until the first commits. Installment rows are only ever
//! locked after their loan row.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use tracing::{debug, instrument};
use uuid::Uuid;

use core_kernel::{
    DomainPort, HealthCheckResult, HealthCheckable, InstallmentId, LoanId, LoanRequestId, PartyId,
    PaymentId, PaymentOrderId, PortError, Rate,
};
use domain_lending::{
    EmiInstallment, Loan, Payment, PaymentOrder, PaymentOrderPort, RepaymentPort, RepaymentTx,
};

use super::{from_db_int, parse_column, ping, to_db_int};
use crate::error::DatabaseError;

const LOAN_COLUMNS: &str = "loan_id, request_id, principal, currency, tenure_months, annual_rate, \
     emi_amount, total_paid, paid_installments, overdue_installments, remaining_balance, \
     disbursed_on, first_payment_date, status, created_at, updated_at";

const INSTALLMENT_COLUMNS: &str = "installment_id, loan_id, sequence, due_date, scheduled_amount, \
     principal, interest, remaining_balance, status, paid_at, paid_amount, late_fee";

const PAYMENT_COLUMNS: &str = "payment_id, loan_id, installment_id, amount, method, \
     external_reference, processed_by, created_at";

const ORDER_COLUMNS: &str = "order_id, merchant_transaction_id, loan_id, installment_id, \
     installment_count, amount, status, gateway_transaction_id, created_by, created_at, updated_at";

// ============================================================================
// Rows
// ============================================================================

#[derive(Debug, sqlx::FromRow)]
struct LoanRow {
    loan_id: Uuid,
    request_id: Uuid,
    principal: Decimal,
    currency: String,
    tenure_months: i32,
    annual_rate: Decimal,
    emi_amount: Decimal,
    total_paid: Decimal,
    paid_installments: i32,
    overdue_installments: i32,
    remaining_balance: Decimal,
    disbursed_on: NaiveDate,
    first_payment_date: NaiveDate,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<LoanRow> for Loan {
    type Error = DatabaseError;

    fn try_from(row: LoanRow) -> Result<Self, Self::Error> {
        Ok(Loan {
            id: LoanId::from(row.loan_id),
            request_id: LoanRequestId::from(row.request_id),
            principal: row.principal,
            currency: parse_column("currency", &row.currency)?,
            tenure_months: from_db_int("tenure_months", row.tenure_months)?,
            annual_rate: Rate::annual_percent(row.annual_rate),
            emi_amount: row.emi_amount,
            total_paid: row.total_paid,
            paid_installments: from_db_int("paid_installments", row.paid_installments)?,
            overdue_installments: from_db_int("overdue_installments", row.overdue_installments)?,
            remaining_balance: row.remaining_balance,
            disbursed_on: row.disbursed_on,
            first_payment_date: row.first_payment_date,
            status: parse_column("status", &row.status)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct InstallmentRow {
    installment_id: Uuid,
    loan_id: Uuid,
    sequence: i32,
    due_date: NaiveDate,
    scheduled_amount: Decimal,
    principal: Decimal,
    interest: Decimal,
    remaining_balance: Decimal,
    status: String,
    paid_at: Option<DateTime<Utc>>,
    paid_amount: Option<Decimal>,
    late_fee: Decimal,
}

impl TryFrom<InstallmentRow> for EmiInstallment {
    type Error = DatabaseError;

    fn try_from(row: InstallmentRow) -> Result<Self, Self::Error> {
        Ok(EmiInstallment {
            id: InstallmentId::from(row.installment_id),
            loan_id: LoanId::from(row.loan_id),
            sequence: from_db_int("sequence", row.sequence)?,
            due_date: row.due_date,
            scheduled_amount: row.scheduled_amount,
            principal: row.principal,
            interest: row.interest,
            remaining_balance: row.remaining_balance,
            status: parse_column("status", &row.status)?,
            paid_at: row.paid_at,
            paid_amount: row.paid_amount,
            late_fee: row.late_fee,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PaymentRow {
    payment_id: Uuid,
    loan_id: Uuid,
    installment_id: Uuid,
    amount: Decimal,
    method: String,
    external_reference: String,
    processed_by: Uuid,
    created_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = DatabaseError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        Ok(Payment {
            id: PaymentId::from(row.payment_id),
            loan_id: LoanId::from(row.loan_id),
            installment_id: InstallmentId::from(row.installment_id),
            amount: row.amount,
            method: parse_column("method", &row.method)?,
            external_reference: row.external_reference,
            processed_by: PartyId::from(row.processed_by),
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    order_id: Uuid,
    merchant_transaction_id: String,
    loan_id: Uuid,
    installment_id: Uuid,
    installment_count: i32,
    amount: Decimal,
    status: String,
    gateway_transaction_id: Option<String>,
    created_by: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for PaymentOrder {
    type Error = DatabaseError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        Ok(PaymentOrder {
            id: PaymentOrderId::from(row.order_id),
            merchant_transaction_id: row.merchant_transaction_id,
            loan_id: LoanId::from(row.loan_id),
            installment_id: InstallmentId::from(row.installment_id),
            installment_count: from_db_int("installment_count", row.installment_count)?,
            amount: row.amount,
            status: parse_column("status", &row.status)?,
            gateway_transaction_id: row.gateway_transaction_id,
            created_by: PartyId::from(row.created_by),
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn decode_all<R, T>(rows: Vec<R>) -> Result<Vec<T>, DatabaseError>
where
    T: TryFrom<R, Error = DatabaseError>,
{
    rows.into_iter().map(T::try_from).collect()
}

// ============================================================================
// Shared statements
// ============================================================================

/// Inserts a new loan with its full schedule
///
/// The unique key on `loans.request_id` turns a second origination for the
/// same request into `DuplicateEntry`.
pub(crate) async fn insert_loan(
    conn: &mut PgConnection,
    loan: &Loan,
    installments: &[EmiInstallment],
) -> Result<(), DatabaseError> {
    sqlx::query(
        r#"
        INSERT INTO loans (
            loan_id, request_id, principal, currency, tenure_months, annual_rate,
            emi_amount, total_paid, paid_installments, overdue_installments,
            remaining_balance, disbursed_on, first_payment_date, status, created_at, updated_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
        "#,
    )
    .bind(Uuid::from(loan.id))
    .bind(Uuid::from(loan.request_id))
    .bind(loan.principal)
    .bind(loan.currency.code())
    .bind(to_db_int("tenure_months", loan.tenure_months)?)
    .bind(loan.annual_rate.as_percentage())
    .bind(loan.emi_amount)
    .bind(loan.total_paid)
    .bind(to_db_int("paid_installments", loan.paid_installments)?)
    .bind(to_db_int("overdue_installments", loan.overdue_installments)?)
    .bind(loan.remaining_balance)
    .bind(loan.disbursed_on)
    .bind(loan.first_payment_date)
    .bind(loan.status.as_str())
    .bind(loan.created_at)
    .bind(loan.updated_at)
    .execute(&mut *conn)
    .await?;

    for installment in installments {
        sqlx::query(
            r#"
            INSERT INTO emi_installments (
                installment_id, loan_id, sequence, due_date, scheduled_amount, principal,
                interest, remaining_balance, status, paid_at, paid_amount, late_fee
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(Uuid::from(installment.id))
        .bind(Uuid::from(installment.loan_id))
        .bind(to_db_int("sequence", installment.sequence)?)
        .bind(installment.due_date)
        .bind(installment.scheduled_amount)
        .bind(installment.principal)
        .bind(installment.interest)
        .bind(installment.remaining_balance)
        .bind(installment.status.as_str())
        .bind(installment.paid_at)
        .bind(installment.paid_amount)
        .bind(installment.late_fee)
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

/// Marks the request's loan and its open installments defaulted
pub(crate) async fn mark_defaulted(
    conn: &mut PgConnection,
    request_id: LoanRequestId,
    at: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    let loan_id: Option<Uuid> = sqlx::query_scalar(
        "UPDATE loans SET status = 'defaulted', updated_at = $2 WHERE request_id = $1 RETURNING loan_id",
    )
    .bind(Uuid::from(request_id))
    .bind(at)
    .fetch_optional(&mut *conn)
    .await?;
    let loan_id = loan_id.ok_or_else(|| DatabaseError::not_found("Loan", request_id))?;

    sqlx::query(
        "UPDATE emi_installments SET status = 'defaulted' WHERE loan_id = $1 AND status IN ('pending', 'overdue')",
    )
    .bind(loan_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

// ============================================================================
// Store
// ============================================================================

/// PostgreSQL-backed [`RepaymentPort`] and [`PaymentOrderPort`]
#[derive(Debug, Clone)]
pub struct PgRepaymentStore {
    pool: PgPool,
}

impl PgRepaymentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl DomainPort for PgRepaymentStore {}

#[async_trait]
impl HealthCheckable for PgRepaymentStore {
    async fn health_check(&self) -> HealthCheckResult {
        ping(&self.pool, "postgres-repayment-store").await
    }
}

#[async_trait]
impl RepaymentPort for PgRepaymentStore {
    async fn begin(&self) -> Result<Box<dyn RepaymentTx>, PortError> {
        let tx = self.pool.begin().await.map_err(DatabaseError::from)?;
        Ok(Box::new(PgRepaymentTx { tx }))
    }

    #[instrument(skip(self), fields(loan_id = %id))]
    async fn get_loan(&self, id: LoanId) -> Result<Loan, PortError> {
        let row: Option<LoanRow> = sqlx::query_as(&format!("SELECT {} FROM loans WHERE loan_id = $1", LOAN_COLUMNS))
            .bind(Uuid::from(id))
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from)?;
        let row = row.ok_or_else(|| DatabaseError::not_found("Loan", id))?;
        Ok(Loan::try_from(row)?)
    }

    #[instrument(skip(self), fields(request_id = %request_id))]
    async fn loan_for_request(&self, request_id: LoanRequestId) -> Result<Loan, PortError> {
        let row: Option<LoanRow> =
            sqlx::query_as(&format!("SELECT {} FROM loans WHERE request_id = $1", LOAN_COLUMNS))
                .bind(Uuid::from(request_id))
                .fetch_optional(&self.pool)
                .await
                .map_err(DatabaseError::from)?;
        let row = row.ok_or_else(|| DatabaseError::not_found("Loan", request_id))?;
        Ok(Loan::try_from(row)?)
    }

    async fn installments(&self, loan_id: LoanId) -> Result<Vec<EmiInstallment>, PortError> {
        let rows: Vec<InstallmentRow> = sqlx::query_as(&format!(
            "SELECT {} FROM emi_installments WHERE loan_id = $1 ORDER BY sequence",
            INSTALLMENT_COLUMNS
        ))
        .bind(Uuid::from(loan_id))
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from)?;
        Ok(decode_all(rows)?)
    }

    async fn payments(&self, loan_id: LoanId) -> Result<Vec<Payment>, PortError> {
        let rows: Vec<PaymentRow> = sqlx::query_as(&format!(
            "SELECT {} FROM payments WHERE loan_id = $1 ORDER BY created_at, payment_id",
            PAYMENT_COLUMNS
        ))
        .bind(Uuid::from(loan_id))
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from)?;
        Ok(decode_all(rows)?)
    }

    async fn loans_out_of_step(&self) -> Result<Vec<LoanId>, PortError> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT l.loan_id
            FROM loans l
            JOIN loan_requests r ON r.request_id = l.request_id
            WHERE (l.status = 'active' AND l.overdue_installments > 0 AND r.status = 'amount_disbursed')
               OR (l.status = 'active' AND l.overdue_installments = 0 AND r.status = 'payment_overdue')
               OR (l.status = 'completed' AND r.status IN ('amount_disbursed', 'payment_overdue'))
            ORDER BY l.loan_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from)?;
        debug!(count = ids.len(), "Loans out of step with their requests");
        Ok(ids.into_iter().map(LoanId::from).collect())
    }
}

#[async_trait]
impl PaymentOrderPort for PgRepaymentStore {
    async fn insert_order(&self, order: &PaymentOrder) -> Result<(), PortError> {
        sqlx::query(
            r#"
            INSERT INTO payment_orders (
                order_id, merchant_transaction_id, loan_id, installment_id, installment_count,
                amount, status, gateway_transaction_id, created_by, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(Uuid::from(order.id))
        .bind(&order.merchant_transaction_id)
        .bind(Uuid::from(order.loan_id))
        .bind(Uuid::from(order.installment_id))
        .bind(to_db_int("installment_count", order.installment_count)?)
        .bind(order.amount)
        .bind(order.status.as_str())
        .bind(&order.gateway_transaction_id)
        .bind(Uuid::from(order.created_by))
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from)?;
        Ok(())
    }

    async fn order_by_merchant_transaction(&self, merchant_transaction_id: &str) -> Result<PaymentOrder, PortError> {
        let row: Option<OrderRow> = sqlx::query_as(&format!(
            "SELECT {} FROM payment_orders WHERE merchant_transaction_id = $1",
            ORDER_COLUMNS
        ))
        .bind(merchant_transaction_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from)?;
        let row = row.ok_or_else(|| DatabaseError::not_found("PaymentOrder", merchant_transaction_id))?;
        Ok(PaymentOrder::try_from(row)?)
    }

    async fn update_order(&self, order: &PaymentOrder) -> Result<(), PortError> {
        let result = sqlx::query(
            "UPDATE payment_orders SET status = $2, gateway_transaction_id = $3, updated_at = $4 WHERE order_id = $1",
        )
        .bind(Uuid::from(order.id))
        .bind(order.status.as_str())
        .bind(&order.gateway_transaction_id)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::not_found("PaymentOrder", order.id).into());
        }
        Ok(())
    }
}

// ============================================================================
// Unit of work
// ============================================================================

/// One database transaction over the repayment tables
///
/// Dropping it without `commit` rolls the transaction back.
pub struct PgRepaymentTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl RepaymentTx for PgRepaymentTx {
    #[instrument(skip(self), fields(loan_id = %loan_id))]
    async fn lock_loan(&mut self, loan_id: LoanId) -> Result<Loan, PortError> {
        let row: Option<LoanRow> = sqlx::query_as(&format!(
            "SELECT {} FROM loans WHERE loan_id = $1 FOR UPDATE",
            LOAN_COLUMNS
        ))
        .bind(Uuid::from(loan_id))
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(DatabaseError::from)?;
        let row = row.ok_or_else(|| DatabaseError::not_found("Loan", loan_id))?;
        debug!("Loan row locked");
        Ok(Loan::try_from(row)?)
    }

    async fn payments_by_reference(&mut self, external_reference: &str) -> Result<Vec<Payment>, PortError> {
        let rows: Vec<PaymentRow> = sqlx::query_as(&format!(
            "SELECT {} FROM payments WHERE external_reference = $1 ORDER BY created_at, payment_id",
            PAYMENT_COLUMNS
        ))
        .bind(external_reference)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(DatabaseError::from)?;
        Ok(decode_all(rows)?)
    }

    async fn open_installments(&mut self, loan_id: LoanId) -> Result<Vec<EmiInstallment>, PortError> {
        let rows: Vec<InstallmentRow> = sqlx::query_as(&format!(
            "SELECT {} FROM emi_installments \
             WHERE loan_id = $1 AND status IN ('pending', 'overdue') \
             ORDER BY due_date, sequence FOR UPDATE",
            INSTALLMENT_COLUMNS
        ))
        .bind(Uuid::from(loan_id))
        .fetch_all(&mut *self.tx)
        .await
        .map_err(DatabaseError::from)?;
        Ok(decode_all(rows)?)
    }

    async fn installments(&mut self, loan_id: LoanId) -> Result<Vec<EmiInstallment>, PortError> {
        let rows: Vec<InstallmentRow> = sqlx::query_as(&format!(
            "SELECT {} FROM emi_installments WHERE loan_id = $1 ORDER BY sequence",
            INSTALLMENT_COLUMNS
        ))
        .bind(Uuid::from(loan_id))
        .fetch_all(&mut *self.tx)
        .await
        .map_err(DatabaseError::from)?;
        Ok(decode_all(rows)?)
    }

    async fn save_installment(&mut self, installment: &EmiInstallment) -> Result<(), PortError> {
        sqlx::query(
            r#"
            UPDATE emi_installments
            SET status = $2, paid_at = $3, paid_amount = $4, late_fee = $5
            WHERE installment_id = $1
            "#,
        )
        .bind(Uuid::from(installment.id))
        .bind(installment.status.as_str())
        .bind(installment.paid_at)
        .bind(installment.paid_amount)
        .bind(installment.late_fee)
        .execute(&mut *self.tx)
        .await
        .map_err(DatabaseError::from)?;
        Ok(())
    }

    async fn insert_payment(&mut self, payment: &Payment) -> Result<(), PortError> {
        sqlx::query(
            r#"
            INSERT INTO payments (
                payment_id, loan_id, installment_id, amount, method,
                external_reference, processed_by, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(Uuid::from(payment.id))
        .bind(Uuid::from(payment.loan_id))
        .bind(Uuid::from(payment.installment_id))
        .bind(payment.amount)
        .bind(payment.method.as_str())
        .bind(&payment.external_reference)
        .bind(Uuid::from(payment.processed_by))
        .bind(payment.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(DatabaseError::from)?;
        Ok(())
    }

    async fn save_loan(&mut self, loan: &Loan) -> Result<(), PortError> {
        sqlx::query(
            r#"
            UPDATE loans
            SET total_paid = $2, paid_installments = $3, overdue_installments = $4,
                remaining_balance = $5, status = $6, updated_at = $7
            WHERE loan_id = $1
            "#,
        )
        .bind(Uuid::from(loan.id))
        .bind(loan.total_paid)
        .bind(to_db_int("paid_installments", loan.paid_installments)?)
        .bind(to_db_int("overdue_installments", loan.overdue_installments)?)
        .bind(loan.remaining_balance)
        .bind(loan.status.as_str())
        .bind(loan.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(DatabaseError::from)?;
        Ok(())
    }

    async fn loans_with_pending_due_before(&mut self, cutoff: NaiveDate) -> Result<Vec<LoanId>, PortError> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT i.loan_id
            FROM emi_installments i
            JOIN loans l ON l.loan_id = i.loan_id
            WHERE i.status = 'pending' AND i.due_date < $1 AND l.status = 'active'
            ORDER BY i.loan_id
            "#,
        )
        .bind(cutoff)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(DatabaseError::from)?;
        Ok(ids.into_iter().map(LoanId::from).collect())
    }

    async fn mark_overdue(
        &mut self,
        loan_id: LoanId,
        cutoff: NaiveDate,
        late_fee: Decimal,
    ) -> Result<u64, PortError> {
        let result = sqlx::query(
            r#"
            UPDATE emi_installments
            SET status = 'overdue', late_fee = late_fee + $3
            WHERE loan_id = $1 AND status = 'pending' AND due_date < $2
            "#,
        )
        .bind(Uuid::from(loan_id))
        .bind(cutoff)
        .bind(late_fee)
        .execute(&mut *self.tx)
        .await
        .map_err(DatabaseError::from)?;
        Ok(result.rows_affected())
    }

    async fn commit(self: Box<Self>) -> Result<(), PortError> {
        self.tx.commit().await.map_err(DatabaseError::from)?;
        Ok(())
    }
}
