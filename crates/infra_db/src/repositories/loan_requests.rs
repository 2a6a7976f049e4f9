//! Loan requests and their workflow history

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};
use tracing::{debug, instrument};
use uuid::Uuid;

use core_kernel::{
    DomainPort, HealthCheckResult, HealthCheckable, HistoryEntryId, LoanRequestId, PartyId, PortError,
};
use domain_lending::workflow::{CommittedTransition, LoanEffect};
use domain_lending::{
    BankDetails, ContactDetails, HistoryEntry, LoanRequest, LoanRequestPort, OfferTerms, RequestQuery,
};

use super::repayments::{insert_loan, mark_defaulted};
use super::{from_db_int, parse_column, ping, to_db_int};
use crate::error::DatabaseError;

const REQUEST_COLUMNS: &str = "request_id, customer_id, requested_amount, currency, asset_descriptor, \
     district, status, offer_amount, offer_tenure_months, offer_annual_rate, assigned_agent_id, \
     inspection_date, bank_details, contact, created_at, updated_at";

const DEFAULT_PAGE_SIZE: i64 = 50;

#[derive(Debug, sqlx::FromRow)]
struct RequestRow {
    request_id: Uuid,
    customer_id: Uuid,
    requested_amount: Decimal,
    currency: String,
    asset_descriptor: String,
    district: String,
    status: String,
    offer_amount: Option<Decimal>,
    offer_tenure_months: Option<i32>,
    offer_annual_rate: Option<Decimal>,
    assigned_agent_id: Option<Uuid>,
    inspection_date: Option<DateTime<Utc>>,
    bank_details: Option<Json<BankDetails>>,
    contact: Json<ContactDetails>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<RequestRow> for LoanRequest {
    type Error = DatabaseError;

    fn try_from(row: RequestRow) -> Result<Self, Self::Error> {
        let offer = match (row.offer_amount, row.offer_tenure_months, row.offer_annual_rate) {
            (Some(amount), Some(tenure), Some(annual_rate)) => Some(OfferTerms {
                amount,
                tenure_months: from_db_int("offer_tenure_months", tenure)?,
                annual_rate,
            }),
            (None, None, None) => None,
            _ => return Err(DatabaseError::decode("offer", "partially stored offer terms")),
        };

        Ok(LoanRequest {
            id: LoanRequestId::from(row.request_id),
            customer_id: PartyId::from(row.customer_id),
            requested_amount: row.requested_amount,
            currency: parse_column("currency", &row.currency)?,
            asset_descriptor: row.asset_descriptor,
            district: row.district,
            status: parse_column("status", &row.status)?,
            offer,
            assigned_agent_id: row.assigned_agent_id.map(PartyId::from),
            inspection_date: row.inspection_date,
            bank_details: row.bank_details.map(|Json(details)| details),
            contact: row.contact.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct HistoryRow {
    entry_id: Uuid,
    request_id: Uuid,
    action: String,
    actor_id: Uuid,
    actor_role: String,
    prior_status: Option<String>,
    next_status: String,
    occurred_at: DateTime<Utc>,
    metadata: serde_json::Value,
}

impl TryFrom<HistoryRow> for HistoryEntry {
    type Error = DatabaseError;

    fn try_from(row: HistoryRow) -> Result<Self, Self::Error> {
        let prior_status = match row.prior_status {
            Some(status) => Some(parse_column("prior_status", &status)?),
            None => None,
        };
        Ok(HistoryEntry {
            id: HistoryEntryId::from(row.entry_id),
            request_id: LoanRequestId::from(row.request_id),
            action: parse_column("action", &row.action)?,
            actor_id: PartyId::from(row.actor_id),
            actor_role: parse_column("actor_role", &row.actor_role)?,
            prior_status,
            next_status: parse_column("next_status", &row.next_status)?,
            timestamp: row.occurred_at,
            metadata: row.metadata,
        })
    }
}

async fn insert_history(conn: &mut PgConnection, entry: &HistoryEntry) -> Result<(), DatabaseError> {
    sqlx::query(
        r#"
        INSERT INTO request_history (
            entry_id, request_id, action, actor_id, actor_role,
            prior_status, next_status, occurred_at, metadata
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(Uuid::from(entry.id))
    .bind(Uuid::from(entry.request_id))
    .bind(entry.action.as_str())
    .bind(Uuid::from(entry.actor_id))
    .bind(entry.actor_role.as_str())
    .bind(entry.prior_status.map(|s| s.as_str()))
    .bind(entry.next_status.as_str())
    .bind(entry.timestamp)
    .bind(&entry.metadata)
    .execute(conn)
    .await?;
    Ok(())
}

/// PostgreSQL-backed [`LoanRequestPort`]
#[derive(Debug, Clone)]
pub struct PgLoanRequestStore {
    pool: PgPool,
}

impl PgLoanRequestStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl DomainPort for PgLoanRequestStore {}

#[async_trait]
impl HealthCheckable for PgLoanRequestStore {
    async fn health_check(&self) -> HealthCheckResult {
        ping(&self.pool, "postgres-loan-request-store").await
    }
}

#[async_trait]
impl LoanRequestPort for PgLoanRequestStore {
    #[instrument(skip(self, request, entry), fields(request_id = %request.id))]
    async fn insert_request(&self, request: &LoanRequest, entry: &HistoryEntry) -> Result<(), PortError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from)?;
        let offer = request.offer.as_ref();

        sqlx::query(
            r#"
            INSERT INTO loan_requests (
                request_id, customer_id, requested_amount, currency, asset_descriptor, district,
                status, offer_amount, offer_tenure_months, offer_annual_rate, assigned_agent_id,
                inspection_date, bank_details, contact, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(Uuid::from(request.id))
        .bind(Uuid::from(request.customer_id))
        .bind(request.requested_amount)
        .bind(request.currency.code())
        .bind(&request.asset_descriptor)
        .bind(&request.district)
        .bind(request.status.as_str())
        .bind(offer.map(|o| o.amount))
        .bind(offer.map(|o| to_db_int("offer_tenure_months", o.tenure_months)).transpose()?)
        .bind(offer.map(|o| o.annual_rate))
        .bind(request.assigned_agent_id.map(Uuid::from))
        .bind(request.inspection_date)
        .bind(request.bank_details.as_ref().map(Json))
        .bind(Json(&request.contact))
        .bind(request.created_at)
        .bind(request.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(DatabaseError::from)?;

        insert_history(&mut tx, entry).await?;
        tx.commit().await.map_err(DatabaseError::from)?;

        debug!("Loan request stored");
        Ok(())
    }

    #[instrument(skip(self), fields(request_id = %id))]
    async fn get_request(&self, id: LoanRequestId) -> Result<LoanRequest, PortError> {
        let row: Option<RequestRow> =
            sqlx::query_as(&format!("SELECT {} FROM loan_requests WHERE request_id = $1", REQUEST_COLUMNS))
                .bind(Uuid::from(id))
                .fetch_optional(&self.pool)
                .await
                .map_err(DatabaseError::from)?;
        let row = row.ok_or_else(|| DatabaseError::not_found("LoanRequest", id))?;
        Ok(LoanRequest::try_from(row)?)
    }

    async fn list_requests(&self, query: &RequestQuery) -> Result<Vec<LoanRequest>, PortError> {
        let districts: Option<Vec<String>> = query
            .districts
            .as_ref()
            .map(|ds| ds.iter().map(|d| d.to_lowercase()).collect());

        let rows: Vec<RequestRow> = sqlx::query_as(&format!(
            r#"
            SELECT {}
            FROM loan_requests
            WHERE ($1::uuid IS NULL OR customer_id = $1)
              AND ($2::uuid IS NULL OR assigned_agent_id = $2)
              AND ($3::text[] IS NULL OR lower(district) = ANY($3))
              AND ($4::text IS NULL OR status = $4)
            ORDER BY created_at DESC, request_id
            LIMIT $5 OFFSET $6
            "#,
            REQUEST_COLUMNS
        ))
        .bind(query.customer_id.map(Uuid::from))
        .bind(query.assigned_agent_id.map(Uuid::from))
        .bind(districts)
        .bind(query.status.map(|s| s.as_str()))
        .bind(query.limit.map(i64::from).unwrap_or(DEFAULT_PAGE_SIZE))
        .bind(query.offset.map(i64::from).unwrap_or(0))
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        debug!(count = rows.len(), "Listed loan requests");
        Ok(rows
            .into_iter()
            .map(LoanRequest::try_from)
            .collect::<Result<Vec<_>, _>>()?)
    }

    /// Writes the new request state only while the stored status still
    /// equals `prior_status`; a lost race surfaces as `Conflict`
    #[instrument(
        skip(self, transition),
        fields(request_id = %transition.request.id, action = %transition.entry.action)
    )]
    async fn record_transition(&self, transition: &CommittedTransition) -> Result<(), PortError> {
        let request = &transition.request;
        let offer = request.offer.as_ref();
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from)?;

        let updated = sqlx::query(
            r#"
            UPDATE loan_requests
            SET status = $3, offer_amount = $4, offer_tenure_months = $5, offer_annual_rate = $6,
                assigned_agent_id = $7, inspection_date = $8, bank_details = $9, updated_at = $10
            WHERE request_id = $1 AND status = $2
            "#,
        )
        .bind(Uuid::from(request.id))
        .bind(transition.prior_status.as_str())
        .bind(request.status.as_str())
        .bind(offer.map(|o| o.amount))
        .bind(offer.map(|o| to_db_int("offer_tenure_months", o.tenure_months)).transpose()?)
        .bind(offer.map(|o| o.annual_rate))
        .bind(request.assigned_agent_id.map(Uuid::from))
        .bind(request.inspection_date)
        .bind(request.bank_details.as_ref().map(Json))
        .bind(request.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(DatabaseError::from)?;

        if updated.rows_affected() == 0 {
            let current: Option<String> =
                sqlx::query_scalar("SELECT status FROM loan_requests WHERE request_id = $1")
                    .bind(Uuid::from(request.id))
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(DatabaseError::from)?;
            return Err(match current {
                None => PortError::not_found("LoanRequest", request.id),
                Some(status) => PortError::conflict(format!(
                    "request {} moved to {} concurrently",
                    request.id, status
                )),
            });
        }

        insert_history(&mut tx, &transition.entry).await?;

        match &transition.effect {
            Some(LoanEffect::Originate { loan, installments }) => {
                insert_loan(&mut tx, loan, installments).await?;
                debug!(loan_id = %loan.id, installments = installments.len(), "Loan originated");
            }
            Some(LoanEffect::MarkDefaulted { at }) => {
                mark_defaulted(&mut tx, request.id, *at).await?;
            }
            None => {}
        }

        tx.commit().await.map_err(DatabaseError::from)?;
        Ok(())
    }

    async fn history(&self, id: LoanRequestId) -> Result<Vec<HistoryEntry>, PortError> {
        let rows: Vec<HistoryRow> = sqlx::query_as(
            r#"
            SELECT entry_id, request_id, action, actor_id, actor_role,
                   prior_status, next_status, occurred_at, metadata
            FROM request_history
            WHERE request_id = $1
            ORDER BY occurred_at, entry_id
            "#,
        )
        .bind(Uuid::from(id))
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        Ok(rows
            .into_iter()
            .map(HistoryEntry::try_from)
            .collect::<Result<Vec<_>, _>>()?)
    }
}
