//! Notification outbox
//!
//! Claiming a job pushes its `next_attempt_at` forward by the lease, so two
//! dispatchers polling at once never receive the same job. A dispatcher that
//! dies mid-delivery releases the job when the lease runs out.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use core_kernel::{DomainPort, HealthCheckResult, HealthCheckable, NotificationJobId, PortError};
use domain_lending::{DeliveryStatus, NotificationJob, NotificationQueue, QueuedNotification, RetryPolicy};

use super::{from_db_int, parse_column, ping, to_db_int};
use crate::error::DatabaseError;

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    job_id: Uuid,
    template: String,
    channel: String,
    variables: Json<serde_json::Map<String, serde_json::Value>>,
    status: String,
    attempts: i32,
    max_attempts: i32,
    next_attempt_at: DateTime<Utc>,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for QueuedNotification {
    type Error = DatabaseError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        Ok(QueuedNotification {
            job: NotificationJob {
                id: NotificationJobId::from(row.job_id),
                template: row.template,
                channel: parse_column("channel", &row.channel)?,
                variables: row.variables.0,
                created_at: row.created_at,
            },
            status: parse_column("status", &row.status)?,
            attempts: from_db_int("attempts", row.attempts)?,
            max_attempts: from_db_int("max_attempts", row.max_attempts)?,
            next_attempt_at: row.next_attempt_at,
            last_error: row.last_error,
        })
    }
}

/// PostgreSQL-backed [`NotificationQueue`]
#[derive(Debug, Clone)]
pub struct PgNotificationQueue {
    pool: PgPool,
    policy: RetryPolicy,
    lease: Duration,
}

impl PgNotificationQueue {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            policy: RetryPolicy::default(),
            lease: Duration::from_secs(60),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// How long a claimed job stays invisible to other claimants
    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }
}

impl DomainPort for PgNotificationQueue {}

#[async_trait]
impl HealthCheckable for PgNotificationQueue {
    async fn health_check(&self) -> HealthCheckResult {
        ping(&self.pool, "postgres-notification-queue").await
    }
}

#[async_trait]
impl NotificationQueue for PgNotificationQueue {
    #[instrument(skip(self, job), fields(job_id = %job.id, template = %job.template))]
    async fn enqueue(&self, job: &NotificationJob) -> Result<(), PortError> {
        sqlx::query(
            r#"
            INSERT INTO notification_jobs (
                job_id, template, channel, variables, status, attempts, max_attempts,
                next_attempt_at, last_error, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, 'queued', 0, $5, $6, NULL, $6, $6)
            "#,
        )
        .bind(Uuid::from(job.id))
        .bind(&job.template)
        .bind(job.channel.as_str())
        .bind(Json(&job.variables))
        .bind(to_db_int("max_attempts", self.policy.max_attempts)?)
        .bind(job.created_at)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        debug!("Notification job queued");
        Ok(())
    }

    async fn claim_due(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<QueuedNotification>, PortError> {
        let lease = chrono::Duration::from_std(self.lease)
            .map_err(|e| PortError::internal(format!("invalid lease: {}", e)))?;

        // RETURNING yields the leased next_attempt_at; report the claim time instead
        let rows: Vec<JobRow> = sqlx::query_as(
            r#"
            UPDATE notification_jobs
            SET next_attempt_at = $2, updated_at = $1
            WHERE job_id IN (
                SELECT job_id FROM notification_jobs
                WHERE status = 'queued' AND next_attempt_at <= $1
                ORDER BY next_attempt_at, created_at
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            RETURNING job_id, template, channel, variables, status, attempts, max_attempts,
                      $1 AS next_attempt_at, last_error, created_at
            "#,
        )
        .bind(now)
        .bind(now + lease)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        let mut claimed = rows
            .into_iter()
            .map(QueuedNotification::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        claimed.sort_by_key(|q| q.job.created_at);

        if !claimed.is_empty() {
            debug!(count = claimed.len(), "Claimed notification jobs");
        }
        Ok(claimed)
    }

    async fn mark_delivered(&self, id: NotificationJobId) -> Result<(), PortError> {
        let result = sqlx::query(
            "UPDATE notification_jobs SET status = 'delivered', updated_at = now() WHERE job_id = $1",
        )
        .bind(Uuid::from(id))
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::not_found("NotificationJob", id).into());
        }
        Ok(())
    }

    #[instrument(skip(self, error), fields(job_id = %id))]
    async fn mark_failed(
        &self,
        id: NotificationJobId,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<DeliveryStatus, PortError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from)?;

        let attempts: Option<i32> =
            sqlx::query_scalar("SELECT attempts FROM notification_jobs WHERE job_id = $1 FOR UPDATE")
                .bind(Uuid::from(id))
                .fetch_optional(&mut *tx)
                .await
                .map_err(DatabaseError::from)?;
        let attempts = attempts.ok_or_else(|| DatabaseError::not_found("NotificationJob", id))?;
        let attempts = from_db_int("attempts", attempts)?.saturating_add(1);

        let (status, next_attempt_at) = match self.policy.next_attempt_at(attempts, now) {
            Some(next) => (DeliveryStatus::Queued, next),
            None => (DeliveryStatus::Dead, now),
        };

        sqlx::query(
            r#"
            UPDATE notification_jobs
            SET attempts = $2, status = $3, next_attempt_at = $4, last_error = $5, updated_at = $6
            WHERE job_id = $1
            "#,
        )
        .bind(Uuid::from(id))
        .bind(to_db_int("attempts", attempts)?)
        .bind(status.as_str())
        .bind(next_attempt_at)
        .bind(error)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(DatabaseError::from)?;

        tx.commit().await.map_err(DatabaseError::from)?;

        if status == DeliveryStatus::Dead {
            warn!(attempts, error, "Notification job abandoned");
        }
        Ok(status)
    }
}
