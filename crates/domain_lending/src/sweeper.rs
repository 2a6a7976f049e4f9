//! Overdue sweep
//!
//! Moves pending installments past their grace period to overdue and
//! re-derives each affected loan's aggregates from a fresh read inside the
//! same transaction. Only one sweep runs at a time per sweeper; an invocation
//! that finds another in flight returns [`SweepOutcome::Skipped`].
//!
//! After the marking transaction commits, every loan it touched and every
//! active or completed loan whose request status disagrees with it is
//! synced, so a cascade lost to a race or a storage failure is repaired on
//! the next run.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use core_kernel::{grace_cutoff, LoanId};

use crate::error::LendingError;
use crate::events::{EventBus, LendingEvent};
use crate::ports::RepaymentPort;
use crate::retry::{retry_on_conflict, DEFAULT_CONFLICT_ATTEMPTS};
use crate::status_sync::StatusSync;
use crate::workflow::WorkflowEngine;

/// Sweep schedule and assessment settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweeperConfig {
    pub interval: Duration,
    pub grace_period_days: u32,
    /// Flat fee added to each installment when it becomes overdue
    pub late_fee: Decimal,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(6 * 60 * 60),
            grace_period_days: 3,
            late_fee: Decimal::ZERO,
        }
    }
}

/// What one sweep changed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub cutoff: Option<NaiveDate>,
    /// Loans that had at least one installment marked overdue
    pub loans_updated: usize,
    pub installments_marked: u64,
    /// Loans that went from no overdue installment to at least one
    pub newly_overdue_loans: Vec<LoanId>,
    /// Loans whose request status was moved to match the loan
    pub requests_synced: Vec<LoanId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SweepOutcome {
    Completed(SweepReport),
    /// Another sweep was already running
    Skipped,
}

struct LoanSweep {
    loan_id: LoanId,
    marked: u64,
    overdue_installments: u32,
    newly_overdue: bool,
}

pub struct OverdueSweeper {
    repayments: Arc<dyn RepaymentPort>,
    sync: StatusSync,
    events: EventBus,
    config: SweeperConfig,
    in_flight: Mutex<()>,
    conflict_retry_attempts: u32,
}

impl OverdueSweeper {
    pub fn new(
        repayments: Arc<dyn RepaymentPort>,
        engine: Arc<WorkflowEngine>,
        events: EventBus,
        config: SweeperConfig,
    ) -> Self {
        Self {
            sync: StatusSync::new(repayments.clone(), engine),
            repayments,
            events,
            config,
            in_flight: Mutex::new(()),
            conflict_retry_attempts: DEFAULT_CONFLICT_ATTEMPTS,
        }
    }

    pub fn config(&self) -> &SweeperConfig {
        &self.config
    }

    /// Runs one sweep as of `now`
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<SweepOutcome, LendingError> {
        let _guard = match self.in_flight.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                tracing::debug!("Overdue sweep already in flight, skipping");
                return Ok(SweepOutcome::Skipped);
            }
        };

        let cutoff = grace_cutoff(now, self.config.grace_period_days);
        let swept = retry_on_conflict(self.conflict_retry_attempts, move || self.sweep(cutoff, now)).await?;

        let mut report = SweepReport {
            cutoff: Some(cutoff),
            loans_updated: swept.len(),
            ..Default::default()
        };
        for loan in &swept {
            report.installments_marked += loan.marked;
            self.events.publish(LendingEvent::InstallmentsOverdue {
                loan_id: loan.loan_id,
                newly_overdue: loan.marked,
                overdue_installments: loan.overdue_installments,
                at: now,
            });
            if loan.newly_overdue {
                report.newly_overdue_loans.push(loan.loan_id);
            }
            if self.sync.sync_logged(loan.loan_id).await {
                report.requests_synced.push(loan.loan_id);
            }
        }

        let out_of_step = self.repayments.loans_out_of_step().await?;
        for loan_id in out_of_step {
            if self.sync.sync_logged(loan_id).await {
                tracing::info!(loan_id = %loan_id, "Repaired request status left behind by an earlier cascade");
                report.requests_synced.push(loan_id);
            }
        }

        tracing::info!(
            cutoff = %cutoff,
            loans = report.loans_updated,
            installments = report.installments_marked,
            newly_overdue = report.newly_overdue_loans.len(),
            synced = report.requests_synced.len(),
            "Overdue sweep completed"
        );
        Ok(SweepOutcome::Completed(report))
    }

    async fn sweep(&self, cutoff: NaiveDate, now: DateTime<Utc>) -> Result<Vec<LoanSweep>, LendingError> {
        let mut tx = self.repayments.begin().await?;
        let loan_ids = tx.loans_with_pending_due_before(cutoff).await?;

        let mut swept = Vec::with_capacity(loan_ids.len());
        for loan_id in loan_ids {
            let mut loan = tx.lock_loan(loan_id).await?;
            let marked = tx.mark_overdue(loan_id, cutoff, self.config.late_fee).await?;
            if marked == 0 {
                continue;
            }

            let prior_overdue = loan.overdue_installments;
            let installments = tx.installments(loan_id).await?;
            loan.recompute(&installments, now);
            tx.save_loan(&loan).await?;

            swept.push(LoanSweep {
                loan_id,
                marked,
                overdue_installments: loan.overdue_installments,
                newly_overdue: prior_overdue == 0 && loan.overdue_installments > 0,
            });
        }

        tx.commit().await?;
        Ok(swept)
    }
}

/// Handle to a running sweeper task
pub struct SweeperHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Signals the task and waits for it to finish its current sweep
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Err(error) = self.task.await {
            tracing::error!(error = %error, "Overdue sweeper task panicked");
        }
    }
}

/// Starts the periodic sweep on the current runtime
pub fn spawn_sweeper(sweeper: Arc<OverdueSweeper>) -> SweeperHandle {
    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
    let period = sweeper.config.interval.max(Duration::from_secs(1));

    let task = tokio::spawn(async move {
        let mut timer = interval(period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(interval_secs = period.as_secs(), "Overdue sweeper started");

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Overdue sweeper received shutdown signal");
                    break;
                }
                _ = timer.tick() => {
                    if let Err(error) = sweeper.run_once(Utc::now()).await {
                        tracing::error!(error = %error, "Overdue sweep failed");
                    }
                }
            }
        }

        tracing::info!("Overdue sweeper stopped");
    });

    SweeperHandle { shutdown_tx, task }
}
