//! Background sweep over orders still waiting on something external.

use std::sync::Arc;
use std::time::{Duration, Instant};

use domain::OrderState;
use event_store::EventStore;
use projections::{DueAction, ProjectionProcessor, ReconciliationQueue};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::coordinator::Reconciler;
use crate::error::Result;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub examined: usize,
    /// Moved to another state or had their compensation done.
    pub advanced: usize,
    /// Still waiting, e.g. no settlement yet.
    pub unchanged: usize,
    /// Lost a race with another actor.
    pub skipped: usize,
    pub failed: usize,
}

pub struct Sweeper<S: EventStore, R: Reconciler> {
    reconciler: Arc<R>,
    projections: Arc<ProjectionProcessor<S>>,
    queue: ReconciliationQueue,
}

impl<S: EventStore, R: Reconciler> Sweeper<S, R> {
    /// `queue` must be registered with `projections`.
    pub fn new(
        reconciler: Arc<R>,
        projections: Arc<ProjectionProcessor<S>>,
        queue: ReconciliationQueue,
    ) -> Self {
        Self {
            reconciler,
            projections,
            queue,
        }
    }

    /// Catches the queue up with the store and reconciles every due order,
    /// longest waiting first.
    #[tracing::instrument(skip(self))]
    pub async fn run_once(&self) -> Result<SweepReport> {
        let started = Instant::now();
        self.projections.run_catch_up().await?;

        let mut report = SweepReport::default();
        for due in self.queue.due_orders().await {
            report.examined += 1;
            let waiting = match due.action {
                DueAction::VerifyPayment => Some(OrderState::AwaitingPayment),
                DueAction::SyncRemote => Some(OrderState::Paid),
                DueAction::Compensate => None,
            };

            match self.reconciler.reconcile(due.order_id).await {
                Ok(state) if Some(state) == waiting => report.unchanged += 1,
                Ok(_) => report.advanced += 1,
                Err(e) if e.is_stale() => {
                    tracing::debug!(order_id = %due.order_id, "order moved by another actor");
                    report.skipped += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        order_id = %due.order_id,
                        action = ?due.action,
                        error = %e,
                        "reconcile failed"
                    );
                    report.failed += 1;
                }
            }
        }

        metrics::histogram!("reconcile_sweep_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        metrics::counter!("reconcile_sweep_orders_total").increment(report.examined as u64);
        Ok(report)
    }

    /// Sweeps every `period` until `shutdown` turns true or its sender drops.
    pub async fn run(&self, period: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(period_secs = period.as_secs(), "sweeper started");

        loop {
            tokio::select! {
                _ = ticker.tick() => match self.run_once().await {
                    Ok(report) if report.examined > 0 => {
                        tracing::info!(
                            examined = report.examined,
                            advanced = report.advanced,
                            failed = report.failed,
                            "sweep finished"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!(error = %e, "sweep aborted"),
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("sweeper stopped");
    }
}
