//! Background escalation sweeps.
//!
//! Periodically advances overdue open items one approval level and expires
//! items that have exhausted their automatic escalation budget. Sweeps run
//! through the same versioned commit path as human actions, so a sweep that
//! races a human decision loses cleanly and retries on the next tick.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use tierflow_core::{ActionRequest, ItemFilter, WorkflowAction, WorkflowError};
use tierflow_db::ItemRepository;

use crate::errors::EngineError;
use crate::service::ApprovalService;

/// Counters for one sweep pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    /// Open items inspected.
    pub scanned: usize,
    /// Items advanced one level.
    pub escalated: usize,
    /// Items expired after exhausting their escalation budget.
    pub expired: usize,
    /// Items skipped because another writer got there first.
    pub raced: usize,
    /// Items that failed for any other reason.
    pub failed: usize,
}

pub struct EscalationScheduler<R> {
    service: Arc<ApprovalService<R>>,
    tick: Duration,
    max_auto_escalations: u32,
    shutdown: Arc<AtomicBool>,
    wakeup: Arc<Notify>,
}

impl<R: ItemRepository> EscalationScheduler<R> {
    pub fn new(
        service: Arc<ApprovalService<R>>,
        tick_secs: u64,
        max_auto_escalations: u32,
    ) -> Self {
        Self {
            service,
            tick: Duration::from_secs(tick_secs),
            max_auto_escalations,
            shutdown: Arc::new(AtomicBool::new(false)),
            wakeup: Arc::new(Notify::new()),
        }
    }

    /// Run sweeps until shutdown is requested.
    pub async fn run(&self) {
        info!(
            tick_secs = self.tick.as_secs(),
            max_auto_escalations = self.max_auto_escalations,
            "starting escalation scheduler"
        );

        let mut ticker = interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            // Only the idle wait is interruptible. A sweep in progress always
            // runs to completion before the shutdown flag is checked again.
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.wakeup.notified() => {}
            }
            if self.shutdown.load(Ordering::Relaxed) {
                info!("scheduler shutdown requested, stopping sweep loop");
                break;
            }
            let outcome = self.sweep(Utc::now()).await;
            if outcome.escalated + outcome.expired + outcome.failed > 0 {
                info!(
                    scanned = outcome.scanned,
                    escalated = outcome.escalated,
                    expired = outcome.expired,
                    raced = outcome.raced,
                    failed = outcome.failed,
                    "escalation sweep completed"
                );
            }
        }

        info!("scheduler stopped");
    }

    /// Request graceful shutdown. The run loop wakes immediately instead of
    /// sleeping out the remainder of the current tick interval.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        // notify_one stores a permit, so a shutdown raised mid-sweep still
        // wakes the next idle wait instead of being lost.
        self.wakeup.notify_one();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// One pass over open items. Escalation recomputes the due date, so an
    /// item is touched at most once per overdue window even when sweeps
    /// overlap or repeat.
    pub async fn sweep(&self, now: DateTime<Utc>) -> SweepOutcome {
        let mut outcome = SweepOutcome::default();

        let items = match self.service.query(&ItemFilter::default()).await {
            Ok(items) => items,
            Err(error) => {
                warn!(error = %error, "escalation sweep could not list items");
                outcome.failed += 1;
                return outcome;
            }
        };

        for item in items {
            if !item.status.is_open() {
                continue;
            }
            outcome.scanned += 1;
            if !item.is_overdue(now) {
                continue;
            }

            let action = if item.escalation_count >= self.max_auto_escalations {
                WorkflowAction::Expire
            } else {
                WorkflowAction::Escalate
            };
            let request = ActionRequest::new(action)
                .with_comment("no decision before due date");

            match self.service.act_as_system_at(&item.id, &request, now).await {
                Ok(_) if action == WorkflowAction::Expire => {
                    warn!(
                        item_id = %item.id,
                        escalation_count = item.escalation_count,
                        "item expired after exhausting escalation budget"
                    );
                    outcome.expired += 1;
                }
                Ok(updated) => {
                    info!(
                        item_id = %item.id,
                        level = updated.current_level,
                        escalation_count = updated.escalation_count,
                        "overdue item escalated"
                    );
                    outcome.escalated += 1;
                }
                Err(
                    EngineError::ConcurrentModification { .. }
                    | EngineError::Workflow(WorkflowError::InvalidTransition { .. })
                    | EngineError::NotFound { .. },
                ) => {
                    debug!(item_id = %item.id, "sweep lost the race to another writer");
                    outcome.raced += 1;
                }
                Err(error) => {
                    warn!(item_id = %item.id, error = %error, "escalation failed");
                    outcome.failed += 1;
                }
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;
    use rust_decimal::Decimal;

    use tierflow_core::{AppConfig, ItemStatus, Priority};
    use tierflow_db::InMemoryItemRepository;

    use crate::service::{ApprovalService, NewItem};

    use super::EscalationScheduler;

    fn service() -> Arc<ApprovalService<InMemoryItemRepository>> {
        let (ladder, rules) = AppConfig::default().workflow_engine().expect("engine");
        Arc::new(ApprovalService::new(
            Arc::new(InMemoryItemRepository::default()),
            ladder,
            rules,
        ))
    }

    fn new_item(amount: i64) -> NewItem {
        NewItem {
            title: "Conveyor belt order".to_string(),
            category: "equipment".to_string(),
            priority: Priority::High,
            amount: Decimal::new(amount, 0),
            requested_by: "alex".to_string(),
        }
    }

    #[tokio::test]
    async fn overdue_items_escalate_and_fresh_items_are_left_alone() {
        let service = service();
        let scheduler = EscalationScheduler::new(service.clone(), 60, 5);

        // `standard` tier has a 12 hour window, `petty` a 24 hour window,
        // so one hour past the standard due date only the first is overdue.
        let overdue = service.create_item(new_item(30_000)).await.expect("overdue");
        let fresh = service.create_item(new_item(2_000)).await.expect("fresh");

        let outcome = scheduler.sweep(overdue.due_date + Duration::hours(1)).await;
        assert_eq!(outcome.scanned, 2);
        assert_eq!(outcome.escalated, 1);
        assert_eq!(outcome.expired, 0);

        let escalated = service.get_item(&overdue.id).await.expect("reload");
        assert_eq!(escalated.status, ItemStatus::Escalated);
        assert_eq!(escalated.current_level, 2);
        assert_eq!(escalated.escalation_count, 1);
        assert!(escalated.due_date > overdue.due_date);

        let untouched = service.get_item(&fresh.id).await.expect("reload");
        assert_eq!(untouched.escalation_count, 0);
        assert_eq!(untouched.status, ItemStatus::Pending);
    }

    #[tokio::test]
    async fn repeated_sweeps_in_one_window_escalate_once() {
        let service = service();
        let scheduler = EscalationScheduler::new(service.clone(), 60, 5);
        let item = service.create_item(new_item(30_000)).await.expect("create");

        let sweep_at = item.due_date + Duration::hours(1);
        let first = scheduler.sweep(sweep_at).await;
        assert_eq!(first.escalated, 1);

        let second = scheduler.sweep(sweep_at).await;
        assert_eq!(second.escalated, 0);
        assert_eq!(second.expired, 0);

        let reloaded = service.get_item(&item.id).await.expect("reload");
        assert_eq!(reloaded.escalation_count, 1);
    }

    #[tokio::test]
    async fn escalation_budget_exhaustion_expires_the_item() {
        let service = service();
        let scheduler = EscalationScheduler::new(service.clone(), 60, 2);
        let item = service.create_item(new_item(30_000)).await.expect("create");

        let mut sweep_at = item.due_date + Duration::hours(1);
        for _ in 0..2 {
            let outcome = scheduler.sweep(sweep_at).await;
            assert_eq!(outcome.escalated, 1);
            let current = service.get_item(&item.id).await.expect("reload");
            sweep_at = current.due_date + Duration::hours(1);
        }

        let outcome = scheduler.sweep(sweep_at).await;
        assert_eq!(outcome.escalated, 0);
        assert_eq!(outcome.expired, 1);

        let expired = service.get_item(&item.id).await.expect("reload");
        assert_eq!(expired.status, ItemStatus::Expired);
        assert_eq!(expired.escalation_count, 2);
        assert!(expired.status.is_terminal());
    }

    #[tokio::test]
    async fn terminal_items_are_never_scanned() {
        let service = service();
        let scheduler = EscalationScheduler::new(service.clone(), 60, 0);
        let item = service.create_item(new_item(30_000)).await.expect("create");

        let first = scheduler.sweep(item.due_date + Duration::hours(1)).await;
        assert_eq!(first.expired, 1);

        let second = scheduler.sweep(item.due_date + Duration::days(30)).await;
        assert_eq!(second.scanned, 0);
    }

    #[tokio::test]
    async fn shutdown_stops_the_run_loop() {
        let service = service();
        let scheduler = Arc::new(EscalationScheduler::new(service, 1, 5));

        let handle = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.run().await })
        };
        scheduler.shutdown();
        assert!(scheduler.is_shutdown());

        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .expect("run loop exits after shutdown")
            .expect("task join");
    }

    #[tokio::test]
    async fn shutdown_interrupts_the_idle_wait_between_sweeps() {
        let service = service();
        // A one hour tick: the loop must exit on the shutdown wakeup, not by
        // sleeping out the rest of the interval.
        let scheduler = Arc::new(EscalationScheduler::new(service, 3_600, 5));

        let handle = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.run().await })
        };
        // Let the run loop get past its first (immediate) tick and settle
        // into the idle wait before requesting shutdown.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        scheduler.shutdown();

        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .expect("run loop exits without waiting for the next tick")
            .expect("task join");
    }
}
