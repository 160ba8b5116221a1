use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, info};

use tierflow_core::{
    machine, ActionRequest, Actor, ActorKind, ApprovalItem, ItemFilter, ItemId, Priority,
    RoleLadder, RuleSet, WorkflowStats,
};
use tierflow_db::ItemRepository;

use crate::errors::EngineError;
use crate::notify::{Notification, NoopNotifier, Notifier};

#[derive(Clone, Debug)]
pub struct NewItem {
    pub title: String,
    pub category: String,
    pub priority: Priority,
    pub amount: Decimal,
    pub requested_by: String,
}

#[derive(Debug)]
pub struct BatchFailure {
    pub id: ItemId,
    pub error: EngineError,
}

/// Per-item outcomes of a batch action. Batch processing is not atomic
/// across items; partial success is expected and every member is accounted
/// for in exactly one of the two lists.
#[derive(Debug, Default)]
pub struct BatchResult {
    pub succeeded: Vec<ItemId>,
    pub failed: Vec<BatchFailure>,
}

/// Orchestrates the state machine, guard, and repository under optimistic
/// concurrency. Every mutation reads a snapshot, computes the next state,
/// and commits with a compare-and-set on the snapshot's version token, so
/// each decision point produces at most one transition.
pub struct ApprovalService<R> {
    repo: Arc<R>,
    ladder: RoleLadder,
    rules: RuleSet,
    notifier: Arc<dyn Notifier>,
}

impl<R: ItemRepository> ApprovalService<R> {
    pub fn new(repo: Arc<R>, ladder: RoleLadder, rules: RuleSet) -> Self {
        Self { repo, ladder, rules, notifier: Arc::new(NoopNotifier) }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn ladder(&self) -> &RoleLadder {
        &self.ladder
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub async fn create_item(&self, new: NewItem) -> Result<ApprovalItem, EngineError> {
        if new.amount.is_sign_negative() {
            return Err(EngineError::Workflow(
                tierflow_core::WorkflowError::NegativeAmount { amount: new.amount },
            ));
        }

        let now = Utc::now();
        let rule = self.rules.resolve(new.amount)?;
        let item = ApprovalItem::submit(
            new.title,
            new.category,
            new.priority,
            new.amount,
            new.requested_by,
            rule,
            now,
        )?;

        self.repo.insert(item.clone()).await.map_err(EngineError::from_repository)?;
        info!(
            event_name = "workflow.item.created",
            item_id = %item.id,
            rule = %item.rule_name,
            max_level = item.max_level,
            amount = %item.amount,
            "approval item created"
        );
        Ok(item)
    }

    pub async fn get_item(&self, id: &ItemId) -> Result<ApprovalItem, EngineError> {
        self.repo
            .find_by_id(id)
            .await
            .map_err(EngineError::from_repository)?
            .ok_or_else(|| EngineError::NotFound { id: id.clone() })
    }

    /// Apply one human action under the authorization guard.
    pub async fn act(
        &self,
        id: &ItemId,
        actor: &Actor,
        request: &ActionRequest,
    ) -> Result<ApprovalItem, EngineError> {
        self.act_inner(id, actor, ActorKind::Human, request, Utc::now()).await
    }

    /// Scheduler path: same optimistic-concurrency commit as human actions,
    /// guard bypassed, synthetic system actor on the audit trail.
    pub async fn act_as_system(
        &self,
        id: &ItemId,
        request: &ActionRequest,
    ) -> Result<ApprovalItem, EngineError> {
        self.act_as_system_at(id, request, Utc::now()).await
    }

    pub(crate) async fn act_as_system_at(
        &self,
        id: &ItemId,
        request: &ActionRequest,
        now: chrono::DateTime<Utc>,
    ) -> Result<ApprovalItem, EngineError> {
        self.act_inner(id, &Actor::system(), ActorKind::System, request, now).await
    }

    async fn act_inner(
        &self,
        id: &ItemId,
        actor: &Actor,
        kind: ActorKind,
        request: &ActionRequest,
        now: chrono::DateTime<Utc>,
    ) -> Result<ApprovalItem, EngineError> {
        let snapshot = self.get_item(id).await?;
        let outcome =
            machine::apply(&self.ladder, &self.rules, &snapshot, request, actor, kind, now)?;

        self.repo
            .update_versioned(outcome.item.clone(), snapshot.version)
            .await
            .map_err(EngineError::from_repository)?;

        debug!(
            event_name = "workflow.item.transition",
            item_id = %outcome.item.id,
            action = request.action.as_str(),
            actor = %actor.name,
            from = outcome.from.as_str(),
            to = outcome.to.as_str(),
            level = outcome.item.current_level,
            "approval item transition committed"
        );
        self.dispatch_notification(&outcome.item);
        Ok(outcome.item)
    }

    /// Apply one action to each member independently. A per-item failure
    /// never fails the batch; it is recorded against that item only.
    pub async fn batch_act(
        &self,
        ids: &[ItemId],
        actor: &Actor,
        request: &ActionRequest,
    ) -> BatchResult {
        let mut result = BatchResult::default();

        for id in ids {
            let outcome = match self.get_item(id).await {
                Ok(item) if !item.allow_batch => {
                    Err(EngineError::BatchNotAllowed { id: id.clone() })
                }
                Ok(_) => self.act(id, actor, request).await.map(|_| ()),
                Err(error) => Err(error),
            };

            match outcome {
                Ok(()) => result.succeeded.push(id.clone()),
                Err(error) => result.failed.push(BatchFailure { id: id.clone(), error }),
            }
        }

        info!(
            event_name = "workflow.batch.completed",
            action = request.action.as_str(),
            actor = %actor.name,
            succeeded = result.succeeded.len(),
            failed = result.failed.len(),
            "batch action completed"
        );
        result
    }

    pub async fn query(&self, filter: &ItemFilter) -> Result<Vec<ApprovalItem>, EngineError> {
        let now = Utc::now();
        let items = self.repo.list_all().await.map_err(EngineError::from_repository)?;
        Ok(items
            .into_iter()
            .filter(|item| filter.matches(&self.ladder, item, now))
            .collect())
    }

    pub async fn stats(&self, filter: Option<&ItemFilter>) -> Result<WorkflowStats, EngineError> {
        let now = Utc::now();
        let items = self.repo.list_all().await.map_err(EngineError::from_repository)?;
        let scoped: Vec<ApprovalItem> = match filter {
            Some(filter) => items
                .into_iter()
                .filter(|item| filter.matches(&self.ladder, item, now))
                .collect(),
            None => items,
        };
        Ok(WorkflowStats::compute(&scoped, now))
    }

    // Commit first, notify after; a slow or failing notifier must never
    // affect the committed transition.
    fn dispatch_notification(&self, item: &ApprovalItem) {
        let Some(entry) = item.history.last() else {
            return;
        };
        let notification = Notification {
            item_id: item.id.clone(),
            action: entry.action,
            actor_name: entry.actor_name.clone(),
            actor_role: entry.actor_role.clone(),
            status: item.status,
            level: item.current_level,
            occurred_at: entry.timestamp,
        };
        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            notifier.notify(notification);
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rust_decimal::Decimal;

    use tierflow_core::{
        ActionRequest, Actor, AppConfig, ItemFilter, ItemId, ItemStatus, Priority,
        WorkflowAction, WorkflowError,
    };
    use tierflow_db::InMemoryItemRepository;

    use crate::errors::EngineError;
    use crate::notify::{InMemoryNotifier, Notifier};

    use super::{ApprovalService, NewItem};

    fn service() -> ApprovalService<InMemoryItemRepository> {
        let (ladder, rules) = AppConfig::default().workflow_engine().expect("engine");
        ApprovalService::new(Arc::new(InMemoryItemRepository::default()), ladder, rules)
    }

    fn new_item(amount: i64) -> NewItem {
        NewItem {
            title: "Pump replacement".to_string(),
            category: "maintenance".to_string(),
            priority: Priority::Medium,
            amount: Decimal::new(amount, 0),
            requested_by: "alex".to_string(),
        }
    }

    fn approve() -> ActionRequest {
        ActionRequest::new(WorkflowAction::Approve)
    }

    async fn drain_spawned_tasks() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn single_tier_amount_is_approved_by_the_foreman_alone() {
        let service = service();
        let item = service.create_item(new_item(5_000)).await.expect("create");
        assert_eq!(item.max_level, 1);

        let approved = service
            .act(&item.id, &Actor::new("fred", "foreman"), &approve())
            .await
            .expect("approve");
        assert_eq!(approved.status, ItemStatus::Approved);
        assert_eq!(approved.current_level, 1);
    }

    #[tokio::test]
    async fn three_tier_amount_climbs_to_operations_manager() {
        let service = service();
        let item = service.create_item(new_item(75_000)).await.expect("create");
        assert_eq!(item.max_level, 3);

        let after_l1 = service
            .act(&item.id, &Actor::new("fred", "foreman"), &approve())
            .await
            .expect("level 1");
        assert_eq!(after_l1.status, ItemStatus::Pending);
        assert_eq!(after_l1.current_level, 2);

        let after_l2 = service
            .act(&item.id, &Actor::new("sam", "site_supervisor"), &approve())
            .await
            .expect("level 2");
        assert_eq!(after_l2.current_level, 3);

        let decided = service
            .act(&item.id, &Actor::new("olga", "operations_manager"), &approve())
            .await
            .expect("level 3");
        assert_eq!(decided.status, ItemStatus::Approved);
        assert_eq!(decided.history.len(), 3);
    }

    #[tokio::test]
    async fn rejection_closes_the_item_for_good() {
        let service = service();
        let item = service.create_item(new_item(75_000)).await.expect("create");

        service
            .act(&item.id, &Actor::new("fred", "foreman"), &approve())
            .await
            .expect("level 1");
        service
            .act(
                &item.id,
                &Actor::new("sam", "site_supervisor"),
                &ActionRequest::new(WorkflowAction::Reject).with_comment("quote is stale"),
            )
            .await
            .expect("reject");

        let error = service
            .act(&item.id, &Actor::new("olga", "operations_manager"), &approve())
            .await
            .expect_err("closed");
        assert!(matches!(
            error,
            EngineError::Workflow(WorkflowError::InvalidTransition {
                status: ItemStatus::Rejected
            })
        ));
    }

    #[tokio::test]
    async fn escalated_item_is_actionable_at_the_next_level() {
        let service = service();
        let item = service.create_item(new_item(75_000)).await.expect("create");

        let escalated = service
            .act(
                &item.id,
                &Actor::new("fred", "foreman"),
                &ActionRequest::new(WorkflowAction::Escalate),
            )
            .await
            .expect("escalate");
        assert_eq!(escalated.status, ItemStatus::Escalated);
        assert_eq!(escalated.current_level, 2);
        assert_eq!(escalated.escalation_count, 1);

        let approved = service
            .act(&item.id, &Actor::new("sam", "site_supervisor"), &approve())
            .await
            .expect("supervisor acts on escalated item");
        assert_eq!(approved.status, ItemStatus::Pending);
        assert_eq!(approved.current_level, 3);
    }

    #[tokio::test]
    async fn wrong_approver_and_missing_item_are_distinct_errors() {
        let service = service();
        let item = service.create_item(new_item(75_000)).await.expect("create");

        let unauthorized = service
            .act(&item.id, &Actor::new("olga", "operations_manager"), &approve())
            .await
            .expect_err("wrong level");
        assert_eq!(unauthorized.code(), "unauthorized");

        let missing = service
            .act(&ItemId("ITM-404".to_string()), &Actor::new("fred", "foreman"), &approve())
            .await
            .expect_err("missing");
        assert_eq!(missing.code(), "not_found");
    }

    #[tokio::test]
    async fn negative_amount_is_rejected_at_creation() {
        let service = service();
        let error = service.create_item(new_item(-20)).await.expect_err("negative");
        assert_eq!(error.code(), "negative_amount");
    }

    #[tokio::test]
    async fn stale_writer_observes_concurrent_modification() {
        let service = service();
        let item = service.create_item(new_item(5_000)).await.expect("create");

        // Simulate a racing writer committing between snapshot and commit:
        // the first act consumes version 1, then a replayed act built on the
        // same stale snapshot must fail.
        let snapshot_version = item.version;
        service
            .act(&item.id, &Actor::new("fred", "foreman"), &approve())
            .await
            .expect("winner");

        let fresh = service.get_item(&item.id).await.expect("fresh");
        assert_eq!(fresh.version, snapshot_version + 1);

        let error = service
            .act(&item.id, &Actor::new("fred", "foreman"), &approve())
            .await
            .expect_err("item already terminal");
        assert_eq!(error.code(), "invalid_transition");
    }

    #[tokio::test]
    async fn batch_reports_per_item_outcomes() {
        let service = service();
        let a = service.create_item(new_item(2_000)).await.expect("a");
        let b = service.create_item(new_item(3_000)).await.expect("b");
        // The `major` tier disallows batch actions.
        let c = service.create_item(new_item(80_000)).await.expect("c");
        let missing = ItemId("ITM-404".to_string());

        let result = service
            .batch_act(
                &[a.id.clone(), b.id.clone(), c.id.clone(), missing.clone()],
                &Actor::new("fred", "foreman"),
                &approve(),
            )
            .await;

        assert_eq!(result.succeeded, vec![a.id, b.id]);
        assert_eq!(result.failed.len(), 2);
        assert_eq!(result.failed[0].id, c.id);
        assert_eq!(result.failed[0].error.code(), "batch_not_allowed");
        assert_eq!(result.failed[1].id, missing);
        assert_eq!(result.failed[1].error.code(), "not_found");
    }

    #[tokio::test]
    async fn query_filters_by_status_and_assignment() {
        let service = service();
        let open = service.create_item(new_item(75_000)).await.expect("open");
        let closed = service.create_item(new_item(4_000)).await.expect("closed");
        service
            .act(&closed.id, &Actor::new("fred", "foreman"), &approve())
            .await
            .expect("approve");

        let pending = service
            .query(&ItemFilter { status: Some(ItemStatus::Pending), ..ItemFilter::default() })
            .await
            .expect("query");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, open.id);

        let mine = service
            .query(&ItemFilter {
                assigned_to: Some(Actor::new("fred", "foreman")),
                ..ItemFilter::default()
            })
            .await
            .expect("query");
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].id, open.id);
    }

    #[tokio::test]
    async fn stats_reflect_decisions() {
        let service = service();
        let open = service.create_item(new_item(30_000)).await.expect("open");
        let closed = service.create_item(new_item(4_000)).await.expect("closed");
        service
            .act(&closed.id, &Actor::new("fred", "foreman"), &approve())
            .await
            .expect("approve");

        let stats = service.stats(None).await.expect("stats");
        assert_eq!(stats.total_items, 2);
        assert_eq!(stats.open_item_count, 1);
        assert_eq!(stats.total_open_value, open.amount);
        assert_eq!(stats.count_by_status.get(&ItemStatus::Approved), Some(&1));
        assert!(stats.mean_time_to_decision_secs.is_some());
    }

    #[tokio::test]
    async fn committed_transitions_emit_notifications() {
        let (ladder, rules) = AppConfig::default().workflow_engine().expect("engine");
        let notifier = InMemoryNotifier::default();
        let service =
            ApprovalService::new(Arc::new(InMemoryItemRepository::default()), ladder, rules)
                .with_notifier(Arc::new(notifier.clone()));

        let item = service.create_item(new_item(5_000)).await.expect("create");
        service
            .act(&item.id, &Actor::new("fred", "foreman"), &approve())
            .await
            .expect("approve");
        drain_spawned_tasks().await;

        let notifications = notifier.notifications();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].item_id, item.id);
        assert_eq!(notifications[0].status, ItemStatus::Approved);
    }

    #[tokio::test]
    async fn failed_actions_emit_no_notification() {
        let (ladder, rules) = AppConfig::default().workflow_engine().expect("engine");
        let notifier = InMemoryNotifier::default();
        let service =
            ApprovalService::new(Arc::new(InMemoryItemRepository::default()), ladder, rules)
                .with_notifier(Arc::new(notifier.clone()));

        let item = service.create_item(new_item(75_000)).await.expect("create");
        let _ = service
            .act(&item.id, &Actor::new("olga", "operations_manager"), &approve())
            .await
            .expect_err("unauthorized");
        drain_spawned_tasks().await;

        assert!(notifier.notifications().is_empty());
    }
}
