use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::Row;

use tierflow_core::{ActionKind, ApprovalItem, HistoryEntry, ItemId, ItemStatus, Priority};

use super::{ItemRepository, RepositoryError};
use crate::DbPool;

pub struct SqlItemRepository {
    pool: DbPool,
}

impl SqlItemRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn decode<T, E: std::fmt::Display>(result: Result<T, E>) -> Result<T, RepositoryError> {
    result.map_err(|error| RepositoryError::Decode(error.to_string()))
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    decode(DateTime::parse_from_rfc3339(raw)).map(|dt| dt.with_timezone(&Utc))
}

fn row_to_item(row: &sqlx::sqlite::SqliteRow) -> Result<ApprovalItem, RepositoryError> {
    let id: String = row.try_get("id")?;
    let title: String = row.try_get("title")?;
    let category: String = row.try_get("category")?;
    let priority_str: String = row.try_get("priority")?;
    let amount_str: String = row.try_get("amount")?;
    let requested_by: String = row.try_get("requested_by")?;
    let rule_name: String = row.try_get("rule_name")?;
    let requires_signature: bool = row.try_get("requires_signature")?;
    let allow_batch: bool = row.try_get("allow_batch")?;
    let current_level: i64 = row.try_get("current_level")?;
    let max_level: i64 = row.try_get("max_level")?;
    let status_str: String = row.try_get("status")?;
    let submitted_at_str: String = row.try_get("submitted_at")?;
    let due_date_str: String = row.try_get("due_date")?;
    let decided_at_str: Option<String> = row.try_get("decided_at")?;
    let escalation_count: i64 = row.try_get("escalation_count")?;
    let version: i64 = row.try_get("version")?;

    Ok(ApprovalItem {
        id: ItemId(id),
        title,
        category,
        priority: decode(Priority::from_str(&priority_str))?,
        amount: decode(Decimal::from_str(&amount_str))?,
        requested_by,
        rule_name,
        requires_signature,
        allow_batch,
        current_level: current_level as u32,
        max_level: max_level as u32,
        status: decode(ItemStatus::from_str(&status_str))?,
        submitted_at: parse_timestamp(&submitted_at_str)?,
        due_date: parse_timestamp(&due_date_str)?,
        decided_at: decided_at_str.as_deref().map(parse_timestamp).transpose()?,
        escalation_count: escalation_count as u32,
        version,
        history: Vec::new(),
    })
}

fn row_to_history(row: &sqlx::sqlite::SqliteRow) -> Result<HistoryEntry, RepositoryError> {
    let level: i64 = row.try_get("level")?;
    let actor_name: String = row.try_get("actor_name")?;
    let actor_role: String = row.try_get("actor_role")?;
    let action_str: String = row.try_get("action")?;
    let occurred_at_str: String = row.try_get("occurred_at")?;
    let comments: Option<String> = row.try_get("comments")?;
    let signature: Option<String> = row.try_get("signature")?;
    let time_spent_secs: i64 = row.try_get("time_spent_secs")?;

    Ok(HistoryEntry {
        level: level as u32,
        actor_name,
        actor_role,
        action: decode(ActionKind::from_str(&action_str))?,
        timestamp: parse_timestamp(&occurred_at_str)?,
        comments,
        signature,
        time_spent_secs,
    })
}

const ITEM_COLUMNS: &str = "id, title, category, priority, amount, requested_by, rule_name,
        requires_signature, allow_batch, current_level, max_level, status,
        submitted_at, due_date, decided_at, escalation_count, version";

async fn append_history(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    item: &ApprovalItem,
) -> Result<(), RepositoryError> {
    let existing: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM approval_history WHERE item_id = ?")
            .bind(&item.id.0)
            .fetch_one(&mut **tx)
            .await?;

    for (index, entry) in item.history.iter().enumerate().skip(existing as usize) {
        sqlx::query(
            "INSERT INTO approval_history (item_id, seq, level, actor_name, actor_role,
                                           action, occurred_at, comments, signature, time_spent_secs)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&item.id.0)
        .bind(index as i64)
        .bind(entry.level as i64)
        .bind(&entry.actor_name)
        .bind(&entry.actor_role)
        .bind(entry.action.as_str())
        .bind(entry.timestamp.to_rfc3339())
        .bind(&entry.comments)
        .bind(&entry.signature)
        .bind(entry.time_spent_secs)
        .execute(&mut **tx)
        .await?;
    }

    Ok(())
}

#[async_trait::async_trait]
impl ItemRepository for SqlItemRepository {
    async fn insert(&self, item: ApprovalItem) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO approval_item (id, title, category, priority, amount, requested_by,
                                        rule_name, requires_signature, allow_batch,
                                        current_level, max_level, status, submitted_at,
                                        due_date, decided_at, escalation_count, version)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&item.id.0)
        .bind(&item.title)
        .bind(&item.category)
        .bind(item.priority.as_str())
        .bind(item.amount.to_string())
        .bind(&item.requested_by)
        .bind(&item.rule_name)
        .bind(item.requires_signature)
        .bind(item.allow_batch)
        .bind(item.current_level as i64)
        .bind(item.max_level as i64)
        .bind(item.status.as_str())
        .bind(item.submitted_at.to_rfc3339())
        .bind(item.due_date.to_rfc3339())
        .bind(item.decided_at.map(|dt| dt.to_rfc3339()))
        .bind(item.escalation_count as i64)
        .bind(item.version)
        .execute(&mut *tx)
        .await
        .map_err(|error| {
            if error.as_database_error().is_some_and(|db| db.is_unique_violation()) {
                RepositoryError::DuplicateId { id: item.id.0.clone() }
            } else {
                RepositoryError::Database(error)
            }
        })?;

        append_history(&mut tx, &item).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn find_by_id(&self, id: &ItemId) -> Result<Option<ApprovalItem>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {ITEM_COLUMNS} FROM approval_item WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut item = row_to_item(&row)?;

        let history_rows = sqlx::query(
            "SELECT level, actor_name, actor_role, action, occurred_at, comments, signature,
                    time_spent_secs
             FROM approval_history WHERE item_id = ? ORDER BY seq ASC",
        )
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await?;

        item.history =
            history_rows.iter().map(row_to_history).collect::<Result<Vec<_>, _>>()?;
        Ok(Some(item))
    }

    async fn list_all(&self) -> Result<Vec<ApprovalItem>, RepositoryError> {
        let item_rows = sqlx::query(&format!(
            "SELECT {ITEM_COLUMNS} FROM approval_item ORDER BY submitted_at ASC, id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        let mut items =
            item_rows.iter().map(row_to_item).collect::<Result<Vec<ApprovalItem>, _>>()?;

        let history_rows = sqlx::query(
            "SELECT item_id, level, actor_name, actor_role, action, occurred_at, comments,
                    signature, time_spent_secs
             FROM approval_history ORDER BY item_id ASC, seq ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut grouped: HashMap<String, Vec<HistoryEntry>> = HashMap::new();
        for row in &history_rows {
            let item_id: String = row.try_get("item_id")?;
            grouped.entry(item_id).or_default().push(row_to_history(row)?);
        }
        for item in &mut items {
            if let Some(history) = grouped.remove(&item.id.0) {
                item.history = history;
            }
        }

        Ok(items)
    }

    async fn update_versioned(
        &self,
        item: ApprovalItem,
        expected_version: i64,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE approval_item
             SET current_level = ?, status = ?, due_date = ?, decided_at = ?,
                 escalation_count = ?, version = ?
             WHERE id = ? AND version = ?",
        )
        .bind(item.current_level as i64)
        .bind(item.status.as_str())
        .bind(item.due_date.to_rfc3339())
        .bind(item.decided_at.map(|dt| dt.to_rfc3339()))
        .bind(item.escalation_count as i64)
        .bind(item.version)
        .bind(&item.id.0)
        .bind(expected_version)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            let exists: Option<i64> =
                sqlx::query_scalar("SELECT 1 FROM approval_item WHERE id = ?")
                    .bind(&item.id.0)
                    .fetch_optional(&mut *tx)
                    .await?;
            return Err(if exists.is_some() {
                RepositoryError::VersionConflict { id: item.id.0.clone() }
            } else {
                RepositoryError::NotFound { id: item.id.0.clone() }
            });
        }

        append_history(&mut tx, &item).await?;
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;

    use tierflow_core::{
        ActionKind, ApprovalItem, ApprovalRule, HistoryEntry, ItemId, ItemStatus, Priority,
    };

    use super::SqlItemRepository;
    use crate::repositories::{ItemRepository, RepositoryError};
    use crate::{connect_with_settings, migrations};

    async fn setup() -> SqlItemRepository {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        SqlItemRepository::new(pool)
    }

    fn sample_rule() -> ApprovalRule {
        ApprovalRule {
            name: "standard".to_string(),
            min_amount: Decimal::ZERO,
            max_amount: None,
            required_roles: vec!["foreman".to_string(), "site_supervisor".to_string()],
            auto_escalation: Duration::hours(12),
            requires_signature: false,
            allow_batch: true,
        }
    }

    fn sample_item(id: &str) -> ApprovalItem {
        let mut item = ApprovalItem::submit(
            "Concrete delivery",
            "materials",
            Priority::Medium,
            Decimal::new(12_500, 0),
            "alex",
            &sample_rule(),
            Utc::now(),
        )
        .expect("item");
        item.id = ItemId(id.to_string());
        item
    }

    fn approval_entry(level: u32) -> HistoryEntry {
        HistoryEntry {
            level,
            actor_name: "fred".to_string(),
            actor_role: "foreman".to_string(),
            action: ActionKind::Approved,
            timestamp: Utc::now(),
            comments: Some("looks right".to_string()),
            signature: None,
            time_spent_secs: 420,
        }
    }

    #[tokio::test]
    async fn insert_and_find_round_trip() {
        let repo = setup().await;
        let item = sample_item("ITM-001");

        repo.insert(item.clone()).await.expect("insert");
        let found = repo.find_by_id(&item.id).await.expect("find").expect("exists");

        assert_eq!(found.id, item.id);
        assert_eq!(found.amount, item.amount);
        assert_eq!(found.status, ItemStatus::Pending);
        assert_eq!(found.current_level, 1);
        assert_eq!(found.max_level, 2);
        assert_eq!(found.version, 1);
        assert!(found.history.is_empty());
    }

    #[tokio::test]
    async fn inserting_a_taken_id_is_rejected() {
        let repo = setup().await;
        let item = sample_item("ITM-001");
        repo.insert(item.clone()).await.expect("insert");

        let mut replacement = sample_item("ITM-001");
        replacement.status = ItemStatus::Rejected;
        let error = repo.insert(replacement).await.expect_err("duplicate id");
        assert!(matches!(error, RepositoryError::DuplicateId { .. }));

        let stored = repo.find_by_id(&item.id).await.expect("find").expect("exists");
        assert_eq!(stored.status, ItemStatus::Pending);
    }

    #[tokio::test]
    async fn find_missing_item_returns_none() {
        let repo = setup().await;
        let found = repo.find_by_id(&ItemId("ITM-404".to_string())).await.expect("find");
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn versioned_update_commits_and_appends_history() {
        let repo = setup().await;
        let item = sample_item("ITM-001");
        repo.insert(item.clone()).await.expect("insert");

        let mut updated = item.clone();
        updated.current_level = 2;
        updated.version = 2;
        updated.history.push(approval_entry(1));

        repo.update_versioned(updated, item.version).await.expect("cas update");

        let found = repo.find_by_id(&item.id).await.expect("find").expect("exists");
        assert_eq!(found.current_level, 2);
        assert_eq!(found.version, 2);
        assert_eq!(found.history.len(), 1);
        assert_eq!(found.history[0].action, ActionKind::Approved);
        assert_eq!(found.history[0].comments.as_deref(), Some("looks right"));
        assert_eq!(found.history[0].time_spent_secs, 420);
    }

    #[tokio::test]
    async fn stale_version_is_rejected_with_conflict() {
        let repo = setup().await;
        let item = sample_item("ITM-001");
        repo.insert(item.clone()).await.expect("insert");

        let mut first = item.clone();
        first.current_level = 2;
        first.version = 2;
        first.history.push(approval_entry(1));
        repo.update_versioned(first, 1).await.expect("first writer wins");

        let mut second = item.clone();
        second.status = ItemStatus::Rejected;
        second.version = 2;
        second.history.push(approval_entry(1));
        let error = repo.update_versioned(second, 1).await.expect_err("stale snapshot");
        assert!(matches!(error, RepositoryError::VersionConflict { .. }));

        // The losing writer left no trace.
        let found = repo.find_by_id(&item.id).await.expect("find").expect("exists");
        assert_eq!(found.status, ItemStatus::Pending);
        assert_eq!(found.history.len(), 1);
    }

    #[tokio::test]
    async fn updating_unknown_item_reports_not_found() {
        let repo = setup().await;
        let item = sample_item("ITM-001");
        let error = repo.update_versioned(item, 1).await.expect_err("missing row");
        assert!(matches!(error, RepositoryError::NotFound { .. }));
    }

    #[tokio::test]
    async fn history_is_append_only_across_updates() {
        let repo = setup().await;
        let item = sample_item("ITM-001");
        repo.insert(item.clone()).await.expect("insert");

        let mut current = item.clone();
        for step in 0..3 {
            let expected = current.version;
            current.history.push(approval_entry(current.current_level));
            current.version += 1;
            if step < 1 {
                current.current_level += 1;
            }
            repo.update_versioned(current.clone(), expected).await.expect("update");
        }

        let found = repo.find_by_id(&item.id).await.expect("find").expect("exists");
        assert_eq!(found.history.len(), 3);
        assert_eq!(found.version, 4);
    }

    #[tokio::test]
    async fn list_all_attaches_each_item_history() {
        let repo = setup().await;
        let a = sample_item("ITM-A");
        let b = sample_item("ITM-B");
        repo.insert(a.clone()).await.expect("insert a");
        repo.insert(b.clone()).await.expect("insert b");

        let mut updated = a.clone();
        updated.version = 2;
        updated.history.push(approval_entry(1));
        repo.update_versioned(updated, 1).await.expect("update a");

        let items = repo.list_all().await.expect("list");
        assert_eq!(items.len(), 2);
        let item_a = items.iter().find(|item| item.id.0 == "ITM-A").expect("a");
        let item_b = items.iter().find(|item| item.id.0 == "ITM-B").expect("b");
        assert_eq!(item_a.history.len(), 1);
        assert!(item_b.history.is_empty());
    }
}
