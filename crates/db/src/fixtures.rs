use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;

use tierflow_core::{ApprovalItem, ItemId, Priority, RuleSet, WorkflowError};

use crate::repositories::{ItemRepository, RepositoryError};

#[derive(Debug, thiserror::Error)]
pub enum SeedError {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Deterministic demo dataset spanning the amount tiers. Lives outside the
/// engine: the core never generates mock data.
pub fn demo_items(rules: &RuleSet, now: DateTime<Utc>) -> Result<Vec<ApprovalItem>, WorkflowError> {
    let seeds: [(&str, &str, Priority, i64, &str); 6] = [
        ("Site fencing repair", "maintenance", Priority::Low, 1_800, "priya"),
        ("Concrete batch order", "materials", Priority::Medium, 8_400, "alex"),
        ("Crane rental extension", "equipment", Priority::High, 24_000, "marta"),
        ("Subcontractor retainer", "labour", Priority::Medium, 47_500, "alex"),
        ("Steel frame package", "materials", Priority::High, 128_000, "priya"),
        ("Land survey and permits", "compliance", Priority::Critical, 410_000, "marta"),
    ];

    seeds
        .iter()
        .enumerate()
        .map(|(index, (title, category, priority, amount, requested_by))| {
            let amount = Decimal::new(*amount, 0);
            let rule = rules.resolve(amount)?;
            let submitted = now - Duration::hours(index as i64);
            let mut item = ApprovalItem::submit(
                *title,
                *category,
                *priority,
                amount,
                *requested_by,
                rule,
                submitted,
            )?;
            item.id = ItemId(format!("ITM-{:04}", index + 1));
            Ok(item)
        })
        .collect()
}

pub async fn seed_demo_items<R: ItemRepository>(
    repo: &R,
    rules: &RuleSet,
    now: DateTime<Utc>,
) -> Result<u32, SeedError> {
    let mut inserted = 0u32;
    for item in demo_items(rules, now)? {
        if repo.find_by_id(&item.id).await?.is_some() {
            continue;
        }
        repo.insert(item).await?;
        inserted += 1;
    }
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use tierflow_core::AppConfig;

    use crate::repositories::{InMemoryItemRepository, ItemRepository};

    use super::{demo_items, seed_demo_items};

    fn rules() -> tierflow_core::RuleSet {
        AppConfig::default().workflow_engine().expect("engine").1
    }

    #[test]
    fn demo_items_are_deterministic_and_span_all_tiers() {
        let now = Utc::now();
        let first = demo_items(&rules(), now).expect("items");
        let second = demo_items(&rules(), now).expect("items");
        assert_eq!(first, second);

        let rule_names: std::collections::BTreeSet<&str> =
            first.iter().map(|item| item.rule_name.as_str()).collect();
        assert_eq!(rule_names.len(), 4, "fixtures should hit every tier");
    }

    #[tokio::test]
    async fn seeding_twice_inserts_once() {
        let repo = InMemoryItemRepository::default();
        let rules = rules();
        let now = Utc::now();

        let first = seed_demo_items(&repo, &rules, now).await.expect("seed");
        let second = seed_demo_items(&repo, &rules, now).await.expect("reseed");

        assert_eq!(first, 6);
        assert_eq!(second, 0);
        assert_eq!(repo.list_all().await.expect("list").len(), 6);
    }
}
