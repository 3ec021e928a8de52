//! TodayMaterializer - 「今日」の TodayInstance 集合を作り直す
//!
//! # フロー
//! 1. 現在の TodayInstance 集合を丸ごと破棄（部分削除ではない）
//! 2. 今日のローカル日 [start, end] に期限がある単発タスクを読む
//! 3. 有効な定期タスクを読み、頻度ルールで今日に該当するものを残す
//! 4. それぞれから TodayInstance を作る
//! 5. まとめて挿入
//!
//! `atomic_rebuild` が有効なら 1〜5 を `replace_all` 1 回で行い、
//! 読み手が空の集合を見ることはありません。

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};
use tracing::{error, info};

use crate::domain::{CoreError, LocalDay, TodayInstance};
use crate::observability::RefreshReport;
use crate::ports::{InstanceStore, TaskStore};

pub struct TodayMaterializer {
    tasks: Arc<dyn TaskStore>,
    instances: Arc<dyn InstanceStore>,
    tz: FixedOffset,
    atomic_rebuild: bool,
}

impl TodayMaterializer {
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        instances: Arc<dyn InstanceStore>,
        tz: FixedOffset,
        atomic_rebuild: bool,
    ) -> Self {
        Self {
            tasks,
            instances,
            tz,
            atomic_rebuild,
        }
    }

    /// Rebuild today's instance set for the local day containing `now`.
    ///
    /// A source category that fails to load is logged and left out; the other
    /// category is still materialized.
    pub async fn refresh(&self, now: DateTime<Utc>) -> Result<RefreshReport, CoreError> {
        let day = LocalDay::containing(now, &self.tz);
        let mut report = RefreshReport::default();
        let mut fresh = Vec::new();

        match self.tasks.singles_due_between(day.start, day.end).await {
            Ok(tasks) => {
                report.singles = tasks.len();
                fresh.extend(tasks.iter().map(|t| TodayInstance::from_single(t, day.date)));
            }
            Err(err) => {
                error!(job = "materialize-today", category = "single", error = %err, "failed to load due tasks");
                report.failed_categories.push("single".to_string());
            }
        }

        match self.tasks.active_recurring().await {
            Ok(defs) => {
                let due: Vec<_> = defs
                    .iter()
                    .filter(|d| d.frequency.is_due_on(day.date))
                    .map(|d| TodayInstance::from_recurring(d, day.date))
                    .collect();
                report.recurring = due.len();
                fresh.extend(due);
            }
            Err(err) => {
                error!(job = "materialize-today", category = "recurring", error = %err, "failed to load recurring tasks");
                report.failed_categories.push("recurring".to_string());
            }
        }

        if self.atomic_rebuild {
            self.instances.replace_all(fresh).await?;
        } else {
            self.instances.truncate().await?;
            self.instances.insert_many(fresh).await?;
        }

        info!(
            job = "materialize-today",
            day = %day.date,
            singles = report.singles,
            recurring = report.recurring,
            "today instances rebuilt"
        );
        Ok(report)
    }

    /// Recompute the days-open counter of every open single task.
    pub async fn recompute_days_open(&self, now: DateTime<Utc>) -> Result<usize, CoreError> {
        let today = LocalDay::containing(now, &self.tz);
        let updates: Vec<_> = self
            .tasks
            .open_singles()
            .await?
            .iter()
            .map(|t| {
                let created = t.created_at.with_timezone(&self.tz).date_naive();
                (t.id, today.days_since(created).max(0))
            })
            .collect();
        self.tasks.set_days_open(&updates).await?;
        Ok(updates.len())
    }

    /// Both passes, as the daily job runs them.
    pub async fn run(&self, now: DateTime<Utc>) -> Result<RefreshReport, CoreError> {
        let mut report = self.refresh(now).await?;
        report.days_open_updated = self.recompute_days_open(now).await?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::test_support::{BrokenSingles, Cast, local, now, recurring, single, tz};
    use crate::domain::{Deletion, FrequencyRule, SourceRef};
    use crate::impls::InMemoryStore;
    use std::collections::BTreeSet;

    struct Seeded {
        store: InMemoryStore,
        due_today: SourceRef,
        due_tomorrow: SourceRef,
        wednesdays: SourceRef,
    }

    async fn seeded() -> Seeded {
        let cast = Cast::new();
        let store = InMemoryStore::new();
        let due_today = single(cast.assignment(), local(10, 10, 0));
        let due_tomorrow = single(cast.assignment(), local(11, 0, 30));
        let mut deleted = single(cast.assignment(), local(10, 9, 0));
        deleted.deletion = Some(Deletion {
            at: now(),
            by: cast.creator.id,
        });
        let wednesdays = recurring(cast.assignment(), FrequencyRule::Weekdays { days: vec![3] });
        let mondays = recurring(cast.assignment(), FrequencyRule::Weekdays { days: vec![1] });

        let seeded = Seeded {
            store: store.clone(),
            due_today: SourceRef::Single(due_today.id),
            due_tomorrow: SourceRef::Single(due_tomorrow.id),
            wednesdays: SourceRef::Recurring(wednesdays.id),
        };
        for t in [due_today, due_tomorrow, deleted] {
            store.insert_single(t).await.unwrap();
        }
        for d in [wednesdays, mondays] {
            store.insert_recurring(d).await.unwrap();
        }
        seeded
    }

    fn materializer(store: &InMemoryStore, atomic: bool) -> TodayMaterializer {
        TodayMaterializer::new(Arc::new(store.clone()), Arc::new(store.clone()), tz(), atomic)
    }

    async fn sources(store: &InMemoryStore) -> BTreeSet<SourceRef> {
        store.list().await.unwrap().iter().map(|i| i.source).collect()
    }

    #[tokio::test]
    async fn refresh_projects_due_sources_only() {
        let s = seeded().await;
        let report = materializer(&s.store, true).refresh(now()).await.unwrap();

        assert_eq!(report.total(), 2);
        assert_eq!(sources(&s.store).await, BTreeSet::from([s.due_today, s.wednesdays]));
    }

    #[tokio::test]
    async fn refresh_is_idempotent() {
        for atomic in [true, false] {
            let s = seeded().await;
            let m = materializer(&s.store, atomic);
            m.refresh(now()).await.unwrap();
            let first = s.store.list().await.unwrap();
            m.refresh(now()).await.unwrap();
            assert_eq!(s.store.list().await.unwrap(), first);
        }
    }

    #[tokio::test]
    async fn next_day_replaces_the_whole_set() {
        let s = seeded().await;
        let m = materializer(&s.store, true);
        m.refresh(now()).await.unwrap();

        let report = m.refresh(now() + chrono::Duration::days(1)).await.unwrap();
        assert_eq!(report.total(), 1);
        assert_eq!(sources(&s.store).await, BTreeSet::from([s.due_tomorrow]));
    }

    #[tokio::test]
    async fn days_open_counts_local_days() {
        let s = seeded().await;
        let updated = materializer(&s.store, true)
            .recompute_days_open(now())
            .await
            .unwrap();
        assert_eq!(updated, 2);
        for task in s.store.open_singles().await.unwrap() {
            assert_eq!(task.days_open, 3);
        }
    }

    #[tokio::test]
    async fn failing_category_does_not_block_the_other() {
        let s = seeded().await;
        let m = TodayMaterializer::new(
            Arc::new(BrokenSingles(s.store.clone())),
            Arc::new(s.store.clone()),
            tz(),
            true,
        );

        let report = m.refresh(now()).await.unwrap();
        assert_eq!(report.failed_categories, vec!["single".to_string()]);
        assert_eq!(report.recurring, 1);
        assert_eq!(sources(&s.store).await, BTreeSet::from([s.wednesdays]));
    }
}
