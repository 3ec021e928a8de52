//! End-to-end daily cycle over the in-memory stores, with a frozen clock.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::json;
use ulid::Ulid;

use dueday_core::app::{App, AppBuilder, JobName};
use dueday_core::config::Config;
use dueday_core::domain::{
    CoreError, EntityRef, FrequencyRule, HistoryScope, Importance, OrgId, Organization,
    RecurringDraft, Role, SourceRef, Status, TaskDraft, User, UserId,
};
use dueday_core::impls::{InMemoryDirectory, InMemoryStore};
use dueday_core::observability::JobReport;
use dueday_core::ports::{FixedClock, InstanceStore, TaskStore};

/// Local wall-clock time (+03:00) on 2024-04-`day`.
fn local(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    chrono::FixedOffset::east_opt(3 * 3600)
        .unwrap()
        .with_ymd_and_hms(2024, 4, day, hour, minute, 0)
        .unwrap()
        .with_timezone(&Utc)
}

struct World {
    app: App,
    store: InMemoryStore,
    clock: Arc<FixedClock>,
    owner: User,
    helper: User,
    org: Organization,
}

fn world() -> World {
    let owner = User::new(UserId::from_ulid(Ulid::new()), "Selin", Role::Member);
    let helper = User::new(UserId::from_ulid(Ulid::new()), "Deniz", Role::Member);
    let admin = User::new(UserId::from_ulid(Ulid::new()), "Root", Role::Admin);
    let org = Organization::new(OrgId::from_ulid(Ulid::new()), "Warehouse");
    let directory = Arc::new(InMemoryDirectory::from_parts(
        [owner.clone(), helper.clone(), admin],
        [org.clone()],
    ));

    let store = InMemoryStore::new();
    let clock = Arc::new(FixedClock::new(local(10, 6, 0)));
    let config = Config::from_toml(
        r#"
timezone = "+03:00"
[materializer]
atomic_rebuild = true
"#,
    )
    .unwrap();
    let app = AppBuilder::new(config)
        .with_in_memory_store(store.clone())
        .with_directory(directory)
        .with_clock(clock.clone())
        .build()
        .unwrap();

    World {
        app,
        store,
        clock,
        owner,
        helper,
        org,
    }
}

impl World {
    fn task_draft(&self, due: DateTime<Utc>) -> TaskDraft {
        TaskDraft {
            title: "Count pallets".into(),
            details: None,
            importance: Importance::Immediate,
            sub_importance: Some("first thing".into()),
            main_responsible: self.owner.id,
            responsible: BTreeSet::from([self.helper.id]),
            organization: self.org.id,
            project: None,
            due_date: due,
            final_deadline: None,
        }
    }

    fn recurring_draft(&self, frequency: FrequencyRule) -> RecurringDraft {
        RecurringDraft {
            title: "Check the freezer log".into(),
            details: None,
            importance: Importance::Normal,
            sub_importance: None,
            main_responsible: self.owner.id,
            responsible: BTreeSet::from([self.helper.id]),
            organization: self.org.id,
            project: None,
            frequency,
        }
    }

    async fn today_sources(&self) -> Vec<SourceRef> {
        self.store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.source)
            .collect()
    }
}

#[tokio::test]
async fn refresh_twice_yields_the_same_set() {
    let w = world();
    let task = w
        .app
        .mutations
        .create_single(w.task_draft(local(10, 10, 0)), w.owner.id)
        .await
        .unwrap();
    w.app
        .mutations
        .create_recurring(w.recurring_draft(FrequencyRule::Daily { include_friday: true }), w.owner.id)
        .await
        .unwrap();

    w.app.run_job(JobName::MaterializeToday).await.unwrap();
    let first = w.store.list().await.unwrap();
    w.app.run_job(JobName::MaterializeToday).await.unwrap();
    let second = w.store.list().await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.len(), 2);
    assert_eq!(
        w.today_sources().await.iter().filter(|s| **s == SourceRef::Single(task.id)).count(),
        1
    );
}

#[tokio::test]
async fn due_date_moved_to_tomorrow_leaves_today_without_a_refresh() {
    let w = world();
    let task = w
        .app
        .mutations
        .create_single(w.task_draft(local(10, 10, 0)), w.owner.id)
        .await
        .unwrap();
    w.app.run_job(JobName::MaterializeToday).await.unwrap();
    assert_eq!(w.today_sources().await, vec![SourceRef::Single(task.id)]);

    w.app
        .mutations
        .apply(
            EntityRef::Single(task.id),
            w.owner.id,
            &json!({"dueDate": "2024-04-11T10:00"}),
        )
        .await
        .unwrap();
    assert!(w.today_sources().await.is_empty());
}

#[tokio::test]
async fn importance_downgrade_drops_sub_importance_and_records_it() {
    let w = world();
    let task = w
        .app
        .mutations
        .create_single(w.task_draft(local(12, 9, 0)), w.owner.id)
        .await
        .unwrap();

    w.app
        .mutations
        .apply(EntityRef::Single(task.id), w.owner.id, &json!({"importance": "high"}))
        .await
        .unwrap();

    let stored = w.store.get_single(task.id).await.unwrap().unwrap();
    assert_eq!(stored.sub_importance, None);

    let history = w
        .app
        .queries
        .history(EntityRef::Single(task.id), w.owner.id)
        .await
        .unwrap();
    let removal = history.iter().find(|h| h.field == "sub_importance").unwrap();
    assert_eq!(removal.before.as_deref(), Some("first thing"));
    assert_eq!(removal.after, None);
    assert_eq!(removal.scope, HistoryScope::Shared);
}

#[tokio::test]
async fn limited_cancel_is_forbidden_and_changes_nothing() {
    let w = world();
    let task = w
        .app
        .mutations
        .create_single(w.task_draft(local(12, 9, 0)), w.owner.id)
        .await
        .unwrap();

    let err = w
        .app
        .mutations
        .apply(EntityRef::Single(task.id), w.helper.id, &json!({"status": "cancelled"}))
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::Forbidden(_)));
    assert_eq!(err.status_code(), 403);
    assert_eq!(w.store.get_single(task.id).await.unwrap().unwrap(), task);
    assert_eq!(
        w.app.queries.final_status(task.id, w.helper.id).await.unwrap(),
        Status::Pending
    );
}

#[tokio::test]
async fn concurrent_reconciles_leave_one_pending_record_per_source() {
    let w = world();
    for day in [7, 8, 9] {
        w.app
            .mutations
            .create_single(w.task_draft(local(day, 12, 0)), w.owner.id)
            .await
            .unwrap();
    }

    let runs: Vec<_> = (0..6)
        .map(|_| {
            let jobs = w.app.jobs.clone();
            tokio::spawn(async move { jobs.run(JobName::ReconcileDelays).await })
        })
        .collect();
    let mut inserted = 0;
    for run in runs {
        match run.await.unwrap().unwrap() {
            JobReport::ReconcileDelays(report) => inserted += report.inserted,
            other => panic!("unexpected report {other:?}"),
        }
    }

    let pending = w.app.queries.pending_delinquencies().await.unwrap();
    let sources: BTreeSet<_> = pending.iter().map(|r| r.source).collect();
    assert_eq!(inserted, 3);
    assert_eq!(pending.len(), 3);
    assert_eq!(sources.len(), 3);
}

#[tokio::test]
async fn missed_monthly_rule_is_recorded_once() {
    let w = world();
    let def = w
        .app
        .mutations
        .create_recurring(w.recurring_draft(FrequencyRule::Monthly { day: 15 }), w.owner.id)
        .await
        .unwrap();

    w.clock.set(local(16, 0, 5));
    w.app.run_job(JobName::ReconcileDelays).await.unwrap();
    w.app.run_job(JobName::ReconcileDelays).await.unwrap();

    let pending = w.app.queries.pending_delinquencies().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].source, SourceRef::Recurring(def.id));
}

#[tokio::test]
async fn completed_monthly_rule_is_not_recorded() {
    let w = world();
    let def = w
        .app
        .mutations
        .create_recurring(w.recurring_draft(FrequencyRule::Monthly { day: 15 }), w.owner.id)
        .await
        .unwrap();

    w.clock.set(local(15, 17, 0));
    w.app
        .mutations
        .add_recurring_note(
            def.id,
            w.helper.id,
            Status::Complete,
            Some("all good".into()),
            local(15, 17, 0).date_naive(),
        )
        .await
        .unwrap();

    w.clock.advance(Duration::hours(8));
    w.app.run_job(JobName::ReconcileDelays).await.unwrap();
    assert!(w.app.queries.pending_delinquencies().await.unwrap().is_empty());
}

#[tokio::test]
async fn alerts_follow_pending_delays() {
    let w = world();
    w.app
        .mutations
        .create_single(w.task_draft(local(8, 12, 0)), w.owner.id)
        .await
        .unwrap();
    w.app.run_job(JobName::ReconcileDelays).await.unwrap();

    let first = w.app.run_job(JobName::GenerateAlerts).await.unwrap();
    let again = w.app.run_job(JobName::GenerateAlerts).await.unwrap();
    match (first, again) {
        (JobReport::GenerateAlerts(first), JobReport::GenerateAlerts(again)) => {
            assert_eq!(first.raised, 1);
            assert_eq!((again.raised, again.deduped), (0, 1));
        }
        other => panic!("unexpected reports {other:?}"),
    }
}
