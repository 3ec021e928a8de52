//! Shared fixtures for the app-layer unit tests.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use ulid::Ulid;

use crate::app::{App, AppBuilder};
use crate::config::Config;
use crate::domain::{
    Assignment, FrequencyRule, Importance, OrgId, Organization, RecurringDefinition, RecurringId,
    Role, Status, StoreError, TaskDefinition, TaskId, User, UserId,
};
use crate::impls::{InMemoryDirectory, InMemoryStore};
use crate::ports::{FixedClock, TaskStore};

pub fn tz() -> FixedOffset {
    FixedOffset::east_opt(3 * 3600).unwrap()
}

/// 2024-04-10 06:00 local, a Wednesday.
pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 4, 10, 3, 0, 0).unwrap()
}

/// Local wall-clock time on 2024-04-`day`.
pub fn local(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    tz().with_ymd_and_hms(2024, 4, day, hour, minute, 0)
        .unwrap()
        .with_timezone(&Utc)
}

/// A fully wired app over `store`, with the clock frozen at [`now`].
pub fn app(store: &InMemoryStore, cast: &Cast) -> App {
    let config = Config {
        timezone: "+03:00".into(),
        ..Config::default()
    };
    AppBuilder::new(config)
        .with_in_memory_store(store.clone())
        .with_directory(cast.directory())
        .with_clock(Arc::new(FixedClock::new(now())))
        .build()
        .unwrap()
}

/// Creator, main responsible, a helper, an outsider and an admin, in one org.
pub struct Cast {
    pub creator: User,
    pub main: User,
    pub helper: User,
    pub outsider: User,
    pub admin: User,
    pub org: Organization,
}

impl Cast {
    pub fn new() -> Self {
        let user = |name: &str, role| User::new(UserId::from_ulid(Ulid::new()), name, role);
        Self {
            creator: user("Cem", Role::Member),
            main: user("Merve", Role::Member),
            helper: user("Hakan", Role::Member),
            outsider: user("Oya", Role::Member),
            admin: user("Ada", Role::Admin),
            org: Organization::new(OrgId::from_ulid(Ulid::new()), "Operations"),
        }
    }

    pub fn assignment(&self) -> Assignment {
        Assignment::new(self.creator.id, self.main.id, [self.helper.id], self.org.id)
    }

    pub fn directory(&self) -> Arc<InMemoryDirectory> {
        Arc::new(InMemoryDirectory::from_parts(
            [
                self.creator.clone(),
                self.main.clone(),
                self.helper.clone(),
                self.outsider.clone(),
                self.admin.clone(),
            ],
            [self.org.clone()],
        ))
    }
}

pub fn single(assignment: Assignment, due: DateTime<Utc>) -> TaskDefinition {
    TaskDefinition {
        id: TaskId::from_ulid(Ulid::new()),
        title: "Pay suppliers".into(),
        details: None,
        importance: Importance::Immediate,
        sub_importance: Some("before noon".into()),
        status: Status::Pending,
        note: None,
        assignment,
        due_date: due,
        final_deadline: None,
        deletion: None,
        hidden_for: BTreeSet::new(),
        days_open: 0,
        created_at: now() - chrono::Duration::days(3),
        updated_at: now(),
        revision: 0,
    }
}

pub fn recurring(assignment: Assignment, frequency: FrequencyRule) -> RecurringDefinition {
    RecurringDefinition {
        id: RecurringId::from_ulid(Ulid::new()),
        title: "Check backups".into(),
        details: None,
        importance: Importance::Normal,
        sub_importance: None,
        status: Status::Pending,
        assignment,
        frequency,
        notes: Vec::new(),
        deletion: None,
        hidden_for: BTreeSet::new(),
        created_at: now() - chrono::Duration::days(30),
        updated_at: now(),
        revision: 0,
    }
}

/// Fails every single-task listing; delegates everything else.
pub struct BrokenSingles(pub InMemoryStore);

fn offline() -> StoreError {
    StoreError::Unavailable("tasks collection offline".into())
}

#[async_trait]
impl TaskStore for BrokenSingles {
    async fn get_single(&self, id: TaskId) -> Result<Option<TaskDefinition>, StoreError> {
        self.0.get_single(id).await
    }

    async fn insert_single(&self, task: TaskDefinition) -> Result<(), StoreError> {
        self.0.insert_single(task).await
    }

    async fn save_single(&self, task: &TaskDefinition) -> Result<u64, StoreError> {
        self.0.save_single(task).await
    }

    async fn singles_due_between(
        &self,
        _: DateTime<Utc>,
        _: DateTime<Utc>,
    ) -> Result<Vec<TaskDefinition>, StoreError> {
        Err(offline())
    }

    async fn singles_overdue(&self, _: DateTime<Utc>) -> Result<Vec<TaskDefinition>, StoreError> {
        Err(offline())
    }

    async fn open_singles(&self) -> Result<Vec<TaskDefinition>, StoreError> {
        Err(offline())
    }

    async fn set_days_open(&self, updates: &[(TaskId, i64)]) -> Result<(), StoreError> {
        self.0.set_days_open(updates).await
    }

    async fn get_recurring(
        &self,
        id: RecurringId,
    ) -> Result<Option<RecurringDefinition>, StoreError> {
        self.0.get_recurring(id).await
    }

    async fn insert_recurring(&self, def: RecurringDefinition) -> Result<(), StoreError> {
        self.0.insert_recurring(def).await
    }

    async fn save_recurring(&self, def: &RecurringDefinition) -> Result<u64, StoreError> {
        self.0.save_recurring(def).await
    }

    async fn active_recurring(&self) -> Result<Vec<RecurringDefinition>, StoreError> {
        self.0.active_recurring().await
    }
}
