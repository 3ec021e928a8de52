//! MutationEngine - 権限ティア付きの更新と監査履歴
//!
//! # フロー（apply）
//! 1. エンティティを読み込み、権限ティアを解決（none → Forbidden）
//! 2. limited: status / note だけを自分の個人行に書く（共有ドキュメントは不変）
//!    → 完了昇格チェック
//! 3. full: 値を正規化し、保存値と比較して no-op を除外、差分を適用
//! 4. 差分ゼロなら NoChanges
//! 5. 期限の変更は TodayInstance を同期的に調整（insert-if-absent / remove）
//! 6. エンティティと履歴を保存して返す
//!
//! 履歴の before / after は人間向けの表示文字列です。
//! id → 表示名の解決は [`DisplayNameResolver`] に任せます。

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde_json::Value;
use tracing::{debug, info};

use crate::app::entities::{load, load_live};
use crate::app::ledger::DelayLedger;
use crate::domain::assignee::all_complete;
use crate::domain::field::{Editable, apply_changes, normalize, plan_changes};
use crate::domain::permission::{self, PermissionLevel};
use crate::domain::{
    Assignment, CoreError, Deletion, Entity, EntityRef, Field, FieldChange, FieldValue,
    HistoryRecord, HistoryScope, Importance, LocalDay, OrgId, PerAssigneeStatus, ProjectId,
    RecurringDefinition, RecurringDraft, RecurringId, RecurringNote, Reference, SourceKind,
    SourceRef, Status,
    TaskDefinition, TaskDraft, TodayInstance, User, UserId,
};
use crate::impls::ActivityTracker;

use super::builder::Ports;

/// The entity as stored after the mutation, and the history it produced.
#[derive(Debug, Clone)]
pub struct MutationOutcome {
    pub entity: Entity,
    pub history: Vec<HistoryRecord>,
}

pub struct MutationEngine {
    ports: Ports,
    ledger: Arc<DelayLedger>,
    activity: Arc<ActivityTracker>,
    tz: FixedOffset,
}

impl MutationEngine {
    pub fn new(
        ports: Ports,
        ledger: Arc<DelayLedger>,
        activity: Arc<ActivityTracker>,
        tz: FixedOffset,
    ) -> Self {
        Self {
            ports,
            ledger,
            activity,
            tz,
        }
    }

    /// Apply a field-update payload (a JSON object) to `target` as `actor`.
    pub async fn apply(
        &self,
        target: EntityRef,
        actor: UserId,
        payload: &Value,
    ) -> Result<MutationOutcome, CoreError> {
        let now = self.ports.clock.now();
        let user = self.actor(actor).await?;
        let entity = load_live(&*self.ports.tasks, &*self.ports.instances, target).await?;

        let tier = permission::level(&entity, &user);
        if tier == PermissionLevel::None {
            return Err(CoreError::Forbidden(format!(
                "{} has no access to {}",
                user.id,
                entity.source()
            )));
        }

        let fields = parse_fields(payload)?;
        if tier == PermissionLevel::Limited
            && let Some((field, _)) = fields.iter().find(|(f, _)| !f.is_personal())
        {
            return Err(CoreError::Forbidden(format!(
                "{} may only update status and note, not {field}",
                user.id
            )));
        }

        let kind = entity.source().kind();
        let mut updates = Vec::with_capacity(fields.len());
        for (field, raw) in fields {
            if !field.applies_to(kind) {
                return Err(CoreError::Validation(format!(
                    "{field} does not apply to {kind} tasks"
                )));
            }
            updates.push((field, normalize(field, raw, &self.tz)?));
        }

        let cancelling = updates
            .iter()
            .any(|(f, v)| *f == Field::Status && *v == FieldValue::Status(Status::Cancelled));
        if cancelling && !permission::can_cancel(&entity, &user) {
            return Err(CoreError::Forbidden(format!(
                "only an admin, the creator or the main responsible may cancel {}",
                entity.source()
            )));
        }

        // Status and note on a recurring definition are always dated notes.
        let personal = tier == PermissionLevel::Limited
            || (kind == SourceKind::Recurring && updates.iter().all(|(f, _)| f.is_personal()));
        let outcome = if personal {
            self.apply_personal(entity, &user, tier, &updates, now).await?
        } else {
            self.apply_shared(entity, &user, updates, now).await?
        };

        self.activity.touch(actor, now);
        info!(
            source = %outcome.entity.source(),
            actor = %actor,
            changes = outcome.history.len(),
            "mutation applied"
        );
        Ok(outcome)
    }

    /// Create a one-off task owned by `actor`.
    pub async fn create_single(
        &self,
        draft: TaskDraft,
        actor: UserId,
    ) -> Result<TaskDefinition, CoreError> {
        let now = self.ports.clock.now();
        let user = self.actor(actor).await?;
        let assignment = self
            .draft_assignment(
                user.id,
                draft.main_responsible,
                draft.responsible,
                draft.organization,
                draft.project,
            )
            .await?;

        let task = TaskDefinition {
            id: self.ports.ids.task_id(),
            title: draft_title(&draft.title)?,
            details: draft.details,
            importance: draft.importance,
            sub_importance: sub_importance_for(draft.importance, draft.sub_importance),
            status: Status::Pending,
            note: None,
            assignment,
            due_date: draft.due_date,
            final_deadline: draft.final_deadline,
            deletion: None,
            hidden_for: BTreeSet::new(),
            days_open: 0,
            created_at: now,
            updated_at: now,
            revision: 0,
        };
        self.ports.tasks.insert_single(task.clone()).await?;

        let source = SourceRef::Single(task.id);
        self.record_created(source, &task.title, user.id, now).await?;
        self.reconcile_instance(&task, now).await?;
        self.activity.touch(actor, now);
        info!(source = %source, actor = %actor, "task created");
        Ok(task)
    }

    /// Create a recurring task owned by `actor`.
    pub async fn create_recurring(
        &self,
        draft: RecurringDraft,
        actor: UserId,
    ) -> Result<RecurringDefinition, CoreError> {
        let now = self.ports.clock.now();
        let user = self.actor(actor).await?;
        let frequency = draft.frequency.normalized()?;
        let assignment = self
            .draft_assignment(
                user.id,
                draft.main_responsible,
                draft.responsible,
                draft.organization,
                draft.project,
            )
            .await?;

        let def = RecurringDefinition {
            id: self.ports.ids.recurring_id(),
            title: draft_title(&draft.title)?,
            details: draft.details,
            importance: draft.importance,
            sub_importance: sub_importance_for(draft.importance, draft.sub_importance),
            status: Status::Pending,
            assignment,
            frequency,
            notes: Vec::new(),
            deletion: None,
            hidden_for: BTreeSet::new(),
            created_at: now,
            updated_at: now,
            revision: 0,
        };
        self.ports.tasks.insert_recurring(def.clone()).await?;

        let source = SourceRef::Recurring(def.id);
        self.record_created(source, &def.title, user.id, now).await?;
        let today = LocalDay::containing(now, &self.tz);
        if def.frequency.is_due_on(today.date) {
            self.ports
                .instances
                .insert_if_absent(TodayInstance::from_recurring(&def, today.date))
                .await?;
        }
        self.activity.touch(actor, now);
        info!(source = %source, actor = %actor, rule = %def.frequency, "recurring task created");
        Ok(def)
    }

    /// Record `actor`'s own status (and note) on a recurring task for `date`.
    pub async fn add_recurring_note(
        &self,
        id: RecurringId,
        actor: UserId,
        status: Status,
        text: Option<String>,
        date: NaiveDate,
    ) -> Result<MutationOutcome, CoreError> {
        let now = self.ports.clock.now();
        let user = self.actor(actor).await?;
        let Entity::Recurring(def) =
            load_live(&*self.ports.tasks, &*self.ports.instances, EntityRef::Recurring(id)).await?
        else {
            return Err(CoreError::not_found("recurring task", id));
        };

        let tier = permission::level(&def, &user);
        if tier == PermissionLevel::None {
            return Err(CoreError::Forbidden(format!("{} has no access to {}", user.id, def.id)));
        }
        if status == Status::Cancelled && !permission::can_cancel(&def, &user) {
            return Err(CoreError::Forbidden(format!(
                "only an admin, the creator or the main responsible may cancel {}",
                def.id
            )));
        }

        let text = text
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .map(FieldValue::Text)
            .unwrap_or(FieldValue::Empty);
        let updates = [(Field::Status, FieldValue::Status(status)), (Field::Note, text)];
        let outcome = self.write_note(def, &user, tier, &updates, date, now).await?;
        self.activity.touch(actor, now);
        Ok(outcome)
    }

    /// Soft-delete `target` (full tier) or hide it from `actor` (limited tier).
    pub async fn delete(
        &self,
        target: EntityRef,
        actor: UserId,
    ) -> Result<MutationOutcome, CoreError> {
        let now = self.ports.clock.now();
        let user = self.actor(actor).await?;
        let mut entity = load_live(&*self.ports.tasks, &*self.ports.instances, target).await?;
        let source = entity.source();

        let (field, scope) = match permission::level(&entity, &user) {
            PermissionLevel::None => {
                return Err(CoreError::Forbidden(format!(
                    "{} has no access to {source}",
                    user.id
                )));
            }
            PermissionLevel::Full => {
                let deletion = Some(Deletion { at: now, by: actor });
                match &mut entity {
                    Entity::Single(task) => task.deletion = deletion,
                    Entity::Recurring(def) => def.deletion = deletion,
                    Entity::Instance(_) => return Err(instance_not_addressable()),
                }
                ("deleted", HistoryScope::Shared)
            }
            PermissionLevel::Limited => {
                let hidden_for = match &mut entity {
                    Entity::Single(task) => &mut task.hidden_for,
                    Entity::Recurring(def) => &mut def.hidden_for,
                    Entity::Instance(_) => return Err(instance_not_addressable()),
                };
                if !hidden_for.insert(actor) {
                    return Err(CoreError::NoChanges);
                }
                ("hidden", HistoryScope::Personal)
            }
        };
        touch_updated_at(&mut entity, now);
        self.save(&mut entity).await?;

        let history = vec![HistoryRecord {
            id: self.ports.ids.history_id(),
            source,
            field: field.to_string(),
            before: None,
            after: Some(now.with_timezone(&self.tz).format("%Y-%m-%d %H:%M").to_string()),
            actor,
            at: now,
            scope,
        }];
        self.ports.history.append(&history).await?;

        if scope == HistoryScope::Shared {
            self.ports.instances.remove_by_source(source).await?;
            self.ledger.resolve(source, actor, true).await?;
        } else {
            self.sync_instance(&entity).await?;
        }
        self.activity.touch(actor, now);
        info!(source = %source, actor = %actor, action = field, "task removed from view");
        Ok(MutationOutcome { entity, history })
    }

    async fn actor(&self, id: UserId) -> Result<User, CoreError> {
        self.ports
            .users
            .user(id)
            .await?
            .ok_or_else(|| CoreError::not_found("user", id))
    }

    /// Personal status / note, written to the actor's own row.
    async fn apply_personal(
        &self,
        entity: Entity,
        user: &User,
        tier: PermissionLevel,
        updates: &[(Field, FieldValue)],
        now: DateTime<Utc>,
    ) -> Result<MutationOutcome, CoreError> {
        match entity {
            Entity::Single(task) => self.write_assignee_row(task, user, updates, now).await,
            Entity::Recurring(def) => {
                let today = LocalDay::containing(now, &self.tz).date;
                self.write_note(def, user, tier, updates, today, now).await
            }
            Entity::Instance(_) => Err(instance_not_addressable()),
        }
    }

    async fn write_assignee_row(
        &self,
        mut task: TaskDefinition,
        user: &User,
        updates: &[(Field, FieldValue)],
        now: DateTime<Utc>,
    ) -> Result<MutationOutcome, CoreError> {
        let mut row = match self.ports.assignees.find(task.id, user.id).await? {
            Some(row) => row,
            None => {
                let mut row = PerAssigneeStatus::new(task.id, user.id, now);
                row.status = task.status;
                row
            }
        };

        let mut changes = Vec::new();
        for (field, after) in updates {
            let before = match field {
                Field::Status => FieldValue::Status(row.status),
                _ => row.note.clone().map(FieldValue::Text).unwrap_or(FieldValue::Empty),
            };
            if before == *after {
                continue;
            }
            match after {
                FieldValue::Status(status) => row.status = *status,
                FieldValue::Text(text) => row.note = Some(text.clone()),
                _ => row.note = None,
            }
            changes.push(FieldChange {
                field: *field,
                before,
                after: after.clone(),
            });
        }
        if changes.is_empty() {
            return Err(CoreError::NoChanges);
        }
        row.updated_at = now;
        self.ports.assignees.upsert(row.clone()).await?;

        let source = SourceRef::Single(task.id);
        let mut history = self
            .humanize(source, user.id, &changes, HistoryScope::Personal, now)
            .await;

        // Completion promotion: every row complete → the task is complete.
        let rows = self.ports.assignees.list_for_task(task.id).await?;
        let promote = all_complete(&rows) && task.status != Status::Complete;
        if promote {
            let promoted = FieldChange {
                field: Field::Status,
                before: FieldValue::Status(task.status),
                after: FieldValue::Status(Status::Complete),
            };
            task.status = Status::Complete;
            task.updated_at = now;
            task.revision = self.ports.tasks.save_single(&task).await?;
            history.extend(
                self.humanize(source, user.id, &[promoted], HistoryScope::Shared, now)
                    .await,
            );
            info!(source = %source, "all assignees complete; task promoted");
        }
        self.ports.history.append(&history).await?;

        // A promoted task is complete for everyone, so its record retires.
        if promote {
            self.ledger.resolve(source, user.id, true).await?;
        } else if row.status.is_resolved() {
            self.ledger.resolve(source, user.id, false).await?;
        }
        let entity = Entity::Single(task);
        self.sync_instance(&entity).await?;
        Ok(MutationOutcome { entity, history })
    }

    /// Upsert `user`'s dated note on a recurring definition.
    async fn write_note(
        &self,
        mut def: RecurringDefinition,
        user: &User,
        tier: PermissionLevel,
        updates: &[(Field, FieldValue)],
        date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<MutationOutcome, CoreError> {
        let existing = def
            .notes
            .iter()
            .position(|n| n.date == date && n.author == user.id);
        let mut note = match existing {
            Some(i) => def.notes[i].clone(),
            None => RecurringNote {
                date,
                author: user.id,
                status: def.status,
                text: None,
                at: now,
            },
        };

        let mut changes = Vec::new();
        for (field, after) in updates {
            let before = match field {
                Field::Status => FieldValue::Status(note.status),
                _ => note.text.clone().map(FieldValue::Text).unwrap_or(FieldValue::Empty),
            };
            if before == *after {
                continue;
            }
            match after {
                FieldValue::Status(status) => note.status = *status,
                FieldValue::Text(text) => note.text = Some(text.clone()),
                _ => note.text = None,
            }
            changes.push(FieldChange {
                field: *field,
                before,
                after: after.clone(),
            });
        }
        if changes.is_empty() {
            return Err(CoreError::NoChanges);
        }
        note.at = now;
        let completed = note.status == Status::Complete;
        match existing {
            Some(i) => def.notes[i] = note,
            None => def.notes.push(note),
        }
        def.updated_at = now;
        def.revision = self.ports.tasks.save_recurring(&def).await?;

        let source = SourceRef::Recurring(def.id);
        let history = self
            .humanize(source, user.id, &changes, HistoryScope::Personal, now)
            .await;
        self.ports.history.append(&history).await?;

        if completed {
            self.ledger
                .resolve(source, user.id, tier == PermissionLevel::Full)
                .await?;
        }
        debug!(source = %source, actor = %user.id, %date, "recurring note written");
        Ok(MutationOutcome {
            entity: Entity::Recurring(def),
            history,
        })
    }

    /// Full-tier edit of the shared definition.
    async fn apply_shared(
        &self,
        mut entity: Entity,
        user: &User,
        updates: Vec<(Field, FieldValue)>,
        now: DateTime<Utc>,
    ) -> Result<MutationOutcome, CoreError> {
        let source = entity.source();
        let mut accepted = Vec::with_capacity(updates.len());
        for (field, value) in updates {
            if field.is_protected_on(source.kind()) {
                debug!(source = %source, %field, "protected field skipped");
                continue;
            }
            self.check_references(&value).await?;
            accepted.push((field, value));
        }

        let changes = match &mut entity {
            Entity::Single(task) => plan_and_apply(task, &accepted)?,
            Entity::Recurring(def) => plan_and_apply(def, &accepted)?,
            Entity::Instance(_) => return Err(instance_not_addressable()),
        };
        if changes.is_empty() {
            return Err(CoreError::NoChanges);
        }
        touch_updated_at(&mut entity, now);
        self.save(&mut entity).await?;

        let history = self
            .humanize(source, user.id, &changes, HistoryScope::Shared, now)
            .await;
        self.ports.history.append(&history).await?;

        for change in &changes {
            match (change.field, &change.before, &change.after) {
                (Field::DueDate, _, _) => {
                    if let Entity::Single(task) = &entity {
                        self.reconcile_instance(task, now).await?;
                    }
                }
                (Field::Status, _, FieldValue::Status(status)) if status.is_resolved() => {
                    self.ledger.resolve(source, user.id, true).await?;
                }
                (Field::Responsible, FieldValue::Users(before), FieldValue::Users(after)) => {
                    let removed: BTreeSet<UserId> = before.difference(after).copied().collect();
                    self.ledger.drop_assignees(source, &removed).await?;
                    if let SourceRef::Single(id) = source {
                        for user in &removed {
                            self.ports.assignees.remove(id, *user).await?;
                        }
                    }
                }
                _ => {}
            }
        }
        self.sync_instance(&entity).await?;

        Ok(MutationOutcome { entity, history })
    }

    /// Every referenced user and organization must exist.
    async fn check_references(&self, value: &FieldValue) -> Result<(), CoreError> {
        for reference in value.references() {
            let known = match reference {
                Reference::User(id) => self.ports.users.user(id).await?.is_some(),
                Reference::Org(id) => self.ports.orgs.organization(id).await?.is_some(),
            };
            if !known {
                let shown = match reference {
                    Reference::User(id) => id.to_string(),
                    Reference::Org(id) => id.to_string(),
                };
                return Err(CoreError::Validation(format!("unknown reference {shown}")));
            }
        }
        Ok(())
    }

    async fn draft_assignment(
        &self,
        creator: UserId,
        main: UserId,
        responsible: BTreeSet<UserId>,
        organization: OrgId,
        project: Option<ProjectId>,
    ) -> Result<Assignment, CoreError> {
        let mut assignment = Assignment::new(creator, main, responsible, organization);
        assignment.project = project;
        self.check_references(&FieldValue::Users(assignment.responsible.clone()))
            .await?;
        self.check_references(&FieldValue::Org(organization)).await?;
        assignment.validate()?;
        Ok(assignment)
    }

    async fn save(&self, entity: &mut Entity) -> Result<(), CoreError> {
        match entity {
            Entity::Single(task) => task.revision = self.ports.tasks.save_single(task).await?,
            Entity::Recurring(def) => def.revision = self.ports.tasks.save_recurring(def).await?,
            Entity::Instance(_) => return Err(instance_not_addressable()),
        }
        Ok(())
    }

    /// Keep the instance set consistent with a single task's due date.
    async fn reconcile_instance(
        &self,
        task: &TaskDefinition,
        now: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        let today = LocalDay::containing(now, &self.tz);
        let source = SourceRef::Single(task.id);
        if !task.is_deleted() && today.contains(task.due_date) {
            if self
                .ports
                .instances
                .insert_if_absent(TodayInstance::from_single(task, today.date))
                .await?
            {
                debug!(source = %source, "due today; instance added");
            }
        } else if self.ports.instances.remove_by_source(source).await? > 0 {
            debug!(source = %source, "no longer due today; instance removed");
        }
        Ok(())
    }

    /// Refresh the display copy of an existing instance.
    async fn sync_instance(&self, entity: &Entity) -> Result<(), CoreError> {
        let Some(existing) = self.ports.instances.find_by_source(entity.source()).await? else {
            return Ok(());
        };
        let fresh = match entity {
            Entity::Single(task) => TodayInstance::from_single(task, existing.day),
            Entity::Recurring(def) => TodayInstance::from_recurring(def, existing.day),
            Entity::Instance(_) => return Ok(()),
        };
        if fresh != existing {
            self.ports.instances.update(fresh).await?;
        }
        Ok(())
    }

    async fn record_created(
        &self,
        source: SourceRef,
        title: &str,
        actor: UserId,
        now: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        let record = HistoryRecord {
            id: self.ports.ids.history_id(),
            source,
            field: "created".to_string(),
            before: None,
            after: Some(title.to_string()),
            actor,
            at: now,
            scope: HistoryScope::Shared,
        };
        self.ports.history.append(&[record]).await?;
        Ok(())
    }

    /// History records with ids replaced by display names.
    async fn humanize(
        &self,
        source: SourceRef,
        actor: UserId,
        changes: &[FieldChange],
        scope: HistoryScope,
        now: DateTime<Utc>,
    ) -> Vec<HistoryRecord> {
        let references: BTreeSet<Reference> = changes
            .iter()
            .flat_map(|c| c.before.references().into_iter().chain(c.after.references()))
            .collect();
        let mut names = HashMap::new();
        for reference in references {
            if let Some(name) = self.ports.names.display_name(&reference).await {
                names.insert(reference, name);
            }
        }
        let lookup = |r: &Reference| names.get(r).cloned();

        changes
            .iter()
            .map(|c| HistoryRecord {
                id: self.ports.ids.history_id(),
                source,
                field: c.field.name().to_string(),
                before: c.before.render(lookup, &self.tz),
                after: c.after.render(lookup, &self.tz),
                actor,
                at: now,
                scope,
            })
            .collect()
    }

    /// Reload the current stored copy of a source.
    pub async fn current(&self, source: SourceRef) -> Result<Entity, CoreError> {
        load(&*self.ports.tasks, source).await
    }
}

fn parse_fields(payload: &Value) -> Result<Vec<(Field, &Value)>, CoreError> {
    let object = payload
        .as_object()
        .ok_or_else(|| CoreError::Validation("update payload must be an object".to_string()))?;
    if object.is_empty() {
        return Err(CoreError::NoChanges);
    }
    object
        .iter()
        .map(|(name, raw)| Ok((Field::parse(name)?, raw)))
        .collect()
}

fn plan_and_apply<E: Editable>(
    entity: &mut E,
    updates: &[(Field, FieldValue)],
) -> Result<Vec<FieldChange>, CoreError> {
    let changes = plan_changes(entity, updates)?;
    apply_changes(entity, &changes)?;
    Ok(changes)
}

fn touch_updated_at(entity: &mut Entity, now: DateTime<Utc>) {
    match entity {
        Entity::Single(task) => task.updated_at = now,
        Entity::Recurring(def) => def.updated_at = now,
        Entity::Instance(_) => {}
    }
}

fn draft_title(raw: &str) -> Result<String, CoreError> {
    let title = raw.trim();
    if title.is_empty() {
        return Err(CoreError::Validation("title must not be empty".to_string()));
    }
    Ok(title.to_string())
}

fn sub_importance_for(importance: Importance, sub: Option<String>) -> Option<String> {
    match importance {
        Importance::Immediate => sub.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
        _ => None,
    }
}

fn instance_not_addressable() -> CoreError {
    CoreError::Validation("today instances are edited through their source".to_string())
}
