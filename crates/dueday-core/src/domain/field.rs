//! Editable fields: payload normalization, no-op detection and change planning.
//!
//! Everything here is pure. Resolving ids to display names happens in the
//! mutation engine through an injected resolver; [`FieldValue::render`] only
//! takes a lookup closure.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::calendar::local_to_utc;
use super::errors::CoreError;
use super::ids::{OrgId, ProjectId, UserId};
use super::instance::SourceKind;
use super::recurrence::FrequencyRule;
use super::task::{Assignment, Importance, RecurringDefinition, Status, TaskDefinition};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Title,
    Details,
    Importance,
    SubImportance,
    Status,
    Note,
    MainResponsible,
    Responsible,
    Organization,
    Project,
    DueDate,
    FinalDeadline,
    Frequency,
}

impl Field {
    /// Accepts snake_case and camelCase payload keys.
    pub fn parse(name: &str) -> Result<Self, CoreError> {
        let key: String = name
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();
        Ok(match key.as_str() {
            "title" => Field::Title,
            "details" => Field::Details,
            "importance" => Field::Importance,
            "subimportance" => Field::SubImportance,
            "status" => Field::Status,
            "note" | "notes" => Field::Note,
            "mainresponsible" => Field::MainResponsible,
            "responsible" | "responsiblepeople" => Field::Responsible,
            "organization" => Field::Organization,
            "project" => Field::Project,
            "duedate" => Field::DueDate,
            "finaldeadline" => Field::FinalDeadline,
            "frequency" => Field::Frequency,
            _ => {
                return Err(CoreError::Validation(format!("unknown field {name:?}")));
            }
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Field::Title => "title",
            Field::Details => "details",
            Field::Importance => "importance",
            Field::SubImportance => "sub_importance",
            Field::Status => "status",
            Field::Note => "note",
            Field::MainResponsible => "main_responsible",
            Field::Responsible => "responsible",
            Field::Organization => "organization",
            Field::Project => "project",
            Field::DueDate => "due_date",
            Field::FinalDeadline => "final_deadline",
            Field::Frequency => "frequency",
        }
    }

    /// The only fields a `limited` actor may write, into their own row.
    pub fn is_personal(self) -> bool {
        matches!(self, Field::Status | Field::Note)
    }

    pub fn applies_to(self, kind: SourceKind) -> bool {
        match self {
            Field::DueDate | Field::FinalDeadline => kind == SourceKind::Single,
            Field::Frequency => kind == SourceKind::Recurring,
            _ => true,
        }
    }

    /// Status and notes of a recurring definition live in its dated notes and
    /// are never bulk-edited.
    pub fn is_protected_on(self, kind: SourceKind) -> bool {
        kind == SourceKind::Recurring && self.is_personal()
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An id that can be humanized into a display name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Reference {
    User(UserId),
    Org(OrgId),
}

/// A normalized field value. Equality is the no-op test.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Empty,
    Text(String),
    Importance(Importance),
    Status(Status),
    User(UserId),
    Users(BTreeSet<UserId>),
    Org(OrgId),
    Project(ProjectId),
    Time(DateTime<Utc>),
    Rule(FrequencyRule),
}

impl FieldValue {
    fn text(value: &Option<String>) -> Self {
        match value {
            Some(s) => FieldValue::Text(s.clone()),
            None => FieldValue::Empty,
        }
    }

    fn time(value: Option<DateTime<Utc>>) -> Self {
        value.map(FieldValue::Time).unwrap_or(FieldValue::Empty)
    }

    /// Ids in this value that should be shown by name.
    pub fn references(&self) -> Vec<Reference> {
        match self {
            FieldValue::User(id) => vec![Reference::User(*id)],
            FieldValue::Users(ids) => ids.iter().map(|id| Reference::User(*id)).collect(),
            FieldValue::Org(id) => vec![Reference::Org(*id)],
            _ => Vec::new(),
        }
    }

    /// Display string for history. Known ids become names; unknown ids stay ids.
    pub fn render<F>(&self, lookup: F, tz: &FixedOffset) -> Option<String>
    where
        F: Fn(&Reference) -> Option<String>,
    {
        let name_of = |r: Reference| {
            lookup(&r).unwrap_or_else(|| match r {
                Reference::User(id) => id.to_string(),
                Reference::Org(id) => id.to_string(),
            })
        };
        match self {
            FieldValue::Empty => None,
            FieldValue::Text(s) => Some(s.clone()),
            FieldValue::Importance(i) => Some(i.to_string()),
            FieldValue::Status(s) => Some(s.to_string()),
            FieldValue::User(id) => Some(name_of(Reference::User(*id))),
            FieldValue::Users(ids) => {
                let mut names: Vec<String> =
                    ids.iter().map(|id| name_of(Reference::User(*id))).collect();
                names.sort();
                Some(names.join(", "))
            }
            FieldValue::Org(id) => Some(name_of(Reference::Org(*id))),
            FieldValue::Project(id) => Some(id.to_string()),
            FieldValue::Time(t) => Some(t.with_timezone(tz).format("%Y-%m-%d %H:%M").to_string()),
            FieldValue::Rule(rule) => Some(rule.to_string()),
        }
    }
}

/// Turn a raw payload value into the canonical form for `field`.
pub fn normalize(field: Field, raw: &Value, tz: &FixedOffset) -> Result<FieldValue, CoreError> {
    let bad = |what: &str| CoreError::Validation(format!("{field}: {what}"));
    match field {
        Field::Title => match raw.as_str().map(str::trim) {
            Some(s) if !s.is_empty() => Ok(FieldValue::Text(s.to_string())),
            _ => Err(bad("expected a non-empty string")),
        },
        Field::Details | Field::SubImportance | Field::Note => match raw {
            Value::Null => Ok(FieldValue::Empty),
            Value::String(s) if s.trim().is_empty() => Ok(FieldValue::Empty),
            Value::String(s) => Ok(FieldValue::Text(s.trim().to_string())),
            _ => Err(bad("expected a string or null")),
        },
        Field::Importance => {
            let s = raw.as_str().ok_or_else(|| bad("expected a string"))?;
            Ok(FieldValue::Importance(s.parse()?))
        }
        Field::Status => {
            let s = raw.as_str().ok_or_else(|| bad("expected a string"))?;
            Ok(FieldValue::Status(s.parse()?))
        }
        Field::MainResponsible => {
            let s = raw.as_str().ok_or_else(|| bad("expected a user id"))?;
            Ok(FieldValue::User(UserId::parse(s)?))
        }
        Field::Responsible => {
            let items = raw.as_array().ok_or_else(|| bad("expected a list of user ids"))?;
            let mut ids = BTreeSet::new();
            for item in items {
                let s = item.as_str().ok_or_else(|| bad("expected a list of user ids"))?;
                ids.insert(UserId::parse(s)?);
            }
            if ids.is_empty() {
                return Err(bad("at least one responsible person is required"));
            }
            Ok(FieldValue::Users(ids))
        }
        Field::Organization => {
            let s = raw.as_str().ok_or_else(|| bad("expected an organization id"))?;
            Ok(FieldValue::Org(OrgId::parse(s)?))
        }
        Field::Project => match raw {
            Value::Null => Ok(FieldValue::Empty),
            Value::String(s) => Ok(FieldValue::Project(ProjectId::parse(s)?)),
            _ => Err(bad("expected a project id or null")),
        },
        Field::DueDate => match raw {
            Value::Null => Err(bad("a due date is required")),
            other => Ok(FieldValue::Time(parse_instant(other, tz).ok_or_else(|| bad("not a date"))?)),
        },
        Field::FinalDeadline => match raw {
            Value::Null => Ok(FieldValue::Empty),
            other => Ok(FieldValue::Time(parse_instant(other, tz).ok_or_else(|| bad("not a date"))?)),
        },
        Field::Frequency => {
            let rule: FrequencyRule = serde_json::from_value(raw.clone())
                .map_err(|e| CoreError::Validation(format!("malformed frequency rule: {e}")))?;
            Ok(FieldValue::Rule(rule.normalized()?))
        }
    }
}

/// RFC 3339, local `YYYY-MM-DDTHH:MM[:SS]`, local `YYYY-MM-DD` (start of day),
/// or epoch milliseconds.
pub fn parse_instant(raw: &Value, tz: &FixedOffset) -> Option<DateTime<Utc>> {
    match raw {
        Value::Number(n) => DateTime::from_timestamp_millis(n.as_i64()?),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(t) = DateTime::parse_from_rfc3339(s) {
                return Some(t.with_timezone(&Utc));
            }
            for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"] {
                if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
                    return Some(local_to_utc(naive.date(), naive.time(), tz));
                }
            }
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .map(|d| local_to_utc(d, NaiveTime::MIN, tz))
        }
        _ => None,
    }
}

/// Read and write access to the fields of a source definition.
pub trait Editable {
    fn kind(&self) -> SourceKind;
    fn get(&self, field: Field) -> FieldValue;
    fn set(&mut self, field: Field, value: FieldValue) -> Result<(), CoreError>;
}

fn get_common(
    field: Field,
    title: &str,
    details: &Option<String>,
    importance: Importance,
    sub_importance: &Option<String>,
    status: Status,
    assignment: &Assignment,
) -> Option<FieldValue> {
    Some(match field {
        Field::Title => FieldValue::Text(title.to_string()),
        Field::Details => FieldValue::text(details),
        Field::Importance => FieldValue::Importance(importance),
        Field::SubImportance => FieldValue::text(sub_importance),
        Field::Status => FieldValue::Status(status),
        Field::MainResponsible => FieldValue::User(assignment.main_responsible),
        Field::Responsible => FieldValue::Users(assignment.responsible.clone()),
        Field::Organization => FieldValue::Org(assignment.organization),
        Field::Project => assignment
            .project
            .map(FieldValue::Project)
            .unwrap_or(FieldValue::Empty),
        _ => return None,
    })
}

struct CommonMut<'a> {
    title: &'a mut String,
    details: &'a mut Option<String>,
    importance: &'a mut Importance,
    sub_importance: &'a mut Option<String>,
    status: &'a mut Status,
    assignment: &'a mut Assignment,
}

impl CommonMut<'_> {
    /// `Ok(false)` when the field is not a common one.
    fn set(self, field: Field, value: FieldValue) -> Result<bool, CoreError> {
        match (field, value) {
            (Field::Title, FieldValue::Text(s)) => *self.title = s,
            (Field::Details, FieldValue::Text(s)) => *self.details = Some(s),
            (Field::Details, FieldValue::Empty) => *self.details = None,
            (Field::Importance, FieldValue::Importance(i)) => *self.importance = i,
            (Field::SubImportance, FieldValue::Text(s)) => *self.sub_importance = Some(s),
            (Field::SubImportance, FieldValue::Empty) => *self.sub_importance = None,
            (Field::Status, FieldValue::Status(s)) => *self.status = s,
            (Field::MainResponsible, FieldValue::User(u)) => self.assignment.main_responsible = u,
            (Field::Responsible, FieldValue::Users(us)) => self.assignment.responsible = us,
            (Field::Organization, FieldValue::Org(o)) => self.assignment.organization = o,
            (Field::Project, FieldValue::Project(p)) => self.assignment.project = Some(p),
            (Field::Project, FieldValue::Empty) => self.assignment.project = None,
            (
                Field::Title
                | Field::Details
                | Field::Importance
                | Field::SubImportance
                | Field::Status
                | Field::MainResponsible
                | Field::Responsible
                | Field::Organization
                | Field::Project,
                other,
            ) => return Err(mismatch(field, &other)),
            _ => return Ok(false),
        }
        Ok(true)
    }
}

fn mismatch(field: Field, value: &FieldValue) -> CoreError {
    CoreError::Validation(format!("{field} cannot hold {value:?}"))
}

impl Editable for TaskDefinition {
    fn kind(&self) -> SourceKind {
        SourceKind::Single
    }

    fn get(&self, field: Field) -> FieldValue {
        if let Some(v) = get_common(
            field,
            &self.title,
            &self.details,
            self.importance,
            &self.sub_importance,
            self.status,
            &self.assignment,
        ) {
            return v;
        }
        match field {
            Field::Note => FieldValue::text(&self.note),
            Field::DueDate => FieldValue::Time(self.due_date),
            Field::FinalDeadline => FieldValue::time(self.final_deadline),
            _ => FieldValue::Empty,
        }
    }

    fn set(&mut self, field: Field, value: FieldValue) -> Result<(), CoreError> {
        let common = CommonMut {
            title: &mut self.title,
            details: &mut self.details,
            importance: &mut self.importance,
            sub_importance: &mut self.sub_importance,
            status: &mut self.status,
            assignment: &mut self.assignment,
        };
        match (field, value) {
            (Field::Note, FieldValue::Text(s)) => self.note = Some(s),
            (Field::Note, FieldValue::Empty) => self.note = None,
            (Field::DueDate, FieldValue::Time(t)) => self.due_date = t,
            (Field::FinalDeadline, FieldValue::Time(t)) => self.final_deadline = Some(t),
            (Field::FinalDeadline, FieldValue::Empty) => self.final_deadline = None,
            (field, value) => {
                let shown = value.clone();
                if !common.set(field, value)? {
                    return Err(mismatch(field, &shown));
                }
            }
        }
        Ok(())
    }
}

impl Editable for RecurringDefinition {
    fn kind(&self) -> SourceKind {
        SourceKind::Recurring
    }

    fn get(&self, field: Field) -> FieldValue {
        if let Some(v) = get_common(
            field,
            &self.title,
            &self.details,
            self.importance,
            &self.sub_importance,
            self.status,
            &self.assignment,
        ) {
            return v;
        }
        match field {
            Field::Frequency => FieldValue::Rule(self.frequency.clone()),
            _ => FieldValue::Empty,
        }
    }

    fn set(&mut self, field: Field, value: FieldValue) -> Result<(), CoreError> {
        let common = CommonMut {
            title: &mut self.title,
            details: &mut self.details,
            importance: &mut self.importance,
            sub_importance: &mut self.sub_importance,
            status: &mut self.status,
            assignment: &mut self.assignment,
        };
        match (field, value) {
            (Field::Frequency, FieldValue::Rule(rule)) => self.frequency = rule,
            (field, value) => {
                let shown = value.clone();
                if !common.set(field, value)? {
                    return Err(mismatch(field, &shown));
                }
            }
        }
        Ok(())
    }
}

/// One field whose value truly changes.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldChange {
    pub field: Field,
    pub before: FieldValue,
    pub after: FieldValue,
}

/// Compare normalized updates against `entity` and return the real changes.
///
/// Beyond plain diffing:
/// - leaving the `immediate` class clears `sub_importance`, as its own change;
/// - a new main responsible joins the responsible set;
/// - a responsible set without the main responsible is rejected.
pub fn plan_changes<E: Editable + ?Sized>(
    entity: &E,
    updates: &[(Field, FieldValue)],
) -> Result<Vec<FieldChange>, CoreError> {
    let mut changes: Vec<FieldChange> = Vec::new();
    let push = |changes: &mut Vec<FieldChange>, field: Field, after: FieldValue| {
        changes.retain(|c| c.field != field);
        let before = entity.get(field);
        if before != after {
            changes.push(FieldChange { field, before, after });
        }
    };

    for (field, value) in updates {
        push(&mut changes, *field, value.clone());
    }

    let planned = |changes: &[FieldChange], field: Field| {
        changes
            .iter()
            .find(|c| c.field == field)
            .map(|c| c.after.clone())
            .unwrap_or_else(|| entity.get(field))
    };

    if let FieldValue::User(main) = planned(&changes, Field::MainResponsible) {
        let main_changed = changes.iter().any(|c| c.field == Field::MainResponsible);
        if let FieldValue::Users(mut set) = planned(&changes, Field::Responsible) {
            if !set.contains(&main) {
                let set_changed = changes.iter().any(|c| c.field == Field::Responsible);
                if set_changed && !main_changed {
                    return Err(CoreError::Validation(format!(
                        "main responsible {main} cannot be removed from the responsible people"
                    )));
                }
                set.insert(main);
                push(&mut changes, Field::Responsible, FieldValue::Users(set));
            }
        }
    }

    let importance_changed = changes.iter().any(|c| c.field == Field::Importance);
    if importance_changed
        && planned(&changes, Field::Importance) != FieldValue::Importance(Importance::Immediate)
    {
        push(&mut changes, Field::SubImportance, FieldValue::Empty);
    }

    Ok(changes)
}

/// Write planned changes into the entity.
pub fn apply_changes<E: Editable + ?Sized>(
    entity: &mut E,
    changes: &[FieldChange],
) -> Result<(), CoreError> {
    for change in changes {
        entity.set(change.field, change.after.clone())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ids::TaskId;
    use chrono::TimeZone;
    use serde_json::json;
    use ulid::Ulid;

    fn tz() -> FixedOffset {
        FixedOffset::east_opt(3 * 3600).unwrap()
    }

    fn uid() -> UserId {
        UserId::from_ulid(Ulid::new())
    }

    fn task() -> TaskDefinition {
        let main = uid();
        let now = Utc.with_ymd_and_hms(2024, 4, 10, 6, 0, 0).unwrap();
        TaskDefinition {
            id: TaskId::from_ulid(Ulid::new()),
            title: "Quarterly report".into(),
            details: None,
            importance: Importance::Immediate,
            sub_importance: Some("today".into()),
            status: Status::Pending,
            note: None,
            assignment: Assignment::new(main, main, [], OrgId::from_ulid(Ulid::new())),
            due_date: now,
            final_deadline: None,
            deletion: None,
            hidden_for: BTreeSet::new(),
            days_open: 0,
            created_at: now,
            updated_at: now,
            revision: 0,
        }
    }

    #[test]
    fn field_names_accept_both_cases() {
        assert_eq!(Field::parse("dueDate").unwrap(), Field::DueDate);
        assert_eq!(Field::parse("sub_importance").unwrap(), Field::SubImportance);
        assert_eq!(Field::parse("notes").unwrap(), Field::Note);
        assert!(Field::parse("colour").is_err());
    }

    #[test]
    fn date_only_strings_are_local_midnight() {
        let value = normalize(Field::DueDate, &json!("2024-04-10"), &tz()).unwrap();
        assert_eq!(
            value,
            FieldValue::Time(Utc.with_ymd_and_hms(2024, 4, 9, 21, 0, 0).unwrap())
        );
    }

    #[test]
    fn rfc3339_keeps_the_instant() {
        let value = normalize(Field::DueDate, &json!("2024-04-10T10:00:00+03:00"), &tz()).unwrap();
        assert_eq!(
            value,
            FieldValue::Time(Utc.with_ymd_and_hms(2024, 4, 10, 7, 0, 0).unwrap())
        );
    }

    #[test]
    fn responsible_lists_are_order_insensitive() {
        let (a, b) = (uid(), uid());
        let one = normalize(Field::Responsible, &json!([a.to_string(), b.to_string()]), &tz());
        let two = normalize(
            Field::Responsible,
            &json!([b.as_ulid().to_string(), a.to_string()]),
            &tz(),
        );
        assert_eq!(one.unwrap(), two.unwrap());
    }

    #[test]
    fn disallowed_status_is_rejected() {
        let err = normalize(Field::Status, &json!("exploded"), &tz()).unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn same_value_is_not_a_change() {
        let t = task();
        let changes = plan_changes(&t, &[(Field::Title, FieldValue::Text(t.title.clone()))]).unwrap();
        assert!(changes.is_empty());
    }

    #[test]
    fn leaving_immediate_clears_sub_importance() {
        let mut t = task();
        let changes =
            plan_changes(&t, &[(Field::Importance, FieldValue::Importance(Importance::Normal))])
                .unwrap();
        assert_eq!(changes.len(), 2);
        let cleared = changes.iter().find(|c| c.field == Field::SubImportance).unwrap();
        assert_eq!(cleared.before, FieldValue::Text("today".into()));
        assert_eq!(cleared.after, FieldValue::Empty);

        apply_changes(&mut t, &changes).unwrap();
        assert_eq!(t.sub_importance, None);
        assert_eq!(t.importance, Importance::Normal);
    }

    #[test]
    fn new_main_responsible_joins_the_set() {
        let t = task();
        let newcomer = uid();
        let changes = plan_changes(&t, &[(Field::MainResponsible, FieldValue::User(newcomer))]).unwrap();
        let set = changes.iter().find(|c| c.field == Field::Responsible).unwrap();
        match &set.after {
            FieldValue::Users(users) => assert!(users.contains(&newcomer)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn dropping_main_from_the_set_is_rejected() {
        let t = task();
        let other = uid();
        let result = plan_changes(
            &t,
            &[(Field::Responsible, FieldValue::Users(BTreeSet::from([other])))],
        );
        assert!(matches!(result, Err(CoreError::Validation(_))));
    }

    #[test]
    fn render_humanizes_known_ids() {
        let (known, unknown) = (uid(), uid());
        let value = FieldValue::Users(BTreeSet::from([known, unknown]));
        let rendered = value
            .render(
                |r| match r {
                    Reference::User(id) if *id == known => Some("Ayşe".to_string()),
                    _ => None,
                },
                &tz(),
            )
            .unwrap();
        assert!(rendered.contains("Ayşe"));
        assert!(rendered.contains(&unknown.to_string()));
        assert!(!rendered.contains(&known.to_string()));
    }
}
