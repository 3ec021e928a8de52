//! Domain model (ids, definitions, rules, derived records, errors).
//!
//! ここにあるものはすべて純粋な型と関数です（I/O なし）。
//! - 正本: TaskDefinition / RecurringDefinition
//! - 派生: TodayInstance / DelinquencyRecord
//! - 監査: HistoryRecord

pub mod alert;
pub mod assignee;
pub mod calendar;
pub mod delinquency;
pub mod entity;
pub mod errors;
pub mod field;
pub mod history;
pub mod ids;
pub mod instance;
pub mod permission;
pub mod recurrence;
pub mod task;
pub mod user;

pub use alert::{Alert, AlertKind};
pub use assignee::PerAssigneeStatus;
pub use calendar::LocalDay;
pub use delinquency::DelinquencyRecord;
pub use entity::{Assigned, Entity, EntityRef};
pub use errors::{CoreError, ErrorKind, StoreError};
pub use field::{Field, FieldChange, FieldValue, Reference};
pub use history::{HistoryRecord, HistoryScope};
pub use ids::{
    DelinquencyId, HistoryId, InstanceId, OrgId, ProjectId, RecurringId, TaskId, UserId,
};
pub use instance::{SourceKind, SourceRef, TodayInstance};
pub use permission::PermissionLevel;
pub use recurrence::FrequencyRule;
pub use task::{
    Assignment, Deletion, Importance, RecurringDefinition, RecurringDraft, RecurringNote, Status,
    TaskDefinition, TaskDraft,
};
pub use user::{Organization, Role, User};
