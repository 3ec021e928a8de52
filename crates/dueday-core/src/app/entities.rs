//! Loading task-like entities by address.

use crate::domain::{CoreError, Entity, EntityRef, SourceRef, StoreError};
use crate::ports::{InstanceStore, TaskStore};

/// Resolve `target` to the source definition it addresses.
///
/// An instance address resolves to its source. Soft-deleted sources are
/// returned as-is; callers decide whether that is an error.
pub async fn load_source(
    tasks: &dyn TaskStore,
    instances: &dyn InstanceStore,
    target: EntityRef,
) -> Result<Entity, CoreError> {
    let source = match target {
        EntityRef::Single(id) => SourceRef::Single(id),
        EntityRef::Recurring(id) => SourceRef::Recurring(id),
        EntityRef::Instance(id) => {
            instances
                .get(id)
                .await?
                .ok_or_else(|| CoreError::not_found("today instance", id))?
                .source
        }
    };
    load(tasks, source).await
}

pub async fn load(tasks: &dyn TaskStore, source: SourceRef) -> Result<Entity, CoreError> {
    match source {
        SourceRef::Single(id) => tasks
            .get_single(id)
            .await?
            .map(Entity::Single)
            .ok_or_else(|| CoreError::not_found("task", id)),
        SourceRef::Recurring(id) => tasks
            .get_recurring(id)
            .await?
            .map(Entity::Recurring)
            .ok_or_else(|| CoreError::not_found("recurring task", id)),
    }
}

/// As [`load_source`], but a soft-deleted source is `NotFound`.
pub async fn load_live(
    tasks: &dyn TaskStore,
    instances: &dyn InstanceStore,
    target: EntityRef,
) -> Result<Entity, CoreError> {
    let entity = load_source(tasks, instances, target).await?;
    if entity.is_deleted() {
        return Err(CoreError::not_found("task", target));
    }
    Ok(entity)
}

/// Nothing more is expected of `source`: it is gone, deleted, or (for a
/// one-off task) complete or cancelled.
pub async fn is_settled(tasks: &dyn TaskStore, source: SourceRef) -> Result<bool, StoreError> {
    Ok(match source {
        SourceRef::Single(id) => tasks.get_single(id).await?.is_none_or(|t| t.is_archived()),
        SourceRef::Recurring(id) => tasks.get_recurring(id).await?.is_none_or(|d| d.is_deleted()),
    })
}
