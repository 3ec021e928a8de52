//! Permission tiers derived from role and relationship to the entity.

use serde::{Deserialize, Serialize};

use super::entity::Assigned;
use super::user::User;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionLevel {
    None,
    Limited,
    Full,
}

/// `Full` for admins, the creator and the main responsible;
/// `Limited` for the other responsible people; `None` otherwise.
pub fn level<E: Assigned + ?Sized>(entity: &E, user: &User) -> PermissionLevel {
    let assignment = entity.assignment();
    if user.is_admin() || assignment.creator == user.id || assignment.main_responsible == user.id
    {
        PermissionLevel::Full
    } else if assignment.is_responsible(user.id) {
        PermissionLevel::Limited
    } else {
        PermissionLevel::None
    }
}

/// Only admins, the creator and the main responsible may cancel,
/// whatever tier they otherwise hold.
pub fn can_cancel<E: Assigned + ?Sized>(entity: &E, user: &User) -> bool {
    let assignment = entity.assignment();
    user.is_admin() || assignment.creator == user.id || assignment.main_responsible == user.id
}
