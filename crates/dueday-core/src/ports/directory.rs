//! Directory ports - ユーザー・組織の参照
//!
//! 履歴の「人間向け表示」は [`DisplayNameResolver`] だけに依存します。
//! 差分アルゴリズムはリポジトリを直接呼びません。

use async_trait::async_trait;

use crate::domain::{OrgId, Organization, Reference, Role, StoreError, User, UserId};

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn user(&self, id: UserId) -> Result<Option<User>, StoreError>;

    async fn users_with_role(&self, role: Role) -> Result<Vec<User>, StoreError>;
}

#[async_trait]
pub trait OrgDirectory: Send + Sync {
    async fn organization(&self, id: OrgId) -> Result<Option<Organization>, StoreError>;
}

/// id → display string. `None` when the id is unknown.
#[async_trait]
pub trait DisplayNameResolver: Send + Sync {
    async fn display_name(&self, reference: &Reference) -> Option<String>;
}
