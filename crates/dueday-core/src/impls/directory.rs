//! InMemoryDirectory / DirectoryResolver - ユーザー・組織ディレクトリ
//!
//! # 実装詳細
//! - 起動時に読み込んだユーザーと組織を HashMap で保持（以後は読み取りのみ）
//! - DirectoryResolver は UserDirectory / OrgDirectory を組み合わせて
//!   id → 表示名の解決だけを提供する

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{OrgId, Organization, Reference, Role, StoreError, User, UserId};
use crate::ports::{DisplayNameResolver, OrgDirectory, UserDirectory};

/// Read-only directory loaded up front.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDirectory {
    users: HashMap<UserId, User>,
    orgs: HashMap<OrgId, Organization>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, user: User) -> Self {
        self.users.insert(user.id, user);
        self
    }

    pub fn with_org(mut self, org: Organization) -> Self {
        self.orgs.insert(org.id, org);
        self
    }

    pub fn from_parts(
        users: impl IntoIterator<Item = User>,
        orgs: impl IntoIterator<Item = Organization>,
    ) -> Self {
        Self {
            users: users.into_iter().map(|u| (u.id, u)).collect(),
            orgs: orgs.into_iter().map(|o| (o.id, o)).collect(),
        }
    }

    pub fn users(&self) -> impl Iterator<Item = &User> {
        self.users.values()
    }

    pub fn organizations(&self) -> impl Iterator<Item = &Organization> {
        self.orgs.values()
    }
}

#[async_trait]
impl UserDirectory for InMemoryDirectory {
    async fn user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        Ok(self.users.get(&id).cloned())
    }

    async fn users_with_role(&self, role: Role) -> Result<Vec<User>, StoreError> {
        let mut users: Vec<User> = self
            .users
            .values()
            .filter(|u| u.role == role)
            .cloned()
            .collect();
        users.sort_by_key(|u| u.id);
        Ok(users)
    }
}

#[async_trait]
impl OrgDirectory for InMemoryDirectory {
    async fn organization(&self, id: OrgId) -> Result<Option<Organization>, StoreError> {
        Ok(self.orgs.get(&id).cloned())
    }
}

/// Display names from the user and organization directories.
///
/// Lookup failures are treated like unknown ids: the caller keeps the raw id.
pub struct DirectoryResolver {
    users: Arc<dyn UserDirectory>,
    orgs: Arc<dyn OrgDirectory>,
}

impl DirectoryResolver {
    pub fn new(users: Arc<dyn UserDirectory>, orgs: Arc<dyn OrgDirectory>) -> Self {
        Self { users, orgs }
    }
}

#[async_trait]
impl DisplayNameResolver for DirectoryResolver {
    async fn display_name(&self, reference: &Reference) -> Option<String> {
        match reference {
            Reference::User(id) => match self.users.user(*id).await {
                Ok(user) => user.map(|u| u.name),
                Err(err) => {
                    tracing::debug!(user = %id, error = %err, "user lookup failed");
                    None
                }
            },
            Reference::Org(id) => match self.orgs.organization(*id).await {
                Ok(org) => org.map(|o| o.name),
                Err(err) => {
                    tracing::debug!(org = %id, error = %err, "organization lookup failed");
                    None
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[tokio::test]
    async fn resolver_names_known_ids_only() {
        let ayse = User::new(UserId::from_ulid(Ulid::new()), "Ayşe", Role::Member);
        let org = Organization::new(OrgId::from_ulid(Ulid::new()), "Finance");
        let dir = Arc::new(InMemoryDirectory::new().with_user(ayse.clone()).with_org(org.clone()));
        let resolver = DirectoryResolver::new(dir.clone(), dir);

        assert_eq!(
            resolver.display_name(&Reference::User(ayse.id)).await.as_deref(),
            Some("Ayşe")
        );
        assert_eq!(
            resolver.display_name(&Reference::Org(org.id)).await.as_deref(),
            Some("Finance")
        );
        let stranger = UserId::from_ulid(Ulid::new());
        assert_eq!(resolver.display_name(&Reference::User(stranger)).await, None);
    }

    #[tokio::test]
    async fn role_filter_returns_admins() {
        let admin = User::new(UserId::from_ulid(Ulid::new()), "root", Role::Admin);
        let member = User::new(UserId::from_ulid(Ulid::new()), "bob", Role::Member);
        let dir = InMemoryDirectory::from_parts([admin.clone(), member], []);

        assert_eq!(dir.users_with_role(Role::Admin).await.unwrap(), vec![admin]);
    }
}
