//! Domain identifiers (strongly-typed IDs).
//!
//! すべての ID は ULID ベースの `Id<T>` で、`T` は PhantomData のマーカー型です。
//! `UserId` と `OrgId` のように同じ ULID 表現を持つ ID を混同できません。
//!
//! 表示形式は `{prefix}{ULID}`（例: `user-01HV...`）。
//! serde では ULID 文字列そのもの（プレフィックスなし）になります。
//! [`Id::parse`] はどちらの形式も受け付け、正規形に揃えます。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use ulid::Ulid;

/// IdMarker は各 ID 型のマーカー trait
pub trait IdMarker: Send + Sync + 'static {
    /// Display で使うプレフィックス（例: "user-", "task-"）
    fn prefix() -> &'static str;

    /// Human-readable kind name used in error messages.
    fn kind() -> &'static str;
}

/// ジェネリック ID 型
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    /// ULID から Id を作成
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    /// 内部の ULID を取得
    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }

    /// Re-tag the same ULID as another id kind.
    ///
    /// Used where one entity's identity is derived from another's
    /// (a today-instance shares the ULID of its source definition).
    pub fn cast<U: IdMarker>(self) -> Id<U> {
        Id::from_ulid(self.ulid)
    }

    /// Parse either the prefixed display form or a bare ULID, in any case.
    pub fn parse(raw: &str) -> Result<Self, IdParseError> {
        let trimmed = raw.trim();
        let lower = trimmed.to_ascii_lowercase();
        let body = match lower.strip_prefix(T::prefix()) {
            Some(_) => &trimmed[T::prefix().len()..],
            None => trimmed,
        };
        Ulid::from_string(&body.to_ascii_uppercase())
            .map(Self::from_ulid)
            .map_err(|_| IdParseError {
                kind: T::kind(),
                raw: raw.to_string(),
            })
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

impl<T: IdMarker> FromStr for Id<T> {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// An id string that is neither a ULID nor a prefixed ULID.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind} id: {raw:?}")]
pub struct IdParseError {
    pub kind: &'static str,
    pub raw: String,
}

// ========================================
// マーカー型の定義
// ========================================

macro_rules! id_marker {
    ($(#[$doc:meta])* $marker:ident, $prefix:literal, $kind:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum $marker {}

        impl IdMarker for $marker {
            fn prefix() -> &'static str {
                $prefix
            }

            fn kind() -> &'static str {
                $kind
            }
        }
    };
}

id_marker!(
    /// User のマーカー型
    User, "user-", "user"
);
id_marker!(
    /// Organization のマーカー型
    Org, "org-", "organization"
);
id_marker!(Project, "project-", "project");
id_marker!(
    /// 単発タスク（TaskDefinition）のマーカー型
    Task, "task-", "task"
);
id_marker!(
    /// 定期タスク（RecurringDefinition）のマーカー型
    Recurring, "recurring-", "recurring task"
);
id_marker!(Instance, "today-", "today instance");
id_marker!(Delinquency, "delay-", "delinquency record");
id_marker!(History, "history-", "history record");

// ========================================
// Type Alias（使いやすさのため）
// ========================================

pub type UserId = Id<User>;
pub type OrgId = Id<Org>;
pub type ProjectId = Id<Project>;

/// Identifier of a one-off task definition.
pub type TaskId = Id<Task>;

/// Identifier of a recurring task definition.
pub type RecurringId = Id<Recurring>;

/// Identifier of a today-instance (derived from its source's ULID).
pub type InstanceId = Id<Instance>;

pub type DelinquencyId = Id<Delinquency>;
pub type HistoryId = Id<History>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_uses_kind_prefix() {
        let ulid = Ulid::new();
        assert!(UserId::from_ulid(ulid).to_string().starts_with("user-"));
        assert!(TaskId::from_ulid(ulid).to_string().starts_with("task-"));
        assert!(RecurringId::from_ulid(ulid).to_string().starts_with("recurring-"));
    }

    #[test]
    fn parse_accepts_prefixed_and_bare_forms() {
        let id = UserId::from_ulid(Ulid::new());

        let prefixed: UserId = id.to_string().parse().unwrap();
        let bare = UserId::parse(&id.as_ulid().to_string()).unwrap();
        let lower = UserId::parse(&id.to_string().to_lowercase()).unwrap();

        assert_eq!(prefixed, id);
        assert_eq!(bare, id);
        assert_eq!(lower, id);
    }

    #[test]
    fn parse_rejects_garbage() {
        let err = OrgId::parse("org-not-a-ulid").unwrap_err();
        assert_eq!(err.kind, "organization");
    }

    #[test]
    fn serializes_as_bare_ulid_string() {
        let id = TaskId::from_ulid(Ulid::new());
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.as_ulid()));

        let back: TaskId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn cast_keeps_the_ulid() {
        let task = TaskId::from_ulid(Ulid::new());
        let instance: InstanceId = task.cast();
        assert_eq!(instance.as_ulid(), task.as_ulid());
    }

    #[test]
    fn phantom_data_does_not_consume_memory() {
        use std::mem::size_of;
        assert_eq!(size_of::<UserId>(), size_of::<Ulid>());
        assert_eq!(size_of::<InstanceId>(), 16);
    }
}
