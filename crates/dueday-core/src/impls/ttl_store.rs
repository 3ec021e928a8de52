//! TtlStore - 期限付きキーバリューストア
//!
//! プロセス全体のグローバルマップの代わりに使います。
//! 各エントリは挿入時刻 + TTL で失効し、読み出し時と `evict_expired` で削除されます。
//! ActivityTracker は `touch` のたびに期限切れを掃除します。
//! 時刻は呼び出し側が渡す（Clock port から）ので、テストでは FixedClock で進められます。

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::domain::UserId;

struct Entry<V> {
    value: V,
    expires_at: DateTime<Utc>,
}

/// Keyed store with explicit TTL eviction.
pub struct TtlStore<K, V> {
    ttl: Duration,
    entries: Mutex<HashMap<K, Entry<V>>>,
}

impl<K: Eq + Hash + Clone, V: Clone> TtlStore<K, V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<K, Entry<V>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Saturates at the latest representable instant.
    fn expiry(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_add_signed(self.ttl).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Insert or refresh `key`; its TTL restarts at `now`.
    pub fn insert(&self, key: K, value: V, now: DateTime<Utc>) {
        let expires_at = self.expiry(now);
        self.entries().insert(key, Entry { value, expires_at });
    }

    /// Insert only when `key` is absent or expired. `true` when inserted.
    pub fn insert_if_absent(&self, key: K, value: V, now: DateTime<Utc>) -> bool {
        let mut entries = self.entries();
        if entries.get(&key).is_some_and(|e| e.expires_at > now) {
            return false;
        }
        let expires_at = self.expiry(now);
        entries.insert(key, Entry { value, expires_at });
        true
    }

    pub fn get(&self, key: &K, now: DateTime<Utc>) -> Option<V> {
        let mut entries = self.entries();
        match entries.get(key) {
            Some(entry) if entry.expires_at > now => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.entries().remove(key).map(|e| e.value)
    }

    /// Live entries at `now`.
    pub fn live(&self, now: DateTime<Utc>) -> Vec<(K, V)> {
        self.entries()
            .iter()
            .filter(|(_, e)| e.expires_at > now)
            .map(|(k, e)| (k.clone(), e.value.clone()))
            .collect()
    }

    /// Drop every expired entry. Returns how many were dropped.
    pub fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, e| e.expires_at > now);
        before - entries.len()
    }

    /// Entries currently held, expired or not.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Last-activity time per user, forgotten after the TTL.
pub struct ActivityTracker {
    store: TtlStore<UserId, DateTime<Utc>>,
}

impl ActivityTracker {
    pub fn new(ttl: Duration) -> Self {
        Self {
            store: TtlStore::new(ttl),
        }
    }

    /// Record activity for `user` and drop everyone idle past the TTL.
    pub fn touch(&self, user: UserId, now: DateTime<Utc>) {
        let evicted = self.store.evict_expired(now);
        if evicted > 0 {
            debug!(evicted, "idle users forgotten");
        }
        self.store.insert(user, now, now);
    }

    pub fn last_seen(&self, user: UserId, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.store.get(&user, now)
    }

    pub fn active_users(&self, now: DateTime<Utc>) -> Vec<UserId> {
        let mut users: Vec<UserId> = self.store.live(now).into_iter().map(|(u, _)| u).collect();
        users.sort();
        users
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ulid::Ulid;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, 10, 6, 0, 0).unwrap()
    }

    #[test]
    fn entries_expire_after_ttl() {
        let store: TtlStore<&str, u32> = TtlStore::new(Duration::minutes(30));
        store.insert("a", 1, t0());

        assert_eq!(store.get(&"a", t0() + Duration::minutes(29)), Some(1));
        assert_eq!(store.get(&"a", t0() + Duration::minutes(30)), None);
        assert!(store.is_empty());
    }

    #[test]
    fn insert_if_absent_dedupes_until_expiry() {
        let store: TtlStore<u8, ()> = TtlStore::new(Duration::hours(24));
        assert!(store.insert_if_absent(7, (), t0()));
        assert!(!store.insert_if_absent(7, (), t0() + Duration::hours(1)));
        assert!(store.insert_if_absent(7, (), t0() + Duration::hours(25)));
    }

    #[test]
    fn eviction_bounds_memory() {
        let store: TtlStore<u32, u32> = TtlStore::new(Duration::seconds(10));
        for i in 0..100 {
            store.insert(i, i, t0());
        }
        store.insert(1000, 0, t0() + Duration::seconds(5));

        assert_eq!(store.evict_expired(t0() + Duration::seconds(10)), 100);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn huge_ttl_saturates_instead_of_overflowing() {
        let store: TtlStore<u8, ()> = TtlStore::new(Duration::MAX);
        store.insert(1, (), t0());
        assert!(!store.insert_if_absent(1, (), t0() + Duration::days(365)));
        assert_eq!(store.get(&1, t0()), Some(()));
    }

    #[test]
    fn touching_evicts_idle_users() {
        let tracker = ActivityTracker::new(Duration::minutes(30));
        for _ in 0..50 {
            tracker.touch(UserId::from_ulid(Ulid::new()), t0());
        }
        let late = UserId::from_ulid(Ulid::new());
        tracker.touch(late, t0() + Duration::minutes(31));

        assert_eq!(tracker.store.len(), 1);
        assert_eq!(tracker.active_users(t0() + Duration::minutes(31)), vec![late]);
    }

    #[test]
    fn activity_tracker_forgets_idle_users() {
        let tracker = ActivityTracker::new(Duration::minutes(30));
        let (busy, idle) = (UserId::from_ulid(Ulid::new()), UserId::from_ulid(Ulid::new()));
        tracker.touch(idle, t0());
        tracker.touch(busy, t0() + Duration::minutes(20));

        let later = t0() + Duration::minutes(40);
        assert_eq!(tracker.active_users(later), vec![busy]);
        assert_eq!(tracker.last_seen(idle, later), None);
        assert_eq!(tracker.last_seen(busy, later), Some(t0() + Duration::minutes(20)));
    }
}
