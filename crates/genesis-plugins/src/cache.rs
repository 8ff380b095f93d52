// Copyright (c) 2025-2026 Genesis contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct CacheEntry {
    data: serde_json::Value,
    stored_at: Instant,
}

/// Memoisation for pre-request action results, keyed by
/// `<action_name>:<user_id>`.
///
/// Implements stale-while-revalidate: `get` only returns entries younger
/// than the TTL, while `get_stale` keeps serving an expired entry so a turn
/// can use it immediately and refresh it in the background.  A TTL of zero
/// or below disables caching entirely.
#[derive(Default)]
pub struct ActionCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

fn make_key(action_name: &str, user_id: &str) -> String {
    format!("{action_name}:{user_id}")
}

impl ActionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh data only: `None` when missing, expired, or `ttl <= 0`.
    pub fn get(&self, action_name: &str, user_id: &str, ttl: i64) -> Option<serde_json::Value> {
        if ttl <= 0 {
            return None;
        }
        let entries = self.entries.lock().unwrap();
        let entry = entries.get(&make_key(action_name, user_id))?;
        if entry.stored_at.elapsed() < Duration::from_secs(ttl as u64) {
            Some(entry.data.clone())
        } else {
            None
        }
    }

    /// Data regardless of age, for the revalidate path.
    pub fn get_stale(&self, action_name: &str, user_id: &str) -> Option<serde_json::Value> {
        let entries = self.entries.lock().unwrap();
        entries
            .get(&make_key(action_name, user_id))
            .map(|e| e.data.clone())
    }

    /// True when the entry is missing or past its TTL.
    pub fn is_stale(&self, action_name: &str, user_id: &str, ttl: i64) -> bool {
        let entries = self.entries.lock().unwrap();
        match entries.get(&make_key(action_name, user_id)) {
            None => true,
            Some(e) => e.stored_at.elapsed() >= Duration::from_secs(ttl.max(0) as u64),
        }
    }

    /// Store a result; a no-op when `ttl <= 0`.
    pub fn set(&self, action_name: &str, user_id: &str, data: serde_json::Value, ttl: i64) {
        if ttl <= 0 {
            return;
        }
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            make_key(action_name, user_id),
            CacheEntry {
                data,
                stored_at: Instant::now(),
            },
        );
    }

    pub fn invalidate(&self, action_name: &str, user_id: &str) {
        self.entries
            .lock()
            .unwrap()
            .remove(&make_key(action_name, user_id));
    }

    /// Drop every entry belonging to a user.
    pub fn clear_user(&self, user_id: &str) {
        let suffix = format!(":{user_id}");
        self.entries
            .lock()
            .unwrap()
            .retain(|key, _| !key.ends_with(&suffix));
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn value(n: u64) -> serde_json::Value {
        serde_json::json!({"n": n})
    }

    #[test]
    fn fresh_entry_is_served() {
        let cache = ActionCache::new();
        cache.set("sys_info", "u1", value(1), 60);
        assert_eq!(cache.get("sys_info", "u1", 60), Some(value(1)));
        assert!(!cache.is_stale("sys_info", "u1", 60));
    }

    #[test]
    fn zero_ttl_disables_caching() {
        let cache = ActionCache::new();
        cache.set("a", "u1", value(1), 0);
        assert_eq!(cache.get("a", "u1", 0), None);
        assert_eq!(cache.get_stale("a", "u1"), None);
        cache.set("b", "u1", value(2), -5);
        assert_eq!(cache.get_stale("b", "u1"), None);
    }

    #[test]
    fn missing_entry_is_stale() {
        let cache = ActionCache::new();
        assert!(cache.is_stale("nope", "u1", 60));
        assert_eq!(cache.get("nope", "u1", 60), None);
    }

    #[test]
    fn stale_entry_served_only_through_get_stale() {
        let cache = ActionCache::new();
        cache.set("a", "u1", value(1), 1);
        std::thread::sleep(Duration::from_millis(1100));
        assert_eq!(cache.get("a", "u1", 1), None);
        assert!(cache.is_stale("a", "u1", 1));
        assert_eq!(cache.get_stale("a", "u1"), Some(value(1)));
    }

    #[test]
    fn entries_are_user_isolated() {
        let cache = ActionCache::new();
        cache.set("a", "u1", value(1), 60);
        assert_eq!(cache.get("a", "u2", 60), None);
    }

    #[test]
    fn invalidate_removes_one_entry() {
        let cache = ActionCache::new();
        cache.set("a", "u1", value(1), 60);
        cache.set("b", "u1", value(2), 60);
        cache.invalidate("a", "u1");
        assert_eq!(cache.get("a", "u1", 60), None);
        assert_eq!(cache.get("b", "u1", 60), Some(value(2)));
    }

    #[test]
    fn clear_user_removes_all_of_a_user() {
        let cache = ActionCache::new();
        cache.set("a", "u1", value(1), 60);
        cache.set("b", "u1", value(2), 60);
        cache.set("a", "u2", value(3), 60);
        cache.clear_user("u1");
        assert_eq!(cache.get("a", "u1", 60), None);
        assert_eq!(cache.get("b", "u1", 60), None);
        assert_eq!(cache.get("a", "u2", 60), Some(value(3)));
    }
}
