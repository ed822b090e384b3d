//! Per-user result cache.
//!
//! The engine caches access decisions and widget lists per user through the
//! [`WidgetCache`] trait, so hosts can plug in a shared store. Entries are
//! keyed by namespace, user, optional widget and a discriminator (usually
//! the action).

use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use super::clock::Clock;

/// Namespace of single access decisions.
pub const WIDGET_ACCESS: &str = "widget_access";
/// Namespace of accessible widget id lists.
pub const ACCESSIBLE_WIDGETS: &str = "accessible_widgets";
/// Namespace of accessible widgets with satisfied dependency closures.
pub const USER_WIDGETS: &str = "user_widgets";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub namespace: &'static str,
    pub user_id: String,
    pub widget_id: Option<String>,
    pub discriminator: String,
}

impl CacheKey {
    pub fn access(user_id: &str, widget_id: &str, action: &str) -> Self {
        Self {
            namespace: WIDGET_ACCESS,
            user_id: user_id.to_string(),
            widget_id: Some(widget_id.to_string()),
            discriminator: action.to_string(),
        }
    }

    pub fn list(namespace: &'static str, user_id: &str, action: &str) -> Self {
        Self {
            namespace,
            user_id: user_id.to_string(),
            widget_id: None,
            discriminator: action.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheValue {
    Access(bool),
    WidgetIds(Vec<String>),
}

/// Selects entries to invalidate.
///
/// A scope without a user matches every user. Entries that are not tied to
/// a widget (lists) match any widget scope, since they depend on all widgets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheScope {
    pub user_id: Option<String>,
    pub widget_id: Option<String>,
}

impl CacheScope {
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            widget_id: None,
        }
    }

    pub fn matches(&self, key: &CacheKey) -> bool {
        let user_matches = self.user_id.as_ref().map_or(true, |u| *u == key.user_id);
        let widget_matches = match (&self.widget_id, &key.widget_id) {
            (None, _) | (_, None) => true,
            (Some(scope), Some(entry)) => scope == entry,
        };
        user_matches && widget_matches
    }
}

pub trait WidgetCache: Send + Sync {
    fn get(&self, key: &CacheKey) -> Option<CacheValue>;

    /// Stores `value` for `ttl`. A non-positive TTL stores nothing.
    fn put(&self, key: CacheKey, value: CacheValue, ttl: Duration);

    fn forget(&self, key: &CacheKey);

    /// Removes every entry matched by `scope`; returns how many were removed.
    fn forget_scope(&self, scope: &CacheScope) -> usize;

    fn flush(&self);
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<CacheKey, (CacheValue, DateTime<Utc>)>,
    /// Earliest expiry among stored entries; may lag behind removals.
    next_expiry: Option<DateTime<Utc>>,
}

impl CacheState {
    /// Drops expired entries once the earliest expiry has passed.
    fn sweep(&mut self, now: DateTime<Utc>) -> usize {
        if !matches!(self.next_expiry, Some(at) if at <= now) {
            return 0;
        }
        let before = self.entries.len();
        self.entries.retain(|_, (_, expires_at)| *expires_at > now);
        self.next_expiry = self.entries.values().map(|(_, at)| *at).min();
        before - self.entries.len()
    }
}

/// Process-local cache with clock-driven expiry.
///
/// Expired entries are dropped when read and swept on insert, so keys that
/// are never read again do not accumulate.
pub struct InMemoryWidgetCache {
    state: RwLock<CacheState>,
    clock: Arc<dyn Clock>,
}

impl InMemoryWidgetCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: RwLock::new(CacheState::default()),
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().entries.is_empty()
    }
}

impl WidgetCache for InMemoryWidgetCache {
    fn get(&self, key: &CacheKey) -> Option<CacheValue> {
        let now = self.clock.now();
        let hit = {
            let state = self.state.read();
            match state.entries.get(key) {
                Some((value, expires_at)) if *expires_at > now => Some(value.clone()),
                Some(_) => None,
                None => {
                    counter!("widget_cache_misses_total", "namespace" => key.namespace).increment(1);
                    return None;
                }
            }
        };

        match hit {
            Some(value) => {
                counter!("widget_cache_hits_total", "namespace" => key.namespace).increment(1);
                tracing::debug!(namespace = key.namespace, user_id = %key.user_id, "Cache hit");
                Some(value)
            }
            None => {
                // expired
                let mut state = self.state.write();
                if matches!(state.entries.get(key), Some((_, expires_at)) if *expires_at <= now) {
                    state.entries.remove(key);
                }
                counter!("widget_cache_misses_total", "namespace" => key.namespace).increment(1);
                None
            }
        }
    }

    fn put(&self, key: CacheKey, value: CacheValue, ttl: Duration) {
        if ttl <= Duration::zero() {
            return;
        }
        let now = self.clock.now();
        let expires_at = now + ttl;
        let mut state = self.state.write();

        let evicted = state.sweep(now);
        if evicted > 0 {
            tracing::debug!(evicted, "Swept expired cache entries");
        }

        state.entries.insert(key, (value, expires_at));
        state.next_expiry = Some(match state.next_expiry {
            Some(at) if at < expires_at => at,
            _ => expires_at,
        });
    }

    fn forget(&self, key: &CacheKey) {
        self.state.write().entries.remove(key);
    }

    fn forget_scope(&self, scope: &CacheScope) -> usize {
        let mut state = self.state.write();
        let before = state.entries.len();
        state.entries.retain(|key, _| !scope.matches(key));
        before - state.entries.len()
    }

    fn flush(&self) {
        let mut state = self.state.write();
        state.entries.clear();
        state.next_expiry = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::clock::FixedClock;
    use chrono::TimeZone;

    fn setup() -> (Arc<FixedClock>, InMemoryWidgetCache) {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
        ));
        let cache = InMemoryWidgetCache::new(clock.clone());
        (clock, cache)
    }

    #[test]
    fn test_put_get_expire() {
        let (clock, cache) = setup();
        let key = CacheKey::access("u1", "clock", "view");
        cache.put(key.clone(), CacheValue::Access(true), Duration::seconds(60));
        assert_eq!(cache.get(&key), Some(CacheValue::Access(true)));

        clock.advance(Duration::seconds(60));
        assert_eq!(cache.get(&key), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_put_sweeps_entries_never_read_again() {
        let (clock, cache) = setup();
        for i in 0..1000 {
            cache.put(
                CacheKey::access(&format!("user-{i}"), "clock", "view"),
                CacheValue::Access(true),
                Duration::seconds(60),
            );
        }
        assert_eq!(cache.len(), 1000);

        clock.advance(Duration::days(1));
        let fresh = CacheKey::access("late", "clock", "view");
        cache.put(fresh.clone(), CacheValue::Access(false), Duration::seconds(60));

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&fresh), Some(CacheValue::Access(false)));
    }

    #[test]
    fn test_sweep_keeps_unexpired_entries() {
        let (clock, cache) = setup();
        let short = CacheKey::access("u1", "a", "view");
        let long = CacheKey::access("u2", "a", "view");
        cache.put(short.clone(), CacheValue::Access(true), Duration::seconds(30));
        cache.put(long.clone(), CacheValue::Access(true), Duration::seconds(600));

        clock.advance(Duration::seconds(31));
        cache.put(CacheKey::access("u3", "a", "view"), CacheValue::Access(true), Duration::seconds(30));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&short), None);
        assert_eq!(cache.get(&long), Some(CacheValue::Access(true)));
    }

    #[test]
    fn test_zero_ttl_stores_nothing() {
        let (_, cache) = setup();
        cache.put(
            CacheKey::access("u1", "clock", "view"),
            CacheValue::Access(true),
            Duration::zero(),
        );
        assert!(cache.is_empty());
    }

    #[test]
    fn test_forget_user_scope_only_touches_that_user() {
        let (_, cache) = setup();
        let ttl = Duration::seconds(300);
        cache.put(CacheKey::access("u1", "a", "view"), CacheValue::Access(true), ttl);
        cache.put(
            CacheKey::list(ACCESSIBLE_WIDGETS, "u1", "view"),
            CacheValue::WidgetIds(vec!["a".into()]),
            ttl,
        );
        cache.put(CacheKey::access("u2", "a", "view"), CacheValue::Access(false), ttl);

        assert_eq!(cache.forget_scope(&CacheScope::user("u1")), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(
            cache.get(&CacheKey::access("u2", "a", "view")),
            Some(CacheValue::Access(false))
        );
    }

    #[test]
    fn test_widget_scope_keeps_other_widgets() {
        let (_, cache) = setup();
        let ttl = Duration::seconds(300);
        cache.put(CacheKey::access("u1", "a", "view"), CacheValue::Access(true), ttl);
        cache.put(CacheKey::access("u1", "b", "view"), CacheValue::Access(true), ttl);
        cache.put(
            CacheKey::list(USER_WIDGETS, "u1", "view"),
            CacheValue::WidgetIds(vec![]),
            ttl,
        );

        let scope = CacheScope {
            user_id: Some("u1".into()),
            widget_id: Some("a".into()),
        };
        assert_eq!(cache.forget_scope(&scope), 2);
        assert!(cache.get(&CacheKey::access("u1", "b", "view")).is_some());
    }

    #[test]
    fn test_flush() {
        let (_, cache) = setup();
        cache.put(
            CacheKey::access("u1", "a", "view"),
            CacheValue::Access(true),
            Duration::seconds(10),
        );
        cache.flush();
        assert!(cache.is_empty());
    }
}
