//! TTL cache for list results, invalidated by `*/list_changed`
//! notifications. Mutations happen only on the bridge's serialized path, so
//! there is no internal locking.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

/// The four cacheable list kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListKind {
    Tools,
    Resources,
    ResourceTemplates,
    Prompts,
}

impl ListKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tools => "tools",
            Self::Resources => "resources",
            Self::ResourceTemplates => "resourceTemplates",
            Self::Prompts => "prompts",
        }
    }

    /// The registry stamp bucket a `*/list_changed` notification touches.
    /// Resource templates share the `resources` bucket.
    #[must_use]
    pub fn stamp_key(self) -> &'static str {
        match self {
            Self::Tools => "tools",
            Self::Resources | Self::ResourceTemplates => "resources",
            Self::Prompts => "prompts",
        }
    }
}

/// Map a notification method onto the cache kinds it invalidates.
#[must_use]
pub fn kinds_for_notification(method: &str) -> &'static [ListKind] {
    match method {
        "notifications/tools/list_changed" => &[ListKind::Tools],
        "notifications/resources/list_changed" => {
            &[ListKind::Resources, ListKind::ResourceTemplates]
        },
        "notifications/prompts/list_changed" => &[ListKind::Prompts],
        _ => &[],
    }
}

struct CacheEntry {
    payload: serde_json::Value,
    inserted_at: Instant,
}

/// Lazily-evicting TTL cache keyed by list kind.
///
/// The generation counter guards against a fetch that started before an
/// invalidation landing its (now stale) result afterwards: callers snapshot
/// the generation before fetching and insert conditionally.
pub struct ListCache {
    ttl: Duration,
    entries: HashMap<ListKind, CacheEntry>,
    generation: u64,
}

impl ListCache {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
            generation: 0,
        }
    }

    /// Current invalidation generation.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Cached payload, or `None` on miss or expiry (expired entries are
    /// evicted on access).
    pub fn get(&mut self, kind: ListKind) -> Option<serde_json::Value> {
        let fresh = match self.entries.get(&kind) {
            Some(entry) => entry.inserted_at.elapsed() <= self.ttl,
            None => return None,
        };
        if !fresh {
            self.entries.remove(&kind);
            return None;
        }
        self.entries.get(&kind).map(|entry| entry.payload.clone())
    }

    /// Store a freshly-fetched aggregate payload.
    pub fn insert(&mut self, kind: ListKind, payload: serde_json::Value) {
        self.entries.insert(kind, CacheEntry {
            payload,
            inserted_at: Instant::now(),
        });
    }

    /// Store only if no invalidation happened since `generation` was read.
    pub fn insert_if_current(
        &mut self,
        generation: u64,
        kind: ListKind,
        payload: serde_json::Value,
    ) {
        if self.generation == generation {
            self.insert(kind, payload);
        }
    }

    pub fn invalidate(&mut self, kind: ListKind) {
        self.entries.remove(&kind);
        self.generation += 1;
    }

    pub fn invalidate_all(&mut self) {
        self.entries.clear();
        self.generation += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn miss_then_hit() {
        let mut cache = ListCache::new(Duration::from_secs(60));
        assert!(cache.get(ListKind::Tools).is_none());
        cache.insert(ListKind::Tools, serde_json::json!({"tools": []}));
        assert!(cache.get(ListKind::Tools).is_some());
        // Other kinds unaffected.
        assert!(cache.get(ListKind::Prompts).is_none());
    }

    #[test]
    fn expiry_evicts_lazily() {
        let mut cache = ListCache::new(Duration::from_millis(10));
        cache.insert(ListKind::Tools, serde_json::json!({"tools": []}));
        std::thread::sleep(Duration::from_millis(30));
        assert!(cache.get(ListKind::Tools).is_none());
        assert!(cache.entries.is_empty());
    }

    #[test]
    fn invalidate_single_kind() {
        let mut cache = ListCache::new(Duration::from_secs(60));
        cache.insert(ListKind::Tools, serde_json::json!(1));
        cache.insert(ListKind::Prompts, serde_json::json!(2));
        cache.invalidate(ListKind::Tools);
        assert!(cache.get(ListKind::Tools).is_none());
        assert!(cache.get(ListKind::Prompts).is_some());
    }

    #[test]
    fn notification_mapping() {
        assert_eq!(
            kinds_for_notification("notifications/tools/list_changed"),
            &[ListKind::Tools]
        );
        assert_eq!(
            kinds_for_notification("notifications/resources/list_changed"),
            &[ListKind::Resources, ListKind::ResourceTemplates]
        );
        assert_eq!(
            kinds_for_notification("notifications/prompts/list_changed"),
            &[ListKind::Prompts]
        );
        assert!(kinds_for_notification("notifications/progress").is_empty());
    }

    #[test]
    fn stamp_keys() {
        assert_eq!(ListKind::Tools.stamp_key(), "tools");
        assert_eq!(ListKind::ResourceTemplates.stamp_key(), "resources");
    }

    #[test]
    fn stale_insert_after_invalidation_is_dropped() {
        let mut cache = ListCache::new(Duration::from_secs(60));
        let gen_before = cache.generation();
        // An invalidation lands while the fetch is in flight.
        cache.invalidate(ListKind::Tools);
        cache.insert_if_current(gen_before, ListKind::Tools, serde_json::json!("stale"));
        assert!(cache.get(ListKind::Tools).is_none());

        // Without an intervening invalidation the insert sticks.
        let gen_now = cache.generation();
        cache.insert_if_current(gen_now, ListKind::Tools, serde_json::json!("fresh"));
        assert_eq!(cache.get(ListKind::Tools).unwrap(), serde_json::json!("fresh"));
    }
}
