use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::app::models::{CacheStats, Element};

struct Snapshot {
    elements: Arc<Vec<Element>>,
    fetched_at: Instant,
}

/// Per-device cache of full accessibility trees. Filtered results are never
/// stored here.
pub struct UiCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, Snapshot>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl UiCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Counts a hit or a miss; expired snapshots are dropped.
    pub fn get(&self, udid: &str) -> Option<Arc<Vec<Element>>> {
        let mut entries = self.entries.lock().unwrap_or_else(|err| err.into_inner());
        let fresh = entries
            .get(udid)
            .filter(|snapshot| snapshot.fetched_at.elapsed() < self.ttl)
            .map(|snapshot| Arc::clone(&snapshot.elements));
        match fresh {
            Some(elements) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(udid = %udid, "ui cache hit");
                Some(elements)
            }
            None => {
                entries.remove(udid);
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!(udid = %udid, "ui cache miss");
                None
            }
        }
    }

    /// Stores a full tree.
    pub fn put(&self, udid: &str, elements: Vec<Element>) -> Arc<Vec<Element>> {
        let elements = Arc::new(elements);
        let mut entries = self.entries.lock().unwrap_or_else(|err| err.into_inner());
        entries.insert(
            udid.to_string(),
            Snapshot {
                elements: Arc::clone(&elements),
                fetched_at: Instant::now(),
            },
        );
        elements
    }

    pub fn invalidate(&self, udid: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(|err| err.into_inner());
        if entries.remove(udid).is_some() {
            debug!(udid = %udid, "ui cache invalidated");
        }
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .clear();
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let entries = self.entries.lock().unwrap_or_else(|err| err.into_inner());
        let device_age_ms = entries
            .iter()
            .map(|(udid, snapshot)| (udid.clone(), snapshot.fetched_at.elapsed().as_millis() as u64))
            .collect::<BTreeMap<_, _>>();
        CacheStats {
            hits,
            misses,
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
            device_age_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> Vec<Element> {
        vec![Element {
            element_type: "Button".to_string(),
            label: "OK".to_string(),
            identifier: None,
            value: None,
            frame: None,
            enabled: true,
            role: String::new(),
            role_description: String::new(),
            child_count: None,
        }]
    }

    #[test]
    fn counts_hits_and_misses() {
        let cache = UiCache::new(Duration::from_secs(3));
        assert!(cache.get("A").is_none());
        cache.put("A", tree());
        assert_eq!(cache.get("A").map(|elements| elements.len()), Some(1));
        assert!(cache.get("A").is_some());

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 2.0 / 3.0).abs() < 1e-9);
        assert!(stats.device_age_ms.contains_key("A"));
    }

    #[test]
    fn expired_and_invalidated_entries_miss() {
        let cache = UiCache::new(Duration::from_millis(0));
        cache.put("A", tree());
        assert!(cache.get("A").is_none());
        assert!(cache.stats().device_age_ms.is_empty());

        let cache = UiCache::new(Duration::from_secs(3));
        cache.put("A", tree());
        cache.put("B", tree());
        cache.invalidate("A");
        assert!(cache.get("A").is_none());
        assert!(cache.get("B").is_some());
        cache.clear();
        assert!(cache.get("B").is_none());
    }
}
