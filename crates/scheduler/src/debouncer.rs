//! Fsync and commit debouncers: coalesce bursts of requests for the same
//! key while bounding worst-case latency (spec.md §4.F).

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;
use xapiand_core::node::now_ms;

const DEBOUNCE_MS: u64 = 500;
const MAX_DELAY_MS: u64 = 3_000;

struct Entry {
    fire_at_ms: u64,
    max_fire_at_ms: u64,
}

/// Generic "coalesce bursts, bound worst case" debouncer keyed by `K`.
/// Used both for the fsync debouncer (`K = volume identity`) and the
/// commit debouncer (`K = endpoint hash`).
pub struct Debouncer<K> {
    entries: Mutex<HashMap<K, Entry>>,
    on_fire: Box<dyn Fn(&K) + Send + Sync>,
}

impl<K: Eq + Hash + Clone + Send + Sync + 'static> Debouncer<K> {
    pub fn new(on_fire: impl Fn(&K) + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Debouncer {
            entries: Mutex::new(HashMap::new()),
            on_fire: Box::new(on_fire),
        })
    }

    /// Request debounced firing for `key`. Updates `fire_at = now + 500ms`;
    /// on the first request for a key also pins `max_fire_at = now + 3s`.
    pub fn request(&self, key: K) {
        let now = now_ms();
        let mut entries = self.entries.lock();
        entries
            .entry(key)
            .and_modify(|e| e.fire_at_ms = now + DEBOUNCE_MS)
            .or_insert(Entry {
                fire_at_ms: now + DEBOUNCE_MS,
                max_fire_at_ms: now + MAX_DELAY_MS,
            });
    }

    /// Runner pass: fire (and remove) every key whose
    /// `now >= min(fire_at, max_fire_at)`.
    pub fn run_once(&self) {
        let now = now_ms();
        let due: Vec<K> = {
            let entries = self.entries.lock();
            entries
                .iter()
                .filter(|(_, e)| now >= e.fire_at_ms.min(e.max_fire_at_ms))
                .map(|(k, _)| k.clone())
                .collect()
        };
        for key in due {
            self.entries.lock().remove(&key);
            (self.on_fire)(&key);
        }
    }

    pub fn pending_count(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn earliest_deadline_ms(&self) -> Option<u64> {
        self.entries.lock().values().map(|e| e.fire_at_ms.min(e.max_fire_at_ms)).min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn repeated_requests_coalesce_into_one_fire() {
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        let debouncer = Debouncer::new(move |_key: &u64| {
            f.fetch_add(1, Ordering::SeqCst);
        });
        debouncer.request(1);
        debouncer.request(1);
        debouncer.request(1);
        assert_eq!(debouncer.pending_count(), 1);
        // Force immediate firing for the test by backdating the deadline.
        {
            let mut entries = debouncer.entries.lock();
            let e = entries.get_mut(&1).unwrap();
            e.fire_at_ms = 0;
        }
        debouncer.run_once();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(debouncer.pending_count(), 0);
    }

    #[test]
    fn distinct_keys_fire_independently() {
        let fired = Arc::new(Mutex::new(Vec::new()));
        let f = fired.clone();
        let debouncer = Debouncer::new(move |key: &u64| f.lock().push(*key));
        debouncer.request(1);
        debouncer.request(2);
        {
            let mut entries = debouncer.entries.lock();
            entries.get_mut(&1).unwrap().fire_at_ms = 0;
        }
        debouncer.run_once();
        assert_eq!(*fired.lock(), vec![1]);
        assert_eq!(debouncer.pending_count(), 1);
    }
}
