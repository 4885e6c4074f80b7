//! Single-flight memoization keyed by string.

use std::sync::{Arc, OnceLock};

use dashmap::DashMap;

/// Runs each key's work at most once; concurrent callers wait for the first.
#[derive(Debug)]
pub(crate) struct SingleFlight<V> {
    slots: DashMap<String, Arc<OnceLock<V>>>,
}

impl<V> Default for SingleFlight<V> {
    fn default() -> Self {
        Self {
            slots: DashMap::new(),
        }
    }
}

impl<V: Clone> SingleFlight<V> {
    /// Return the cached value for `key`, running `work` if nobody has yet.
    ///
    /// `work` must not call back into the same `SingleFlight` for the same key.
    pub(crate) fn get_or_run(&self, key: &str, work: impl FnOnce() -> V) -> V {
        // Clone the slot out so no map shard lock is held while working.
        let slot = match self.slots.get(key) {
            Some(slot) => Arc::clone(slot.value()),
            None => Arc::clone(
                self.slots
                    .entry(key.to_string())
                    .or_insert_with(|| Arc::new(OnceLock::new()))
                    .value(),
            ),
        };
        slot.get_or_init(work).clone()
    }

    /// Seed a finished value unless the key is already claimed.
    pub(crate) fn insert(&self, key: &str, value: V) {
        self.slots
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(OnceLock::from(value)));
    }

    pub(crate) fn get(&self, key: &str) -> Option<V> {
        let slot = self.slots.get(key).map(|s| Arc::clone(s.value()))?;
        slot.get().cloned()
    }

    /// Every finished value, in no particular order.
    pub(crate) fn values(&self) -> Vec<V> {
        self.slots
            .iter()
            .filter_map(|entry| entry.value().get().cloned())
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn work_runs_once_per_key() {
        let flight: SingleFlight<usize> = SingleFlight::default();
        let runs = AtomicUsize::new(0);
        let a = flight.get_or_run("a", || runs.fetch_add(1, Ordering::SeqCst) + 10);
        let b = flight.get_or_run("a", || runs.fetch_add(1, Ordering::SeqCst) + 10);
        assert_eq!(a, 10);
        assert_eq!(b, 10);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn concurrent_callers_share_one_run() {
        let flight: Arc<SingleFlight<usize>> = Arc::new(SingleFlight::default());
        let runs = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let flight = Arc::clone(&flight);
                let runs = Arc::clone(&runs);
                std::thread::spawn(move || {
                    flight.get_or_run("shared", || {
                        runs.fetch_add(1, Ordering::SeqCst);
                        std::thread::sleep(std::time::Duration::from_millis(20));
                        7
                    })
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), 7);
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn seeded_values_win() {
        let flight: SingleFlight<&str> = SingleFlight::default();
        flight.insert("k", "seeded");
        assert_eq!(flight.get_or_run("k", || "computed"), "seeded");
        assert_eq!(flight.get("missing"), None);
        assert_eq!(flight.len(), 1);
        assert_eq!(flight.values(), vec!["seeded"]);
    }
}
