use std::collections::HashMap;
use std::hash::Hash;
use std::time::Instant;

/// Timed work owned by the dashboard runtime. One pending deadline per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TaskKey {
    Pulse(String),
    RowRemoval(String),
    ChartRedraw,
    ToastExpire(u64),
    ToastRemove(u64),
}

/// Keyed deadline set. Scheduling an already pending key replaces its deadline,
/// which gives trailing-edge debounce for free.
#[derive(Debug)]
pub struct TaskScheduler<K> {
    deadlines: HashMap<K, Instant>,
}

impl<K> Default for TaskScheduler<K> {
    fn default() -> Self {
        Self {
            deadlines: HashMap::new(),
        }
    }
}

impl<K> TaskScheduler<K>
where
    K: Eq + Hash + Clone,
{
    pub fn schedule(&mut self, key: K, at: Instant) {
        self.deadlines.insert(key, at);
    }

    pub fn cancel(&mut self, key: &K) -> Option<Instant> {
        self.deadlines.remove(key)
    }

    pub fn is_pending(&self, key: &K) -> bool {
        self.deadlines.contains_key(key)
    }

    pub fn deadline(&self, key: &K) -> Option<Instant> {
        self.deadlines.get(key).copied()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().min().copied()
    }

    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }

    /// Removes and returns every task due at `now`, earliest first.
    pub fn drain_due(&mut self, now: Instant) -> Vec<K> {
        let mut due: Vec<(Instant, K)> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(key, deadline)| (*deadline, key.clone()))
            .collect();
        due.sort_by_key(|(deadline, _)| *deadline);

        for (_, key) in &due {
            self.deadlines.remove(key);
        }

        due.into_iter().map(|(_, key)| key).collect()
    }

    pub fn clear(&mut self) {
        self.deadlines.clear();
    }
}
