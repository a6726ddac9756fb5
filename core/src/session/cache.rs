use std::collections::HashMap;

/// Bounded least-recently-used map of live sessions. Recency is a logical tick
/// bumped on every hit, so eviction scans for the smallest tick.
pub(crate) struct SessionCache<V> {
    capacity: usize,
    tick: u64,
    entries: HashMap<String, Slot<V>>,
}

struct Slot<V> {
    value: V,
    last_used: u64,
}

impl<V: Clone> SessionCache<V> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            tick: 0,
            entries: HashMap::new(),
        }
    }

    pub(crate) fn get(&mut self, key: &str) -> Option<V> {
        self.tick += 1;
        let tick = self.tick;
        self.entries.get_mut(key).map(|slot| {
            slot.last_used = tick;
            slot.value.clone()
        })
    }

    /// Inserts `value` unless the key is already cached, returning whichever
    /// value ends up cached. Entries for which `evictable` is false are never
    /// evicted, so the cache may briefly exceed its capacity.
    pub(crate) fn insert_if_absent(
        &mut self,
        key: &str,
        value: V,
        evictable: impl Fn(&V) -> bool,
    ) -> V {
        if let Some(existing) = self.get(key) {
            return existing;
        }

        self.tick += 1;
        self.entries.insert(
            key.to_string(),
            Slot {
                value: value.clone(),
                last_used: self.tick,
            },
        );

        while self.entries.len() > self.capacity {
            let victim = self
                .entries
                .iter()
                .filter(|(candidate, slot)| candidate.as_str() != key && evictable(&slot.value))
                .min_by_key(|(_, slot)| slot.last_used)
                .map(|(candidate, _)| candidate.clone());
            match victim {
                Some(victim) => {
                    self.entries.remove(&victim);
                }
                None => break,
            }
        }

        value
    }

    pub(crate) fn remove(&mut self, key: &str) -> Option<V> {
        self.entries.remove(key).map(|slot| slot.value)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
