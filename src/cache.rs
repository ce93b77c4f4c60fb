use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RankingKey {
    pub indicator: String,
    pub region: String,
}

impl RankingKey {
    pub fn new(indicator: impl Into<String>, region: impl Into<String>) -> Self {
        Self { indicator: indicator.into(), region: region.into() }
    }
}

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    last_used_tick: u64,
}

/// Per-session rankings keyed by `(indicator, region)`.
///
/// Bounded: inserting past `capacity` evicts the least recently used
/// entry, ties broken by key order.
#[derive(Debug)]
pub struct RankingCache<V> {
    capacity: usize,
    tick: u64,
    entries: BTreeMap<RankingKey, Entry<V>>,
}

impl<V> RankingCache<V> {
    pub fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), tick: 0, entries: BTreeMap::new() }
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    pub fn get(&mut self, key: &RankingKey) -> Option<&V> {
        let tick = self.next_tick();
        let entry = self.entries.get_mut(key)?;
        entry.last_used_tick = tick;
        Some(&entry.value)
    }

    pub fn insert(&mut self, key: RankingKey, value: V) {
        let tick = self.next_tick();
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            self.evict_one();
        }
        self.entries.insert(key, Entry { value, last_used_tick: tick });
    }

    fn evict_one(&mut self) {
        let victim = self
            .entries
            .iter()
            .min_by_key(|(_, e)| e.last_used_tick)
            .map(|(k, _)| k.clone());
        if let Some(k) = victim {
            self.entries.remove(&k);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn contains(&self, key: &RankingKey) -> bool {
        self.entries.contains_key(key)
    }
}
