use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;

/// A typed in-memory table. Cloning is cheap and clones share the same rows.
#[derive(Clone)]
pub struct DbTable<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    inner: Arc<DashMap<K, V>>,
}

impl<K, V> Default for DbTable<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
        }
    }
}

impl<K, V> DbTable<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_cloned(&self, key: &K) -> Option<V> {
        self.inner.get(key).map(|v| v.clone())
    }

    /// Returns the previous value, if any
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        self.inner.insert(key, value)
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.inner.remove(key).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.contains_key(key)
    }

    /// Fetch the row for `key`, inserting `init()` first if missing, then apply `f`
    /// to it in place. Returns a copy of the row after `f` ran.
    pub fn upsert_with<I, F>(&self, key: K, init: I, f: F) -> V
    where
        I: FnOnce() -> V,
        F: FnOnce(&mut V),
    {
        let mut entry = self.inner.entry(key).or_insert_with(init);
        f(entry.value_mut());
        entry.value().clone()
    }

    /// Drop every row for which `keep` returns false, returning how many went
    pub fn retain<F>(&self, mut keep: F) -> usize
    where
        F: FnMut(&K, &V) -> bool,
    {
        let before = self.inner.len();
        self.inner.retain(|k, v| keep(k, v));
        before.saturating_sub(self.inner.len())
    }

    pub fn keys_where<F>(&self, mut f: F) -> Vec<K>
    where
        F: FnMut(&K, &V) -> bool,
    {
        self.inner
            .iter()
            .filter(|entry| f(entry.key(), entry.value()))
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_rows() {
        let table: DbTable<u32, String> = DbTable::new();
        let other = table.clone();

        assert!(table.insert(1, "one".to_string()).is_none());
        assert_eq!(other.get_cloned(&1), Some("one".to_string()));
        assert_eq!(
            other.insert(1, "uno".to_string()),
            Some("one".to_string())
        );
        assert_eq!(table.remove(&1), Some("uno".to_string()));
        assert!(other.is_empty());
    }

    #[test]
    fn upsert_initializes_then_mutates() {
        let table: DbTable<&'static str, u64> = DbTable::new();

        assert_eq!(table.upsert_with("a", || 10, |v| *v += 1), 11);
        assert_eq!(table.upsert_with("a", || 10, |v| *v += 1), 12);
        assert_eq!(table.get_cloned(&"a"), Some(12));
    }

    #[test]
    fn retain_reports_removed_rows() {
        let table: DbTable<u32, ()> = DbTable::new();
        for i in 0..10 {
            table.insert(i, ());
        }

        assert_eq!(table.retain(|k, _| *k < 4), 6);
        let mut keys = table.keys_where(|_, _| true);
        keys.sort();
        assert_eq!(keys, vec![0, 1, 2, 3]);
    }
}
