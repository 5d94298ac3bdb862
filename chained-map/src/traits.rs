use std::hash::Hash;

/// A uniform interface over the two table flavors, so code that only needs
/// plain map operations can take either (or a future layout) as a type
/// parameter.
pub trait HashTable<K, V>
where
    K: Eq + Hash,
{
    /// Inserts or updates a key-value pair.
    ///
    /// Returns `Some(old_value)` if the key existed and its value was
    /// replaced, `None` if the key was newly inserted.
    fn insert(&mut self, key: K, value: V) -> Option<V>;

    /// Removes a key-value pair.
    ///
    /// Returns `Some(value)` if the key existed, `None` otherwise.
    fn remove(&mut self, key: &K) -> Option<V>;

    /// Retrieves a reference to the value for `key`, if present.
    fn get(&self, key: &K) -> Option<&V>;

    /// Number of stored entries.
    fn len(&self) -> usize;

    /// `true` if no entries are stored.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `true` if `key` is stored.
    fn contains_key(&self, key: &K) -> bool {
        self.get(key).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ChainedHashMap, NodeHashMap};

    // Shared conformance check, run against both flavors.
    fn exercise(table: &mut impl HashTable<String, u32>) {
        assert!(table.is_empty());
        assert_eq!(table.insert("one".into(), 1), None);
        assert_eq!(table.insert("one".into(), 11), Some(1));
        assert_eq!(table.get(&"one".into()), Some(&11));
        assert!(table.contains_key(&"one".into()));
        assert_eq!(table.len(), 1);
        assert_eq!(table.remove(&"one".into()), Some(11));
        assert_eq!(table.remove(&"one".into()), None);
        assert!(table.is_empty());
    }

    #[test]
    fn test_inline_table_conforms() {
        exercise(&mut ChainedHashMap::new());
    }

    #[test]
    fn test_node_table_conforms() {
        exercise(&mut NodeHashMap::new());
    }
}
