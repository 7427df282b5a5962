use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TableError {
    #[error("MATCH_TABLE_ELEMENT_ALREADY_EXISTS")]
    AlreadyExists,
    #[error("MATCH_TABLE_ELEMENT_DOES_NOT_EXIST")]
    DoesNotExist,
}

struct ValueInfo<V> {
    value: V,
    matched: bool,
}

/// Insert-once key/value table with a per-entry matched flag. All three
/// operations are serialized by one mutex, so the table can be shared
/// between the loader and the streaming lookup path.
pub struct MatchTable<K, V> {
    data: Mutex<HashMap<K, ValueInfo<V>>>,
}

impl<K, V> MatchTable<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new() -> Self {
        Self { data: Mutex::new(HashMap::new()) }
    }

    /// Inserts a key exactly once; a second insert of the same key fails.
    pub fn add(&self, key: K, value: V) -> Result<(), TableError> {
        let mut data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        if data.contains_key(&key) {
            return Err(TableError::AlreadyExists);
        }
        data.insert(key, ValueInfo { value, matched: false });
        Ok(())
    }

    /// Flags the entry as matched (idempotent) and returns its value.
    pub fn mark_matched(&self, key: &K) -> Result<V, TableError> {
        let mut data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        match data.get_mut(key) {
            Some(info) => {
                info.matched = true;
                Ok(info.value.clone())
            }
            None => Err(TableError::DoesNotExist),
        }
    }

    /// Visits every matched entry exactly once, in unspecified order. The
    /// lock is held for the whole visit, so the snapshot is consistent with
    /// every add/mark ordered before the call.
    pub fn visit_matched<F>(&self, mut visitor: F)
    where
        F: FnMut(&K, &V),
    {
        let data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        for (key, info) in data.iter() {
            if info.matched {
                visitor(key, &info.value);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.data.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, V> Default for MatchTable<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
