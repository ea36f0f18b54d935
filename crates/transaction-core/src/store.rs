//! Sharded transaction store. Lookups are lock-free reads on the hot
//! inbound path; insertion is insert-only so a racing retransmission can
//! never displace a live transaction.

use dashmap::DashMap;

use crate::key::TransactionKey;

/// A concurrent map from [`TransactionKey`] to transaction handles.
pub struct TransactionStore<T: Clone> {
    entries: DashMap<TransactionKey, T>,
}

impl<T: Clone> Default for TransactionStore<T> {
    fn default() -> Self {
        TransactionStore {
            entries: DashMap::new(),
        }
    }
}

impl<T: Clone> TransactionStore<T> {
    /// The transaction stored under a key.
    pub fn load(&self, key: &TransactionKey) -> Option<T> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    /// Inserts unless the key is already taken. Returns whether the value
    /// was inserted; an existing entry is never overwritten.
    pub fn store(&self, key: TransactionKey, value: T) -> bool {
        match self.entries.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(value);
                true
            }
        }
    }

    /// Removes a key. Returns whether it was present.
    pub fn delete(&self, key: &TransactionKey) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Snapshot of every stored transaction.
    pub fn all(&self) -> Vec<T> {
        self.entries
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Number of live transactions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no transactions are stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
