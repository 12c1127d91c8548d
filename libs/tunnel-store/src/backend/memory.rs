use anyhow::anyhow;
use parking_lot::Mutex;
use std::collections::BTreeMap;

use super::{Batch, KeyValueStore, Op};
use crate::{Key, PersistenceError};

/// A [`KeyValueStore`] that lives in memory.
///
/// Wrap it in an [`Arc`](std::sync::Arc) to keep the values around across several
/// [`TunnelStore`](crate::TunnelStore)s, e.g. to simulate a process restart.
/// Faults can be injected to exercise the error paths of the store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    values: BTreeMap<Key, Vec<u8>>,
    failing_writes: usize,
    failing_reads: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the next `n` calls to [`KeyValueStore::write_batch`] without applying them.
    pub fn fail_next_writes(&self, n: usize) {
        self.inner.lock().failing_writes = n;
    }

    /// Fails all reads until called again with `false`.
    pub fn fail_reads(&self, fail: bool) {
        self.inner.lock().failing_reads = fail;
    }

    /// Stores `bytes` under `key` as-is, bypassing any encoding.
    pub fn insert_raw(&self, key: Key, bytes: impl Into<Vec<u8>>) {
        self.inner.lock().values.insert(key, bytes.into());
    }

    /// Flips a bit in the middle of the value stored under `key`, if any.
    pub fn corrupt(&self, key: Key) {
        let mut inner = self.inner.lock();

        let Some(value) = inner.values.get_mut(&key) else {
            return;
        };
        let middle = value.len() / 2;

        if let Some(byte) = value.get_mut(middle) {
            *byte ^= 0b0000_0100;
        }
    }

    pub fn raw(&self, key: Key) -> Option<Vec<u8>> {
        self.inner.lock().values.get(&key).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().values.is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn read(&self, key: Key) -> Result<Option<Vec<u8>>, PersistenceError> {
        let inner = self.inner.lock();

        if inner.failing_reads {
            return Err(PersistenceError::io(anyhow!("Injected read failure")));
        }

        Ok(inner.values.get(&key).cloned())
    }

    fn read_many(&self, keys: &[Key]) -> Result<Vec<Option<Vec<u8>>>, PersistenceError> {
        let inner = self.inner.lock();

        if inner.failing_reads {
            return Err(PersistenceError::io(anyhow!("Injected read failure")));
        }

        Ok(keys
            .iter()
            .map(|key| inner.values.get(key).cloned())
            .collect())
    }

    fn write_batch(&self, batch: &Batch) -> Result<(), PersistenceError> {
        let mut inner = self.inner.lock();

        if inner.failing_writes > 0 {
            inner.failing_writes -= 1;

            return Err(PersistenceError::io(anyhow!("Injected write failure")));
        }

        for op in batch.ops() {
            match op {
                Op::Put { key, value } => {
                    inner.values.insert(*key, value.clone());
                }
                Op::Remove { key } => {
                    inner.values.remove(key);
                }
            }
        }

        Ok(())
    }
}
