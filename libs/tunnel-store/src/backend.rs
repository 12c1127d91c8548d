//! Backing stores for the tunnel.
//!
//! A backing store is a durable map from [`Key`] to opaque blobs.
//! The only requirement beyond durability is that a [`Batch`] becomes visible all at once.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::{Key, PersistenceError};

pub trait KeyValueStore: Send + Sync {
    /// Reads the blob stored under `key`, `None` if there is none.
    fn read(&self, key: Key) -> Result<Option<Vec<u8>>, PersistenceError>;

    /// Reads several keys from the same point in time.
    ///
    /// Implementations that can be written by another process while we read must override this.
    fn read_many(&self, keys: &[Key]) -> Result<Vec<Option<Vec<u8>>>, PersistenceError> {
        keys.iter().map(|key| self.read(*key)).collect()
    }

    /// Applies all operations of `batch` atomically: after a crash, either all or none are visible.
    fn write_batch(&self, batch: &Batch) -> Result<(), PersistenceError>;
}

impl<T> KeyValueStore for Arc<T>
where
    T: KeyValueStore + ?Sized,
{
    fn read(&self, key: Key) -> Result<Option<Vec<u8>>, PersistenceError> {
        self.as_ref().read(key)
    }

    fn read_many(&self, keys: &[Key]) -> Result<Vec<Option<Vec<u8>>>, PersistenceError> {
        self.as_ref().read_many(keys)
    }

    fn write_batch(&self, batch: &Batch) -> Result<(), PersistenceError> {
        self.as_ref().write_batch(batch)
    }
}

/// An ordered list of writes that must commit together.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    ops: Vec<Op>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    Put {
        key: Key,
        #[serde(with = "hex")]
        value: Vec<u8>,
    },
    Remove {
        key: Key,
    },
}

impl Op {
    pub fn key(&self) -> Key {
        match self {
            Op::Put { key, .. } | Op::Remove { key } => *key,
        }
    }
}

impl Batch {
    pub fn put(&mut self, key: Key, value: Vec<u8>) -> &mut Self {
        self.ops.push(Op::Put { key, value });
        self
    }

    pub fn remove(&mut self, key: Key) -> &mut Self {
        self.ops.push(Op::Remove { key });
        self
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Human-readable list of the keys touched by this batch, for logging.
    pub(crate) fn keys(&self) -> String {
        self.ops
            .iter()
            .map(|op| op.key().as_str())
            .collect::<Vec<_>>()
            .join(",")
    }
}
