use anyhow::{Context as _, anyhow};
use atomicwrites::{AtomicFile, OverwriteBehavior};
use parking_lot::Mutex;
use std::{
    fs,
    io::{self, Write as _},
    path::{Path, PathBuf},
};

use super::{Batch, KeyValueStore, Op};
use crate::{Key, PersistenceError};

/// Name of the journal file that makes multi-key batches crash-safe.
const JOURNAL: &str = "journal.json";

/// How often [`FileStore::read_many`] retries if a batch lands while it is reading.
const MAX_READ_ATTEMPTS: usize = 5;

/// A [`KeyValueStore`] with one file per key inside a directory.
///
/// All writes use `atomicwrites`, so a single file is always either the old or the new value.
/// Batches touching more than one key are first written to a journal which is replayed on
/// [`FileStore::open`] if the process died before the batch was fully applied.
/// If applying a batch fails, the keys it already touched are rolled back before the error is returned.
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let dir = dir.into();

        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create store dir `{}`", dir.display()))
            .map_err(PersistenceError::io)?;
        set_dir_permissions(&dir)
            .with_context(|| format!("Failed to set permissions on `{}`", dir.display()))
            .map_err(PersistenceError::io)?;

        let store = Self {
            dir,
            write_lock: Mutex::new(()),
        };
        store.replay_journal()?;

        Ok(store)
    }

    fn path(&self, key: Key) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    fn journal_path(&self) -> PathBuf {
        self.dir.join(JOURNAL)
    }

    fn read_journal(&self) -> Result<Option<Batch>, PersistenceError> {
        let Some(bytes) = read_optional(&self.journal_path())
            .context("Failed to read journal")
            .map_err(PersistenceError::io)?
        else {
            return Ok(None);
        };

        // The journal is written atomically, so a journal we can't parse was never a valid batch.
        let batch = serde_json::from_slice::<Batch>(&bytes)
            .context("Failed to parse journal")
            .map_err(PersistenceError::corruption)?;

        Ok(Some(batch))
    }

    fn replay_journal(&self) -> Result<(), PersistenceError> {
        let _guard = self.write_lock.lock();

        self.replay_journal_locked()
    }

    /// Must be called while holding `write_lock`.
    fn replay_journal_locked(&self) -> Result<(), PersistenceError> {
        let Some(batch) = self.read_journal()? else {
            return Ok(());
        };

        tracing::info!(keys = %batch.keys(), "Replaying interrupted batch");

        self.apply(&batch)?;
        self.remove_journal()?;

        Ok(())
    }

    fn apply(&self, batch: &Batch) -> Result<(), PersistenceError> {
        for op in batch.ops() {
            self.apply_op(op)?;
        }

        Ok(())
    }

    /// Applies `batch` and records how to undo every operation that has been applied so far.
    fn apply_with_undo(&self, batch: &Batch, undo: &mut Vec<Op>) -> Result<(), PersistenceError> {
        for op in batch.ops() {
            let key = op.key();
            let previous = read_optional(&self.path(key))
                .with_context(|| format!("Failed to read `{key}` before writing it"))
                .map_err(PersistenceError::io)?;

            self.apply_op(op)?;

            undo.push(match previous {
                Some(value) => Op::Put { key, value },
                None => Op::Remove { key },
            });
        }

        Ok(())
    }

    /// Restores the keys a failed batch already touched.
    ///
    /// The undo batch replaces the journal first, so readers and a later [`FileStore::open`]
    /// see the previous values even if the rollback itself is interrupted.
    fn roll_back(&self, undo: Vec<Op>) -> Result<(), PersistenceError> {
        let mut batch = Batch::default();
        for op in undo.into_iter().rev() {
            match op {
                Op::Put { key, value } => batch.put(key, value),
                Op::Remove { key } => batch.remove(key),
            };
        }

        if !batch.is_empty() {
            self.write_journal(&batch)?;
            self.apply(&batch)?;
        }
        self.remove_journal()
    }

    fn apply_op(&self, op: &Op) -> Result<(), PersistenceError> {
        match op {
            Op::Put { key, value } => write_atomically(&self.path(*key), value)
                .with_context(|| format!("Failed to write `{key}`"))
                .map_err(PersistenceError::io),
            Op::Remove { key } => remove_optional(&self.path(*key))
                .with_context(|| format!("Failed to remove `{key}`"))
                .map_err(PersistenceError::io),
        }
    }

    fn write_journal(&self, batch: &Batch) -> Result<(), PersistenceError> {
        let journal = serde_json::to_vec(batch)
            .context("Failed to serialize journal")
            .map_err(PersistenceError::io)?;

        write_atomically(&self.journal_path(), &journal)
            .context("Failed to write journal")
            .map_err(PersistenceError::io)
    }

    fn remove_journal(&self) -> Result<(), PersistenceError> {
        remove_optional(&self.journal_path())
            .context("Failed to remove journal")
            .map_err(PersistenceError::io)
    }
}

impl KeyValueStore for FileStore {
    fn read(&self, key: Key) -> Result<Option<Vec<u8>>, PersistenceError> {
        let mut values = self.read_many(&[key])?;

        Ok(values.pop().flatten())
    }

    /// Reads the files and overlays a pending journal on top.
    ///
    /// Another process may be in the middle of applying a batch.
    /// The journal holds the committed result of that batch, so overlaying it gives us a consistent view.
    /// If a journal shows up or disappears while we read, we start over.
    fn read_many(&self, keys: &[Key]) -> Result<Vec<Option<Vec<u8>>>, PersistenceError> {
        for _ in 0..MAX_READ_ATTEMPTS {
            let before = self.read_journal()?;

            let mut values = keys
                .iter()
                .map(|key| {
                    read_optional(&self.path(*key))
                        .with_context(|| format!("Failed to read `{key}`"))
                        .map_err(PersistenceError::io)
                })
                .collect::<Result<Vec<_>, _>>()?;

            let after = self.read_journal()?;

            if before != after {
                tracing::debug!("Store changed while reading; retrying");
                continue;
            }

            if let Some(batch) = after {
                overlay(keys, &mut values, &batch);
            }

            return Ok(values);
        }

        Err(PersistenceError::io(anyhow!(
            "Store kept changing while reading {MAX_READ_ATTEMPTS} times"
        )))
    }

    fn write_batch(&self, batch: &Batch) -> Result<(), PersistenceError> {
        let _guard = self.write_lock.lock();

        // A leftover journal is older than this batch and must not be replayed over it later.
        self.replay_journal_locked()?;

        if batch.len() <= 1 {
            return self.apply(batch);
        }

        self.write_journal(batch)?;

        let mut undo = Vec::with_capacity(batch.len());
        if let Err(e) = self.apply_with_undo(batch, &mut undo) {
            if let Err(rollback) = self.roll_back(undo) {
                tracing::error!(keys = %batch.keys(), "Failed to roll back batch: {rollback:#}");
            }

            return Err(e);
        }

        // The batch is fully applied; a journal we fail to remove is replayed harmlessly before the next write.
        if let Err(e) = self.remove_journal() {
            tracing::warn!("{e:#}");
        }

        Ok(())
    }
}

fn overlay(keys: &[Key], values: &mut [Option<Vec<u8>>], batch: &Batch) {
    for op in batch.ops() {
        let Some(index) = keys.iter().position(|key| *key == op.key()) else {
            continue;
        };

        values[index] = match op {
            Op::Put { value, .. } => Some(value.clone()),
            Op::Remove { .. } => None,
        };
    }
}

fn write_atomically(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    AtomicFile::new(path, OverwriteBehavior::AllowOverwrite).write(|f| f.write_all(bytes))?;

    Ok(())
}

fn read_optional(path: &Path) -> io::Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

fn remove_optional(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// user read/write/execute, others nothing: the store contains the tunnel's config
#[cfg(unix)]
fn set_dir_permissions(dir: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(dir, fs::Permissions::from_mode(0o700))
}

#[cfg(not(unix))]
#[expect(clippy::unnecessary_wraps)]
fn set_dir_permissions(_: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(ops: &[(Key, Option<&str>)]) -> Batch {
        let mut batch = Batch::default();

        for (key, value) in ops {
            match value {
                Some(v) => batch.put(*key, v.as_bytes().to_vec()),
                None => batch.remove(*key),
            };
        }

        batch
    }

    #[test]
    fn missing_file_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        assert!(store.read(Key::Config).unwrap().is_none());
    }

    #[test]
    fn values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();

        let store = FileStore::open(dir.path()).unwrap();
        store
            .write_batch(&batch(&[(Key::State, Some("up")), (Key::Routes, Some("r"))]))
            .unwrap();
        drop(store);

        let store = FileStore::open(dir.path()).unwrap();

        assert_eq!(store.read(Key::State).unwrap().unwrap(), b"up");
        assert_eq!(store.read(Key::Routes).unwrap().unwrap(), b"r");
        assert!(!dir.path().join(JOURNAL).exists());
    }

    #[test]
    fn interrupted_batch_is_replayed_on_open() {
        let dir = tempfile::tempdir().unwrap();

        let store = FileStore::open(dir.path()).unwrap();
        store
            .write_batch(&batch(&[(Key::Config, Some("c")), (Key::State, Some("up"))]))
            .unwrap();

        // Simulate a crash after the journal of a `clear` was written but only one file was removed.
        let clear = batch(&[(Key::Config, None), (Key::State, None)]);
        fs::write(dir.path().join(JOURNAL), serde_json::to_vec(&clear).unwrap()).unwrap();
        fs::remove_file(store.path(Key::Config)).unwrap();
        drop(store);

        let store = FileStore::open(dir.path()).unwrap();

        assert!(store.read(Key::Config).unwrap().is_none());
        assert!(store.read(Key::State).unwrap().is_none());
        assert!(!dir.path().join(JOURNAL).exists());
    }

    #[test]
    fn readers_see_pending_journal() {
        let dir = tempfile::tempdir().unwrap();

        let store = FileStore::open(dir.path()).unwrap();
        store
            .write_batch(&batch(&[(Key::Resources, Some("old")), (Key::Routes, Some("old"))]))
            .unwrap();

        // Another process committed a batch but only applied the first half so far.
        let update = batch(&[(Key::Resources, Some("new")), (Key::Routes, Some("new"))]);
        fs::write(dir.path().join(JOURNAL), serde_json::to_vec(&update).unwrap()).unwrap();
        fs::write(store.path(Key::Resources), "new").unwrap();

        let values = store.read_many(&[Key::Resources, Key::Routes]).unwrap();

        assert_eq!(
            values,
            vec![Some(b"new".to_vec()), Some(b"new".to_vec())]
        );
    }

    #[test]
    fn failed_batch_is_rolled_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        store
            .write_batch(&batch(&[(Key::Config, Some("old"))]))
            .unwrap();

        // Writing the second key fails after the first one was already applied.
        fs::create_dir(store.path(Key::Routes)).unwrap();
        let error = store
            .write_batch(&batch(&[
                (Key::Config, Some("new")),
                (Key::Resources, Some("new")),
                (Key::Routes, Some("new")),
            ]))
            .unwrap_err();

        assert!(!error.is_corruption());
        assert!(!dir.path().join(JOURNAL).exists());
        assert_eq!(store.read(Key::Config).unwrap().unwrap(), b"old");
        assert!(store.read(Key::Resources).unwrap().is_none());

        fs::remove_dir(store.path(Key::Routes)).unwrap();
        store
            .write_batch(&batch(&[(Key::Routes, Some("later"))]))
            .unwrap();
        drop(store);

        let store = FileStore::open(dir.path()).unwrap();

        assert_eq!(store.read(Key::Config).unwrap().unwrap(), b"old");
        assert!(store.read(Key::Resources).unwrap().is_none());
        assert_eq!(store.read(Key::Routes).unwrap().unwrap(), b"later");
    }

    #[test]
    fn leftover_journal_is_applied_before_next_write() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        // Another process committed a batch and died before applying it.
        let pending = batch(&[(Key::Config, Some("c")), (Key::State, Some("up"))]);
        fs::write(dir.path().join(JOURNAL), serde_json::to_vec(&pending).unwrap()).unwrap();

        store
            .write_batch(&batch(&[(Key::State, Some("down"))]))
            .unwrap();
        drop(store);

        let store = FileStore::open(dir.path()).unwrap();

        assert_eq!(store.read(Key::Config).unwrap().unwrap(), b"c");
        assert_eq!(store.read(Key::State).unwrap().unwrap(), b"down");
        assert!(!dir.path().join(JOURNAL).exists());
    }

    #[test]
    fn garbage_journal_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(JOURNAL), "{ not json").unwrap();

        let error = FileStore::open(dir.path()).unwrap_err();

        assert!(error.is_corruption());
    }
}
