use crate::{
    error::CacheError,
    selection::{CacheObject, FieldSelector},
    store::{
        data::{CacheKey, Record, RecordSet, Snapshot},
        deserializer,
        normalizer::Normalizer,
        store::StoreInner
    },
    ChangedKeys, HashMap, HashSet
};
use parking_lot::MutexGuard;
use serde::Serialize;
use serde_json::Value;
use std::{collections::VecDeque, mem, sync::Arc};

/// Read access shared by snapshots and both kinds of transaction.
pub trait CacheRead {
    /// The record at `key`, if there is one.
    fn record(&self, key: &str) -> Option<&Record>;

    fn contains(&self, key: &str) -> bool {
        self.record(key).is_some()
    }

    fn read_record(&self, key: &str) -> Result<&Record, CacheError> {
        self.record(key)
            .ok_or_else(|| CacheError::RecordNotFound(key.to_owned()))
    }

    /// Reconstruct a typed object rooted at `key`, following references along
    /// `T::selection()`.
    ///
    /// Fails with `RecordNotFound` if `key` or a referenced record doesn't exist, and with
    /// `ShapeMismatch` if the stored fields don't satisfy `T`.
    fn read_object<T: CacheObject>(&self, key: &str) -> Result<T, CacheError>
    where
        Self: Sized
    {
        self.read_object_with_dependencies(key)
            .map(|(object, _)| object)
    }

    /// Like `read_object`, but also returns the keys of every record the read touched.
    fn read_object_with_dependencies<T: CacheObject>(
        &self,
        key: &str
    ) -> Result<(T, HashSet<CacheKey>), CacheError>
    where
        Self: Sized
    {
        deserializer::read_object(self, key, &T::selection())
    }

    /// Read the fields named by `selection` into a JSON value.
    fn read_selection(&self, key: &str, selection: &[FieldSelector]) -> Result<Value, CacheError>
    where
        Self: Sized
    {
        deserializer::read_selection(self, key, selection).map(|(value, _)| value)
    }

    /// Read every field reachable from `key` into a JSON value. Fails with `Cycle` if the
    /// references loop back onto themselves.
    fn read_value(&self, key: &str) -> Result<Value, CacheError>
    where
        Self: Sized
    {
        deserializer::read_value(self, key)
    }
}

impl CacheRead for Snapshot {
    fn record(&self, key: &str) -> Option<&Record> {
        self.get(key)
    }
}

/// A read-only view of the snapshot that was current when the transaction started.
/// Commits made after that are never visible through it.
#[derive(Clone, Debug)]
pub struct ReadTransaction {
    snapshot: Arc<Snapshot>
}

impl ReadTransaction {
    pub(crate) fn new(snapshot: Arc<Snapshot>) -> Self {
        Self { snapshot }
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn version(&self) -> u64 {
        self.snapshot.version()
    }
}

impl CacheRead for ReadTransaction {
    fn record(&self, key: &str) -> Option<&Record> {
        self.snapshot.get(key)
    }
}

/// Stages changes against the snapshot it started from and swaps them in atomically on
/// commit. Holds the store's write lock until it's committed, aborted or dropped; dropping an
/// open transaction aborts it.
///
/// A live `WriteTransaction` is always open. `commit` and `abort` consume it, so nothing can
/// touch a finished transaction.
pub struct WriteTransaction<'s> {
    store: &'s StoreInner,
    guard: Option<MutexGuard<'s, ()>>,
    base: Arc<Snapshot>,
    // `None` marks a removed record
    staged: HashMap<CacheKey, Option<Record>>
}

impl<'s> WriteTransaction<'s> {
    pub(crate) fn new(store: &'s StoreInner, guard: MutexGuard<'s, ()>, base: Arc<Snapshot>) -> Self {
        Self {
            store,
            guard: Some(guard),
            base,
            staged: HashMap::default()
        }
    }

    /// The snapshot this transaction started from.
    pub fn base(&self) -> &Snapshot {
        &self.base
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.store.normalizer
    }

    /// Merge a record field by field. Returns whether it changed anything.
    pub fn merge(&mut self, record: Record) -> bool {
        let merged = match self.record(record.key()) {
            Some(existing) if !existing.would_change(&record) => None,
            Some(existing) => {
                let mut merged = existing.clone();
                merged.merge(record);
                Some(merged)
            }
            None => Some(record)
        };

        match merged {
            Some(merged) => {
                trace!(key = merged.key(), "staged record");
                self.staged.insert(merged.key().to_owned(), Some(merged));
                true
            }
            None => false
        }
    }

    /// Merge every record of a set. Returns the keys that changed.
    pub fn publish(&mut self, records: RecordSet) -> ChangedKeys {
        let mut changed = ChangedKeys::default();
        for record in records {
            let key = record.key().to_owned();
            if self.merge(record) {
                changed.insert(key);
            }
        }
        changed
    }

    /// Normalize a response and publish the records. Nothing is staged if normalization
    /// fails.
    pub fn write_response(&mut self, data: &Value, root: &str) -> Result<ChangedKeys, CacheError> {
        let normalized = self.store.normalizer.normalize(data, root)?;
        Ok(self.publish(normalized.records))
    }

    pub fn write_selection(
        &mut self,
        data: &Value,
        root: &str,
        selection: &[FieldSelector]
    ) -> Result<ChangedKeys, CacheError> {
        let normalized = self
            .store
            .normalizer
            .normalize_selection(data, root, selection)?;
        Ok(self.publish(normalized.records))
    }

    /// Serialize a typed object and write it as if it were a response rooted at `root`.
    /// Fields are stored under the keys `T::selection()` reads them from, arguments included.
    pub fn write_object<T>(&mut self, root: &str, object: &T) -> Result<ChangedKeys, CacheError>
    where
        T: CacheObject + Serialize
    {
        let data = serde_json::to_value(object).map_err(|source| CacheError::Serialize {
            key: root.to_owned(),
            source
        })?;
        self.write_selection(&data, root, &T::selection())
    }

    /// Run a custom update against a typed object. The current state is read (including
    /// anything staged in this transaction), passed to `update`, and the result written
    /// back.
    pub fn update_object<T, F>(&mut self, key: &str, update: F) -> Result<ChangedKeys, CacheError>
    where
        T: CacheObject + Serialize,
        F: FnOnce(T) -> T
    {
        let current = self.read_object::<T>(key)?;
        let updated = update(current);
        self.write_object(key, &updated)
    }

    /// Overwrite a record entirely, dropping any field it doesn't have.
    pub fn replace(&mut self, record: Record) -> bool {
        let changed = self.record(record.key()) != Some(&record);
        self.staged.insert(record.key().to_owned(), Some(record));
        changed
    }

    pub fn remove(&mut self, key: &str) -> bool {
        if self.record(key).is_none() {
            return false;
        }
        self.staged.insert(key.to_owned(), None);
        true
    }

    /// Remove every record.
    pub fn clear(&mut self) {
        for key in self.keys() {
            self.staged.insert(key, None);
        }
    }

    /// Every key visible to this transaction.
    pub fn keys(&self) -> Vec<CacheKey> {
        let mut keys: Vec<CacheKey> = self
            .base
            .keys()
            .filter(|key| !self.staged.contains_key(*key))
            .map(str::to_owned)
            .collect();
        keys.extend(
            self.staged
                .iter()
                .filter(|(_, record)| record.is_some())
                .map(|(key, _)| key.clone())
        );
        keys
    }

    /// Remove every record that can't be reached from `roots`. Returns the removed keys.
    pub fn collect_garbage(&mut self, roots: &[&str]) -> ChangedKeys {
        let mut reachable: HashSet<CacheKey> = HashSet::default();
        let mut queue: VecDeque<CacheKey> = roots.iter().map(|root| root.to_string()).collect();

        while let Some(key) = queue.pop_front() {
            let record = match self.record(&key) {
                Some(record) => record,
                None => continue
            };
            for reference in record.references() {
                if !reachable.contains(reference) {
                    queue.push_back(reference.to_owned());
                }
            }
            reachable.insert(key);
        }

        let garbage: ChangedKeys = self
            .keys()
            .into_iter()
            .filter(|key| !reachable.contains(key))
            .collect();
        for key in &garbage {
            self.staged.insert(key.clone(), None);
        }
        debug!(removed = garbage.len(), "collected garbage");
        garbage
    }

    /// Keys whose record differs from the base snapshot.
    pub fn changed_keys(&self) -> ChangedKeys {
        self.staged
            .iter()
            .filter(|(key, staged)| self.base.get(key) != staged.as_ref())
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Make the staged changes visible, then notify listeners. Returns the changed keys.
    pub fn commit(mut self) -> ChangedKeys {
        let changed = self.changed_keys();
        let staged = mem::take(&mut self.staged);

        if changed.is_empty() {
            trace!("committed write transaction without changes");
            return changed;
        }

        let mut records = self.base.records.clone();
        for (key, record) in staged {
            if !changed.contains(&key) {
                continue;
            }
            match record {
                Some(record) => {
                    records.insert(key, Arc::new(record));
                }
                None => {
                    records.remove(&key);
                }
            }
        }
        let version = self.base.version + 1;
        let snapshot = Snapshot { records, version };
        debug!(
            changed = changed.len(),
            records = snapshot.len(),
            version = snapshot.version,
            "committed write transaction"
        );
        *self.store.snapshot.write() = Arc::new(snapshot);

        // Listeners may start transactions of their own
        self.guard.take();
        self.store.notify(version, &changed);
        changed
    }

    /// Discard everything staged.
    pub fn abort(mut self) {
        if !self.staged.is_empty() {
            debug!(staged = self.staged.len(), "aborted write transaction");
        }
        self.staged.clear();
    }
}

impl<'s> CacheRead for WriteTransaction<'s> {
    fn record(&self, key: &str) -> Option<&Record> {
        match self.staged.get(key) {
            Some(staged) => staged.as_ref(),
            None => self.base.get(key)
        }
    }
}

impl<'s> Drop for WriteTransaction<'s> {
    fn drop(&mut self) {
        if !self.staged.is_empty() {
            warn!(
                staged = self.staged.len(),
                "write transaction dropped without commit, discarding staged records"
            );
        }
    }
}
