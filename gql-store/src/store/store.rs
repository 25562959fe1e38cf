use crate::{
    cache_key::KeyResolver,
    error::CacheError,
    selection::{CacheObject, FieldSelector},
    store::{
        data::{RecordSet, SerializedData, Snapshot},
        normalizer::Normalizer,
        transaction::{CacheRead, ReadTransaction, WriteTransaction}
    },
    types::CacheOptions,
    ChangedKeys
};
use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use parking_lot::{Condvar, Mutex, RwLock};
use serde_json::Value;
use stable_vec::StableVec;
use std::{
    fmt,
    sync::{Arc, Weak}
};

type Listener = Arc<dyn Fn(&ChangedKeys) + Send + Sync>;

pub(crate) struct StoreInner {
    pub(crate) normalizer: Normalizer,
    pub(crate) snapshot: RwLock<Arc<Snapshot>>,
    pub(crate) write_lock: Mutex<()>,
    pub(crate) listeners: Mutex<StableVec<Listener>>,
    streams: Mutex<Vec<UnboundedSender<ChangedKeys>>>,
    // version of the last commit whose notification was dispatched
    dispatched: Mutex<u64>,
    dispatched_cond: Condvar
}

impl StoreInner {
    /// Notify streams and listeners of the commit that produced `version`. Never called with
    /// the write lock held.
    ///
    /// Dispatch happens in commit order: a commit waits until every earlier commit has sent
    /// its keys to the streams and picked up its listeners.
    pub(crate) fn notify(&self, version: u64, changed: &ChangedKeys) {
        let listeners: Vec<Listener> = {
            let mut dispatched = self.dispatched.lock();
            while *dispatched + 1 < version {
                self.dispatched_cond.wait(&mut dispatched);
            }
            self.streams
                .lock()
                .retain(|sender| sender.unbounded_send(changed.clone()).is_ok());
            *dispatched = version;
            self.dispatched_cond.notify_all();
            self.listeners.lock().values().cloned().collect()
        };

        trace!(
            version,
            listeners = listeners.len(),
            changed = changed.len(),
            "notifying listeners"
        );
        // Released before the calls so listeners can commit writes of their own
        for listener in listeners {
            listener(changed);
        }
    }
}

/// The normalized cache. Cloning it is cheap and every clone shares the same records.
///
/// Reads see an immutable snapshot. Writes go through a [`WriteTransaction`], of which
/// there's at most one at a time, and become visible all at once when it commits.
#[derive(Clone)]
pub struct Store {
    pub(crate) inner: Arc<StoreInner>
}

impl Default for Store {
    fn default() -> Self {
        Self::new(CacheOptions::default())
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.snapshot();
        f.debug_struct("Store")
            .field("records", &snapshot.len())
            .field("version", &snapshot.version())
            .finish()
    }
}

impl Store {
    pub fn new(options: CacheOptions) -> Self {
        let resolver = KeyResolver::from_options(&options);
        Self::with_resolver(options, resolver)
    }

    /// Create a store with a resolver that may carry custom key functions.
    pub fn with_resolver(options: CacheOptions, resolver: KeyResolver) -> Self {
        let normalizer = Normalizer::new(resolver).require_typename(options.require_typename);
        Self {
            inner: Arc::new(StoreInner {
                normalizer,
                snapshot: RwLock::new(Arc::new(Snapshot::default())),
                write_lock: Mutex::new(()),
                listeners: Mutex::new(StableVec::new()),
                streams: Mutex::new(Vec::new()),
                dispatched: Mutex::new(0),
                dispatched_cond: Condvar::new()
            })
        }
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.inner.normalizer
    }

    /// The latest committed snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.inner.snapshot.read().clone()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    pub fn begin_read(&self) -> ReadTransaction {
        ReadTransaction::new(self.snapshot())
    }

    /// Start a write transaction. Blocks while another one is open.
    pub fn begin_write(&self) -> WriteTransaction<'_> {
        let guard = self.inner.write_lock.lock();
        // Taken after the lock so no commit can land in between
        let base = self.snapshot();
        WriteTransaction::new(&self.inner, guard, base)
    }

    /// Run `f` against a read transaction.
    pub fn read<T, F>(&self, f: F) -> T
    where
        F: FnOnce(&ReadTransaction) -> T
    {
        f(&self.begin_read())
    }

    /// Run `f` inside a write transaction. It's committed if `f` returns `Ok` and aborted
    /// otherwise.
    pub fn write<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut WriteTransaction<'_>) -> Result<T, E>
    {
        let mut tx = self.begin_write();
        match f(&mut tx) {
            Ok(value) => {
                tx.commit();
                Ok(value)
            }
            Err(e) => {
                tx.abort();
                Err(e)
            }
        }
    }

    /// Merge a set of records in one transaction. Returns the keys that changed.
    pub fn publish(&self, records: RecordSet) -> ChangedKeys {
        let mut tx = self.begin_write();
        tx.publish(records);
        tx.commit()
    }

    /// Normalize a response and publish its records. Nothing is written if normalization
    /// fails.
    pub fn write_response(&self, data: &Value, root: &str) -> Result<ChangedKeys, CacheError> {
        let normalized = self.inner.normalizer.normalize(data, root)?;
        Ok(self.publish(normalized.records))
    }

    /// Normalize only the fields named by `selection`.
    pub fn write_selection(
        &self,
        data: &Value,
        root: &str,
        selection: &[FieldSelector]
    ) -> Result<ChangedKeys, CacheError> {
        let normalized = self
            .inner
            .normalizer
            .normalize_selection(data, root, selection)?;
        Ok(self.publish(normalized.records))
    }

    pub fn read_object<T: CacheObject>(&self, key: &str) -> Result<T, CacheError> {
        self.begin_read().read_object(key)
    }

    pub fn read_value(&self, key: &str) -> Result<Value, CacheError> {
        self.begin_read().read_value(key)
    }

    pub fn remove(&self, key: &str) -> bool {
        let mut tx = self.begin_write();
        let removed = tx.remove(key);
        tx.commit();
        removed
    }

    /// Remove every record that isn't reachable from a root type. Returns the removed keys.
    pub fn collect_garbage(&self) -> ChangedKeys {
        let resolver = self.inner.normalizer.resolver();
        let roots: Vec<&str> = resolver.root_types().iter().map(String::as_str).collect();
        let mut tx = self.begin_write();
        tx.collect_garbage(&roots);
        tx.commit()
    }

    /// Register a listener that's called with the changed keys after every commit that
    /// changed something. It stays registered until the returned [`Subscription`] is dropped.
    ///
    /// Listeners run on the committing thread once the write lock is released. Commits start
    /// their listeners in commit order, but listeners of commits made on different threads
    /// may run at the same time.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ChangedKeys) + Send + Sync + 'static
    {
        let listener: Listener = Arc::new(listener);
        let mut listeners = self.inner.listeners.lock();
        // Slots freed by dropped subscriptions are reused
        let index = match listeners.first_empty_slot_from(0) {
            Some(index) => {
                listeners.insert(index, listener);
                index
            }
            None => listeners.push(listener)
        };
        drop(listeners);
        Subscription {
            store: Arc::downgrade(&self.inner),
            index
        }
    }

    /// A stream of changed key sets, one per commit that changed something, in commit order.
    /// It ends when the store is dropped.
    pub fn changes(&self) -> UnboundedReceiver<ChangedKeys> {
        let (sender, receiver) = mpsc::unbounded();
        self.inner.streams.lock().push(sender);
        receiver
    }

    /// Copy every record out of the store.
    pub fn extract(&self) -> SerializedData {
        SerializedData::from_snapshot(&self.snapshot())
    }

    /// Replace the store's contents with previously extracted data. Returns the keys that
    /// changed.
    pub fn hydrate(&self, data: SerializedData) -> ChangedKeys {
        let mut tx = self.begin_write();
        tx.clear();
        for record in data.into_records() {
            tx.replace(record);
        }
        let changed = tx.commit();
        debug!(changed = changed.len(), "hydrated store");
        changed
    }
}

/// A registered listener. Dropping this unsubscribes it.
#[must_use = "dropping a subscription unsubscribes its listener"]
pub struct Subscription {
    store: Weak<StoreInner>,
    index: usize
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(store) = self.store.upgrade() {
            store.listeners.lock().remove(self.index);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("index", &self.index)
            .finish()
    }
}
