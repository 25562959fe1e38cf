//! A normalized store for GraphQL response data.
//!
//! Responses are flattened into [`Record`](struct.Record.html)s, one per object that can be
//! identified by a cache key (by default `<__typename>:<id>`). Nested objects are replaced by
//! references to their own record, so every entity exists exactly once and an update to it is
//! visible to every query that reaches it.
//!
//! # Getting Started
//!
//! ```
//! use gql_store::{CacheRead, Store};
//! use serde_json::json;
//!
//! let store = Store::default();
//! let changed = store
//!     .write_response(&json!({ "__typename": "Dog", "id": "1", "name": "Rex" }), "Query")
//!     .unwrap();
//! assert!(changed.contains("Dog:1"));
//!
//! let dog = store.read(|tx| tx.read_value("Dog:1")).unwrap();
//! assert_eq!(dog["name"], "Rex");
//! ```
//!
//! # Transactions
//!
//! All access goes through transactions. A [`ReadTransaction`](struct.ReadTransaction.html)
//! holds on to the snapshot that was current when it started and never sees later commits.
//! A [`WriteTransaction`](struct.WriteTransaction.html) stages its changes and swaps in a new
//! snapshot on commit. Only one write transaction can be open at a time, but readers are never
//! blocked by it.
//!
//! Listeners registered with [`Store::subscribe`](struct.Store.html#method.subscribe) are
//! called with the set of changed keys once a commit is visible and no store lock is held, so
//! a listener is free to start a new transaction.
//!
//! # Typed reads
//!
//! Typed objects describe the fields they need through
//! [`CacheObject::selection`](trait.CacheObject.html#tymethod.selection). The store walks the
//! records along that selection and deserializes straight into the target type, failing with
//! [`CacheError::ShapeMismatch`](enum.CacheError.html#variant.ShapeMismatch) if the cached
//! data can't satisfy it.

#[macro_use]
extern crate tracing;

mod cache_key;
mod error;
mod selection;
mod store;
mod types;

pub use cache_key::{KeyResolver, ResolverFn};
pub use error::{CacheError, NormalizationError, NormalizationErrorKind};
pub use selection::{CacheObject, FieldSelector, UnionSelection};
pub use store::{
    field_key, CacheKey, CacheRead, FieldValue, Link, Normalized, Normalizer, ReadTransaction,
    Record, RecordSet, SerializedData, Snapshot, Store, Subscription, WriteTransaction
};
pub use types::CacheOptions;

pub type HashSet<T> = std::collections::HashSet<T, fnv::FnvBuildHasher>;
pub type HashMap<K, V> = std::collections::HashMap<K, V, fnv::FnvBuildHasher>;

/// The keys of every record that was added, modified or removed by a commit.
pub type ChangedKeys = HashSet<CacheKey>;
