mod data;
mod deserializer;
mod normalizer;
#[allow(clippy::module_inception)]
mod store;
mod transaction;

#[cfg(test)]
mod tests;

pub(crate) use data::{args_key, join_field_key};
pub use data::{
    field_key, CacheKey, FieldValue, Link, Record, RecordSet, SerializedData, Snapshot
};
pub use normalizer::{Normalized, Normalizer};
pub use store::{Store, Subscription};
pub use transaction::{CacheRead, ReadTransaction, WriteTransaction};
