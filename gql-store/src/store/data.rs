use crate::{HashMap, HashSet};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{collections::BTreeMap, sync::Arc};

pub type CacheKey = String;

pub(crate) const TYPENAME: &str = "__typename";

/// A reference from one record field to other data in the store.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Link {
    Null,
    /// Another record, by cache key.
    Entity(CacheKey),
    /// An unkeyed object whose fields live in the same record under `<path>.`
    Embedded(String),
    List(Vec<Link>)
}

impl Link {
    /// Every cache key this link points at.
    pub fn entity_keys(&self) -> Vec<&str> {
        let mut keys = Vec::new();
        self.collect_entity_keys(&mut keys);
        keys
    }

    fn collect_entity_keys<'a>(&'a self, keys: &mut Vec<&'a str>) {
        match self {
            Link::Entity(key) => keys.push(key),
            Link::List(links) => {
                for link in links {
                    link.collect_entity_keys(keys);
                }
            }
            Link::Null | Link::Embedded(_) => {}
        }
    }

    fn collect_embedded_paths<'a>(&'a self, paths: &mut Vec<&'a str>) {
        match self {
            Link::Embedded(path) => paths.push(path),
            Link::List(links) => {
                for link in links {
                    link.collect_embedded_paths(paths);
                }
            }
            Link::Null | Link::Entity(_) => {}
        }
    }

    /// Interpret a stored scalar as a link. Lists of objects that happened to be empty or all
    /// null are stored as plain JSON, so this turns them back into links.
    pub(crate) fn from_scalar(value: &Value) -> Option<Link> {
        match value {
            Value::Null => Some(Link::Null),
            Value::Array(items) => items
                .iter()
                .map(Link::from_scalar)
                .collect::<Option<Vec<_>>>()
                .map(Link::List),
            _ => None
        }
    }
}

/// The value of a single record field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldValue {
    /// Any JSON value that isn't an object, including `null` and lists of scalars.
    Scalar(Value),
    Link(Link)
}

impl FieldValue {
    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            FieldValue::Scalar(value) => Some(value),
            FieldValue::Link(_) => None
        }
    }

    pub fn as_link(&self) -> Option<&Link> {
        match self {
            FieldValue::Link(link) => Some(link),
            FieldValue::Scalar(_) => None
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(
            self,
            FieldValue::Scalar(Value::Null) | FieldValue::Link(Link::Null)
        )
    }
}

impl From<Value> for FieldValue {
    fn from(value: Value) -> Self {
        FieldValue::Scalar(value)
    }
}

impl From<Link> for FieldValue {
    fn from(link: Link) -> Self {
        FieldValue::Link(link)
    }
}

pub type Fields = HashMap<String, FieldValue>;

/// The flattened fields of one object, keyed by cache key.
///
/// Nested objects are never stored inline as values, only as a [`Link`](enum.Link.html).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    key: CacheKey,
    fields: Fields
}

impl Record {
    pub fn new(key: impl Into<CacheKey>) -> Self {
        Self {
            key: key.into(),
            fields: Fields::default()
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.set(name, value);
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    pub fn into_fields(self) -> Fields {
        self.fields
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    pub fn set(
        &mut self,
        name: impl Into<String>,
        value: impl Into<FieldValue>
    ) -> Option<FieldValue> {
        self.fields.insert(name.into(), value.into())
    }

    pub fn remove_field(&mut self, name: &str) -> Option<FieldValue> {
        self.fields.remove(name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn typename(&self) -> Option<&str> {
        self.get(TYPENAME)
            .and_then(FieldValue::as_scalar)
            .and_then(Value::as_str)
    }

    /// Whether merging `incoming` would change any stored field.
    pub fn would_change(&self, incoming: &Record) -> bool {
        incoming
            .fields
            .iter()
            .any(|(name, value)| self.fields.get(name) != Some(value))
    }

    /// Field-level merge: incoming fields overwrite existing ones with the same name, every
    /// other field is kept. Returns whether anything changed.
    pub fn merge(&mut self, incoming: Record) -> bool {
        let mut changed = false;
        for (name, value) in incoming.fields {
            if self.fields.get(&name) != Some(&value) {
                self.fields.insert(name, value);
                changed = true;
            }
        }
        changed
    }

    /// Keys of every record referenced from this one.
    pub fn references(&self) -> HashSet<&str> {
        self.fields
            .values()
            .filter_map(FieldValue::as_link)
            .flat_map(Link::entity_keys)
            .collect()
    }

    pub(crate) fn embedded_paths(&self) -> Vec<&str> {
        let mut paths = Vec::new();
        for link in self.fields.values().filter_map(FieldValue::as_link) {
            link.collect_embedded_paths(&mut paths);
        }
        paths
    }
}

/// A set of records keyed by cache key. Inserting a key twice merges the fields.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RecordSet {
    records: HashMap<CacheKey, Record>
}

impl RecordSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record: Record) {
        if let Some(existing) = self.records.get_mut(record.key()) {
            existing.merge(record);
        } else {
            self.records.insert(record.key.clone(), record);
        }
    }

    pub fn get(&self, key: &str) -> Option<&Record> {
        self.records.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.records.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.values()
    }
}

impl IntoIterator for RecordSet {
    type Item = Record;
    type IntoIter = std::collections::hash_map::IntoValues<CacheKey, Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_values()
    }
}

impl std::iter::FromIterator<Record> for RecordSet {
    fn from_iter<I: IntoIterator<Item = Record>>(iter: I) -> Self {
        let mut set = RecordSet::new();
        for record in iter {
            set.insert(record);
        }
        set
    }
}

impl From<Record> for RecordSet {
    fn from(record: Record) -> Self {
        std::iter::once(record).collect()
    }
}

/// An immutable view of every record in the store at one point in time.
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    pub(crate) records: HashMap<CacheKey, Arc<Record>>,
    pub(crate) version: u64
}

impl Snapshot {
    pub fn get(&self, key: &str) -> Option<&Record> {
        self.records.get(key).map(|record| &**record)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.records.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.records.values().map(|record| &**record)
    }

    /// Incremented by every commit that changed something.
    pub fn version(&self) -> u64 {
        self.version
    }
}

/// A serializable copy of the store's contents, used to persist and restore it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SerializedData {
    pub records: BTreeMap<CacheKey, BTreeMap<String, FieldValue>>
}

impl SerializedData {
    pub(crate) fn from_snapshot(snapshot: &Snapshot) -> Self {
        let records = snapshot
            .records()
            .map(|record| {
                let fields = record
                    .fields()
                    .iter()
                    .map(|(name, value)| (name.clone(), value.clone()))
                    .collect();
                (record.key().to_owned(), fields)
            })
            .collect();
        Self { records }
    }

    pub(crate) fn into_records(self) -> impl Iterator<Item = Record> {
        self.records.into_iter().map(|(key, fields)| Record {
            key,
            fields: fields.into_iter().collect()
        })
    }
}

/// Builds the key a field is stored under: the plain name, or the name followed by its
/// arguments as canonical JSON.
///
/// ```
/// use gql_store::field_key;
/// use serde_json::json;
///
/// assert_eq!(field_key("name", &json!(null)), "name");
/// assert_eq!(field_key("friends", &json!({ "first": 10 })), r#"friends({"first":10})"#);
/// ```
pub fn field_key(name: &str, args: &Value) -> String {
    join_field_key(name, &args_key(args))
}

pub(crate) fn args_key(args: &Value) -> String {
    match args {
        Value::Null => String::new(),
        Value::Object(map) if map.is_empty() => String::new(),
        // serde_json's map is ordered by key, which makes this canonical
        args => args.to_string()
    }
}

#[inline]
pub(crate) fn join_field_key(field_name: &str, args: &str) -> String {
    if args.is_empty() {
        return field_name.to_owned();
    }
    let mut key = String::with_capacity(field_name.len() + args.len() + 2);
    key.push_str(field_name);
    key.push('(');
    key.push_str(args);
    key.push(')');
    key
}

#[inline]
pub(crate) fn prefixed(prefix: &str, field: &str) -> String {
    let mut key = String::with_capacity(prefix.len() + field.len());
    key.push_str(prefix);
    key.push_str(field);
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dog() -> Record {
        Record::new("Dog:1")
            .with_field("__typename", json!("Dog"))
            .with_field("name", json!("Rex"))
            .with_field("owner", Link::Entity("Person:1".to_string()))
    }

    #[test]
    fn merge_preserves_absent_fields() {
        let mut record = dog();
        let changed = record.merge(Record::new("Dog:1").with_field("name", json!("Max")));

        assert!(changed);
        assert_eq!(record.get("name"), Some(&FieldValue::Scalar(json!("Max"))));
        assert_eq!(record.typename(), Some("Dog"));
        assert!(record.get("owner").is_some());
    }

    #[test]
    fn merge_with_identical_fields_changes_nothing() {
        let mut record = dog();
        let incoming = Record::new("Dog:1").with_field("name", json!("Rex"));
        assert!(!record.would_change(&incoming));
        assert!(!record.merge(incoming));
    }

    #[test]
    fn record_set_merges_duplicate_keys() {
        let mut set = RecordSet::new();
        set.insert(Record::new("Dog:1").with_field("name", json!("Rex")));
        set.insert(Record::new("Dog:1").with_field("breed", json!("Collie")));

        assert_eq!(set.len(), 1);
        assert_eq!(set.get("Dog:1").map(Record::len), Some(2));
    }

    #[test]
    fn references_follow_nested_lists() {
        let record = Record::new("Query").with_field(
            "dogs",
            Link::List(vec![
                Link::Entity("Dog:1".to_string()),
                Link::Null,
                Link::List(vec![Link::Entity("Dog:2".to_string())])
            ])
        );
        let references = record.references();
        assert!(references.contains("Dog:1"));
        assert!(references.contains("Dog:2"));
        assert_eq!(references.len(), 2);
    }

    #[test]
    fn null_and_empty_scalars_read_as_links() {
        assert_eq!(Link::from_scalar(&json!(null)), Some(Link::Null));
        assert_eq!(
            Link::from_scalar(&json!([null, []])),
            Some(Link::List(vec![Link::Null, Link::List(Vec::new())]))
        );
        assert_eq!(Link::from_scalar(&json!([1])), None);
    }

    #[test]
    fn field_keys_include_canonical_args() {
        assert_eq!(field_key("dogs", &json!({})), "dogs");
        assert_eq!(
            field_key("dogs", &json!({ "first": 2, "after": "a" })),
            r#"dogs({"after":"a","first":2})"#
        );
    }
}
