use crate::{types::CacheOptions, CacheKey, HashMap};
use serde_json::{Map, Value};
use std::{fmt, sync::Arc};

/// A custom key function for a single type. Gets the typename and the object's fields.
pub type ResolverFn = Arc<dyn Fn(&str, &Map<String, Value>) -> Option<CacheKey> + Send + Sync>;

const DEFAULT_KEYS: [&str; 2] = ["id", "_id"];

/// Derives the cache key of an object from its typename and identifying fields.
///
/// Resolution is pure: the same typename and fields always give the same key. Objects that
/// can't be identified resolve to `None`, which means they're inlined into their parent.
#[derive(Clone)]
pub struct KeyResolver {
    custom_keys: HashMap<String, Vec<String>>,
    root_types: Vec<String>,
    resolvers: HashMap<String, ResolverFn>
}

impl Default for KeyResolver {
    fn default() -> Self {
        Self::from_options(&CacheOptions::default())
    }
}

impl fmt::Debug for KeyResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyResolver")
            .field("custom_keys", &self.custom_keys)
            .field("root_types", &self.root_types)
            .field("resolvers", &self.resolvers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl KeyResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_options(options: &CacheOptions) -> Self {
        Self {
            custom_keys: options
                .custom_keys
                .iter()
                .map(|(typename, fields)| (typename.clone(), fields.clone()))
                .collect(),
            root_types: options.root_types.clone(),
            resolvers: HashMap::default()
        }
    }

    /// Use a custom function to derive keys for `typename`. Takes precedence over
    /// `custom_keys` and the default `id` lookup.
    pub fn with_resolver<F>(mut self, typename: impl Into<String>, resolver: F) -> Self
    where
        F: Fn(&str, &Map<String, Value>) -> Option<CacheKey> + Send + Sync + 'static
    {
        self.resolvers.insert(typename.into(), Arc::new(resolver));
        self
    }

    pub fn is_root(&self, typename: &str) -> bool {
        self.root_types.iter().any(|root| root == typename)
    }

    pub fn root_types(&self) -> &[String] {
        &self.root_types
    }

    pub fn resolve(&self, typename: &str, fields: &Map<String, Value>) -> Option<CacheKey> {
        if self.is_root(typename) {
            return Some(typename.to_string());
        }

        if let Some(resolver) = self.resolvers.get(typename) {
            return resolver(typename, fields);
        }

        let id = if let Some(key_fields) = self.custom_keys.get(typename) {
            composite_id(fields, key_fields)?
        } else {
            DEFAULT_KEYS
                .iter()
                .find_map(|key| fields.get(*key).and_then(id_value))?
        };

        Some(entity_key(typename, &id))
    }
}

fn composite_id(fields: &Map<String, Value>, key_fields: &[String]) -> Option<String> {
    if key_fields.is_empty() {
        return None;
    }
    let mut parts = Vec::with_capacity(key_fields.len());
    for field in key_fields {
        parts.push(fields.get(field).and_then(id_value)?);
    }
    Some(parts.join(":"))
}

fn id_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(id) => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        other => serde_json::to_string(other).ok()
    }
}

#[inline]
fn entity_key(typename: &str, id: &str) -> String {
    let mut key = String::with_capacity(typename.len() + id.len() + 1);
    key.push_str(typename);
    key.push(':');
    key.push_str(id);
    key
}
