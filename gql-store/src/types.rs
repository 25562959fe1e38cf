use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Options to pass to the store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CacheOptions {
    /// A `HashMap` of typenames to the fields that identify them.
    /// The values are the names of the fields, not the IDs themselves.
    /// So if your `User` has a unique ID called `ident`, you should
    /// set `"User" => vec!["ident"]`. More than one field makes a composite key.
    /// The default ID keys are `id` and `_id`, so those don't need to be mapped.
    pub custom_keys: HashMap<String, Vec<String>>,
    /// Typenames that are stored under their own name, such as `Query`.
    pub root_types: Vec<String>,
    /// Fail normalization when a nested object has no `__typename`.
    /// Without this, such objects are inlined into their parent.
    pub require_typename: bool
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            custom_keys: HashMap::new(),
            root_types: vec![
                "Query".to_string(),
                "Mutation".to_string(),
                "Subscription".to_string()
            ],
            require_typename: false
        }
    }
}

impl CacheOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load options from a JSON document. Missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn custom_key<I, S>(mut self, typename: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>
    {
        self.custom_keys
            .insert(typename.into(), fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn require_typename(mut self, require: bool) -> Self {
        self.require_typename = require;
        self
    }
}
