use crate::store::{args_key, join_field_key};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::{fmt, sync::Arc};

/// Picks the selection of a union member by its `__typename`.
pub type UnionSelection = Arc<dyn Fn(&str) -> Vec<FieldSelector> + Send + Sync>;

/// An abstract selection tree describing which fields of a record a typed object needs.
#[derive(Clone)]
pub enum FieldSelector {
    /// field name, arguments
    Scalar(String, String),
    /// field name, arguments, inner selection
    Object(String, String, Vec<FieldSelector>),
    /// field name, arguments, inner selection by type
    Union(String, String, UnionSelection)
}

impl FieldSelector {
    pub fn scalar(name: impl Into<String>) -> Self {
        FieldSelector::Scalar(name.into(), String::new())
    }

    pub fn object(name: impl Into<String>, selection: Vec<FieldSelector>) -> Self {
        FieldSelector::Object(name.into(), String::new(), selection)
    }

    pub fn union<F>(name: impl Into<String>, selection: F) -> Self
    where
        F: Fn(&str) -> Vec<FieldSelector> + Send + Sync + 'static
    {
        FieldSelector::Union(name.into(), String::new(), Arc::new(selection))
    }

    /// Attach field arguments. They become part of the key the field is stored under.
    pub fn with_args(self, args: &Value) -> Self {
        let args = args_key(args);
        match self {
            FieldSelector::Scalar(name, _) => FieldSelector::Scalar(name, args),
            FieldSelector::Object(name, _, inner) => FieldSelector::Object(name, args, inner),
            FieldSelector::Union(name, _, inner) => FieldSelector::Union(name, args, inner)
        }
    }

    /// The name of the field in the response.
    pub fn name(&self) -> &str {
        match self {
            FieldSelector::Scalar(name, _) => name,
            FieldSelector::Object(name, _, _) => name,
            FieldSelector::Union(name, _, _) => name
        }
    }

    pub fn args(&self) -> &str {
        match self {
            FieldSelector::Scalar(_, args) => args,
            FieldSelector::Object(_, args, _) => args,
            FieldSelector::Union(_, args, _) => args
        }
    }

    /// The key this field is stored under in a record.
    pub fn storage_key(&self) -> String {
        join_field_key(self.name(), self.args())
    }
}

impl fmt::Debug for FieldSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldSelector::Scalar(name, args) => {
                f.debug_tuple("Scalar").field(name).field(args).finish()
            }
            FieldSelector::Object(name, args, inner) => f
                .debug_tuple("Object")
                .field(name)
                .field(args)
                .field(inner)
                .finish(),
            FieldSelector::Union(name, args, _) => f
                .debug_tuple("Union")
                .field(name)
                .field(args)
                .finish()
        }
    }
}

/// A typed object that can be read out of the store.
///
/// The selection must name every field the type deserializes. Nested objects are described by
/// `Object` (or `Union`) selectors, which the store follows through references and inlined
/// objects.
///
/// # Example
///
/// ```
/// use gql_store::{CacheObject, FieldSelector};
/// use serde::Deserialize;
///
/// #[derive(Deserialize)]
/// struct Dog {
///     id: String,
///     name: String
/// }
///
/// impl CacheObject for Dog {
///     fn selection() -> Vec<FieldSelector> {
///         vec![FieldSelector::scalar("id"), FieldSelector::scalar("name")]
///     }
/// }
/// ```
pub trait CacheObject: DeserializeOwned {
    fn selection() -> Vec<FieldSelector>;
}
