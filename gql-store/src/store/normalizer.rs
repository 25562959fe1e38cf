use crate::{
    cache_key::KeyResolver,
    error::{NormalizationError, NormalizationErrorKind},
    selection::{FieldSelector, UnionSelection},
    store::data::{prefixed, CacheKey, FieldValue, Link, Record, RecordSet, TYPENAME},
    types::CacheOptions
};
use serde_json::{Map, Value};
use std::sync::Arc;

/// The result of normalizing one response.
#[derive(Clone, Debug, PartialEq)]
pub struct Normalized {
    /// The key of the record the response root was written to.
    pub root: CacheKey,
    pub records: RecordSet
}

/// Flattens nested response trees into records.
#[derive(Clone, Debug)]
pub struct Normalizer {
    resolver: Arc<KeyResolver>,
    require_typename: bool
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(KeyResolver::default())
    }
}

#[derive(Clone, Copy)]
enum Shape<'s> {
    /// No selection, every object is normalized.
    Any,
    /// Stored verbatim, even if it's an object.
    Scalar,
    Fields(&'s [FieldSelector]),
    Union(&'s UnionSelection)
}

impl FieldSelector {
    fn shape(&self) -> Shape<'_> {
        match self {
            FieldSelector::Scalar(_, _) => Shape::Scalar,
            FieldSelector::Object(_, _, inner) => Shape::Fields(inner),
            FieldSelector::Union(_, _, inner) => Shape::Union(inner)
        }
    }
}

impl Normalizer {
    pub fn new(resolver: KeyResolver) -> Self {
        Self {
            resolver: Arc::new(resolver),
            require_typename: false
        }
    }

    pub fn from_options(options: &CacheOptions) -> Self {
        Self::new(KeyResolver::from_options(options)).require_typename(options.require_typename)
    }

    pub fn require_typename(mut self, require: bool) -> Self {
        self.require_typename = require;
        self
    }

    pub fn resolver(&self) -> &KeyResolver {
        &self.resolver
    }

    /// Normalize a response tree without a selection. Every nested object that resolves to a
    /// cache key becomes its own record.
    ///
    /// The root object is stored under its own cache key if it has one, otherwise under
    /// `root`.
    pub fn normalize(&self, data: &Value, root: &str) -> Result<Normalized, NormalizationError> {
        self.normalize_shape(data, root, Shape::Any)
    }

    /// Normalize a response guided by a selection. Fields are stored under their
    /// argument-qualified keys and selected scalars are kept verbatim even if they're objects.
    pub fn normalize_selection(
        &self,
        data: &Value,
        root: &str,
        selection: &[FieldSelector]
    ) -> Result<Normalized, NormalizationError> {
        self.normalize_shape(data, root, Shape::Fields(selection))
    }

    fn normalize_shape(
        &self,
        data: &Value,
        root: &str,
        shape: Shape
    ) -> Result<Normalized, NormalizationError> {
        let object = data.as_object().ok_or_else(|| {
            NormalizationError::new(root, NormalizationErrorKind::RootNotObject)
        })?;
        let mut walker = Walker {
            resolver: &self.resolver,
            require_typename: self.require_typename,
            records: RecordSet::new(),
            path: vec![root.to_owned()]
        };

        let key = match object.get(TYPENAME) {
            Some(Value::String(typename)) => self.resolver.resolve(typename, object),
            Some(Value::Null) | None => None,
            Some(_) => return Err(walker.error(NormalizationErrorKind::InvalidTypename))
        }
        .unwrap_or_else(|| root.to_owned());

        walker.write_object(&key, object, shape)?;
        trace!(root = %key, records = walker.records.len(), "normalized response");

        Ok(Normalized {
            root: key,
            records: walker.records
        })
    }
}

struct Walker<'n> {
    resolver: &'n KeyResolver,
    require_typename: bool,
    records: RecordSet,
    path: Vec<String>
}

impl<'n> Walker<'n> {
    fn error(&self, kind: NormalizationErrorKind) -> NormalizationError {
        NormalizationError::new(self.path.join("."), kind)
    }

    fn typename<'v>(
        &self,
        object: &'v Map<String, Value>
    ) -> Result<Option<&'v str>, NormalizationError> {
        match object.get(TYPENAME) {
            Some(Value::String(typename)) => Ok(Some(typename)),
            Some(Value::Null) | None if self.require_typename => {
                Err(self.error(NormalizationErrorKind::MissingTypename))
            }
            Some(Value::Null) | None => Ok(None),
            Some(_) => Err(self.error(NormalizationErrorKind::InvalidTypename))
        }
    }

    fn write_object(
        &mut self,
        key: &str,
        object: &Map<String, Value>,
        shape: Shape
    ) -> Result<(), NormalizationError> {
        let mut record = Record::new(key);
        self.collect_fields(&mut record, "", object, shape)?;
        self.records.insert(record);
        Ok(())
    }

    /// Writes the fields of `object` into `record`, each prefixed with `prefix`.
    fn collect_fields(
        &mut self,
        record: &mut Record,
        prefix: &str,
        object: &Map<String, Value>,
        shape: Shape
    ) -> Result<(), NormalizationError> {
        match shape {
            Shape::Any | Shape::Scalar => {
                for (name, value) in object {
                    self.write_field(record, prefix, name, name, value, Shape::Any)?;
                }
            }
            Shape::Fields(selection) => {
                if let Some(typename) = object.get(TYPENAME) {
                    record.set(prefixed(prefix, TYPENAME), typename.clone());
                }
                for selector in selection {
                    let name = selector.name();
                    let value = object.get(name).ok_or_else(|| {
                        self.error(NormalizationErrorKind::MissingField(name.to_owned()))
                    })?;
                    let storage_key = selector.storage_key();
                    self.write_field(record, prefix, name, &storage_key, value, selector.shape())?;
                }
            }
            Shape::Union(select) => {
                let typename = self
                    .typename(object)?
                    .ok_or_else(|| self.error(NormalizationErrorKind::MissingTypename))?;
                let selection = select(typename);
                self.collect_fields(record, prefix, object, Shape::Fields(&selection))?;
            }
        }
        Ok(())
    }

    fn write_field(
        &mut self,
        record: &mut Record,
        prefix: &str,
        response_name: &str,
        storage_key: &str,
        value: &Value,
        shape: Shape
    ) -> Result<(), NormalizationError> {
        let field_path = prefixed(prefix, storage_key);
        self.path.push(response_name.to_owned());
        let value = self.field_value(record, &field_path, value, shape)?;
        self.path.pop();
        record.set(field_path, value);
        Ok(())
    }

    fn field_value(
        &mut self,
        record: &mut Record,
        field_path: &str,
        value: &Value,
        shape: Shape
    ) -> Result<FieldValue, NormalizationError> {
        match (value, shape) {
            (_, Shape::Scalar) => Ok(FieldValue::Scalar(value.clone())),
            (Value::Object(object), _) => {
                let link = self.object_link(record, field_path, object, shape)?;
                Ok(FieldValue::Link(link))
            }
            (Value::Array(items), _) => {
                if !items.iter().any(contains_objects) {
                    return Ok(FieldValue::Scalar(value.clone()));
                }
                if items.iter().any(contains_scalars) {
                    return Err(self.error(NormalizationErrorKind::MixedList));
                }
                let link = self.list_link(record, field_path, items, shape)?;
                Ok(FieldValue::Link(link))
            }
            (Value::Null, _) | (_, Shape::Any) => Ok(FieldValue::Scalar(value.clone())),
            (_, Shape::Fields(_)) | (_, Shape::Union(_)) => {
                Err(self.error(NormalizationErrorKind::ExpectedObject))
            }
        }
    }

    /// Only called for lists that hold objects, nulls and nested lists of those.
    fn list_link(
        &mut self,
        record: &mut Record,
        field_path: &str,
        items: &[Value],
        shape: Shape
    ) -> Result<Link, NormalizationError> {
        let mut links = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            let item_path = format!("{}.{}", field_path, i);
            self.path.push(i.to_string());
            let link = match item {
                Value::Object(object) => self.object_link(record, &item_path, object, shape)?,
                Value::Array(inner) => self.list_link(record, &item_path, inner, shape)?,
                _ => Link::Null
            };
            self.path.pop();
            links.push(link);
        }
        Ok(Link::List(links))
    }

    /// Normalizes a nested object. Objects with a cache key get their own record and are
    /// referenced, everything else is inlined into `record` under `field_path`.
    fn object_link(
        &mut self,
        record: &mut Record,
        field_path: &str,
        object: &Map<String, Value>,
        shape: Shape
    ) -> Result<Link, NormalizationError> {
        let typename = self.typename(object)?;
        let union_selection;
        let shape = match shape {
            Shape::Union(select) => {
                let typename =
                    typename.ok_or_else(|| self.error(NormalizationErrorKind::MissingTypename))?;
                union_selection = select(typename);
                Shape::Fields(&union_selection)
            }
            shape => shape
        };

        match typename.and_then(|typename| self.resolver.resolve(typename, object)) {
            Some(key) => {
                self.write_object(&key, object, shape)?;
                Ok(Link::Entity(key))
            }
            None => {
                let prefix = format!("{}.", field_path);
                self.collect_fields(record, &prefix, object, shape)?;
                Ok(Link::Embedded(field_path.to_owned()))
            }
        }
    }
}

fn contains_objects(value: &Value) -> bool {
    match value {
        Value::Object(_) => true,
        Value::Array(items) => items.iter().any(contains_objects),
        _ => false
    }
}

fn contains_scalars(value: &Value) -> bool {
    match value {
        Value::Object(_) | Value::Null => false,
        Value::Array(items) => items.iter().any(contains_scalars),
        _ => true
    }
}
