use crate::{
    error::CacheError,
    selection::{FieldSelector, UnionSelection},
    store::{
        data::{prefixed, CacheKey, FieldValue, Link, Record, TYPENAME},
        CacheRead
    },
    HashSet
};
use serde::{
    de,
    de::{
        DeserializeSeed, EnumAccess, Error as _, IntoDeserializer, MapAccess, SeqAccess,
        VariantAccess, Visitor
    },
    forward_to_deserialize_any, Deserializer
};
use serde_json::{Map, Value};
use std::{cell::RefCell, fmt, fmt::Display};

#[derive(Debug)]
pub(crate) enum ReadError {
    NotFound(CacheKey),
    Mismatch(String)
}

impl de::Error for ReadError {
    #[cold]
    fn custom<T: Display>(msg: T) -> Self {
        ReadError::Mismatch(msg.to_string())
    }

    #[cold]
    fn invalid_type(unexp: de::Unexpected, exp: &dyn de::Expected) -> Self {
        if let de::Unexpected::Unit = unexp {
            ReadError::custom(format_args!("invalid type: null, expected {}", exp))
        } else {
            ReadError::custom(format_args!("invalid type: {}, expected {}", unexp, exp))
        }
    }
}

impl de::StdError for ReadError {}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ReadError::NotFound(key) => write!(f, "record `{}` not found", key),
            ReadError::Mismatch(msg) => write!(f, "{}", msg)
        }
    }
}

fn mismatch(e: serde_json::Error) -> ReadError {
    ReadError::Mismatch(e.to_string())
}

/// State shared by every deserializer of one read.
pub(crate) struct ReadContext<'a> {
    source: &'a dyn CacheRead,
    dependencies: RefCell<HashSet<CacheKey>>,
    // Field path of the value being read. Left as-is when an error unwinds.
    path: RefCell<Vec<String>>
}

impl<'a> ReadContext<'a> {
    pub(crate) fn new(source: &'a dyn CacheRead) -> Self {
        Self {
            source,
            dependencies: RefCell::new(HashSet::default()),
            path: RefCell::new(Vec::new())
        }
    }

    fn resolve(&self, key: &str) -> Result<&'a Record, ReadError> {
        let record = self
            .source
            .record(key)
            .ok_or_else(|| ReadError::NotFound(key.to_owned()))?;
        self.dependencies.borrow_mut().insert(key.to_owned());
        Ok(record)
    }

    fn enter(&self, segment: impl Into<String>) {
        self.path.borrow_mut().push(segment.into());
    }

    fn leave(&self) {
        self.path.borrow_mut().pop();
    }

    fn into_error(self, key: &str, error: ReadError) -> CacheError {
        match error {
            ReadError::NotFound(missing) => CacheError::RecordNotFound(missing),
            ReadError::Mismatch(reason) => CacheError::ShapeMismatch {
                key: key.to_owned(),
                path: self.path.into_inner().join("."),
                reason
            }
        }
    }
}

#[derive(Clone, Copy)]
enum Target<'s> {
    Fields(&'s [FieldSelector]),
    Union(&'s UnionSelection)
}

fn typename_at<'r>(record: &'r Record, prefix: &str) -> Result<&'r str, ReadError> {
    record
        .get(&prefixed(prefix, TYPENAME))
        .and_then(FieldValue::as_scalar)
        .and_then(Value::as_str)
        .ok_or_else(|| ReadError::custom("missing `__typename` on union member"))
}

/// Reads the fields of one object, either a whole record or an object inlined into one.
pub(crate) struct ObjectDeserializer<'a> {
    cx: &'a ReadContext<'a>,
    record: &'a Record,
    prefix: String,
    selection: <&'a [FieldSelector] as IntoIterator>::IntoIter,
    value: Option<&'a FieldSelector>
}

impl<'a> ObjectDeserializer<'a> {
    fn new(
        cx: &'a ReadContext<'a>,
        record: &'a Record,
        prefix: String,
        selection: &'a [FieldSelector]
    ) -> Self {
        Self {
            cx,
            record,
            prefix,
            selection: selection.iter(),
            value: None
        }
    }
}

impl<'a, 'de> MapAccess<'de> for ObjectDeserializer<'a> {
    type Error = ReadError;

    fn next_key_seed<K: DeserializeSeed<'de>>(
        &mut self,
        seed: K
    ) -> Result<Option<K::Value>, Self::Error> {
        match self.selection.next() {
            Some(selector) => {
                self.value = Some(selector);
                seed.deserialize(selector.name().into_deserializer())
                    .map(Some)
            }
            None => Ok(None)
        }
    }

    fn next_value_seed<V: DeserializeSeed<'de>>(
        &mut self,
        seed: V
    ) -> Result<V::Value, Self::Error> {
        let selector = self
            .value
            .take()
            .ok_or_else(|| ReadError::custom("value is missing"))?;
        self.cx.enter(selector.name());
        let field = FieldDeserializer {
            cx: self.cx,
            record: self.record,
            field: prefixed(&self.prefix, &selector.storage_key()),
            selector
        };
        let value = seed.deserialize(field)?;
        self.cx.leave();
        Ok(value)
    }

    fn size_hint(&self) -> Option<usize> {
        match self.selection.size_hint() {
            (lower, Some(upper)) if lower == upper => Some(upper),
            _ => None
        }
    }
}

impl<'a, 'de> Deserializer<'de> for ObjectDeserializer<'a> {
    type Error = ReadError;

    #[inline]
    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        visitor.visit_map(self)
    }

    #[inline]
    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        visitor.visit_some(self)
    }

    forward_to_deserialize_any! {
        bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char str string
        bytes byte_buf unit unit_struct newtype_struct seq tuple
        tuple_struct map struct enum identifier ignored_any
    }
}

/// Reads one selected field of a record.
struct FieldDeserializer<'a> {
    cx: &'a ReadContext<'a>,
    record: &'a Record,
    field: String,
    selector: &'a FieldSelector
}

enum Field<'a> {
    Scalar(Value),
    Link(LinkDeserializer<'a>)
}

impl<'a> FieldDeserializer<'a> {
    fn read(self) -> Result<Field<'a>, ReadError> {
        let value = self
            .record
            .get(&self.field)
            .ok_or_else(|| ReadError::custom(format_args!("missing field `{}`", self.field)))?;
        let target = match self.selector {
            FieldSelector::Scalar(_, _) => {
                return match value {
                    FieldValue::Scalar(value) => Ok(Field::Scalar(value.clone())),
                    FieldValue::Link(_) => Err(ReadError::custom(
                        "invalid type: object reference, expected a scalar"
                    ))
                };
            }
            FieldSelector::Object(_, _, inner) => Target::Fields(inner),
            FieldSelector::Union(_, _, inner) => Target::Union(inner)
        };
        let link = match value {
            FieldValue::Link(link) => link.clone(),
            FieldValue::Scalar(value) => Link::from_scalar(value).ok_or_else(|| {
                ReadError::custom("invalid type: scalar, expected an object")
            })?
        };
        Ok(Field::Link(LinkDeserializer {
            cx: self.cx,
            record: self.record,
            link,
            target
        }))
    }
}

impl<'a, 'de> Deserializer<'de> for FieldDeserializer<'a> {
    type Error = ReadError;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self.read()? {
            Field::Scalar(value) => value.deserialize_any(visitor).map_err(mismatch),
            Field::Link(link) => link.deserialize_any(visitor)
        }
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self.read()? {
            Field::Scalar(Value::Null) => visitor.visit_none(),
            Field::Scalar(value) => visitor.visit_some(value).map_err(mismatch),
            Field::Link(link) => link.deserialize_option(visitor)
        }
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        name: &'static str,
        visitor: V
    ) -> Result<V::Value, Self::Error> {
        match self.read()? {
            Field::Scalar(value) => value
                .deserialize_newtype_struct(name, visitor)
                .map_err(mismatch),
            Field::Link(link) => link.deserialize_newtype_struct(name, visitor)
        }
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        name: &'static str,
        variants: &'static [&'static str],
        visitor: V
    ) -> Result<V::Value, Self::Error> {
        match self.read()? {
            Field::Scalar(value) => value
                .deserialize_enum(name, variants, visitor)
                .map_err(mismatch),
            Field::Link(link) => link.deserialize_enum(name, variants, visitor)
        }
    }

    forward_to_deserialize_any! {
        bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char str string
        bytes byte_buf unit unit_struct seq tuple
        tuple_struct map struct identifier ignored_any
    }
}

/// Follows a link to the object or list it points at.
struct LinkDeserializer<'a> {
    cx: &'a ReadContext<'a>,
    // The record holding the link, which also holds any embedded objects.
    record: &'a Record,
    link: Link,
    target: Target<'a>
}

impl<'a> LinkDeserializer<'a> {
    /// The record and field prefix of the object this link points at.
    fn object(&self) -> Result<Option<(&'a Record, String)>, ReadError> {
        match &self.link {
            Link::Entity(key) => Ok(Some((self.cx.resolve(key)?, String::new()))),
            Link::Embedded(path) => Ok(Some((self.record, format!("{}.", path)))),
            Link::Null | Link::List(_) => Ok(None)
        }
    }
}

fn visit_object<'a, 'de, V: Visitor<'de>>(
    cx: &'a ReadContext<'a>,
    record: &'a Record,
    prefix: String,
    target: Target<'a>,
    visitor: V
) -> Result<V::Value, ReadError> {
    match target {
        Target::Fields(selection) => {
            visitor.visit_map(ObjectDeserializer::new(cx, record, prefix, selection))
        }
        Target::Union(select) => {
            let selection = select(typename_at(record, &prefix)?);
            visitor.visit_map(ObjectDeserializer::new(cx, record, prefix, &selection))
        }
    }
}

impl<'a, 'de> Deserializer<'de> for LinkDeserializer<'a> {
    type Error = ReadError;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        if let Some((record, prefix)) = self.object()? {
            return visit_object(self.cx, record, prefix, self.target, visitor);
        }
        match self.link {
            Link::List(links) => visitor.visit_seq(SeqDeserializer {
                cx: self.cx,
                record: self.record,
                links: links.into_iter().enumerate(),
                target: self.target
            }),
            _ => visitor.visit_unit()
        }
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self.link {
            Link::Null => visitor.visit_none(),
            _ => visitor.visit_some(self)
        }
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V
    ) -> Result<V::Value, Self::Error> {
        visitor.visit_newtype_struct(self)
    }

    /// Unions can be read into externally tagged enums whose variants are named after the
    /// member typenames.
    fn deserialize_enum<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        visitor: V
    ) -> Result<V::Value, Self::Error> {
        let (record, prefix) = self
            .object()?
            .ok_or_else(|| ReadError::custom("invalid type: list or null, expected a union"))?;
        let typename = typename_at(record, &prefix)?;
        match self.target {
            Target::Union(select) => {
                let selection = select(typename);
                visitor.visit_enum(UnionDeserializer {
                    variant: typename,
                    value: ObjectDeserializer::new(self.cx, record, prefix, &selection)
                })
            }
            Target::Fields(selection) => visitor.visit_enum(UnionDeserializer {
                variant: typename,
                value: ObjectDeserializer::new(self.cx, record, prefix, selection)
            })
        }
    }

    forward_to_deserialize_any! {
        bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char str string
        bytes byte_buf unit unit_struct seq tuple
        tuple_struct map struct identifier ignored_any
    }
}

struct SeqDeserializer<'a> {
    cx: &'a ReadContext<'a>,
    record: &'a Record,
    links: std::iter::Enumerate<std::vec::IntoIter<Link>>,
    target: Target<'a>
}

impl<'a, 'de> SeqAccess<'de> for SeqDeserializer<'a> {
    type Error = ReadError;

    fn next_element_seed<T: DeserializeSeed<'de>>(
        &mut self,
        seed: T
    ) -> Result<Option<T::Value>, Self::Error> {
        match self.links.next() {
            Some((i, link)) => {
                self.cx.enter(i.to_string());
                let value = seed.deserialize(LinkDeserializer {
                    cx: self.cx,
                    record: self.record,
                    link,
                    target: self.target
                })?;
                self.cx.leave();
                Ok(Some(value))
            }
            None => Ok(None)
        }
    }

    fn size_hint(&self) -> Option<usize> {
        match self.links.size_hint() {
            (lower, Some(upper)) if lower == upper => Some(upper),
            _ => None
        }
    }
}

struct UnionDeserializer<'a> {
    variant: &'a str,
    value: ObjectDeserializer<'a>
}

impl<'a, 'de> EnumAccess<'de> for UnionDeserializer<'a> {
    type Error = ReadError;
    type Variant = VariantDeserializer<'a>;

    fn variant_seed<V: DeserializeSeed<'de>>(
        self,
        seed: V
    ) -> Result<(V::Value, Self::Variant), Self::Error> {
        let variant = self.variant.into_deserializer();
        let visitor = VariantDeserializer { value: self.value };
        seed.deserialize(variant).map(|v| (v, visitor))
    }
}

struct VariantDeserializer<'a> {
    value: ObjectDeserializer<'a>
}

impl<'a, 'de> VariantAccess<'de> for VariantDeserializer<'a> {
    type Error = ReadError;

    fn unit_variant(self) -> Result<(), Self::Error> {
        Err(ReadError::custom("union members can't be unit variants"))
    }

    fn newtype_variant_seed<T: DeserializeSeed<'de>>(
        self,
        seed: T
    ) -> Result<T::Value, Self::Error> {
        seed.deserialize(self.value)
    }

    fn tuple_variant<V: Visitor<'de>>(
        self,
        _len: usize,
        _visitor: V
    ) -> Result<V::Value, Self::Error> {
        Err(ReadError::custom("union members can't be tuple variants"))
    }

    fn struct_variant<V: Visitor<'de>>(
        self,
        _fields: &'static [&'static str],
        visitor: V
    ) -> Result<V::Value, Self::Error> {
        visitor.visit_map(self.value)
    }
}

/// Deserialize `T` from the record at `key`, walking the records along `selection`.
/// Returns the keys of every record the read touched.
pub(crate) fn read_object<T: de::DeserializeOwned>(
    source: &dyn CacheRead,
    key: &str,
    selection: &[FieldSelector]
) -> Result<(T, HashSet<CacheKey>), CacheError> {
    let cx = ReadContext::new(source);
    let result = cx.resolve(key).and_then(|record| {
        T::deserialize(ObjectDeserializer::new(&cx, record, String::new(), selection))
    });
    match result {
        Ok(value) => Ok((value, cx.dependencies.into_inner())),
        Err(e) => Err(cx.into_error(key, e))
    }
}

/// Read the full tree rooted at `key`, following every reference. A key that shows up again
/// on its own path is a cycle and can't be expanded into a tree.
pub(crate) fn read_value(source: &dyn CacheRead, key: &str) -> Result<Value, CacheError> {
    let mut stack = Vec::new();
    read_entity(source, key, &mut stack)
}

fn read_entity(
    source: &dyn CacheRead,
    key: &str,
    stack: &mut Vec<CacheKey>
) -> Result<Value, CacheError> {
    if stack.iter().any(|seen| seen == key) {
        let mut path = stack.clone();
        path.push(key.to_owned());
        return Err(CacheError::Cycle {
            key: stack[0].clone(),
            path
        });
    }
    let record = source
        .record(key)
        .ok_or_else(|| CacheError::RecordNotFound(key.to_owned()))?;

    stack.push(key.to_owned());
    let embedded = record.embedded_paths();
    let object = object_at(source, record, "", &embedded, stack)?;
    stack.pop();

    Ok(Value::Object(object))
}

/// Builds the object whose fields are stored under `owner` (`""` for the record itself).
fn object_at(
    source: &dyn CacheRead,
    record: &Record,
    owner: &str,
    embedded: &[&str],
    stack: &mut Vec<CacheKey>
) -> Result<Map<String, Value>, CacheError> {
    let mut object = Map::new();
    for (name, value) in record.fields() {
        if owner_of(name, embedded) != owner {
            continue;
        }
        let local = if owner.is_empty() {
            name.as_str()
        } else {
            &name[owner.len() + 1..]
        };
        let value = match value {
            FieldValue::Scalar(value) => value.clone(),
            FieldValue::Link(link) => link_value(source, record, link, embedded, stack)?
        };
        object.insert(local.to_owned(), value);
    }
    Ok(object)
}

fn link_value(
    source: &dyn CacheRead,
    record: &Record,
    link: &Link,
    embedded: &[&str],
    stack: &mut Vec<CacheKey>
) -> Result<Value, CacheError> {
    match link {
        Link::Null => Ok(Value::Null),
        Link::Entity(key) => read_entity(source, key, stack),
        Link::Embedded(path) => Ok(Value::Object(object_at(
            source, record, path, embedded, stack
        )?)),
        Link::List(links) => links
            .iter()
            .map(|link| link_value(source, record, link, embedded, stack))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array)
    }
}

/// The longest embedded path that `field` is stored under.
fn owner_of<'e>(field: &str, embedded: &[&'e str]) -> &'e str {
    embedded
        .iter()
        .filter(|path| {
            field.len() > path.len()
                && field.starts_with(**path)
                && field.as_bytes()[path.len()] == b'.'
        })
        .max_by_key(|path| path.len())
        .copied()
        .unwrap_or("")
}

/// Read a selection into a plain JSON value.
pub(crate) fn read_selection(
    source: &dyn CacheRead,
    key: &str,
    selection: &[FieldSelector]
) -> Result<(Value, HashSet<CacheKey>), CacheError> {
    read_object::<Value>(source, key, selection)
}
