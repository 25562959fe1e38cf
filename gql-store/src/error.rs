use crate::CacheKey;
use std::fmt;
use thiserror::Error;

/// What was wrong with a response that couldn't be normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizationErrorKind {
    /// The response root isn't a JSON object.
    RootNotObject,
    /// A nested object has no `__typename` and the store requires one.
    MissingTypename,
    /// `__typename` is present but isn't a string.
    InvalidTypename,
    /// A list holds both objects and scalars.
    MixedList,
    /// A selection expected an object and the response holds a scalar.
    ExpectedObject,
    /// A selected field is absent from the response.
    MissingField(String)
}

impl fmt::Display for NormalizationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NormalizationErrorKind::RootNotObject => write!(f, "response root is not an object"),
            NormalizationErrorKind::MissingTypename => write!(f, "object is missing `__typename`"),
            NormalizationErrorKind::InvalidTypename => write!(f, "`__typename` is not a string"),
            NormalizationErrorKind::MixedList => {
                write!(f, "list contains both objects and scalar values")
            }
            NormalizationErrorKind::ExpectedObject => write!(f, "expected an object or list"),
            NormalizationErrorKind::MissingField(field) => {
                write!(f, "selected field `{}` is missing", field)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to normalize response at `{path}`: {kind}")]
pub struct NormalizationError {
    /// Response path of the offending node, e.g. `Query.dogs.1.owner`.
    pub path: String,
    pub kind: NormalizationErrorKind
}

impl NormalizationError {
    pub fn new(path: impl Into<String>, kind: NormalizationErrorKind) -> Self {
        Self {
            path: path.into(),
            kind
        }
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Normalization(#[from] NormalizationError),
    #[error("no record with key `{0}` in the cache")]
    RecordNotFound(CacheKey),
    #[error("cached data for `{key}` doesn't match the requested shape at `{path}`: {reason}")]
    ShapeMismatch {
        key: CacheKey,
        path: String,
        reason: String
    },
    #[error("reference cycle while reading `{key}`: {}", .path.join(" -> "))]
    Cycle { key: CacheKey, path: Vec<CacheKey> },
    #[error("failed to serialize object for `{key}`")]
    Serialize {
        key: CacheKey,
        #[source]
        source: serde_json::Error
    }
}

impl CacheError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::RecordNotFound(_))
    }

    pub fn is_shape_mismatch(&self) -> bool {
        matches!(self, CacheError::ShapeMismatch { .. })
    }
}
