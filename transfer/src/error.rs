//! Error types and result definitions for transfer operations.
//!
//! [`TransferError`] carries a classification, a static description, optional dynamic
//! detail, the originating error, and the callsite where it was created. Several errors
//! can be aggregated into one, which is how per-table flush failures are reported.

use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::error;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::panic::Location;
use std::sync::Arc;

/// Result type used across the transfer crate.
pub type TransferResult<T> = Result<T, TransferError>;

/// Payload stored for single [`TransferError`] instances.
#[derive(Debug, Clone)]
struct ErrorPayload {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
    backtrace: Arc<Backtrace>,
}

/// Main error type for transfer operations.
///
/// Use [`crate::transfer_error!`] or [`crate::bail!`] to build one. Multiple errors are
/// aggregated through `From<Vec<E>>`.
#[derive(Debug, Clone)]
pub struct TransferError {
    repr: ErrorRepr,
}

#[derive(Debug, Clone)]
enum ErrorRepr {
    Single(ErrorPayload),
    /// Aggregated errors, e.g. the failures of several table flushes in one sweep.
    Many {
        errors: Vec<TransferError>,
        location: &'static Location<'static>,
    },
}

/// Categories of errors raised by the engine.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // Input errors
    InvalidEvent,
    InvalidData,
    ConversionError,
    DeserializationError,
    SerializationError,
    UnknownTopic,

    // Batching errors
    BatchItemTooLarge,
    BatchEncodeFailed,

    // Destination errors
    MergeFailed,
    AppendFailed,
    DestinationError,

    // Source errors
    SourceError,
    CommitFailed,

    // Configuration errors
    ConfigError,

    // Workflow errors
    InvalidState,
    FlushWorkerPanic,
    ReaderWorkerPanic,

    // IO errors
    IoError,

    Unknown,
}

impl TransferError {
    /// Returns the [`ErrorKind`] of this error, or of the first aggregated error.
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.kind,
            ErrorRepr::Many { ref errors, .. } => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns every [`ErrorKind`] contained in this error, flattened.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self.repr {
            ErrorRepr::Single(ref payload) => vec![payload.kind],
            ErrorRepr::Many { ref errors, .. } => {
                errors.iter().flat_map(|err| err.kinds()).collect()
            }
        }
    }

    /// Returns the static description, or `None` for aggregated errors.
    pub fn description(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::Single(ref payload) => Some(payload.description.as_ref()),
            ErrorRepr::Many { .. } => None,
        }
    }

    /// Returns the dynamic detail, or the first available detail for aggregated errors.
    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.detail.as_deref(),
            ErrorRepr::Many { ref errors, .. } => errors.iter().find_map(|e| e.detail()),
        }
    }

    /// Returns the aggregated errors, if this is an aggregate.
    pub fn errors(&self) -> Option<&[TransferError]> {
        match self.repr {
            ErrorRepr::Single(_) => None,
            ErrorRepr::Many { ref errors, .. } => Some(errors),
        }
    }

    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self.repr {
            ErrorRepr::Single(ref payload) => Some(payload.backtrace.as_ref()),
            ErrorRepr::Many { .. } => None,
        }
    }

    pub fn location(&self) -> &'static Location<'static> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.location,
            ErrorRepr::Many { location, .. } => location,
        }
    }

    /// Attaches the originating error. Has no effect on aggregated errors.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        if let ErrorRepr::Single(ref mut payload) = self.repr {
            payload.source = Some(Arc::new(source));
        }

        self
    }

    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    ) -> Self {
        TransferError {
            repr: ErrorRepr::Single(ErrorPayload {
                kind,
                description,
                detail,
                source,
                location: Location::caller(),
                backtrace: Arc::new(Backtrace::capture()),
            }),
        }
    }

    /// Builds an error wrapping `err`, using its rendering as detail.
    #[track_caller]
    fn from_source<E>(kind: ErrorKind, description: &'static str, err: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        let detail = err.to_string();
        TransferError::from_components(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

impl PartialEq for TransferError {
    fn eq(&self, other: &TransferError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::Single(a), ErrorRepr::Single(b)) => a.kind == b.kind,
            (ErrorRepr::Many { errors: a, .. }, ErrorRepr::Many { errors: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl Hash for TransferError {
    /// Hashes only the kind and static description so repeated occurrences group together.
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(&self.repr).hash(state);
        match &self.repr {
            ErrorRepr::Single(payload) => {
                payload.kind.hash(state);
                payload.description.hash(state);
            }
            ErrorRepr::Many { errors, .. } => {
                errors.len().hash(state);
                for error in errors {
                    error.hash(state);
                }
            }
        }
    }
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match &self.repr {
            ErrorRepr::Single(payload) => {
                let location = payload.location;
                write!(
                    f,
                    "[{:?}] {} @ {}:{}:{}",
                    payload.kind,
                    payload.description,
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                write_detail(payload.detail.as_deref(), f)?;
                write_backtrace(payload.backtrace.as_ref(), f)?;

                Ok(())
            }
            ErrorRepr::Many { errors, location } => {
                let count = errors.len();
                write!(
                    f,
                    "[Many] {} error{} aggregated @ {}:{}:{}",
                    count,
                    if count == 1 { "" } else { "s" },
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                for (index, error) in errors.iter().enumerate() {
                    let rendered = error.to_string();
                    let mut lines = rendered.lines();
                    match lines.next() {
                        Some(first_line) => write!(f, "\n  {}. {}", index + 1, first_line)?,
                        None => write!(f, "\n  {}.", index + 1)?,
                    }

                    for line in lines {
                        write!(f, "\n     {line}")?;
                    }
                }

                Ok(())
            }
        }
    }
}

impl error::Error for TransferError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.repr {
            ErrorRepr::Single(payload) => payload
                .source
                .as_ref()
                .map(|source| source.as_ref() as &(dyn error::Error + 'static)),
            ErrorRepr::Many { errors, .. } => errors
                .first()
                .map(|error| error as &(dyn error::Error + 'static)),
        }
    }
}

fn write_backtrace(backtrace: &Backtrace, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let rendered = backtrace.to_string();
    if rendered.trim().is_empty() || rendered.contains("disabled backtrace") {
        return Ok(());
    }

    write!(f, "\n  Backtrace:")?;
    for line in rendered.lines() {
        write!(f, "\n    {line}")?;
    }

    Ok(())
}

fn write_detail(detail: Option<&str>, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let Some(detail) = detail else {
        return Ok(());
    };

    if detail.trim().is_empty() {
        return write!(f, "\n  Detail: <empty>");
    }

    write!(f, "\n  Detail:")?;
    for line in detail.lines() {
        write!(f, "\n    {line}")?;
    }

    Ok(())
}

impl From<(ErrorKind, &'static str)> for TransferError {
    #[track_caller]
    fn from((kind, desc): (ErrorKind, &'static str)) -> TransferError {
        TransferError::from_components(kind, Cow::Borrowed(desc), None, None)
    }
}

impl<D> From<(ErrorKind, &'static str, D)> for TransferError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, desc, detail): (ErrorKind, &'static str, D)) -> TransferError {
        TransferError::from_components(kind, Cow::Borrowed(desc), Some(detail.into()), None)
    }
}

/// Aggregates errors. A vector with exactly one error yields that error unchanged.
impl<E> From<Vec<E>> for TransferError
where
    E: Into<TransferError>,
{
    #[track_caller]
    fn from(errors: Vec<E>) -> TransferError {
        let location = Location::caller();
        let mut errors: Vec<TransferError> = errors.into_iter().map(Into::into).collect();

        if errors.len() == 1
            && let Some(error) = errors.pop()
        {
            return error;
        }

        TransferError {
            repr: ErrorRepr::Many { errors, location },
        }
    }
}

impl From<std::io::Error> for TransferError {
    #[track_caller]
    fn from(err: std::io::Error) -> TransferError {
        TransferError::from_source(ErrorKind::IoError, "I/O operation failed", err)
    }
}

impl From<serde_json::Error> for TransferError {
    #[track_caller]
    fn from(err: serde_json::Error) -> TransferError {
        let (kind, description) = match err.classify() {
            serde_json::error::Category::Io => (ErrorKind::IoError, "JSON I/O operation failed"),
            serde_json::error::Category::Syntax
            | serde_json::error::Category::Data
            | serde_json::error::Category::Eof => (
                ErrorKind::DeserializationError,
                "JSON deserialization failed",
            ),
        };

        TransferError::from_source(kind, description, err)
    }
}

impl From<std::str::Utf8Error> for TransferError {
    #[track_caller]
    fn from(err: std::str::Utf8Error) -> TransferError {
        TransferError::from_source(ErrorKind::ConversionError, "UTF-8 conversion failed", err)
    }
}

impl From<std::num::ParseIntError> for TransferError {
    #[track_caller]
    fn from(err: std::num::ParseIntError) -> TransferError {
        TransferError::from_source(ErrorKind::ConversionError, "Integer parsing failed", err)
    }
}

impl From<std::num::ParseFloatError> for TransferError {
    #[track_caller]
    fn from(err: std::num::ParseFloatError) -> TransferError {
        TransferError::from_source(ErrorKind::ConversionError, "Float parsing failed", err)
    }
}

impl From<chrono::ParseError> for TransferError {
    #[track_caller]
    fn from(err: chrono::ParseError) -> TransferError {
        TransferError::from_source(ErrorKind::ConversionError, "Datetime parsing failed", err)
    }
}

impl From<base64::DecodeError> for TransferError {
    #[track_caller]
    fn from(err: base64::DecodeError) -> TransferError {
        TransferError::from_source(ErrorKind::ConversionError, "Base64 decoding failed", err)
    }
}

#[cfg(feature = "kafka")]
impl From<rdkafka::error::KafkaError> for TransferError {
    #[track_caller]
    fn from(err: rdkafka::error::KafkaError) -> TransferError {
        TransferError::from_source(ErrorKind::SourceError, "Kafka operation failed", err)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::hash_map::DefaultHasher;

    use super::*;
    use crate::{bail, transfer_error};

    fn failing(value: u32) -> TransferResult<u32> {
        if value == 0 {
            bail!(ErrorKind::InvalidData, "Value must not be zero", "got 0");
        }

        Ok(value)
    }

    #[test]
    fn single_error_exposes_kind_and_detail() {
        let err = transfer_error!(
            ErrorKind::MergeFailed,
            "Merge failed",
            detail = format!("table {}", "orders")
        );

        assert_eq!(err.kind(), ErrorKind::MergeFailed);
        assert_eq!(err.description(), Some("Merge failed"));
        assert_eq!(err.detail(), Some("table orders"));
        assert!(err.errors().is_none());
        assert!(err.to_string().starts_with("[MergeFailed] Merge failed @"));
    }

    #[test]
    fn bail_returns_early() {
        let err = failing(0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
        assert_eq!(failing(3).unwrap(), 3);
    }

    #[test]
    fn vector_of_one_is_not_wrapped() {
        let err: TransferError = vec![transfer_error!(ErrorKind::CommitFailed, "Commit failed")].into();
        assert!(err.errors().is_none());
        assert_eq!(err.kind(), ErrorKind::CommitFailed);
    }

    #[test]
    fn vector_of_many_is_aggregated() {
        let err: TransferError = vec![
            transfer_error!(ErrorKind::MergeFailed, "Merge failed"),
            transfer_error!(ErrorKind::CommitFailed, "Commit failed"),
        ]
        .into();

        assert_eq!(err.errors().map(|errors| errors.len()), Some(2));
        assert_eq!(err.kinds(), vec![ErrorKind::MergeFailed, ErrorKind::CommitFailed]);
        assert!(err.to_string().contains("2 errors aggregated"));
    }

    #[test]
    fn source_is_preserved() {
        let io = std::io::Error::other("disk on fire");
        let err = transfer_error!(ErrorKind::IoError, "Write failed", source: io);

        let source = error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "disk on fire");
    }

    #[test]
    fn hash_ignores_detail_and_location() {
        let hash = |err: &TransferError| {
            let mut hasher = DefaultHasher::new();
            err.hash(&mut hasher);
            hasher.finish()
        };

        let a = transfer_error!(ErrorKind::MergeFailed, "Merge failed", "a");
        let b = transfer_error!(ErrorKind::MergeFailed, "Merge failed", "b");
        assert_eq!(hash(&a), hash(&b));
    }

    #[test]
    fn serde_errors_map_to_deserialization() {
        let err: TransferError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert_eq!(err.kind(), ErrorKind::DeserializationError);
    }
}
