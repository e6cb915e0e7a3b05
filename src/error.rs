use thiserror::Error;

use crate::graph::FieldPath;

pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors raised by cache operations.
///
/// Reads degrade to partial data instead of failing; only fragment resolution
/// errors escape a read. Any error escaping a write, transaction or updater
/// rolls the whole transaction back.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// A fragment spread was found but the document carries no fragment lookup.
    #[error("selection spreads a fragment but no fragment lookup was supplied")]
    MissingFragmentLookup,
    /// The fragment lookup has no definition for the spread name.
    #[error("fragment `{name}` is not defined")]
    MissingFragment { name: String },
    /// A fragment spreads itself, directly or through other fragments.
    #[error("fragment `{name}` spreads itself")]
    FragmentCycle { name: String },
    /// The payload does not have the shape the selection expects.
    #[error("cannot write `{path}`: {message}")]
    Write { path: FieldPath, message: String },
    /// A caller callback asked for the transaction to be abandoned.
    #[error("transaction aborted: {0}")]
    Aborted(String),
    /// A cache image could not be encoded or decoded.
    #[error("cache image codec error: {0}")]
    Codec(String),
    /// An image store failed.
    #[error("image store error: {0}")]
    Storage(String),
}

impl CacheError {
    pub fn aborted(reason: impl Into<String>) -> Self {
        CacheError::Aborted(reason.into())
    }

    pub(crate) fn write(path: &FieldPath, message: impl Into<String>) -> Self {
        CacheError::Write {
            path: path.clone(),
            message: message.into(),
        }
    }
}
