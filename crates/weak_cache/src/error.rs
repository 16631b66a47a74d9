// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

/// A boxed error produced by a value factory.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The result for fallible operations that use the [`Error`] type of this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// An error returned by [`WeakCache::get()`][crate::WeakCache::get].
///
/// Errors are reported only to the caller whose request produced them. Nothing about a failed
/// request is cached: the next request for the same key and parameter starts over.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use weak_cache::WeakCache;
///
/// let cache = WeakCache::<(), u32, u32, u32>::new(
///     |_, p| Some(*p),
///     |_, _| Err::<Arc<u32>, _>("no value for you"),
/// );
///
/// let error = cache.get(None, &7).unwrap_err();
/// assert!(error.is_computation());
/// ```
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct Error(#[from] ErrorKind);

/// The reason a request failed.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The sub-key strategy did not produce a sub-key for the request.
    ///
    /// This is a usage error: retrying the same request fails the same way.
    #[error("the sub-key strategy produced no sub-key for the request")]
    MissingSubKey,

    /// The value factory failed. The underlying cause is available via `source()`.
    #[error("value computation failed")]
    Computation(#[source] BoxError),
}

impl Error {
    pub(crate) const fn missing_sub_key() -> Self {
        Self(ErrorKind::MissingSubKey)
    }

    pub(crate) fn computation(cause: impl Into<BoxError>) -> Self {
        Self(ErrorKind::Computation(cause.into()))
    }

    /// Returns the reason for the failure.
    #[must_use]
    pub const fn kind(&self) -> &ErrorKind {
        &self.0
    }

    /// Returns `true` if the request itself was malformed.
    #[must_use]
    pub const fn is_usage(&self) -> bool {
        matches!(self.0, ErrorKind::MissingSubKey)
    }

    /// Returns `true` if the value factory failed.
    #[must_use]
    pub const fn is_computation(&self) -> bool {
        matches!(self.0, ErrorKind::Computation(_))
    }
}
