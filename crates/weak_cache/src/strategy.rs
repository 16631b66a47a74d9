// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The two pluggable functions a cache is built from.

use std::sync::Arc;

use crate::error::BoxError;

/// Derives the sub-key of a request from its primary key (if any) and parameter.
///
/// Must be deterministic and free of side effects. Returning `None` rejects the request.
pub(crate) type SubKeyStrategy<K, P, S> = Box<dyn Fn(Option<&K>, &P) -> Option<S> + Send + Sync>;

/// Computes the value for a request. This is the expensive part the cache exists to avoid.
pub(crate) type ValueFactory<K, P, V> = Box<dyn Fn(Option<&K>, &P) -> Result<Arc<V>, BoxError> + Send + Sync>;

pub(crate) fn sub_key_strategy<K, P, S, F>(strategy: F) -> SubKeyStrategy<K, P, S>
where
    F: Fn(Option<&K>, &P) -> Option<S> + Send + Sync + 'static,
{
    Box::new(strategy)
}

pub(crate) fn value_factory<K, P, V, E, F>(factory: F) -> ValueFactory<K, P, V>
where
    F: Fn(Option<&K>, &P) -> Result<Arc<V>, E> + Send + Sync + 'static,
    E: Into<BoxError>,
{
    Box::new(move |key: Option<&K>, parameter: &P| factory(key, parameter).map_err(Into::into))
}
