// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Per-coordinate slots and the single-flight computation token.

use std::fmt::{self, Debug};
use std::hash::Hash;
use std::ptr;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{BoxError, Error, Result};
use crate::handle::ValueHandle;
use crate::reverse::ReverseIndex;
use crate::table::SubMap;

/// The state of one `(primary key, sub-key)` coordinate. An absent slot means "empty".
pub(crate) enum Slot<V> {
    /// A computation is in flight.
    Pending(Arc<Pending>),
    /// A computed value, held weakly.
    Ready(ValueHandle<V>),
}

impl<V> Slot<V> {
    /// Returns `true` if `other` is the very slot that was observed as `self`.
    pub(crate) fn is_same(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Pending(a), Self::Pending(b)) => Arc::ptr_eq(a, b),
            (Self::Ready(a), Self::Ready(b)) => a.is_same_handle(b),
            _ => false,
        }
    }

    pub(crate) fn is_token(&self, token: &Pending) -> bool {
        matches!(self, Self::Pending(pending) if ptr::eq(Arc::as_ptr(pending), token))
    }
}

impl<V> Clone for Slot<V> {
    fn clone(&self) -> Self {
        match self {
            Self::Pending(pending) => Self::Pending(Arc::clone(pending)),
            Self::Ready(handle) => Self::Ready(handle.clone()),
        }
    }
}

impl<V> Debug for Slot<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending(_) => f.write_str("Pending"),
            Self::Ready(handle) => f.debug_tuple("Ready").field(handle).finish(),
        }
    }
}

/// A token for one round of computation at one coordinate.
///
/// Whoever finds the token installed in a slot may run it. Runs of the same token are serialized,
/// and only a run that still finds the token installed invokes the value factory. Every other run
/// reports that the caller has to re-read the slot.
#[derive(Default)]
pub(crate) struct Pending {
    running: Mutex<()>,
}

impl Pending {
    pub(crate) fn new() -> Arc<Self> {
        Arc::default()
    }

    /// Runs the computation for this token.
    ///
    /// Returns `Ok(None)` when the token is no longer installed at `sub_key`, in which case the
    /// caller must re-read the slot and try again.
    ///
    /// # Panics
    ///
    /// Panics if the slot changed while this token owned it, which would mean that two rounds of
    /// computation ran for the same coordinate.
    pub(crate) fn run<S, V, F>(&self, sub_map: &SubMap<S, V>, sub_key: &S, reverse: &ReverseIndex<V>, compute: F) -> Result<Option<Arc<V>>>
    where
        S: Hash + Eq,
        F: FnOnce() -> std::result::Result<Arc<V>, BoxError>,
    {
        let _running = self.running.lock();

        if !sub_map.holds_token(sub_key, self) {
            return Ok(None);
        }

        let revert = RevertGuard {
            sub_map,
            sub_key,
            token: self,
            armed: true,
        };
        let value = compute().map_err(Error::computation)?;
        revert.disarm();

        let handle = reverse.intern(ValueHandle::new(&value));
        let installed = sub_map.complete(sub_key, self, Slot::Ready(handle));
        if !installed {
            tracing::error!(cache.activity = "cache.invariant_violated", "pending slot was replaced while its computation ran");
        }
        assert!(installed, "pending slot was replaced while its computation ran");

        Ok(Some(value))
    }
}

impl Debug for Pending {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pending").field("running", &self.running.is_locked()).finish()
    }
}

/// Empties the slot again unless the computation completes, so that a failed or panicking
/// factory never leaves a stale token behind.
struct RevertGuard<'a, S: Hash + Eq, V> {
    sub_map: &'a SubMap<S, V>,
    sub_key: &'a S,
    token: &'a Pending,
    armed: bool,
}

impl<S: Hash + Eq, V> RevertGuard<'_, S, V> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl<S: Hash + Eq, V> Drop for RevertGuard<'_, S, V> {
    fn drop(&mut self) {
        if self.armed {
            self.sub_map.abandon(self.sub_key, self.token);
        }
    }
}
