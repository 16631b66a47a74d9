// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! A concurrent two-level cache that holds its keys and values weakly.
//!
//! [`WeakCache`] maps a `(primary key, sub-key)` coordinate to a value. The primary key is an
//! object owned by the caller, wrapped in [`Tracked`] so that the cache learns when it goes
//! away. The sub-key is derived from the primary key and a request parameter. Values are built
//! by a factory on first request and shared by every later request for the same coordinate.
//!
//! The cache never keeps anything alive on its own:
//!
//! - Entries are expunged once their primary key is dropped.
//! - A value is computed again once the last `Arc` to it is dropped.
//!
//! This makes it a good fit for memoizing derived data that belongs to a longer-lived owner,
//! such as generated types per loader or compiled plans per schema, without the cache becoming
//! the reason those owners stay in memory.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use weak_cache::{Tracked, WeakCache};
//!
//! struct Schema {
//!     name: &'static str,
//! }
//!
//! let plans = WeakCache::<Schema, String, String, String>::new(
//!     |_, query| Some(query.clone()),
//!     |schema, query| Ok::<_, std::io::Error>(Arc::new(format!("{}: plan for {query}", schema.map_or("?", |s| s.name)))),
//! );
//!
//! let schema = Tracked::new(Schema { name: "orders" });
//! let plan = plans.get(Some(&schema), &"select *".to_string())?;
//! assert_eq!(*plan, "orders: plan for select *");
//! assert!(plans.contains_value(&plan));
//! # Ok::<(), weak_cache::Error>(())
//! ```
//!
//! # Single-flight computation
//!
//! Concurrent requests for the same coordinate run the factory once and all receive the same
//! `Arc`. A failing or panicking factory leaves the coordinate empty, so the next request tries
//! again. Requests for different coordinates never wait for each other.
//!
//! # Composite sub-keys
//!
//! When the sub-key is a short list of objects compared by identity, [`sub_key::by_identity`]
//! derives a [`CompositeKey`] that holds those objects weakly.
//!
//! # Logging
//!
//! Cache activity is reported through [`tracing`] events named `cache.event`. Hits, fresh
//! computations and sweeps are logged at debug level, rejected requests at warn level and
//! factory failures at error level.
//!
//! With [`WeakCacheBuilder::metrics`], every event also increments an OpenTelemetry
//! `cache.event.count` counter tagged with `cache.name` and `cache.activity`.

mod builder;
mod cache;
mod error;
mod handle;
mod reverse;
mod slot;
mod strategy;
pub mod sub_key;
mod sweeper;
mod table;
mod telemetry;
mod tracked;

#[cfg(test)]
mod testing;

pub use builder::WeakCacheBuilder;
pub use cache::WeakCache;
pub use error::{BoxError, Error, ErrorKind, Result};
pub use sub_key::CompositeKey;
pub use tracked::Tracked;
