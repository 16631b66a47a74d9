// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Demonstrates caching generated types per loader and interface list.
//!
//! Each loader owns the types generated for it. Requests for the same interfaces, in the same
//! order, through the same loader share one generated type, even when they arrive concurrently.
//! Dropping the loader releases everything that was generated for it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use weak_cache::{CompositeKey, Tracked, WeakCache, sub_key};

/// An interface, identified by its allocation rather than its name.
#[derive(Debug)]
struct Interface {
    name: &'static str,
}

/// A type generated to implement a list of interfaces.
#[derive(Debug)]
struct GeneratedType {
    name: String,
    loader: String,
    interfaces: Vec<&'static str>,
}

#[derive(Debug)]
struct Loader {
    name: &'static str,
}

type TypeCache = WeakCache<Loader, Vec<Arc<Interface>>, CompositeKey<Interface>, GeneratedType>;

fn main() -> Result<(), weak_cache::Error> {
    let counter = Arc::new(AtomicUsize::new(0));
    let generated = Arc::clone(&counter);

    let cache: TypeCache = WeakCache::builder(sub_key::by_identity, move |loader: Option<&Loader>, interfaces: &Vec<Arc<Interface>>| {
        let id = generated.fetch_add(1, Ordering::SeqCst);
        Ok::<_, std::convert::Infallible>(Arc::new(GeneratedType {
            name: format!("$Generated{id}"),
            loader: loader.map_or("<none>", |loader| loader.name).to_string(),
            interfaces: interfaces.iter().map(|interface| interface.name).collect(),
        }))
    })
    .name("generated_types")
    .build();

    let runnable = Arc::new(Interface { name: "Runnable" });
    let closeable = Arc::new(Interface { name: "Closeable" });
    let loader = Tracked::new(Loader { name: "app" });

    // Eight threads ask for the same type at once; it is generated once.
    let barrier = Barrier::new(8);
    let types: Vec<Arc<GeneratedType>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                scope.spawn(|| {
                    barrier.wait();
                    cache.get(Some(&loader), &vec![Arc::clone(&runnable), Arc::clone(&closeable)])
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
            .collect::<Result<_, _>>()
    })?;

    let first = &types[0];
    println!(
        "{} implements {:?} for loader {} (shared by {} callers)",
        first.name,
        first.interfaces,
        first.loader,
        types.iter().filter(|t| Arc::ptr_eq(t, first)).count()
    );

    // Order matters: the reversed list is a different type.
    let reversed = cache.get(Some(&loader), &vec![Arc::clone(&closeable), Arc::clone(&runnable)])?;
    println!("{} implements {:?}", reversed.name, reversed.interfaces);

    // No loader at all shares one bucket.
    let unowned = cache.get(None, &vec![Arc::clone(&runnable)])?;
    println!("{} belongs to loader {}", unowned.name, unowned.loader);

    println!("types generated: {}, cached: {}", counter.load(Ordering::SeqCst), cache.size());

    drop(loader);
    println!("after dropping the loader, cached: {}", cache.size());

    Ok(())
}
