// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Registry of remote error classes.
//!
//! The worker reports failures by class name (`ZeroDivisionError`,
//! `ModuleNotFoundError`, ...). Each name is interned into a cached
//! [`RemoteErrorClass`] on first sight, so equal classes share one record
//! and telemetry can count per-class occurrences without allocating per
//! failure.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

/// One remote error class, created lazily and cached forever.
#[derive(Debug)]
pub struct RemoteErrorClass {
    pub name: String,
    occurrences: AtomicU64,
}

impl RemoteErrorClass {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            occurrences: AtomicU64::new(0),
        }
    }

    /// How many times this class has been resolved.
    pub fn occurrences(&self) -> u64 {
        self.occurrences.load(Ordering::Relaxed)
    }
}

impl fmt::Display for RemoteErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[derive(Clone, Default)]
pub struct RemoteErrorRegistry {
    classes: Arc<RwLock<HashMap<String, Arc<RemoteErrorClass>>>>,
}

impl RemoteErrorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached class record, creating it on first sight.
    pub fn resolve(&self, name: &str) -> Arc<RemoteErrorClass> {
        if let Some(class) = self.classes.read().get(name) {
            class.occurrences.fetch_add(1, Ordering::Relaxed);
            return Arc::clone(class);
        }
        let mut classes = self.classes.write();
        let class = classes
            .entry(name.to_string())
            .or_insert_with(|| {
                tracing::debug!(class = name, "first sighting of remote error class");
                Arc::new(RemoteErrorClass::new(name))
            });
        class.occurrences.fetch_add(1, Ordering::Relaxed);
        Arc::clone(class)
    }

    pub fn known_classes(&self) -> Vec<String> {
        self.classes.read().keys().cloned().collect()
    }
}
