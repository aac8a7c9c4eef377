// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! The host-side value model.
//!
//! [`Value`] covers every host type the bridge can carry: JSON scalars,
//! Python-shaped composites (tuples, sets, non-string-keyed dicts), binary
//! payloads, temporal values, complex numbers, remote handles, and host
//! callables. The tagged-JSON mapping lives in [`crate::tagged`].

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime};

use crate::refs::{Ref, StreamRef};

/// Signature of a host function reachable from the worker.
///
/// Failures are reported as printable reasons; the runtime wraps them into
/// its structured callback-error marker.
pub type CallbackFn = dyn Fn(Vec<Value>) -> std::result::Result<Value, String> + Send + Sync;

/// A host callable crossing the boundary.
///
/// A callback starts out *local* (closure attached, no id). Encoding it
/// registers the closure in the callback registry, which fills in `id` and
/// `address`; only a registered callback has a wire form. Callbacks decoded
/// from the wire carry id/arity/address but no closure.
#[derive(Clone)]
pub struct Callback {
    pub id: Option<String>,
    pub arity: usize,
    /// Address of the host process that registered the callback, so the
    /// worker can route the invocation back to exactly that process.
    pub address: Option<String>,
    func: Option<Arc<CallbackFn>>,
}

impl Callback {
    /// A not-yet-registered host closure with a declared arity.
    pub fn local<F>(arity: usize, func: F) -> Self
    where
        F: Fn(Vec<Value>) -> std::result::Result<Value, String> + Send + Sync + 'static,
    {
        Self { id: None, arity, address: None, func: Some(Arc::new(func)) }
    }

    /// A callback that already has a registry identity (e.g. decoded from
    /// the wire, or returned by the registry after registration).
    pub fn registered(id: impl Into<String>, arity: usize, address: Option<String>) -> Self {
        Self { id: Some(id.into()), arity, address, func: None }
    }

    pub fn is_registered(&self) -> bool {
        self.id.is_some()
    }

    pub fn func(&self) -> Option<Arc<CallbackFn>> {
        self.func.clone()
    }

    /// The same callback with a registry identity attached.
    pub fn with_identity(&self, id: impl Into<String>, address: Option<String>) -> Self {
        Self {
            id: Some(id.into()),
            arity: self.arity,
            address,
            func: self.func.clone(),
        }
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback")
            .field("id", &self.id)
            .field("arity", &self.arity)
            .field("address", &self.address)
            .field("local", &self.func.is_some())
            .finish()
    }
}

impl PartialEq for Callback {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.arity == other.arity && self.address == other.address
    }
}

/// Any host value the bridge can carry.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    /// Finite, infinite, and NaN floats are all representable; the codec
    /// tags the non-finite ones.
    Float(f64),
    Str(String),
    /// A symbolic constant (worker-side: an interned symbol; host-side: a
    /// name). Decoding is gated by the atom allowlist.
    Atom(String),
    List(Vec<Value>),
    Tuple(Vec<Value>),
    /// Canonically ordered; build via [`Value::set`] so equality is
    /// order-insensitive.
    Set(Vec<Value>),
    FrozenSet(Vec<Value>),
    /// Generic binary data. Valid UTF-8 passes through the wire as a plain
    /// string; anything else is base64-tagged.
    Binary(Vec<u8>),
    /// Explicit always-bytes wrapper: base64-tagged even when the payload
    /// happens to be valid UTF-8.
    Bytes(Vec<u8>),
    /// Insertion-ordered key/value pairs. String- and atom-keyed maps
    /// collapse to plain JSON objects on the wire; anything else rides the
    /// explicit pair-list tag.
    Map(Vec<(Value, Value)>),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(DateTime<FixedOffset>),
    Complex { re: f64, im: f64 },
    Ref(Ref),
    Stream(StreamRef),
    Callback(Callback),
    /// A host value with no wire mapping (raw OS handle, opaque execution
    /// handle, unregistered composite). Encoding one is a serialization
    /// error naming `type_name`.
    Opaque { type_name: String },
}

impl Value {
    /// Builds a canonical set: elements sorted by (tag, rendering) and
    /// deduplicated, so `Set` equality is order-insensitive.
    pub fn set(elements: Vec<Value>) -> Value {
        Value::Set(canonicalize(elements))
    }

    pub fn frozen_set(elements: Vec<Value>) -> Value {
        Value::FrozenSet(canonicalize(elements))
    }

    pub fn atom(name: impl Into<String>) -> Value {
        Value::Atom(name.into())
    }

    pub fn str(s: impl Into<String>) -> Value {
        Value::Str(s.into())
    }

    pub fn tuple(elements: Vec<Value>) -> Value {
        Value::Tuple(elements)
    }

    pub fn map(pairs: Vec<(Value, Value)>) -> Value {
        Value::Map(pairs)
    }

    /// Human-readable type name, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Atom(_) => "atom",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Set(_) => "set",
            Value::FrozenSet(_) => "frozenset",
            Value::Binary(_) => "binary",
            Value::Bytes(_) => "bytes",
            Value::Map(_) => "map",
            Value::Date(_) => "date",
            Value::Time(_) => "time",
            Value::DateTime(_) => "datetime",
            Value::Complex { .. } => "complex",
            Value::Ref(_) => "ref",
            Value::Stream(_) => "stream_ref",
            Value::Callback(_) => "callback",
            Value::Opaque { .. } => "opaque",
        }
    }

    /// Stable sort key for set canonicalization: type name first, textual
    /// rendering second. Matches what the worker emits for sorted sets.
    fn sort_key(&self) -> (&'static str, String) {
        (self.type_name(), self.render())
    }

    fn render(&self) -> String {
        match self {
            Value::Null => "null".into(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Str(s) | Value::Atom(s) => s.clone(),
            Value::List(items) | Value::Tuple(items) | Value::Set(items) | Value::FrozenSet(items) => {
                let inner: Vec<String> = items.iter().map(Value::render).collect();
                format!("[{}]", inner.join(","))
            }
            Value::Binary(b) | Value::Bytes(b) => format!("{b:?}"),
            Value::Map(pairs) => {
                let inner: Vec<String> =
                    pairs.iter().map(|(k, v)| format!("{}:{}", k.render(), v.render())).collect();
                format!("{{{}}}", inner.join(","))
            }
            Value::Date(d) => d.to_string(),
            Value::Time(t) => t.to_string(),
            Value::DateTime(dt) => dt.to_rfc3339(),
            Value::Complex { re, im } => format!("{re}+{im}j"),
            Value::Ref(r) => r.id.clone(),
            Value::Stream(s) => s.reference.id.clone(),
            Value::Callback(c) => c.id.clone().unwrap_or_default(),
            Value::Opaque { type_name } => type_name.clone(),
        }
    }
}

pub(crate) fn canonicalize(mut elements: Vec<Value>) -> Vec<Value> {
    elements.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    elements.dedup_by(|a, b| a == b);
    elements
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        use Value::*;
        match (self, other) {
            (Null, Null) => true,
            (Bool(a), Bool(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (Float(a), Float(b)) => a == b,
            (Str(a), Str(b)) => a == b,
            (Atom(a), Atom(b)) => a == b,
            (List(a), List(b)) => a == b,
            (Tuple(a), Tuple(b)) => a == b,
            (Set(a), Set(b)) => a == b,
            (FrozenSet(a), FrozenSet(b)) => a == b,
            // Binary content is what crosses the wire; the always-bytes
            // wrapper is an encode-side marker, so the two compare by
            // payload.
            (Binary(a) | Bytes(a), Binary(b) | Bytes(b)) => a == b,
            (Map(a), Map(b)) => a == b,
            (Date(a), Date(b)) => a == b,
            (Time(a), Time(b)) => a == b,
            (DateTime(a), DateTime(b)) => a == b,
            (Complex { re: ar, im: ai }, Complex { re: br, im: bi }) => ar == br && ai == bi,
            (Ref(a), Ref(b)) => a == b,
            (Stream(a), Stream(b)) => a == b,
            (Callback(a), Callback(b)) => a == b,
            (Opaque { type_name: a }, Opaque { type_name: b }) => a == b,
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}
