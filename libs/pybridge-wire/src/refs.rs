// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Opaque handles to objects living in a worker process.
//!
//! A [`Ref`] is only meaningful inside the session that created it; the
//! runtime enforces that before building a request. Wire conversion is
//! here because the handle *is* its wire identity — everything else about
//! the remote object stays remote.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value as Json};

use crate::error::WireError;
use crate::tagged::SCHEMA_VERSION;

/// Handle to a remote object, scoped to the session that created it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ref {
    pub id: String,
    pub session_id: String,
    /// Module the remote object's type lives in, when the worker reported it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub python_module: Option<String>,
    /// Library the call went through, when the worker reported it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library: Option<String>,
    /// Remote type name, when the worker reported it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    /// Pool/worker affinity hint for transports that pin objects to one
    /// worker process.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<String>,
}

impl Ref {
    pub fn new(id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            session_id: session_id.into(),
            python_module: None,
            library: None,
            type_name: None,
            worker: None,
        }
    }

    pub fn to_wire(&self) -> Json {
        let mut obj = json!({
            "__type__": "ref",
            "__schema__": SCHEMA_VERSION,
            "id": self.id,
            "session_id": self.session_id,
        });
        let map = obj.as_object_mut().expect("ref wire form is an object");
        if let Some(m) = &self.python_module {
            map.insert("python_module".into(), Json::String(m.clone()));
        }
        if let Some(l) = &self.library {
            map.insert("library".into(), Json::String(l.clone()));
        }
        if let Some(t) = &self.type_name {
            map.insert("type_name".into(), Json::String(t.clone()));
        }
        if let Some(w) = &self.worker {
            map.insert("worker".into(), Json::String(w.clone()));
        }
        obj
    }

    /// Rejects wire forms missing either identity field; everything else is
    /// optional and tolerated when absent.
    pub fn from_wire(value: &Json) -> Result<Self, WireError> {
        let obj = value
            .as_object()
            .ok_or_else(|| WireError::Decode("ref wire form must be an object".into()))?;
        let id = field_str(obj, "id")
            .ok_or_else(|| WireError::Decode("ref wire form missing required field `id`".into()))?;
        let session_id = field_str(obj, "session_id").ok_or_else(|| {
            WireError::Decode("ref wire form missing required field `session_id`".into())
        })?;
        Ok(Self {
            id,
            session_id,
            python_module: field_str(obj, "python_module"),
            library: field_str(obj, "library"),
            type_name: field_str(obj, "type_name"),
            worker: field_str(obj, "worker"),
        })
    }
}

/// What kind of remote iteration a [`StreamRef`] stands for.
///
/// Iterators over materialized sequences can report a length; generators
/// are open-ended, so counting them is unsupported by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Iterator,
    Generator,
}

impl StreamKind {
    pub fn is_counted(self) -> bool {
        matches!(self, StreamKind::Iterator)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StreamKind::Iterator => "iterator",
            StreamKind::Generator => "generator",
        }
    }

    pub fn parse(s: &str) -> Result<Self, WireError> {
        match s {
            "iterator" => Ok(StreamKind::Iterator),
            "generator" => Ok(StreamKind::Generator),
            other => Err(WireError::Decode(format!("unknown stream_type `{other}`"))),
        }
    }
}

/// A [`Ref`] specialized for an open remote iterator or generator.
///
/// The record itself is immutable; the sticky `exhausted` state lives in
/// the runtime's stream driver, which owns the traversal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamRef {
    #[serde(flatten)]
    pub reference: Ref,
    #[serde(rename = "stream_type")]
    pub kind: StreamKind,
}

impl StreamRef {
    pub fn new(reference: Ref, kind: StreamKind) -> Self {
        Self { reference, kind }
    }

    pub fn to_wire(&self) -> Json {
        let mut obj = self.reference.to_wire();
        let map = obj.as_object_mut().expect("ref wire form is an object");
        map.insert("__type__".into(), Json::String("stream_ref".into()));
        map.insert("stream_type".into(), Json::String(self.kind.as_str().into()));
        obj
    }

    pub fn from_wire(value: &Json) -> Result<Self, WireError> {
        let reference = Ref::from_wire(value)?;
        let kind = value
            .get("stream_type")
            .and_then(Json::as_str)
            .map(StreamKind::parse)
            .transpose()?
            // Older peers emitted stream refs without the kind; an
            // unknown-length generator is the safe reading.
            .unwrap_or(StreamKind::Generator);
        Ok(Self { reference, kind })
    }
}

fn field_str(obj: &serde_json::Map<String, Json>, key: &str) -> Option<String> {
    obj.get(key).and_then(Json::as_str).map(str::to_string)
}
