// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Request/response payloads exchanged with the worker.
//!
//! Args and results are carried as already-encoded tagged JSON
//! (`serde_json::Value`); the codec in [`crate::tagged`] produces and
//! consumes them. These structs only pin the envelope shape.

use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as Json};

/// How the worker should interpret a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallType {
    /// Instantiate a class; the result is a ref.
    Class,
    /// Invoke a method on the `instance` ref.
    Method,
    GetAttr,
    SetAttr,
}

/// Out-of-band request fields that ride alongside the call itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMetadata {
    /// Joins host and worker telemetry for one logical call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl RequestMetadata {
    pub fn is_empty(&self) -> bool {
        self.correlation_id.is_none()
    }
}

/// A call sent to the worker. Field names are wire-normative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRequest {
    pub library: String,
    pub python_module: String,
    pub function: String,
    pub args: Vec<Json>,
    pub kwargs: JsonMap<String, Json>,
    /// Safe for the transport to retry on another worker.
    pub idempotent: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_type: Option<CallType>,
    /// Ref wire form of the receiving instance for `method`/attr calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<Json>,
    #[serde(rename = "class", default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attr: Option<String>,
    #[serde(default, skip_serializing_if = "RequestMetadata::is_empty")]
    pub metadata: RequestMetadata,
}

impl CallRequest {
    pub fn new(
        library: impl Into<String>,
        python_module: impl Into<String>,
        function: impl Into<String>,
    ) -> Self {
        Self {
            library: library.into(),
            python_module: python_module.into(),
            function: function.into(),
            args: Vec::new(),
            kwargs: JsonMap::new(),
            idempotent: false,
            call_type: None,
            instance: None,
            class_name: None,
            attr: None,
            metadata: RequestMetadata::default(),
        }
    }
}

/// The worker's result envelope: either a tagged result or a printable
/// error with its remote class name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Json>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
}

impl CallResponse {
    pub fn ok(result: Json) -> Self {
        Self { success: true, result: Some(result), error: None, error_type: None }
    }

    pub fn err(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(message.into()),
            error_type: Some(error_type.into()),
        }
    }
}

/// Worker -> host callback invocation payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackInvocation {
    pub callback_id: String,
    #[serde(default)]
    pub args: Vec<Json>,
}
