// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::remote_error::RemoteErrorClass;

#[derive(Error, Debug)]
pub enum BridgeError {
    /// Local-only: the value cannot be expressed on the wire. Never sent.
    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("malformed wire value: {0}")]
    Decode(String),

    /// The worker no longer knows the ref: released, expired, or evicted.
    #[error("remote object not found: {0}")]
    RefNotFound(String),

    /// A ref was used outside the session that created it. Both ids are
    /// carried because this is a programming error the caller must locate.
    #[error("ref belongs to session `{ref_session}` but was used in session `{current_session}`")]
    SessionMismatch {
        ref_session: String,
        current_session: String,
    },

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session `{session_id}` exceeded its reference limit of {max_refs}")]
    RefLimitExceeded { session_id: String, max_refs: usize },

    #[error("callback not found: {0}")]
    CallbackNotFound(String),

    #[error("callback arity mismatch: expected {expected}, got {got}")]
    ArityMismatch { expected: usize, got: usize },

    /// The host callback itself failed (error return or panic), captured
    /// as data so it never unwinds through the registry.
    #[error("callback failed: {0}")]
    CallbackFailed(String),

    /// An error reported by the worker, keyed by its remote class.
    #[error("{class}: {message}")]
    Remote {
        class: Arc<RemoteErrorClass>,
        message: String,
    },

    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("operation not supported: {0}")]
    NotSupported(String),

    #[error("runtime error: {0}")]
    Runtime(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<pybridge_wire::WireError> for BridgeError {
    fn from(err: pybridge_wire::WireError) -> Self {
        match err {
            pybridge_wire::WireError::Serialization(msg) => BridgeError::Serialization(msg),
            pybridge_wire::WireError::Decode(msg) => BridgeError::Decode(msg),
        }
    }
}

impl BridgeError {
    /// Remote class name, when this error came from the worker.
    pub fn remote_class(&self) -> Option<&str> {
        match self {
            BridgeError::Remote { class, .. } => Some(&class.name),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
