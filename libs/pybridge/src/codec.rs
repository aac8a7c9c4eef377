// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Registry-aware codec.
//!
//! Wraps the pure tagged-JSON layer from `pybridge-wire` with the two
//! runtime behaviors the wire crate cannot have: callables are registered
//! in the callback registry on encode (filling in id and address), and
//! refs found while decoding are opportunistically recorded in the session
//! manager. Ref tracking is best-effort here — decode never fails because
//! no manager is attached.

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::Value as Json;

use crate::callback::CallbackRegistry;
use crate::error::{BridgeError, Result};
use crate::session::SessionManager;
use pybridge_wire::{decode_value, encode_value, AtomAllowlist, Value};

#[derive(Clone)]
struct CallbackContext {
    registry: CallbackRegistry,
    session_id: String,
}

#[derive(Clone)]
pub struct Codec {
    allowlist: AtomAllowlist,
    sessions: Option<SessionManager>,
    callbacks: Option<CallbackContext>,
}

impl Codec {
    pub fn new(allowlist: AtomAllowlist) -> Self {
        Self { allowlist, sessions: None, callbacks: None }
    }

    pub fn with_sessions(mut self, sessions: SessionManager) -> Self {
        self.sessions = Some(sessions);
        self
    }

    pub fn with_callbacks(
        mut self,
        registry: CallbackRegistry,
        session_id: impl Into<String>,
    ) -> Self {
        self.callbacks = Some(CallbackContext {
            registry,
            session_id: session_id.into(),
        });
        self
    }

    pub fn allowlist(&self) -> &AtomAllowlist {
        &self.allowlist
    }

    /// Encodes a host value, registering any not-yet-registered callables
    /// first so their wire tags carry a live id.
    pub async fn encode(&self, value: &Value) -> Result<Json> {
        if contains_local_callback(value) {
            let ctx = self.callbacks.as_ref().ok_or_else(|| {
                BridgeError::Serialization(
                    "callable value encountered but no callback registry is attached".into(),
                )
            })?;
            let resolved = resolve_callbacks(value, ctx).await?;
            return encode_value(&resolved).map_err(Into::into);
        }
        encode_value(value).map_err(Into::into)
    }

    /// Decodes a wire value and best-effort records any refs it carries.
    pub fn decode(&self, wire: &Json) -> Result<Value> {
        let value = decode_value(wire, &self.allowlist)?;
        if let Some(sessions) = &self.sessions {
            track_refs(&value, sessions);
        }
        Ok(value)
    }
}

fn contains_local_callback(value: &Value) -> bool {
    match value {
        Value::Callback(cb) => !cb.is_registered(),
        Value::List(items)
        | Value::Tuple(items)
        | Value::Set(items)
        | Value::FrozenSet(items) => items.iter().any(contains_local_callback),
        Value::Map(pairs) => pairs
            .iter()
            .any(|(k, v)| contains_local_callback(k) || contains_local_callback(v)),
        _ => false,
    }
}

fn resolve_callbacks<'a>(
    value: &'a Value,
    ctx: &'a CallbackContext,
) -> BoxFuture<'a, Result<Value>> {
    async move {
        match value {
            Value::Callback(cb) if !cb.is_registered() => {
                let registered = ctx.registry.register(&ctx.session_id, cb.clone()).await?;
                Ok(Value::Callback(registered))
            }
            Value::List(items) => Ok(Value::List(resolve_all(items, ctx).await?)),
            Value::Tuple(items) => Ok(Value::Tuple(resolve_all(items, ctx).await?)),
            Value::Set(items) => Ok(Value::Set(resolve_all(items, ctx).await?)),
            Value::FrozenSet(items) => Ok(Value::FrozenSet(resolve_all(items, ctx).await?)),
            Value::Map(pairs) => {
                let mut resolved = Vec::with_capacity(pairs.len());
                for (k, v) in pairs {
                    resolved.push((
                        resolve_callbacks(k, ctx).await?,
                        resolve_callbacks(v, ctx).await?,
                    ));
                }
                Ok(Value::Map(resolved))
            }
            other => Ok(other.clone()),
        }
    }
    .boxed()
}

async fn resolve_all(items: &[Value], ctx: &CallbackContext) -> Result<Vec<Value>> {
    let mut resolved = Vec::with_capacity(items.len());
    for item in items {
        resolved.push(resolve_callbacks(item, ctx).await?);
    }
    Ok(resolved)
}

fn track_refs(value: &Value, sessions: &SessionManager) {
    match value {
        Value::Ref(r) => sessions.register_ref_best_effort(r),
        Value::Stream(s) => sessions.register_ref_best_effort(&s.reference),
        Value::List(items)
        | Value::Tuple(items)
        | Value::Set(items)
        | Value::FrozenSet(items) => {
            for item in items {
                track_refs(item, sessions);
            }
        }
        Value::Map(pairs) => {
            for (k, v) in pairs {
                track_refs(k, sessions);
                track_refs(v, sessions);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::session::SessionOptions;
    use crate::testing::MockTransport;
    use pybridge_wire::Callback;

    #[tokio::test]
    async fn test_decode_without_manager_is_fine() {
        let codec = Codec::new(AtomAllowlist::Minimal);
        let wire = serde_json::json!({
            "__type__": "ref", "__schema__": 1, "id": "obj_1", "session_id": "s1"
        });
        let value = codec.decode(&wire).unwrap();
        assert!(matches!(value, Value::Ref(_)));
    }

    #[tokio::test]
    async fn test_decode_registers_refs_when_manager_attached() {
        let transport = MockTransport::new();
        let sessions = SessionManager::spawn(Arc::new(transport));
        sessions.create_session("s1", SessionOptions::default()).await.unwrap();

        let codec = Codec::new(AtomAllowlist::Minimal).with_sessions(sessions.clone());
        let wire = serde_json::json!([
            {"__type__": "ref", "__schema__": 1, "id": "obj_1", "session_id": "s1"},
            {"__type__": "ref", "__schema__": 1, "id": "obj_2", "session_id": "s1"}
        ]);
        codec.decode(&wire).unwrap();

        tokio::task::yield_now().await;
        let snapshot = sessions.snapshot().await.unwrap();
        assert_eq!(snapshot[0].refs, 2);
    }

    #[tokio::test]
    async fn test_encode_registers_local_callbacks() {
        let transport = MockTransport::new();
        let registry = CallbackRegistry::spawn(Arc::new(transport), Some("host:1".into()));
        let codec = Codec::new(AtomAllowlist::Minimal).with_callbacks(registry.clone(), "s1");

        let value = Value::Tuple(vec![
            Value::Int(1),
            Value::Callback(Callback::local(1, |args| Ok(args[0].clone()))),
        ]);
        let wire = codec.encode(&value).await.unwrap();
        assert_eq!(registry.len().await.unwrap(), 1);
        assert!(wire["elements"][1]["callback_id"].is_string());
    }

    #[tokio::test]
    async fn test_encode_callback_without_registry_fails() {
        let codec = Codec::new(AtomAllowlist::Minimal);
        let value = Value::Callback(Callback::local(0, |_| Ok(Value::Null)));
        let err = codec.encode(&value).await.unwrap_err();
        assert!(matches!(err, BridgeError::Serialization(_)));
    }
}
