// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Callback registry: host functions reachable from the worker.
//!
//! Same single-serializing-actor shape as the session manager. The actor
//! only owns the table; the host function itself is applied *outside* the
//! actor (and panic-caught), so a slow or exploding callback can never
//! stall or kill the registry.

use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::{json, Value as Json};
use tokio::sync::{mpsc, oneshot};

use crate::codec::Codec;
use crate::error::{BridgeError, Result};
use crate::owner::OwnerGuard;
use crate::transport::Transport;
use pybridge_wire::value::CallbackFn;
use pybridge_wire::{Callback, CallbackInvocation, Value, SCHEMA_VERSION};

pub(crate) enum Command {
    Insert {
        id: String,
        func: Arc<CallbackFn>,
        arity: usize,
        owner_id: Option<String>,
        reply: oneshot::Sender<()>,
    },
    Resolve {
        id: String,
        reply: oneshot::Sender<Option<Resolved>>,
    },
    Unregister {
        id: String,
        reply: oneshot::Sender<bool>,
    },
    OwnerDown {
        owner_id: String,
    },
    /// Marks the session's invoke entry point as exposed; replies whether
    /// this was the first time.
    MarkExposed {
        session_id: String,
        reply: oneshot::Sender<bool>,
    },
    UnmarkExposed {
        session_id: String,
    },
    Count {
        reply: oneshot::Sender<usize>,
    },
}

#[derive(Clone)]
pub(crate) struct Resolved {
    func: Arc<CallbackFn>,
    arity: usize,
}

struct Entry {
    func: Arc<CallbackFn>,
    arity: usize,
    owner_id: Option<String>,
}

/// Cloneable handle to the callback actor.
#[derive(Clone)]
pub struct CallbackRegistry {
    tx: mpsc::UnboundedSender<Command>,
    transport: Arc<dyn Transport>,
    /// Address of this host process, stamped into callback tags so the
    /// worker routes invocations back to exactly this process.
    address: Option<String>,
}

impl CallbackRegistry {
    pub fn spawn(transport: Arc<dyn Transport>, address: Option<String>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(rx));
        Self { tx, transport, address }
    }

    /// Registers a local callback under `session_id` and returns its
    /// registered form (id and address filled in). Ensures the session's
    /// remote invoke entry point is exposed exactly once.
    pub async fn register(&self, session_id: &str, callback: Callback) -> Result<Callback> {
        self.register_owned(session_id, callback, None).await
    }

    /// Like [`register`](Self::register), with the entry's lifetime tied
    /// to an owner: when the owner terminates, the entry is removed.
    pub async fn register_owned(
        &self,
        session_id: &str,
        callback: Callback,
        owner: Option<&OwnerGuard>,
    ) -> Result<Callback> {
        let func = callback.func().ok_or_else(|| {
            BridgeError::Serialization("callback carries no host function to register".into())
        })?;
        self.ensure_exposed(session_id).await?;

        let id = format!("cb_{}", cuid2::create_id());
        let (reply, rx) = oneshot::channel();
        self.send(Command::Insert {
            id: id.clone(),
            func,
            arity: callback.arity,
            owner_id: owner.map(|o| o.owner_id().to_string()),
            reply,
        })?;
        rx.await.map_err(|_| unavailable())?;
        tracing::debug!(callback_id = %id, arity = callback.arity, session_id, "callback registered");

        Ok(callback.with_identity(id, self.address.clone()))
    }

    /// Applies the callback. Lookup goes through the actor; application
    /// happens here, panic-caught, so failures come back as data.
    pub async fn invoke(&self, id: &str, args: Vec<Value>) -> Result<Value> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Resolve { id: id.to_string(), reply })?;
        let resolved = rx
            .await
            .map_err(|_| unavailable())?
            .ok_or_else(|| BridgeError::CallbackNotFound(id.to_string()))?;

        if args.len() != resolved.arity {
            return Err(BridgeError::ArityMismatch {
                expected: resolved.arity,
                got: args.len(),
            });
        }

        match catch_unwind(AssertUnwindSafe(|| (resolved.func)(args))) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(reason)) => Err(BridgeError::CallbackFailed(reason)),
            Err(panic) => Err(BridgeError::CallbackFailed(format!(
                "callback panicked: {}",
                panic_message(&panic)
            ))),
        }
    }

    pub async fn unregister(&self, id: &str) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Unregister { id: id.to_string(), reply })?;
        rx.await.map_err(|_| unavailable())
    }

    pub async fn len(&self) -> Result<usize> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Count { reply })?;
        rx.await.map_err(|_| unavailable())
    }

    /// Inbound entry point for the worker's `{"callback_id", "args"}`
    /// payload: decode, invoke, re-encode. Every failure becomes the
    /// `callback_error` marker — nothing is ever thrown back across the
    /// boundary.
    pub async fn handle_invocation(&self, payload: &Json, codec: &Codec) -> Json {
        match self.try_handle(payload, codec).await {
            Ok(encoded) => encoded,
            Err(err) => json!({
                "__type__": "callback_error",
                "__schema__": SCHEMA_VERSION,
                "reason": err.to_string(),
            }),
        }
    }

    async fn try_handle(&self, payload: &Json, codec: &Codec) -> Result<Json> {
        let invocation: CallbackInvocation = serde_json::from_value(payload.clone())
            .map_err(|e| BridgeError::Decode(format!("invalid callback invocation: {e}")))?;
        let args = invocation
            .args
            .iter()
            .map(|arg| codec.decode(arg))
            .collect::<Result<Vec<_>>>()?;
        let result = self.invoke(&invocation.callback_id, args).await?;
        codec.encode(&result).await
    }

    async fn ensure_exposed(&self, session_id: &str) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::MarkExposed { session_id: session_id.to_string(), reply })?;
        let newly = rx.await.map_err(|_| unavailable())?;
        if !newly {
            return Ok(());
        }
        match self.transport.expose_callback_tool(session_id).await {
            Ok(()) => Ok(()),
            // A duplicate registration reported by the remote side is
            // success, not error.
            Err(err) if is_duplicate_registration(&err) => Ok(()),
            Err(err) => {
                let _ = self.tx.send(Command::UnmarkExposed {
                    session_id: session_id.to_string(),
                });
                Err(err)
            }
        }
    }

    pub(crate) fn command_sender(&self) -> mpsc::UnboundedSender<Command> {
        self.tx.clone()
    }

    fn send(&self, command: Command) -> Result<()> {
        self.tx.send(command).map_err(|_| unavailable())
    }
}

fn is_duplicate_registration(err: &BridgeError) -> bool {
    matches!(err.remote_class(), Some("AlreadyRegisteredError" | "already_registered"))
}

fn unavailable() -> BridgeError {
    BridgeError::Runtime("callback registry is not running".into())
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

async fn run(mut rx: mpsc::UnboundedReceiver<Command>) {
    let mut entries: HashMap<String, Entry> = HashMap::new();
    let mut exposed: HashSet<String> = HashSet::new();

    while let Some(command) = rx.recv().await {
        match command {
            Command::Insert { id, func, arity, owner_id, reply } => {
                entries.insert(id, Entry { func, arity, owner_id });
                let _ = reply.send(());
            }
            Command::Resolve { id, reply } => {
                let resolved = entries.get(&id).map(|entry| Resolved {
                    func: Arc::clone(&entry.func),
                    arity: entry.arity,
                });
                let _ = reply.send(resolved);
            }
            Command::Unregister { id, reply } => {
                let existed = entries.remove(&id).is_some();
                if existed {
                    tracing::debug!(callback_id = %id, "callback unregistered");
                }
                let _ = reply.send(existed);
            }
            Command::OwnerDown { owner_id } => {
                let before = entries.len();
                entries.retain(|_, entry| entry.owner_id.as_deref() != Some(owner_id.as_str()));
                let removed = before - entries.len();
                if removed > 0 {
                    tracing::debug!(%owner_id, removed, "callbacks removed with dead owner");
                }
            }
            Command::MarkExposed { session_id, reply } => {
                let _ = reply.send(exposed.insert(session_id));
            }
            Command::UnmarkExposed { session_id } => {
                exposed.remove(&session_id);
            }
            Command::Count { reply } => {
                let _ = reply.send(entries.len());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTransport;

    fn registry() -> (CallbackRegistry, MockTransport) {
        let transport = MockTransport::new();
        (
            CallbackRegistry::spawn(Arc::new(transport.clone()), Some("host:50051".into())),
            transport,
        )
    }

    fn adder() -> Callback {
        Callback::local(2, |args| match (&args[0], &args[1]) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a + b)),
            _ => Err("expected two ints".into()),
        })
    }

    #[tokio::test]
    async fn test_register_fills_identity() {
        let (registry, _transport) = registry();
        let cb = registry.register("s1", adder()).await.unwrap();
        assert!(cb.is_registered());
        assert_eq!(cb.address.as_deref(), Some("host:50051"));
    }

    #[tokio::test]
    async fn test_invoke_applies_function() {
        let (registry, _transport) = registry();
        let cb = registry.register("s1", adder()).await.unwrap();
        let result = registry
            .invoke(cb.id.as_deref().unwrap(), vec![Value::Int(2), Value::Int(3)])
            .await
            .unwrap();
        assert_eq!(result, Value::Int(5));
    }

    #[tokio::test]
    async fn test_arity_mismatch_reports_expected() {
        let (registry, _transport) = registry();
        let cb = registry.register("s1", adder()).await.unwrap();
        let err = registry
            .invoke(cb.id.as_deref().unwrap(), vec![Value::Int(1)])
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::ArityMismatch { expected: 2, got: 1 }));
    }

    #[tokio::test]
    async fn test_unknown_id_is_callback_not_found() {
        let (registry, _transport) = registry();
        let err = registry.invoke("cb_missing", vec![]).await.unwrap_err();
        assert!(matches!(err, BridgeError::CallbackNotFound(_)));
    }

    #[tokio::test]
    async fn test_failing_callback_is_captured() {
        let (registry, _transport) = registry();
        let cb = registry
            .register("s1", Callback::local(0, |_| Err("boom".into())))
            .await
            .unwrap();
        let err = registry.invoke(cb.id.as_deref().unwrap(), vec![]).await.unwrap_err();
        assert!(matches!(err, BridgeError::CallbackFailed(ref r) if r == "boom"));
    }

    #[tokio::test]
    async fn test_panicking_callback_is_captured_and_registry_survives() {
        let (registry, _transport) = registry();
        let boom = registry
            .register("s1", Callback::local(0, |_| panic!("kaboom")))
            .await
            .unwrap();
        let err = registry.invoke(boom.id.as_deref().unwrap(), vec![]).await.unwrap_err();
        assert!(matches!(err, BridgeError::CallbackFailed(ref r) if r.contains("kaboom")));

        // The actor is still serviceable afterwards.
        let cb = registry.register("s1", adder()).await.unwrap();
        let result = registry
            .invoke(cb.id.as_deref().unwrap(), vec![Value::Int(1), Value::Int(1)])
            .await
            .unwrap();
        assert_eq!(result, Value::Int(2));
    }

    #[tokio::test]
    async fn test_entry_point_exposed_once_per_session() {
        let (registry, transport) = registry();
        registry.register("s1", adder()).await.unwrap();
        registry.register("s1", adder()).await.unwrap();
        registry.register("s2", adder()).await.unwrap();
        assert_eq!(transport.exposed_sessions(), vec!["s1".to_string(), "s2".to_string()]);
    }

    #[tokio::test]
    async fn test_unregister_removes_entry() {
        let (registry, _transport) = registry();
        let cb = registry.register("s1", adder()).await.unwrap();
        let id = cb.id.clone().unwrap();
        assert!(registry.unregister(&id).await.unwrap());
        assert!(!registry.unregister(&id).await.unwrap());
        let err = registry.invoke(&id, vec![Value::Int(1), Value::Int(2)]).await.unwrap_err();
        assert!(matches!(err, BridgeError::CallbackNotFound(_)));
    }
}
