// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Cross-language object bridge runtime.
//!
//! Lets a Rust application transparently create, call, and stream from
//! objects that live in a Python worker process. Callers see typed
//! [`Value`]s, opaque [`Ref`]s to remote objects, and lazy
//! [`RemoteStream`]s — never raw subprocess I/O.
//!
//! The moving parts:
//!
//! - [`Dispatcher`] — builds call/stream/attribute requests and routes
//!   result envelopes back into values or typed errors.
//! - [`SessionManager`] — one serializing actor owning the session table;
//!   owner liveness (RAII [`OwnerGuard`]s) drives cleanup so remote
//!   objects are not leaked when host tasks die.
//! - [`CallbackRegistry`] — host functions the worker can call back into,
//!   keyed by opaque id.
//! - [`Codec`] — registry-aware tagged-JSON codec over the pure wire
//!   layer in `pybridge-wire`.
//!
//! Spawning and multiplexing the worker processes is the [`Transport`]
//! implementor's job; this crate never touches process I/O directly.

pub mod callback;
pub mod codec;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod owner;
pub mod remote_error;
pub mod session;
pub mod stream;
pub mod testing;
pub mod transport;

/// The wire-format layer, re-exported for implementors of [`Transport`].
pub use pybridge_wire as wire;

pub use callback::CallbackRegistry;
pub use codec::Codec;
pub use config::{BridgeConfig, SessionLimits};
pub use dispatch::{CallBuilder, Dispatcher};
pub use error::{BridgeError, Result};
pub use owner::OwnerGuard;
pub use remote_error::{RemoteErrorClass, RemoteErrorRegistry};
pub use session::{CleanupReason, SessionInfo, SessionManager, SessionOptions};
pub use stream::{Driven, RemoteStream, Signal};
pub use transport::Transport;
pub use wire::{
    AtomAllowlist, CallRequest, CallResponse, CallType, Callback, Ref, StreamKind, StreamRef,
    Value,
};
