// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Wire-format types shared between the host runtime and anything that
//! speaks the bridge protocol.
//!
//! Everything here is pure data: the host [`Value`] model, the tagged-JSON
//! codec ([`encode_value`] / [`decode_value`]), remote-object handles
//! ([`Ref`] / [`StreamRef`]), and the serde payload structs for call
//! requests, responses, and callback invocations. No registries, no I/O —
//! the runtime crate layers session and callback bookkeeping on top.

pub mod error;
pub mod payload;
pub mod refs;
pub mod tagged;
pub mod value;

pub use error::WireError;
pub use payload::{CallRequest, CallResponse, CallType, CallbackInvocation, RequestMetadata};
pub use refs::{Ref, StreamKind, StreamRef};
pub use tagged::{decode_value, encode_value, AtomAllowlist, SCHEMA_VERSION};
pub use value::{Callback, Value};
