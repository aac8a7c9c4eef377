// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! The boundary to the process-pool/transport layer.
//!
//! Spawning workers, multiplexing them, and moving bytes is someone
//! else's job; the runtime only needs these three operations. Timeouts
//! are applied by the dispatcher, so implementations may block for as
//! long as the remote side takes.

use async_trait::async_trait;

use crate::error::Result;
use pybridge_wire::{CallRequest, CallResponse};

#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends one call and waits for its result envelope.
    async fn call(&self, request: CallRequest) -> Result<CallResponse>;

    /// Asks the worker side to drop every object owned by the session.
    /// Invoked fire-and-forget during teardown; failures are telemetry,
    /// not control flow.
    async fn release_session(&self, session_id: &str) -> Result<()>;

    /// Registers the host's callback entry point for the session so the
    /// worker can call back in. Must be idempotent: reporting
    /// already-registered is success.
    async fn expose_callback_tool(&self, session_id: &str) -> Result<()>;
}
