// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Scriptable transport double for tests.
//!
//! Responses come from an explicit queue first, then a handler closure,
//! then a null success. Every request is recorded so tests can assert on
//! call counts and payload shapes.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{BridgeError, Result};
use crate::transport::Transport;
use pybridge_wire::{CallRequest, CallResponse};

type Handler = dyn Fn(&CallRequest) -> CallResponse + Send + Sync;

#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<MockState>,
}

#[derive(Default)]
struct MockState {
    handler: Mutex<Option<Box<Handler>>>,
    queued: Mutex<VecDeque<CallResponse>>,
    calls: Mutex<Vec<CallRequest>>,
    released: Mutex<Vec<String>>,
    exposed: Mutex<Vec<String>>,
    release_error: Mutex<Option<String>>,
    delay: Mutex<Option<Duration>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a handler invoked for every call not covered by the queue.
    pub fn respond_with<F>(self, handler: F) -> Self
    where
        F: Fn(&CallRequest) -> CallResponse + Send + Sync + 'static,
    {
        *self.inner.handler.lock() = Some(Box::new(handler));
        self
    }

    /// Queues one response, consumed before the handler is consulted.
    pub fn push_response(&self, response: CallResponse) {
        self.inner.queued.lock().push_back(response);
    }

    /// Makes every call sleep first, for timeout tests.
    pub fn set_delay(&self, delay: Duration) {
        *self.inner.delay.lock() = Some(delay);
    }

    /// Makes `release_session` fail, for teardown-telemetry tests.
    pub fn fail_release_with(&self, message: impl Into<String>) {
        *self.inner.release_error.lock() = Some(message.into());
    }

    pub fn calls(&self) -> Vec<CallRequest> {
        self.inner.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.inner.calls.lock().len()
    }

    pub fn released_sessions(&self) -> Vec<String> {
        self.inner.released.lock().clone()
    }

    pub fn exposed_sessions(&self) -> Vec<String> {
        self.inner.exposed.lock().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn call(&self, request: CallRequest) -> Result<CallResponse> {
        let delay = *self.inner.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.calls.lock().push(request.clone());
        if let Some(response) = self.inner.queued.lock().pop_front() {
            return Ok(response);
        }
        if let Some(handler) = self.inner.handler.lock().as_ref() {
            return Ok(handler(&request));
        }
        Ok(CallResponse::ok(serde_json::Value::Null))
    }

    async fn release_session(&self, session_id: &str) -> Result<()> {
        if let Some(message) = self.inner.release_error.lock().clone() {
            return Err(BridgeError::Transport(message));
        }
        self.inner.released.lock().push(session_id.to_string());
        Ok(())
    }

    async fn expose_callback_tool(&self, session_id: &str) -> Result<()> {
        self.inner.exposed.lock().push(session_id.to_string());
        Ok(())
    }
}
