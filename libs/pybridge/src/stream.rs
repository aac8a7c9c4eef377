// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Pull-based consumption of remote iterators.
//!
//! One element per pull. The driver protocol has three signals:
//! `Continue` pulls the next element, `Suspend` hands the stream back so
//! the caller can resume later without re-fetching anything consumed, and
//! `Halt` stops without advancing the remote iterator. Exhaustion is
//! sticky: after the remote completion signal, no further remote calls are
//! made for this handle.

use std::time::Duration;

use futures_util::Stream;
use serde_json::json;

use crate::dispatch::Dispatcher;
use crate::error::{BridgeError, Result};
use pybridge_wire::{CallRequest, CallType, Ref, StreamKind, StreamRef, Value};

/// Caller's verdict after each delivered element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Continue,
    Suspend,
    Halt,
}

/// How a [`RemoteStream::drive`] traversal ended.
pub enum Driven {
    /// The remote side signaled completion.
    Completed,
    /// The caller suspended; pulling from the returned stream resumes
    /// exactly where the traversal left off.
    Suspended(RemoteStream),
    /// The caller halted early; the remote iterator was not advanced
    /// further.
    Halted,
}

enum PullMode {
    /// Not yet known whether the remote object is a native iterator.
    Probe,
    Native,
    Indexed { next: i64 },
}

pub struct RemoteStream {
    dispatcher: Dispatcher,
    target: Ref,
    kind: Option<StreamKind>,
    mode: PullMode,
    exhausted: bool,
    timeout: Duration,
}

impl RemoteStream {
    pub(crate) fn from_stream_ref(dispatcher: Dispatcher, stream: StreamRef) -> Self {
        let timeout = dispatcher.stream_timeout();
        Self {
            dispatcher,
            target: stream.reference,
            kind: Some(stream.kind),
            mode: PullMode::Native,
            exhausted: false,
            timeout,
        }
    }

    pub(crate) fn from_ref(dispatcher: Dispatcher, reference: Ref) -> Self {
        let timeout = dispatcher.stream_timeout();
        Self {
            dispatcher,
            target: reference,
            kind: None,
            mode: PullMode::Probe,
            exhausted: false,
            timeout,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Per-pull timeout override.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Requests exactly one element. `Ok(None)` means the traversal
    /// completed; once that happens every further call answers locally.
    pub async fn next(&mut self) -> Result<Option<Value>> {
        if self.exhausted {
            return Ok(None);
        }
        let pulled = match self.mode {
            PullMode::Native => self.pull_native().await,
            PullMode::Indexed { next } => self.pull_indexed(next).await,
            PullMode::Probe => match self.pull_native().await {
                Err(err) if is_not_an_iterator(&err) => {
                    self.mode = PullMode::Indexed { next: 0 };
                    self.pull_indexed(0).await
                }
                other => {
                    if other.is_ok() {
                        self.mode = PullMode::Native;
                    }
                    other
                }
            },
        };
        match pulled {
            Ok(Some(value)) => {
                if let PullMode::Indexed { next } = &mut self.mode {
                    *next += 1;
                }
                Ok(Some(value))
            }
            Ok(None) => {
                self.exhausted = true;
                tracing::debug!(ref_id = %self.target.id, "remote stream exhausted");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Runs the pull loop, consulting `verdict` after each element.
    pub async fn drive<F>(mut self, mut verdict: F) -> Result<Driven>
    where
        F: FnMut(Value) -> Signal,
    {
        loop {
            match self.next().await? {
                None => return Ok(Driven::Completed),
                Some(value) => match verdict(value) {
                    Signal::Continue => {}
                    Signal::Suspend => return Ok(Driven::Suspended(self)),
                    Signal::Halt => return Ok(Driven::Halted),
                },
            }
        }
    }

    /// Length of the remote sequence. Only defined for finite,
    /// known-length iterators — generators report unsupported rather than
    /// guessing.
    pub async fn len(&self) -> Result<usize> {
        if self.kind == Some(StreamKind::Generator) {
            return Err(BridgeError::NotSupported(
                "length of a generator stream is unknowable".into(),
            ));
        }
        let mut request = self.method_request("__len__");
        request.idempotent = true;
        match self.dispatcher.dispatch(request, self.timeout).await? {
            Value::Int(n) if n >= 0 => Ok(n as usize),
            other => Err(BridgeError::Runtime(format!(
                "__len__ returned `{}`",
                other.type_name()
            ))),
        }
    }

    /// Adapts the pull loop into a `futures` stream of results.
    pub fn into_stream(self) -> impl Stream<Item = Result<Value>> + Send {
        futures_util::stream::unfold(self, |mut stream| async move {
            match stream.next().await {
                Ok(Some(value)) => Some((Ok(value), stream)),
                Ok(None) => None,
                Err(err) => Some((Err(err), stream)),
            }
        })
    }

    async fn pull_native(&self) -> Result<Option<Value>> {
        let request = self.method_request("__next__");
        match self.dispatcher.dispatch(request, self.timeout).await {
            Ok(value) => Ok(Some(value)),
            // Normal completion, not an error.
            Err(err) if remote_class_is(&err, "StopIteration") => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn pull_indexed(&self, index: i64) -> Result<Option<Value>> {
        let mut request = self.method_request("__getitem__");
        request.args.push(json!(index));
        request.idempotent = true;
        match self.dispatcher.dispatch(request, self.timeout).await {
            Ok(value) => Ok(Some(value)),
            // Both signals are terminal for the fallback path.
            Err(err)
                if remote_class_is(&err, "IndexError")
                    || remote_class_is(&err, "StopIteration") =>
            {
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    fn method_request(&self, method: &str) -> CallRequest {
        let mut request = CallRequest::new(
            self.target.library.clone().unwrap_or_default(),
            self.target.python_module.clone().unwrap_or_default(),
            method,
        );
        request.call_type = Some(CallType::Method);
        request.instance = Some(self.target.to_wire());
        request
    }
}

fn remote_class_is(err: &BridgeError, name: &str) -> bool {
    err.remote_class() == Some(name)
}

fn is_not_an_iterator(err: &BridgeError) -> bool {
    matches!(err.remote_class(), Some("TypeError" | "AttributeError"))
}
