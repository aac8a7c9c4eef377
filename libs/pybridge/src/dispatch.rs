// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Runtime dispatcher.
//!
//! Builds call payloads through the codec, sends them over the transport
//! with a timeout, and turns result envelopes back into host values or
//! typed errors. One dispatcher is bound to one session; using a ref from
//! another session fails fast with both ids instead of silently operating
//! on the wrong object.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value as Json;
use tracing::Instrument;

use crate::callback::CallbackRegistry;
use crate::codec::Codec;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::owner::OwnerGuard;
use crate::remote_error::RemoteErrorRegistry;
use crate::session::SessionManager;
use crate::stream::RemoteStream;
use crate::transport::Transport;
use pybridge_wire::{CallRequest, CallResponse, CallType, Ref, StreamRef, Value};

struct Inner {
    transport: Arc<dyn Transport>,
    sessions: SessionManager,
    callbacks: CallbackRegistry,
    codec: Codec,
    config: BridgeConfig,
    session_id: String,
    remote_errors: RemoteErrorRegistry,
}

#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    /// Spawns the session and callback actors and creates this
    /// dispatcher's session (explicit id from config, or generated).
    pub async fn connect(transport: Arc<dyn Transport>, config: BridgeConfig) -> Result<Self> {
        let session_id = config
            .session_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let sessions = SessionManager::spawn(Arc::clone(&transport));
        sessions.create_session(&session_id, config.session_options()).await?;
        let callbacks =
            CallbackRegistry::spawn(Arc::clone(&transport), config.callback_address.clone());
        let codec = Codec::new(config.atoms.clone())
            .with_sessions(sessions.clone())
            .with_callbacks(callbacks.clone(), session_id.clone());
        tracing::info!(%session_id, "bridge session opened");
        Ok(Self {
            inner: Arc::new(Inner {
                transport,
                sessions,
                callbacks,
                codec,
                config,
                session_id,
                remote_errors: RemoteErrorRegistry::new(),
            }),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.inner.sessions
    }

    pub fn callbacks(&self) -> &CallbackRegistry {
        &self.inner.callbacks
    }

    pub fn codec(&self) -> &Codec {
        &self.inner.codec
    }

    pub fn remote_errors(&self) -> &RemoteErrorRegistry {
        &self.inner.remote_errors
    }

    pub(crate) fn stream_timeout(&self) -> Duration {
        self.inner.config.stream_timeout()
    }

    /// Registers the caller as an owner of this session. The session stays
    /// alive while any guard lives; callbacks registered against the guard
    /// die with it.
    pub async fn register_owner(&self) -> Result<OwnerGuard> {
        let guard = self
            .inner
            .sessions
            .register_session(&self.inner.session_id, self.inner.config.session_options())
            .await?;
        Ok(guard.watch_callbacks(self.inner.callbacks.command_sender()))
    }

    /// Plain function call: `library.python_module.function(...)`.
    pub fn call(
        &self,
        library: impl Into<String>,
        python_module: impl Into<String>,
        function: impl Into<String>,
    ) -> CallBuilder {
        CallBuilder::new(self.clone(), library.into(), python_module.into(), function.into())
    }

    /// Constructor call; the worker replies with a ref to the instance.
    pub fn construct(
        &self,
        library: impl Into<String>,
        python_module: impl Into<String>,
        class_name: impl Into<String>,
    ) -> CallBuilder {
        let class_name = class_name.into();
        let mut builder =
            CallBuilder::new(self.clone(), library.into(), python_module.into(), "__init__");
        builder.call_type = Some(CallType::Class);
        builder.class_name = Some(class_name);
        builder
    }

    /// Method call on a remote instance.
    pub fn call_method(&self, instance: &Ref, method: impl Into<String>) -> Result<CallBuilder> {
        self.check_session(instance)?;
        let mut builder = CallBuilder::new(
            self.clone(),
            instance.library.clone().unwrap_or_default(),
            instance.python_module.clone().unwrap_or_default(),
            method.into(),
        );
        builder.call_type = Some(CallType::Method);
        builder.instance = Some(instance.clone());
        Ok(builder)
    }

    /// Module-level attribute read.
    pub fn get_attr(
        &self,
        library: impl Into<String>,
        python_module: impl Into<String>,
        attr: impl Into<String>,
    ) -> CallBuilder {
        let attr = attr.into();
        let mut builder =
            CallBuilder::new(self.clone(), library.into(), python_module.into(), attr.clone());
        builder.call_type = Some(CallType::GetAttr);
        builder.attr = Some(attr);
        builder.idempotent = true;
        builder
    }

    /// Attribute read on a remote instance.
    pub fn get_ref_attr(&self, instance: &Ref, attr: impl Into<String>) -> Result<CallBuilder> {
        let attr = attr.into();
        let mut builder = self.call_method(instance, attr.clone())?;
        builder.call_type = Some(CallType::GetAttr);
        builder.attr = Some(attr);
        builder.idempotent = true;
        Ok(builder)
    }

    /// Attribute write on a remote instance; the new value rides as the
    /// single positional argument.
    pub fn set_ref_attr(
        &self,
        instance: &Ref,
        attr: impl Into<String>,
        value: Value,
    ) -> Result<CallBuilder> {
        let attr = attr.into();
        let mut builder = self.call_method(instance, attr.clone())?;
        builder.call_type = Some(CallType::SetAttr);
        builder.attr = Some(attr);
        builder.args.push(value);
        Ok(builder)
    }

    /// Submits the builders concurrently and returns position-aligned
    /// results; one failing call does not abort the rest.
    pub async fn call_batch(&self, builders: Vec<CallBuilder>) -> Vec<Result<Value>> {
        futures_util::future::join_all(builders.into_iter().map(CallBuilder::send)).await
    }

    /// Starts consuming an open remote iterator/generator.
    pub fn open_stream(&self, stream: StreamRef) -> Result<RemoteStream> {
        self.check_session(&stream.reference)?;
        Ok(RemoteStream::from_stream_ref(self.clone(), stream))
    }

    /// Iterates a plain ref: native `__next__` first, indexed fallback if
    /// the remote object turns out not to be an iterator.
    pub fn iterate(&self, reference: Ref) -> Result<RemoteStream> {
        self.check_session(&reference)?;
        Ok(RemoteStream::from_ref(self.clone(), reference))
    }

    fn check_session(&self, reference: &Ref) -> Result<()> {
        if reference.session_id != self.inner.session_id {
            return Err(BridgeError::SessionMismatch {
                ref_session: reference.session_id.clone(),
                current_session: self.inner.session_id.clone(),
            });
        }
        Ok(())
    }

    pub(crate) async fn dispatch(
        &self,
        mut request: CallRequest,
        timeout: Duration,
    ) -> Result<Value> {
        let correlation_id = request
            .metadata
            .correlation_id
            .get_or_insert_with(|| uuid::Uuid::new_v4().simple().to_string())
            .clone();
        let span = tracing::debug_span!(
            "bridge_call",
            session_id = %self.inner.session_id,
            function = %request.function,
            correlation_id = %correlation_id,
        );
        async move {
            let response = tokio::time::timeout(timeout, self.inner.transport.call(request))
                .await
                .map_err(|_| BridgeError::Timeout(timeout))??;
            self.handle_response(response)
        }
        .instrument(span)
        .await
    }

    fn handle_response(&self, response: CallResponse) -> Result<Value> {
        if response.success {
            let result = response.result.unwrap_or(Json::Null);
            self.inner.codec.decode(&result)
        } else {
            Err(self.remote_error(response.error_type, response.error))
        }
    }

    fn remote_error(&self, error_type: Option<String>, message: Option<String>) -> BridgeError {
        let class = error_type.unwrap_or_else(|| "RuntimeError".to_string());
        let message = message.unwrap_or_else(|| "remote call failed".to_string());
        match class.as_str() {
            "RefNotFoundError" | "ref_not_found" => BridgeError::RefNotFound(message),
            _ => {
                tracing::debug!(%class, %message, "remote call failed");
                BridgeError::Remote {
                    class: self.inner.remote_errors.resolve(&class),
                    message,
                }
            }
        }
    }
}

/// One call under construction. Obtained from the [`Dispatcher`] entry
/// points; consumed by [`send`](CallBuilder::send).
pub struct CallBuilder {
    dispatcher: Dispatcher,
    library: String,
    python_module: String,
    function: String,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
    idempotent: bool,
    call_type: Option<CallType>,
    instance: Option<Ref>,
    class_name: Option<String>,
    attr: Option<String>,
    timeout: Option<Duration>,
    correlation_id: Option<String>,
}

impl std::fmt::Debug for CallBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallBuilder")
            .field("library", &self.library)
            .field("python_module", &self.python_module)
            .field("function", &self.function)
            .field("args", &self.args)
            .field("kwargs", &self.kwargs)
            .field("idempotent", &self.idempotent)
            .field("call_type", &self.call_type)
            .field("instance", &self.instance)
            .field("class_name", &self.class_name)
            .field("attr", &self.attr)
            .field("timeout", &self.timeout)
            .field("correlation_id", &self.correlation_id)
            .finish_non_exhaustive()
    }
}

impl CallBuilder {
    fn new(
        dispatcher: Dispatcher,
        library: String,
        python_module: String,
        function: impl Into<String>,
    ) -> Self {
        Self {
            dispatcher,
            library,
            python_module,
            function: function.into(),
            args: Vec::new(),
            kwargs: Vec::new(),
            idempotent: false,
            call_type: None,
            instance: None,
            class_name: None,
            attr: None,
            timeout: None,
            correlation_id: None,
        }
    }

    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.push((name.into(), value.into()));
        self
    }

    /// Marks the call safe for the transport to retry on another worker.
    pub fn idempotent(mut self) -> Self {
        self.idempotent = true;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub async fn send(self) -> Result<Value> {
        let Self {
            dispatcher,
            library,
            python_module,
            function,
            args,
            kwargs,
            idempotent,
            call_type,
            instance,
            class_name,
            attr,
            timeout,
            correlation_id,
        } = self;

        let codec = dispatcher.codec();
        let mut request = CallRequest::new(library, python_module, function);
        for value in &args {
            request.args.push(codec.encode(value).await?);
        }
        for (name, value) in &kwargs {
            request.kwargs.insert(name.clone(), codec.encode(value).await?);
        }
        request.idempotent = idempotent;
        request.call_type = call_type;
        request.instance = instance.as_ref().map(Ref::to_wire);
        request.class_name = class_name;
        request.attr = attr;
        request.metadata.correlation_id = correlation_id;

        let timeout = timeout.unwrap_or_else(|| dispatcher.inner.config.call_timeout());
        dispatcher.dispatch(request, timeout).await
    }

    /// Sends the call and wraps its iterable result for pulling.
    pub async fn send_stream(self) -> Result<RemoteStream> {
        let dispatcher = self.dispatcher.clone();
        match self.send().await? {
            Value::Stream(stream) => dispatcher.open_stream(stream),
            Value::Ref(reference) => dispatcher.iterate(reference),
            other => Err(BridgeError::NotSupported(format!(
                "call returned non-iterable `{}`",
                other.type_name()
            ))),
        }
    }
}
