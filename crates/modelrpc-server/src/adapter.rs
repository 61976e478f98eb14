//! Dispatch adapter
//!
//! Receives wire calls, converts the request to native form, runs the user
//! method and converts the result back. Every per-call failure ends up as a
//! [`Status`]; nothing here panics the serving process.

use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use futures::stream::{BoxStream, StreamExt};
use modelrpc_wire::{Converter, ConverterRegistry, MessageFactory, WireMessage, WireValue};
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::binding::CompiledBinding;
use crate::context::{CallContext, CancellationHandle};
use crate::descriptor::MethodDescriptor;
use crate::error::CallError;
use crate::service::{Invoker, MethodEntry, NativeStream, Service};
use crate::status::Status;

/// Stream of converted response items
pub type ReplyStream = BoxStream<'static, Result<WireMessage, Status>>;

/// Successful outcome of a call
pub enum Reply {
    Unary(WireMessage),
    Stream(ReplyStream),
}

impl Reply {
    pub fn into_unary(self) -> Option<WireMessage> {
        match self {
            Reply::Unary(message) => Some(message),
            Reply::Stream(_) => None,
        }
    }

    pub fn into_stream(self) -> Option<ReplyStream> {
        match self {
            Reply::Stream(stream) => Some(stream),
            Reply::Unary(_) => None,
        }
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Unary(message) => f.debug_tuple("Unary").field(message).finish(),
            Reply::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Transport-facing interface of a bound service
#[async_trait]
pub trait ServiceHandler: Send + Sync {
    /// Fully qualified name, `package.Service`
    fn service_name(&self) -> &str;

    fn descriptors(&self) -> Vec<&MethodDescriptor>;

    /// `method` is the wire method name
    async fn call(
        &self,
        method: &str,
        request: WireMessage,
        ctx: CallContext,
    ) -> Result<Reply, Status>;
}

/// A service bound to its compiled schema
pub struct DispatchAdapter<S: Service> {
    binding: Arc<dyn CompiledBinding>,
    service: Arc<S>,
    methods: Vec<MethodEntry<S>>,
    index: HashMap<String, usize>,
    registry: Arc<ConverterRegistry>,
    scope: String,
}

impl<S: Service> DispatchAdapter<S> {
    pub(crate) fn new(
        binding: Arc<dyn CompiledBinding>,
        service: Arc<S>,
        methods: Vec<MethodEntry<S>>,
        registry: Arc<ConverterRegistry>,
    ) -> Self {
        let index = methods
            .iter()
            .enumerate()
            .map(|(i, m)| (m.descriptor.name.clone(), i))
            .collect();
        let scope = binding.qualified_name();
        Self {
            binding,
            service,
            methods,
            index,
            registry,
            scope,
        }
    }

    pub fn service(&self) -> &Arc<S> {
        &self.service
    }

    pub fn binding(&self) -> &Arc<dyn CompiledBinding> {
        &self.binding
    }

    pub fn descriptor(&self, method: &str) -> Option<&MethodDescriptor> {
        self.entry(method).map(|m| &m.descriptor)
    }

    fn entry(&self, method: &str) -> Option<&MethodEntry<S>> {
        self.index.get(method).map(|&i| &self.methods[i])
    }

    async fn dispatch(
        &self,
        method: &str,
        request: WireMessage,
        ctx: CallContext,
    ) -> Result<Reply, CallError> {
        let entry = self
            .entry(method)
            .ok_or_else(|| CallError::MethodNotFound(method.to_string()))?;
        let descriptor = &entry.descriptor;
        let ctx = ctx.for_method(&descriptor.name);

        let native = self
            .registry
            .converter(&self.scope, &descriptor.request)?
            .from_wire(&WireValue::Message(request))?;
        let response = self.registry.converter(&self.scope, &descriptor.response)?;

        match &entry.invoker {
            Invoker::Async(invoke) => {
                let call = invoke(Arc::clone(&self.service), native, ctx);
                let value = AssertUnwindSafe(call)
                    .catch_unwind()
                    .await
                    .map_err(|_| panicked())??;
                let message = encode(&response, &*self.binding, &value)?;
                Ok(Reply::Unary(message))
            }
            Invoker::Blocking(invoke) => {
                let invoke = Arc::clone(invoke);
                let service = Arc::clone(&self.service);
                let value = tokio::task::spawn_blocking(move || invoke(&*service, native, &ctx))
                    .await
                    .map_err(|e| CallError::Internal(format!("Blocking handler failed: {}", e)))??;
                let message = encode(&response, &*self.binding, &value)?;
                Ok(Reply::Unary(message))
            }
            Invoker::Streaming(invoke) => {
                let cancellation = ctx.cancellation().clone();
                let service = Arc::clone(&self.service);
                let items =
                    std::panic::catch_unwind(AssertUnwindSafe(|| invoke(service, native, ctx)))
                        .map_err(|_| panicked())??;
                Ok(Reply::Stream(self.stream(
                    descriptor.name.clone(),
                    items,
                    response,
                    cancellation,
                )))
            }
        }
    }

    /// Convert items one at a time, pulling the next only when the consumer asks
    fn stream(
        &self,
        method: String,
        mut items: NativeStream,
        converter: Converter,
        cancellation: CancellationHandle,
    ) -> ReplyStream {
        let binding = Arc::clone(&self.binding);
        let service = self.scope.clone();

        Box::pin(async_stream::stream! {
            let mut emitted = 0usize;
            loop {
                if cancellation.is_cancelled() {
                    break;
                }
                let next = tokio::select! {
                    biased;
                    _ = cancellation.cancelled() => None,
                    item = AssertUnwindSafe(items.next()).catch_unwind() => {
                        item.unwrap_or_else(|_| Some(Err(panicked())))
                    }
                };
                let Some(item) = next else {
                    break;
                };

                match item.and_then(|value| encode(&converter, &*binding, &value)) {
                    Ok(message) => {
                        emitted += 1;
                        yield Ok(message);
                    }
                    Err(err) => {
                        yield Err(report(&service, &method, &err));
                        break;
                    }
                }
            }

            if cancellation.is_cancelled() {
                debug!(service = %service, method = %method, emitted, "Stream cancelled");
            } else {
                debug!(service = %service, method = %method, emitted, "Stream finished");
            }
        })
    }
}

fn panicked() -> CallError {
    CallError::Internal("Handler panicked".to_string())
}

#[async_trait]
impl<S: Service> ServiceHandler for DispatchAdapter<S> {
    fn service_name(&self) -> &str {
        &self.scope
    }

    fn descriptors(&self) -> Vec<&MethodDescriptor> {
        self.methods.iter().map(|m| &m.descriptor).collect()
    }

    async fn call(
        &self,
        method: &str,
        request: WireMessage,
        ctx: CallContext,
    ) -> Result<Reply, Status> {
        debug!(service = %self.scope, method = %method, "Dispatching call");
        self.dispatch(method, request, ctx)
            .await
            .map_err(|err| report(&self.scope, method, &err))
    }
}

impl<S: Service> fmt::Debug for DispatchAdapter<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchAdapter")
            .field("service", &self.scope)
            .field("methods", &self.index.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn encode(
    converter: &Converter,
    factory: &dyn MessageFactory,
    value: &Value,
) -> Result<WireMessage, CallError> {
    Ok(converter.to_wire(value, factory)?.into_message()?)
}

/// Log a failed call and turn it into its status
fn report(service: &str, method: &str, err: &CallError) -> Status {
    let status = err.to_status();
    if err.is_client_error() {
        warn!(service = %service, method = %method, code = ?status.code(), "Call failed: {}", err);
    } else {
        error!(service = %service, method = %method, code = ?status.code(), "Call failed: {}", err);
    }
    status
}
