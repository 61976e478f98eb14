//! Service contract and method registration
//!
//! A service lists its operations once, in [`Service::methods`]. Each registration
//! call records a [`MethodDescriptor`] and a type-erased invoker that decodes the
//! native request, runs the handler and encodes its result.

use std::future::Future;
use std::sync::Arc;

use futures::future::{self, BoxFuture, FutureExt};
use futures::stream::{BoxStream, Stream, StreamExt};
use modelrpc_schema::{TypeGraph, TypeKind, TypeRef};
use modelrpc_wire::Model;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::context::CallContext;
use crate::descriptor::{Arity, Execution, MethodDescriptor};
use crate::error::{BoxError, CallError, FrameworkError};

/// A value that serves RPCs
///
/// ```rust,ignore
/// impl Service for Greeter {
///     fn methods(registry: &mut MethodRegistry<Self>) {
///         registry
///             .unary("say_hello", |greeter: Arc<Self>, request: HelloRequest| async move {
///                 greeter.say_hello(request).await
///             })
///             .describe("Greets the caller");
///     }
/// }
/// ```
pub trait Service: Send + Sync + Sized + 'static {
    /// Service name in the schema; defaults to the type's name
    fn name(&self) -> String {
        let full = std::any::type_name::<Self>();
        let path = full.split('<').next().unwrap_or(full);
        path.rsplit("::").next().unwrap_or(path).to_string()
    }

    fn description(&self) -> Option<String> {
        None
    }

    /// Package override; the configuration and then the service name are used otherwise
    fn package(&self) -> Option<String> {
        None
    }

    fn methods(registry: &mut MethodRegistry<Self>);
}

pub(crate) type NativeStream = BoxStream<'static, Result<Value, CallError>>;

type AsyncFn<S> =
    dyn Fn(Arc<S>, Value, CallContext) -> BoxFuture<'static, Result<Value, CallError>> + Send + Sync;
type BlockingFn<S> = dyn Fn(&S, Value, &CallContext) -> Result<Value, CallError> + Send + Sync;
type StreamingFn<S> =
    dyn Fn(Arc<S>, Value, CallContext) -> Result<NativeStream, CallError> + Send + Sync;

pub(crate) enum Invoker<S> {
    Async(Arc<AsyncFn<S>>),
    Blocking(Arc<BlockingFn<S>>),
    Streaming(Arc<StreamingFn<S>>),
}

pub(crate) struct MethodEntry<S> {
    pub(crate) descriptor: MethodDescriptor,
    pub(crate) invoker: Invoker<S>,
}

/// Collects the methods of one service
pub struct MethodRegistry<S> {
    graph: TypeGraph,
    methods: Vec<MethodEntry<S>>,
    errors: Vec<FrameworkError>,
}

impl<S: Service> MethodRegistry<S> {
    pub(crate) fn new() -> Self {
        Self {
            graph: TypeGraph::new(),
            methods: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Run `S::methods` and check the result
    pub(crate) fn collect() -> Result<(TypeGraph, Vec<MethodEntry<S>>), FrameworkError> {
        let mut registry = Self::new();
        S::methods(&mut registry);
        if let Some(err) = registry.errors.into_iter().next() {
            return Err(err);
        }
        Ok((registry.graph, registry.methods))
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &MethodDescriptor> {
        self.methods.iter().map(|m| &m.descriptor)
    }

    /// Async method taking the request
    pub fn unary<Req, Resp, E, F, Fut>(&mut self, name: &str, handler: F) -> &mut MethodDescriptor
    where
        Req: Model,
        Resp: Model,
        E: Into<BoxError> + Send + 'static,
        F: Fn(Arc<S>, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp, E>> + Send + 'static,
    {
        let invoker: Arc<AsyncFn<S>> =
            Arc::new(move |service: Arc<S>, native: Value, _ctx: CallContext| {
                match decode::<Req>(native) {
                    Ok(request) => respond(handler(service, request)),
                    Err(err) => future::ready(Err::<Value, _>(err)).boxed(),
                }
            });
        self.push::<Req, Resp>(name, false, Arity::Request, Invoker::Async(invoker))
    }

    /// Async method taking the request and the call context
    pub fn unary_with_context<Req, Resp, E, F, Fut>(
        &mut self,
        name: &str,
        handler: F,
    ) -> &mut MethodDescriptor
    where
        Req: Model,
        Resp: Model,
        E: Into<BoxError> + Send + 'static,
        F: Fn(Arc<S>, Req, CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp, E>> + Send + 'static,
    {
        let invoker: Arc<AsyncFn<S>> =
            Arc::new(move |service: Arc<S>, native: Value, ctx: CallContext| {
                match decode::<Req>(native) {
                    Ok(request) => respond(handler(service, request, ctx)),
                    Err(err) => future::ready(Err::<Value, _>(err)).boxed(),
                }
            });
        self.push::<Req, Resp>(
            name,
            false,
            Arity::RequestWithContext,
            Invoker::Async(invoker),
        )
    }

    /// Synchronous method, run on the blocking pool
    pub fn blocking<Req, Resp, E, F>(&mut self, name: &str, handler: F) -> &mut MethodDescriptor
    where
        Req: Model,
        Resp: Model,
        E: Into<BoxError>,
        F: Fn(&S, Req) -> Result<Resp, E> + Send + Sync + 'static,
    {
        let invoker: Arc<BlockingFn<S>> =
            Arc::new(move |service: &S, native: Value, _ctx: &CallContext| {
                let request = decode::<Req>(native)?;
                let response = handler(service, request).map_err(|e| CallError::from_user(e.into()))?;
                encode(&response)
            });
        self.push::<Req, Resp>(name, false, Arity::Request, Invoker::Blocking(invoker))
    }

    /// Synchronous method taking the call context
    pub fn blocking_with_context<Req, Resp, E, F>(
        &mut self,
        name: &str,
        handler: F,
    ) -> &mut MethodDescriptor
    where
        Req: Model,
        Resp: Model,
        E: Into<BoxError>,
        F: Fn(&S, Req, &CallContext) -> Result<Resp, E> + Send + Sync + 'static,
    {
        let invoker: Arc<BlockingFn<S>> =
            Arc::new(move |service: &S, native: Value, ctx: &CallContext| {
                let request = decode::<Req>(native)?;
                let response =
                    handler(service, request, ctx).map_err(|e| CallError::from_user(e.into()))?;
                encode(&response)
            });
        self.push::<Req, Resp>(
            name,
            false,
            Arity::RequestWithContext,
            Invoker::Blocking(invoker),
        )
    }

    /// Method answering with a stream of `Item`s
    pub fn server_streaming<Req, Item, E, F, St>(
        &mut self,
        name: &str,
        handler: F,
    ) -> &mut MethodDescriptor
    where
        Req: Model,
        Item: Model,
        E: Into<BoxError> + Send + 'static,
        F: Fn(Arc<S>, Req) -> St + Send + Sync + 'static,
        St: Stream<Item = Result<Item, E>> + Send + 'static,
    {
        let invoker: Arc<StreamingFn<S>> =
            Arc::new(move |service: Arc<S>, native: Value, _ctx: CallContext| {
                let request = decode::<Req>(native)?;
                Ok(encode_items(handler(service, request)))
            });
        self.push::<Req, Item>(name, true, Arity::Request, Invoker::Streaming(invoker))
    }

    /// Streaming method taking the call context
    pub fn server_streaming_with_context<Req, Item, E, F, St>(
        &mut self,
        name: &str,
        handler: F,
    ) -> &mut MethodDescriptor
    where
        Req: Model,
        Item: Model,
        E: Into<BoxError> + Send + 'static,
        F: Fn(Arc<S>, Req, CallContext) -> St + Send + Sync + 'static,
        St: Stream<Item = Result<Item, E>> + Send + 'static,
    {
        let invoker: Arc<StreamingFn<S>> =
            Arc::new(move |service: Arc<S>, native: Value, ctx: CallContext| {
                let request = decode::<Req>(native)?;
                Ok(encode_items(handler(service, request, ctx)))
            });
        self.push::<Req, Item>(
            name,
            true,
            Arity::RequestWithContext,
            Invoker::Streaming(invoker),
        )
    }

    fn push<Req: Model, Resp: Model>(
        &mut self,
        native_name: &str,
        server_streaming: bool,
        arity: Arity,
        invoker: Invoker<S>,
    ) -> &mut MethodDescriptor {
        let request = self.graph.add::<Req>();
        let response = self.graph.add::<Resp>();
        let execution = match invoker {
            Invoker::Blocking(_) => Execution::Blocking,
            Invoker::Async(_) | Invoker::Streaming(_) => Execution::Async,
        };
        let descriptor = MethodDescriptor::new(
            native_name,
            request,
            response,
            server_streaming,
            arity,
            execution,
        );

        self.check(&descriptor);
        let index = self.methods.len();
        self.methods.push(MethodEntry {
            descriptor,
            invoker,
        });
        &mut self.methods[index].descriptor
    }

    fn check(&mut self, descriptor: &MethodDescriptor) {
        if !is_record(&descriptor.request) {
            self.errors.push(FrameworkError::arity(
                &descriptor.native_name,
                format!("request type {} is not a record", descriptor.request),
            ));
        }
        if self
            .methods
            .iter()
            .any(|m| m.descriptor.name == descriptor.name)
        {
            self.errors.push(FrameworkError::arity(
                &descriptor.native_name,
                format!("wire name '{}' is already registered", descriptor.name),
            ));
        }
    }
}

fn is_record(ty: &TypeRef) -> bool {
    ty.kind() == TypeKind::Record
}

fn decode<T: DeserializeOwned>(native: Value) -> Result<T, CallError> {
    serde_json::from_value(native).map_err(|e| CallError::Validation(e.to_string()))
}

fn encode<T: Serialize>(value: &T) -> Result<Value, CallError> {
    serde_json::to_value(value)
        .map_err(|e| CallError::Internal(format!("Failed to serialize response: {}", e)))
}

fn respond<Resp, E, Fut>(response: Fut) -> BoxFuture<'static, Result<Value, CallError>>
where
    Resp: Serialize,
    E: Into<BoxError>,
    Fut: Future<Output = Result<Resp, E>> + Send + 'static,
{
    async move {
        match response.await {
            Ok(response) => encode(&response),
            Err(err) => Err(CallError::from_user(err.into())),
        }
    }
    .boxed()
}

fn encode_items<Item, E, St>(items: St) -> NativeStream
where
    Item: Serialize,
    E: Into<BoxError>,
    St: Stream<Item = Result<Item, E>> + Send + 'static,
{
    items
        .map(|item| match item {
            Ok(item) => encode(&item),
            Err(err) => Err(CallError::from_user(err.into())),
        })
        .boxed()
}

#[cfg(test)]
mod tests {
    use schemars::JsonSchema;
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Serialize, Deserialize, JsonSchema)]
    struct Ping {
        seq: u32,
    }

    #[derive(Debug, Serialize, Deserialize, JsonSchema)]
    struct Pong {
        seq: u32,
    }

    struct Echo;

    impl Service for Echo {
        fn methods(registry: &mut MethodRegistry<Self>) {
            registry
                .unary("ping", |_echo: Arc<Self>, ping: Ping| async move {
                    Ok::<_, BoxError>(Pong { seq: ping.seq })
                })
                .describe("Answers a ping");
            registry.blocking_with_context("ping_blocking", |_echo: &Self, ping: Ping, _ctx: &CallContext| {
                Ok::<_, BoxError>(Pong { seq: ping.seq })
            });
        }
    }

    struct Duplicated;

    impl Service for Duplicated {
        fn methods(registry: &mut MethodRegistry<Self>) {
            registry.blocking("ping", |_: &Self, ping: Ping| Ok::<_, BoxError>(Pong { seq: ping.seq }));
            registry.blocking("Ping", |_: &Self, ping: Ping| Ok::<_, BoxError>(Pong { seq: ping.seq }));
        }
    }

    struct Scalar;

    impl Service for Scalar {
        fn methods(registry: &mut MethodRegistry<Self>) {
            registry.blocking("count", |_: &Self, n: u32| Ok::<_, BoxError>(Pong { seq: n }));
        }
    }

    #[test]
    fn test_descriptors() {
        let (_, entries) = MethodRegistry::<Echo>::collect().unwrap();
        let descriptors: Vec<_> = entries.iter().map(|e| &e.descriptor).collect();

        assert_eq!(descriptors[0].name, "Ping");
        assert_eq!(descriptors[0].arity, Arity::Request);
        assert!(descriptors[0].is_async());
        assert_eq!(descriptors[0].description.as_deref(), Some("Answers a ping"));
        assert_eq!(descriptors[0].request, TypeRef::Record("Ping".into()));
        assert_eq!(descriptors[0].response, TypeRef::Record("Pong".into()));

        assert_eq!(descriptors[1].name, "PingBlocking");
        assert_eq!(descriptors[1].arity, Arity::RequestWithContext);
        assert_eq!(descriptors[1].execution, Execution::Blocking);
    }

    #[test]
    fn test_default_service_name() {
        assert_eq!(Echo.name(), "Echo");
    }

    #[test]
    fn test_duplicate_wire_name_rejected() {
        let Err(FrameworkError::Arity { method, reason }) = MethodRegistry::<Duplicated>::collect()
        else {
            panic!("Expected an arity error");
        };
        assert_eq!(method, "Ping");
        assert!(reason.contains("already registered"));
    }

    #[test]
    fn test_non_record_request_rejected() {
        let Err(FrameworkError::Arity { method, reason }) = MethodRegistry::<Scalar>::collect()
        else {
            panic!("Expected an arity error");
        };
        assert_eq!(method, "count");
        assert!(reason.contains("not a record"));
    }

    #[tokio::test]
    async fn test_invalid_request_is_validation_error() {
        let (_, entries) = MethodRegistry::<Echo>::collect().unwrap();
        let Invoker::Async(invoke) = &entries[0].invoker else {
            panic!("Expected an async invoker");
        };

        let result = invoke(Arc::new(Echo), serde_json::json!({"seq": -1}), CallContext::new()).await;
        assert!(matches!(result, Err(CallError::Validation(_))));

        let result = invoke(Arc::new(Echo), serde_json::json!({"seq": 7}), CallContext::new()).await;
        assert_eq!(result.unwrap(), serde_json::json!({"seq": 7}));
    }
}
