//! Method descriptors

use heck::ToUpperCamelCase;
use modelrpc_schema::{RpcSpec, TypeRef};
use serde::Serialize;

/// Parameters a handler takes besides the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Arity {
    Request,
    RequestWithContext,
}

/// How a handler runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Execution {
    Async,
    /// Runs on the blocking thread pool
    Blocking,
}

/// Everything known about one exposed method
#[derive(Debug, Clone, PartialEq)]
pub struct MethodDescriptor {
    /// Schema name, e.g. `SayHello`
    pub name: String,
    /// Name the method was registered under, e.g. `say_hello`
    pub native_name: String,
    pub request: TypeRef,
    /// Item type for streaming methods
    pub response: TypeRef,
    pub server_streaming: bool,
    pub arity: Arity,
    pub execution: Execution,
    pub description: Option<String>,
}

impl MethodDescriptor {
    pub(crate) fn new(
        native_name: &str,
        request: TypeRef,
        response: TypeRef,
        server_streaming: bool,
        arity: Arity,
        execution: Execution,
    ) -> Self {
        Self {
            name: wire_method_name(native_name),
            native_name: native_name.to_string(),
            request,
            response,
            server_streaming,
            arity,
            execution,
            description: None,
        }
    }

    /// Attach doc text, emitted above the RPC in the schema document
    pub fn describe(&mut self, description: impl Into<String>) -> &mut Self {
        self.description = Some(description.into());
        self
    }

    pub fn is_async(&self) -> bool {
        self.execution == Execution::Async
    }

    pub fn takes_context(&self) -> bool {
        self.arity == Arity::RequestWithContext
    }

    pub fn to_rpc(&self) -> RpcSpec {
        RpcSpec {
            name: self.name.clone(),
            request: self.request.clone(),
            response: self.response.clone(),
            server_streaming: self.server_streaming,
            description: self.description.clone(),
        }
    }
}

/// `say_hello` becomes `SayHello`
pub fn wire_method_name(native_name: &str) -> String {
    native_name.to_upper_camel_case()
}
