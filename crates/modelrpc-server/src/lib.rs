//! # modelrpc server
//!
//! Serves plain Rust values as RPC services. A [`Service`] registers its methods
//! once; the [`BindingGenerator`] derives the schema document from the request and
//! response models, runs the schema compiler, and produces a [`DispatchAdapter`]
//! that converts wire messages to native values and back around every call.
//!
//! ```rust,ignore
//! use modelrpc_server::prelude::*;
//!
//! let adapter = BindingGenerator::new(ServerConfig::from_env()).generate(Greeter)?;
//! let mut router = Router::async_only();
//! router.mount(adapter)?;
//! let reply = router
//!     .call("/greeter.v1.Greeter/SayHello", request, CallContext::new())
//!     .await?;
//! ```

pub mod adapter;
pub mod binding;
pub mod compiler;
pub mod config;
pub mod context;
pub mod descriptor;
pub mod error;
pub mod generator;
pub mod router;
pub mod service;
pub mod status;

pub use adapter::{DispatchAdapter, Reply, ReplyStream, ServiceHandler};
pub use binding::{CompiledBinding, DescriptorBinding};
pub use compiler::{Invocation, ProtoCompiler};
pub use config::ServerConfig;
pub use context::{CallContext, CancellationHandle};
pub use descriptor::{Arity, Execution, MethodDescriptor, wire_method_name};
pub use error::{BoxError, CallError, FrameworkError, Result};
pub use generator::BindingGenerator;
pub use router::{Router, parse_path};
pub use service::{MethodRegistry, Service};
pub use status::{Code, Status};

pub use modelrpc_schema as schema;
pub use modelrpc_wire as wire;

/// Common imports for implementing and serving services
pub mod prelude {
    pub use crate::{
        BindingGenerator, BoxError, CallContext, DispatchAdapter, MethodRegistry, Reply, Router,
        ServerConfig, Service, ServiceHandler, Status,
    };
    pub use modelrpc_wire::{WireMessage, WireValue};
}
