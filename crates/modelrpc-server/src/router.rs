//! Mount point for bound services
//!
//! Routes `/package.Service/Method` paths to the adapter mounted under
//! `package.Service`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use modelrpc_wire::WireMessage;
use tracing::{info, warn};

use crate::adapter::{Reply, ServiceHandler};
use crate::context::CallContext;
use crate::error::{FrameworkError, Result};
use crate::status::Status;

#[derive(Default)]
pub struct Router {
    async_only: bool,
    services: HashMap<String, Arc<dyn ServiceHandler>>,
}

impl Router {
    /// Router accepting any service
    pub fn new() -> Self {
        Self::default()
    }

    /// Router that refuses services with blocking methods
    pub fn async_only() -> Self {
        Self {
            async_only: true,
            services: HashMap::new(),
        }
    }

    pub fn is_async_only(&self) -> bool {
        self.async_only
    }

    pub fn mount<H: ServiceHandler + 'static>(&mut self, handler: H) -> Result<&mut Self> {
        self.mount_shared(Arc::new(handler))
    }

    pub fn mount_shared(&mut self, handler: Arc<dyn ServiceHandler>) -> Result<&mut Self> {
        let name = handler.service_name().to_string();
        if self.services.contains_key(&name) {
            return Err(FrameworkError::binding(format!(
                "service '{}' is already mounted",
                name
            )));
        }
        if self.async_only
            && let Some(blocking) = handler.descriptors().into_iter().find(|d| !d.is_async())
        {
            return Err(FrameworkError::arity(
                &blocking.native_name,
                format!("blocking method cannot be mounted on async-only router ({})", name),
            ));
        }

        info!(service = %name, "Mounted service");
        self.services.insert(name, handler);
        Ok(self)
    }

    /// Mounted service names, sorted
    pub fn services(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.services.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn handler(&self, service: &str) -> Option<&Arc<dyn ServiceHandler>> {
        self.services.get(service)
    }

    pub async fn call(
        &self,
        path: &str,
        request: WireMessage,
        ctx: CallContext,
    ) -> std::result::Result<Reply, Status> {
        let Some((service, method)) = parse_path(path) else {
            warn!(path = %path, "Malformed call path");
            return Err(Status::unimplemented(format!("Malformed path '{}'", path)));
        };
        let Some(handler) = self.services.get(service) else {
            warn!(service = %service, "Unknown service");
            return Err(Status::unimplemented(format!("Unknown service '{}'", service)));
        };
        handler.call(method, request, ctx).await
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("async_only", &self.async_only)
            .field("services", &self.services())
            .finish()
    }
}

/// Split `/package.Service/Method` into service and method
pub fn parse_path(path: &str) -> Option<(&str, &str)> {
    let (service, method) = path.strip_prefix('/')?.split_once('/')?;
    if service.is_empty() || method.is_empty() || method.contains('/') {
        return None;
    }
    Some((service, method))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_path() {
        assert_eq!(
            parse_path("/greeter.v1.Greeter/SayHello"),
            Some(("greeter.v1.Greeter", "SayHello"))
        );
        assert_eq!(parse_path("greeter.v1.Greeter/SayHello"), None);
        assert_eq!(parse_path("/greeter.v1.Greeter"), None);
        assert_eq!(parse_path("/greeter.v1.Greeter/"), None);
        assert_eq!(parse_path("/a/b/c"), None);
    }

    #[tokio::test]
    async fn test_unknown_service_is_unimplemented() {
        let router = Router::new();
        let Err(status) = router
            .call("/nope.v1.Nope/Call", WireMessage::new("Empty"), CallContext::new())
            .await
        else {
            panic!("Expected an error status");
        };
        assert_eq!(status.code(), crate::status::Code::Unimplemented);
    }
}
