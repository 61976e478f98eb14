//! Binding generator
//!
//! Turns a [`Service`] into a [`DispatchAdapter`]: collects its methods, builds
//! the schema document, hands it to the compiler and binds every method.

use std::sync::Arc;

use modelrpc_schema::{SchemaDocument, ServiceSpec, TypeGraph};
use modelrpc_wire::ConverterRegistry;
use tracing::info;

use crate::adapter::DispatchAdapter;
use crate::binding::{CompiledBinding, DescriptorBinding};
use crate::compiler::ProtoCompiler;
use crate::config::ServerConfig;
use crate::error::{FrameworkError, Result};
use crate::service::{MethodEntry, MethodRegistry, Service};

/// Builds dispatch adapters that share one converter registry
#[derive(Debug, Clone)]
pub struct BindingGenerator {
    config: ServerConfig,
    registry: Arc<ConverterRegistry>,
}

impl Default for BindingGenerator {
    fn default() -> Self {
        Self::new(ServerConfig::default())
    }
}

impl BindingGenerator {
    pub fn new(config: ServerConfig) -> Self {
        Self::with_registry(config, Arc::new(ConverterRegistry::new()))
    }

    pub fn with_registry(config: ServerConfig, registry: Arc<ConverterRegistry>) -> Self {
        Self { config, registry }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ConverterRegistry> {
        &self.registry
    }

    /// Schema document for `service`, without compiling or binding anything
    pub fn document<S: Service>(&self, service: &S) -> Result<SchemaDocument> {
        let (graph, methods) = MethodRegistry::<S>::collect()?;
        self.build_document(service, &graph, &methods)
    }

    pub fn generate<S: Service>(&self, service: S) -> Result<DispatchAdapter<S>> {
        self.generate_shared(Arc::new(service))
    }

    /// Generate, compile when an output directory is configured, and bind
    /// against the synthesized document
    pub fn generate_shared<S: Service>(&self, service: Arc<S>) -> Result<DispatchAdapter<S>> {
        let (graph, methods) = MethodRegistry::<S>::collect()?;
        let document = self.build_document(service.as_ref(), &graph, &methods)?;

        if let Some(compiler) = ProtoCompiler::from_config(&self.config) {
            compiler.compile(&document)?;
        } else if self.config.skip_generation {
            return Err(FrameworkError::Config(
                "skipping generation requires an output directory".to_string(),
            ));
        }

        let binding = Arc::new(DescriptorBinding::new(&document));
        self.bind(&document, binding, service, methods)
    }

    /// Bind against bindings compiled elsewhere
    pub fn generate_with_binding<S: Service>(
        &self,
        service: Arc<S>,
        binding: Arc<dyn CompiledBinding>,
    ) -> Result<DispatchAdapter<S>> {
        let (graph, methods) = MethodRegistry::<S>::collect()?;
        let document = self.build_document(service.as_ref(), &graph, &methods)?;
        self.bind(&document, binding, service, methods)
    }

    fn build_document<S: Service>(
        &self,
        service: &S,
        graph: &TypeGraph,
        methods: &[MethodEntry<S>],
    ) -> Result<SchemaDocument> {
        let spec = ServiceSpec {
            name: service.name(),
            package: self.config.package.clone().or_else(|| service.package()),
            description: service.description(),
            rpcs: methods.iter().map(|m| m.descriptor.to_rpc()).collect(),
        };
        Ok(SchemaDocument::build(graph, spec)?)
    }

    fn bind<S: Service>(
        &self,
        document: &SchemaDocument,
        binding: Arc<dyn CompiledBinding>,
        service: Arc<S>,
        methods: Vec<MethodEntry<S>>,
    ) -> Result<DispatchAdapter<S>> {
        let qualified = document.qualified_service_name();
        if binding.qualified_name() != qualified {
            return Err(FrameworkError::binding(format!(
                "binding is for '{}', service is '{}'",
                binding.qualified_name(),
                qualified
            )));
        }
        if let Some(missing) = methods
            .iter()
            .find(|m| !binding.has_method(&m.descriptor.name))
        {
            return Err(FrameworkError::binding(format!(
                "'{}' has no method '{}'",
                qualified, missing.descriptor.name
            )));
        }

        self.registry.register(qualified.clone(), document.catalog());
        info!(
            service = %qualified,
            methods = methods.len(),
            "Bound service"
        );
        Ok(DispatchAdapter::new(
            binding,
            service,
            methods,
            Arc::clone(&self.registry),
        ))
    }
}
