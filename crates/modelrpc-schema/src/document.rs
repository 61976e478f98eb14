//! Schema document building and rendering

use std::collections::HashSet;
use std::fmt::{self, Write as _};

use serde::Serialize;
use tracing::debug;

use crate::classify::TypeGraph;
use crate::message::{
    Constraint, EnumSpec, FieldSpec, MessageItem, MessageSpec, synthesize_enum, synthesize_message,
    wire_identifier,
};
use crate::types::TypeRef;
use crate::{Result, SchemaError};

/// One RPC clause
#[derive(Debug, Clone, PartialEq)]
pub struct RpcSpec {
    /// Wire method name, already in schema casing
    pub name: String,
    pub request: TypeRef,
    /// Item type when `server_streaming` is set
    pub response: TypeRef,
    pub server_streaming: bool,
    pub description: Option<String>,
}

/// Root of a schema document
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceSpec {
    pub name: String,
    pub package: Option<String>,
    pub description: Option<String>,
    pub rpcs: Vec<RpcSpec>,
}

impl ServiceSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            package: None,
            description: None,
            rpcs: Vec::new(),
        }
    }

    /// Explicit package, or the conventional one derived from the service name
    pub fn package(&self) -> String {
        self.package
            .clone()
            .unwrap_or_else(|| default_package(&self.name))
    }
}

/// `GreeterService` becomes `greeter.v1`
pub fn default_package(service_name: &str) -> String {
    let base = service_name.strip_suffix("Service").unwrap_or(service_name);
    format!("{}.v1", base.to_lowercase())
}

/// A synthesized message or enum
#[derive(Debug, Clone, PartialEq)]
pub enum Definition {
    Message(MessageSpec),
    Enum(EnumSpec),
}

impl Definition {
    pub fn name(&self) -> &str {
        match self {
            Definition::Message(message) => &message.name,
            Definition::Enum(enumeration) => &enumeration.name,
        }
    }
}

/// Every message and enum reachable from a set of seed types, in discovery order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Catalog {
    definitions: Vec<Definition>,
    uses_timestamp: bool,
    uses_duration: bool,
}

impl Catalog {
    /// Synthesize everything reachable from `seeds`
    ///
    /// Records are visited first-in first-out. A message is immediately followed
    /// by the enums it introduced; the records it introduced join the queue in
    /// field order. Each type is synthesized once.
    pub fn collect<'a>(
        graph: &TypeGraph,
        seeds: impl IntoIterator<Item = &'a TypeRef>,
    ) -> Result<Self> {
        let mut catalog = Catalog::default();
        let mut seen: HashSet<TypeRef> = HashSet::new();
        let mut queue: std::collections::VecDeque<TypeRef> = std::collections::VecDeque::new();

        for seed in seeds {
            if seed.record_name().is_none() {
                return Err(SchemaError::NonRecordType(seed.to_string()));
            }
            if seen.insert(seed.clone()) {
                queue.push_back(seed.clone());
            }
        }

        while let Some(next) = queue.pop_front() {
            match &next {
                TypeRef::Record(name) => {
                    let (message, referenced) =
                        synthesize_message(graph, name, &|ty| seen.contains(ty))?;
                    for field in message.fields() {
                        field.ty.walk(&mut |nested| match nested {
                            TypeRef::Instant => catalog.uses_timestamp = true,
                            TypeRef::Duration => catalog.uses_duration = true,
                            _ => {}
                        });
                    }
                    debug!(
                        message = %message.name,
                        fields = message.fields().count(),
                        "Synthesized message"
                    );
                    catalog.definitions.push(Definition::Message(message));
                    for ty in referenced {
                        if !seen.insert(ty.clone()) {
                            continue;
                        }
                        match &ty {
                            TypeRef::Enum(name) => {
                                let enumeration = synthesize_enum(graph, name)?;
                                debug!(
                                    enumeration = %enumeration.name,
                                    members = enumeration.members.len(),
                                    "Synthesized enum"
                                );
                                catalog.definitions.push(Definition::Enum(enumeration));
                            }
                            _ => queue.push_back(ty),
                        }
                    }
                }
                other => return Err(SchemaError::unsupported(other.to_string())),
            }
        }

        catalog.check_unique_names()?;
        Ok(catalog)
    }

    pub fn definitions(&self) -> &[Definition] {
        &self.definitions
    }

    pub fn messages(&self) -> impl Iterator<Item = &MessageSpec> {
        self.definitions.iter().filter_map(|d| match d {
            Definition::Message(message) => Some(message),
            Definition::Enum(_) => None,
        })
    }

    pub fn enums(&self) -> impl Iterator<Item = &EnumSpec> {
        self.definitions.iter().filter_map(|d| match d {
            Definition::Enum(enumeration) => Some(enumeration),
            Definition::Message(_) => None,
        })
    }

    /// Look up a message by wire name
    pub fn message(&self, name: &str) -> Option<&MessageSpec> {
        self.messages().find(|m| m.name == name)
    }

    /// Look up an enum by wire name
    pub fn enumeration(&self, name: &str) -> Option<&EnumSpec> {
        self.enums().find(|e| e.name == name)
    }

    pub fn uses_timestamp(&self) -> bool {
        self.uses_timestamp
    }

    pub fn uses_duration(&self) -> bool {
        self.uses_duration
    }

    // Sanitized identifiers can collide, e.g. a generic `Page_for_User` and a struct of that name
    fn check_unique_names(&self) -> Result<()> {
        let mut names = HashSet::new();
        for definition in &self.definitions {
            if !names.insert(definition.name()) {
                return Err(SchemaError::unsupported(format!(
                    "two types share the wire name '{}'",
                    definition.name()
                )));
            }
        }
        Ok(())
    }
}

/// Complete schema document for one service
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaDocument {
    service: ServiceSpec,
    package: String,
    catalog: Catalog,
}

impl SchemaDocument {
    /// Synthesize the document for `service` using the types collected in `graph`
    pub fn build(graph: &TypeGraph, service: ServiceSpec) -> Result<Self> {
        let mut names = HashSet::new();
        for rpc in &service.rpcs {
            if !names.insert(rpc.name.as_str()) {
                return Err(SchemaError::DuplicateMethod(rpc.name.clone()));
            }
        }

        let seeds = service
            .rpcs
            .iter()
            .flat_map(|rpc| [&rpc.request, &rpc.response]);
        let catalog = Catalog::collect(graph, seeds)?;
        let package = service.package();
        debug!(
            service = %service.name,
            package = %package,
            definitions = catalog.definitions().len(),
            "Built schema document"
        );
        Ok(Self {
            service,
            package,
            catalog,
        })
    }

    pub fn service(&self) -> &ServiceSpec {
        &self.service
    }

    pub fn package(&self) -> &str {
        &self.package
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Fully qualified service name, `package.Service`
    pub fn qualified_service_name(&self) -> String {
        format!("{}.{}", self.package, self.service.name)
    }

    /// Summary suitable for logs and tooling output
    pub fn summary(&self) -> DocumentSummary {
        DocumentSummary {
            service: self.qualified_service_name(),
            methods: self.service.rpcs.iter().map(|r| r.name.clone()).collect(),
            messages: self.catalog.messages().map(|m| m.name.clone()).collect(),
            enums: self.catalog.enums().map(|e| e.name.clone()).collect(),
        }
    }

    /// Render the document text
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("syntax = \"proto3\";\n\n");
        let _ = writeln!(out, "package {};", self.package);
        out.push('\n');

        if self.catalog.uses_timestamp {
            out.push_str("import \"google/protobuf/timestamp.proto\";\n");
        }
        if self.catalog.uses_duration {
            out.push_str("import \"google/protobuf/duration.proto\";\n");
        }
        if self.catalog.uses_timestamp || self.catalog.uses_duration {
            out.push('\n');
        }

        push_comment(&mut out, "", self.service.description.as_deref());
        let _ = writeln!(out, "service {} {{", wire_identifier(&self.service.name));
        for rpc in &self.service.rpcs {
            push_comment(&mut out, "    ", rpc.description.as_deref());
            let request = rpc.request.wire_type_name().unwrap_or_default();
            let response = rpc.response.wire_type_name().unwrap_or_default();
            let stream = if rpc.server_streaming { "stream " } else { "" };
            let _ = writeln!(
                out,
                "    rpc {} ({}) returns ({}{});",
                rpc.name, request, stream, response
            );
        }
        out.push_str("}\n");

        for definition in &self.catalog.definitions {
            out.push('\n');
            match definition {
                Definition::Message(message) => render_message(&mut out, message),
                Definition::Enum(enumeration) => render_enum(&mut out, enumeration),
            }
        }
        out
    }
}

impl fmt::Display for SchemaDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Machine-readable outline of a document
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentSummary {
    pub service: String,
    pub methods: Vec<String>,
    pub messages: Vec<String>,
    pub enums: Vec<String>,
}

/// Assemble a document from typed method signatures
///
/// ```rust,ignore
/// let document = SchemaDocumentBuilder::new("GreeterService")
///     .rpc::<HelloRequest, HelloReply>("SayHello")
///     .build()?;
/// ```
#[derive(Debug)]
pub struct SchemaDocumentBuilder {
    graph: TypeGraph,
    service: ServiceSpec,
}

impl SchemaDocumentBuilder {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            graph: TypeGraph::new(),
            service: ServiceSpec::new(service_name),
        }
    }

    pub fn package(mut self, package: impl Into<String>) -> Self {
        self.service.package = Some(package.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.service.description = Some(description.into());
        self
    }

    /// Add a unary RPC
    pub fn rpc<Req, Resp>(self, name: impl Into<String>) -> Self
    where
        Req: schemars::JsonSchema,
        Resp: schemars::JsonSchema,
    {
        self.push_rpc::<Req, Resp>(name.into(), false)
    }

    /// Add an RPC that streams `Item`s back
    pub fn server_streaming_rpc<Req, Item>(self, name: impl Into<String>) -> Self
    where
        Req: schemars::JsonSchema,
        Item: schemars::JsonSchema,
    {
        self.push_rpc::<Req, Item>(name.into(), true)
    }

    fn push_rpc<Req, Resp>(mut self, name: String, server_streaming: bool) -> Self
    where
        Req: schemars::JsonSchema,
        Resp: schemars::JsonSchema,
    {
        let request = self.graph.add::<Req>();
        let response = self.graph.add::<Resp>();
        self.service.rpcs.push(RpcSpec {
            name,
            request,
            response,
            server_streaming,
            description: None,
        });
        self
    }

    pub fn build(self) -> Result<SchemaDocument> {
        SchemaDocument::build(&self.graph, self.service)
    }
}

fn push_comment(out: &mut String, indent: &str, text: Option<&str>) {
    let Some(text) = text else {
        return;
    };
    for line in text.lines() {
        if line.trim().is_empty() {
            let _ = writeln!(out, "{}//", indent);
        } else {
            let _ = writeln!(out, "{}// {}", indent, line.trim_end());
        }
    }
}

fn push_field_comments(
    out: &mut String,
    indent: &str,
    description: Option<&str>,
    constraints: &[Constraint],
) {
    push_comment(out, indent, description);
    if !constraints.is_empty() {
        let constraints = constraints
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        let _ = writeln!(out, "{}// Constraints: {}", indent, constraints);
    }
}

fn render_field(out: &mut String, indent: &str, field: &FieldSpec) {
    push_field_comments(out, indent, field.description.as_deref(), &field.constraints);
    let _ = writeln!(out, "{}{};", indent, field.declaration());
}

fn render_message(out: &mut String, message: &MessageSpec) {
    push_comment(out, "", message.description.as_deref());
    let _ = writeln!(out, "message {} {{", message.name);
    for item in &message.items {
        match item {
            MessageItem::Field(field) => render_field(out, "    ", field),
            MessageItem::OneOf(oneof) => {
                push_field_comments(
                    out,
                    "    ",
                    oneof.description.as_deref(),
                    &oneof.constraints,
                );
                let _ = writeln!(out, "    oneof {} {{", oneof.name);
                for alternative in &oneof.alternatives {
                    render_field(out, "        ", alternative);
                }
                out.push_str("    }\n");
            }
        }
    }
    out.push_str("}\n");
}

fn render_enum(out: &mut String, enumeration: &EnumSpec) {
    push_comment(out, "", enumeration.description.as_deref());
    let _ = writeln!(out, "enum {} {{", enumeration.name);
    for member in &enumeration.members {
        push_comment(out, "    ", member.description.as_deref());
        let _ = writeln!(out, "    {} = {};", member.name, member.value);
    }
    out.push_str("}\n");
}
