//! Compiled-binding boundary

use std::collections::{HashMap, HashSet};

use modelrpc_schema::SchemaDocument;
use modelrpc_wire::{ConvertError, MessageFactory, WireMessage, WireValue};

/// What the dispatch adapter needs from compiled schema bindings
///
/// Message construction comes from the [`MessageFactory`] supertrait.
pub trait CompiledBinding: MessageFactory {
    fn service_name(&self) -> &str;

    fn package(&self) -> &str;

    /// `name` is the wire method name
    fn has_method(&self, name: &str) -> bool;

    fn qualified_name(&self) -> String {
        format!("{}.{}", self.package(), self.service_name())
    }
}

/// Binding backed by the synthesized document itself
///
/// Used once the external compiler accepted the document, or when compilation
/// is skipped. It knows exactly the messages and fields the document declares.
#[derive(Debug, Clone)]
pub struct DescriptorBinding {
    service: String,
    package: String,
    methods: HashSet<String>,
    messages: HashMap<String, HashSet<String>>,
}

impl DescriptorBinding {
    pub fn new(document: &SchemaDocument) -> Self {
        let messages = document
            .catalog()
            .messages()
            .map(|message| {
                let fields = message.fields().map(|f| f.name.clone()).collect();
                (message.name.clone(), fields)
            })
            .collect();

        Self {
            service: document.service().name.clone(),
            package: document.package().to_string(),
            methods: document
                .service()
                .rpcs
                .iter()
                .map(|rpc| rpc.name.clone())
                .collect(),
            messages,
        }
    }

    pub fn has_message(&self, type_name: &str) -> bool {
        self.messages.contains_key(type_name)
    }
}

impl MessageFactory for DescriptorBinding {
    fn new_message(
        &self,
        type_name: &str,
        fields: Vec<(String, WireValue)>,
    ) -> modelrpc_wire::Result<WireMessage> {
        let known = self
            .messages
            .get(type_name)
            .ok_or_else(|| ConvertError::UnknownType(type_name.to_string()))?;

        let mut message = WireMessage::new(type_name);
        for (name, value) in fields {
            if !known.contains(&name) {
                return Err(ConvertError::UnknownField {
                    message: type_name.to_string(),
                    field: name,
                });
            }
            message.set(name, value);
        }
        Ok(message)
    }
}

impl CompiledBinding for DescriptorBinding {
    fn service_name(&self) -> &str {
        &self.service
    }

    fn package(&self) -> &str {
        &self.package
    }

    fn has_method(&self, name: &str) -> bool {
        self.methods.contains(name)
    }
}

#[cfg(test)]
mod tests {
    use modelrpc_schema::SchemaDocumentBuilder;
    use schemars::JsonSchema;
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Serialize, Deserialize, JsonSchema)]
    struct HelloRequest {
        name: String,
    }

    #[derive(Serialize, Deserialize, JsonSchema)]
    struct HelloReply {
        greeting: String,
    }

    fn binding() -> DescriptorBinding {
        let document = SchemaDocumentBuilder::new("GreeterService")
            .rpc::<HelloRequest, HelloReply>("SayHello")
            .build()
            .unwrap();
        DescriptorBinding::new(&document)
    }

    #[test]
    fn test_binding_names() {
        let binding = binding();
        assert_eq!(binding.qualified_name(), "greeter.v1.GreeterService");
        assert!(binding.has_method("SayHello"));
        assert!(!binding.has_method("say_hello"));
        assert!(binding.has_message("HelloReply"));
    }

    #[test]
    fn test_new_message_checks_fields() {
        let binding = binding();
        let message = binding
            .new_message(
                "HelloReply",
                vec![("greeting".into(), WireValue::String("hi".into()))],
            )
            .unwrap();
        assert_eq!(message.get("greeting"), Some(&WireValue::String("hi".into())));

        let result = binding.new_message(
            "HelloReply",
            vec![("farewell".into(), WireValue::String("bye".into()))],
        );
        assert!(matches!(result, Err(ConvertError::UnknownField { .. })));

        let result = binding.new_message("Goodbye", Vec::new());
        assert!(matches!(result, Err(ConvertError::UnknownType(_))));
    }
}
