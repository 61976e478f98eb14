//! Converter registry
//!
//! Owns the synthesized catalogs and memoizes one converter per `(scope, type)`.
//! Constructed once at startup and shared by reference with every adapter.

use std::collections::HashMap;
use std::sync::Arc;

use modelrpc_schema::{Catalog, TypeRef};
use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::Result;
use crate::converter::{Converter, ConverterBuilder, MessageFactory};
use crate::error::ConvertError;
use crate::value::{WireMessage, WireValue};

type CacheKey = (String, TypeRef);

#[derive(Debug, Default)]
pub struct ConverterRegistry {
    catalogs: RwLock<HashMap<String, Arc<Catalog>>>,
    cache: RwLock<HashMap<CacheKey, Converter>>,
}

impl ConverterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the catalog that types under `scope` resolve against
    ///
    /// Re-registering a scope drops the converters built from the old catalog.
    pub fn register(&self, scope: impl Into<String>, catalog: &Catalog) {
        let scope = scope.into();
        self.cache.write().retain(|(s, _), _| *s != scope);
        debug!(
            scope = %scope,
            definitions = catalog.definitions().len(),
            "Registered catalog"
        );
        self.catalogs.write().insert(scope, Arc::new(catalog.clone()));
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.catalogs.read().contains_key(scope)
    }

    /// Number of memoized converters
    pub fn cached(&self) -> usize {
        self.cache.read().len()
    }

    /// Converter for `ty`, built on first use
    pub fn converter(&self, scope: &str, ty: &TypeRef) -> Result<Converter> {
        let key = (scope.to_string(), ty.clone());
        if let Some(converter) = self.cache.read().get(&key) {
            return Ok(converter.clone());
        }

        let catalog = self
            .catalogs
            .read()
            .get(scope)
            .cloned()
            .ok_or_else(|| ConvertError::UnknownType(format!("no catalog for '{}'", scope)))?;
        // Racing builders produce equivalent converters, the first one stored wins
        let converter = ConverterBuilder::new(&catalog).build(ty)?;
        debug!(scope = %scope, ty = %ty, "Built converter");
        Ok(self.cache.write().entry(key).or_insert(converter).clone())
    }

    /// Serialize a native value and convert it to wire form
    pub fn to_wire<T: Serialize>(
        &self,
        scope: &str,
        ty: &TypeRef,
        value: &T,
        factory: &dyn MessageFactory,
    ) -> Result<WireValue> {
        let native =
            serde_json::to_value(value).map_err(|e| ConvertError::Serialize(e.to_string()))?;
        self.converter(scope, ty)?.to_wire(&native, factory)
    }

    /// Like [`to_wire`](Self::to_wire) for record types
    pub fn to_wire_message<T: Serialize>(
        &self,
        scope: &str,
        ty: &TypeRef,
        value: &T,
        factory: &dyn MessageFactory,
    ) -> Result<WireMessage> {
        self.to_wire(scope, ty, value, factory)?.into_message()
    }

    /// Convert a wire value to native form and deserialize it
    ///
    /// Deserialization failures are reported as [`ConvertError::Validation`].
    pub fn from_wire<T: DeserializeOwned>(
        &self,
        scope: &str,
        ty: &TypeRef,
        value: &WireValue,
    ) -> Result<T> {
        let native = self.converter(scope, ty)?.from_wire(value)?;
        Ok(serde_json::from_value(native)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PlainFactory;
    use modelrpc_schema::SchemaDocumentBuilder;
    use schemars::JsonSchema;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
    struct Ping {
        count: u32,
    }

    fn registry() -> ConverterRegistry {
        let document = SchemaDocumentBuilder::new("Pinger")
            .rpc::<Ping, Ping>("Ping")
            .build()
            .unwrap();
        let registry = ConverterRegistry::new();
        registry.register("pinger.v1.Pinger", document.catalog());
        registry
    }

    #[test]
    fn test_converters_are_memoized() {
        let registry = registry();
        let ty = TypeRef::Record("Ping".to_string());
        registry.converter("pinger.v1.Pinger", &ty).unwrap();
        registry.converter("pinger.v1.Pinger", &ty).unwrap();
        assert_eq!(registry.cached(), 1);
    }

    #[test]
    fn test_unknown_scope() {
        let registry = registry();
        let ty = TypeRef::Record("Ping".to_string());
        assert!(matches!(
            registry.converter("other.v1.Other", &ty),
            Err(ConvertError::UnknownType(_))
        ));
    }

    #[test]
    fn test_typed_round_trip() {
        let registry = registry();
        let ty = TypeRef::Record("Ping".to_string());
        let wire = registry
            .to_wire("pinger.v1.Pinger", &ty, &Ping { count: 3 }, &PlainFactory)
            .unwrap();
        let back: Ping = registry.from_wire("pinger.v1.Pinger", &ty, &wire).unwrap();
        assert_eq!(back, Ping { count: 3 });
    }

    #[test]
    fn test_deserialize_failure_is_validation() {
        #[derive(Debug, Deserialize)]
        #[serde(deny_unknown_fields)]
        #[allow(dead_code)]
        struct Strict {
            total: u32,
        }

        let registry = registry();
        let ty = TypeRef::Record("Ping".to_string());
        let wire = WireValue::Message(WireMessage::new("Ping"));
        let result: Result<Strict> = registry.from_wire("pinger.v1.Pinger", &ty, &wire);
        assert!(result.is_err_and(|e| e.is_validation()));
    }
}
