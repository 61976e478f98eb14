//! Server configuration

use std::path::PathBuf;

pub const PACKAGE_ENV: &str = "MODELRPC_PACKAGE";
pub const OUT_DIR_ENV: &str = "MODELRPC_OUT_DIR";
pub const PROTOC_ENV: &str = "MODELRPC_PROTOC";
pub const SKIP_GENERATION_ENV: &str = "MODELRPC_SKIP_GENERATION";

/// Settings for building services
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Package for every generated document; wins over [`Service::package`](crate::Service::package)
    pub package: Option<String>,
    /// Where the schema document and compiler outputs go. Nothing touches the
    /// filesystem when unset.
    pub out_dir: Option<PathBuf>,
    /// Schema compiler program
    pub protoc: String,
    /// Reuse the document already in `out_dir` instead of generating and compiling
    pub skip_generation: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            package: None,
            out_dir: None,
            protoc: "protoc".to_string(),
            skip_generation: false,
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read `MODELRPC_*` environment variables over the defaults
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let package = lookup(PACKAGE_ENV).filter(|s| !s.trim().is_empty());
        let out_dir = lookup(OUT_DIR_ENV)
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);
        let protoc = lookup(PROTOC_ENV)
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(defaults.protoc);
        let skip_generation = lookup(SKIP_GENERATION_ENV)
            .map(|s| parse_flag(&s))
            .unwrap_or(false);

        Self {
            package,
            out_dir,
            protoc,
            skip_generation,
        }
    }

    pub fn with_package(mut self, package: impl Into<String>) -> Self {
        self.package = Some(package.into());
        self
    }

    pub fn with_out_dir(mut self, out_dir: impl Into<PathBuf>) -> Self {
        self.out_dir = Some(out_dir.into());
        self
    }

    pub fn with_protoc(mut self, protoc: impl Into<String>) -> Self {
        self.protoc = protoc.into();
        self
    }

    pub fn with_skip_generation(mut self, skip: bool) -> Self {
        self.skip_generation = skip;
        self
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_env() {
        let config = ServerConfig::from_lookup(lookup(&[]));
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.protoc, "protoc");
        assert!(!config.skip_generation);
    }

    #[test]
    fn test_env_overrides() {
        let config = ServerConfig::from_lookup(lookup(&[
            (PACKAGE_ENV, "olympics.v2"),
            (OUT_DIR_ENV, "/tmp/protos"),
            (PROTOC_ENV, "/usr/local/bin/protoc"),
            (SKIP_GENERATION_ENV, "TRUE"),
        ]));
        assert_eq!(config.package.as_deref(), Some("olympics.v2"));
        assert_eq!(config.out_dir, Some(PathBuf::from("/tmp/protos")));
        assert_eq!(config.protoc, "/usr/local/bin/protoc");
        assert!(config.skip_generation);
    }

    #[test]
    fn test_skip_flag_parsing() {
        for (value, expected) in [("1", true), ("yes", true), ("false", false), ("nope", false)] {
            let config = ServerConfig::from_lookup(lookup(&[(SKIP_GENERATION_ENV, value)]));
            assert_eq!(config.skip_generation, expected, "value {value}");
        }
    }

    #[test]
    fn test_builder_setters() {
        let config = ServerConfig::new()
            .with_package("greeter.v1")
            .with_out_dir("generated")
            .with_protoc("protoc-25")
            .with_skip_generation(true);
        assert_eq!(config.package.as_deref(), Some("greeter.v1"));
        assert_eq!(config.out_dir, Some(PathBuf::from("generated")));
        assert_eq!(config.protoc, "protoc-25");
        assert!(config.skip_generation);
    }
}
