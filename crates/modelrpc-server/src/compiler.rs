//! Schema compiler boundary
//!
//! Writes the rendered document to `<out_dir>/<service>.proto` and runs the
//! external compiler over it, once per [`Invocation`]. Invocation arguments are
//! templates: `{out}` is the output directory, `{stem}` the file stem and
//! `{proto}` the document path.

use std::path::{Path, PathBuf};
use std::process::Command;

use modelrpc_schema::SchemaDocument;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::{FrameworkError, Result};

/// One run of the compiler program
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub args: Vec<String>,
    /// File the run must leave behind, templated like the arguments
    pub output: String,
}

impl Invocation {
    pub fn new<I, A>(args: I, output: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            output: output.into(),
        }
    }

    /// Message type descriptors, with their imports
    pub fn messages() -> Self {
        Self::new(
            [
                "-I{out}",
                "--descriptor_set_out={out}/{stem}.binpb",
                "--include_imports",
                "{proto}",
            ],
            "{out}/{stem}.binpb",
        )
    }

    /// Service descriptors, with source info for the RPC comments
    pub fn services() -> Self {
        Self::new(
            [
                "-I{out}",
                "--descriptor_set_out={out}/{stem}_service.binpb",
                "--include_source_info",
                "{proto}",
            ],
            "{out}/{stem}_service.binpb",
        )
    }
}

struct Paths<'a> {
    out: &'a Path,
    stem: &'a str,
    proto: &'a Path,
}

impl Paths<'_> {
    fn expand(&self, template: &str) -> String {
        template
            .replace("{out}", &self.out.display().to_string())
            .replace("{stem}", self.stem)
            .replace("{proto}", &self.proto.display().to_string())
    }
}

/// Runs the external compiler for one output directory
#[derive(Debug, Clone)]
pub struct ProtoCompiler {
    program: String,
    out_dir: PathBuf,
    invocations: Vec<Invocation>,
    skip_generation: bool,
}

impl ProtoCompiler {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: "protoc".to_string(),
            out_dir: out_dir.into(),
            invocations: vec![Invocation::messages(), Invocation::services()],
            skip_generation: false,
        }
    }

    /// `None` when the configuration has no output directory
    pub fn from_config(config: &ServerConfig) -> Option<Self> {
        let out_dir = config.out_dir.as_ref()?;
        Some(
            Self::new(out_dir)
                .program(config.protoc.clone())
                .skip_generation(config.skip_generation),
        )
    }

    pub fn program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn invocations(mut self, invocations: Vec<Invocation>) -> Self {
        self.invocations = invocations;
        self
    }

    pub fn skip_generation(mut self, skip: bool) -> Self {
        self.skip_generation = skip;
        self
    }

    /// Path the document for `document` is written to
    pub fn proto_path(&self, document: &SchemaDocument) -> PathBuf {
        self.out_dir.join(format!("{}.proto", file_stem(document)))
    }

    /// Write and compile `document`, returning the document path
    pub fn compile(&self, document: &SchemaDocument) -> Result<PathBuf> {
        let proto = self.proto_path(document);
        let rendered = document.render();

        if self.skip_generation {
            return self.reuse(&proto, &rendered);
        }

        std::fs::create_dir_all(&self.out_dir)?;
        std::fs::write(&proto, &rendered)?;
        debug!(path = %proto.display(), "Wrote schema document");

        let stem = file_stem(document);
        let paths = Paths {
            out: &self.out_dir,
            stem: &stem,
            proto: &proto,
        };
        for invocation in &self.invocations {
            self.run(invocation, &paths)?;
        }

        info!(
            service = %document.qualified_service_name(),
            path = %proto.display(),
            "Compiled schema document"
        );
        Ok(proto)
    }

    fn reuse(&self, proto: &Path, rendered: &str) -> Result<PathBuf> {
        let existing = std::fs::read_to_string(proto).map_err(|e| {
            FrameworkError::compiler(format!(
                "generation is skipped but {} cannot be read: {}",
                proto.display(),
                e
            ))
        })?;
        if existing != rendered {
            warn!(
                path = %proto.display(),
                "Existing schema document differs from the current models"
            );
        }
        info!(path = %proto.display(), "Skipped schema generation");
        Ok(proto.to_path_buf())
    }

    fn run(&self, invocation: &Invocation, paths: &Paths<'_>) -> Result<()> {
        let args: Vec<String> = invocation.args.iter().map(|a| paths.expand(a)).collect();
        debug!(program = %self.program, args = ?args, "Running schema compiler");

        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .map_err(|e| {
                FrameworkError::compiler(format!("failed to run '{}': {}", self.program, e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FrameworkError::compiler(format!(
                "'{}' exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        let expected = PathBuf::from(paths.expand(&invocation.output));
        if !expected.exists() {
            return Err(FrameworkError::compiler(format!(
                "'{}' produced no {}",
                self.program,
                expected.display()
            )));
        }
        Ok(())
    }
}

fn file_stem(document: &SchemaDocument) -> String {
    document.service().name.to_lowercase()
}

#[cfg(all(test, unix))]
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

    fn document() -> SchemaDocument {
        SchemaDocumentBuilder::new("GreeterService")
            .rpc::<HelloRequest, HelloReply>("SayHello")
            .build()
            .unwrap()
    }

    fn touching(output: &str) -> Invocation {
        Invocation::new(["-c", "touch \"$0\"", output], output)
    }

    #[test]
    fn test_writes_document_and_runs_every_invocation() {
        let dir = tempfile::tempdir().unwrap();
        let compiler = ProtoCompiler::new(dir.path()).program("sh").invocations(vec![
            touching("{out}/{stem}.binpb"),
            touching("{out}/{stem}_service.binpb"),
        ]);

        let proto = compiler.compile(&document()).unwrap();
        assert_eq!(proto, dir.path().join("greeterservice.proto"));
        assert_eq!(std::fs::read_to_string(&proto).unwrap(), document().render());
        assert!(dir.path().join("greeterservice.binpb").exists());
        assert!(dir.path().join("greeterservice_service.binpb").exists());
    }

    #[test]
    fn test_non_zero_exit_fails() {
        let dir = tempfile::tempdir().unwrap();
        let compiler = ProtoCompiler::new(dir.path())
            .program("sh")
            .invocations(vec![Invocation::new(["-c", "echo broken >&2; exit 3"], "{proto}")]);

        let Err(FrameworkError::Compiler(message)) = compiler.compile(&document()) else {
            panic!("Expected a compiler failure");
        };
        assert!(message.contains("broken"));
    }

    #[test]
    fn test_missing_output_fails() {
        let dir = tempfile::tempdir().unwrap();
        let compiler = ProtoCompiler::new(dir.path())
            .program("sh")
            .invocations(vec![Invocation::new(["-c", "true"], "{out}/{stem}.binpb")]);

        let Err(FrameworkError::Compiler(message)) = compiler.compile(&document()) else {
            panic!("Expected a compiler failure");
        };
        assert!(message.contains("produced no"));
    }

    #[test]
    fn test_missing_program_fails() {
        let dir = tempfile::tempdir().unwrap();
        let compiler = ProtoCompiler::new(dir.path()).program("modelrpc-no-such-compiler");
        assert!(matches!(
            compiler.compile(&document()),
            Err(FrameworkError::Compiler(_))
        ));
    }

    #[test]
    fn test_skip_requires_existing_document() {
        let dir = tempfile::tempdir().unwrap();
        let compiler = ProtoCompiler::new(dir.path())
            .program("modelrpc-no-such-compiler")
            .skip_generation(true);

        assert!(matches!(
            compiler.compile(&document()),
            Err(FrameworkError::Compiler(_))
        ));

        std::fs::write(dir.path().join("greeterservice.proto"), document().render()).unwrap();
        let proto = compiler.compile(&document()).unwrap();
        assert_eq!(proto, dir.path().join("greeterservice.proto"));
    }

    #[test]
    fn test_from_config_needs_out_dir() {
        assert!(ProtoCompiler::from_config(&ServerConfig::default()).is_none());
        let config = ServerConfig::default().with_out_dir("generated");
        let compiler = ProtoCompiler::from_config(&config).unwrap();
        assert_eq!(compiler.invocations.len(), 2);
    }
}
