use std::io;
use std::path::Path;

use schemars::{JsonSchema, schema_for};
use serde::Deserialize;
use serde_json::Value;
use thoughtloop_core::tool::{Error as ToolError, Tool, ToolResult};
use tokio::process::Command;

#[derive(Deserialize, JsonSchema)]
pub struct DiagramParameters {
    #[schemars(description = "図のソースコード")]
    code: String,
}

/// How a diagram renderer is invoked.
#[derive(Clone)]
struct Renderer {
    program: String,
    source_suffix: &'static str,
    missing_message: &'static str,
    args: fn(&Path, &Path) -> Vec<String>,
}

impl Renderer {
    async fn render(self, code: String) -> ToolResult {
        let source = tempfile::Builder::new()
            .prefix("diagram-")
            .suffix(self.source_suffix)
            .tempfile()
            .map_err(io_error)?;
        tokio::fs::write(source.path(), code).await.map_err(io_error)?;

        // The rendered image must outlive this call, so it is kept on disk.
        let output = tempfile::Builder::new()
            .prefix("diagram-")
            .suffix(".png")
            .tempfile()
            .map_err(io_error)?
            .into_temp_path()
            .keep()
            .map_err(|err| io_error(err.error))?;

        let result = Command::new(&self.program)
            .args((self.args)(source.path(), &output))
            .output()
            .await;
        let result = match result {
            Ok(result) => result,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                let _ = std::fs::remove_file(&output);
                return Err(ToolError::missing_dependency()
                    .with_reason(self.missing_message));
            }
            Err(err) => {
                let _ = std::fs::remove_file(&output);
                return Err(io_error(err));
            }
        };

        if !result.status.success() {
            let _ = std::fs::remove_file(&output);
            let stderr = String::from_utf8_lossy(&result.stderr);
            let stderr = stderr.trim();
            warn!("{} exited with {}: {stderr}", self.program, result.status);
            return Err(ToolError::execution_error()
                .with_reason(format!("generate diagram: {stderr}")));
        }

        info!("diagram rendered to {}", output.display());
        Ok(output.display().to_string())
    }
}

fn io_error(err: io::Error) -> ToolError {
    ToolError::execution_error().with_reason(format!("generate diagram: {err}"))
}

fn path_arg(path: &Path) -> String {
    path.display().to_string()
}

macro_rules! diagram_tool {
    (
        $(#[$meta:meta])*
        $tool:ident,
        name: $name:literal,
        description: $description:literal,
        program: $program:literal,
        suffix: $suffix:literal,
        missing: $missing:literal,
        args: $args:expr $(,)?
    ) => {
        $(#[$meta])*
        pub struct $tool {
            renderer: Renderer,
            parameter_schema: Value,
        }

        impl $tool {
            /// Creates the tool using the renderer found on `PATH`.
            pub fn new() -> Self {
                Self::with_program($program)
            }

            /// Creates the tool using a specific renderer executable.
            pub fn with_program(program: impl Into<String>) -> Self {
                $tool {
                    renderer: Renderer {
                        program: program.into(),
                        source_suffix: $suffix,
                        missing_message: $missing,
                        args: $args,
                    },
                    parameter_schema: schema_for!(DiagramParameters).to_value(),
                }
            }
        }

        impl Default for $tool {
            #[inline]
            fn default() -> Self {
                Self::new()
            }
        }

        impl Tool for $tool {
            type Input = DiagramParameters;

            fn name(&self) -> &str {
                $name
            }

            fn description(&self) -> &str {
                $description
            }

            fn parameter_schema(&self) -> &Value {
                &self.parameter_schema
            }

            fn execute(
                &self,
                input: DiagramParameters,
            ) -> impl Future<Output = ToolResult> + Send + 'static {
                self.renderer.clone().render(input.code)
            }
        }
    };
}

diagram_tool! {
    /// A tool that renders Graphviz DOT sources to PNG images.
    GraphvizTool,
    name: "create_graphviz_diagram",
    description: "DOT言語から図を生成する。フローチャート等に適している。",
    program: "dot",
    suffix: ".dot",
    missing: "graphviz 'dot' command not found.",
    args: |source, output| {
        vec!["-Tpng".into(), path_arg(source), "-o".into(), path_arg(output)]
    },
}

diagram_tool! {
    /// A tool that renders Mermaid sources to PNG images.
    MermaidTool,
    name: "create_mermaid_diagram",
    description: "Mermaid markdown-like codeから図を生成する。シーケンス図、ガントチャート等に適している。",
    program: "mmdc",
    suffix: ".mmd",
    missing: "mmdc command not found. Install @mermaid-js/mermaid-cli.",
    args: |source, output| {
        vec!["-i".into(), path_arg(source), "-o".into(), path_arg(output)]
    },
}
