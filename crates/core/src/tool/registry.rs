use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use serde_json::{Map, Value};
use thoughtloop_model::ModelTool;
use tracing::Instrument;

use super::Tool;
use super::object::{ToolObject, ToolObjectImpl};

/// A set of uniquely named tools and the dispatcher over them.
///
/// Dispatching is total: every failure, including unknown names, malformed
/// arguments and panicking tools, is rendered into the returned observation
/// text.
#[derive(Clone, Default)]
pub struct Registry {
    tools: Vec<Arc<dyn ToolObject>>,
}

impl Registry {
    /// Creates an empty registry.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool. Names must be unique.
    pub fn register<T: Tool>(&mut self, tool: T) -> Result<(), crate::Error> {
        if self.contains(tool.name()) {
            return Err(crate::Error::DuplicateTool(tool.name().to_owned()));
        }
        debug!("registered tool: {}", tool.name());
        self.tools.push(Arc::new(ToolObjectImpl(tool)));
        Ok(())
    }

    /// Returns the number of registered tools.
    #[inline]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Returns `true` if no tool is registered.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Returns `true` if a tool named `name` is registered.
    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Returns the tool declarations to send to the model.
    pub fn definitions(&self) -> Vec<ModelTool> {
        self.tools
            .iter()
            .map(|tool| ModelTool {
                name: tool.name().to_owned(),
                description: tool.description().to_owned(),
                parameters: tool.parameter_schema().clone(),
            })
            .collect()
    }

    /// Returns the catalog used by text prompts, one `- name: description`
    /// line per tool in registration order.
    pub fn catalog(&self) -> String {
        self.tools
            .iter()
            .map(|tool| format!("- {}: {}", tool.name(), tool.description().trim()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Executes `name` with a JSON argument text as produced by the model.
    ///
    /// An empty argument text is treated as an empty object.
    pub async fn execute(&self, name: &str, raw_args: &str) -> String {
        let Some(tool) = self.get(name) else {
            warn!("tool not found: {name}");
            return format!("Unknown tool: {name}");
        };
        let raw_args = raw_args.trim();
        let arguments = if raw_args.is_empty() {
            Value::Object(Map::new())
        } else {
            match serde_json::from_str::<Value>(raw_args) {
                Ok(arguments) => arguments,
                Err(err) => {
                    debug!("malformed arguments for {name}: {raw_args}");
                    return format!("Invalid arguments for {name}: {err}");
                }
            }
        };
        Self::run(tool, name, arguments).await
    }

    /// Executes `name` with a single free-form input, as captured from a
    /// text action line.
    ///
    /// A JSON object input is passed through. Any other input is bound to the
    /// tool's only required parameter (or its only parameter).
    pub async fn execute_text(&self, name: &str, input: &str) -> String {
        let Some(tool) = self.get(name) else {
            warn!("tool not found: {name}");
            return format!("Unknown tool: {name}");
        };
        let arguments = match serde_json::from_str::<Value>(input.trim()) {
            Ok(Value::Object(map)) => Value::Object(map),
            _ => {
                let mut map = Map::new();
                let key = primary_parameter(tool.parameter_schema())
                    .unwrap_or("input");
                map.insert(key.to_owned(), Value::String(input.to_owned()));
                Value::Object(map)
            }
        };
        Self::run(tool, name, arguments).await
    }

    fn get(&self, name: &str) -> Option<&Arc<dyn ToolObject>> {
        self.tools.iter().find(|tool| tool.name() == name)
    }

    async fn run(tool: &Arc<dyn ToolObject>, name: &str, arguments: Value) -> String {
        trace!("executing {name} with args: {arguments}");
        let fut = match std::panic::catch_unwind(AssertUnwindSafe(|| {
            tool.execute(arguments)
        })) {
            Ok(fut) => fut,
            Err(_) => {
                error!("tool {name} panicked");
                return format!("Failed to run {name}: the tool panicked");
            }
        };
        let result = AssertUnwindSafe(fut)
            .catch_unwind()
            .instrument(debug_span!("tool execute", tool = name))
            .await;
        match result {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => {
                debug!("tool {name} failed: {err}");
                err.to_observation(name)
            }
            Err(_) => {
                error!("tool {name} panicked");
                format!("Failed to run {name}: the tool panicked")
            }
        }
    }
}

fn primary_parameter(schema: &Value) -> Option<&str> {
    let required = schema.get("required").and_then(Value::as_array);
    if let Some([only]) = required.map(Vec::as_slice) {
        return only.as_str();
    }
    let properties = schema.get("properties").and_then(Value::as_object)?;
    let mut keys = properties.keys();
    match (keys.next(), keys.next()) {
        (Some(only), None) => Some(only.as_str()),
        _ => required.and_then(|r| r.first()).and_then(Value::as_str),
    }
}
