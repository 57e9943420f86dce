//! Tool Registry - The single code-execution capability exposed to the model
//!
//! Declares exactly one callable tool and dispatches invocations of it to the
//! sandbox. Malformed invocations (unparsable payload, missing field, wrong
//! tool name) are converted into failure-outcome results rather than faults,
//! so the model can correct itself on the next iteration.

use crate::sandbox::SandboxExecutor;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

/// Name of the one declared capability.
pub const CODE_TOOL_NAME: &str = "run_supply_analysis";

const CODE_TOOL_DESCRIPTION: &str = "Runs Python analysis code against the persisted supply-chain \
tables and returns whatever the code prints. Each call runs in a fresh process: redo all imports \
and reload the tables every time. The code must end with a print statement of the result.";

/// Function-shaped tool description for the model request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// A model-issued invocation of a declared tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Opaque JSON argument payload, exactly as returned by the model.
    pub arguments: String,
}

/// Result of dispatching one tool call, appended to the conversation as a
/// tool-role message before the next model call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub call_id: String,
    pub content: String,
}

#[derive(Clone)]
pub struct ToolRegistry {
    executor: SandboxExecutor,
}

impl ToolRegistry {
    pub fn new(executor: SandboxExecutor) -> Self {
        Self { executor }
    }

    /// The single declared capability, in the shape the model request embeds.
    pub fn describe(&self) -> FunctionDefinition {
        FunctionDefinition {
            name: CODE_TOOL_NAME.to_string(),
            description: CODE_TOOL_DESCRIPTION.to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "python_code": {
                        "type": "string",
                        "description": "Python code (pandas and numpy only) to execute. \
Must end with a print statement of the result."
                    }
                },
                "required": ["python_code"]
            }),
        }
    }

    /// Dispatch one invocation. The result content echoes the code alongside
    /// the execution result so the model sees what actually ran.
    pub async fn dispatch(&self, call: &ToolCall) -> ToolCallResult {
        let code = match self.extract_code(call) {
            Ok(code) => code,
            Err(diagnostic) => {
                return ToolCallResult {
                    call_id: call.id.clone(),
                    content: json!({
                        "python_code": Value::Null,
                        "result": diagnostic,
                    })
                    .to_string(),
                }
            }
        };

        debug!("Dispatching sandbox execution ({} bytes of code)", code.len());
        let outcome = self.executor.execute(&code).await;
        let result = if outcome.success {
            outcome.output
        } else {
            format!("Error executing the code: {}", outcome.output)
        };

        ToolCallResult {
            call_id: call.id.clone(),
            content: json!({
                "python_code": code,
                "result": result,
            })
            .to_string(),
        }
    }

    fn extract_code(&self, call: &ToolCall) -> std::result::Result<String, String> {
        if call.name != CODE_TOOL_NAME {
            return Err(format!(
                "Unknown tool '{}'; the only available tool is '{}'",
                call.name, CODE_TOOL_NAME
            ));
        }
        let payload: Value = serde_json::from_str(&call.arguments)
            .map_err(|e| format!("Malformed tool arguments: {}", e))?;
        payload
            .get("python_code")
            .and_then(Value::as_str)
            .map(|code| code.to_string())
            .ok_or_else(|| "Missing required field 'python_code'".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn registry() -> ToolRegistry {
        // `true` exits 0 and ignores its arguments, so dispatch paths can be
        // exercised without a Python interpreter.
        ToolRegistry::new(SandboxExecutor::new("true", Duration::from_secs(5)))
    }

    fn call(name: &str, arguments: &str) -> ToolCall {
        ToolCall {
            id: "call_1".to_string(),
            name: name.to_string(),
            arguments: arguments.to_string(),
        }
    }

    #[test]
    fn describe_declares_the_single_code_parameter() {
        let definition = registry().describe();
        assert_eq!(definition.name, CODE_TOOL_NAME);
        assert_eq!(definition.parameters["required"], json!(["python_code"]));
        assert!(definition.parameters["properties"]["python_code"].is_object());
    }

    #[tokio::test]
    async fn malformed_payload_becomes_failure_result() {
        let result = registry().dispatch(&call(CODE_TOOL_NAME, "{not json")).await;
        assert_eq!(result.call_id, "call_1");
        let content: Value = serde_json::from_str(&result.content).unwrap();
        assert!(content["result"]
            .as_str()
            .unwrap()
            .contains("Malformed tool arguments"));
    }

    #[tokio::test]
    async fn missing_field_becomes_failure_result() {
        let result = registry().dispatch(&call(CODE_TOOL_NAME, "{}")).await;
        let content: Value = serde_json::from_str(&result.content).unwrap();
        assert!(content["result"]
            .as_str()
            .unwrap()
            .contains("python_code"));
    }

    #[tokio::test]
    async fn unknown_tool_name_becomes_failure_result() {
        let result = registry()
            .dispatch(&call("drop_all_tables", r#"{"python_code": "print(1)"}"#))
            .await;
        let content: Value = serde_json::from_str(&result.content).unwrap();
        assert!(content["result"].as_str().unwrap().contains("Unknown tool"));
    }

    #[tokio::test]
    async fn wellformed_call_echoes_the_code() {
        let result = registry()
            .dispatch(&call(CODE_TOOL_NAME, r#"{"python_code": "print(1)"}"#))
            .await;
        let content: Value = serde_json::from_str(&result.content).unwrap();
        assert_eq!(content["python_code"], json!("print(1)"));
    }
}
