//! LLM Client - OpenAI-compatible chat completions with tool support
//!
//! The orchestrator depends on the `ChatModel` trait so that the loop can be
//! exercised against scripted models in tests. `LlmClient` is the production
//! implementation: one blocking (from the loop's perspective) request per
//! model call, the single declared tool attached, parallel tool calls
//! disabled. At most one tool call per reply is honored even if the provider
//! returns more.

use crate::error::{CopilotError, Result};
use crate::tools::{FunctionDefinition, ToolCall};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Message in chat-completions format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String, // "system", "user", "assistant", "tool"
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn assistant(content: Option<String>, tool_call: Option<ToolCall>) -> Self {
        Self {
            role: "assistant".to_string(),
            content,
            tool_calls: tool_call.map(|call| vec![call]),
            tool_call_id: None,
        }
    }

    pub fn tool(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: "tool".to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(call_id.into()),
        }
    }
}

/// One model reply: optional text plus the single honored tool call.
#[derive(Debug, Clone)]
pub struct AssistantReply {
    pub content: Option<String>,
    pub tool_call: Option<ToolCall>,
}

/// The model capability the orchestrator drives.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[FunctionDefinition],
    ) -> Result<AssistantReply>;
}

#[derive(Clone)]
pub struct LlmClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl LlmClient {
    pub fn new(api_key: String, model: String, base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            base_url,
            model,
        }
    }

    fn build_messages(messages: &[ChatMessage]) -> Vec<Value> {
        messages
            .iter()
            .map(|m| {
                let mut msg = serde_json::json!({
                    "role": m.role,
                    "content": m.content,
                });
                if let Some(ref calls) = m.tool_calls {
                    let calls: Vec<Value> = calls
                        .iter()
                        .map(|call| {
                            serde_json::json!({
                                "id": call.id,
                                "type": "function",
                                "function": {
                                    "name": call.name,
                                    "arguments": call.arguments,
                                },
                            })
                        })
                        .collect();
                    msg["tool_calls"] = Value::Array(calls);
                }
                if let Some(ref call_id) = m.tool_call_id {
                    msg["tool_call_id"] = serde_json::json!(call_id);
                }
                msg
            })
            .collect()
    }

    fn build_tools(tools: &[FunctionDefinition]) -> Vec<Value> {
        tools
            .iter()
            .map(|f| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": f.name,
                        "description": f.description,
                        "parameters": f.parameters,
                    },
                })
            })
            .collect()
    }

    fn parse_reply(message: &Value) -> Result<AssistantReply> {
        let content = message
            .get("content")
            .and_then(Value::as_str)
            .map(|s| s.to_string());

        let mut tool_call = None;
        if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
            if calls.len() > 1 {
                // Single-tool-call policy: only the first returned call is
                // honored, strictly sequentially.
                warn!("Model returned {} tool calls; honoring the first", calls.len());
            }
            if let Some(first) = calls.first() {
                let id = first["id"]
                    .as_str()
                    .ok_or_else(|| CopilotError::Llm("No id in tool call".to_string()))?
                    .to_string();
                let name = first["function"]["name"]
                    .as_str()
                    .ok_or_else(|| CopilotError::Llm("No function name in tool call".to_string()))?
                    .to_string();
                let arguments = first["function"]["arguments"]
                    .as_str()
                    .ok_or_else(|| CopilotError::Llm("No arguments in tool call".to_string()))?
                    .to_string();
                tool_call = Some(ToolCall {
                    id,
                    name,
                    arguments,
                });
            }
        }

        Ok(AssistantReply { content, tool_call })
    }
}

#[async_trait]
impl ChatModel for LlmClient {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[FunctionDefinition],
    ) -> Result<AssistantReply> {
        // Offline mode for local runs without an API key.
        if self.api_key == "dummy-api-key" {
            return Ok(AssistantReply {
                content: Some(
                    "No LLM configured. Set OPENAI_API_KEY to enable analysis.".to_string(),
                ),
                tool_call: None,
            });
        }

        let body = serde_json::json!({
            "model": self.model,
            "messages": Self::build_messages(messages),
            "tools": Self::build_tools(tools),
            "tool_choice": "auto",
            "parallel_tool_calls": false,
            "temperature": 0.0,
        });

        let response = self
            .http
            .post(&format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| CopilotError::Llm(format!("LLM API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(CopilotError::Llm(format!(
                "LLM API error ({}): {}",
                status, error_text
            )));
        }

        let response_json: Value = response
            .json()
            .await
            .map_err(|e| CopilotError::Llm(format!("Failed to parse LLM response: {}", e)))?;

        if let Some(error) = response_json.get("error") {
            return Err(CopilotError::Llm(format!(
                "LLM API error: {}",
                serde_json::to_string(error).unwrap_or_else(|_| "Unknown error".to_string())
            )));
        }

        let choices = response_json
            .get("choices")
            .and_then(Value::as_array)
            .ok_or_else(|| CopilotError::Llm("No choices array in LLM response".to_string()))?;
        if choices.is_empty() {
            return Err(CopilotError::Llm(
                "Empty choices array in LLM response".to_string(),
            ));
        }

        Self::parse_reply(&choices[0]["message"])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_reply_honors_only_the_first_tool_call() {
        let message = json!({
            "content": null,
            "tool_calls": [
                {"id": "a", "function": {"name": "run_supply_analysis", "arguments": "{}"}},
                {"id": "b", "function": {"name": "run_supply_analysis", "arguments": "{}"}}
            ]
        });
        let reply = LlmClient::parse_reply(&message).unwrap();
        assert_eq!(reply.tool_call.unwrap().id, "a");
        assert!(reply.content.is_none());
    }

    #[test]
    fn parse_reply_without_tool_calls() {
        let message = json!({"content": "done"});
        let reply = LlmClient::parse_reply(&message).unwrap();
        assert_eq!(reply.content.as_deref(), Some("done"));
        assert!(reply.tool_call.is_none());
    }

    #[test]
    fn tool_messages_serialize_with_call_id() {
        let rendered = LlmClient::build_messages(&[ChatMessage::tool("call_9", "{\"result\":\"3\"}")]);
        assert_eq!(rendered[0]["tool_call_id"], json!("call_9"));
        assert_eq!(rendered[0]["role"], json!("tool"));
    }

    #[test]
    fn assistant_tool_calls_serialize_as_function_entries() {
        let call = ToolCall {
            id: "call_1".to_string(),
            name: "run_supply_analysis".to_string(),
            arguments: "{\"python_code\":\"print(1)\"}".to_string(),
        };
        let rendered = LlmClient::build_messages(&[ChatMessage::assistant(None, Some(call))]);
        assert_eq!(rendered[0]["tool_calls"][0]["type"], json!("function"));
        assert_eq!(
            rendered[0]["tool_calls"][0]["function"]["name"],
            json!("run_supply_analysis")
        );
        assert_eq!(rendered[0]["content"], Value::Null);
    }
}
