//! Conversation Orchestrator - Bounded model/tool negotiation per turn
//!
//! One `ChatSession` per conversation; it owns the message history, the
//! running cost estimate, the model handle, and the tool registry. A turn
//! drives the loop: call the model, append its reply, dispatch at most one
//! tool call, append the result, repeat until the model stops calling tools
//! or the iteration cap is reached. Cap expiry is a defined terminal
//! condition that yields the last assistant text, never an error.

use crate::config::Config;
use crate::llm::{ChatMessage, ChatModel};
use crate::tools::ToolRegistry;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// Session-scoped token and cost estimate. Seeded once from the system
/// prompt, incremented for every assistant message; never decreases.
#[derive(Debug, Clone)]
pub struct CostState {
    tokens: f64,
    ratio: f64,
    price_per_token: f64,
}

impl CostState {
    pub fn new(ratio: f64, price_per_token: f64) -> Self {
        Self {
            tokens: 0.0,
            ratio,
            price_per_token,
        }
    }

    /// Word-count based estimate. This undercounts tool traffic, which is
    /// acceptable for a running readout.
    pub fn charge_text(&mut self, text: &str) {
        self.tokens += text.split_whitespace().count() as f64 * self.ratio;
    }

    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    pub fn cost_usd(&self) -> f64 {
        self.tokens * self.price_per_token
    }
}

pub struct ChatSession {
    id: Uuid,
    system_prompt: String,
    history: Vec<ChatMessage>,
    model: Arc<dyn ChatModel>,
    registry: ToolRegistry,
    max_iterations: usize,
    cost: CostState,
    cancel: CancellationToken,
}

impl ChatSession {
    pub fn new(
        model: Arc<dyn ChatModel>,
        registry: ToolRegistry,
        system_prompt: String,
        config: &Config,
    ) -> Self {
        let mut cost = CostState::new(config.token_length_ratio, config.price_per_token);
        cost.charge_text(&system_prompt);
        Self {
            id: Uuid::new_v4(),
            system_prompt,
            history: Vec::new(),
            model,
            registry,
            max_iterations: config.max_tool_iterations,
            cost,
            cancel: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn cost(&self) -> &CostState {
        &self.cost
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    /// Token a caller can use to abandon the turn between suspension points.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.history.push(ChatMessage::user(content));
    }

    /// Replay an externally supplied message (e.g. a conversation history
    /// posted to the chat endpoint).
    pub fn push_history(&mut self, role: &str, content: &str) {
        self.history.push(ChatMessage {
            role: role.to_string(),
            content: Some(content.to_string()),
            tool_calls: None,
            tool_call_id: None,
        });
    }

    /// Drive the turn to completion and return the final assistant text.
    /// Never fails: once the loop is running every failure mode (sandbox
    /// errors, malformed invocations, model errors, cap expiry, cancellation)
    /// ends the turn with whatever text exists, possibly empty.
    pub async fn complete_turn(&mut self) -> String {
        let tools = [self.registry.describe()];
        let mut last_text = String::new();
        let mut iteration = 0;

        while iteration < self.max_iterations {
            if self.cancel.is_cancelled() {
                warn!("Session {} cancelled before model call", self.id);
                return last_text;
            }

            let reply = match self.model.complete(&self.request_messages(), &tools).await {
                Ok(reply) => reply,
                Err(e) => {
                    warn!("Session {} model call failed, ending turn: {}", self.id, e);
                    return last_text;
                }
            };

            let content = reply.content.clone().unwrap_or_default();
            self.cost.charge_text(&content);
            last_text = content;
            self.history
                .push(ChatMessage::assistant(reply.content, reply.tool_call.clone()));

            let call = match reply.tool_call {
                Some(call) => call,
                None => return last_text,
            };

            if self.cancel.is_cancelled() {
                warn!("Session {} cancelled before tool dispatch", self.id);
                return last_text;
            }

            let result = self.registry.dispatch(&call).await;
            self.history
                .push(ChatMessage::tool(result.call_id, result.content));
            iteration += 1;
        }

        info!(
            "Session {} hit the tool iteration cap ({}); returning best-effort text",
            self.id, self.max_iterations
        );
        last_text
    }

    fn request_messages(&self) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.history.len() + 1);
        messages.push(ChatMessage::system(self.system_prompt.clone()));
        messages.extend(self.history.iter().cloned());
        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CopilotError, Result};
    use crate::llm::AssistantReply;
    use crate::sandbox::SandboxExecutor;
    use crate::tools::{FunctionDefinition, ToolCall, CODE_TOOL_NAME};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    enum ScriptedBehavior {
        AlwaysCallTool,
        Plain(String),
        Fail,
    }

    struct ScriptedModel {
        calls: AtomicUsize,
        behavior: ScriptedBehavior,
    }

    impl ScriptedModel {
        fn always_tool() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                behavior: ScriptedBehavior::AlwaysCallTool,
            }
        }

        fn plain(answer: &str) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                behavior: ScriptedBehavior::Plain(answer.to_string()),
            }
        }

        fn failing() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                behavior: ScriptedBehavior::Fail,
            }
        }

        fn model_calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        async fn complete(
            &self,
            _messages: &[ChatMessage],
            tools: &[FunctionDefinition],
        ) -> Result<AssistantReply> {
            assert_eq!(tools.len(), 1);
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.behavior {
                ScriptedBehavior::AlwaysCallTool => Ok(AssistantReply {
                    content: None,
                    tool_call: Some(ToolCall {
                        id: format!("call_{}", n),
                        name: CODE_TOOL_NAME.to_string(),
                        arguments: r#"{"python_code": "print(1)"}"#.to_string(),
                    }),
                }),
                ScriptedBehavior::Plain(answer) => Ok(AssistantReply {
                    content: Some(answer.clone()),
                    tool_call: None,
                }),
                ScriptedBehavior::Fail => {
                    Err(CopilotError::Llm("LLM API error (503): overloaded".to_string()))
                }
            }
        }
    }

    fn test_config() -> Config {
        let mut config = Config::from_env();
        config.max_tool_iterations = 10;
        config.token_length_ratio = 1.3;
        config.price_per_token = 2.5e-6;
        config
    }

    fn test_registry() -> ToolRegistry {
        // `true` exits 0 regardless of arguments; no interpreter needed.
        ToolRegistry::new(SandboxExecutor::new("true", Duration::from_secs(5)))
    }

    fn session(model: Arc<dyn ChatModel>) -> ChatSession {
        ChatSession::new(
            model,
            test_registry(),
            "You are a supply chain analyst".to_string(),
            &test_config(),
        )
    }

    #[tokio::test]
    async fn always_tool_calling_model_stops_at_the_cap() {
        let model = Arc::new(ScriptedModel::always_tool());
        let mut session = session(model.clone());
        session.push_user("how many items are in stock?");

        let text = session.complete_turn().await;
        assert_eq!(text, "");
        assert_eq!(model.model_calls(), 10);

        let tool_messages = session
            .history()
            .iter()
            .filter(|m| m.role == "tool")
            .count();
        assert_eq!(tool_messages, 10);
        // 1 user + 10 assistant + 10 tool results.
        assert_eq!(session.history().len(), 21);
    }

    #[tokio::test]
    async fn plain_answer_makes_exactly_one_model_call() {
        let model = Arc::new(ScriptedModel::plain("You have 7 suppliers"));
        let mut session = session(model.clone());
        session.push_user("how many suppliers do we have?");

        let text = session.complete_turn().await;
        assert_eq!(text, "You have 7 suppliers");
        assert_eq!(model.model_calls(), 1);
        assert!(session.history().iter().all(|m| m.role != "tool"));
    }

    #[tokio::test]
    async fn model_failure_ends_the_turn_with_best_effort_text() {
        let model = Arc::new(ScriptedModel::failing());
        let mut session = session(model.clone());
        session.push_user("anything");

        let text = session.complete_turn().await;
        assert_eq!(text, "");
        assert_eq!(model.model_calls(), 1);
        // Nothing was appended for the failed call.
        assert_eq!(session.history().len(), 1);
    }

    #[tokio::test]
    async fn cancelled_session_makes_no_model_calls() {
        let model = Arc::new(ScriptedModel::always_tool());
        let mut session = session(model.clone());
        session.push_user("ignore me");
        session.cancellation_token().cancel();

        let text = session.complete_turn().await;
        assert_eq!(text, "");
        assert_eq!(model.model_calls(), 0);
    }

    #[tokio::test]
    async fn cost_is_seeded_and_accumulates_monotonically() {
        let model = Arc::new(ScriptedModel::plain("The answer is 42"));
        let mut session = session(model);

        // Seeded from the 6-word system prompt.
        let seeded = 6.0 * 1.3;
        assert!((session.cost().tokens() - seeded).abs() < 1e-9);

        session.push_user("what is the answer?");
        session.complete_turn().await;
        let after_first = seeded + 4.0 * 1.3;
        assert!((session.cost().tokens() - after_first).abs() < 1e-9);

        session.push_user("again?");
        session.complete_turn().await;
        let after_second = after_first + 4.0 * 1.3;
        assert!((session.cost().tokens() - after_second).abs() < 1e-9);
        assert!(session.cost().cost_usd() > 0.0);
        assert!((session.cost().cost_usd() - after_second * 2.5e-6).abs() < 1e-12);
    }
}
