//! HTTP Server for the supply-chain copilot
//! Simple HTTP shell using tokio and basic HTTP handling: POST /chat runs a
//! full conversation turn, GET /ping is the liveness probe.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use supply_copilot::config::Config;
use supply_copilot::dataset::DatasetStore;
use supply_copilot::fetch::GatewayClient;
use supply_copilot::llm::{ChatModel, LlmClient};
use supply_copilot::orchestrator::ChatSession;
use supply_copilot::prompts::render_system_prompt;
use supply_copilot::sandbox::SandboxExecutor;
use supply_copilot::tools::ToolRegistry;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{timeout, Duration};
use tracing::{error, info, warn};

#[derive(Debug, Deserialize)]
struct HistoryMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    conversation_history: Vec<HistoryMessage>,
}

#[derive(Debug, Serialize)]
struct ChatResponse {
    response: String,
}

/// Everything a connection needs, shared read-only across handlers. The
/// dataset is refreshed once at startup and frozen afterwards.
struct ServerContext {
    config: Config,
    system_prompt: String,
    model: Arc<dyn ChatModel>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "supply_copilot=info,server=info".into()),
        )
        .init();

    let config = Config::from_env();
    info!("Starting supply-copilot API server");
    if config.openai_api_key == "dummy-api-key" {
        warn!("OPENAI_API_KEY not set - responses will be fallbacks");
    }

    let mut store = DatasetStore::open(&config.data_dir)?;
    let gateway = GatewayClient::new(
        config.gateway_base_url.clone(),
        config.gateway_ai_key.clone(),
        config.gateway_user_id.clone(),
    );
    store.refresh(&gateway).await?;
    let system_prompt = render_system_prompt(&store);

    let model: Arc<dyn ChatModel> = Arc::new(LlmClient::new(
        config.openai_api_key.clone(),
        config.openai_model.clone(),
        config.openai_base_url.clone(),
    ));
    let context = Arc::new(ServerContext {
        config,
        system_prompt,
        model,
    });

    let listener = TcpListener::bind("0.0.0.0:8080").await?;
    info!("Server listening on port 8080");

    loop {
        let (stream, addr) = listener.accept().await?;
        info!("New connection from {}", addr);
        let context = Arc::clone(&context);
        tokio::spawn(handle_connection(stream, context));
    }
}

async fn handle_connection(mut stream: TcpStream, context: Arc<ServerContext>) {
    // Read the request with a timeout to prevent hanging connections.
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 8192];

    let read_result = timeout(Duration::from_secs(5), async {
        loop {
            match stream.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => {
                    buffer.extend_from_slice(&chunk[..n]);
                    if let Ok(s) = std::str::from_utf8(&buffer) {
                        if let Some(headers_end) = s.find("\r\n\r\n") {
                            let body_len = extract_content_length(s).unwrap_or(0);
                            if buffer.len() >= headers_end + 4 + body_len {
                                break;
                            }
                        }
                    }
                    if buffer.len() > 1_000_000 {
                        break;
                    }
                }
                Err(e) => {
                    error!("Failed to read from stream: {}", e);
                    return Err(e);
                }
            }
        }
        Ok(())
    })
    .await;

    if read_result.is_err() {
        warn!("Request read timeout");
        return;
    }
    if buffer.is_empty() {
        return;
    }

    match String::from_utf8(buffer) {
        Ok(request) => {
            let response = handle_request(&request, &context).await;
            if let Err(e) = stream.write_all(response.as_bytes()).await {
                error!("Failed to write response: {}", e);
            }
        }
        Err(e) => error!("Failed to parse request as UTF-8: {}", e),
    }
}

fn extract_content_length(request: &str) -> Option<usize> {
    for line in request.lines() {
        if line.to_lowercase().starts_with("content-length:") {
            if let Some(value) = line.split(':').nth(1) {
                return value.trim().parse().ok();
            }
        }
    }
    None
}

async fn handle_request(request: &str, context: &ServerContext) -> String {
    let request_line = match request.lines().next() {
        Some(line) => line,
        None => return create_response(400, "Bad Request", "{}"),
    };
    let parts: Vec<&str> = request_line.split_whitespace().collect();
    if parts.len() < 2 {
        return create_response(400, "Bad Request", "{}");
    }
    let method = parts[0];
    let path = parts[1].trim_end_matches('/');
    let path = if path.is_empty() { "/" } else { path };

    match (method, path) {
        ("GET", "/ping") => create_response(200, "OK", r#"{"message":"pong"}"#),
        ("POST", "/chat") => {
            let body = request
                .split_once("\r\n\r\n")
                .map(|(_, body)| body)
                .unwrap_or("");
            match serde_json::from_str::<ChatRequest>(body) {
                Ok(chat_request) => run_chat_turn(chat_request, context).await,
                Err(e) => create_response(
                    400,
                    "Bad Request",
                    &serde_json::json!({"detail": format!("Invalid request body: {}", e)})
                        .to_string(),
                ),
            }
        }
        _ => create_response(404, "Not Found", r#"{"detail":"Not found"}"#),
    }
}

async fn run_chat_turn(request: ChatRequest, context: &ServerContext) -> String {
    let registry = ToolRegistry::new(SandboxExecutor::new(
        context.config.python_bin.clone(),
        Duration::from_secs(context.config.sandbox_timeout_secs),
    ));
    let mut session = ChatSession::new(
        Arc::clone(&context.model),
        registry,
        context.system_prompt.clone(),
        &context.config,
    );
    for message in &request.conversation_history {
        session.push_history(&message.role, &message.content);
    }

    let text = session.complete_turn().await;
    info!(
        "Session {} finished (tokens ~{:.0})",
        session.id(),
        session.cost().tokens()
    );
    match serde_json::to_string(&ChatResponse { response: text }) {
        Ok(body) => create_response(200, "OK", &body),
        Err(e) => {
            error!("Failed to serialize chat response: {}", e);
            create_response(
                500,
                "Internal Server Error",
                &serde_json::json!({"detail": e.to_string()}).to_string(),
            )
        }
    }
}

fn create_response(status: u16, status_text: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {} {}\r\n\
         Content-Type: application/json\r\n\
         Content-Length: {}\r\n\
         \r\n\
         {}",
        status,
        status_text,
        body.len(),
        body
    )
}
