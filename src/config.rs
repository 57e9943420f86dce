//! Configuration - Environment-backed settings collected once per process
//!
//! Read from the environment (a `.env` file is honored by the binaries) into
//! an explicit struct that is passed around by reference. There are no
//! process-wide configuration globals.

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub openai_model: String,
    pub gateway_base_url: String,
    pub gateway_ai_key: String,
    pub gateway_user_id: String,
    pub data_dir: PathBuf,
    pub python_bin: String,
    pub sandbox_timeout_secs: u64,
    pub max_tool_iterations: usize,
    pub token_length_ratio: f64,
    pub price_per_token: f64,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            openai_api_key: env_or("OPENAI_API_KEY", "dummy-api-key"),
            openai_base_url: env_or("OPENAI_BASE_URL", "https://api.openai.com/v1"),
            openai_model: env_or("OPENAI_MODEL", "gpt-4o"),
            gateway_base_url: env_or("GATEWAY_BASE_URL", "https://gateway-dev.supplyz.tech"),
            gateway_ai_key: env_or("GATEWAY_AI_KEY", "randomAIKey"),
            gateway_user_id: env_or("GATEWAY_USER_ID", "670175884b923eac46d240f3"),
            data_dir: PathBuf::from(env_or("DATA_DIR", "data")),
            python_bin: env_or("PYTHON_BIN", "python3"),
            sandbox_timeout_secs: env_parsed("SANDBOX_TIMEOUT_SECS", 30),
            max_tool_iterations: env_parsed("MAX_TOOL_ITERATIONS", 10),
            token_length_ratio: env_parsed("TOKEN_LENGTH_RATIO", 1.3),
            price_per_token: env_parsed("PRICE_PER_TOKEN", 2.5e-6),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
