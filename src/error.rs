use thiserror::Error;

#[derive(Error, Debug)]
pub enum CopilotError {
    #[error("Fetch error: {0}")]
    Fetch(String),

    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Polars error: {0}")]
    Polars(String),
}

pub type Result<T> = std::result::Result<T, CopilotError>;
