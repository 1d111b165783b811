use thiserror::Error;

#[derive(Error, Debug)]
pub enum Nl2SqlError {
    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Database error: {0}")]
    Db(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Judge error: {0}")]
    Judge(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Nl2SqlError>;
