use thiserror::Error;

/// PULSE 统一错误类型
#[derive(Error, Debug)]
pub enum PulseError {
    #[error("Rule evaluation error: {0}")]
    RuleEvaluation(String),

    #[error("Template not found: {0}")]
    MissingTemplate(String),

    #[error("No handler registered for channel: {0}")]
    MissingHandler(String),

    #[error("Delivery error: {0}")]
    Delivery(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, PulseError>;
