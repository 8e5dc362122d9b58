use thiserror::Error;

#[derive(Debug, Error)]
pub enum TraceError {
    #[error("io error: {0}")]
    Io(String),
    #[error("config parse error: {0}")]
    ConfigParse(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("cli error: {0}")]
    Cli(String),
    #[error("database error: {0}")]
    Database(String),
    #[error("state error: {0}")]
    State(String),
    #[error("run not found: {0}")]
    RunNotFound(String),
    #[error("replay tool calls exceeded recorded tool calls ({recorded} recorded)")]
    ReplayExhausted { recorded: usize },
    #[error("tool name mismatch at replay cursor {cursor}: {recorded} != {requested}")]
    ToolNameMismatch {
        cursor: usize,
        recorded: String,
        requested: String,
    },
    #[error("tool input mismatch at replay cursor {cursor} for tool {name}")]
    ToolInputMismatch { cursor: usize, name: String },
    #[error("archive error: {0}")]
    Archive(String),
}
