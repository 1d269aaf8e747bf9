/// Shared error type used across all Alfred crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A ref the LLM emitted is not present in the session registry.
    #[error("unknown ref: {0}")]
    UnknownRef(String),

    /// A delete would hit a user-owned table without any filter.
    #[error("unsafe delete on table {table}: no filters after scoping")]
    UnsafeDelete { table: String },

    /// Unsupported operator or malformed filter value.
    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    /// LLM output failed structured validation after the bounded retry.
    #[error("schema mismatch for {node}: {message}")]
    SchemaMismatch { node: String, message: String },

    /// More than the allowed number of tool calls in one step.
    /// Recoverable: the executor forces step completion.
    #[error("tool call cap exceeded in step {step}")]
    ToolCapExceeded { step: usize },

    /// The LLM declared the step blocked.
    #[error("step blocked ({reason_code}): {details}")]
    BlockedStep {
        reason_code: String,
        details: String,
    },

    /// The user asked for a write but only reads were executed.
    /// Surfaced in the reply, never fatal.
    #[error("action mismatch: requested {requested}, executed {executed}")]
    ActionMismatch {
        requested: String,
        executed: String,
    },

    /// The database adapter failed.
    #[error("adapter: {0}")]
    AdapterFailure(String),

    /// The turn was cancelled; nothing is persisted.
    #[error("cancelled")]
    Cancelled,

    #[error("config: {0}")]
    Config(String),

    #[error("LLM: {0}")]
    Llm(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Errors the Act loop absorbs instead of aborting the turn:
    /// blocked steps and mismatches are surfaced to the user, the tool
    /// cap forces completion, and bad refs, filters, or params are fed
    /// back as structured tool results for the model to correct.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::ToolCapExceeded { .. }
                | Error::BlockedStep { .. }
                | Error::ActionMismatch { .. }
                | Error::UnknownRef(_)
                | Error::InvalidFilter(_)
                | Error::Json(_)
        )
    }
}
