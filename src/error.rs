pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid exam content: {0}")]
    InvalidContent(String),

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("Exam not found: {0}")]
    ExamNotFound(String),

    #[error("Exam duration must be greater than zero")]
    InvalidDuration,

    #[error("Cannot {action} while the attempt is {phase}")]
    InvalidTransition {
        phase: &'static str,
        action: &'static str,
    },

    #[error("Block index out of range: {0}")]
    BlockOutOfRange(usize),

    #[error("Unknown question: {0}")]
    UnknownQuestion(String),

    #[error("Saved attempt no longer matches the exam content: {0}")]
    ResumeMismatch(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
