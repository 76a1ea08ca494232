//! Error types for the generation pipeline.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConvergenceError {
    #[error("Transcript generation failed: {0}")]
    TranscriptGenerationFailed(String),

    #[error("Speech synthesis failed: {0}")]
    SpeechSynthesisFailed(String),

    #[error("Persistence failed: {0}")]
    PersistenceFailed(String),

    #[error("Unexpected error: {0}")]
    Unexpected(String),

    #[error("OpenAI API error: {0}")]
    OpenAIError(#[from] async_openai::error::OpenAIError),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}
