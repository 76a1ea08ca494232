//! Convergence Core Library
//!
//! Generates multi-speaker audio conversations: a transcript is built turn
//! by turn with a text-generation service, each turn is voiced by a speech
//! service, and the clips are stitched into one WAV file. When audio cannot
//! be produced the transcript is saved instead.

pub mod audio;
pub mod config;
pub mod conversation;
pub mod error;
pub mod llm;
pub mod orchestrator;
pub mod output;
pub mod retry;
pub mod transcript;
pub mod tts;
pub mod voice;

pub use config::Settings;
pub use conversation::{
    Conversation, Gender, GenerationConfig, GenerationResult, OutputKind, Transcript,
    TranscriptItem,
};
pub use error::ConvergenceError;
pub use llm::{ChatPrompt, OpenAiTextGenerator, TextGenerator};
pub use orchestrator::{GenerationEvent, GenerationOrchestrator, PipelineStage};
pub use retry::{RetryPolicy, retry_with_backoff};
pub use transcript::{TranscriptSynthesizer, TurnLoop};
pub use tts::{OpenAiSpeechSynthesizer, SpeechSynthesizer};
pub use voice::SpeakerVoiceAssigner;
