//! Configuration module for loading TOML settings files.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConvergenceError;
use crate::retry::RetryPolicy;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub service: ServiceConfig,
    pub voices: VoicesConfig,
    pub retry: RetryConfig,
    pub output: OutputConfig,
    pub prompts: PromptsConfig,
}

/// Endpoint and model selection for the external services.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// OpenAI-compatible API base URL.
    pub api_base: String,
    pub transcript_model: String,
    pub speech_model: String,
    /// Ask the chat endpoint for a JSON object reply. Turn off for servers
    /// that reject `response_format`.
    pub json_replies: bool,
    /// Optional delivery hint forwarded with every speech request.
    pub speech_instructions: Option<String>,
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            transcript_model: "gpt-4o-mini".to_string(),
            speech_model: "tts-1".to_string(),
            json_replies: true,
            speech_instructions: None,
            request_timeout_secs: 120,
            connect_timeout_secs: 30,
        }
    }
}

/// Voice pools for speaker assignment.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VoicesConfig {
    /// Female-presenting voices.
    pub female: Vec<String>,
    /// Voices for every other declared gender.
    pub male: Vec<String>,
}

impl Default for VoicesConfig {
    fn default() -> Self {
        Self {
            female: ["coral", "fable", "nova", "sage", "shimmer"]
                .into_iter()
                .map(String::from)
                .collect(),
            male: ["alloy", "ash", "ballad", "echo", "onyx"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

/// Per-stage retry budgets.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub transcript_attempts: u32,
    pub audio_attempts: u32,
    pub save_attempts: u32,
    /// Length of one backoff time unit in milliseconds.
    pub time_unit_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            transcript_attempts: 3,
            audio_attempts: 2,
            save_attempts: 2,
            time_unit_ms: 1000,
        }
    }
}

impl RetryConfig {
    pub fn time_unit(&self) -> Duration {
        Duration::from_millis(self.time_unit_ms)
    }

    pub fn transcript_policy(&self) -> RetryPolicy {
        RetryPolicy::exponential(self.transcript_attempts, self.time_unit())
    }

    pub fn audio_policy(&self) -> RetryPolicy {
        RetryPolicy::exponential(self.audio_attempts, self.time_unit())
    }

    pub fn save_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.save_attempts, self.time_unit())
    }
}

/// Where generated artifacts land.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub directory: PathBuf,
    /// Extension of the audio container requested from the speech service.
    pub extension: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("output"),
            extension: "wav".to_string(),
        }
    }
}

/// Prompt templates for the text-generation service.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PromptsConfig {
    pub system: String,
    /// Per-turn request. Placeholders: `{turn}`, `{total}`, `{topic}`,
    /// `{vibe}`, `{outline}`, `{context}`.
    pub turn_template: String,
    /// Appended to the request for the last turn.
    pub closing_instruction: String,
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            system: DEFAULT_SYSTEM_PROMPT.to_string(),
            turn_template: DEFAULT_TURN_TEMPLATE.to_string(),
            closing_instruction: DEFAULT_CLOSING_INSTRUCTION.to_string(),
        }
    }
}

impl PromptsConfig {
    /// Render the request for one turn, with placeholders replaced.
    pub fn render_turn(
        &self,
        turn: usize,
        total: usize,
        topic: &str,
        vibe: &str,
        outline: Option<&str>,
        context: &str,
    ) -> String {
        let outline_block = match outline {
            Some(text) if !text.trim().is_empty() => {
                format!("- Follow this outline where it fits:\n'''\n{}\n'''\n", text.trim())
            }
            _ => String::new(),
        };

        let mut rendered = self
            .turn_template
            .replace("{turn}", &turn.to_string())
            .replace("{total}", &total.to_string())
            .replace("{topic}", topic)
            .replace("{vibe}", vibe)
            .replace("{outline}", &outline_block)
            .replace("{context}", context);

        if turn == total {
            rendered.push('\n');
            rendered.push_str(&self.closing_instruction);
        }

        rendered
    }
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConvergenceError> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            ConvergenceError::ConfigError(format!("Failed to read config: {}", e))
        })?;

        Self::from_str(&content)
    }

    /// Load settings from string content.
    pub fn from_str(content: &str) -> Result<Self, ConvergenceError> {
        let settings: Settings = toml::from_str(content)
            .map_err(|e| ConvergenceError::ConfigError(format!("Failed to parse config: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConvergenceError> {
        if self.voices.female.is_empty() || self.voices.male.is_empty() {
            return Err(ConvergenceError::ConfigError(
                "Both voice pools need at least one voice".to_string(),
            ));
        }

        let retry = &self.retry;
        if retry.transcript_attempts == 0 || retry.audio_attempts == 0 || retry.save_attempts == 0
        {
            return Err(ConvergenceError::ConfigError(
                "Retry budgets must allow at least one attempt".to_string(),
            ));
        }

        // Clips are requested and stitched as WAV.
        if !self.output.extension.trim().eq_ignore_ascii_case("wav") {
            return Err(ConvergenceError::ConfigError(format!(
                "Output extension must be wav, got '{}'",
                self.output.extension
            )));
        }

        Ok(())
    }
}

const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful assistant that generates realistic conversation transcripts in JSON format.";

const DEFAULT_TURN_TEMPLATE: &str = r#"Generate the transcript item for segment {turn} of {total}.
Return ONLY a JSON object in the following format:
{
    "timestamp": "2025-07-07T09:00:24",
    "name": "Speaker Name",
    "gender": "male or female",
    "role": "Their Role",
    "message": "What they say in this segment"
}

Context:
- Vibe: '{vibe}'
- Prompt: '{topic}'
- This is part of a conversation between two people
- Make the dialogue natural and engaging
{outline}
Last 5 transcript items:
'''
{context}
'''

Generate the next dialogue turn as JSON.
"#;

const DEFAULT_CLOSING_INSTRUCTION: &str = "This is the final segment and it must end the conversation.
Make sure the ending is smooth and not abrupt, and keep the same JSON format.";
