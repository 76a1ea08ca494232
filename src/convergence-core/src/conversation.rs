//! Conversation data model.
//!
//! A [`Conversation`] pairs the [`Transcript`] with the [`GenerationConfig`]
//! that produced it. Its JSON form is the document written when audio cannot
//! be produced, and the document accepted for re-rendering later.

use chrono::{DateTime, NaiveDateTime};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::ConvergenceError;

/// Stored in place of the credential in saved documents.
pub const CREDENTIAL_ENV_MARKER: &str = "$env.OPENAI_API_KEY";

/// Environment variable the marker refers to.
pub const CREDENTIAL_ENV_VAR: &str = "OPENAI_API_KEY";

pub const MIN_DURATION_MINUTES: u32 = 1;
pub const MAX_DURATION_MINUTES: u32 = 60;

/// Inputs for one generation run.
#[derive(Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// The conversation topic.
    pub prompt: String,
    /// Target length in minutes.
    #[serde(rename = "duration")]
    pub duration_minutes: u32,
    /// Conversation style.
    #[serde(default = "default_vibe")]
    pub vibe: String,
    #[serde(default)]
    pub output_path: Option<PathBuf>,
    #[serde(default, rename = "openai_api_key")]
    pub api_key: Option<String>,
    /// Plain-text outline used as generation context.
    #[serde(default)]
    pub outline: Option<String>,
    /// Where the outline came from (file path or URL).
    #[serde(default)]
    pub outline_source: Option<String>,
}

fn default_vibe() -> String {
    "NA".to_string()
}

impl GenerationConfig {
    pub fn new(prompt: impl Into<String>, duration_minutes: u32) -> Result<Self, ConvergenceError> {
        let config = Self {
            prompt: prompt.into(),
            duration_minutes,
            vibe: default_vibe(),
            output_path: None,
            api_key: None,
            outline: None,
            outline_source: None,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_vibe(mut self, vibe: impl Into<String>) -> Self {
        self.vibe = vibe.into();
        self
    }

    pub fn with_outline(mut self, outline: impl Into<String>, source: impl Into<String>) -> Self {
        self.outline = Some(outline.into());
        self.outline_source = Some(source.into());
        self
    }

    pub fn with_output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = Some(path.into());
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn validate(&self) -> Result<(), ConvergenceError> {
        if !(MIN_DURATION_MINUTES..=MAX_DURATION_MINUTES).contains(&self.duration_minutes) {
            return Err(ConvergenceError::ConfigError(format!(
                "Duration must be between {} and {} minutes, got {}",
                MIN_DURATION_MINUTES, MAX_DURATION_MINUTES, self.duration_minutes
            )));
        }
        if self.prompt.trim().is_empty() {
            return Err(ConvergenceError::ConfigError(
                "Prompt cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Copy safe to persist: the credential is replaced by the env marker.
    pub fn redacted(&self) -> Self {
        Self {
            api_key: Some(CREDENTIAL_ENV_MARKER.to_string()),
            ..self.clone()
        }
    }
}

impl fmt::Debug for GenerationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationConfig")
            .field("prompt", &self.prompt)
            .field("duration_minutes", &self.duration_minutes)
            .field("vibe", &self.vibe)
            .field("output_path", &self.output_path)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("outline", &self.outline.as_ref().map(|o| o.len()))
            .field("outline_source", &self.outline_source)
            .finish()
    }
}

/// Declared gender of a speaker; selects the voice pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    /// Anything other than "female" lands in the male pool.
    pub fn parse_lenient(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("female") {
            Gender::Female
        } else {
            Gender::Male
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
        }
    }
}

impl Serialize for Gender {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Gender {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Gender::parse_lenient(&raw))
    }
}

/// One turn of the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptItem {
    /// Speaker name.
    pub name: String,
    pub gender: Gender,
    /// Speaker role; metadata only.
    pub role: String,
    pub message: String,
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub timestamp: Option<NaiveDateTime>,
}

/// Accepted timestamp layouts: ISO `T`-separated or space-separated, with
/// optional fractional seconds.
const TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .or_else(|| {
            DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|dt| dt.naive_local())
        })
}

fn deserialize_timestamp<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<NaiveDateTime>, D::Error> {
    match Option::<String>::deserialize(deserializer)? {
        None => Ok(None),
        Some(raw) => parse_timestamp(&raw)
            .map(Some)
            .ok_or_else(|| D::Error::custom(format!("invalid timestamp '{}'", raw))),
    }
}

/// Ordered turns of a conversation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub items: Vec<TranscriptItem>,
}

impl Transcript {
    pub fn new(items: Vec<TranscriptItem>) -> Self {
        Self { items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Check the invariants audio synthesis relies on.
    pub fn validate(&self) -> Result<(), ConvergenceError> {
        if self.items.is_empty() {
            return Err(ConvergenceError::ConfigError(
                "Transcript has no items".to_string(),
            ));
        }

        for (idx, item) in self.items.iter().enumerate() {
            if item.name.trim().is_empty() || item.message.trim().is_empty() {
                return Err(ConvergenceError::ConfigError(format!(
                    "Transcript item {} needs a speaker name and a message",
                    idx
                )));
            }
        }

        let out_of_order = self.items.windows(2).position(|pair| {
            matches!((pair[0].timestamp, pair[1].timestamp), (Some(a), Some(b)) if b < a)
        });
        if let Some(idx) = out_of_order {
            return Err(ConvergenceError::ConfigError(format!(
                "Transcript item {} is timestamped before its predecessor",
                idx + 1
            )));
        }

        Ok(())
    }
}

/// A transcript together with the config that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub transcript: Transcript,
    pub config: GenerationConfig,
}

impl Conversation {
    pub fn new(transcript: Transcript, config: GenerationConfig) -> Self {
        Self { transcript, config }
    }

    /// Parse a saved conversation document.
    ///
    /// A credential equal to [`CREDENTIAL_ENV_MARKER`] is resolved through
    /// `lookup`, which receives [`CREDENTIAL_ENV_VAR`].
    pub fn from_json_str<F>(content: &str, lookup: F) -> Result<Self, ConvergenceError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut conversation: Conversation = serde_json::from_str(content)?;

        if conversation.config.api_key.as_deref() == Some(CREDENTIAL_ENV_MARKER) {
            conversation.config.api_key = lookup(CREDENTIAL_ENV_VAR);
        }

        conversation.config.validate()?;
        conversation.transcript.validate()?;
        Ok(conversation)
    }

    /// Read a saved conversation, resolving the credential from the process environment.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConvergenceError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&content, |name| std::env::var(name).ok())
    }

    /// Pretty JSON with the credential replaced by the env marker.
    pub fn to_redacted_json(&self) -> Result<String, ConvergenceError> {
        let redacted = Conversation {
            transcript: self.transcript.clone(),
            config: self.config.redacted(),
        };
        Ok(serde_json::to_string_pretty(&redacted)?)
    }
}

/// Which kind of artifact a run produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    Audio,
    Transcript,
}

/// Outcome of one pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationResult {
    pub success: bool,
    pub output_path: Option<PathBuf>,
    pub output_kind: Option<OutputKind>,
    pub elapsed_seconds: Option<u64>,
    pub transcript: Option<Transcript>,
    pub error: Option<String>,
}

impl GenerationResult {
    pub fn audio(path: PathBuf, elapsed_seconds: u64, transcript: Transcript) -> Self {
        Self {
            success: true,
            output_path: Some(path),
            output_kind: Some(OutputKind::Audio),
            elapsed_seconds: Some(elapsed_seconds),
            transcript: Some(transcript),
            error: None,
        }
    }

    pub fn transcript_only(
        path: PathBuf,
        elapsed_seconds: u64,
        transcript: Transcript,
        note: Option<String>,
    ) -> Self {
        Self {
            success: true,
            output_path: Some(path),
            output_kind: Some(OutputKind::Transcript),
            elapsed_seconds: Some(elapsed_seconds),
            transcript: Some(transcript),
            error: note,
        }
    }

    pub fn failure(error: impl Into<String>, transcript: Option<Transcript>) -> Self {
        Self {
            success: false,
            output_path: None,
            output_kind: None,
            elapsed_seconds: None,
            transcript,
            error: Some(error.into()),
        }
    }

    /// Succeeded, but through a fallback.
    pub fn is_degraded(&self) -> bool {
        self.success && self.error.is_some()
    }
}
