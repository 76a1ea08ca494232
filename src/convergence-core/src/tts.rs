//! TTS module for speech synthesis over an OpenAI-compatible API.

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use crate::config::ServiceConfig;
use crate::error::ConvergenceError;
use crate::llm::build_http_client;

/// Turns one line of text into one encoded audio clip.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Returns the complete clip; nothing is streamed to the caller.
    async fn synthesize(
        &self,
        text: &str,
        voice_id: &str,
        credential: Option<&str>,
    ) -> Result<Vec<u8>, ConvergenceError>;
}

#[derive(Debug, Serialize)]
struct SpeechRequestBody<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    response_format: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    instructions: Option<&'a str>,
}

/// Container requested from the speech service. Stitching relies on the
/// fixed 44-byte PCM header.
pub const SPEECH_FORMAT: &str = "wav";

/// [`SpeechSynthesizer`] backed by the `/audio/speech` endpoint.
pub struct OpenAiSpeechSynthesizer {
    http_client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    instructions: Option<String>,
}

impl OpenAiSpeechSynthesizer {
    pub fn new(
        service: &ServiceConfig,
        api_key: impl Into<String>,
    ) -> Result<Self, ConvergenceError> {
        Ok(Self {
            http_client: build_http_client(service)?,
            endpoint: format!("{}/audio/speech", service.api_base.trim_end_matches('/')),
            api_key: api_key.into(),
            model: service.speech_model.clone(),
            instructions: service.speech_instructions.clone(),
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for OpenAiSpeechSynthesizer {
    async fn synthesize(
        &self,
        text: &str,
        voice_id: &str,
        credential: Option<&str>,
    ) -> Result<Vec<u8>, ConvergenceError> {
        let body = SpeechRequestBody {
            model: &self.model,
            input: text,
            voice: voice_id,
            response_format: SPEECH_FORMAT,
            instructions: self.instructions.as_deref(),
        };

        let response = self
            .http_client
            .post(&self.endpoint)
            .bearer_auth(credential.unwrap_or(&self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| ConvergenceError::SpeechSynthesisFailed(format!("Request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ConvergenceError::SpeechSynthesisFailed(format!(
                "Speech service returned {}: {}",
                status,
                detail.trim()
            )));
        }

        let audio = response.bytes().await.map_err(|e| {
            ConvergenceError::SpeechSynthesisFailed(format!("Failed to read audio body: {}", e))
        })?;

        if audio.is_empty() {
            return Err(ConvergenceError::SpeechSynthesisFailed(
                "Speech service returned no audio".to_string(),
            ));
        }

        debug!(voice = voice_id, bytes = audio.len(), "speech clip received");
        Ok(audio.to_vec())
    }
}
