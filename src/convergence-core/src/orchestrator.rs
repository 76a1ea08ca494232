//! Generation orchestration.
//!
//! Sequences transcript generation, speech synthesis and persistence, with a
//! retry budget per stage and a transcript-only fallback when audio cannot
//! be produced. Every entry point returns a [`GenerationResult`]; errors are
//! reported in the result rather than returned.

use chrono::{Local, NaiveDateTime};
use futures::FutureExt;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::audio::{stitch, wav_duration_secs};
use crate::config::Settings;
use crate::conversation::{Conversation, GenerationConfig, GenerationResult, Transcript};
use crate::error::ConvergenceError;
use crate::llm::TextGenerator;
use crate::output::{
    default_audio_path, default_transcript_path, fallback_transcript_path, write_artifact,
};
use crate::retry::{RetryPolicy, retry_with_backoff};
use crate::transcript::TranscriptSynthesizer;
use crate::tts::SpeechSynthesizer;
use crate::voice::SpeakerVoiceAssigner;

/// Pipeline states, in the order a run moves through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Idle,
    TranscriptPending,
    TranscriptReady,
    AudioPending,
    AudioReady,
    AudioFailed,
    Persisted,
    TranscriptOnlyPersisted,
    Done,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::Idle => "idle",
            PipelineStage::TranscriptPending => "transcript pending",
            PipelineStage::TranscriptReady => "transcript ready",
            PipelineStage::AudioPending => "audio pending",
            PipelineStage::AudioReady => "audio ready",
            PipelineStage::AudioFailed => "audio failed",
            PipelineStage::Persisted => "persisted",
            PipelineStage::TranscriptOnlyPersisted => "transcript only persisted",
            PipelineStage::Done => "done",
        };
        f.write_str(name)
    }
}

/// Callback for generation events.
pub type GenerationCallback = Box<dyn Fn(GenerationEvent) + Send + Sync>;

/// Events emitted during a run.
#[derive(Debug, Clone)]
pub enum GenerationEvent {
    /// The pipeline moved to a new state.
    StageEntered(PipelineStage),
    /// A stage is starting an attempt (zero-based).
    AttemptStarted {
        stage: PipelineStage,
        attempt: u32,
        max_attempts: u32,
    },
    /// A transcript turn was accepted.
    TurnGenerated {
        index: usize,
        total: usize,
        speaker: String,
        message: String,
    },
    /// One line of the transcript has audio.
    LineSynthesized {
        index: usize,
        total: usize,
        speaker: String,
        voice: String,
    },
    /// The run reached its terminal state.
    Finished { success: bool, degraded: bool },
}

/// Runs the generation pipeline against injected service clients.
pub struct GenerationOrchestrator {
    text: Arc<dyn TextGenerator>,
    speech: Arc<dyn SpeechSynthesizer>,
    settings: Settings,
    /// Fixed seed for voice assignment; random per run when unset.
    voice_seed: Option<u64>,
    callback: Option<GenerationCallback>,
}

impl GenerationOrchestrator {
    pub fn new(
        text: Arc<dyn TextGenerator>,
        speech: Arc<dyn SpeechSynthesizer>,
        settings: Settings,
    ) -> Self {
        Self {
            text,
            speech,
            settings,
            voice_seed: None,
            callback: None,
        }
    }

    /// Set a callback for generation events.
    pub fn with_callback(mut self, callback: GenerationCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Make voice assignment reproducible.
    pub fn with_voice_seed(mut self, seed: u64) -> Self {
        self.voice_seed = Some(seed);
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Generate a transcript, render it to audio and save it.
    ///
    /// Falls back to saving the transcript as JSON when audio fails.
    pub async fn generate(&self, config: GenerationConfig) -> GenerationResult {
        let started = Instant::now();
        self.enter(PipelineStage::Idle);
        let result = self.guarded(self.run_pipeline(config, started)).await;
        self.finish(result)
    }

    /// Generate a transcript only and save it as a conversation document.
    pub async fn generate_transcript_only(&self, config: GenerationConfig) -> GenerationResult {
        let started = Instant::now();
        self.enter(PipelineStage::Idle);
        let result = self.guarded(self.run_transcript_only(config, started)).await;
        self.finish(result)
    }

    /// Render and save a pre-built conversation.
    ///
    /// Audio failure is a hard failure here; there is no fallback document.
    pub async fn render_conversation(&self, conversation: Conversation) -> GenerationResult {
        let started = Instant::now();
        self.enter(PipelineStage::TranscriptReady);
        let result = self.guarded(self.run_render(conversation, started)).await;
        self.finish(result)
    }

    /// Report errors and panics escaping a run as an unexpected failure.
    async fn guarded<F>(&self, run: F) -> GenerationResult
    where
        F: Future<Output = Result<GenerationResult, ConvergenceError>>,
    {
        let message = match AssertUnwindSafe(run).catch_unwind().await {
            Ok(Ok(result)) => return result,
            Ok(Err(e)) => detail(&e),
            Err(payload) => panic_message(payload.as_ref()),
        };

        error!("unexpected failure: {}", message);
        GenerationResult::failure(ConvergenceError::Unexpected(message).to_string(), None)
    }

    async fn run_render(
        &self,
        conversation: Conversation,
        started: Instant,
    ) -> Result<GenerationResult, ConvergenceError> {
        if let Err(e) = conversation.transcript.validate() {
            return Ok(GenerationResult::failure(
                format!("Invalid conversation: {}", detail(&e)),
                None,
            ));
        }

        let audio_path = conversation
            .config
            .output_path
            .clone()
            .unwrap_or_else(|| self.default_audio_path(now()));

        self.enter(PipelineStage::AudioPending);
        let audio = match self.audio_stage(&conversation).await {
            Ok(audio) => audio,
            Err(e) => {
                self.enter(PipelineStage::AudioFailed);
                error!("audio generation failed: {}", e);
                return Ok(GenerationResult::failure(
                    format!("Audio generation failed after retries: {}", detail(&e)),
                    Some(conversation.transcript),
                ));
            }
        };
        self.enter(PipelineStage::AudioReady);

        Ok(self
            .persist_audio(&audio_path, &audio, started, conversation.transcript)
            .await)
    }

    async fn run_pipeline(
        &self,
        mut config: GenerationConfig,
        started: Instant,
    ) -> Result<GenerationResult, ConvergenceError> {
        if let Err(e) = config.validate() {
            return Ok(GenerationResult::failure(detail(&e), None));
        }

        self.enter(PipelineStage::TranscriptPending);
        let transcript = match self.transcript_stage(&config).await {
            Ok(transcript) => transcript,
            Err(e) => {
                error!("transcript generation failed: {}", e);
                return Ok(GenerationResult::failure(
                    format!("Transcript generation failed after retries: {}", detail(&e)),
                    None,
                ));
            }
        };
        self.enter(PipelineStage::TranscriptReady);

        let audio_path = config
            .output_path
            .get_or_insert_with(|| self.default_audio_path(now()))
            .clone();
        let conversation = Conversation::new(transcript, config);

        self.enter(PipelineStage::AudioPending);
        let audio = match self.audio_stage(&conversation).await {
            Ok(audio) => audio,
            Err(e) => {
                self.enter(PipelineStage::AudioFailed);
                warn!("audio generation failed, saving transcript only: {}", e);
                return self
                    .persist_transcript_fallback(conversation, &audio_path, started, e)
                    .await;
            }
        };
        self.enter(PipelineStage::AudioReady);

        Ok(self
            .persist_audio(&audio_path, &audio, started, conversation.transcript)
            .await)
    }

    async fn run_transcript_only(
        &self,
        config: GenerationConfig,
        started: Instant,
    ) -> Result<GenerationResult, ConvergenceError> {
        if let Err(e) = config.validate() {
            return Ok(GenerationResult::failure(detail(&e), None));
        }

        self.enter(PipelineStage::TranscriptPending);
        let transcript = match self.transcript_stage(&config).await {
            Ok(transcript) => transcript,
            Err(e) => {
                error!("transcript generation failed: {}", e);
                return Ok(GenerationResult::failure(
                    format!("Transcript generation failed after retries: {}", detail(&e)),
                    None,
                ));
            }
        };
        self.enter(PipelineStage::TranscriptReady);

        let path = config
            .output_path
            .as_deref()
            .map(fallback_transcript_path)
            .unwrap_or_else(|| default_transcript_path(&self.settings.output.directory, now()));

        let conversation = Conversation::new(transcript, config);
        let document = conversation.to_redacted_json()?;

        match self
            .save_stage(PipelineStage::TranscriptReady, &path, document.as_bytes())
            .await
        {
            Ok(()) => {
                self.enter(PipelineStage::TranscriptOnlyPersisted);
                Ok(GenerationResult::transcript_only(
                    path,
                    started.elapsed().as_secs(),
                    conversation.transcript,
                    None,
                ))
            }
            Err(e) => Ok(GenerationResult::failure(
                format!("Failed to save transcript: {}", detail(&e)),
                Some(conversation.transcript),
            )),
        }
    }

    async fn transcript_stage(
        &self,
        config: &GenerationConfig,
    ) -> Result<Transcript, ConvergenceError> {
        let policy = self.settings.retry.transcript_policy();
        let synthesizer = TranscriptSynthesizer::new(self.text.as_ref(), &self.settings.prompts);
        let synthesizer = &synthesizer;

        retry_with_backoff(&policy, "transcript", move |attempt| {
            self.attempt_started(PipelineStage::TranscriptPending, attempt, &policy);
            async move {
                let start_time = now();
                synthesizer
                    .generate(config, start_time, |index, total, item| {
                        self.emit_event(GenerationEvent::TurnGenerated {
                            index,
                            total,
                            speaker: item.name.clone(),
                            message: item.message.clone(),
                        })
                    })
                    .await
            }
        })
        .await
    }

    async fn audio_stage(&self, conversation: &Conversation) -> Result<Vec<u8>, ConvergenceError> {
        let policy = self.settings.retry.audio_policy();

        retry_with_backoff(&policy, "audio", move |attempt| {
            self.attempt_started(PipelineStage::AudioPending, attempt, &policy);
            self.render_audio(conversation)
        })
        .await
    }

    /// Synthesize every line in order and stitch the clips.
    ///
    /// The first failing line aborts the whole conversation.
    async fn render_audio(&self, conversation: &Conversation) -> Result<Vec<u8>, ConvergenceError> {
        let items = &conversation.transcript.items;
        if items.is_empty() {
            return Err(ConvergenceError::SpeechSynthesisFailed(
                "Transcript has no items".to_string(),
            ));
        }

        let credential = conversation.config.api_key.as_deref();
        let mut assigner = SpeakerVoiceAssigner::new(&self.settings.voices, self.voice_rng());
        let total = items.len();
        let mut clips = Vec::with_capacity(total);

        for (index, item) in items.iter().enumerate() {
            let voice = assigner.assign(&item.name, item.gender)?;

            let clip = self
                .speech
                .synthesize(&item.message, &voice, credential)
                .await
                .map_err(|e| {
                    ConvergenceError::SpeechSynthesisFailed(format!(
                        "line {}/{} ({}): {}",
                        index + 1,
                        total,
                        item.name,
                        detail(&e)
                    ))
                })?;

            self.emit_event(GenerationEvent::LineSynthesized {
                index,
                total,
                speaker: item.name.clone(),
                voice,
            });
            clips.push(clip);
        }

        let audio = stitch(&clips);
        info!(
            clips = clips.len(),
            bytes = audio.len(),
            seconds = wav_duration_secs(&audio).unwrap_or_default(),
            "audio stitched"
        );
        Ok(audio)
    }

    /// Write with the save retry policy; `stage` is the state being persisted.
    async fn save_stage(
        &self,
        stage: PipelineStage,
        path: &Path,
        bytes: &[u8],
    ) -> Result<(), ConvergenceError> {
        let policy = self.settings.retry.save_policy();

        retry_with_backoff(&policy, "save", move |attempt| {
            self.attempt_started(stage, attempt, &policy);
            write_artifact(path, bytes)
        })
        .await
    }

    async fn persist_audio(
        &self,
        path: &Path,
        audio: &[u8],
        started: Instant,
        transcript: Transcript,
    ) -> GenerationResult {
        match self.save_stage(PipelineStage::AudioReady, path, audio).await {
            Ok(()) => {
                self.enter(PipelineStage::Persisted);
                GenerationResult::audio(path.to_path_buf(), started.elapsed().as_secs(), transcript)
            }
            Err(e) => {
                error!("failed to save audio: {}", e);
                GenerationResult::failure(
                    format!("Failed to save audio file: {}", detail(&e)),
                    Some(transcript),
                )
            }
        }
    }

    async fn persist_transcript_fallback(
        &self,
        conversation: Conversation,
        audio_path: &Path,
        started: Instant,
        cause: ConvergenceError,
    ) -> Result<GenerationResult, ConvergenceError> {
        let path = fallback_transcript_path(audio_path);
        let document = conversation.to_redacted_json()?;

        match write_artifact(&path, document.as_bytes()).await {
            Ok(()) => {
                self.enter(PipelineStage::TranscriptOnlyPersisted);
                Ok(GenerationResult::transcript_only(
                    path,
                    started.elapsed().as_secs(),
                    conversation.transcript,
                    Some(format!(
                        "Audio generation failed, transcript saved as JSON: {}",
                        detail(&cause)
                    )),
                ))
            }
            Err(e) => Ok(GenerationResult::failure(
                format!("Failed to save transcript: {}", detail(&e)),
                Some(conversation.transcript),
            )),
        }
    }

    fn default_audio_path(&self, at: NaiveDateTime) -> PathBuf {
        let output = &self.settings.output;
        default_audio_path(&output.directory, &output.extension, at)
    }

    fn voice_rng(&self) -> StdRng {
        match self.voice_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        }
    }

    fn enter(&self, stage: PipelineStage) {
        info!(%stage, "pipeline stage");
        self.emit_event(GenerationEvent::StageEntered(stage));
    }

    fn attempt_started(&self, stage: PipelineStage, attempt: u32, policy: &RetryPolicy) {
        self.emit_event(GenerationEvent::AttemptStarted {
            stage,
            attempt,
            max_attempts: policy.max_attempts(),
        });
    }

    fn finish(&self, result: GenerationResult) -> GenerationResult {
        self.enter(PipelineStage::Done);
        if result.success {
            info!(
                path = ?result.output_path,
                elapsed_seconds = ?result.elapsed_seconds,
                degraded = result.is_degraded(),
                "generation finished"
            );
        } else {
            error!(error = ?result.error, "generation failed");
        }
        self.emit_event(GenerationEvent::Finished {
            success: result.success,
            degraded: result.is_degraded(),
        });
        result
    }

    /// Emit an event if a callback is registered.
    fn emit_event(&self, event: GenerationEvent) {
        if let Some(ref callback) = self.callback {
            callback(event);
        }
    }
}

fn now() -> NaiveDateTime {
    Local::now().naive_local()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panic: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panic: {}", message)
    } else {
        "panic with a non-string payload".to_string()
    }
}

/// Message of an error without the variant prefix.
fn detail(e: &ConvergenceError) -> String {
    match e {
        ConvergenceError::TranscriptGenerationFailed(msg)
        | ConvergenceError::SpeechSynthesisFailed(msg)
        | ConvergenceError::PersistenceFailed(msg)
        | ConvergenceError::Unexpected(msg)
        | ConvergenceError::ConfigError(msg) => msg.clone(),
        other => other.to_string(),
    }
}
