#![allow(dead_code)]

use async_trait::async_trait;
use convergence_core::{
    ChatPrompt, ConvergenceError, GenerationEvent, GenerationOrchestrator, PipelineStage,
    Settings, SpeechSynthesizer, TextGenerator,
};
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const SECRET: &str = "sk-test-secret";

/// Alternates two speakers; can be told to fail.
pub struct FakeText {
    calls: AtomicUsize,
    fail_first: usize,
}

impl FakeText {
    pub fn working() -> Arc<Self> {
        Self::failing_first(0)
    }

    pub fn failing_first(n: usize) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail_first: n,
        })
    }

    pub fn broken() -> Arc<Self> {
        Self::failing_first(usize::MAX)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextGenerator for FakeText {
    async fn complete(
        &self,
        _prompt: &ChatPrompt,
        _credential: Option<&str>,
    ) -> Result<String, ConvergenceError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_first {
            return Err(ConvergenceError::Unexpected("text service down".to_string()));
        }

        let (name, gender, role) = if call % 2 == 0 {
            ("Ada", "female", "Host")
        } else {
            ("Bob", "male", "Guest")
        };
        Ok(format!(
            r#"{{"timestamp": "2000-01-01T00:00:00", "name": "{name}", "gender": "{gender}", "role": "{role}", "message": "Message number {call}"}}"#
        ))
    }
}

/// Returns one WAV clip per line, with as many samples as the text has bytes.
pub struct FakeSpeech {
    calls: AtomicUsize,
    fail_on: Box<dyn Fn(usize) -> bool + Send + Sync>,
    lines: Mutex<Vec<(String, String, Option<String>)>>,
}

impl FakeSpeech {
    pub fn working() -> Arc<Self> {
        Self::with_failures(|_| false)
    }

    pub fn broken() -> Arc<Self> {
        Self::with_failures(|_| true)
    }

    pub fn with_failures(fail_on: impl Fn(usize) -> bool + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail_on: Box::new(fail_on),
            lines: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// (text, voice, credential) per successful call.
    pub fn lines(&self) -> Vec<(String, String, Option<String>)> {
        self.lines.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechSynthesizer for FakeSpeech {
    async fn synthesize(
        &self,
        text: &str,
        voice_id: &str,
        credential: Option<&str>,
    ) -> Result<Vec<u8>, ConvergenceError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if (self.fail_on)(call) {
            return Err(ConvergenceError::SpeechSynthesisFailed(
                "speech service down".to_string(),
            ));
        }

        self.lines.lock().unwrap().push((
            text.to_string(),
            voice_id.to_string(),
            credential.map(String::from),
        ));
        Ok(wav_clip(text.len()))
    }
}

/// Panics on every call, like a client with a bug.
pub struct PanickingSpeech;

#[async_trait]
impl SpeechSynthesizer for PanickingSpeech {
    async fn synthesize(
        &self,
        _text: &str,
        _voice_id: &str,
        _credential: Option<&str>,
    ) -> Result<Vec<u8>, ConvergenceError> {
        panic!("decoder state corrupted");
    }
}

pub fn wav_clip(samples: usize) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 24_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for i in 0..samples {
            writer.write_sample((i % 128) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

pub fn test_settings(output_dir: &Path) -> Settings {
    let mut settings = Settings::default();
    settings.retry.time_unit_ms = 0;
    settings.output.directory = output_dir.to_path_buf();
    settings
}

pub type EventLog = Arc<Mutex<Vec<GenerationEvent>>>;

pub fn orchestrator(
    text: Arc<dyn TextGenerator>,
    speech: Arc<dyn SpeechSynthesizer>,
    output_dir: &Path,
) -> (GenerationOrchestrator, EventLog) {
    let events: EventLog = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();

    let orchestrator = GenerationOrchestrator::new(text, speech, test_settings(output_dir))
        .with_voice_seed(1234)
        .with_callback(Box::new(move |event| sink.lock().unwrap().push(event)));

    (orchestrator, events)
}

pub fn stages(events: &EventLog) -> Vec<PipelineStage> {
    events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|event| match event {
            GenerationEvent::StageEntered(stage) => Some(*stage),
            _ => None,
        })
        .collect()
}

/// `(stage, max_attempts)` of every attempt that was started.
pub fn attempts(events: &EventLog) -> Vec<(PipelineStage, u32)> {
    events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|event| match event {
            GenerationEvent::AttemptStarted {
                stage,
                max_attempts,
                ..
            } => Some((*stage, *max_attempts)),
            _ => None,
        })
        .collect()
}

pub fn read_u32(buffer: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buffer[at], buffer[at + 1], buffer[at + 2], buffer[at + 3]])
}
