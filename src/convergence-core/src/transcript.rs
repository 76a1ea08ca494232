//! Turn-by-turn transcript generation.
//!
//! Each turn is requested separately with the most recent turns as context,
//! so the loop is strictly sequential. [`TurnLoop`] holds the state between
//! requests; [`TranscriptSynthesizer`] drives it against a
//! [`TextGenerator`].

use chrono::{NaiveDateTime, TimeDelta};
use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;
use tracing::{debug, info};

use crate::config::PromptsConfig;
use crate::conversation::{Gender, GenerationConfig, Transcript, TranscriptItem};
use crate::error::ConvergenceError;
use crate::llm::{ChatPrompt, TextGenerator};

/// Turns generated per minute of target duration.
pub const TURNS_PER_MINUTE: u32 = 2;

/// Lower bound on the number of turns.
pub const MIN_TURNS: u32 = 4;

/// How many previous turns are sent as context.
pub const CONTEXT_WINDOW: usize = 5;

const MAX_PREALLOCATED_TURNS: usize = 256;

/// Number of turns for a target duration.
pub fn total_turns(duration_minutes: u32) -> usize {
    duration_minutes
        .saturating_mul(TURNS_PER_MINUTE)
        .max(MIN_TURNS) as usize
}

/// A prepared request for one turn.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    /// Zero-based turn index.
    pub index: usize,
    pub timestamp: NaiveDateTime,
    pub prompt: ChatPrompt,
}

/// The fields a turn reply must carry. Anything else, including the
/// service's own timestamp, is ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct TurnReply {
    pub name: String,
    pub gender: Gender,
    pub role: String,
    pub message: String,
}

/// Loop state for transcript generation.
#[derive(Debug, Clone)]
pub struct TurnLoop {
    items: Vec<TranscriptItem>,
    next_index: usize,
    total_turns: usize,
    start_time: NaiveDateTime,
    duration_ms: i64,
}

impl TurnLoop {
    pub fn new(duration_minutes: u32, start_time: NaiveDateTime) -> Self {
        let total_turns = total_turns(duration_minutes);
        Self {
            items: Vec::with_capacity(total_turns.min(MAX_PREALLOCATED_TURNS)),
            next_index: 0,
            total_turns,
            start_time,
            duration_ms: i64::from(duration_minutes) * 60_000,
        }
    }

    pub fn total_turns(&self) -> usize {
        self.total_turns
    }

    pub fn next_index(&self) -> usize {
        self.next_index
    }

    pub fn items(&self) -> &[TranscriptItem] {
        &self.items
    }

    pub fn is_complete(&self) -> bool {
        self.next_index >= self.total_turns
    }

    /// Timestamp for a turn, spacing turns evenly across the duration.
    pub fn timestamp_for(&self, index: usize) -> NaiveDateTime {
        let offset_ms =
            i128::from(self.duration_ms) * index as i128 / self.total_turns as i128;
        self.start_time + TimeDelta::milliseconds(offset_ms as i64)
    }

    /// Compact context lines for the most recent turns.
    pub fn context_lines(&self) -> String {
        let start = self.items.len().saturating_sub(CONTEXT_WINDOW);
        self.items[start..]
            .iter()
            .map(|item| {
                let timestamp = item
                    .timestamp
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_default();
                format!("{} {} {}", timestamp, item.name, item.message)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Build the request for the next turn, or `None` once complete.
    pub fn next_request(
        &self,
        config: &GenerationConfig,
        prompts: &PromptsConfig,
    ) -> Option<TurnRequest> {
        if self.is_complete() {
            return None;
        }

        let index = self.next_index;
        let user = prompts.render_turn(
            index + 1,
            self.total_turns,
            &config.prompt,
            &config.vibe,
            config.outline.as_deref(),
            &self.context_lines(),
        );

        Some(TurnRequest {
            index,
            timestamp: self.timestamp_for(index),
            prompt: ChatPrompt {
                system: prompts.system.clone(),
                user,
            },
        })
    }

    /// Record the reply for the current turn and advance.
    pub fn accept(&mut self, reply: TurnReply) -> &TranscriptItem {
        let timestamp = self.timestamp_for(self.next_index);
        self.items.push(TranscriptItem {
            name: reply.name,
            gender: reply.gender,
            role: reply.role,
            message: reply.message,
            timestamp: Some(timestamp),
        });
        self.next_index += 1;
        &self.items[self.items.len() - 1]
    }

    pub fn finish(self) -> Transcript {
        Transcript::new(self.items)
    }
}

/// Builds a full transcript from a [`GenerationConfig`].
pub struct TranscriptSynthesizer<'a> {
    generator: &'a dyn TextGenerator,
    prompts: &'a PromptsConfig,
}

impl<'a> TranscriptSynthesizer<'a> {
    pub fn new(generator: &'a dyn TextGenerator, prompts: &'a PromptsConfig) -> Self {
        Self { generator, prompts }
    }

    /// Generate every turn in order.
    ///
    /// `on_turn` receives (index, total, item) after each accepted turn.
    /// Any failure discards the partial transcript.
    pub async fn generate<F>(
        &self,
        config: &GenerationConfig,
        start_time: NaiveDateTime,
        mut on_turn: F,
    ) -> Result<Transcript, ConvergenceError>
    where
        F: FnMut(usize, usize, &TranscriptItem),
    {
        let mut turns = TurnLoop::new(config.duration_minutes, start_time);
        info!(
            total_turns = turns.total_turns(),
            duration_minutes = config.duration_minutes,
            "generating transcript"
        );

        while let Some(request) = turns.next_request(config, self.prompts) {
            let turn = request.index + 1;
            let total = turns.total_turns();

            let raw = self
                .generator
                .complete(&request.prompt, config.api_key.as_deref())
                .await
                .map_err(|e| {
                    ConvergenceError::TranscriptGenerationFailed(format!(
                        "turn {}/{}: {}",
                        turn, total, e
                    ))
                })?;

            let reply = parse_turn_reply(&raw).map_err(|e| {
                ConvergenceError::TranscriptGenerationFailed(format!(
                    "turn {}/{}: {}",
                    turn, total, e
                ))
            })?;

            let item = turns.accept(reply);
            debug!(turn, total, speaker = %item.name, "turn generated");
            on_turn(request.index, total, item);
        }

        Ok(turns.finish())
    }
}

/// Parse one reply into a [`TurnReply`].
///
/// Accepts a bare JSON object or one wrapped in prose or code fences.
pub fn parse_turn_reply(raw: &str) -> Result<TurnReply, String> {
    let json = extract_json_object(raw).ok_or_else(|| {
        if raw.trim().is_empty() {
            "empty reply".to_string()
        } else {
            "reply contains no JSON object".to_string()
        }
    })?;

    let mut reply: TurnReply =
        serde_json::from_str(json).map_err(|e| format!("malformed reply: {}", e))?;

    reply.name = reply.name.trim().to_string();
    reply.role = reply.role.trim().to_string();
    reply.message = clean_message(&reply.message);

    if reply.name.is_empty() {
        return Err("reply has an empty speaker name".to_string());
    }
    if reply.message.is_empty() {
        return Err("reply has an empty message".to_string());
    }

    Ok(reply)
}

fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

const REASONING_TAGS: [&str; 15] = [
    "thinking",
    "think",
    "reflection",
    "reflect",
    "internal",
    "reasoning",
    "thought",
    "scratch",
    "scratchpad",
    "plan",
    "analysis",
    "analyze",
    "consider",
    "pondering",
    "deliberation",
];

static REASONING_BLOCKS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    REASONING_TAGS
        .iter()
        .filter_map(|tag| Regex::new(&format!(r"(?is)<{tag}[^>]*>.*?</{tag}>", tag = tag)).ok())
        .collect()
});

static ORPHAN_TAG: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"</?[\w]+[^>]*>").ok());

static WHITESPACE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\s+").ok());

/// Strip reasoning blocks, stray tags and emphasis markers so only the
/// spoken words reach the speech service.
pub fn clean_message(message: &str) -> String {
    let mut result = message.to_string();

    for re in REASONING_BLOCKS.iter() {
        result = re.replace_all(&result, "").into_owned();
    }

    if let Some(re) = ORPHAN_TAG.as_ref() {
        result = re.replace_all(&result, "").into_owned();
    }

    result = result.replace('*', "");

    if let Some(re) = WHITESPACE.as_ref() {
        result = re.replace_all(&result, " ").into_owned();
    }

    result.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn start() -> NaiveDateTime {
        NaiveDateTime::parse_from_str("2025-07-07 09:00:00", "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn reply_json(turn: usize) -> String {
        let (name, gender) = if turn % 2 == 0 {
            ("Ada", "female")
        } else {
            ("Bob", "male")
        };
        format!(
            r#"{{"timestamp": "1999-01-01T00:00:00", "name": "{name}", "gender": "{gender}", "role": "Host", "message": "line-{turn}"}}"#
        )
    }

    /// Answers every request in order and records the prompts it saw.
    struct ScriptedGenerator {
        prompts: Mutex<Vec<String>>,
        fail_on_call: Option<usize>,
        malformed_on_call: Option<usize>,
    }

    impl ScriptedGenerator {
        fn new() -> Self {
            Self {
                prompts: Mutex::new(Vec::new()),
                fail_on_call: None,
                malformed_on_call: None,
            }
        }

        fn seen(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TextGenerator for ScriptedGenerator {
        async fn complete(
            &self,
            prompt: &ChatPrompt,
            _credential: Option<&str>,
        ) -> Result<String, ConvergenceError> {
            let mut prompts = self.prompts.lock().unwrap();
            let call = prompts.len();
            prompts.push(prompt.user.clone());

            if self.fail_on_call == Some(call) {
                return Err(ConvergenceError::Unexpected("service unavailable".to_string()));
            }
            if self.malformed_on_call == Some(call) {
                return Ok("I'd rather not answer in JSON".to_string());
            }
            Ok(reply_json(call))
        }
    }

    #[test]
    fn test_total_turns() {
        assert_eq!(total_turns(1), 4);
        assert_eq!(total_turns(2), 4);
        assert_eq!(total_turns(3), 6);
        assert_eq!(total_turns(10), 20);
        assert_eq!(total_turns(60), 120);
        assert_eq!(total_turns(u32::MAX), u32::MAX as usize);
    }

    #[test]
    fn test_huge_duration_does_not_overflow() {
        let turns = TurnLoop::new(u32::MAX, start());
        assert_eq!(turns.total_turns(), u32::MAX as usize);
        assert!(turns.items().is_empty());
        assert_eq!(turns.timestamp_for(1), start() + TimeDelta::seconds(60));
    }

    #[test]
    fn test_timestamps_evenly_spaced() {
        let turns = TurnLoop::new(1, start());
        assert_eq!(turns.timestamp_for(0), start());
        assert_eq!(turns.timestamp_for(1), start() + TimeDelta::seconds(15));
        assert_eq!(turns.timestamp_for(3), start() + TimeDelta::seconds(45));

        let turns = TurnLoop::new(7, start());
        assert_eq!(turns.timestamp_for(5), start() + TimeDelta::seconds(150));
    }

    #[test]
    fn test_context_uses_all_items_when_short() {
        let mut turns = TurnLoop::new(5, start());
        for i in 0..3 {
            turns.accept(parse_turn_reply(&reply_json(i)).unwrap());
        }
        let context = turns.context_lines();
        assert_eq!(context.lines().count(), 3);
        assert!(context.starts_with("2025-07-07 09:00:00 Ada line-0"));
    }

    #[test]
    fn test_context_window_keeps_last_five() {
        let mut turns = TurnLoop::new(5, start());
        for i in 0..8 {
            turns.accept(parse_turn_reply(&reply_json(i)).unwrap());
        }
        let context = turns.context_lines();
        assert_eq!(context.lines().count(), CONTEXT_WINDOW);
        assert!(!context.contains("line-2"));
        assert!(context.contains("line-3"));
        assert!(context.contains("line-7"));
    }

    #[test]
    fn test_loop_stops_at_total() {
        let config = GenerationConfig::new("topic", 1).unwrap();
        let prompts = PromptsConfig::default();
        let mut turns = TurnLoop::new(1, start());

        let mut count = 0;
        while let Some(request) = turns.next_request(&config, &prompts) {
            assert_eq!(request.index, count);
            turns.accept(parse_turn_reply(&reply_json(count)).unwrap());
            count += 1;
        }
        assert_eq!(count, 4);
        assert!(turns.is_complete());
        assert_eq!(turns.finish().len(), 4);
    }

    #[test]
    fn test_parse_reply_in_code_fence() {
        let raw = "```json\n{\"name\": \"Ada\", \"gender\": \"Female\", \"role\": \"Host\", \"message\": \"Hi *there*\"}\n```";
        let reply = parse_turn_reply(raw).unwrap();
        assert_eq!(reply.name, "Ada");
        assert_eq!(reply.gender, Gender::Female);
        assert_eq!(reply.message, "Hi there");
    }

    #[test]
    fn test_parse_reply_rejects_missing_fields() {
        assert!(parse_turn_reply(r#"{"name": "Ada", "message": "Hi"}"#).is_err());
        assert!(parse_turn_reply("").is_err());
        assert!(parse_turn_reply("no json here").is_err());
        assert!(
            parse_turn_reply(r#"{"name": " ", "gender": "male", "role": "x", "message": "Hi"}"#)
                .is_err()
        );
    }

    #[test]
    fn test_clean_message_strips_reasoning() {
        assert_eq!(
            clean_message("<thinking>Let me think...</thinking>The answer is 42."),
            "The answer is 42."
        );
        assert_eq!(
            clean_message("Hello <reflection>internal</reflection> world!"),
            "Hello world!"
        );
        assert_eq!(
            clean_message("<think>\nmany\nlines\n</think>Final   answer\nhere."),
            "Final answer here."
        );
        assert_eq!(clean_message("No tags here, just text."), "No tags here, just text.");
    }

    #[test]
    fn test_clean_message_only_reasoning_is_empty() {
        let raw = r#"{"name": "Ada", "gender": "female", "role": "Host", "message": "<plan>secret</plan>"}"#;
        assert!(parse_turn_reply(raw).is_err());
    }

    #[tokio::test]
    async fn test_generate_full_transcript() {
        let generator = ScriptedGenerator::new();
        let prompts = PromptsConfig::default();
        let synth = TranscriptSynthesizer::new(&generator, &prompts);

        for duration in [1u32, 2, 3, 10, 60] {
            let config = GenerationConfig::new("Deep sea", duration).unwrap();
            let mut reported = Vec::new();
            let transcript = synth
                .generate(&config, start(), |index, total, _| reported.push((index, total)))
                .await
                .unwrap();

            let expected = total_turns(duration);
            assert_eq!(transcript.len(), expected);
            assert_eq!(reported.len(), expected);
            assert_eq!(reported.last(), Some(&(expected - 1, expected)));

            let spacing = TimeDelta::milliseconds(i64::from(duration) * 60_000 / expected as i64);
            for (i, item) in transcript.items.iter().enumerate() {
                assert_eq!(item.timestamp, Some(start() + spacing * i as i32));
            }
            assert!(transcript.validate().is_ok());
        }
    }

    #[tokio::test]
    async fn test_service_timestamp_is_discarded() {
        let generator = ScriptedGenerator::new();
        let prompts = PromptsConfig::default();
        let synth = TranscriptSynthesizer::new(&generator, &prompts);
        let config = GenerationConfig::new("topic", 1).unwrap();

        let transcript = synth.generate(&config, start(), |_, _, _| {}).await.unwrap();
        assert_eq!(transcript.items[0].timestamp, Some(start()));
    }

    #[tokio::test]
    async fn test_prompts_carry_context_and_closing() {
        let generator = ScriptedGenerator::new();
        let prompts = PromptsConfig::default();
        let synth = TranscriptSynthesizer::new(&generator, &prompts);
        let config = GenerationConfig::new("Volcanoes", 4)
            .unwrap()
            .with_vibe("Excited")
            .with_outline("• Eruptions\n• Safety", "outline.md");

        synth.generate(&config, start(), |_, _, _| {}).await.unwrap();
        let seen = generator.seen();

        assert_eq!(seen.len(), 8);
        assert!(seen.iter().all(|p| p.contains("'Volcanoes'") && p.contains("'Excited'")));
        assert!(seen.iter().all(|p| p.contains("• Eruptions")));
        assert!(seen[6].contains("line-5") && seen[6].contains("line-1"));
        assert!(!seen[6].contains("line-0"));
        assert!(seen[7].contains(&prompts.closing_instruction));
        assert!(seen[..7].iter().all(|p| !p.contains(&prompts.closing_instruction)));
    }

    #[tokio::test]
    async fn test_service_error_aborts() {
        let mut generator = ScriptedGenerator::new();
        generator.fail_on_call = Some(2);
        let prompts = PromptsConfig::default();
        let synth = TranscriptSynthesizer::new(&generator, &prompts);
        let config = GenerationConfig::new("topic", 3).unwrap();

        let err = synth.generate(&config, start(), |_, _, _| {}).await.unwrap_err();
        match err {
            ConvergenceError::TranscriptGenerationFailed(msg) => {
                assert!(msg.contains("turn 3/6"));
                assert!(msg.contains("service unavailable"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(generator.seen().len(), 3);
    }

    #[tokio::test]
    async fn test_malformed_reply_aborts() {
        let mut generator = ScriptedGenerator::new();
        generator.malformed_on_call = Some(0);
        let prompts = PromptsConfig::default();
        let synth = TranscriptSynthesizer::new(&generator, &prompts);
        let config = GenerationConfig::new("topic", 2).unwrap();

        let err = synth.generate(&config, start(), |_, _, _| {}).await.unwrap_err();
        assert!(matches!(err, ConvergenceError::TranscriptGenerationFailed(_)));
        assert_eq!(generator.seen().len(), 1);
    }
}
