//! Per-speaker voice assignment.

use rand::Rng;
use rand::seq::IndexedRandom;
use std::collections::HashMap;

use crate::config::VoicesConfig;
use crate::conversation::Gender;
use crate::error::ConvergenceError;

/// Maps speaker names to voices for the duration of one conversation.
///
/// The first turn of a speaker draws a voice from the pool matching the
/// declared gender; every later turn of that speaker reuses it.
pub struct SpeakerVoiceAssigner<'a, R: Rng> {
    voices: &'a VoicesConfig,
    rng: R,
    assigned: HashMap<String, String>,
}

impl<'a, R: Rng> SpeakerVoiceAssigner<'a, R> {
    pub fn new(voices: &'a VoicesConfig, rng: R) -> Self {
        Self {
            voices,
            rng,
            assigned: HashMap::new(),
        }
    }

    pub fn assign(&mut self, speaker: &str, gender: Gender) -> Result<String, ConvergenceError> {
        if let Some(voice) = self.assigned.get(speaker) {
            return Ok(voice.clone());
        }

        let pool = match gender {
            Gender::Female => &self.voices.female,
            Gender::Male => &self.voices.male,
        };

        let voice = pool.choose(&mut self.rng).cloned().ok_or_else(|| {
            ConvergenceError::ConfigError(format!("No {} voices configured", gender.as_str()))
        })?;

        self.assigned.insert(speaker.to_string(), voice.clone());
        Ok(voice)
    }

    /// Voices handed out so far.
    pub fn assignments(&self) -> &HashMap<String, String> {
        &self.assigned
    }
}
