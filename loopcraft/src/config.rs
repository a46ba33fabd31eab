// Data-driven generator configuration.
//
// Every tunable of the two model families lives in `GeneratorConfig`,
// loadable from JSON so corpora with different grids or loop lengths can be
// handled without recompiling. Missing fields fall back to `Default`, which
// reproduces the reference settings: order-1, 16 steps over a 4-beat loop,
// 30 start attempts, 10 consecutive misses, and a 0.25-beat bass note on
// MIDI 36 at velocity 110.
//
// The CLI (main.rs) loads this first and lets flags override single values.

use crate::error::{GenerationError, ModelIoError};
use crate::pattern::Tag;
use crate::rhythm::VoiceShape;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Order-N step table parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkovConfig {
    /// Number of preceding steps in a context.
    pub order: usize,
    /// Grid cells per loop.
    pub num_steps: usize,
    /// Loop length in beats.
    pub loop_duration: f64,
    /// Tries at drawing a start context that the table knows.
    pub start_attempts: usize,
    /// Consecutive unknown contexts tolerated during the walk.
    pub miss_budget: usize,
}

impl Default for MarkovConfig {
    fn default() -> Self {
        MarkovConfig {
            order: 1,
            num_steps: 16,
            loop_duration: 4.0,
            start_attempts: 30,
            miss_budget: 10,
        }
    }
}

impl MarkovConfig {
    pub fn validate(&self) -> Result<(), GenerationError> {
        if self.num_steps == 0 {
            return Err(GenerationError::InvalidConfig("num_steps must be positive".into()));
        }
        if self.order > self.num_steps {
            return Err(GenerationError::InvalidConfig(format!(
                "order {} exceeds num_steps {}",
                self.order, self.num_steps
            )));
        }
        if self.loop_duration.is_nan() || self.loop_duration <= 0.0 {
            return Err(GenerationError::InvalidConfig(format!(
                "loop_duration must be positive, got {}",
                self.loop_duration
            )));
        }
        if self.start_attempts == 0 || self.miss_budget == 0 {
            return Err(GenerationError::InvalidConfig(
                "retry budgets must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Rhythm-id bassline parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BassConfig {
    /// Beats to generate when no target bounds the length.
    pub beat_length: usize,
    pub note_duration: f64,
    pub pitch: u8,
    pub velocity: u8,
    pub tag: String,
    /// MIDI note treated as the kick when importing drum files.
    pub kick_note: u8,
}

impl Default for BassConfig {
    fn default() -> Self {
        BassConfig {
            beat_length: 8,
            note_duration: 0.25,
            pitch: 36,
            velocity: 110,
            tag: "bass".to_string(),
            kick_note: 36,
        }
    }
}

impl BassConfig {
    pub fn voice(&self) -> VoiceShape {
        VoiceShape {
            note_duration: self.note_duration,
            pitch: self.pitch,
            velocity: self.velocity,
            tag: Tag::name(&self.tag),
        }
    }
}

/// MIDI export parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MidiConfig {
    pub tempo_bpm: u16,
    pub ticks_per_quarter: u16,
}

impl Default for MidiConfig {
    fn default() -> Self {
        MidiConfig {
            tempo_bpm: 120,
            ticks_per_quarter: 480,
        }
    }
}

impl MidiConfig {
    /// Slowest tempo whose quarter note fits a 24-bit SMF tempo.
    pub const MIN_TEMPO_BPM: u16 = 4;
    /// Largest metrical division an SMF header holds (15 bits).
    pub const MAX_TICKS_PER_QUARTER: u16 = 0x7FFF;

    /// Microseconds per quarter note, with the tempo clamped to what SMF stores.
    pub fn tempo_micros(&self) -> u32 {
        60_000_000 / u32::from(self.tempo_bpm.max(Self::MIN_TEMPO_BPM))
    }

    pub fn ticks(&self) -> u16 {
        self.ticks_per_quarter.clamp(1, Self::MAX_TICKS_PER_QUARTER)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub markov: MarkovConfig,
    pub bass: BassConfig,
    pub midi: MidiConfig,
}

impl GeneratorConfig {
    pub fn load(path: &Path) -> Result<Self, ModelIoError> {
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
