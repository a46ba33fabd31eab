// Rhythm ids: one beat of onsets packed into four sixteenth-note bits.
//
// Each beat is split into the subdivisions {0, .25, .5, .75}. An onset is
// snapped to the nearest subdivision inside its own beat and the four slots
// are read MSB-first, so `[1,0,1,0]` is id 10 and `[0,0,0,1]` is id 1. This
// 16-symbol alphabet is what the matrix model and the constraint filter work
// over. Off-grid onsets are lossy by construction.

use crate::pattern::{Event, Pattern, Tag};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Intra-beat offsets of the four slots, in beats.
pub const SUBDIVISIONS: [f64; 4] = [0.0, 0.25, 0.5, 0.75];

/// Number of distinct rhythm ids.
pub const NUM_IDS: usize = 16;

/// A beat's onset pattern as a 4-bit code in `[0, 15]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RhythmId(u8);

impl RhythmId {
    /// Single onset on the beat; the fallback when an anchor id is unknown.
    pub const METRONOME: RhythmId = RhythmId(8);

    /// `None` if `id` is outside `[0, 15]`.
    pub fn new(id: u8) -> Option<Self> {
        ((id as usize) < NUM_IDS).then_some(RhythmId(id))
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn value(self) -> u8 {
        self.0
    }

    /// Pack four slot flags, first slot as the most significant bit.
    pub fn from_slots(slots: [bool; 4]) -> Self {
        let id = slots
            .iter()
            .fold(0u8, |acc, &on| (acc << 1) | u8::from(on));
        RhythmId(id)
    }

    pub fn slots(self) -> [bool; 4] {
        [
            self.0 & 0b1000 != 0,
            self.0 & 0b0100 != 0,
            self.0 & 0b0010 != 0,
            self.0 & 0b0001 != 0,
        ]
    }

    /// All sixteen ids in ascending order.
    pub fn all() -> impl Iterator<Item = RhythmId> {
        (0..NUM_IDS as u8).map(RhythmId)
    }
}

impl fmt::Display for RhythmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Encoder/decoder between onset lists and rhythm-id sequences.
///
/// The id → offsets table is built once at construction.
#[derive(Debug, Clone)]
pub struct RhythmIdCodec {
    offsets: Vec<Vec<f64>>,
}

impl Default for RhythmIdCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl RhythmIdCodec {
    pub fn new() -> Self {
        let offsets = RhythmId::all()
            .map(|id| {
                id.slots()
                    .iter()
                    .zip(SUBDIVISIONS)
                    .filter(|(on, _)| **on)
                    .map(|(_, offset)| offset)
                    .collect()
            })
            .collect();
        RhythmIdCodec { offsets }
    }

    /// Quantize onsets (in beats) to a `(num_beats, 4)` slot grid.
    ///
    /// Onsets at or past `num_beats` are ignored; ties between two slots go
    /// to the earlier one.
    pub fn binary_beat_pattern(&self, onsets: &[f64], num_beats: usize) -> Vec<[bool; 4]> {
        let mut grid = vec![[false; 4]; num_beats];
        for &onset in onsets {
            if onset < 0.0 {
                continue;
            }
            let beat = onset.floor();
            let frac = onset - beat;
            let beat = beat as usize;
            if beat >= num_beats {
                continue;
            }
            grid[beat][nearest_slot(frac)] = true;
        }
        grid
    }

    pub fn encode_grid(&self, grid: &[[bool; 4]]) -> Vec<RhythmId> {
        grid.iter().map(|&slots| RhythmId::from_slots(slots)).collect()
    }

    pub fn encode_onsets(&self, onsets: &[f64], num_beats: usize) -> Vec<RhythmId> {
        self.encode_grid(&self.binary_beat_pattern(onsets, num_beats))
    }

    /// Encode a pattern over its own length, rounded to whole beats.
    pub fn encode_pattern(&self, pattern: &Pattern) -> Vec<RhythmId> {
        let num_beats = pattern.duration.round().max(0.0) as usize;
        self.encode_onsets(&pattern.onset_times(), num_beats)
    }

    /// Intra-beat onset offsets for `id`.
    pub fn offsets(&self, id: RhythmId) -> &[f64] {
        &self.offsets[id.index()]
    }

    /// Absolute onset times of an id sequence, one beat per id.
    pub fn decode_onsets(&self, ids: &[RhythmId]) -> Vec<f64> {
        ids.iter()
            .enumerate()
            .flat_map(|(beat, &id)| self.offsets(id).iter().map(move |o| beat as f64 + o))
            .collect()
    }

    /// Expand ids into fixed-shape events; the pattern lasts one beat per id.
    pub fn decode(&self, ids: &[RhythmId], voice: &VoiceShape) -> Pattern {
        let events = self
            .decode_onsets(ids)
            .into_iter()
            .map(|t| Event::new(t, voice.note_duration, voice.pitch, voice.velocity, voice.tag.clone()))
            .collect();
        Pattern::with_events(events, ids.len() as f64)
    }
}

/// Fixed attributes given to every decoded onset.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceShape {
    pub note_duration: f64,
    pub pitch: u8,
    pub velocity: u8,
    pub tag: Tag,
}

impl Default for VoiceShape {
    fn default() -> Self {
        VoiceShape {
            note_duration: 0.25,
            pitch: 36,
            velocity: 110,
            tag: Tag::name("bass"),
        }
    }
}

fn nearest_slot(frac: f64) -> usize {
    let mut best = 0;
    let mut best_dist = f64::INFINITY;
    for (i, s) in SUBDIVISIONS.iter().enumerate() {
        let d = (s - frac).abs();
        if d < best_dist {
            best = i;
            best_dist = d;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_encode_msb_first() {
        assert_eq!(RhythmId::from_slots([true, false, true, false]).value(), 10);
        assert_eq!(RhythmId::from_slots([false, false, false, true]).value(), 1);
        assert_eq!(RhythmId::from_slots([true, false, false, false]), RhythmId::METRONOME);
    }

    #[test]
    fn new_rejects_out_of_range() {
        assert_eq!(RhythmId::new(15).map(RhythmId::value), Some(15));
        assert!(RhythmId::new(16).is_none());
    }

    #[test]
    fn onsets_snap_to_nearest_subdivision() {
        let codec = RhythmIdCodec::new();
        let grid = codec.binary_beat_pattern(&[0.05, 0.55, 1.3, 1.9, 7.0], 2);
        assert_eq!(grid[0], [true, false, true, false]);
        assert_eq!(grid[1], [false, true, false, true]);
    }

    #[test]
    fn decode_reproduces_snapped_onsets() {
        let codec = RhythmIdCodec::new();
        let ids = codec.encode_onsets(&[0.0, 0.26, 1.74, 3.5], 4);
        assert_eq!(
            ids.iter().map(|id| id.value()).collect::<Vec<_>>(),
            vec![12, 1, 0, 2]
        );
        assert_eq!(codec.decode_onsets(&ids), vec![0.0, 0.25, 1.75, 3.5]);
    }

    #[test]
    fn decode_builds_fixed_shape_events() {
        let codec = RhythmIdCodec::new();
        let ids = [RhythmId::METRONOME, RhythmId::new(0).unwrap()];
        let p = codec.decode(&ids, &VoiceShape::default());
        assert_eq!(p.duration, 2.0);
        assert_eq!(p.events.len(), 1);
        assert_eq!(p.events[0].pitch, 36);
        assert_eq!(p.events[0].velocity, 110);
        assert_eq!(p.events[0].duration, 0.25);
    }

    #[test]
    fn silent_id_has_no_offsets() {
        let codec = RhythmIdCodec::new();
        assert!(codec.offsets(RhythmId::new(0).unwrap()).is_empty());
        assert_eq!(codec.offsets(RhythmId::new(15).unwrap()), &SUBDIVISIONS);
    }
}
