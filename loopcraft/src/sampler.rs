// Inverse-CDF sampling and rhythm-id sequence generation.
//
// `sample_index` is the single draw used everywhere: candidates are visited
// in their stored order, cumulative bins are built, and the first bin whose
// upper boundary exceeds `r ~ U[0, 1)` wins. Stored order is therefore part
// of the output contract.
//
// `RhythmSampler` drives the three bassline modes on top of it:
// - unconstrained: homogeneous initial + per-id conditionals (matrix.rs)
// - interlocking: non-homogeneous model from ConstraintFilter::interlocking
// - variation: non-homogeneous model from ConstraintFilter::variation, with
//   the first and last ids pinned to the mask's literals
// and decodes the chosen ids back into events via the rhythm codec.

use crate::constraint::{ConstraintFilter, NonHomogeneousModel, VariationMask};
use crate::error::{GenerationError, PipelineStage};
use crate::matrix::{HomogeneousModel, MatrixMarkovModel};
use crate::pattern::Pattern;
use crate::rhythm::{RhythmId, RhythmIdCodec, VoiceShape};
use loopcraft_prng::LoopRng;

const DEFAULT_LOG_TARGET: &str = "loopcraft::sampler";

/// Pick an index by inverse CDF over `weights` (in order) for `r` in [0, 1).
///
/// Returns `None` when there are no candidates. If rounding leaves `r` past
/// the last boundary, the last candidate is returned.
pub fn sample_index(weights: impl IntoIterator<Item = f64>, r: f64) -> Option<usize> {
    let mut cumulative = 0.0;
    let mut last = None;
    for (i, w) in weights.into_iter().enumerate() {
        cumulative += w;
        if cumulative > r {
            return Some(i);
        }
        last = Some(i);
    }
    last
}

/// Draw from an ordered `(value, probability)` list.
pub fn sample_pair<T: Copy>(candidates: &[(T, f64)], rng: &mut LoopRng) -> Option<T> {
    let r = rng.next_f64();
    sample_index(candidates.iter().map(|&(_, p)| p), r).map(|i| candidates[i].0)
}

/// Generates rhythm-id sequences from a corpus model, optionally under a
/// constraint, and decodes them into patterns.
#[derive(Debug, Clone)]
pub struct RhythmSampler {
    codec: RhythmIdCodec,
    voice: VoiceShape,
    log_target: &'static str,
}

impl Default for RhythmSampler {
    fn default() -> Self {
        Self::new(VoiceShape::default())
    }
}

impl RhythmSampler {
    pub fn new(voice: VoiceShape) -> Self {
        RhythmSampler {
            codec: RhythmIdCodec::new(),
            voice,
            log_target: DEFAULT_LOG_TARGET,
        }
    }

    pub fn with_log_target(mut self, target: &'static str) -> Self {
        self.log_target = target;
        self
    }

    pub fn codec(&self) -> &RhythmIdCodec {
        &self.codec
    }

    /// Homogeneous walk of `beat_length` ids.
    pub fn sample_unconstrained(
        &self,
        model: &HomogeneousModel,
        beat_length: usize,
        rng: &mut LoopRng,
    ) -> Result<Vec<RhythmId>, GenerationError> {
        if beat_length == 0 {
            return Ok(Vec::new());
        }
        let first = sample_pair(&model.initial, rng).ok_or(GenerationError::EmptyTable)?;
        let mut ids = vec![first];
        for beat in 1..beat_length {
            let prev = ids[beat - 1];
            let next = sample_pair(model.next(prev), rng).ok_or(GenerationError::DeadEndTransition {
                step: beat,
                misses: 1,
            })?;
            ids.push(next);
        }
        Ok(ids)
    }

    /// Non-homogeneous walk: first id from the filtered initial
    /// distribution, then step-specific candidates.
    pub fn sample_interlocked(
        &self,
        model: &NonHomogeneousModel,
        beat_length: usize,
        rng: &mut LoopRng,
    ) -> Result<Vec<RhythmId>, GenerationError> {
        let beat_length = beat_length.min(model.positions());
        if beat_length == 0 {
            return Ok(Vec::new());
        }
        let first = sample_pair(&model.initial, rng).ok_or(GenerationError::UnsatisfiableConstraint {
            stage: PipelineStage::Sampling,
            step: 0,
        })?;
        let mut ids = vec![first];
        for beat in 0..beat_length - 1 {
            let candidates = self.candidates(model, beat, ids[beat])?;
            let next = sample_pair(candidates, rng).ok_or(GenerationError::UnsatisfiableConstraint {
                stage: PipelineStage::Sampling,
                step: beat + 1,
            })?;
            ids.push(next);
        }
        Ok(ids)
    }

    /// Variation walk over the whole mask: first id is the literal at
    /// position 0, the last must equal the literal last id.
    pub fn sample_variation(
        &self,
        model: &NonHomogeneousModel,
        mask: &VariationMask,
        rng: &mut LoopRng,
    ) -> Result<Vec<RhythmId>, GenerationError> {
        let literals = mask.literals();
        let Some(&first) = literals.first() else {
            return Ok(Vec::new());
        };
        let last_pos = literals.len() - 1;
        let mut ids = vec![first];
        for beat in 0..last_pos {
            let candidates = self.candidates(model, beat, ids[beat])?;
            let unsatisfiable = GenerationError::UnsatisfiableConstraint {
                stage: PipelineStage::Sampling,
                step: beat + 1,
            };
            let next = if beat + 1 == last_pos {
                let target = literals[last_pos];
                if !candidates.iter().any(|&(id, _)| id == target) {
                    return Err(unsatisfiable);
                }
                target
            } else {
                sample_pair(candidates, rng).ok_or(unsatisfiable)?
            };
            ids.push(next);
        }
        Ok(ids)
    }

    fn candidates<'m>(
        &self,
        model: &'m NonHomogeneousModel,
        beat: usize,
        current: RhythmId,
    ) -> Result<&'m [(RhythmId, f64)], GenerationError> {
        match model.candidates(beat, current) {
            Some(c) if !c.is_empty() => Ok(c),
            _ => {
                log::warn!(
                    target: self.log_target,
                    "no surviving continuation from id {current} at step {beat}"
                );
                Err(GenerationError::UnsatisfiableConstraint {
                    stage: PipelineStage::Sampling,
                    step: beat + 1,
                })
            }
        }
    }

    pub fn decode(&self, ids: &[RhythmId]) -> Pattern {
        self.codec.decode(ids, &self.voice)
    }

    /// Generate a bassline of `beat_length` beats. Without a target the
    /// homogeneous model is used; with one, the line interlocks with it and
    /// is cut to the target's length.
    pub fn generate_bass_rhythm(
        &self,
        model: &MatrixMarkovModel,
        beat_length: usize,
        target: Option<&Pattern>,
        seed: u64,
    ) -> Result<Pattern, GenerationError> {
        let mut rng = LoopRng::new(seed);
        let ids = match target {
            None => self.sample_unconstrained(&model.rhythm_model(), beat_length, &mut rng)?,
            Some(anchor) => {
                let filter = ConstraintFilter::new().with_log_target(self.log_target);
                let nhmm = filter.interlocking(model, anchor)?;
                self.sample_interlocked(&nhmm, beat_length, &mut rng)?
            }
        };
        log::debug!(target: self.log_target, "generated ids {ids:?}");
        Ok(self.decode(&ids))
    }

    /// Vary `target_pattern`: beats flagged to preserve are kept, the rest
    /// are redrawn consistently with the model.
    pub fn generate_bass_rhythm_variation(
        &self,
        model: &MatrixMarkovModel,
        target_pattern: &Pattern,
        preserve: &[bool],
        seed: u64,
    ) -> Result<Pattern, GenerationError> {
        let target_ids = self.codec.encode_pattern(target_pattern);
        if preserve.len() < target_ids.len() {
            return Err(GenerationError::InvalidTarget(format!(
                "variation mask covers {} beats, target has {}",
                preserve.len(),
                target_ids.len()
            )));
        }
        let filter = ConstraintFilter::new().with_log_target(self.log_target);
        let mask = VariationMask::from_preserve(&target_ids, &preserve[..target_ids.len()])?;
        let nhmm = filter.variation(model, &mask)?;
        let mut rng = LoopRng::new(seed);
        let ids = self.sample_variation(&nhmm, &mask, &mut rng)?;
        Ok(self.decode(&ids))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_index_picks_first_bin_above_r() {
        let w = [0.2, 0.5, 0.3];
        assert_eq!(sample_index(w, 0.0), Some(0));
        assert_eq!(sample_index(w, 0.19), Some(0));
        assert_eq!(sample_index(w, 0.2), Some(1));
        assert_eq!(sample_index(w, 0.69), Some(1));
        assert_eq!(sample_index(w, 0.7), Some(2));
        assert_eq!(sample_index(w, 0.999), Some(2));
    }

    #[test]
    fn sample_index_handles_empty_and_drift() {
        assert_eq!(sample_index(std::iter::empty::<f64>(), 0.5), None);
        // Bins summing slightly under 1 still yield the last candidate.
        assert_eq!(sample_index([0.5, 0.4999999], 0.99999999), Some(1));
    }

    #[test]
    fn sample_pair_is_seed_reproducible() {
        let candidates = [(1u8, 0.25), (2, 0.25), (3, 0.5)];
        let draw = |seed| {
            let mut rng = LoopRng::new(seed);
            (0..32)
                .map(|_| sample_pair(&candidates, &mut rng).unwrap())
                .collect::<Vec<_>>()
        };
        assert_eq!(draw(11), draw(11));
    }
}
