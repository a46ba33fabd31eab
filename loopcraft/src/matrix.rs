// Homogeneous first-order model over the 16 rhythm ids.
//
// Three count structures are accumulated from a corpus of paired voices
// (anchor = kick drum, voice = bassline):
// - initial: which id opens each voice sequence
// - temporal: id → next id within the voice, closed cyclically so the last
//   beat leads back to the first (generated loops repeat seamlessly)
// - interlocking: anchor id → voice id at the same beat
//
// Counts stay raw until `normalize()`; rows that never saw data stay all-zero
// and are unreachable. `rhythm_model()` exports the sparse generation table
// used when no constraint applies; constraint.rs derives the non-homogeneous
// variants from the same matrices.

use crate::error::ModelIoError;
use crate::pattern::Pattern;
use crate::rhythm::{NUM_IDS, RhythmId, RhythmIdCodec};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub type Matrix = [[f64; NUM_IDS]; NUM_IDS];

/// Initial vector plus temporal and interlocking matrices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkovMatrices {
    pub initial: [f64; NUM_IDS],
    pub temporal: Matrix,
    pub interlocking: Matrix,
}

impl Default for MarkovMatrices {
    fn default() -> Self {
        MarkovMatrices {
            initial: [0.0; NUM_IDS],
            temporal: [[0.0; NUM_IDS]; NUM_IDS],
            interlocking: [[0.0; NUM_IDS]; NUM_IDS],
        }
    }
}

impl MarkovMatrices {
    /// Row-stochastic copy; zero rows stay zero.
    pub fn normalized(&self) -> MarkovMatrices {
        let total: f64 = self.initial.iter().sum();
        let mut initial = self.initial;
        if total > 0.0 {
            for v in &mut initial {
                *v /= total;
            }
        }
        MarkovMatrices {
            initial,
            temporal: normalize_rows(&self.temporal),
            interlocking: normalize_rows(&self.interlocking),
        }
    }

    pub fn total_counts(&self) -> f64 {
        let initial: f64 = self.initial.iter().sum();
        let temporal: f64 = self.temporal.iter().flatten().sum();
        initial + temporal
    }
}

fn normalize_rows(m: &Matrix) -> Matrix {
    let mut out = *m;
    for row in &mut out {
        let sum: f64 = row.iter().sum();
        if sum > 0.0 {
            for v in row.iter_mut() {
                *v /= sum;
            }
        }
    }
    out
}

/// Sparse homogeneous generation table: initial distribution and, per id,
/// its reachable successors. Both lists are in ascending id order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HomogeneousModel {
    pub initial: Vec<(RhythmId, f64)>,
    /// Indexed by id; empty for unreachable ids.
    pub transitions: Vec<Vec<(RhythmId, f64)>>,
}

impl HomogeneousModel {
    pub fn next(&self, id: RhythmId) -> &[(RhythmId, f64)] {
        &self.transitions[id.index()]
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatrixMarkovModel {
    counts: MarkovMatrices,
    normalized: Option<MarkovMatrices>,
}

impl MatrixMarkovModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one voice sequence.
    ///
    /// `ids[0]` feeds the initial vector; interior pairs `ids[i-1] → ids[i]`
    /// for `0 < i < len-1` feed the temporal matrix, and the last id wraps to
    /// the first. A sequence of length M adds exactly M counts.
    pub fn add_temporal(&mut self, ids: &[RhythmId]) {
        let Some(&first) = ids.first() else {
            return;
        };
        self.counts.initial[first.index()] += 1.0;
        let last = ids.len() - 1;
        for i in 1..ids.len() {
            if i < last {
                self.counts.temporal[ids[i - 1].index()][ids[i].index()] += 1.0;
            } else {
                self.counts.temporal[ids[i].index()][first.index()] += 1.0;
            }
        }
        self.normalized = None;
    }

    /// Count beat-synchronous (anchor, voice) pairs up to the shorter length.
    pub fn add_interlocking(&mut self, anchor: &[RhythmId], voice: &[RhythmId]) {
        for (a, v) in anchor.iter().zip(voice) {
            self.counts.interlocking[a.index()][v.index()] += 1.0;
        }
        self.normalized = None;
    }

    /// Encode one anchor/voice pattern pair and count both relations.
    pub fn add_pair(&mut self, codec: &RhythmIdCodec, anchor: &Pattern, voice: &Pattern) {
        let voice_ids = codec.encode_pattern(voice);
        let anchor_ids = codec.encode_pattern(anchor);
        self.add_temporal(&voice_ids);
        self.add_interlocking(&anchor_ids, &voice_ids);
    }

    /// Build and normalize a model from (anchor, voice) pairs.
    pub fn from_corpus<'a>(pairs: impl IntoIterator<Item = (&'a Pattern, &'a Pattern)>) -> Self {
        let codec = RhythmIdCodec::new();
        let mut model = MatrixMarkovModel::new();
        for (anchor, voice) in pairs {
            model.add_pair(&codec, anchor, voice);
        }
        model.normalize();
        model
    }

    /// Add another model's raw counts to this one.
    pub fn merge(&mut self, other: &MatrixMarkovModel) {
        for i in 0..NUM_IDS {
            self.counts.initial[i] += other.counts.initial[i];
            for j in 0..NUM_IDS {
                self.counts.temporal[i][j] += other.counts.temporal[i][j];
                self.counts.interlocking[i][j] += other.counts.interlocking[i][j];
            }
        }
        self.normalized = None;
    }

    pub fn normalize(&mut self) {
        self.normalized = Some(self.counts.normalized());
    }

    pub fn is_normalized(&self) -> bool {
        self.normalized.is_some()
    }

    pub fn counts(&self) -> &MarkovMatrices {
        &self.counts
    }

    /// Normalized matrices; computed on the fly if `normalize()` has not run
    /// since the last update.
    pub fn probabilities(&self) -> MarkovMatrices {
        match &self.normalized {
            Some(m) => m.clone(),
            None => self.counts.normalized(),
        }
    }

    /// Export the homogeneous table restricted to nonzero support.
    pub fn rhythm_model(&self) -> HomogeneousModel {
        let m = self.probabilities();
        let initial = RhythmId::all()
            .filter(|id| m.initial[id.index()] > 0.0)
            .map(|id| (id, m.initial[id.index()]))
            .collect();
        let transitions = RhythmId::all()
            .map(|from| {
                let row = &m.temporal[from.index()];
                let sum: f64 = row.iter().sum();
                if sum <= 0.0 {
                    return Vec::new();
                }
                RhythmId::all()
                    .filter(|to| row[to.index()] > 0.0)
                    .map(|to| (to, row[to.index()] / sum))
                    .collect()
            })
            .collect();
        HomogeneousModel {
            initial,
            transitions,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn save(&self, path: &Path) -> Result<(), ModelIoError> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ModelIoError> {
        let data = std::fs::read_to_string(path)?;
        Ok(Self::from_json(&data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(values: &[u8]) -> Vec<RhythmId> {
        values.iter().map(|&v| RhythmId::new(v).unwrap()).collect()
    }

    #[test]
    fn add_temporal_adds_m_counts_with_wraparound() {
        let mut model = MatrixMarkovModel::new();
        model.add_temporal(&ids(&[8, 2, 10, 4]));
        assert_eq!(model.counts().total_counts(), 4.0);
        let t = &model.counts().temporal;
        assert_eq!(model.counts().initial[8], 1.0);
        assert_eq!(t[8][2], 1.0);
        assert_eq!(t[2][10], 1.0);
        // last → first closure
        assert_eq!(t[4][8], 1.0);
        // the pair just before the wrap is not counted
        assert_eq!(t[10][4], 0.0);
    }

    #[test]
    fn add_temporal_two_ids_only_wraps() {
        let mut model = MatrixMarkovModel::new();
        model.add_temporal(&ids(&[3, 5]));
        assert_eq!(model.counts().total_counts(), 2.0);
        assert_eq!(model.counts().temporal[5][3], 1.0);
    }

    #[test]
    fn single_id_sequence_only_counts_initial() {
        let mut model = MatrixMarkovModel::new();
        model.add_temporal(&ids(&[7]));
        assert_eq!(model.counts().total_counts(), 1.0);
    }

    #[test]
    fn interlocking_stops_at_shorter_sequence() {
        let mut model = MatrixMarkovModel::new();
        model.add_interlocking(&ids(&[8, 8, 0]), &ids(&[1, 2]));
        let sum: f64 = model.counts().interlocking.iter().flatten().sum();
        assert_eq!(sum, 2.0);
        assert_eq!(model.counts().interlocking[8][1], 1.0);
    }

    #[test]
    fn normalize_keeps_zero_rows_zero() {
        let mut model = MatrixMarkovModel::new();
        model.add_temporal(&ids(&[8, 8, 2, 8]));
        model.normalize();
        let m = model.probabilities();
        for (i, row) in m.temporal.iter().enumerate() {
            let sum: f64 = row.iter().sum();
            assert!(sum == 0.0 || (sum - 1.0).abs() < 1e-12, "row {i} sums to {sum}");
        }
        assert_eq!(m.temporal[0].iter().sum::<f64>(), 0.0);
        assert_eq!(m.initial[8], 1.0);
    }

    #[test]
    fn rhythm_model_restricts_to_support() {
        let mut model = MatrixMarkovModel::new();
        model.add_temporal(&ids(&[8, 2, 8, 10, 8]));
        model.normalize();
        let hm = model.rhythm_model();
        assert_eq!(hm.initial, vec![(RhythmId::METRONOME, 1.0)]);
        let next: Vec<u8> = hm.next(RhythmId::METRONOME).iter().map(|(id, _)| id.value()).collect();
        assert_eq!(next, vec![2, 10]);
        assert!(hm.next(RhythmId::new(0).unwrap()).is_empty());
    }

    #[test]
    fn merge_equals_joint_accumulation() {
        let mut a = MatrixMarkovModel::new();
        a.add_temporal(&ids(&[8, 2, 8]));
        let mut b = MatrixMarkovModel::new();
        b.add_temporal(&ids(&[10, 10, 8]));
        let mut joint = MatrixMarkovModel::new();
        joint.add_temporal(&ids(&[8, 2, 8]));
        joint.add_temporal(&ids(&[10, 10, 8]));
        a.merge(&b);
        assert_eq!(a.counts(), joint.counts());
    }

    #[test]
    fn json_roundtrip_keeps_counts_and_normalization() {
        let mut model = MatrixMarkovModel::new();
        model.add_temporal(&ids(&[8, 2, 10, 4]));
        model.add_interlocking(&ids(&[8, 0, 8, 0]), &ids(&[8, 2, 10, 4]));
        model.normalize();
        let back = MatrixMarkovModel::from_json(&model.to_json().unwrap()).unwrap();
        assert!(back.is_normalized());
        assert_eq!(back.counts(), model.counts());
        assert_eq!(back.rhythm_model(), model.rhythm_model());
    }
}
