// Constraint filtering: homogeneous matrices → non-homogeneous model.
//
// Both filters work on per-step domains `V[i]: id at beat i → ids allowed at
// beat i+1`. The interlocking filter intersects the temporal domains with
// what the corpus has played against each anchor (kick) id; the variation
// filter pins some beats of an existing line and leaves the rest free.
//
// After construction a single consistency sweep runs: one forward pass
// restricting each step's continuations to keys that exist at the next step,
// then one cleanup pass dropping keys whose continuations emptied and
// re-restricting the step before. At step 1 the step before wraps to the last
// step. The sweep is not iterated to a fixed point, so a kept key can be left
// without continuations; the filter reports that as `UnsatisfiableConstraint`.
//
// Probabilities on export come from the normalized temporal matrix,
// renormalized over whatever survived.

use crate::error::{GenerationError, PipelineStage};
use crate::matrix::{MarkovMatrices, Matrix, MatrixMarkovModel};
use crate::pattern::Pattern;
use crate::rhythm::{NUM_IDS, RhythmId, RhythmIdCodec};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

const DEFAULT_LOG_TARGET: &str = "loopcraft::constraint";

/// Set of rhythm ids, one bit per id. Iterates in ascending id order.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct IdSet(u16);

impl IdSet {
    pub fn empty() -> Self {
        IdSet(0)
    }

    pub fn single(id: RhythmId) -> Self {
        IdSet(1 << id.index())
    }

    pub fn insert(&mut self, id: RhythmId) {
        self.0 |= 1 << id.index();
    }

    pub fn contains(self, id: RhythmId) -> bool {
        self.0 & (1 << id.index()) != 0
    }

    pub fn intersection(self, other: IdSet) -> IdSet {
        IdSet(self.0 & other.0)
    }

    pub fn union(self, other: IdSet) -> IdSet {
        IdSet(self.0 | other.0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(self) -> impl Iterator<Item = RhythmId> {
        RhythmId::all().filter(move |&id| self.contains(id))
    }

    /// Ids whose entry in `row` is positive.
    pub fn support(row: &[f64; NUM_IDS]) -> IdSet {
        RhythmId::all().filter(|id| row[id.index()] > 0.0).collect()
    }
}

impl FromIterator<RhythmId> for IdSet {
    fn from_iter<I: IntoIterator<Item = RhythmId>>(iter: I) -> Self {
        let mut set = IdSet::empty();
        for id in iter {
            set.insert(id);
        }
        set
    }
}

impl fmt::Debug for IdSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter().map(RhythmId::value)).finish()
    }
}

/// Support of the model matrices: which ids can open a line (`initial`),
/// follow each id (`temporal`), and sound against each anchor id
/// (`interlocking`). Rows that never saw data are empty.
#[derive(Debug, Clone, PartialEq)]
pub struct Domains {
    pub initial: IdSet,
    pub temporal: [IdSet; NUM_IDS],
    pub interlocking: [IdSet; NUM_IDS],
}

impl Domains {
    pub fn from_matrices(m: &MarkovMatrices) -> Self {
        Domains {
            initial: IdSet::support(&m.initial),
            temporal: rows_support(&m.temporal),
            interlocking: rows_support(&m.interlocking),
        }
    }
}

fn rows_support(m: &Matrix) -> [IdSet; NUM_IDS] {
    let mut out = [IdSet::empty(); NUM_IDS];
    for (set, row) in out.iter_mut().zip(m) {
        *set = IdSet::support(row);
    }
    out
}

/// Per-step domains: `domain[i][id]` is the set of ids allowed at beat i+1
/// after `id` at beat i.
pub type ConstraintDomain = Vec<BTreeMap<RhythmId, IdSet>>;

fn key_set(map: &BTreeMap<RhythmId, IdSet>) -> IdSet {
    map.keys().copied().collect()
}

/// One forward restriction pass plus one cleanup pass.
fn sweep(domain: &mut ConstraintDomain) {
    let len = domain.len();
    let mut emptied: Vec<Vec<RhythmId>> = vec![Vec::new(); len];
    for step in 1..len {
        let next_keys = key_set(&domain[step]);
        for (&key, allowed) in domain[step - 1].iter_mut() {
            *allowed = allowed.intersection(next_keys);
            if allowed.is_empty() {
                emptied[step].push(key);
            }
        }
    }
    for step in 1..len {
        if emptied[step].is_empty() {
            continue;
        }
        for key in &emptied[step] {
            domain[step - 1].remove(key);
        }
        let keys = key_set(&domain[step - 1]);
        let before = if step >= 2 { step - 2 } else { len - 1 };
        for allowed in domain[before].values_mut() {
            *allowed = allowed.intersection(keys);
        }
    }
}

/// `(id, probability)` over the positive-weight members of `set`,
/// renormalized. Empty if nothing in `set` has weight.
fn weighted(row: &[f64; NUM_IDS], set: IdSet) -> Vec<(RhythmId, f64)> {
    let sum: f64 = set.iter().map(|id| row[id.index()]).sum();
    if sum <= 0.0 {
        return Vec::new();
    }
    set.iter()
        .filter(|id| row[id.index()] > 0.0)
        .map(|id| (id, row[id.index()] / sum))
        .collect()
}

/// Time-varying generation table produced by a constraint filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NonHomogeneousModel {
    /// Distribution of the first id, ascending id order.
    pub initial: Vec<(RhythmId, f64)>,
    /// `steps[i][id]`: candidates for beat i+1 after `id` at beat i.
    pub steps: Vec<BTreeMap<RhythmId, Vec<(RhythmId, f64)>>>,
}

impl NonHomogeneousModel {
    /// Number of beats a walk through this model covers.
    pub fn positions(&self) -> usize {
        self.steps.len() + 1
    }

    pub fn candidates(&self, beat: usize, id: RhythmId) -> Option<&[(RhythmId, f64)]> {
        self.steps.get(beat)?.get(&id).map(Vec::as_slice)
    }

    fn from_domain(
        initial: Vec<(RhythmId, f64)>,
        temporal: &Matrix,
        domain: &ConstraintDomain,
    ) -> Self {
        let steps = domain
            .iter()
            .map(|map| {
                map.iter()
                    .map(|(&key, &allowed)| (key, weighted(&temporal[key.index()], allowed)))
                    .collect()
            })
            .collect();
        NonHomogeneousModel { initial, steps }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaskSlot {
    pub literal: RhythmId,
    pub preserve: bool,
}

/// Which beats of a target line must be kept.
///
/// The compact form is a signed integer per beat, `id × mask` with mask in
/// {1, -1}: non-negative keeps the id, negative varies it. A literal id 0
/// has no negative form, so asking to vary it keeps it instead; those beats
/// are listed in `ambiguous_positions`.
#[derive(Debug, Clone, PartialEq)]
pub struct VariationMask {
    slots: Vec<MaskSlot>,
    ambiguous: Vec<usize>,
}

impl VariationMask {
    pub fn from_masked(masked: &[i32]) -> Result<Self, GenerationError> {
        let slots = masked
            .iter()
            .map(|&m| -> Result<MaskSlot, GenerationError> {
                let literal = u8::try_from(m.unsigned_abs())
                    .ok()
                    .and_then(RhythmId::new)
                    .ok_or_else(|| GenerationError::InvalidTarget(format!("mask value {m} is not a rhythm id")))?;
                Ok(MaskSlot {
                    literal,
                    preserve: m >= 0,
                })
            })
            .collect::<Result<Vec<_>, GenerationError>>()?;
        Ok(VariationMask {
            slots,
            ambiguous: Vec::new(),
        })
    }

    pub fn from_preserve(ids: &[RhythmId], preserve: &[bool]) -> Result<Self, GenerationError> {
        if ids.len() != preserve.len() {
            return Err(GenerationError::InvalidTarget(format!(
                "mask has {} positions, target has {}",
                preserve.len(),
                ids.len()
            )));
        }
        let mut ambiguous = Vec::new();
        let slots = ids
            .iter()
            .zip(preserve)
            .enumerate()
            .map(|(i, (&literal, &keep))| {
                if !keep && literal.value() == 0 {
                    ambiguous.push(i);
                }
                MaskSlot {
                    literal,
                    preserve: keep || literal.value() == 0,
                }
            })
            .collect();
        Ok(VariationMask { slots, ambiguous })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slots(&self) -> &[MaskSlot] {
        &self.slots
    }

    pub fn literals(&self) -> Vec<RhythmId> {
        self.slots.iter().map(|s| s.literal).collect()
    }

    pub fn is_preserved(&self, pos: usize) -> bool {
        self.slots.get(pos).is_some_and(|s| s.preserve)
    }

    /// The compact `id × mask` encoding.
    pub fn masked(&self) -> Vec<i32> {
        self.slots
            .iter()
            .map(|s| {
                let id = i32::from(s.literal.value());
                if s.preserve { id } else { -id }
            })
            .collect()
    }

    /// Beats where varying was requested on literal id 0.
    pub fn ambiguous_positions(&self) -> &[usize] {
        &self.ambiguous
    }
}

/// Builds non-homogeneous models from a matrix model under a constraint.
#[derive(Debug, Clone)]
pub struct ConstraintFilter {
    codec: RhythmIdCodec,
    log_target: &'static str,
}

impl Default for ConstraintFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstraintFilter {
    pub fn new() -> Self {
        ConstraintFilter {
            codec: RhythmIdCodec::new(),
            log_target: DEFAULT_LOG_TARGET,
        }
    }

    pub fn with_log_target(mut self, target: &'static str) -> Self {
        self.log_target = target;
        self
    }

    /// Restrict the model to lines that interlock with `anchor`.
    pub fn interlocking(
        &self,
        model: &MatrixMarkovModel,
        anchor: &Pattern,
    ) -> Result<NonHomogeneousModel, GenerationError> {
        let ids = self.codec.encode_pattern(anchor);
        self.interlocking_ids(model, &ids)
    }

    pub fn interlocking_ids(
        &self,
        model: &MatrixMarkovModel,
        anchor: &[RhythmId],
    ) -> Result<NonHomogeneousModel, GenerationError> {
        let len = anchor.len();
        if len < 2 {
            return Err(GenerationError::InvalidTarget(format!(
                "interlocking target needs at least 2 beats, got {len}"
            )));
        }
        let probs = model.probabilities();
        let dom = Domains::from_matrices(&probs);

        let metronome = dom.interlocking[RhythmId::METRONOME.index()];
        let mut allowed: Vec<IdSet> = Vec::with_capacity(len);
        for (beat, &id) in anchor.iter().enumerate() {
            let row = dom.interlocking[id.index()];
            if !row.is_empty() {
                allowed.push(row);
                continue;
            }
            log::warn!(
                target: self.log_target,
                "kick pattern mismatch at beat {beat}: id {id} never seen in corpus, \
                 using metronome row"
            );
            if metronome.is_empty() {
                return Err(GenerationError::UnsatisfiableConstraint {
                    stage: PipelineStage::Domainized,
                    step: beat,
                });
            }
            allowed.push(metronome);
        }

        let mut domain: ConstraintDomain = Vec::with_capacity(len - 1);
        let mut first = BTreeMap::new();
        for f in dom.initial.intersection(allowed[0]).iter() {
            let next = dom.temporal[f.index()].intersection(allowed[1]);
            if !next.is_empty() {
                first.insert(f, next);
            }
        }
        domain.push(first);
        for step in 1..len - 1 {
            let mut map = BTreeMap::new();
            for t in allowed[step].iter() {
                let next = dom.temporal[t.index()].intersection(allowed[step + 1]);
                if !next.is_empty() {
                    map.insert(t, next);
                }
            }
            domain.push(map);
        }

        sweep(&mut domain);
        self.check_nonempty(&domain)?;

        let initial = weighted(&probs.initial, key_set(&domain[0]));
        if initial.is_empty() {
            return Err(GenerationError::UnsatisfiableConstraint {
                stage: PipelineStage::Filtered,
                step: 0,
            });
        }
        Ok(NonHomogeneousModel::from_domain(initial, &probs.temporal, &domain))
    }

    /// Restrict the model to lines that keep the preserved beats of `mask`.
    pub fn variation(
        &self,
        model: &MatrixMarkovModel,
        mask: &VariationMask,
    ) -> Result<NonHomogeneousModel, GenerationError> {
        let len = mask.len();
        if len < 2 {
            return Err(GenerationError::InvalidTarget(format!(
                "variation target needs at least 2 beats, got {len}"
            )));
        }
        for &pos in mask.ambiguous_positions() {
            log::warn!(
                target: self.log_target,
                "beat {pos} has id 0, which the mask cannot mark as varying; keeping it"
            );
        }
        let probs = model.probabilities();
        let dom = Domains::from_matrices(&probs);
        let literals = mask.literals();

        let mut domain: ConstraintDomain = Vec::with_capacity(len - 1);
        let first_next = if mask.is_preserved(1) {
            IdSet::single(literals[1])
        } else {
            dom.temporal[literals[0].index()]
        };
        domain.push(BTreeMap::from([(literals[0], first_next)]));

        for pos in 1..len - 1 {
            let prev = &domain[pos - 1];
            let mut map = BTreeMap::new();
            if mask.is_preserved(pos) {
                let id = literals[pos];
                if prev.values().any(|s| s.contains(id)) {
                    map.insert(id, dom.temporal[id.index()]);
                }
            } else {
                for id in prev.values().fold(IdSet::empty(), |acc, s| acc.union(*s)).iter() {
                    map.insert(id, dom.temporal[id.index()]);
                }
            }
            domain.push(map);
        }

        sweep(&mut domain);

        let last_id = IdSet::single(literals[len - 1]);
        if let Some(last) = domain.last_mut() {
            for allowed in last.values_mut() {
                let pinned = allowed.intersection(last_id);
                if !pinned.is_empty() {
                    *allowed = pinned;
                }
            }
        }
        self.check_nonempty(&domain)?;

        Ok(NonHomogeneousModel::from_domain(
            vec![(literals[0], 1.0)],
            &probs.temporal,
            &domain,
        ))
    }

    /// Every step needs a key, and every kept key a continuation.
    fn check_nonempty(&self, domain: &ConstraintDomain) -> Result<(), GenerationError> {
        for (step, map) in domain.iter().enumerate() {
            if map.is_empty() {
                log::warn!(target: self.log_target, "constraint domain empty at step {step}");
            } else if let Some(key) = map.iter().find_map(|(&k, s)| s.is_empty().then_some(k)) {
                log::warn!(
                    target: self.log_target,
                    "id {key} kept at step {step} with no continuation"
                );
            } else {
                continue;
            }
            return Err(GenerationError::UnsatisfiableConstraint {
                stage: PipelineStage::Filtered,
                step,
            });
        }
        Ok(())
    }
}
