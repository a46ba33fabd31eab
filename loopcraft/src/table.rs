// Time-indexed order-N transition tables.
//
// For every grid step `s` the table maps a context (the symbols at steps
// s-N..s-1, wrapping around the loop) to a distribution over the symbol seen
// at `s`. Unlike a homogeneous chain, each step has its own map, so the
// model keeps track of where in the bar it is.
//
// Both levels of the map preserve insertion order (`IndexMap`): the sampler
// walks candidates in that order when building its cumulative bins, so
// reproducible output depends on it. Persisted tables keep the same order.
//
// See generate.rs for sampling from a built table.

use crate::config::MarkovConfig;
use crate::error::{GenerationError, ModelIoError};
use crate::pattern::Pattern;
use crate::quantize::{GridQuantizer, QuantizedPattern};
use crate::symbol::{SymbolId, SymbolTable};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::Path;

const DEFAULT_LOG_TARGET: &str = "loopcraft::table";

/// Preceding symbols, oldest first. Length equals the table order.
pub type Context = Vec<SymbolId>;

/// One context's distribution, as stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub context: Context,
    pub next: Vec<(SymbolId, f64)>,
}

/// Context → ordered (next symbol, probability) list for one step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<ContextEntry>", into = "Vec<ContextEntry>")]
pub struct StepTable {
    entries: IndexMap<Context, Vec<(SymbolId, f64)>>,
}

impl StepTable {
    pub fn get(&self, context: &[SymbolId]) -> Option<&[(SymbolId, f64)]> {
        self.entries.get(context).map(Vec::as_slice)
    }

    pub fn contains(&self, context: &[SymbolId]) -> bool {
        self.entries.contains_key(context)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Context, &[(SymbolId, f64)])> {
        self.entries.iter().map(|(c, n)| (c, n.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl From<Vec<ContextEntry>> for StepTable {
    fn from(entries: Vec<ContextEntry>) -> Self {
        StepTable {
            entries: entries.into_iter().map(|e| (e.context, e.next)).collect(),
        }
    }
}

impl From<StepTable> for Vec<ContextEntry> {
    fn from(table: StepTable) -> Self {
        table
            .entries
            .into_iter()
            .map(|(context, next)| ContextEntry { context, next })
            .collect()
    }
}

/// A built, normalized order-N table. Immutable during generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionTable {
    pub order: usize,
    pub num_steps: usize,
    pub loop_duration: f64,
    pub symbols: SymbolTable,
    pub steps: Vec<StepTable>,
}

impl TransitionTable {
    /// Distribution at `step` for `context`, if that context was observed.
    pub fn get(&self, step: usize, context: &[SymbolId]) -> Option<&[(SymbolId, f64)]> {
        self.steps.get(step).and_then(|t| t.get(context))
    }

    pub fn is_built(&self) -> bool {
        self.steps.iter().any(|s| !s.is_empty())
    }

    /// Grid step of a possibly negative or overflowing index.
    pub fn wrap_step(&self, step: isize) -> usize {
        step.rem_euclid(self.num_steps as isize) as usize
    }

    /// Contexts known at `step`, in insertion order.
    pub fn in_states_at(&self, step: isize) -> Vec<&Context> {
        self.steps[self.wrap_step(step)].iter().map(|(c, _)| c).collect()
    }

    /// Distinct successor symbols at `step`, first-seen order.
    pub fn out_states_at(&self, step: isize) -> Vec<SymbolId> {
        let mut out = Vec::new();
        for (_, next) in self.steps[self.wrap_step(step)].iter() {
            for &(sym, _) in next {
                if !out.contains(&sym) {
                    out.push(sym);
                }
            }
        }
        out
    }

    /// Distinct symbols observed at `step`: as a successor there, or as the
    /// last element of a context one step later.
    pub fn observed_at(&self, step: isize) -> Vec<SymbolId> {
        let mut out = self.out_states_at(step);
        if self.order > 0 {
            for context in self.in_states_at(step + 1) {
                if let Some(&last) = context.last() {
                    if !out.contains(&last) {
                        out.push(last);
                    }
                }
            }
        }
        out
    }

    /// Every symbol appearing anywhere in the table, sorted by id.
    pub fn all_states(&self) -> Vec<SymbolId> {
        let mut states: Vec<SymbolId> = self
            .steps
            .iter()
            .flat_map(|t| {
                t.iter()
                    .flat_map(|(c, n)| c.iter().copied().chain(n.iter().map(|&(s, _)| s)))
            })
            .collect();
        states.sort();
        states.dedup();
        states
    }

    /// Dense probability matrix at `step`: rows are contexts, columns are
    /// successor symbols, both in the order returned alongside.
    pub fn matrix_at_step(&self, step: isize) -> (Vec<Vec<f64>>, Vec<Context>, Vec<SymbolId>) {
        let ins: Vec<Context> = self.in_states_at(step).into_iter().cloned().collect();
        let outs = self.out_states_at(step);
        let mut matrix = vec![vec![0.0; outs.len()]; ins.len()];
        for (row, (_, next)) in self.steps[self.wrap_step(step)].iter().enumerate() {
            for &(sym, p) in next {
                if let Some(col) = outs.iter().position(|&o| o == sym) {
                    matrix[row][col] += p;
                }
            }
        }
        (matrix, ins, outs)
    }

    /// Human-readable dump, one block per step.
    pub fn describe(&self) -> String {
        let mut out = format!(
            "order({}), loop_duration({}), num_steps({})\n",
            self.order, self.loop_duration, self.num_steps
        );
        for (step, table) in self.steps.iter().enumerate() {
            let _ = writeln!(out, "step {step}");
            for (context, next) in table.iter() {
                let dist = next
                    .iter()
                    .map(|&(s, p)| format!("{}: {:.3}", self.symbols.label(s), p))
                    .collect::<Vec<_>>()
                    .join(", ");
                let _ = writeln!(out, "  [{}] -> {}", self.symbols.context_label(context), dist);
            }
        }
        out
    }

    /// Check the shape a generator relies on: one step table per grid step,
    /// contexts of exactly `order` symbols, and only interned symbol ids.
    pub fn validate(&self) -> Result<(), GenerationError> {
        let invalid = |msg: String| Err(GenerationError::InvalidConfig(msg));
        if self.num_steps == 0 {
            return invalid("num_steps must be positive".into());
        }
        if self.order > self.num_steps {
            return invalid(format!("order {} exceeds num_steps {}", self.order, self.num_steps));
        }
        if !(self.loop_duration.is_finite() && self.loop_duration > 0.0) {
            return invalid(format!("loop_duration must be positive, got {}", self.loop_duration));
        }
        if self.steps.len() != self.num_steps {
            return invalid(format!(
                "{} step tables for {} steps",
                self.steps.len(),
                self.num_steps
            ));
        }
        let known = |sym: &SymbolId| (sym.0 as usize) < self.symbols.len();
        for (step, table) in self.steps.iter().enumerate() {
            for (context, next) in table.iter() {
                if context.len() != self.order {
                    return invalid(format!(
                        "context of length {} at step {step}, order is {}",
                        context.len(),
                        self.order
                    ));
                }
                if !context.iter().all(known) || !next.iter().all(|(sym, _)| known(sym)) {
                    return invalid(format!("unknown symbol at step {step}"));
                }
            }
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse and validate a persisted table.
    pub fn from_json(json: &str) -> Result<Self, ModelIoError> {
        let table: TransitionTable = serde_json::from_str(json)?;
        table.validate()?;
        Ok(table)
    }

    pub fn save(&self, path: &Path) -> Result<(), ModelIoError> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ModelIoError> {
        let data = std::fs::read_to_string(path)?;
        Self::from_json(&data)
    }
}

/// Accumulates step/context/symbol counts over a corpus.
#[derive(Debug, Clone)]
pub struct TransitionTableBuilder {
    config: MarkovConfig,
    quantizer: GridQuantizer,
    symbols: SymbolTable,
    counts: Vec<IndexMap<Context, IndexMap<SymbolId, u32>>>,
    patterns_added: usize,
    log_target: &'static str,
}

impl TransitionTableBuilder {
    pub fn new(config: MarkovConfig) -> Result<Self, GenerationError> {
        config.validate()?;
        Ok(TransitionTableBuilder {
            quantizer: GridQuantizer::new(config.num_steps, config.loop_duration),
            counts: vec![IndexMap::new(); config.num_steps],
            symbols: SymbolTable::new(),
            patterns_added: 0,
            log_target: DEFAULT_LOG_TARGET,
            config,
        })
    }

    pub fn with_log_target(mut self, target: &'static str) -> Self {
        self.log_target = target;
        self.quantizer = self.quantizer.with_log_target(target);
        self
    }

    pub fn config(&self) -> &MarkovConfig {
        &self.config
    }

    /// Quantize one pattern and count its transitions.
    pub fn add_pattern(&mut self, pattern: &Pattern) {
        let quantized = self.quantizer.quantize(pattern);
        self.add_quantized(&quantized);
    }

    pub fn add_patterns<'a>(&mut self, patterns: impl IntoIterator<Item = &'a Pattern>) {
        for p in patterns {
            self.add_pattern(p);
        }
    }

    /// Count transitions of an already quantized pattern.
    pub fn add_quantized(&mut self, pattern: &QuantizedPattern) {
        let ids: Vec<SymbolId> = pattern
            .steps
            .iter()
            .map(|tags| self.symbols.intern(tags))
            .collect();
        let len = ids.len() as isize;
        let order = self.config.order as isize;
        for step in 0..self.config.num_steps.min(ids.len()) {
            let s = step as isize;
            let context: Context = (s - order..s)
                .map(|i| ids[i.rem_euclid(len) as usize])
                .collect();
            *self.counts[step]
                .entry(context)
                .or_default()
                .entry(ids[step])
                .or_insert(0) += 1;
        }
        self.patterns_added += 1;
        log::debug!(
            target: self.log_target,
            "added pattern {} ({} symbols interned)",
            self.patterns_added,
            self.symbols.len()
        );
    }

    /// Normalize counts into a table. Fails if nothing was added.
    pub fn build(&self) -> Result<TransitionTable, GenerationError> {
        if self.patterns_added == 0 {
            return Err(GenerationError::EmptyTable);
        }
        let steps = self
            .counts
            .iter()
            .map(|step| StepTable {
                entries: step
                    .iter()
                    .map(|(context, next)| (context.clone(), normalize_counts(next)))
                    .collect(),
            })
            .collect();
        log::info!(
            target: self.log_target,
            "built order-{} table over {} steps from {} patterns",
            self.config.order,
            self.config.num_steps,
            self.patterns_added
        );
        Ok(TransitionTable {
            order: self.config.order,
            num_steps: self.config.num_steps,
            loop_duration: self.config.loop_duration,
            symbols: self.symbols.clone(),
            steps,
        })
    }
}

fn normalize_counts(counts: &IndexMap<SymbolId, u32>) -> Vec<(SymbolId, f64)> {
    let total: u32 = counts.values().sum();
    counts
        .iter()
        .map(|(&sym, &c)| (sym, c as f64 / total as f64))
        .collect()
}
