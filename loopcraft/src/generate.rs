// Pattern generation from a built order-N transition table.
//
// A walk first needs a start context: N symbols drawn uniformly from what
// was observed at steps 0..N-1, retried until the table knows that context
// at step N. From there each step looks up the last N generated symbols and
// draws the next one by inverse CDF (sampler.rs). An unknown context counts
// as a miss; the walk gives up after `miss_budget` consecutive misses.
//
// The generator borrows the table and never mutates it, so one table can
// serve any number of generators. Output depends only on table and seed.

use crate::config::MarkovConfig;
use crate::error::GenerationError;
use crate::pattern::{Event, Pattern, Tag};
use crate::sampler::sample_pair;
use crate::symbol::SymbolId;
use crate::table::TransitionTable;
use loopcraft_prng::LoopRng;

const DEFAULT_LOG_TARGET: &str = "loopcraft::generate";

/// Pitch and velocity for generated named-tag events.
const NAMED_PITCH: u8 = 100;
const NAMED_VELOCITY: u8 = 127;

pub struct PatternGenerator<'a> {
    table: &'a TransitionTable,
    start_attempts: usize,
    miss_budget: usize,
    log_target: &'static str,
}

impl<'a> PatternGenerator<'a> {
    pub fn new(table: &'a TransitionTable) -> Self {
        let defaults = MarkovConfig::default();
        PatternGenerator {
            table,
            start_attempts: defaults.start_attempts,
            miss_budget: defaults.miss_budget,
            log_target: DEFAULT_LOG_TARGET,
        }
    }

    /// Generator using the retry budgets of `config`.
    pub fn from_config(table: &'a TransitionTable, config: &MarkovConfig) -> Self {
        PatternGenerator {
            start_attempts: config.start_attempts,
            miss_budget: config.miss_budget,
            ..Self::new(table)
        }
    }

    pub fn with_log_target(mut self, target: &'static str) -> Self {
        self.log_target = target;
        self
    }

    /// Generate one loop as events.
    pub fn generate(&self, seed: u64) -> Result<Pattern, GenerationError> {
        let symbols = self.generate_symbols(seed)?;
        Ok(self.render(&symbols))
    }

    /// Generate one loop as a symbol per grid step.
    pub fn generate_symbols(&self, seed: u64) -> Result<Vec<SymbolId>, GenerationError> {
        let table = self.table;
        table.validate()?;
        if !table.is_built() {
            return Err(GenerationError::EmptyTable);
        }
        let mut rng = LoopRng::new(seed);
        let mut symbols = self.start_hypothesis(&mut rng)?;

        let mut step = table.order;
        let mut misses = 0;
        while step < table.num_steps {
            let context = &symbols[step - table.order..step];
            match table.get(step, context) {
                Some(candidates) => {
                    let next = sample_pair(candidates, &mut rng).ok_or(GenerationError::DeadEndTransition {
                        step,
                        misses,
                    })?;
                    symbols.push(next);
                    misses = 0;
                    step += 1;
                }
                None => {
                    misses += 1;
                    if misses >= self.miss_budget {
                        log::error!(
                            target: self.log_target,
                            "no transition from [{}] at step {step}",
                            table.symbols.context_label(context)
                        );
                        return Err(GenerationError::DeadEndTransition { step, misses });
                    }
                    log::warn!(
                        target: self.log_target,
                        "context [{}] not found at step {step}",
                        table.symbols.context_label(context)
                    );
                }
            }
        }
        Ok(symbols)
    }

    fn start_hypothesis(&self, rng: &mut LoopRng) -> Result<Vec<SymbolId>, GenerationError> {
        let table = self.table;
        let check_step = table.order % table.num_steps;
        if table.order == 0 {
            return if table.get(check_step, &[]).is_some() {
                Ok(Vec::new())
            } else {
                Err(GenerationError::NoStartHypothesis { attempts: 0 })
            };
        }
        let observed: Vec<Vec<SymbolId>> = (0..table.order)
            .map(|s| table.observed_at(s as isize))
            .collect();
        for attempt in 1..=self.start_attempts {
            let mut hypothesis = Vec::with_capacity(table.order);
            for options in &observed {
                match rng.choose(options) {
                    Some(&sym) => hypothesis.push(sym),
                    None => break,
                }
            }
            if hypothesis.len() == table.order && table.get(check_step, &hypothesis).is_some() {
                log::debug!(
                    target: self.log_target,
                    "start hypothesis [{}] after {attempt} attempt(s)",
                    table.symbols.context_label(&hypothesis)
                );
                return Ok(hypothesis);
            }
        }
        Err(GenerationError::NoStartHypothesis {
            attempts: self.start_attempts,
        })
    }

    /// One event per non-silence tag of each step's symbol.
    pub fn render(&self, symbols: &[SymbolId]) -> Pattern {
        let table = self.table;
        let step_size = table.loop_duration / table.num_steps as f64;
        let mut pattern = Pattern::new(table.loop_duration);
        for (idx, &sym) in symbols.iter().enumerate() {
            for tag in table.symbols.resolve(sym) {
                let pitch = match tag {
                    Tag::Silence => continue,
                    Tag::Note(n) => *n,
                    Tag::Name(_) => NAMED_PITCH,
                };
                pattern.add_event(Event::new(
                    idx as f64 * step_size,
                    step_size,
                    pitch,
                    NAMED_VELOCITY,
                    tag.clone(),
                ));
            }
        }
        pattern
    }
}

impl TransitionTable {
    /// Generate one loop with default retry budgets.
    pub fn generate_pattern(&self, seed: u64) -> Result<Pattern, GenerationError> {
        PatternGenerator::new(self).generate(seed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::TransitionTableBuilder;

    fn drum_loop(hits: &[(f64, &str)]) -> Pattern {
        let events = hits
            .iter()
            .map(|&(t, name)| Event::new(t, 0.25, 36, 100, Tag::name(name)))
            .collect();
        Pattern::with_events(events, 4.0)
    }

    fn corpus_table(order: usize) -> TransitionTable {
        let config = MarkovConfig {
            order,
            ..MarkovConfig::default()
        };
        let mut builder = TransitionTableBuilder::new(config).unwrap();
        builder.add_pattern(&drum_loop(&[(0.0, "kick"), (1.0, "snare"), (2.0, "kick"), (3.0, "snare")]));
        builder.add_pattern(&drum_loop(&[(0.0, "kick"), (1.5, "kick"), (2.0, "snare"), (3.5, "hat")]));
        builder.add_pattern(&drum_loop(&[(0.0, "kick"), (0.5, "hat"), (1.0, "snare"), (3.0, "snare")]));
        builder.build().unwrap()
    }

    #[test]
    fn same_seed_same_pattern() {
        for order in 0..=3 {
            let table = corpus_table(order);
            let a = table.generate_pattern(42).unwrap();
            let b = table.generate_pattern(42).unwrap();
            assert_eq!(a, b, "order {order}");
        }
    }

    #[test]
    fn every_symbol_is_a_known_successor() {
        for order in 1..=2 {
            let table = corpus_table(order);
            let generator = PatternGenerator::new(&table);
            for seed in 0..20 {
                let symbols = generator.generate_symbols(seed).unwrap();
                assert_eq!(symbols.len(), table.num_steps);
                for step in order..symbols.len() {
                    let next = table.get(step, &symbols[step - order..step]).unwrap();
                    assert!(next.iter().any(|&(s, _)| s == symbols[step]));
                }
            }
        }
    }

    #[test]
    fn events_land_on_grid_with_loop_duration() {
        let table = corpus_table(1);
        let pattern = table.generate_pattern(7).unwrap();
        assert_eq!(pattern.duration, 4.0);
        for e in &pattern.events {
            assert_eq!(e.duration, 0.25);
            assert_eq!((e.start_time * 4.0).fract(), 0.0);
            assert!(!e.tag.is_silence());
            assert_eq!(e.velocity, 127);
        }
    }

    #[test]
    fn unknown_table_is_empty() {
        let table = TransitionTable {
            steps: vec![Default::default(); 16],
            ..corpus_table(1)
        };
        assert!(matches!(table.generate_pattern(1), Err(GenerationError::EmptyTable)));
    }

    #[test]
    fn malformed_table_is_an_error() {
        let zero_steps = TransitionTable {
            num_steps: 0,
            ..corpus_table(1)
        };
        assert!(matches!(zero_steps.generate_pattern(1), Err(GenerationError::InvalidConfig(_))));

        let mut short = corpus_table(2);
        short.steps.truncate(4);
        assert!(matches!(short.generate_pattern(1), Err(GenerationError::InvalidConfig(_))));
    }

    #[test]
    fn start_hypothesis_exhaustion() {
        // Keep only step 0, so no start context is known at step 1.
        let mut table = corpus_table(1);
        for step in table.steps.iter_mut().skip(1) {
            *step = Default::default();
        }
        let err = PatternGenerator::new(&table).generate(3).unwrap_err();
        assert!(matches!(err, GenerationError::NoStartHypothesis { attempts: 30 }));
    }

    #[test]
    fn missing_context_exhausts_miss_budget() {
        let mut table = corpus_table(1);
        table.steps[5] = Default::default();
        let config = MarkovConfig {
            miss_budget: 3,
            ..MarkovConfig::default()
        };
        let err = PatternGenerator::from_config(&table, &config).generate(3).unwrap_err();
        assert!(matches!(err, GenerationError::DeadEndTransition { step: 5, misses: 3 }));
    }
}
