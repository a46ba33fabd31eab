// Loopcraft: corpus-trained rhythm pattern generation.
//
// Learns from small corpora of looped patterns (drum loops, basslines) and
// generates new loops in the same style. Two model families:
// - an order-N Markov table indexed by grid step, so the model knows where
//   in the bar it is (drum loops)
// - a first-order model over 16 per-beat rhythm ids with a constraint
//   filter that turns it into a time-varying model, used to interlock a
//   bassline with a kick pattern or to vary an existing line while keeping
//   chosen beats (basslines)
//
// Architecture:
// - pattern.rs: Event/Pattern values in beats, with tags
// - quantize.rs: Snapping patterns onto the step grid
// - symbol.rs: Interning of per-step tag sets
// - table.rs: Order-N step tables (build, query, persist)
// - generate.rs: Walking a step table into a new loop
// - rhythm.rs: Beat ↔ rhythm id codec
// - matrix.rs: Initial/temporal/interlocking count matrices
// - constraint.rs: Interlocking and variation filters (non-homogeneous model)
// - sampler.rs: Inverse-CDF draws and the bassline generation modes
// - config.rs: JSON-loadable settings
// - midi.rs: MIDI import/export
// - error.rs: Error enums
//
// Generation is deterministic given a seed (loopcraft_prng::LoopRng).

pub mod config;
pub mod constraint;
pub mod error;
pub mod generate;
pub mod matrix;
pub mod midi;
pub mod pattern;
pub mod quantize;
pub mod rhythm;
pub mod sampler;
pub mod symbol;
pub mod table;
