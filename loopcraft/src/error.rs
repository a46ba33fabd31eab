// Error types for model building, generation, persistence, and MIDI I/O.
//
// Sampling-phase failures propagate to the caller because there is no safe
// default continuation: the caller decides whether to retry with another seed
// or a relaxed constraint. Build-phase data-quality issues (duration drift,
// ambiguous silences, kick mismatches) are logged by the component that sees
// them and never appear here.

use std::fmt;

/// Where in the constrained pipeline a failure was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    /// Turning matrices into domains and encoding the target.
    Domainized,
    /// Building and sweeping the per-step domains.
    Filtered,
    /// Drawing ids from the filtered model.
    Sampling,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::Domainized => "domainize",
            PipelineStage::Filtered => "filter",
            PipelineStage::Sampling => "sample",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("no start hypothesis found after {attempts} attempts")]
    NoStartHypothesis { attempts: usize },

    #[error("no continuation found at step {step} after {misses} misses")]
    DeadEndTransition { step: usize, misses: usize },

    #[error("constraint unsatisfiable at step {step} (stage: {stage})")]
    UnsatisfiableConstraint { stage: PipelineStage, step: usize },

    #[error("invalid target: {0}")]
    InvalidTarget(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("transition table is empty; add patterns before generating")]
    EmptyTable,
}

/// Failure loading or saving a model or config file.
#[derive(Debug, thiserror::Error)]
pub enum ModelIoError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid model: {0}")]
    Invalid(#[from] GenerationError),
}

/// Failure reading or writing a Standard MIDI File.
#[derive(Debug, thiserror::Error)]
pub enum MidiError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("MIDI parse error: {0}")]
    Parse(#[from] midly::Error),

    #[error("unsupported MIDI timing: only metrical (ticks per quarter) files are read")]
    UnsupportedTiming,
}
