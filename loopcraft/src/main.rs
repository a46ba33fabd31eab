// Loopcraft generator: CLI entry point.
//
// Two pipelines, one per model family:
// - `markov`: quantize drum loops → order-N step table → generate a loop
// - `bass`: encode paired bass/kick loops → rhythm-id matrices → generate a
//   bassline, optionally interlocked with a kick file or varied from an
//   existing bassline
// Both write the result as MIDI.
//
// Usage:
//   cargo run -p loopcraft -- markov loops/*.mid [--order N] [--seed N] [-o out.mid]
//     [--note-map 36=kick,38=snare] [--dump-table table.json] [--load-table table.json]
//   cargo run -p loopcraft -- bass --bass b1.mid --drums d1.mid [--target kick.mid]
//     [--vary bass.mid --mask 1,0,0,1] [--beats N] [--seed N] [-o out.mid]
//
// Settings come from `--config file.json` (see config.rs) with flags taking
// precedence. Set RUST_LOG=warn (or debug) to see corpus and sampling
// diagnostics.

use clap::{Args, Parser, Subcommand};
use loopcraft::config::GeneratorConfig;
use loopcraft::generate::PatternGenerator;
use loopcraft::matrix::MatrixMarkovModel;
use loopcraft::midi::{NoteMap, read_midi, write_midi};
use loopcraft::pattern::Pattern;
use loopcraft::sampler::RhythmSampler;
use loopcraft::table::{TransitionTable, TransitionTableBuilder};
use std::error::Error;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "loopgen")]
#[command(about = "Generate drum loops and basslines from MIDI corpora")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct CommonArgs {
    /// JSON generator config; missing fields use defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Seed for generation (default: derived from the clock)
    #[arg(long, global = true)]
    seed: Option<u64>,

    /// Output MIDI file
    #[arg(short, long, global = true, default_value = "output.mid")]
    output: PathBuf,

    /// Tempo of the written MIDI file
    #[arg(long, global = true)]
    tempo: Option<u16>,
}

#[derive(Subcommand)]
enum Commands {
    /// Build an order-N step table from drum loops and generate one loop
    Markov {
        /// Corpus MIDI files, one loop each
        inputs: Vec<PathBuf>,

        #[arg(long)]
        order: Option<usize>,

        #[arg(long)]
        num_steps: Option<usize>,

        /// Loop length in beats
        #[arg(long)]
        loop_duration: Option<f64>,

        /// Keep and rename only these notes, e.g. "36=kick,38=snare"
        #[arg(long)]
        note_map: Option<String>,

        /// Write the built table as JSON
        #[arg(long)]
        dump_table: Option<PathBuf>,

        /// Generate from a saved table instead of building one
        #[arg(long, conflicts_with = "inputs")]
        load_table: Option<PathBuf>,
    },

    /// Learn bass rhythms from paired bass/drum loops and generate a bassline
    Bass {
        /// Bass MIDI files
        #[arg(long, num_args = 1..)]
        bass: Vec<PathBuf>,

        /// Drum MIDI files, paired with --bass in order
        #[arg(long, num_args = 1..)]
        drums: Vec<PathBuf>,

        /// Load the matrix model from JSON instead of analyzing files
        #[arg(long)]
        model: Option<PathBuf>,

        /// Write the matrix model as JSON
        #[arg(long)]
        save_model: Option<PathBuf>,

        /// Drum file whose kick the bassline must interlock with
        #[arg(long, conflicts_with = "vary")]
        target: Option<PathBuf>,

        /// Bass file to vary
        #[arg(long, requires = "mask")]
        vary: Option<PathBuf>,

        /// Per-beat preserve flags for --vary, e.g. "1,0,0,1"
        #[arg(long)]
        mask: Option<String>,

        /// Beats to generate
        #[arg(long)]
        beats: Option<usize>,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let mut config = match &cli.common.config {
        Some(path) => GeneratorConfig::load(path)?,
        None => GeneratorConfig::default(),
    };
    if let Some(tempo) = cli.common.tempo {
        config.midi.tempo_bpm = tempo;
    }
    let seed = cli.common.seed.unwrap_or_else(clock_seed);

    println!("=== Loopcraft Generator ===");
    println!("Output: {}", cli.common.output.display());
    println!("Seed: {seed}");
    println!();

    let pattern = match cli.command {
        Commands::Markov {
            inputs,
            order,
            num_steps,
            loop_duration,
            note_map,
            dump_table,
            load_table,
        } => {
            if let Some(order) = order {
                config.markov.order = order;
            }
            if let Some(n) = num_steps {
                config.markov.num_steps = n;
            }
            if let Some(d) = loop_duration {
                config.markov.loop_duration = d;
            }
            let note_map = note_map.as_deref().map(parse_note_map).transpose()?;
            run_markov(&config, &inputs, note_map.as_ref(), dump_table.as_deref(), load_table.as_deref(), seed)?
        }
        Commands::Bass {
            bass,
            drums,
            model,
            save_model,
            target,
            vary,
            mask,
            beats,
        } => {
            if let Some(beats) = beats {
                config.bass.beat_length = beats;
            }
            let model = match model {
                Some(path) => {
                    println!("[1/3] Loading model from {}...", path.display());
                    MatrixMarkovModel::load(&path)?
                }
                None => analyze_bass_corpus(&config, &bass, &drums)?,
            };
            if let Some(path) = save_model {
                model.save(&path)?;
                println!("  Model written to {}.", path.display());
            }
            run_bass(&config, &model, target.as_deref(), vary.as_deref(), mask.as_deref(), seed)?
        }
    };

    println!("Writing MIDI to {}...", cli.common.output.display());
    write_midi(&pattern, &cli.common.output, &config.midi)?;
    println!(
        "  Done! {} events over {} beats.",
        pattern.len(),
        pattern.duration
    );
    Ok(())
}

fn run_markov(
    config: &GeneratorConfig,
    inputs: &[PathBuf],
    note_map: Option<&NoteMap>,
    dump_table: Option<&Path>,
    load_table: Option<&Path>,
    seed: u64,
) -> Result<Pattern, Box<dyn Error>> {
    let table = match load_table {
        Some(path) => {
            println!("[1/2] Loading table from {}...", path.display());
            TransitionTable::load(path)?
        }
        None => {
            println!("[1/2] Building order-{} table from {} files...", config.markov.order, inputs.len());
            let mut builder = TransitionTableBuilder::new(config.markov.clone())?;
            for path in inputs {
                builder.add_pattern(&read_midi(path, note_map)?);
            }
            builder.build()?
        }
    };
    println!(
        "  {} symbols over {} steps.",
        table.symbols.len(),
        table.num_steps
    );
    if let Some(path) = dump_table {
        table.save(path)?;
        println!("  Table written to {}.", path.display());
    }

    println!("[2/2] Generating loop...");
    let pattern = PatternGenerator::from_config(&table, &config.markov).generate(seed)?;
    print!("{}", pattern.summary(table.loop_duration / table.num_steps as f64));
    Ok(pattern)
}

fn analyze_bass_corpus(
    config: &GeneratorConfig,
    bass: &[PathBuf],
    drums: &[PathBuf],
) -> Result<MatrixMarkovModel, Box<dyn Error>> {
    if bass.len() != drums.len() {
        return Err(format!("{} bass files but {} drum files", bass.len(), drums.len()).into());
    }
    println!("[1/3] Analyzing {} bass/drum pairs...", bass.len());
    let kicks = kick_map(config);
    let mut pairs = Vec::with_capacity(bass.len());
    for (b, d) in bass.iter().zip(drums) {
        pairs.push((read_midi(d, Some(&kicks))?, read_midi(b, None)?));
    }
    let model = MatrixMarkovModel::from_corpus(pairs.iter().map(|(k, b)| (k, b)));
    println!("  {} counts collected.", model.counts().total_counts());
    Ok(model)
}

fn run_bass(
    config: &GeneratorConfig,
    model: &MatrixMarkovModel,
    target: Option<&Path>,
    vary: Option<&Path>,
    mask: Option<&str>,
    seed: u64,
) -> Result<Pattern, Box<dyn Error>> {
    let sampler = RhythmSampler::new(config.bass.voice());
    let pattern = match (target, vary) {
        (Some(path), _) => {
            println!("[2/3] Interlocking with kick from {}...", path.display());
            let kick = read_midi(path, Some(&kick_map(config)))?;
            println!("[3/3] Generating bassline...");
            sampler.generate_bass_rhythm(model, config.bass.beat_length, Some(&kick), seed)?
        }
        (None, Some(path)) => {
            println!("[2/3] Varying bassline from {}...", path.display());
            let original = read_midi(path, None)?;
            let preserve = parse_mask(mask.unwrap_or_default())?;
            println!("[3/3] Generating variation...");
            sampler.generate_bass_rhythm_variation(model, &original, &preserve, seed)?
        }
        (None, None) => {
            println!("[2/3] No constraint.");
            println!("[3/3] Generating {} beats...", config.bass.beat_length);
            sampler.generate_bass_rhythm(model, config.bass.beat_length, None, seed)?
        }
    };
    let ids = sampler.codec().encode_pattern(&pattern);
    println!(
        "  Rhythm ids: {}",
        ids.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(" ")
    );
    Ok(pattern)
}

fn kick_map(config: &GeneratorConfig) -> NoteMap {
    NoteMap::from([(config.bass.kick_note, "kick".to_string())])
}

/// Parse "36=kick,38=snare".
fn parse_note_map(text: &str) -> Result<NoteMap, String> {
    text.split(',')
        .filter(|s| !s.trim().is_empty())
        .map(|entry| {
            let (note, name) = entry
                .split_once('=')
                .ok_or_else(|| format!("bad note map entry '{entry}', expected NOTE=NAME"))?;
            let note: u8 = note
                .trim()
                .parse()
                .map_err(|_| format!("bad note number '{note}'"))?;
            Ok((note, name.trim().to_string()))
        })
        .collect()
}

/// Parse "1,0,0,1" into preserve flags.
fn parse_mask(text: &str) -> Result<Vec<bool>, String> {
    text.split(',')
        .map(|s| match s.trim() {
            "1" => Ok(true),
            "0" => Ok(false),
            other => Err(format!("bad mask value '{other}', expected 1 or 0")),
        })
        .collect()
}

fn clock_seed() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}
