// End-to-end tests for both generation pipelines.
//
// Drum loops go through quantize → step table → generate, bass/kick pairs
// through codec → matrices → constraint filter → sampler. Corpora are built
// in code so every expected id sequence can be worked out by hand; the MIDI
// and JSON tests round-trip through files in the system temp dir.

use loopcraft::config::{MarkovConfig, MidiConfig};
use loopcraft::error::{GenerationError, PipelineStage};
use loopcraft::generate::PatternGenerator;
use loopcraft::matrix::MatrixMarkovModel;
use loopcraft::midi::{NoteMap, read_midi, write_midi};
use loopcraft::pattern::{Event, Pattern, Tag};
use loopcraft::rhythm::{RhythmId, RhythmIdCodec};
use loopcraft::sampler::RhythmSampler;
use loopcraft::table::{TransitionTable, TransitionTableBuilder};
use std::path::PathBuf;

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("loopcraft_{}_{}", std::process::id(), name))
}

fn hits(onsets: &[f64], tag: &str, duration: f64) -> Pattern {
    let events = onsets
        .iter()
        .map(|&t| Event::new(t, 0.25, 36, 100, Tag::name(tag)))
        .collect();
    Pattern::with_events(events, duration)
}

fn four_on_the_floor() -> Pattern {
    hits(&[0.0, 1.0, 2.0, 3.0], "kick", 4.0)
}

/// Bass ids [8, 2, 8, 2] and [8, 10, 8, 10] over a kick on every beat.
fn alternating_bass_model() -> MatrixMarkovModel {
    let kick = four_on_the_floor();
    let offbeat = hits(&[0.0, 1.5, 2.0, 3.5], "bass", 4.0);
    let pushed = hits(&[0.0, 1.0, 1.5, 2.0, 3.0, 3.5], "bass", 4.0);
    MatrixMarkovModel::from_corpus([(&kick, &offbeat), (&kick, &pushed)])
}

fn ids_of(pattern: &Pattern) -> Vec<u8> {
    RhythmIdCodec::new()
        .encode_pattern(pattern)
        .into_iter()
        .map(RhythmId::value)
        .collect()
}

#[test]
fn single_state_corpus_repeats_that_state() {
    let kick = four_on_the_floor();
    let bass = hits(&[0.0, 1.0, 2.0, 3.0], "bass", 4.0);
    let model = MatrixMarkovModel::from_corpus([(&kick, &bass), (&kick, &bass)]);
    let sampler = RhythmSampler::default();
    for seed in 0..10 {
        let line = sampler.generate_bass_rhythm(&model, 4, None, seed).unwrap();
        assert_eq!(line.duration, 4.0);
        assert_eq!(line.onset_times(), vec![0.0, 1.0, 2.0, 3.0]);
        assert!(line.events.iter().all(|e| e.pitch == 36 && e.velocity == 110));
        assert!(line.events.iter().all(|e| e.tag == Tag::name("bass")));
    }
}

#[test]
fn interlocked_line_follows_kick_length() {
    let model = alternating_bass_model();
    let sampler = RhythmSampler::default();
    let line = sampler
        .generate_bass_rhythm(&model, 8, Some(&four_on_the_floor()), 5)
        .unwrap();
    let ids = ids_of(&line);
    assert_eq!(ids.len(), 4);
    assert_eq!(ids[0], 8);
    assert!(ids[1] == 2 || ids[1] == 10);
    assert_eq!(ids[2], 8);
    assert!(ids[3] == 2 || ids[3] == 10);
}

#[test]
fn interlocked_line_stops_at_requested_length() {
    let model = alternating_bass_model();
    let sampler = RhythmSampler::default();
    for seed in 0..5 {
        let line = sampler
            .generate_bass_rhythm(&model, 3, Some(&four_on_the_floor()), seed)
            .unwrap();
        assert_eq!(line.duration, 3.0);
        let ids = ids_of(&line);
        assert_eq!(ids.len(), 3);
        assert_eq!(ids[0], 8);
        assert!(ids[1] == 2 || ids[1] == 10);
        assert_eq!(ids[2], 8);
    }
}

#[test]
fn variation_fails_when_last_beat_cannot_be_reached() {
    // Ids [8, 2, 8, 8]: the corpus never plays the metronome twice in a row.
    let model = alternating_bass_model();
    let target = hits(&[0.0, 1.5, 2.0, 3.0], "bass", 4.0);
    assert_eq!(ids_of(&target), vec![8, 2, 8, 8]);
    let err = RhythmSampler::default()
        .generate_bass_rhythm_variation(&model, &target, &[true, false, false, true], 1)
        .unwrap_err();
    assert!(matches!(
        err,
        GenerationError::UnsatisfiableConstraint {
            stage: PipelineStage::Sampling,
            step: 3
        }
    ));
}

#[test]
fn variation_keeps_pinned_beats() {
    let model = alternating_bass_model();
    let sampler = RhythmSampler::default();
    let target = hits(&[0.0, 1.5, 2.0, 3.5], "bass", 4.0);
    for seed in 0..10 {
        let line = sampler
            .generate_bass_rhythm_variation(&model, &target, &[true, false, false, true], seed)
            .unwrap();
        let ids = ids_of(&line);
        assert_eq!(ids.len(), 4);
        assert_eq!(ids[0], 8);
        assert!(ids[1] == 2 || ids[1] == 10, "seed {seed}: {ids:?}");
        assert_eq!(ids[2], 8);
        assert_eq!(ids[3], 2);
    }
}

#[test]
fn variation_mask_shorter_than_target_is_rejected() {
    let model = alternating_bass_model();
    let target = hits(&[0.0, 1.5, 2.0, 3.5], "bass", 4.0);
    let err = RhythmSampler::default()
        .generate_bass_rhythm_variation(&model, &target, &[true, false], 1)
        .unwrap_err();
    assert!(matches!(err, GenerationError::InvalidTarget(_)));
}

fn drum_corpus() -> Vec<Pattern> {
    let mut a = hits(&[0.0, 2.0], "kick", 4.0);
    a.add_event(Event::new(1.0, 0.25, 38, 100, Tag::name("snare")));
    a.add_event(Event::new(3.0, 0.25, 38, 100, Tag::name("snare")));
    a.reorder_events();
    let mut b = hits(&[0.0, 1.5, 2.0], "kick", 4.0);
    b.add_event(Event::new(1.0, 0.25, 38, 100, Tag::name("snare")));
    b.add_event(Event::new(3.0, 0.25, 38, 100, Tag::name("snare")));
    b.reorder_events();
    vec![a, b]
}

#[test]
fn order_n_generation_is_reproducible() {
    for order in [1, 2, 4] {
        let config = MarkovConfig {
            order,
            ..MarkovConfig::default()
        };
        let mut builder = TransitionTableBuilder::new(config).unwrap();
        builder.add_patterns(&drum_corpus());
        let table = builder.build().unwrap();
        let a = table.generate_pattern(99).unwrap();
        let b = table.generate_pattern(99).unwrap();
        assert_eq!(a, b, "order {order}");
        assert_eq!(a.duration, 4.0);
        // Both corpus loops open on a kick at step 0.
        assert!(a.events.iter().any(|e| e.start_time == 0.0 && e.tag == Tag::name("kick")));
    }
}

#[test]
fn saved_table_generates_identically() {
    let mut builder = TransitionTableBuilder::new(MarkovConfig::default()).unwrap();
    builder.add_patterns(&drum_corpus());
    let table = builder.build().unwrap();

    let path = temp_path("table.json");
    table.save(&path).unwrap();
    let loaded = TransitionTable::load(&path).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(loaded.order, table.order);
    assert_eq!(loaded.num_steps, table.num_steps);
    assert_eq!(loaded.loop_duration, table.loop_duration);
    assert_eq!(loaded.steps, table.steps);
    for seed in 0..5 {
        let generator = PatternGenerator::new(&loaded);
        assert_eq!(generator.generate(seed).unwrap(), table.generate_pattern(seed).unwrap());
    }
}

#[test]
fn saved_matrix_model_generates_identically() {
    let model = alternating_bass_model();
    let path = temp_path("matrix.json");
    model.save(&path).unwrap();
    let loaded = MatrixMarkovModel::load(&path).unwrap();
    std::fs::remove_file(&path).ok();

    let sampler = RhythmSampler::default();
    for seed in 0..5 {
        assert_eq!(
            sampler.generate_bass_rhythm(&loaded, 8, None, seed).unwrap(),
            sampler.generate_bass_rhythm(&model, 8, None, seed).unwrap()
        );
    }
}

#[test]
fn midi_corpus_builds_a_table() {
    let config = MidiConfig::default();
    let mut paths = Vec::new();
    for (i, loop_pattern) in drum_corpus().iter().enumerate() {
        // Store drums by note number, as a drum machine would.
        let mut as_notes = loop_pattern.clone();
        for e in &mut as_notes.events {
            e.tag = Tag::Note(e.pitch);
        }
        let path = temp_path(&format!("drums_{i}.mid"));
        write_midi(&as_notes, &path, &config).unwrap();
        paths.push(path);
    }

    let note_map = NoteMap::from([(36, "kick".to_string()), (38, "snare".to_string())]);
    let mut builder = TransitionTableBuilder::new(MarkovConfig::default()).unwrap();
    for path in &paths {
        let pattern = read_midi(path, Some(&note_map)).unwrap();
        assert_eq!(pattern.duration, 4.0);
        builder.add_pattern(&pattern);
        std::fs::remove_file(path).ok();
    }
    let table = builder.build().unwrap();
    let labels: Vec<String> = table
        .all_states()
        .into_iter()
        .map(|s| table.symbols.label(s))
        .collect();
    assert!(labels.contains(&"kick".to_string()));
    assert!(labels.contains(&"snare".to_string()));
    assert!(table.generate_pattern(3).is_ok());
}
