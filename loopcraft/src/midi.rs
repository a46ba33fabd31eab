// MIDI import and export for patterns.
//
// Export converts a Pattern into a Standard MIDI File (SMF) with a tempo
// track and one note track. One pattern beat is one quarter note. Import is
// the inverse thin layer: every note-on/note-off pair on any track becomes an
// Event, tagged by note number or through a note map (e.g. 36 → "kick").
// Notes absent from a given map are dropped, which is how a drum file is
// split into the kick anchor and other voices.
//
// Uses the `midly` crate for reading and writing. Output is SMF Format 1.

use crate::config::MidiConfig;
use crate::error::MidiError;
use crate::pattern::{Event, Pattern, Tag};
use midly::{
    Format, Header, MetaMessage, MidiMessage, Smf, Timing, Track, TrackEvent, TrackEventKind,
    num::{u4, u7, u15, u24, u28},
};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Note number → tag name used when importing.
pub type NoteMap = BTreeMap<u8, String>;

/// Convert a Pattern to MIDI and write to a file.
pub fn write_midi(pattern: &Pattern, path: &Path, config: &MidiConfig) -> Result<(), MidiError> {
    let smf = pattern_to_smf(pattern, config);
    let mut buf = Vec::new();
    smf.write_std(&mut buf)?;
    std::fs::write(path, &buf)?;
    Ok(())
}

fn beats_to_ticks(beats: f64, ticks_per_quarter: u16) -> u32 {
    (beats.max(0.0) * ticks_per_quarter as f64).round() as u32
}

/// Convert a Pattern to an in-memory SMF.
pub fn pattern_to_smf(pattern: &Pattern, config: &MidiConfig) -> Smf<'static> {
    let tpq = config.ticks();
    let mut smf = Smf::new(Header::new(Format::Parallel, Timing::Metrical(u15::new(tpq))));

    // Track 0: tempo track
    let tempo_microseconds = config.tempo_micros();
    smf.tracks.push(vec![
        TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::new(tempo_microseconds))),
        },
        TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
        },
    ]);

    // Absolute-tick note messages; note-offs sort before note-ons at a tick.
    let mut timeline: Vec<(u32, bool, u8, u8)> = Vec::with_capacity(pattern.len() * 2);
    for event in &pattern.events {
        if event.tag.is_silence() {
            continue;
        }
        let on = beats_to_ticks(event.start_time, tpq);
        let off = beats_to_ticks(event.end_time(), tpq).max(on + 1);
        let key = event.pitch.min(127);
        timeline.push((on, true, key, event.velocity.clamp(1, 127)));
        timeline.push((off, false, key, 0));
    }
    timeline.sort_by_key(|&(tick, is_on, _, _)| (tick, is_on));

    let channel = u4::new(0);
    let mut track: Track<'static> = vec![TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::TrackName(b"loopcraft")),
    }];
    let mut last_tick = 0;
    for (tick, is_on, key, vel) in timeline {
        let message = if is_on {
            MidiMessage::NoteOn {
                key: u7::new(key),
                vel: u7::new(vel),
            }
        } else {
            MidiMessage::NoteOff {
                key: u7::new(key),
                vel: u7::new(0),
            }
        };
        track.push(TrackEvent {
            delta: u28::new(tick - last_tick),
            kind: TrackEventKind::Midi { channel, message },
        });
        last_tick = tick;
    }
    // Pad to the loop length so the file keeps trailing silence.
    let end = beats_to_ticks(pattern.duration, tpq).max(last_tick);
    track.push(TrackEvent {
        delta: u28::new(end - last_tick),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    });
    smf.tracks.push(track);

    smf
}

/// Read a MIDI file into a single Pattern.
///
/// With `note_map`, only mapped notes are kept and tagged with their mapped
/// name; otherwise every note is kept as `Tag::Note`. The pattern duration
/// is the file length rounded up to whole beats.
pub fn read_midi(path: &Path, note_map: Option<&NoteMap>) -> Result<Pattern, MidiError> {
    let bytes = std::fs::read(path)?;
    parse_midi(&bytes, note_map)
}

pub fn parse_midi(bytes: &[u8], note_map: Option<&NoteMap>) -> Result<Pattern, MidiError> {
    let smf = Smf::parse(bytes)?;
    let tpq = match smf.header.timing {
        Timing::Metrical(t) => f64::from(t.as_int()),
        Timing::Timecode(..) => return Err(MidiError::UnsupportedTiming),
    };

    let mut events = Vec::new();
    let mut end_tick: u32 = 0;
    for track in &smf.tracks {
        let mut tick: u32 = 0;
        // (channel, key) → (onset tick, velocity)
        let mut sounding: HashMap<(u8, u8), (u32, u8)> = HashMap::new();
        for ev in track {
            tick = tick.saturating_add(ev.delta.as_int());
            let TrackEventKind::Midi { channel, message } = ev.kind else {
                continue;
            };
            let (key, on_vel) = match message {
                MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => (key.as_int(), Some(vel.as_int())),
                MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => (key.as_int(), None),
                _ => continue,
            };
            let slot = (channel.as_int(), key);
            if let Some((start, vel)) = sounding.remove(&slot) {
                events.push((start, tick, key, vel));
            }
            if let Some(vel) = on_vel {
                sounding.insert(slot, (tick, vel));
            }
        }
        // Unterminated notes end with the track.
        let mut unterminated: Vec<_> = sounding.into_iter().collect();
        unterminated.sort_unstable();
        for ((_, key), (start, vel)) in unterminated {
            events.push((start, tick, key, vel));
        }
        end_tick = end_tick.max(tick);
    }

    let mut pattern = Pattern::new((f64::from(end_tick) / tpq).ceil());
    for (start, stop, key, vel) in events {
        let tag = match note_map {
            Some(map) => match map.get(&key) {
                Some(name) => Tag::name(name),
                None => continue,
            },
            None => Tag::Note(key),
        };
        let start_time = f64::from(start) / tpq;
        let duration = f64::from(stop - start) / tpq;
        pattern.add_event(Event::new(start_time, duration, key, vel, tag));
    }
    pattern.reorder_events();
    Ok(pattern)
}
