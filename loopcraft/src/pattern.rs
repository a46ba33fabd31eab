// Pattern and event value objects.
//
// A pattern is a flat list of timed events plus a loop duration, all in
// beats. This is the exchange format between the MIDI importer, the
// quantizer, both model families, and the samplers. Generated patterns are
// returned in the same shape; writing them out is the caller's business.
//
// Tags label what an event is (a drum name, a pitch, or an explicit
// silence). They are the alphabet of the order-N model once the quantizer
// groups them per step.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Label attached to an event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Tag {
    /// Explicit silence placeholder inserted by the quantizer.
    Silence,
    /// A named voice or instrument, e.g. `"kick"`.
    Name(String),
    /// A raw MIDI note number.
    Note(u8),
}

impl Tag {
    pub fn name(name: &str) -> Self {
        Tag::Name(name.to_string())
    }

    pub fn is_silence(&self) -> bool {
        matches!(self, Tag::Silence)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tag::Silence => f.write_str("silence"),
            Tag::Name(name) => f.write_str(name),
            Tag::Note(note) => write!(f, "{note}"),
        }
    }
}

/// A single timed event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Onset in beats.
    pub start_time: f64,
    /// Length in beats.
    pub duration: f64,
    /// MIDI pitch (0-127).
    pub pitch: u8,
    /// MIDI velocity (0-127).
    pub velocity: u8,
    pub tag: Tag,
}

impl Event {
    pub fn new(start_time: f64, duration: f64, pitch: u8, velocity: u8, tag: Tag) -> Self {
        Event {
            start_time,
            duration,
            pitch,
            velocity,
            tag,
        }
    }

    pub fn silence(start_time: f64, duration: f64) -> Self {
        Event::new(start_time, duration, 0, 0, Tag::Silence)
    }

    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }

    /// Split into back-to-back events of at most `step` beats each.
    pub fn cut_in_steps(&self, step: f64) -> Vec<Event> {
        let mut out = Vec::new();
        let mut start = self.start_time;
        let end = self.end_time();
        while start < end {
            let mut piece = self.clone();
            piece.start_time = start;
            piece.duration = step.min(end - start);
            out.push(piece);
            start += step;
        }
        out
    }
}

/// An ordered collection of events spanning `duration` beats.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub events: Vec<Event>,
    /// Loop length in beats.
    pub duration: f64,
}

impl Pattern {
    pub fn new(duration: f64) -> Self {
        Pattern {
            events: Vec::new(),
            duration,
        }
    }

    pub fn with_events(events: Vec<Event>, duration: f64) -> Self {
        let mut pattern = Pattern { events, duration };
        pattern.reorder_events();
        pattern
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn add_event(&mut self, event: Event) {
        self.events.push(event);
    }

    /// Stable sort by onset time.
    pub fn reorder_events(&mut self) {
        self.events
            .sort_by(|a, b| a.start_time.total_cmp(&b.start_time));
    }

    /// Scale every time value (and the loop length) by `ratio`.
    pub fn time_stretch(&mut self, ratio: f64) {
        for e in &mut self.events {
            e.start_time *= ratio;
            e.duration *= ratio;
        }
        self.duration *= ratio;
    }

    /// Events whose onset falls in `[time - tolerance, time]`.
    pub fn starting_events_at(&self, time: f64, tolerance: f64) -> Vec<&Event> {
        self.events
            .iter()
            .filter(|e| {
                let d = time - e.start_time;
                d >= 0.0 && d <= tolerance
            })
            .collect()
    }

    /// Onset times of every event, in event order.
    pub fn onset_times(&self) -> Vec<f64> {
        self.events.iter().map(|e| e.start_time).collect()
    }

    /// Copy containing only events whose tag satisfies `keep`.
    pub fn filtered(&self, keep: impl Fn(&Tag) -> bool) -> Pattern {
        Pattern {
            events: self.events.iter().filter(|e| keep(&e.tag)).cloned().collect(),
            duration: self.duration,
        }
    }

    /// Distinct non-silence tags, sorted.
    pub fn tags(&self) -> Vec<Tag> {
        let mut tags: Vec<Tag> = self
            .events
            .iter()
            .filter(|e| !e.tag.is_silence())
            .map(|e| e.tag.clone())
            .collect();
        tags.sort();
        tags.dedup();
        tags
    }

    /// Render one text row per tag over a grid of `step`-beat cells, for
    /// debugging. `x` marks an onset, `.` an empty cell.
    pub fn summary(&self, step: f64) -> String {
        let mut out = String::new();
        if step <= 0.0 {
            return out;
        }
        let cells = (self.duration / step).ceil() as usize;
        for tag in self.tags() {
            out.push_str(&format!("{:>8}: ", tag.to_string()));
            for cell in 0..cells {
                let t = cell as f64 * step;
                let hit = self
                    .events
                    .iter()
                    .any(|e| e.tag == tag && e.start_time >= t && e.start_time < t + step);
                out.push(if hit { 'x' } else { '.' });
            }
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kick(t: f64) -> Event {
        Event::new(t, 0.25, 36, 100, Tag::name("kick"))
    }

    #[test]
    fn time_stretch_scales_events_and_duration() {
        let mut p = Pattern::with_events(vec![kick(1.0)], 4.0);
        p.time_stretch(4.0);
        assert_eq!(p.duration, 16.0);
        assert_eq!(p.events[0].start_time, 4.0);
        assert_eq!(p.events[0].duration, 1.0);
    }

    #[test]
    fn with_events_sorts_by_onset() {
        let p = Pattern::with_events(vec![kick(2.0), kick(0.0), kick(1.0)], 4.0);
        assert_eq!(p.onset_times(), vec![0.0, 1.0, 2.0]);
    }

    #[test]
    fn cut_in_steps_splits_long_silence() {
        let pieces = Event::silence(1.0, 2.5).cut_in_steps(1.0);
        let starts: Vec<f64> = pieces.iter().map(|e| e.start_time).collect();
        assert_eq!(starts, vec![1.0, 2.0, 3.0]);
        assert_eq!(pieces[2].duration, 0.5);
    }

    #[test]
    fn summary_marks_onsets() {
        let p = Pattern::with_events(vec![kick(0.0), kick(2.0)], 4.0);
        assert_eq!(p.summary(1.0), "    kick: x.x.\n");
    }

    #[test]
    fn starting_events_respects_tolerance() {
        let p = Pattern::with_events(vec![kick(1.0)], 4.0);
        assert_eq!(p.starting_events_at(1.0, 0.0).len(), 1);
        assert!(p.starting_events_at(1.1, 0.0).is_empty());
        assert_eq!(p.starting_events_at(1.1, 0.2).len(), 1);
    }
}
