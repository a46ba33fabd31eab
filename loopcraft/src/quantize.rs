// Grid quantization: from free-timed patterns to one tag set per step.
//
// The order-N model works on a fixed integer grid of `num_steps` cells per
// loop. `GridQuantizer` time-stretches a pattern so `loop_duration` beats
// land on that grid, rounds onsets to the nearest cell, drops same-tag
// overlaps, and fills every empty cell with an explicit silence so each step
// carries at least one symbol.
//
// Rounding can leave the stretched loop slightly off `num_steps`; that is
// logged, not fatal. Steps past the end of a short pattern are silence.

use crate::pattern::{Event, Pattern, Tag};
use serde::{Deserialize, Serialize};

const DEFAULT_LOG_TARGET: &str = "loopcraft::quantize";

/// Onsets closer than this to a grid point count as starting on it.
const GRID_EPSILON: f64 = 1e-6;

/// A pattern reduced to the sorted tag set active at each grid step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantizedPattern {
    pub steps: Vec<Vec<Tag>>,
}

impl QuantizedPattern {
    pub fn num_steps(&self) -> usize {
        self.steps.len()
    }

    /// Tag set at `step`, wrapping negative and overflowing indices around
    /// the loop.
    pub fn at_wrapped(&self, step: isize) -> &[Tag] {
        let len = self.steps.len() as isize;
        &self.steps[step.rem_euclid(len) as usize]
    }
}

#[derive(Debug, Clone)]
pub struct GridQuantizer {
    pub num_steps: usize,
    /// Loop length in beats that maps onto `num_steps` cells.
    pub loop_duration: f64,
    log_target: &'static str,
}

impl GridQuantizer {
    pub fn new(num_steps: usize, loop_duration: f64) -> Self {
        GridQuantizer {
            num_steps,
            loop_duration,
            log_target: DEFAULT_LOG_TARGET,
        }
    }

    pub fn with_log_target(mut self, target: &'static str) -> Self {
        self.log_target = target;
        self
    }

    /// Stretch, align, de-overlap, and silence-fill a copy of `pattern`.
    pub fn format_pattern(&self, pattern: &Pattern) -> Pattern {
        let mut p = pattern.clone();
        p.time_stretch(self.num_steps as f64 / self.loop_duration);
        self.align_on_grid(&mut p, 1.0);
        self.remove_overlapped(&mut p);
        fill_with_silences(&mut p, 1.0);
        p
    }

    pub fn quantize(&self, pattern: &Pattern) -> QuantizedPattern {
        let p = self.format_pattern(pattern);
        if p.duration as usize != self.num_steps {
            log::warn!(
                target: self.log_target,
                "quantization to num_steps failed: num_steps={} duration={} (loop {} beats)",
                self.num_steps,
                p.duration,
                self.loop_duration
            );
        }

        let mut steps = Vec::with_capacity(self.num_steps);
        for step in 0..self.num_steps {
            let mut tags: Vec<Tag> = p
                .starting_events_at(step as f64, GRID_EPSILON)
                .into_iter()
                .map(|e| e.tag.clone())
                .collect();
            tags.sort();
            tags.dedup();
            if tags.is_empty() {
                tags.push(Tag::Silence);
            } else if tags.len() > 1 && tags.contains(&Tag::Silence) {
                log::warn!(
                    target: self.log_target,
                    "ambiguous silence at step {step}: {tags:?}"
                );
            }
            steps.push(tags);
        }
        QuantizedPattern { steps }
    }

    /// Snap onsets to multiples of `step`; every kept event lasts exactly one
    /// step. Silence events are first cut so each covered cell keeps one.
    pub fn align_on_grid(&self, pattern: &mut Pattern, step: f64) {
        let mut aligned = Vec::with_capacity(pattern.events.len());
        for e in pattern.events.drain(..) {
            let pieces = if e.tag.is_silence() {
                e.cut_in_steps(step)
            } else {
                vec![e]
            };
            for mut piece in pieces {
                piece.start_time = (piece.start_time / step + 0.5).floor() * step;
                if piece.start_time < pattern.duration {
                    piece.duration = step;
                    aligned.push(piece);
                }
            }
        }
        pattern.events = aligned;
        self.remove_overlapped(pattern);
    }

    /// Drop or shorten events overlapped by a later event with the same tag.
    ///
    /// An event sharing its exact onset with a later same-tag event is
    /// dropped; one overlapped further in is cut short at the later onset.
    pub fn remove_overlapped(&self, pattern: &mut Pattern) {
        pattern.reorder_events();
        let events = &pattern.events;
        let mut kept = Vec::with_capacity(events.len());
        for (idx, e) in events.iter().enumerate() {
            let mut e = e.clone();
            let mut overlapped = false;
            let mut dropped = false;
            for other in &events[idx + 1..] {
                if other.start_time > e.end_time() {
                    break;
                }
                if other.tag == e.tag
                    && other.start_time >= e.start_time
                    && other.start_time < e.end_time()
                {
                    overlapped = true;
                    if other.start_time > e.start_time {
                        e.duration = other.start_time - e.start_time;
                    } else {
                        dropped = true;
                    }
                }
            }
            if dropped {
                log::debug!(
                    target: self.log_target,
                    "strict onset overlap for {} at {}",
                    e.tag,
                    e.start_time
                );
            } else {
                if overlapped {
                    log::debug!(target: self.log_target, "shortened overlapped {}", e.tag);
                }
                kept.push(e);
            }
        }
        pattern.events = kept;
    }
}

/// Insert silence events into every gap between events and after the last
/// one. With `max_silence > 0`, long gaps are split into silences of at most
/// that length.
pub fn fill_with_silences(pattern: &mut Pattern, max_silence: f64) {
    pattern.reorder_events();
    let mut last_off = 0.0;
    let mut filled = Vec::with_capacity(pattern.events.len() * 2);
    for e in pattern.events.drain(..) {
        if e.start_time > last_off {
            if max_silence > 0.0 {
                while e.start_time - last_off > max_silence {
                    filled.push(Event::silence(last_off, max_silence));
                    last_off += max_silence;
                }
            }
            filled.push(Event::silence(last_off, e.start_time - last_off));
        }
        last_off = f64::max(last_off, e.end_time());
        filled.push(e);
    }
    if last_off < pattern.duration {
        if max_silence > 0.0 {
            while last_off < pattern.duration - max_silence {
                filled.push(Event::silence(last_off, max_silence));
                last_off += max_silence;
            }
        }
        filled.push(Event::silence(last_off, pattern.duration - last_off));
    }
    pattern.events = filled;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(t: f64, name: &str) -> Event {
        Event::new(t, 0.1, 36, 100, Tag::name(name))
    }

    #[test]
    fn every_step_has_a_symbol() {
        let p = Pattern::with_events(vec![hit(0.0, "kick"), hit(2.0, "snare")], 4.0);
        let q = GridQuantizer::new(8, 4.0).quantize(&p);
        assert_eq!(q.num_steps(), 8);
        for (i, step) in q.steps.iter().enumerate() {
            assert!(!step.is_empty(), "step {i} empty");
        }
        assert_eq!(q.steps[0], vec![Tag::name("kick")]);
        assert_eq!(q.steps[1], vec![Tag::Silence]);
        assert_eq!(q.steps[4], vec![Tag::name("snare")]);
    }

    #[test]
    fn onsets_round_to_nearest_step() {
        let p = Pattern::with_events(vec![hit(0.49, "kick"), hit(1.6, "hat")], 4.0);
        let q = GridQuantizer::new(4, 4.0).quantize(&p);
        assert_eq!(q.steps[0], vec![Tag::name("kick")]);
        assert_eq!(q.steps[2], vec![Tag::name("hat")]);
        assert_eq!(q.steps[1], vec![Tag::Silence]);
    }

    #[test]
    fn concurrent_tags_are_sorted_and_deduplicated() {
        let p = Pattern::with_events(
            vec![hit(0.0, "snare"), hit(0.0, "kick"), hit(0.02, "kick")],
            1.0,
        );
        let q = GridQuantizer::new(4, 1.0).quantize(&p);
        assert_eq!(q.steps[0], vec![Tag::name("kick"), Tag::name("snare")]);
    }

    #[test]
    fn short_pattern_is_padded_with_silence() {
        let p = Pattern::with_events(vec![hit(0.0, "kick")], 2.0);
        let q = GridQuantizer::new(4, 4.0).quantize(&p);
        assert_eq!(q.steps[3], vec![Tag::Silence]);
    }

    #[test]
    fn wrapped_lookup_goes_around_the_loop() {
        let p = Pattern::with_events(vec![hit(3.0, "hat")], 4.0);
        let q = GridQuantizer::new(4, 4.0).quantize(&p);
        assert_eq!(q.at_wrapped(-1), &[Tag::name("hat")]);
        assert_eq!(q.at_wrapped(4), &[Tag::Silence]);
    }

    #[test]
    fn fill_with_silences_splits_long_gaps() {
        let mut p = Pattern::with_events(vec![Event::new(3.0, 1.0, 36, 100, Tag::name("kick"))], 4.0);
        fill_with_silences(&mut p, 1.0);
        let silences: Vec<f64> = p
            .events
            .iter()
            .filter(|e| e.tag.is_silence())
            .map(|e| e.start_time)
            .collect();
        assert_eq!(silences, vec![0.0, 1.0, 2.0]);
    }
}
