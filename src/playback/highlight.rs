//! Highlight synchronizer
//!
//! Moves the "now playing" markers of one visual score as its transport emits
//! timing events. Markers live in the score itself, so two widgets playing at
//! once never touch each other's glyphs.

use super::types::TimingEvent;
use crate::notation::VisualScore;

/// Applies timing events to the highlight set of the visual score it serves.
///
/// Each event replaces the whole set: after `apply`, exactly the event's active
/// elements are marked. Pausing or stopping leaves the last markers in place;
/// only [`HighlightSync::reset`] clears them.
#[derive(Debug, Default)]
pub struct HighlightSync;

impl HighlightSync {
    pub fn new() -> Self {
        Self
    }

    pub fn apply(&mut self, score: &mut VisualScore, event: &TimingEvent) {
        score.set_highlighted(&event.active);
    }

    /// Apply a batch of due events in order; the last one wins.
    pub fn apply_all(&mut self, score: &mut VisualScore, events: &[TimingEvent]) {
        for event in events {
            self.apply(score, event);
        }
    }

    pub fn reset(&mut self, score: &mut VisualScore) {
        score.clear_highlights();
    }
}
