//! Audio score type definitions
//!
//! Everything here is timed in seconds from the start of the tune, with repeats
//! and volta endings already unrolled.

use crate::notation::ElementId;
use serde::Serialize;

/// One sounding note of the melody
///
/// Tied notes are merged: only the first element of a tied group produces an
/// `AudioNote`, and its duration covers the whole group.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AudioNote {
    pub midi_note: u8,
    pub start_time: f64,
    pub duration: f64,
    pub velocity: u8,
    /// Element that started this note
    pub element: ElementId,
}

/// Accompaniment chord voiced from a chord symbol
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AudioChord {
    pub symbol: String,
    pub midi_notes: Vec<u8>,
    pub start_time: f64,
    pub duration: f64,
    pub velocity: u8,
}

/// The set of elements sounding from `time` until the next event
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TimingEvent {
    pub time: f64,
    pub active: Vec<ElementId>,
}

/// Audio half of a compiled score
///
/// # Fields
/// - `tempo`: quarter notes per minute
/// - `seconds_per_whole`: length of a whole note in seconds at that tempo
/// - `events`: ordered by time, one per distinct onset
/// - `total_seconds`: end of the last element of the longest voice
///
/// Only [`compile`](crate::notation::compile) builds one, together with its
/// visual score:
///
/// ```compile_fail
/// use theory_reader::playback::AudioScore;
///
/// let score = AudioScore {
///     tempo: 120.0,
///     seconds_per_whole: 2.0,
///     notes: Vec::new(),
///     chords: Vec::new(),
///     events: Vec::new(),
///     total_seconds: 0.0,
/// };
/// ```
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct AudioScore {
    pub tempo: f64,
    pub seconds_per_whole: f64,
    pub notes: Vec<AudioNote>,
    pub chords: Vec<AudioChord>,
    pub events: Vec<TimingEvent>,
    pub total_seconds: f64,
}

impl AudioScore {
    /// Number of distinct elements that ever become active.
    pub fn element_count(&self) -> usize {
        let mut ids: Vec<ElementId> = self.events.iter().flat_map(|e| e.active.iter().copied()).collect();
        ids.sort();
        ids.dedup();
        ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
