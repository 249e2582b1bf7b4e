//! Audio score generation engine
//!
//! Unrolls each voice's repeats and volta endings, then walks the resulting
//! measure sequence accumulating time. Produces the melody notes (with ties
//! merged), accompaniment chords from chord symbols, and the timing events that
//! drive highlighting.

use super::chord_parser::parse_chord_symbol;
use super::types::{AudioChord, AudioNote, AudioScore, TimingEvent};
use crate::notation::ast::{ElementKind, Ending, Measure, Tune};
use crate::notation::visual::voice_offsets;
use crate::notation::ElementId;
use std::collections::HashMap;
use tracing::debug;

const MELODY_VELOCITY: u8 = 96;
const CHORD_VELOCITY: u8 = 60;
const EPSILON: f64 = 1e-9;

/// Build the order in which measures are played, respecting repeats and volta endings.
///
/// - `|: ... :|` plays the section twice
/// - A `:|` with no `|:` repeats from the start of the tune, or from just after
///   the previous repeated section
/// - On the second pass a first ending is skipped and playback jumps to the
///   second ending
///
/// Returns indices into `measures`.
pub fn build_playback_sequence(measures: &[Measure]) -> Vec<usize> {
    let mut sequence = Vec::new();
    let mut section_start = 0;
    let mut second_pass = false;
    let mut i = 0;

    while i < measures.len() {
        let measure = &measures[i];

        if measure.repeat_start && !second_pass {
            section_start = i;
        }

        if second_pass && measure.ending == Some(Ending::First) {
            // Jump to the second ending, or past the first ending when there is none
            let next = (i + 1..measures.len())
                .find(|&k| measures[k].ending == Some(Ending::Second))
                .or_else(|| (i..measures.len()).find(|&k| measures[k].repeat_end).map(|k| k + 1))
                .unwrap_or(measures.len());
            second_pass = false;
            section_start = next;
            i = next;
            continue;
        }

        sequence.push(i);

        if measure.repeat_end {
            if second_pass {
                second_pass = false;
                section_start = i + 1;
            } else {
                second_pass = true;
                i = section_start;
                continue;
            }
        } else if measure.ending == Some(Ending::Second) {
            second_pass = false;
            section_start = i + 1;
        }

        i += 1;
    }

    sequence
}

/// One voice's timeline segment: [start, end) in whole notes and the element shown
struct Segment {
    start: f64,
    end: f64,
    element: Option<ElementId>,
}

/// Chord currently sounding in a voice
struct OpenChord {
    symbol: String,
    notes: Vec<u8>,
    start: f64,
}

/// Generate the audio score for a parsed tune.
///
/// # Timing
/// Element lengths are whole notes, already scaled by tuplets and broken rhythm;
/// the tempo converts them to seconds. Voices run side by side from time zero.
///
/// # Ties
/// A tied note extends the audio note of the same pitch that is still open,
/// so a tied group sounds once. Highlighting still moves element by element.
///
/// # Chords
/// A chord symbol sounds from its element until the next chord symbol in the
/// voice, re-struck at every measure so repeats replay it.
pub(crate) fn build_audio_score(tune: &Tune) -> AudioScore {
    let tempo = tune.tempo();
    let seconds_per_whole = tempo.seconds_per_whole();
    let offsets = voice_offsets(tune);

    let mut notes: Vec<AudioNote> = Vec::new();
    let mut chords: Vec<AudioChord> = Vec::new();
    let mut timelines: Vec<Vec<Segment>> = Vec::with_capacity(tune.voices.len());
    let mut total = 0.0f64;

    for (v, voice) in tune.voices.iter().enumerate() {
        let measures = voice.measures();
        let sequence = build_playback_sequence(&measures);
        let mut current_time = 0.0f64;
        let mut segments = Vec::new();
        // Open tied notes: midi -> index into `notes`
        let mut pending_tie: HashMap<u8, usize> = HashMap::new();
        let mut current_chord: Option<(String, Vec<u8>)> = None;

        for measure_idx in sequence {
            let range = measures[measure_idx].elements.clone();
            let mut open_chord = current_chord.as_ref().map(|(symbol, notes)| OpenChord {
                symbol: symbol.clone(),
                notes: notes.clone(),
                start: current_time,
            });

            for index in range {
                let element = &voice.elements[index];
                if !element.is_timed() {
                    continue;
                }
                let id = ElementId(offsets[v] + index as u32);
                let length = element.length();

                if let Some(symbol) = element.chord_symbol() {
                    let voicing = parse_chord_symbol(symbol);
                    if !voicing.is_empty() {
                        close_chord(&mut chords, open_chord.take(), current_time, seconds_per_whole);
                        open_chord = Some(OpenChord {
                            symbol: symbol.to_string(),
                            notes: voicing.clone(),
                            start: current_time,
                        });
                        current_chord = Some((symbol.to_string(), voicing));
                    }
                }

                match &element.kind {
                    ElementKind::Note(note) => {
                        let mut still_tied = HashMap::new();
                        for pitch in &note.pitches {
                            let note_idx = match pending_tie.get(&pitch.midi) {
                                Some(&idx) => {
                                    notes[idx].duration += length * seconds_per_whole;
                                    idx
                                }
                                None => {
                                    notes.push(AudioNote {
                                        midi_note: pitch.midi,
                                        start_time: current_time * seconds_per_whole,
                                        duration: length * seconds_per_whole,
                                        velocity: MELODY_VELOCITY,
                                        element: id,
                                    });
                                    notes.len() - 1
                                }
                            };
                            if note.tie {
                                still_tied.insert(pitch.midi, note_idx);
                            }
                        }
                        pending_tie = still_tied;
                    }
                    _ => pending_tie.clear(),
                }

                segments.push(Segment {
                    start: current_time,
                    end: current_time + length,
                    element: element.is_drawable().then_some(id),
                });
                current_time += length;
            }

            close_chord(&mut chords, open_chord, current_time, seconds_per_whole);
        }

        total = total.max(current_time);
        timelines.push(segments);
    }

    let events = merge_timelines(&timelines, seconds_per_whole);
    let total_seconds = total * seconds_per_whole;

    debug!(
        notes = notes.len(),
        chords = chords.len(),
        events = events.len(),
        total_seconds,
        "Built audio score"
    );

    AudioScore {
        tempo: tempo.to_quarter_note_bpm(),
        seconds_per_whole,
        notes,
        chords,
        events,
        total_seconds,
    }
}

fn close_chord(chords: &mut Vec<AudioChord>, open: Option<OpenChord>, end: f64, seconds_per_whole: f64) {
    let Some(open) = open else {
        return;
    };
    if end - open.start <= EPSILON {
        return;
    }
    chords.push(AudioChord {
        symbol: open.symbol,
        midi_notes: open.notes,
        start_time: open.start * seconds_per_whole,
        duration: (end - open.start) * seconds_per_whole,
        velocity: CHORD_VELOCITY,
    });
}

/// Combine per-voice timelines into one event per distinct onset time, each
/// carrying every voice's element sounding at that instant.
fn merge_timelines(timelines: &[Vec<Segment>], seconds_per_whole: f64) -> Vec<TimingEvent> {
    let mut onsets: Vec<f64> = timelines.iter().flatten().map(|s| s.start).collect();
    onsets.sort_by(|a, b| a.total_cmp(b));
    onsets.dedup_by(|a, b| (*a - *b).abs() < EPSILON);

    let mut cursors = vec![0usize; timelines.len()];
    let mut events = Vec::with_capacity(onsets.len());

    for time in onsets {
        let mut active = Vec::new();
        for (v, segments) in timelines.iter().enumerate() {
            while cursors[v] < segments.len() && segments[cursors[v]].end <= time + EPSILON {
                cursors[v] += 1;
            }
            if let Some(segment) = segments.get(cursors[v]) {
                if segment.start <= time + EPSILON {
                    if let Some(id) = segment.element {
                        active.push(id);
                    }
                }
            }
        }
        events.push(TimingEvent {
            time: time * seconds_per_whole,
            active,
        });
    }

    events
}
