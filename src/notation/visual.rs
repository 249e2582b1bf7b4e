//! # Visual Score
//!
//! Staff layout of a parsed tune plus the set of glyphs currently highlighted.
//!
//! ## Layout
//! Each music line of a voice becomes one system; when a tune has several voices,
//! their staves are stacked inside every system (voices are not aligned in time).
//! Horizontal space grows with note length. A system that overflows the staff
//! width, or already fills most of it, is stretched or squeezed to exactly the
//! staff width.
//!
//! ## Highlights
//! The highlighted set belongs to this score alone. Ids are score-local, so two
//! widgets showing different tunes can never mark each other's glyphs.

use crate::notation::ast::{Accidental, BarKind, Clef, ElementKind, Meter, MeterSymbol, Tune};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

/// Staff line spacing in layout units
pub const LINE_GAP: f64 = 10.0;
/// Distance from top to bottom staff line
pub const STAFF_HEIGHT: f64 = 4.0 * LINE_GAP;

const MARGIN: f64 = 15.0;
const TITLE_HEIGHT: f64 = 36.0;
const STAFF_SPACING: f64 = 90.0;
const CLEF_WIDTH: f64 = 32.0;
const KEY_ACCIDENTAL_WIDTH: f64 = 9.0;
const METER_WIDTH: f64 = 22.0;
const NOTE_MIN_SPACE: f64 = 16.0;
const NOTE_LENGTH_SPACE: f64 = 44.0;
const BAR_SPACE: f64 = 14.0;
const ACCIDENTAL_SPACE: f64 = 9.0;
/// Systems filling more than this share of the staff are justified
const JUSTIFY_THRESHOLD: f64 = 0.75;

/// Options that shape the drawing (and whether a volume control is offered)
#[derive(Debug, Clone, PartialEq)]
pub struct RenderOptions {
    pub scale: f64,
    pub staff_width: f64,
    pub show_volume: bool,
}

impl RenderOptions {
    /// Full-size score in a lesson page.
    pub fn full() -> Self {
        Self {
            scale: 1.2,
            staff_width: 500.0,
            show_volume: true,
        }
    }

    /// Compact score inside an assistant message.
    pub fn mini() -> Self {
        Self {
            scale: 0.8,
            staff_width: 300.0,
            show_volume: false,
        }
    }
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self::full()
    }
}

/// Score-local identifier of one element of a tune
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ElementId(pub u32);

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

/// First element id of every voice; ids number elements voice by voice.
pub(crate) fn voice_offsets(tune: &Tune) -> Vec<u32> {
    let mut offsets = Vec::with_capacity(tune.voices.len());
    let mut next = 0u32;
    for voice in &tune.voices {
        offsets.push(next);
        next += voice.elements.len() as u32;
    }
    offsets
}

/// Written note value used to pick a head, stem and flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteValue {
    Whole,
    Half,
    Quarter,
    Eighth,
    Sixteenth,
    ThirtySecond,
}

impl NoteValue {
    /// Closest written value at or below `length`, plus augmentation dots.
    pub fn from_length(length: f64) -> (Self, u8) {
        const EPSILON: f64 = 1e-6;
        let (value, base) = if length >= 1.0 - EPSILON {
            (NoteValue::Whole, 1.0)
        } else if length >= 0.5 - EPSILON {
            (NoteValue::Half, 0.5)
        } else if length >= 0.25 - EPSILON {
            (NoteValue::Quarter, 0.25)
        } else if length >= 0.125 - EPSILON {
            (NoteValue::Eighth, 0.125)
        } else if length >= 0.0625 - EPSILON {
            (NoteValue::Sixteenth, 0.0625)
        } else {
            (NoteValue::ThirtySecond, 0.03125)
        };
        let dots = if (length - base * 1.75).abs() < EPSILON {
            2
        } else if (length - base * 1.5).abs() < EPSILON {
            1
        } else {
            0
        };
        (value, dots)
    }

    pub fn is_open(self) -> bool {
        matches!(self, NoteValue::Whole | NoteValue::Half)
    }

    pub fn has_stem(self) -> bool {
        self != NoteValue::Whole
    }

    pub fn flags(self) -> u8 {
        match self {
            NoteValue::Eighth => 1,
            NoteValue::Sixteenth => 2,
            NoteValue::ThirtySecond => 3,
            _ => 0,
        }
    }
}

/// One note head of a note or chord
#[derive(Debug, Clone, PartialEq)]
pub struct NoteHead {
    /// Staff step relative to the bottom line (0 = bottom line, 1 = first space)
    pub position: i32,
    pub accidental: Option<Accidental>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GlyphKind {
    Note {
        heads: Vec<NoteHead>,
        value: NoteValue,
        dots: u8,
        tie: bool,
    },
    Rest {
        value: NoteValue,
        dots: u8,
    },
    MultiRest {
        measures: u32,
    },
    Bar {
        kind: BarKind,
        ending: Option<u8>,
    },
}

/// A drawable element placed on a staff
#[derive(Debug, Clone, PartialEq)]
pub struct Glyph {
    pub id: ElementId,
    pub voice: usize,
    pub system: usize,
    pub x: f64,
    pub kind: GlyphKind,
    /// Chord symbol drawn above the staff
    pub chord_symbol: Option<String>,
    pub annotations: Vec<String>,
    /// Source position for error reporting and debugging
    pub line: usize,
    pub column: usize,
}

/// One voice's staff within a system
#[derive(Debug, Clone, PartialEq)]
pub struct Staff {
    pub voice: usize,
    pub system: usize,
    /// y of the top staff line
    pub y: f64,
    pub clef: Clef,
    pub key_fifths: i8,
    /// Time signature, drawn on the first system only
    pub meter: Option<Meter>,
    pub width: f64,
}

/// Drawable form of a compiled tune
#[derive(Debug, Clone, PartialEq)]
pub struct VisualScore {
    pub title: Option<String>,
    pub subtitles: Vec<String>,
    pub composer: Option<String>,
    pub staves: Vec<Staff>,
    pub glyphs: Vec<Glyph>,
    pub width: f64,
    pub height: f64,
    pub scale: f64,
    highlighted: BTreeSet<ElementId>,
}

impl VisualScore {
    /// Lay out a tune. Only the compiler builds visual scores, always next to
    /// their audio score.
    pub(crate) fn layout(tune: &Tune, options: &RenderOptions) -> Self {
        let offsets = voice_offsets(tune);
        let voice_count = tune.voices.len().max(1);
        let systems = tune
            .voices
            .iter()
            .filter_map(|v| v.elements.last().map(|e| e.music_line + 1))
            .max()
            .unwrap_or(0)
            .max(1);

        let top = if tune.header.title.is_some() || tune.header.composer.is_some() {
            MARGIN + TITLE_HEIGHT + tune.header.subtitles.len() as f64 * 16.0
        } else {
            MARGIN
        };

        // Header meter, or 4/4 for display when none is given
        let meter = Some(tune.header.meter.unwrap_or(Meter {
            beats: 4,
            beat_type: 4,
            symbol: MeterSymbol::Numeric,
        }));

        let mut staves = Vec::new();
        let mut glyphs = Vec::new();

        for system in 0..systems {
            let system_glyph_start = glyphs.len();
            let mut prefix = 0.0f64;
            let mut natural_width = 0.0f64;

            for (v, voice) in tune.voices.iter().enumerate() {
                let y = top + STAFF_HEIGHT * 0.5 + (system * voice_count + v) as f64 * STAFF_SPACING;
                let staff_meter = if system == 0 { meter } else { None };
                let start_x = MARGIN
                    + CLEF_WIDTH
                    + tune.header.key.fifths.unsigned_abs() as f64 * KEY_ACCIDENTAL_WIDTH
                    + if staff_meter.is_some() { METER_WIDTH } else { 0.0 }
                    + 8.0;
                prefix = prefix.max(start_x);

                staves.push(Staff {
                    voice: v,
                    system,
                    y,
                    clef: voice.clef,
                    key_fifths: tune.header.key.fifths,
                    meter: staff_meter,
                    width: options.staff_width,
                });

                let bottom = voice.clef.bottom_line_step();
                let mut x = start_x;
                for (i, element) in voice.elements.iter().enumerate() {
                    if element.music_line != system {
                        continue;
                    }
                    if !element.is_drawable() {
                        x += spacing(element.length());
                        continue;
                    }
                    let id = ElementId(offsets[v] + i as u32);
                    let (kind, advance) = match &element.kind {
                        ElementKind::Note(note) => {
                            let (value, dots) = NoteValue::from_length(note.length);
                            let mut heads: Vec<NoteHead> = note
                                .pitches
                                .iter()
                                .map(|p| NoteHead {
                                    position: p.step - bottom,
                                    accidental: p.accidental,
                                })
                                .collect();
                            heads.sort_by_key(|h| h.position);
                            if heads.iter().any(|h| h.accidental.is_some()) {
                                x += ACCIDENTAL_SPACE;
                            }
                            (
                                GlyphKind::Note {
                                    heads,
                                    value,
                                    dots,
                                    tie: note.tie,
                                },
                                spacing(note.length),
                            )
                        }
                        ElementKind::Rest { length, .. } => {
                            let (value, dots) = NoteValue::from_length(*length);
                            (GlyphKind::Rest { value, dots }, spacing(*length))
                        }
                        ElementKind::MultiRest { measures, .. } => {
                            (GlyphKind::MultiRest { measures: *measures }, NOTE_LENGTH_SPACE * 1.5)
                        }
                        ElementKind::Bar(bar) => (
                            GlyphKind::Bar {
                                kind: bar.kind,
                                ending: bar.ending,
                            },
                            BAR_SPACE,
                        ),
                    };
                    glyphs.push(Glyph {
                        id,
                        voice: v,
                        system,
                        x,
                        kind,
                        chord_symbol: element.chord_symbol().map(str::to_string),
                        annotations: match &element.kind {
                            ElementKind::Note(note) => note.annotations.clone(),
                            _ => Vec::new(),
                        },
                        line: element.line,
                        column: element.column,
                    });
                    x += advance;
                }
                natural_width = natural_width.max(x - MARGIN);
            }

            // Justify the whole system so staves end together
            let target = options.staff_width - 2.0 * MARGIN;
            if natural_width > options.staff_width * JUSTIFY_THRESHOLD && natural_width > prefix {
                let content = natural_width - (prefix - MARGIN);
                let available = target - (prefix - MARGIN);
                if content > 0.0 && available > 0.0 {
                    let factor = available / content;
                    for glyph in &mut glyphs[system_glyph_start..] {
                        glyph.x = prefix + (glyph.x - prefix) * factor;
                    }
                }
            }
        }

        let height = top + (systems * voice_count) as f64 * STAFF_SPACING + MARGIN;
        VisualScore {
            title: tune.header.title.clone(),
            subtitles: tune.header.subtitles.clone(),
            composer: tune.header.composer.clone(),
            staves,
            glyphs,
            width: options.staff_width,
            height,
            scale: options.scale,
            highlighted: BTreeSet::new(),
        }
    }

    /// Number of drawable elements.
    pub fn element_count(&self) -> usize {
        self.glyphs.len()
    }

    pub fn glyph(&self, id: ElementId) -> Option<&Glyph> {
        self.glyphs
            .binary_search_by_key(&id, |g| g.id)
            .ok()
            .map(|i| &self.glyphs[i])
    }

    pub fn contains(&self, id: ElementId) -> bool {
        self.glyph(id).is_some()
    }

    pub fn staff(&self, voice: usize, system: usize) -> Option<&Staff> {
        self.staves.iter().find(|s| s.voice == voice && s.system == system)
    }

    pub fn highlighted(&self) -> &BTreeSet<ElementId> {
        &self.highlighted
    }

    pub fn is_highlighted(&self, id: ElementId) -> bool {
        self.highlighted.contains(&id)
    }

    /// Replace the highlighted set with exactly `ids` (ids not drawn here are skipped).
    pub fn set_highlighted(&mut self, ids: &[ElementId]) {
        self.highlighted.clear();
        for id in ids {
            if self.contains(*id) {
                self.highlighted.insert(*id);
            }
        }
    }

    pub fn clear_highlights(&mut self) {
        self.highlighted.clear();
    }
}

/// Horizontal space after a note or rest of the given length.
fn spacing(length: f64) -> f64 {
    NOTE_MIN_SPACE + NOTE_LENGTH_SPACE * length.max(0.0).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notation::parser::parse;

    fn layout(src: &str, options: &RenderOptions) -> VisualScore {
        VisualScore::layout(&parse(src).unwrap(), options)
    }

    #[test]
    fn test_note_values() {
        assert_eq!(NoteValue::from_length(0.25), (NoteValue::Quarter, 0));
        assert_eq!(NoteValue::from_length(0.375), (NoteValue::Quarter, 1));
        assert_eq!(NoteValue::from_length(1.0), (NoteValue::Whole, 0));
        assert_eq!(NoteValue::from_length(0.0625), (NoteValue::Sixteenth, 0));
    }

    #[test]
    fn test_one_system_per_music_line() {
        let score = layout("X:1\nK:C\nC D|\nE F|\nG A|", &RenderOptions::full());
        assert_eq!(score.staves.len(), 3);
        assert_eq!(score.glyphs.iter().filter(|g| g.system == 2).count(), 3);
        assert!(score.staves[0].meter.is_some());
        assert!(score.staves[1].meter.is_none());
    }

    #[test]
    fn test_longer_notes_take_more_space() {
        let score = layout("X:1\nL:1/4\nK:C\nC4 D E", &RenderOptions::full());
        let gap_whole = score.glyphs[1].x - score.glyphs[0].x;
        let gap_quarter = score.glyphs[2].x - score.glyphs[1].x;
        assert!(gap_whole > gap_quarter);
    }

    #[test]
    fn test_long_system_is_justified_to_staff_width() {
        let line = "C D E F G A B c ".repeat(6);
        let options = RenderOptions::mini();
        let score = layout(&format!("X:1\nK:C\n{}", line), &options);
        let last = score.glyphs.last().unwrap();
        assert!(last.x <= options.staff_width - MARGIN);
    }

    #[test]
    fn test_head_position_follows_clef() {
        let score = layout("X:1\nK:C\nE", &RenderOptions::full());
        match &score.glyphs[0].kind {
            GlyphKind::Note { heads, .. } => assert_eq!(heads[0].position, 0),
            other => panic!("expected note, got {:?}", other),
        }
        let score = layout("X:1\nK:C clef=bass\nG,,", &RenderOptions::full());
        match &score.glyphs[0].kind {
            GlyphKind::Note { heads, .. } => assert_eq!(heads[0].position, 0),
            other => panic!("expected note, got {:?}", other),
        }
    }

    #[test]
    fn test_invisible_rests_are_not_drawn() {
        let score = layout("X:1\nK:C\nC x D", &RenderOptions::full());
        assert_eq!(score.element_count(), 2);
        assert!(!score.contains(ElementId(1)));
    }

    #[test]
    fn test_set_highlighted_replaces_and_filters() {
        let mut score = layout("X:1\nK:C\nC D E", &RenderOptions::full());
        score.set_highlighted(&[ElementId(0)]);
        score.set_highlighted(&[ElementId(1), ElementId(99)]);
        assert_eq!(score.highlighted().iter().copied().collect::<Vec<_>>(), vec![ElementId(1)]);
        score.clear_highlights();
        assert!(score.highlighted().is_empty());
    }
}
