//! # Tune Types
//!
//! The parsed form of a score source.
//!
//! ## Type Hierarchy
//! ```text
//! Tune
//!   ├── Header (reference, title, composer, meter, unit length, tempo, key, clef)
//!   └── Vec<Voice>
//!         ├── id, name, clef
//!         └── Vec<Element>
//!               ├── Note(NoteEvent)   single note or chord, resolved pitches
//!               ├── Rest              visible (z) or invisible (x)
//!               ├── MultiRest         Z, whole measures of silence
//!               └── Bar               bar line kind + optional volta ending
//! ```
//!
//! ## Key Concepts
//!
//! ### Lengths
//! Every timed element carries its length in whole notes, already multiplied by the
//! unit note length, tuplet ratio and broken-rhythm factor in force when it was parsed.
//! Playback only has to add them up.
//!
//! ### Pitches
//! Pitches are resolved at parse time: the key signature and any accidental seen
//! earlier in the same bar are applied, so `midi` is the sounding pitch. `step` is the
//! diatonic staff position with middle C at 0, used for layout.
//!
//! ### Octaves
//! - Upper-case `C` is middle C (MIDI 60), lower-case `c` is one octave up (72)
//! - Each `'` raises one octave, each `,` lowers one octave

use std::ops::Range;

/// Time signature as written in an `M:` field
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Meter {
    pub beats: u8,
    pub beat_type: u8,
    pub symbol: MeterSymbol,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum MeterSymbol {
    #[default]
    Numeric,
    Common,
    Cut,
}

impl Default for Meter {
    fn default() -> Self {
        Self {
            beats: 4,
            beat_type: 4,
            symbol: MeterSymbol::Numeric,
        }
    }
}

impl Meter {
    /// Length of one full measure in whole notes (4/4 = 1.0, 6/8 = 0.75).
    pub fn measure_length(&self) -> f64 {
        self.beats as f64 / self.beat_type as f64
    }
}

/// Mode of a key signature, relative to the major scale on the same tonic
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Mode {
    #[default]
    Major,
    Minor,
    Dorian,
    Phrygian,
    Lydian,
    Mixolydian,
    Locrian,
}

impl Mode {
    fn from_abc(s: &str) -> Option<Self> {
        let lower = s.to_ascii_lowercase();
        if lower.is_empty() {
            return Some(Mode::Major);
        }
        if lower == "m" {
            return Some(Mode::Minor);
        }
        let prefix = lower.get(..3)?;
        match prefix {
            "maj" | "ion" => Some(Mode::Major),
            "min" | "aeo" => Some(Mode::Minor),
            "dor" => Some(Mode::Dorian),
            "phr" => Some(Mode::Phrygian),
            "lyd" => Some(Mode::Lydian),
            "mix" => Some(Mode::Mixolydian),
            "loc" => Some(Mode::Locrian),
            _ => None,
        }
    }

    /// Shift in fifths relative to the major key on the same tonic.
    fn fifths_offset(self) -> i8 {
        match self {
            Mode::Lydian => 1,
            Mode::Major => 0,
            Mode::Mixolydian => -1,
            Mode::Dorian => -2,
            Mode::Minor => -3,
            Mode::Phrygian => -4,
            Mode::Locrian => -5,
        }
    }
}

/// Key signature (number of sharps/flats)
/// Positive = sharps, Negative = flats, Zero = C major / A minor
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct KeySignature {
    pub fifths: i8, // -7 to +7 (flats to sharps)
    pub mode: Mode,
}

impl KeySignature {
    /// Parse the tonic-and-mode part of a `K:` field: "C", "G", "Am", "F#m", "Bb",
    /// "Dmix", "E dorian", "none". Returns `None` for anything else.
    pub fn from_abc(tonic: &str, mode: &str) -> Option<Self> {
        if tonic.eq_ignore_ascii_case("none") || tonic == "HP" || tonic == "Hp" {
            return Some(Self::default());
        }

        let mut chars = tonic.chars();
        let letter = chars.next()?;
        let name = NoteName::from_char(letter).filter(|_| letter.is_ascii_uppercase())?;
        let rest: String = chars.collect();

        let (alteration, mode_str) = if let Some(m) = rest.strip_prefix('#') {
            (7, format!("{}{}", m, mode))
        } else if let Some(m) = rest.strip_prefix('b') {
            (-7, format!("{}{}", m, mode))
        } else {
            (0, format!("{}{}", rest, mode))
        };

        let mode = Mode::from_abc(&mode_str)?;
        let fifths = name.major_fifths() + alteration + mode.fifths_offset();
        if !(-7..=7).contains(&fifths) {
            return None;
        }
        Some(Self { fifths, mode })
    }

    /// Returns the semitone alteration the key signature applies to a note name.
    /// Order of sharps: F C G D A E B
    /// Order of flats: B E A D G C F
    pub fn accidental_for_note(&self, note: NoteName) -> i8 {
        const SHARPS: [NoteName; 7] = [
            NoteName::F,
            NoteName::C,
            NoteName::G,
            NoteName::D,
            NoteName::A,
            NoteName::E,
            NoteName::B,
        ];
        if self.fifths > 0 {
            if SHARPS[..self.fifths as usize].contains(&note) {
                1
            } else {
                0
            }
        } else if self.fifths < 0 {
            let count = self.fifths.unsigned_abs() as usize;
            if SHARPS.iter().rev().take(count).any(|n| *n == note) {
                -1
            } else {
                0
            }
        } else {
            0
        }
    }
}

/// Tempo from a `Q:` field: `bpm` beats of `beat` whole notes each
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tempo {
    pub bpm: f64,
    pub beat: f64,
}

impl Default for Tempo {
    fn default() -> Self {
        Self { bpm: 120.0, beat: 0.25 }
    }
}

impl Tempo {
    pub fn to_quarter_note_bpm(&self) -> f64 {
        self.bpm * self.beat * 4.0
    }

    /// Seconds taken by one whole note at this tempo.
    pub fn seconds_per_whole(&self) -> f64 {
        60.0 / (self.bpm * self.beat)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Clef {
    #[default]
    Treble,
    Bass,
    Alto,
}

impl Clef {
    pub fn from_abc(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "treble" | "g" => Some(Clef::Treble),
            "bass" | "f" => Some(Clef::Bass),
            "alto" | "c" => Some(Clef::Alto),
            _ => None,
        }
    }

    /// Staff step of the bottom staff line (E4 for treble, G2 for bass, F3 for alto).
    pub fn bottom_line_step(&self) -> i32 {
        match self {
            Clef::Treble => 2,
            Clef::Bass => -10,
            Clef::Alto => -4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum NoteName {
    #[default]
    C,
    D,
    E,
    F,
    G,
    A,
    B,
}

impl NoteName {
    /// Accepts both cases; the caller decides what the case means.
    pub fn from_char(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'C' => Some(NoteName::C),
            'D' => Some(NoteName::D),
            'E' => Some(NoteName::E),
            'F' => Some(NoteName::F),
            'G' => Some(NoteName::G),
            'A' => Some(NoteName::A),
            'B' => Some(NoteName::B),
            _ => None,
        }
    }

    /// Diatonic index within the octave, C = 0.
    pub fn index(self) -> i32 {
        self as i32
    }

    pub fn semitone(self) -> i32 {
        match self {
            NoteName::C => 0,
            NoteName::D => 2,
            NoteName::E => 4,
            NoteName::F => 5,
            NoteName::G => 7,
            NoteName::A => 9,
            NoteName::B => 11,
        }
    }

    /// Position of the major key on this tonic in the circle of fifths.
    fn major_fifths(self) -> i8 {
        match self {
            NoteName::C => 0,
            NoteName::D => 2,
            NoteName::E => 4,
            NoteName::F => -1,
            NoteName::G => 1,
            NoteName::A => 3,
            NoteName::B => 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accidental {
    DoubleFlat,  // __
    Flat,        // _
    Natural,     // =
    Sharp,       // ^
    DoubleSharp, // ^^
}

impl Accidental {
    pub fn semitones(self) -> i8 {
        match self {
            Accidental::DoubleFlat => -2,
            Accidental::Flat => -1,
            Accidental::Natural => 0,
            Accidental::Sharp => 1,
            Accidental::DoubleSharp => 2,
        }
    }
}

/// A resolved pitch
#[derive(Debug, Clone, PartialEq)]
pub struct Pitch {
    pub name: NoteName,
    /// Accidental written in the source, if any (drawn on the staff)
    pub accidental: Option<Accidental>,
    /// 0 = the octave starting at middle C
    pub octave: i8,
    /// Sounding pitch after key signature and bar accidentals
    pub midi: u8,
    /// Diatonic staff step, middle C = 0
    pub step: i32,
}

/// A note or chord with its length in whole notes
#[derive(Debug, Clone, PartialEq)]
pub struct NoteEvent {
    pub pitches: Vec<Pitch>,
    pub length: f64,
    pub tie: bool,
    pub is_chord: bool,
    pub chord_symbol: Option<String>,
    pub annotations: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BarKind {
    Single,      // |
    Double,      // ||
    Final,       // |]
    Start,       // [|
    RepeatStart, // |:
    RepeatEnd,   // :|
    RepeatBoth,  // :: or :|:
}

impl BarKind {
    pub fn opens_repeat(self) -> bool {
        matches!(self, BarKind::RepeatStart | BarKind::RepeatBoth)
    }

    pub fn closes_repeat(self) -> bool {
        matches!(self, BarKind::RepeatEnd | BarKind::RepeatBoth)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bar {
    pub kind: BarKind,
    pub ending: Option<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ElementKind {
    Note(NoteEvent),
    Rest {
        length: f64,
        invisible: bool,
        chord_symbol: Option<String>,
    },
    MultiRest {
        measures: u32,
        length: f64,
    },
    Bar(Bar),
}

/// One element of a voice with its source position
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub kind: ElementKind,
    pub line: usize,
    pub column: usize,
    /// Index of the voice's music line this element was written on (one system per line)
    pub music_line: usize,
}

impl Element {
    /// Length in whole notes; zero for bars.
    pub fn length(&self) -> f64 {
        match &self.kind {
            ElementKind::Note(note) => note.length,
            ElementKind::Rest { length, .. } | ElementKind::MultiRest { length, .. } => *length,
            ElementKind::Bar(_) => 0.0,
        }
    }

    pub fn is_timed(&self) -> bool {
        !matches!(self.kind, ElementKind::Bar(_))
    }

    /// Whether the element is drawn (invisible rests only take time).
    pub fn is_drawable(&self) -> bool {
        !matches!(self.kind, ElementKind::Rest { invisible: true, .. })
    }

    pub fn chord_symbol(&self) -> Option<&str> {
        match &self.kind {
            ElementKind::Note(note) => note.chord_symbol.as_deref(),
            ElementKind::Rest { chord_symbol, .. } => chord_symbol.as_deref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Ending {
    First,
    Second,
}

impl Ending {
    fn from_number(n: u8) -> Option<Self> {
        match n {
            1 => Some(Ending::First),
            2 => Some(Ending::Second),
            _ => None,
        }
    }
}

/// A measure of a voice: the elements between two bar lines plus repeat structure
#[derive(Debug, Clone, PartialEq)]
pub struct Measure {
    pub elements: Range<usize>,
    pub repeat_start: bool,
    pub repeat_end: bool,
    pub ending: Option<Ending>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Voice {
    pub id: String,
    pub name: Option<String>,
    pub clef: Clef,
    pub elements: Vec<Element>,
}

impl Voice {
    pub fn new(id: impl Into<String>, clef: Clef) -> Self {
        Self {
            id: id.into(),
            name: None,
            clef,
            elements: Vec::new(),
        }
    }

    /// Split the voice into measures at its bar lines.
    ///
    /// Bars without timed content in front of them (a leading `|:`, a doubled `| |`)
    /// do not create empty measures; their repeat and ending marks move to the
    /// neighbouring measure instead.
    pub fn measures(&self) -> Vec<Measure> {
        let mut measures: Vec<Measure> = Vec::new();
        let mut start = 0;
        let mut next_repeat_start = false;
        let mut next_ending: Option<Ending> = None;

        for (i, element) in self.elements.iter().enumerate() {
            let ElementKind::Bar(bar) = &element.kind else {
                continue;
            };
            let has_content = self.elements[start..i].iter().any(Element::is_timed);
            if has_content {
                measures.push(Measure {
                    elements: start..i,
                    repeat_start: next_repeat_start,
                    repeat_end: bar.kind.closes_repeat(),
                    ending: next_ending.take(),
                });
                next_repeat_start = false;
            } else if bar.kind.closes_repeat() {
                if let Some(last) = measures.last_mut() {
                    last.repeat_end = true;
                }
            }
            if bar.kind.opens_repeat() {
                next_repeat_start = true;
            }
            if let Some(n) = bar.ending {
                next_ending = Ending::from_number(n);
            }
            start = i + 1;
        }

        if self.elements[start..].iter().any(Element::is_timed) {
            measures.push(Measure {
                elements: start..self.elements.len(),
                repeat_start: next_repeat_start,
                repeat_end: false,
                ending: next_ending,
            });
        }

        measures
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    pub reference: Option<u32>,
    pub title: Option<String>,
    pub subtitles: Vec<String>,
    pub composer: Option<String>,
    pub meter: Option<Meter>,
    pub unit_length: f64,
    pub tempo: Option<Tempo>,
    pub key: KeySignature,
    pub clef: Clef,
}

impl Default for Header {
    fn default() -> Self {
        Self {
            reference: None,
            title: None,
            subtitles: Vec::new(),
            composer: None,
            meter: None,
            unit_length: 0.125,
            tempo: None,
            key: KeySignature::default(),
            clef: Clef::Treble,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tune {
    pub header: Header,
    pub voices: Vec<Voice>,
}

impl Tune {
    pub fn tempo(&self) -> Tempo {
        self.header.tempo.unwrap_or_default()
    }

    pub fn element_count(&self) -> usize {
        self.voices.iter().map(|v| v.elements.len()).sum()
    }
}
