use crate::error::NotationParseError;
use crate::notation::ast::*;
use crate::notation::lexer::{Lexer, LocatedToken, Token};
use std::collections::HashMap;
use tracing::debug;

/// Header letters that are part of the notation standard but carry nothing we lay
/// out or play (history, notes, origin, lyrics, words, transcription, ...).
const IGNORED_FIELDS: &[char] = &[
    'A', 'B', 'D', 'F', 'G', 'H', 'I', 'N', 'O', 'P', 'R', 'r', 'S', 's', 'U', 'W', 'w', 'Z', 'm',
];

/// Parse a complete score source into a [`Tune`].
///
/// Header lines run until the `K:` field (or the first music line when there is
/// none). Everything after that is body: music lines, body field lines and comments.
pub fn parse(source: &str) -> Result<Tune, NotationParseError> {
    if source.trim().is_empty() {
        return Err(NotationParseError::Empty);
    }

    let mut builder = TuneBuilder::default();
    let mut in_header = true;

    for (index, raw_line) in source.lines().enumerate() {
        let line_number = index + 1;
        let line = raw_line.trim_end();
        let trimmed = line.trim_start();

        if trimmed.is_empty() || trimmed.starts_with('%') {
            continue;
        }

        if let Some((field, value)) = split_field_line(trimmed) {
            if in_header {
                builder.header_field(field, value, line_number)?;
                if field == 'K' {
                    in_header = false;
                    builder.finish_header();
                }
            } else {
                builder.body_field(field, value, line_number)?;
            }
            continue;
        }

        if in_header {
            in_header = false;
            builder.finish_header();
        }

        builder.music_line(line, line_number)?;
    }

    if in_header {
        builder.finish_header();
    }

    builder.finish()
}

/// `X:value` at the start of a line (any ASCII letter followed by a colon).
fn split_field_line(line: &str) -> Option<(char, &str)> {
    let mut chars = line.chars();
    let field = chars.next()?;
    if field.is_ascii_alphabetic() && chars.next() == Some(':') {
        Some((field, line[2..].trim()))
    } else {
        None
    }
}

fn malformed(line: usize, field: char, message: impl Into<String>) -> NotationParseError {
    NotationParseError::MalformedHeader {
        line,
        field,
        message: message.into(),
    }
}

/// Parse "3/8" or "3" into a fraction of a whole note.
fn parse_fraction(s: &str) -> Option<f64> {
    let s = s.trim();
    match s.split_once('/') {
        Some((n, d)) => {
            let n: u32 = n.trim().parse().ok()?;
            let d: u32 = d.trim().parse().ok()?;
            if n == 0 || d == 0 {
                return None;
            }
            Some(n as f64 / d as f64)
        }
        None => {
            let n: u32 = s.parse().ok()?;
            if n == 0 {
                return None;
            }
            Some(n as f64)
        }
    }
}

fn parse_meter(value: &str, line: usize) -> Result<Option<Meter>, NotationParseError> {
    match value.trim() {
        "" | "none" => return Ok(None),
        "C" => {
            return Ok(Some(Meter {
                beats: 4,
                beat_type: 4,
                symbol: MeterSymbol::Common,
            }))
        }
        "C|" => {
            return Ok(Some(Meter {
                beats: 2,
                beat_type: 2,
                symbol: MeterSymbol::Cut,
            }))
        }
        _ => {}
    }

    let (beats, beat_type) = value
        .split_once('/')
        .ok_or_else(|| malformed(line, 'M', format!("Invalid meter '{}', expected n/d", value)))?;

    // Additive numerators such as 2+3/8
    let mut total: u32 = 0;
    for part in beats.split('+') {
        let n: u32 = part
            .trim()
            .parse()
            .map_err(|_| malformed(line, 'M', format!("Invalid meter numerator '{}'", beats)))?;
        total += n;
    }
    let beat_type: u32 = beat_type
        .trim()
        .parse()
        .map_err(|_| malformed(line, 'M', format!("Invalid meter denominator '{}'", beat_type)))?;

    if total == 0 || total > u8::MAX as u32 || beat_type == 0 || beat_type > u8::MAX as u32 {
        return Err(malformed(line, 'M', format!("Meter out of range '{}'", value)));
    }

    Ok(Some(Meter {
        beats: total as u8,
        beat_type: beat_type as u8,
        symbol: MeterSymbol::Numeric,
    }))
}

fn parse_unit_length(value: &str, line: usize) -> Result<f64, NotationParseError> {
    parse_fraction(value).ok_or_else(|| malformed(line, 'L', format!("Invalid unit note length '{}'", value)))
}

/// Tempo as written; a bare number is counted in unit lengths, which may not be known yet.
#[derive(Debug, Clone, Copy)]
enum RawTempo {
    Beats(Tempo),
    Units(f64),
}

fn parse_tempo(value: &str, line: usize) -> Result<Option<RawTempo>, NotationParseError> {
    // Drop quoted text like "Allegro"
    let mut unquoted = String::new();
    let mut in_quote = false;
    for c in value.chars() {
        if c == '"' {
            in_quote = !in_quote;
        } else if !in_quote {
            unquoted.push(c);
        }
    }
    let unquoted = unquoted.trim();
    if unquoted.is_empty() {
        return Ok(None);
    }

    let bad = || malformed(line, 'Q', format!("Invalid tempo '{}'", value));

    match unquoted.split_once('=') {
        Some((beats, bpm)) => {
            let bpm: f64 = bpm.trim().parse().map_err(|_| bad())?;
            let mut beat = 0.0;
            for part in beats.split_whitespace() {
                beat += parse_fraction(part).ok_or_else(bad)?;
            }
            if beat <= 0.0 || bpm <= 0.0 {
                return Err(bad());
            }
            Ok(Some(RawTempo::Beats(Tempo { bpm, beat })))
        }
        None => {
            let bpm: f64 = unquoted.parse().map_err(|_| bad())?;
            if bpm <= 0.0 {
                return Err(bad());
            }
            Ok(Some(RawTempo::Units(bpm)))
        }
    }
}

/// Named clef words accepted without a `clef=` prefix in K: and V: fields.
fn bare_clef(word: &str) -> Option<Clef> {
    match word.to_ascii_lowercase().as_str() {
        "treble" => Some(Clef::Treble),
        "bass" => Some(Clef::Bass),
        "alto" => Some(Clef::Alto),
        _ => None,
    }
}

fn parse_key(value: &str, line: usize) -> Result<(KeySignature, Option<Clef>), NotationParseError> {
    let mut words = value.split_whitespace();
    let Some(tonic) = words.next() else {
        return Ok((KeySignature::default(), None));
    };

    let mut clef = None;
    let mut mode = "";
    for word in words {
        if let Some((k, v)) = word.split_once('=') {
            if k.eq_ignore_ascii_case("clef") {
                clef = Some(
                    Clef::from_abc(v).ok_or_else(|| malformed(line, 'K', format!("Unknown clef '{}'", v)))?,
                );
            }
        } else if let Some(c) = bare_clef(word) {
            clef = Some(c);
        } else if mode.is_empty() && word.chars().all(|c| c.is_ascii_alphabetic()) {
            mode = word;
        }
        // Explicit accidentals (^f _b) are not applied
    }

    let key = KeySignature::from_abc(tonic, mode)
        .ok_or_else(|| malformed(line, 'K', format!("Unknown key '{}'", value)))?;
    Ok((key, clef))
}

/// Voice id plus optional display name and clef from a V: field.
fn parse_voice_field(value: &str, line: usize) -> Result<(String, Option<String>, Option<Clef>), NotationParseError> {
    let mut words = value.split_whitespace();
    let id = words
        .next()
        .ok_or_else(|| malformed(line, 'V', "Voice field needs an id"))?
        .to_string();

    let mut name = None;
    let mut clef = None;
    let rest: Vec<&str> = words.collect();
    let rest = rest.join(" ");

    // name="Two words" may contain spaces, so scan key=value pairs by hand
    let mut remaining = rest.as_str();
    while !remaining.is_empty() {
        remaining = remaining.trim_start();
        let (pair, tail) = match remaining.split_once('=') {
            Some((key, after)) => {
                let after = after.trim_start();
                let (val, tail) = if let Some(stripped) = after.strip_prefix('"') {
                    match stripped.split_once('"') {
                        Some((quoted, tail)) => (quoted, tail),
                        None => (stripped, ""),
                    }
                } else {
                    match after.split_once(char::is_whitespace) {
                        Some((v, tail)) => (v, tail),
                        None => (after, ""),
                    }
                };
                ((key.trim(), Some(val)), tail)
            }
            None => match remaining.split_once(char::is_whitespace) {
                Some((word, tail)) => ((word, None), tail),
                None => ((remaining, None), ""),
            },
        };

        match pair {
            (key, Some(val)) if key.eq_ignore_ascii_case("name") || key.eq_ignore_ascii_case("nm") => {
                name = Some(val.to_string());
            }
            (key, Some(val)) if key.eq_ignore_ascii_case("clef") => {
                clef = Some(Clef::from_abc(val).ok_or_else(|| malformed(line, 'V', format!("Unknown clef '{}'", val)))?);
            }
            (word, None) => {
                if let Some(c) = bare_clef(word) {
                    clef = Some(c);
                }
            }
            _ => {}
        }
        remaining = tail;
    }

    Ok((id, name, clef))
}

/// Per-voice state that lives across music lines
struct VoiceState {
    voice: Voice,
    /// Accidentals written earlier in the current bar, by (letter, octave)
    bar_accidentals: HashMap<(NoteName, i8), i8>,
    /// Open slurs, innermost last
    open_slurs: Vec<(usize, usize)>,
    /// Length factor owed to the next timed element by a broken rhythm
    pending_broken: Option<f64>,
    music_line: usize,
    line_has_content: bool,
}

impl VoiceState {
    fn new(id: String, clef: Clef) -> Self {
        Self {
            voice: Voice::new(id, clef),
            bar_accidentals: HashMap::new(),
            open_slurs: Vec::new(),
            pending_broken: None,
            music_line: 0,
            line_has_content: false,
        }
    }
}

/// Tuplet ratio applied to the next `remaining` timed elements
#[derive(Clone, Copy)]
struct TupletContext {
    ratio: f64,
    remaining: u8,
}

struct TuneBuilder {
    header: Header,
    raw_tempo: Option<RawTempo>,
    has_unit_length: bool,
    key: KeySignature,
    unit_length: f64,
    meter: Option<Meter>,
    voices: Vec<VoiceState>,
    current: usize,
}

impl Default for TuneBuilder {
    fn default() -> Self {
        Self {
            header: Header::default(),
            raw_tempo: None,
            has_unit_length: false,
            key: KeySignature::default(),
            unit_length: 0.125,
            meter: None,
            voices: Vec::new(),
            current: 0,
        }
    }
}

impl TuneBuilder {
    fn header_field(&mut self, field: char, value: &str, line: usize) -> Result<(), NotationParseError> {
        match field {
            'X' => {
                let n = value
                    .parse()
                    .map_err(|_| malformed(line, 'X', format!("Reference number must be a whole number, got '{}'", value)))?;
                self.header.reference = Some(n);
            }
            'T' => {
                if self.header.title.is_none() {
                    self.header.title = Some(value.to_string());
                } else {
                    self.header.subtitles.push(value.to_string());
                }
            }
            'C' => self.header.composer = Some(value.to_string()),
            'M' => {
                self.header.meter = parse_meter(value, line)?;
                self.meter = self.header.meter;
            }
            'L' => {
                self.unit_length = parse_unit_length(value, line)?;
                self.has_unit_length = true;
            }
            'Q' => self.raw_tempo = parse_tempo(value, line)?,
            'K' => {
                let (key, clef) = parse_key(value, line)?;
                self.header.key = key;
                self.key = key;
                if let Some(clef) = clef {
                    self.header.clef = clef;
                }
            }
            'V' => {
                let (id, name, clef) = parse_voice_field(value, line)?;
                self.select_voice(id, name, clef);
            }
            f if IGNORED_FIELDS.contains(&f) => {}
            f => return Err(NotationParseError::UnknownField { line, field: f }),
        }
        Ok(())
    }

    /// Resolve defaults that depend on the whole header.
    fn finish_header(&mut self) {
        if !self.has_unit_length {
            self.unit_length = match self.meter {
                Some(m) if m.measure_length() < 0.75 => 0.0625,
                _ => 0.125,
            };
        }
        self.header.unit_length = self.unit_length;
        self.header.tempo = self.raw_tempo.map(|raw| match raw {
            RawTempo::Beats(tempo) => tempo,
            RawTempo::Units(bpm) => Tempo {
                bpm,
                beat: self.unit_length,
            },
        });
        // Voices declared before K: take the key's clef unless they set their own
        let clef = self.header.clef;
        for state in &mut self.voices {
            if state.voice.elements.is_empty() && state.voice.clef == Clef::Treble {
                state.voice.clef = clef;
            }
        }
        debug!(
            title = ?self.header.title,
            unit_length = self.unit_length,
            fifths = self.key.fifths,
            "Parsed tune header"
        );
    }

    fn body_field(&mut self, field: char, value: &str, line: usize) -> Result<(), NotationParseError> {
        match field {
            'K' => {
                let (key, clef) = parse_key(value, line)?;
                self.key = key;
                if let Some(clef) = clef {
                    self.voice_mut().voice.clef = clef;
                }
            }
            'L' => self.unit_length = parse_unit_length(value, line)?,
            'M' => self.meter = parse_meter(value, line)?,
            'V' => {
                let (id, name, clef) = parse_voice_field(value, line)?;
                self.select_voice(id, name, clef);
            }
            'Q' => debug!(line, "Ignoring tempo change in tune body"),
            'T' | 'C' | 'X' => {}
            f if IGNORED_FIELDS.contains(&f) => {}
            f => return Err(NotationParseError::UnknownField { line, field: f }),
        }
        Ok(())
    }

    fn select_voice(&mut self, id: String, name: Option<String>, clef: Option<Clef>) {
        let index = match self.voices.iter().position(|v| v.voice.id == id) {
            Some(index) => index,
            None => {
                self.voices.push(VoiceState::new(id, self.header.clef));
                self.voices.len() - 1
            }
        };
        let state = &mut self.voices[index];
        if name.is_some() {
            state.voice.name = name;
        }
        if let Some(clef) = clef {
            state.voice.clef = clef;
        }
        self.current = index;
    }

    fn voice_mut(&mut self) -> &mut VoiceState {
        if self.voices.is_empty() {
            self.voices.push(VoiceState::new("1".to_string(), self.header.clef));
            self.current = 0;
        }
        &mut self.voices[self.current]
    }

    fn music_line(&mut self, line: &str, line_number: usize) -> Result<(), NotationParseError> {
        let voice_id = self.voice_mut().voice.id.clone();
        let tokens = Lexer::new(line, line_number, &voice_id).tokenize()?;

        let mut parser = Parser::new(tokens);
        parser.parse_line(self)?;

        // A trailing backslash continues the same system on the next line
        if !line.ends_with('\\') {
            for state in &mut self.voices {
                if state.line_has_content {
                    state.music_line += 1;
                    state.line_has_content = false;
                }
            }
        }
        Ok(())
    }

    fn finish(mut self) -> Result<Tune, NotationParseError> {
        if self.voices.is_empty() {
            self.voice_mut();
        }
        let mut voices = Vec::with_capacity(self.voices.len());
        for state in self.voices {
            if let Some(&(line, column)) = state.open_slurs.first() {
                return Err(NotationParseError::UnbalancedVoice {
                    voice: state.voice.id,
                    line,
                    column,
                    message: "Slur opened here is never closed".to_string(),
                });
            }
            voices.push(state.voice);
        }
        Ok(Tune {
            header: self.header,
            voices,
        })
    }
}

/// Pending text attached to the next note or rest
#[derive(Default)]
struct PendingText {
    chord_symbol: Option<String>,
    annotations: Vec<String>,
}

impl PendingText {
    fn push(&mut self, text: String) {
        let mut chars = text.chars();
        match chars.next() {
            Some('^' | '_' | '<' | '>' | '@') => self.annotations.push(chars.as_str().to_string()),
            _ => self.chord_symbol = Some(text),
        }
    }
}

/// Parser over the tokens of one music line
pub struct Parser {
    tokens: Vec<LocatedToken>,
    position: usize,
    tuplet: Option<TupletContext>,
    pending: PendingText,
}

impl Parser {
    pub fn new(tokens: Vec<LocatedToken>) -> Self {
        Self {
            tokens,
            position: 0,
            tuplet: None,
            pending: PendingText::default(),
        }
    }

    fn current(&self) -> Option<&LocatedToken> {
        self.tokens.get(self.position)
    }

    fn advance(&mut self) -> Option<LocatedToken> {
        let token = self.tokens.get(self.position).cloned();
        self.position += 1;
        token
    }

    fn take_length(&mut self) -> f64 {
        if let Some(LocatedToken {
            token: Token::Length { num, den },
            ..
        }) = self.current()
        {
            let factor = *num as f64 / (*den).max(1) as f64;
            self.advance();
            factor
        } else {
            1.0
        }
    }

    fn take_octave(&mut self) -> i8 {
        if let Some(LocatedToken {
            token: Token::Octave(n),
            ..
        }) = self.current()
        {
            let n = *n;
            self.advance();
            n
        } else {
            0
        }
    }

    fn parse_line(&mut self, builder: &mut TuneBuilder) -> Result<(), NotationParseError> {
        while let Some(located) = self.advance() {
            let LocatedToken { token, line, column } = located;
            match token {
                Token::Space => {}
                Token::Annotation(text) => self.pending.push(text),
                Token::Accidental(_) | Token::Note { .. } => {
                    // Step back so the note parser sees its own accidental
                    self.position -= 1;
                    let pitch = self.parse_pitch(builder)?;
                    let length = self.take_length();
                    self.push_note(builder, vec![pitch], length, false, line, column);
                }
                Token::ChordStart => {
                    let (pitches, inner_length) = self.parse_chord(builder, line, column)?;
                    let length = inner_length * self.take_length();
                    self.push_note(builder, pitches, length, true, line, column);
                }
                Token::ChordEnd => {
                    return Err(NotationParseError::UnbalancedVoice {
                        voice: builder.voice_mut().voice.id.clone(),
                        line,
                        column,
                        message: "Unexpected ']' without a matching '['".to_string(),
                    });
                }
                Token::Rest { invisible } => {
                    let factor = self.take_length();
                    let length = self.timed_length(builder, factor);
                    let chord_symbol = std::mem::take(&mut self.pending).chord_symbol;
                    push_element(
                        builder,
                        ElementKind::Rest {
                            length,
                            invisible,
                            chord_symbol,
                        },
                        line,
                        column,
                    );
                }
                Token::MultiRest => {
                    let measures = match self.current() {
                        Some(LocatedToken {
                            token: Token::Length { num, .. },
                            ..
                        }) => {
                            let n = (*num).max(1);
                            self.advance();
                            n
                        }
                        _ => 1,
                    };
                    let length = measures as f64 * builder.meter.unwrap_or_default().measure_length();
                    push_element(builder, ElementKind::MultiRest { measures, length }, line, column);
                }
                Token::Bar(kind) => {
                    let ending = match self.current() {
                        Some(LocatedToken {
                            token: Token::Ending(n),
                            ..
                        }) => {
                            let n = *n;
                            self.advance();
                            Some(n)
                        }
                        _ => None,
                    };
                    self.pending = PendingText::default();
                    let state = builder.voice_mut();
                    state.bar_accidentals.clear();
                    push_element(builder, ElementKind::Bar(Bar { kind, ending }), line, column);
                }
                Token::Ending(n) => {
                    let state = builder.voice_mut();
                    match state.voice.elements.last_mut() {
                        Some(Element {
                            kind: ElementKind::Bar(bar),
                            ..
                        }) if bar.ending.is_none() => bar.ending = Some(n),
                        _ => {
                            return Err(NotationParseError::Syntax {
                                line,
                                column,
                                message: format!("Ending [{} must follow a bar line", n),
                            })
                        }
                    }
                }
                Token::Tie => {
                    let state = builder.voice_mut();
                    match state.voice.elements.last_mut() {
                        Some(Element {
                            kind: ElementKind::Note(note),
                            ..
                        }) => note.tie = true,
                        _ => {
                            return Err(NotationParseError::Syntax {
                                line,
                                column,
                                message: "Tie '-' must follow a note".to_string(),
                            })
                        }
                    }
                }
                Token::SlurStart => builder.voice_mut().open_slurs.push((line, column)),
                Token::SlurEnd => {
                    let state = builder.voice_mut();
                    if state.open_slurs.pop().is_none() {
                        return Err(NotationParseError::UnbalancedVoice {
                            voice: state.voice.id.clone(),
                            line,
                            column,
                            message: "Slur closed without being opened".to_string(),
                        });
                    }
                }
                Token::Tuplet { p, q, r } => {
                    if p < 2 {
                        return Err(NotationParseError::Syntax {
                            line,
                            column,
                            message: format!("Invalid tuplet ({}", p),
                        });
                    }
                    let q = q.unwrap_or_else(|| default_tuplet_q(p, builder.meter));
                    let r = r.unwrap_or(p);
                    self.tuplet = Some(TupletContext {
                        ratio: q as f64 / p as f64,
                        remaining: r,
                    });
                }
                Token::Broken(n) => {
                    let dots = n.unsigned_abs().min(3) as i32;
                    let short = 0.5f64.powi(dots);
                    let long = 2.0 - short;
                    let (this, next) = if n > 0 { (long, short) } else { (short, long) };
                    let state = builder.voice_mut();
                    match state.voice.elements.last_mut() {
                        Some(Element {
                            kind: ElementKind::Note(note),
                            ..
                        }) => note.length *= this,
                        Some(Element {
                            kind: ElementKind::Rest { length, .. },
                            ..
                        }) => *length *= this,
                        _ => {
                            return Err(NotationParseError::Syntax {
                                line,
                                column,
                                message: "Broken rhythm must follow a note or rest".to_string(),
                            })
                        }
                    }
                    state.pending_broken = Some(next);
                }
                Token::InlineField { field, value } => match field {
                    'K' | 'L' | 'M' | 'V' | 'Q' => builder.body_field(field, &value, line)?,
                    _ => debug!(line, column, %field, "Ignoring inline field"),
                },
                Token::Length { .. } => {
                    return Err(NotationParseError::Syntax {
                        line,
                        column,
                        message: "Note length without a note".to_string(),
                    })
                }
                Token::Octave(_) => {
                    return Err(NotationParseError::Syntax {
                        line,
                        column,
                        message: "Octave mark without a note".to_string(),
                    })
                }
            }
        }
        Ok(())
    }

    /// Accidental? Note Octave? with key signature and bar accidentals applied.
    fn parse_pitch(&mut self, builder: &mut TuneBuilder) -> Result<Pitch, NotationParseError> {
        let mut accidental = None;
        let mut position = (0, 0);
        while let Some(LocatedToken {
            token: Token::Accidental(acc),
            line,
            column,
        }) = self.current()
        {
            accidental = Some(*acc);
            position = (*line, *column);
            self.advance();
        }

        let (name, lower) = match self.advance() {
            Some(LocatedToken {
                token: Token::Note { name, lower },
                ..
            }) => (name, lower),
            Some(other) => {
                return Err(NotationParseError::Syntax {
                    line: other.line,
                    column: other.column,
                    message: "Accidental must be followed by a note".to_string(),
                })
            }
            None => {
                return Err(NotationParseError::Syntax {
                    line: position.0,
                    column: position.1,
                    message: "Accidental must be followed by a note".to_string(),
                })
            }
        };

        let octave = (lower as i8).saturating_add(self.take_octave());
        let key = builder.key;
        let state = builder.voice_mut();
        let alteration = match accidental {
            Some(acc) => {
                state.bar_accidentals.insert((name, octave), acc.semitones());
                acc.semitones()
            }
            None => state
                .bar_accidentals
                .get(&(name, octave))
                .copied()
                .unwrap_or_else(|| key.accidental_for_note(name)),
        };

        let midi = (60 + 12 * octave as i32 + name.semitone() + alteration as i32).clamp(0, 127) as u8;
        Ok(Pitch {
            name,
            accidental,
            octave,
            midi,
            step: octave as i32 * 7 + name.index(),
        })
    }

    /// Notes between `[` and `]`; the chord takes the length of its first note.
    fn parse_chord(
        &mut self,
        builder: &mut TuneBuilder,
        line: usize,
        column: usize,
    ) -> Result<(Vec<Pitch>, f64), NotationParseError> {
        let mut pitches = Vec::new();
        let mut first_length = None;
        loop {
            match self.current().map(|t| t.token.clone()) {
                Some(Token::ChordEnd) => {
                    self.advance();
                    break;
                }
                Some(Token::Accidental(_) | Token::Note { .. }) => {
                    pitches.push(self.parse_pitch(builder)?);
                    let length = self.take_length();
                    first_length.get_or_insert(length);
                }
                Some(Token::Tie | Token::Space) => {
                    self.advance();
                }
                Some(Token::Bar(_)) | None => {
                    return Err(NotationParseError::UnbalancedVoice {
                        voice: builder.voice_mut().voice.id.clone(),
                        line,
                        column,
                        message: "Unterminated chord (missing ']')".to_string(),
                    })
                }
                Some(_) => {
                    let (l, c) = self.current().map(|t| (t.line, t.column)).unwrap_or((line, column));
                    return Err(NotationParseError::Syntax {
                        line: l,
                        column: c,
                        message: "Only notes may appear inside a chord".to_string(),
                    });
                }
            }
        }
        if pitches.is_empty() {
            return Err(NotationParseError::Syntax {
                line,
                column,
                message: "Empty chord".to_string(),
            });
        }
        Ok((pitches, first_length.unwrap_or(1.0)))
    }

    /// Scale a length factor by the unit length, tuplet and broken rhythm in force.
    fn timed_length(&mut self, builder: &mut TuneBuilder, factor: f64) -> f64 {
        let mut length = builder.unit_length * factor;
        if let Some(tuplet) = self.tuplet.as_mut() {
            length *= tuplet.ratio;
            tuplet.remaining = tuplet.remaining.saturating_sub(1);
            if tuplet.remaining == 0 {
                self.tuplet = None;
            }
        }
        if let Some(broken) = builder.voice_mut().pending_broken.take() {
            length *= broken;
        }
        length
    }

    fn push_note(
        &mut self,
        builder: &mut TuneBuilder,
        pitches: Vec<Pitch>,
        factor: f64,
        is_chord: bool,
        line: usize,
        column: usize,
    ) {
        let length = self.timed_length(builder, factor);
        let PendingText {
            chord_symbol,
            annotations,
        } = std::mem::take(&mut self.pending);
        push_element(
            builder,
            ElementKind::Note(NoteEvent {
                pitches,
                length,
                tie: false,
                is_chord,
                chord_symbol,
                annotations,
            }),
            line,
            column,
        );
    }
}

fn push_element(builder: &mut TuneBuilder, kind: ElementKind, line: usize, column: usize) {
    let state = builder.voice_mut();
    let music_line = state.music_line;
    state.voice.elements.push(Element {
        kind,
        line,
        column,
        music_line,
    });
    state.line_has_content = true;
}

/// Notes of a (p tuplet are played in the time of q.
fn default_tuplet_q(p: u8, meter: Option<Meter>) -> u8 {
    let compound = meter.is_some_and(|m| m.beats % 3 == 0 && m.beats > 3);
    match p {
        2 | 4 | 8 => 3,
        3 | 6 => 2,
        _ if compound => 3,
        _ => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notes(tune: &Tune) -> Vec<&NoteEvent> {
        tune.voices[0]
            .elements
            .iter()
            .filter_map(|e| match &e.kind {
                ElementKind::Note(n) => Some(n),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_parse_simple_tune() {
        let tune = parse("X:1\nT:Scale\nM:4/4\nL:1/4\nK:C\nC D E F|").unwrap();
        assert_eq!(tune.header.reference, Some(1));
        assert_eq!(tune.header.title.as_deref(), Some("Scale"));
        let n = notes(&tune);
        assert_eq!(n.len(), 4);
        assert_eq!(n[0].pitches[0].midi, 60);
        assert_eq!(n[3].pitches[0].midi, 65);
        assert_eq!(n[0].length, 0.25);
        assert_eq!(tune.voices[0].elements.len(), 5);
    }

    #[test]
    fn test_default_unit_length() {
        let tune = parse("X:1\nK:C\nC").unwrap();
        assert_eq!(tune.header.unit_length, 0.125);
        let tune = parse("X:1\nM:2/4\nK:C\nC").unwrap();
        assert_eq!(tune.header.unit_length, 0.0625);
        let tune = parse("X:1\nM:3/4\nK:C\nC").unwrap();
        assert_eq!(tune.header.unit_length, 0.125);
    }

    #[test]
    fn test_octaves_and_accidentals() {
        let tune = parse("X:1\nK:C\nc c' C, ^F =F _B").unwrap();
        let midi: Vec<u8> = notes(&tune).iter().map(|n| n.pitches[0].midi).collect();
        assert_eq!(midi, vec![72, 84, 48, 66, 65, 70]);
    }

    #[test]
    fn test_key_signature_and_bar_accidentals() {
        // G major: F is sharp unless naturalised; the natural lasts until the bar line
        let tune = parse("X:1\nK:G\nF =F F | F").unwrap();
        let midi: Vec<u8> = notes(&tune).iter().map(|n| n.pitches[0].midi).collect();
        assert_eq!(midi, vec![66, 65, 65, 66]);
    }

    #[test]
    fn test_chord_length_and_pitches() {
        let tune = parse("X:1\nL:1/4\nK:C\n[CEG]2").unwrap();
        let n = notes(&tune);
        assert!(n[0].is_chord);
        assert_eq!(n[0].pitches.len(), 3);
        assert_eq!(n[0].length, 0.5);
    }

    #[test]
    fn test_tuplet_and_broken_rhythm() {
        let tune = parse("X:1\nL:1/8\nK:C\n(3CDE F>G").unwrap();
        let n = notes(&tune);
        assert!((n[0].length - 0.125 * 2.0 / 3.0).abs() < 1e-9);
        assert!((n[3].length - 0.1875).abs() < 1e-9);
        assert!((n[4].length - 0.0625).abs() < 1e-9);
    }

    #[test]
    fn test_chord_symbols_and_annotations() {
        let tune = parse("X:1\nK:C\n\"Am\"A \"^loud\"B").unwrap();
        let n = notes(&tune);
        assert_eq!(n[0].chord_symbol.as_deref(), Some("Am"));
        assert_eq!(n[1].chord_symbol, None);
        assert_eq!(n[1].annotations, vec!["loud".to_string()]);
    }

    #[test]
    fn test_voices_and_music_lines() {
        let src = "X:1\nK:C\nV:1\nC D|\nV:2 clef=bass\nC, D,|\nV:1\nE F|";
        let tune = parse(src).unwrap();
        assert_eq!(tune.voices.len(), 2);
        assert_eq!(tune.voices[1].clef, Clef::Bass);
        let last = tune.voices[0].elements.last().unwrap();
        assert_eq!(last.music_line, 1);
        assert_eq!(tune.voices[1].elements[0].music_line, 0);
    }

    #[test]
    fn test_volta_endings_attach_to_bars() {
        let tune = parse("X:1\nK:C\n|: C D |1 E F :|2 G A |]").unwrap();
        let endings: Vec<Option<u8>> = tune.voices[0]
            .elements
            .iter()
            .filter_map(|e| match &e.kind {
                ElementKind::Bar(b) => Some(b.ending),
                _ => None,
            })
            .collect();
        assert_eq!(endings, vec![None, Some(1), Some(2), None]);
    }

    #[test]
    fn test_multi_measure_rest() {
        let tune = parse("X:1\nM:3/4\nK:C\nZ2|").unwrap();
        assert_eq!(tune.voices[0].elements[0].length(), 1.5);
    }

    #[test]
    fn test_header_only_tune_is_valid() {
        let tune = parse("X:1\nT:Nothing yet\nK:C").unwrap();
        assert_eq!(tune.element_count(), 0);
    }

    #[test]
    fn test_empty_source() {
        assert_eq!(parse("  \n "), Err(NotationParseError::Empty));
    }

    #[test]
    fn test_unknown_field() {
        assert_eq!(
            parse("X:1\nJ:what\nK:C\nC"),
            Err(NotationParseError::UnknownField { line: 2, field: 'J' })
        );
    }

    #[test]
    fn test_malformed_header() {
        assert!(matches!(
            parse("X:1\nM:4-4\nK:C\nC"),
            Err(NotationParseError::MalformedHeader { line: 2, field: 'M', .. })
        ));
        assert!(matches!(
            parse("X:1\nK:H\nC"),
            Err(NotationParseError::MalformedHeader { line: 2, field: 'K', .. })
        ));
    }

    #[test]
    fn test_unbalanced_chord_and_slur() {
        assert!(matches!(
            parse("X:1\nK:C\n[CEG C"),
            Err(NotationParseError::UnbalancedVoice { line: 3, column: 1, .. })
        ));
        assert!(matches!(
            parse("X:1\nK:C\nC D) E"),
            Err(NotationParseError::UnbalancedVoice { line: 3, column: 4, .. })
        ));
        assert!(matches!(
            parse("X:1\nK:C\n(C D E"),
            Err(NotationParseError::UnbalancedVoice { line: 3, column: 1, .. })
        ));
    }

    #[test]
    fn test_tempo_forms() {
        let tune = parse("X:1\nQ:1/4=90\nK:C\nC").unwrap();
        assert_eq!(tune.tempo().to_quarter_note_bpm(), 90.0);
        let tune = parse("X:1\nL:1/8\nQ:200\nK:C\nC").unwrap();
        assert_eq!(tune.tempo().to_quarter_note_bpm(), 100.0);
        let tune = parse("X:1\nQ:\"Allegro\" 3/8=60\nK:C\nC").unwrap();
        assert_eq!(tune.tempo().to_quarter_note_bpm(), 90.0);
        let tune = parse("X:1\nK:C\nC").unwrap();
        assert_eq!(tune.tempo().to_quarter_note_bpm(), 120.0);
    }

    #[test]
    fn test_score_line_break_marker() {
        let tune = parse("X:1\nK:C\nC D E F $ G A B c").unwrap();
        let midi: Vec<u8> = notes(&tune).iter().map(|n| n.pitches[0].midi).collect();
        assert_eq!(midi, vec![60, 62, 64, 65, 67, 69, 71, 72]);
        let tune = parse("X:1\nK:C\nC D|$E F|").unwrap();
        assert_eq!(notes(&tune).len(), 4);
    }

    #[test]
    fn test_no_key_field_starts_body() {
        let tune = parse("C D E F").unwrap();
        assert_eq!(notes(&tune).len(), 4);
    }
}
