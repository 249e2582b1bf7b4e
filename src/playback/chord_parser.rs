//! Chord symbol parsing for accompaniment
//!
//! Turns quoted chord symbols (`"C"`, `"Am7"`, `"G7/B"`) into MIDI voicings.

/// Parse a chord symbol into MIDI notes
///
/// Chords are voiced upward from the root in the C3 octave (MIDI 48-59) so they sit
/// under a melody written around middle C. A slash bass (`C/E`) adds the bass note
/// one octave below the root octave.
///
/// Returns an empty vector when the symbol does not start with a chord root
/// (annotations such as `"N.C."` or `"Fine"` therefore stay silent).
///
/// # Supported Qualities
/// - **Triads**: `""`/`maj`/`M`, `m`/`min`/`-`, `dim`/`°`, `aug`/`+`, `sus2`, `sus4`
/// - **Sixths**: `6`, `m6`
/// - **Sevenths**: `7`, `maj7`/`M7`, `m7`/`min7`/`-7`, `dim7`, `m7b5`/`ø`, `7sus4`
/// - **Ninths**: `9`, `maj9`/`M9`, `m9`/`min9`, `add9`
///
/// # Examples
/// ```
/// use theory_reader::playback::parse_chord_symbol;
///
/// assert_eq!(parse_chord_symbol("C"), vec![48, 52, 55]);
/// assert_eq!(parse_chord_symbol("Dm"), vec![50, 53, 57]);
/// assert_eq!(parse_chord_symbol("G7"), vec![55, 59, 62, 65]);
/// assert_eq!(parse_chord_symbol("C/E"), vec![40, 48, 52, 55]);
/// ```
pub fn parse_chord_symbol(chord_symbol: &str) -> Vec<u8> {
    let symbol = chord_symbol.trim();
    let (main, bass) = match symbol.split_once('/') {
        Some((main, bass)) => (main, Some(bass)),
        None => (symbol, None),
    };

    let Some((root, quality)) = parse_root(main) else {
        return vec![];
    };
    let Some(intervals) = quality_intervals(quality) else {
        return vec![];
    };

    let mut notes: Vec<u8> = intervals.iter().map(|i| root + i).collect();

    if let Some(bass) = bass {
        if let Some((bass_root, "")) = parse_root(bass) {
            notes.insert(0, bass_root - 12);
        }
    }

    notes
}

/// Root letter and accidental, returning the MIDI root in the C3 octave and the rest.
fn parse_root(s: &str) -> Option<(u8, &str)> {
    let mut chars = s.chars();
    let base: i16 = match chars.next()? {
        'C' => 48,
        'D' => 50,
        'E' => 52,
        'F' => 53,
        'G' => 55,
        'A' => 57,
        'B' => 59,
        _ => return None,
    };
    let rest = chars.as_str();
    let (alteration, quality) = if let Some(q) = rest.strip_prefix('#') {
        (1, q)
    } else if let Some(q) = rest.strip_prefix('b') {
        (-1, q)
    } else {
        (0, rest)
    };
    Some(((base + alteration) as u8, quality))
}

/// Semitone intervals above the root for a chord quality
fn quality_intervals(quality: &str) -> Option<&'static [u8]> {
    let intervals: &'static [u8] = match quality {
        "" | "maj" | "M" => &[0, 4, 7],
        "m" | "min" | "-" => &[0, 3, 7],
        "dim" | "°" | "o" => &[0, 3, 6],
        "aug" | "+" => &[0, 4, 8],
        "sus4" | "sus" => &[0, 5, 7],
        "sus2" => &[0, 2, 7],

        "6" => &[0, 4, 7, 9],
        "m6" | "min6" => &[0, 3, 7, 9],

        "7" => &[0, 4, 7, 10],
        "maj7" | "M7" | "Δ" => &[0, 4, 7, 11],
        "m7" | "min7" | "-7" => &[0, 3, 7, 10],
        "dim7" | "°7" | "o7" => &[0, 3, 6, 9],
        "m7b5" | "ø" => &[0, 3, 6, 10],
        "7sus4" => &[0, 5, 7, 10],

        "9" => &[0, 4, 7, 10, 14],
        "maj9" | "M9" => &[0, 4, 7, 11, 14],
        "m9" | "min9" => &[0, 3, 7, 10, 14],
        "add9" => &[0, 4, 7, 14],

        _ => return None,
    };
    Some(intervals)
}
