//! # Notation Compiler
//!
//! Compiles a score source string (a practical subset of ABC notation) into a
//! paired Visual Score and Audio Score.
//!
//! ## Purpose
//! Every playable score on a lesson page and in the assistant panel goes through
//! [`compile`]. The two halves share element ids, so timing events from the audio
//! side address glyphs on the visual side.
//!
//! ## Pipeline
//! ```text
//! source ──lexer──▶ tokens ──parser──▶ Tune ──┬─ layout ──▶ VisualScore
//!                                             └─ engine ──▶ AudioScore
//! ```
//!
//! ## Example
//! ```rust
//! use theory_reader::notation::{compile, RenderOptions};
//!
//! let score = compile("X:1\nK:C\nC D E F", &RenderOptions::full()).unwrap();
//! assert_eq!(score.visual.element_count(), 4);
//! assert_eq!(score.audio.events.len(), 4);
//! assert_eq!(score.audio.total_seconds, 1.0); // four eighth notes at 120 bpm
//! ```
//!
//! ## Related Modules
//! - `playback` - transport and highlighting over the compiled pair
//! - `widget` - one compiled score plus its controls

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod svg;
pub mod visual;

pub use parser::parse;
pub use svg::to_svg;
pub use visual::{ElementId, Glyph, GlyphKind, RenderOptions, Staff, VisualScore};

use crate::error::NotationParseError;
use crate::playback::{build_audio_score, AudioScore};
use tracing::debug;

/// Visual and audio halves compiled from one source
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledScore {
    pub visual: VisualScore,
    pub audio: AudioScore,
}

/// Compile a score source. Identical source and options always give identical output.
pub fn compile(source: &str, options: &RenderOptions) -> Result<CompiledScore, NotationParseError> {
    let tune = parse(source)?;
    let visual = VisualScore::layout(&tune, options);
    let audio = build_audio_score(&tune);
    debug!(
        elements = visual.element_count(),
        events = audio.events.len(),
        seconds = audio.total_seconds,
        "Compiled score"
    );
    Ok(CompiledScore { visual, audio })
}
