//! # Playback Module
//!
//! Audio side of a compiled score and the machinery that plays it.
//!
//! ## Purpose
//! 1. **Audio score** - melody notes, accompaniment chords and timing events in seconds
//! 2. **Transport** - play / pause / seek-to-start driven by a host tick
//! 3. **Synthesis** - pluggable backends behind [`SynthBackend`]
//! 4. **Highlighting** - timing events applied to the owning visual score
//!
//! ## Sub-modules
//! - `types` - AudioScore, AudioNote, AudioChord, TimingEvent
//! - `engine` - repeat expansion and audio score generation
//! - `chord_parser` - chord symbol voicings (C, Am, G7, ...)
//! - `synth` - SynthBackend / SynthHandle and the silent, PCM and unavailable backends
//! - `transport` - Transport and PlaybackStatus
//! - `highlight` - HighlightSync
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use theory_reader::notation::{compile, RenderOptions};
//! use theory_reader::playback::{HighlightSync, PlaybackStatus, Transport};
//!
//! let mut score = compile("X:1\nK:C\nC D E F", &RenderOptions::full()).unwrap();
//! let mut transport = Transport::new(Arc::new(score.audio.clone()), None);
//! let mut sync = HighlightSync::new();
//!
//! transport.start();
//! let due = transport.tick(Duration::from_millis(300));
//! sync.apply_all(&mut score.visual, &due);
//!
//! assert_eq!(transport.status(), PlaybackStatus::Playing);
//! assert_eq!(score.visual.highlighted().len(), 1);
//! ```
//!
//! ## Timing
//! Element lengths are measured in whole notes; the tempo's seconds-per-whole-note
//! turns them into seconds. The default tempo is 120 quarter notes per minute,
//! so a whole note lasts two seconds.
//!
//! ## Related Modules
//! - `notation` - produces the audio score together with its visual score
//! - `widget` - owns a transport per rendered score

mod chord_parser;
mod engine;
mod highlight;
mod synth;
mod transport;
mod types;


pub use chord_parser::parse_chord_symbol;
pub(crate) use engine::build_audio_score;
pub use engine::build_playback_sequence;
pub use highlight::HighlightSync;
pub use synth::{PcmBackend, SilentBackend, SynthBackend, SynthHandle, UnavailableBackend, DEFAULT_VOLUME};
pub use transport::{PlaybackStatus, Transport};
pub use types::{AudioChord, AudioNote, AudioScore, TimingEvent};
