//! Synthesis backends
//!
//! A backend prepares a handle for one audio score; the handle follows the
//! transport (play from a position, pause, stop) and owns whatever the backend
//! allocated for that score until it is released.
//!
//! - [`SilentBackend`] - keeps state only; volume is advisory
//! - [`PcmBackend`] - renders the score to mono `f32` samples and applies real gain
//! - [`UnavailableBackend`] - always fails, for hosts without audio output

use super::types::AudioScore;
use crate::error::AudioInitError;
use std::f32::consts::TAU;
use std::sync::Arc;
use tracing::debug;

/// Longest tune the PCM backend will render up front
const MAX_RENDER_SECONDS: f64 = 600.0;

pub const DEFAULT_VOLUME: f32 = 0.5;

/// Creates synth handles for audio scores
pub trait SynthBackend {
    fn name(&self) -> &'static str;

    fn prepare(&self, score: &AudioScore) -> Result<Box<dyn SynthHandle>, AudioInitError>;
}

/// Per-score synthesis state driven by the transport
pub trait SynthHandle {
    /// Start (or resume) sounding from `seconds` into the tune.
    fn play(&mut self, seconds: f64);

    fn pause(&mut self);

    /// Stop and rewind to the start.
    fn stop(&mut self);

    fn set_volume(&mut self, volume: f32);

    fn volume(&self) -> f32;

    /// Free everything held for the score. Further calls are no-ops.
    fn release(&mut self);

    fn is_released(&self) -> bool;

    /// Pull the next block of output. Returns how many samples came from the tune;
    /// the rest of `out` is silence.
    fn fill(&mut self, out: &mut [f32]) -> usize {
        out.fill(0.0);
        0
    }
}

/// Backend that produces no sound
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentBackend;

impl SynthBackend for SilentBackend {
    fn name(&self) -> &'static str {
        "silent"
    }

    fn prepare(&self, _score: &AudioScore) -> Result<Box<dyn SynthHandle>, AudioInitError> {
        Ok(Box::new(SilentHandle {
            volume: DEFAULT_VOLUME,
            released: false,
        }))
    }
}

struct SilentHandle {
    volume: f32,
    released: bool,
}

impl SynthHandle for SilentHandle {
    fn play(&mut self, _seconds: f64) {}

    fn pause(&mut self) {}

    fn stop(&mut self) {}

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
    }

    fn volume(&self) -> f32 {
        self.volume
    }

    fn release(&mut self) {
        self.released = true;
    }

    fn is_released(&self) -> bool {
        self.released
    }
}

/// Backend for hosts with no audio output at all
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableBackend;

impl SynthBackend for UnavailableBackend {
    fn name(&self) -> &'static str {
        "none"
    }

    fn prepare(&self, _score: &AudioScore) -> Result<Box<dyn SynthHandle>, AudioInitError> {
        Err(AudioInitError::Unsupported(
            "no audio output is configured".to_string(),
        ))
    }
}

/// Renders scores to PCM with a simple additive voice
#[derive(Debug, Clone, Copy)]
pub struct PcmBackend {
    pub sample_rate: u32,
}

impl Default for PcmBackend {
    fn default() -> Self {
        Self { sample_rate: 44_100 }
    }
}

impl PcmBackend {
    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate }
    }

    /// Render a whole score to mono samples at unit gain.
    pub fn render(&self, score: &AudioScore) -> Result<Vec<f32>, AudioInitError> {
        if self.sample_rate == 0 {
            return Err(AudioInitError::Prepare("sample rate must be positive".to_string()));
        }
        if !score.total_seconds.is_finite() || score.total_seconds > MAX_RENDER_SECONDS {
            return Err(AudioInitError::Prepare(format!(
                "tune lasts {:.0}s, longer than the {:.0}s render limit",
                score.total_seconds, MAX_RENDER_SECONDS
            )));
        }

        let sample_rate = self.sample_rate as f32;
        let tail = Envelope::RELEASE;
        let length = ((score.total_seconds as f32 + tail) * sample_rate).ceil() as usize;
        let mut samples = vec![0.0f32; length];

        for note in &score.notes {
            let amplitude = 0.25 * note.velocity as f32 / 127.0;
            add_voice(&mut samples, sample_rate, note.midi_note, note.start_time, note.duration, amplitude);
        }
        for chord in &score.chords {
            let amplitude = 0.12 * chord.velocity as f32 / 127.0;
            for midi in &chord.midi_notes {
                add_voice(&mut samples, sample_rate, *midi, chord.start_time, chord.duration, amplitude);
            }
        }

        for sample in &mut samples {
            *sample = sample.clamp(-1.0, 1.0);
        }
        Ok(samples)
    }
}

impl SynthBackend for PcmBackend {
    fn name(&self) -> &'static str {
        "pcm"
    }

    fn prepare(&self, score: &AudioScore) -> Result<Box<dyn SynthHandle>, AudioInitError> {
        let samples = self.render(score)?;
        debug!(samples = samples.len(), sample_rate = self.sample_rate, "Rendered score to PCM");
        Ok(Box::new(PcmHandle {
            samples: Some(Arc::new(samples)),
            sample_rate: self.sample_rate,
            cursor: 0,
            playing: false,
            volume: DEFAULT_VOLUME,
        }))
    }
}

/// Playback cursor over rendered samples
struct PcmHandle {
    samples: Option<Arc<Vec<f32>>>,
    sample_rate: u32,
    cursor: usize,
    playing: bool,
    volume: f32,
}

impl SynthHandle for PcmHandle {
    fn play(&mut self, seconds: f64) {
        self.cursor = (seconds.max(0.0) * self.sample_rate as f64) as usize;
        self.playing = self.samples.is_some();
    }

    fn pause(&mut self) {
        self.playing = false;
    }

    fn stop(&mut self) {
        self.playing = false;
        self.cursor = 0;
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
    }

    fn volume(&self) -> f32 {
        self.volume
    }

    fn release(&mut self) {
        self.playing = false;
        self.samples = None;
    }

    fn is_released(&self) -> bool {
        self.samples.is_none()
    }

    fn fill(&mut self, out: &mut [f32]) -> usize {
        out.fill(0.0);
        let Some(samples) = self.samples.as_ref().filter(|_| self.playing) else {
            return 0;
        };
        let available = samples.len().saturating_sub(self.cursor).min(out.len());
        for (dst, src) in out.iter_mut().zip(&samples[self.cursor..self.cursor + available]) {
            *dst = src * self.volume;
        }
        self.cursor += available;
        if self.cursor >= samples.len() {
            self.playing = false;
        }
        available
    }
}

/// Attack / decay / sustain / release shape in seconds
struct Envelope;

impl Envelope {
    const ATTACK: f32 = 0.008;
    const DECAY: f32 = 0.12;
    const SUSTAIN: f32 = 0.6;
    const RELEASE: f32 = 0.08;

    /// Gain at `t` seconds after note on, for a note held `held` seconds.
    fn gain(t: f32, held: f32) -> f32 {
        let sustained = if t < Self::ATTACK {
            t / Self::ATTACK
        } else if t < Self::ATTACK + Self::DECAY {
            1.0 - (1.0 - Self::SUSTAIN) * (t - Self::ATTACK) / Self::DECAY
        } else {
            Self::SUSTAIN
        };
        if t <= held {
            sustained
        } else {
            let level = Self::gain(held, held);
            (level * (1.0 - (t - held) / Self::RELEASE)).max(0.0)
        }
    }
}

fn midi_to_frequency(midi: u8) -> f32 {
    440.0 * 2f32.powf((midi as f32 - 69.0) / 12.0)
}

/// Mix one enveloped note (fundamental plus a soft octave) into `samples`.
fn add_voice(samples: &mut [f32], sample_rate: f32, midi: u8, start: f64, duration: f64, amplitude: f32) {
    let frequency = midi_to_frequency(midi);
    let held = duration as f32;
    let first = (start as f32 * sample_rate) as usize;
    let count = ((held + Envelope::RELEASE) * sample_rate) as usize;
    let end = (first + count).min(samples.len());

    for (n, sample) in samples[first.min(end)..end].iter_mut().enumerate() {
        let t = n as f32 / sample_rate;
        let phase = TAU * frequency * t;
        let tone = phase.sin() + 0.3 * (2.0 * phase).sin();
        *sample += amplitude * Envelope::gain(t, held) * tone;
    }
}
