//! Playback transport
//!
//! Play / pause / seek-to-start over one audio score. The host drives time by
//! calling [`Transport::tick`] with the wall-clock time elapsed since the last
//! tick; the transport answers with the timing events that became due, in order.
//!
//! A transport owns its synth handle and releases it on every teardown path,
//! including drop.

use super::synth::{SynthHandle, DEFAULT_VOLUME};
use super::types::{AudioScore, TimingEvent};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackStatus {
    Stopped,
    Playing,
    Paused,
}

pub struct Transport {
    score: Option<Arc<AudioScore>>,
    synth: Option<Box<dyn SynthHandle>>,
    status: PlaybackStatus,
    /// Seconds from the start of the tune
    position: f64,
    /// Index of the first event not yet emitted
    next_event: usize,
    volume: f32,
}

impl Transport {
    pub fn new(score: Arc<AudioScore>, synth: Option<Box<dyn SynthHandle>>) -> Self {
        Self {
            score: Some(score),
            synth,
            status: PlaybackStatus::Stopped,
            position: 0.0,
            next_event: 0,
            volume: DEFAULT_VOLUME,
        }
    }

    pub fn status(&self) -> PlaybackStatus {
        self.status
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn duration(&self) -> f64 {
        self.score.as_ref().map_or(0.0, |s| s.total_seconds)
    }

    pub fn is_released(&self) -> bool {
        self.score.is_none()
    }

    pub fn has_audio(&self) -> bool {
        self.synth.is_some()
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Volume in `[0, 1]`, forwarded to the synth handle.
    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
        if let Some(synth) = self.synth.as_mut() {
            synth.set_volume(self.volume);
        }
    }

    /// Begin playing from the start, or resume from a pause.
    ///
    /// Does nothing once released or when the score has nothing to play.
    pub fn start(&mut self) {
        let Some(score) = self.score.as_ref() else {
            return;
        };
        if score.is_empty() {
            return;
        }
        match self.status {
            PlaybackStatus::Playing => {}
            PlaybackStatus::Paused => {
                self.status = PlaybackStatus::Playing;
                if let Some(synth) = self.synth.as_mut() {
                    synth.play(self.position);
                }
                debug!(position = self.position, "Resumed playback");
            }
            PlaybackStatus::Stopped => {
                self.position = 0.0;
                self.next_event = 0;
                self.status = PlaybackStatus::Playing;
                if let Some(synth) = self.synth.as_mut() {
                    synth.play(0.0);
                }
                debug!("Started playback");
            }
        }
    }

    /// Freeze the position; a later `start` resumes from here.
    pub fn pause(&mut self) {
        if self.status == PlaybackStatus::Playing {
            self.status = PlaybackStatus::Paused;
            if let Some(synth) = self.synth.as_mut() {
                synth.pause();
            }
            debug!(position = self.position, "Paused playback");
        }
    }

    /// Seek to the start and stop.
    pub fn stop(&mut self) {
        self.status = PlaybackStatus::Stopped;
        self.position = 0.0;
        self.next_event = 0;
        if let Some(synth) = self.synth.as_mut() {
            synth.stop();
        }
    }

    /// Advance by `elapsed` while playing and return the events now due.
    ///
    /// Reaching the end of the tune returns the transport to `Stopped` at
    /// position zero; the final events are still returned.
    pub fn tick(&mut self, elapsed: Duration) -> Vec<TimingEvent> {
        if self.status != PlaybackStatus::Playing {
            return Vec::new();
        }
        let Some(score) = self.score.clone() else {
            return Vec::new();
        };

        self.position += elapsed.as_secs_f64();

        let mut due = Vec::new();
        while let Some(event) = score.events.get(self.next_event) {
            if event.time > self.position + 1e-9 {
                break;
            }
            due.push(event.clone());
            self.next_event += 1;
        }

        if self.position >= score.total_seconds {
            debug!(total = score.total_seconds, "Playback reached the end");
            self.stop();
        }

        due
    }

    /// Stop and free the synth handle. Safe to call more than once.
    pub fn release(&mut self) {
        if self.score.is_none() {
            return;
        }
        self.stop();
        if let Some(mut synth) = self.synth.take() {
            synth.release();
        }
        self.score = None;
        debug!("Released transport");
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.release();
    }
}
