//! # Notation Widget
//!
//! One playable score: the compiled visual/audio pair, a transport with its synth
//! handle, and the highlight sync that ties them together.
//!
//! ## Lifecycle
//! ```text
//! Uninitialized ──set_source──▶ Compiling ──▶ Ready
//!                                        └──▶ ParseError
//! ```
//! Any change of source or render options goes back through `Compiling`, and the
//! previous transport is released before the new score is compiled. Setting the
//! same source again does nothing, so a streaming transcript can feed every
//! re-render through [`NotationWidget::set_source`].
//!
//! Audio is best-effort. When the synth backend cannot prepare the score the
//! widget is still `Ready`, draws the score, and reports playback as unavailable.
//!
//! ## Related Modules
//! - `notation` - compile and SVG rendering
//! - `playback` - transport, synth backends, highlight sync
//! - `transcript` - widgets created for notation segments in assistant messages

use crate::error::NotationParseError;
use crate::notation::{compile, to_svg, RenderOptions, VisualScore};
use crate::playback::{HighlightSync, PlaybackStatus, SynthBackend, Transport, DEFAULT_VOLUME};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum WidgetState {
    Uninitialized,
    Compiling,
    Ready,
    ParseError(NotationParseError),
}

/// Whether the widget can make sound for its current score
#[derive(Debug, Clone, PartialEq)]
pub enum AudioAvailability {
    /// No score compiled yet
    Pending,
    Available,
    /// Backend failed; playback controls are disabled
    Unavailable(String),
}

/// What the host should draw in place of the transport controls
#[derive(Debug, Clone, PartialEq)]
pub enum Controls {
    Playback(PlaybackStatus),
    /// Small disabled indicator with its reason
    Disabled(String),
    Hidden,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WidgetBody {
    Empty,
    Score { svg: String },
    Error { message: String },
}

/// Snapshot of everything a host needs to draw the widget
#[derive(Debug, Clone, PartialEq)]
pub struct WidgetView {
    pub id: String,
    pub body: WidgetBody,
    pub controls: Controls,
    /// `Some` only when the render options show a volume slider
    pub volume: Option<f32>,
}

pub struct NotationWidget {
    id: String,
    source: Option<String>,
    options: RenderOptions,
    state: WidgetState,
    visual: Option<VisualScore>,
    transport: Option<Transport>,
    sync: HighlightSync,
    audio: AudioAvailability,
    volume: f32,
}

impl NotationWidget {
    /// `id` must be unique on the page; it prefixes every element id in the SVG.
    pub fn new(id: impl Into<String>, options: RenderOptions) -> Self {
        Self {
            id: id.into(),
            source: None,
            options,
            state: WidgetState::Uninitialized,
            visual: None,
            transport: None,
            sync: HighlightSync::new(),
            audio: AudioAvailability::Pending,
            volume: DEFAULT_VOLUME,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn options(&self) -> &RenderOptions {
        &self.options
    }

    pub fn state(&self) -> &WidgetState {
        &self.state
    }

    pub fn audio(&self) -> &AudioAvailability {
        &self.audio
    }

    pub fn visual(&self) -> Option<&VisualScore> {
        self.visual.as_ref()
    }

    /// Compile `source` unless it is the source already shown.
    ///
    /// Returns whether a recompile happened.
    pub fn set_source(&mut self, source: &str, backend: &dyn SynthBackend) -> bool {
        if self.source.as_deref() == Some(source) && self.state != WidgetState::Uninitialized {
            return false;
        }
        self.source = Some(source.to_string());
        self.rebuild(backend);
        true
    }

    /// Change render options, recompiling the current source. No-op when unchanged.
    pub fn set_options(&mut self, options: RenderOptions, backend: &dyn SynthBackend) -> bool {
        if self.options == options {
            return false;
        }
        self.options = options;
        if self.source.is_some() {
            self.rebuild(backend);
        }
        true
    }

    fn rebuild(&mut self, backend: &dyn SynthBackend) {
        self.teardown();
        self.state = WidgetState::Compiling;

        let Some(source) = self.source.as_deref() else {
            self.state = WidgetState::Uninitialized;
            return;
        };

        let compiled = match compile(source, &self.options) {
            Ok(compiled) => compiled,
            Err(e) => {
                debug!(widget = %self.id, error = %e, "Score failed to compile");
                self.state = WidgetState::ParseError(e);
                return;
            }
        };

        let synth = match backend.prepare(&compiled.audio) {
            Ok(handle) => {
                self.audio = AudioAvailability::Available;
                Some(handle)
            }
            Err(e) => {
                warn!(widget = %self.id, backend = backend.name(), error = %e, "Audio unavailable");
                self.audio = AudioAvailability::Unavailable(e.to_string());
                None
            }
        };

        if synth.is_some() {
            let mut transport = Transport::new(Arc::new(compiled.audio), synth);
            transport.set_volume(self.volume);
            self.transport = Some(transport);
        }
        self.visual = Some(compiled.visual);
        self.state = WidgetState::Ready;
    }

    /// Release the transport and drop the compiled score.
    fn teardown(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.release();
        }
        if let Some(visual) = self.visual.as_mut() {
            self.sync.reset(visual);
        }
        self.visual = None;
        self.audio = AudioAvailability::Pending;
    }

    pub fn playback(&self) -> PlaybackStatus {
        self.transport
            .as_ref()
            .map_or(PlaybackStatus::Stopped, Transport::status)
    }

    pub fn can_play(&self) -> bool {
        self.transport.is_some()
    }

    /// Play when stopped or paused, pause when playing.
    pub fn toggle_play(&mut self) {
        let Some(transport) = self.transport.as_mut() else {
            return;
        };
        match transport.status() {
            PlaybackStatus::Playing => transport.pause(),
            PlaybackStatus::Paused | PlaybackStatus::Stopped => transport.start(),
        }
    }

    pub fn stop(&mut self) {
        if let Some(transport) = self.transport.as_mut() {
            transport.stop();
        }
    }

    /// Advance playback and move the highlight. Returns how many events were applied.
    pub fn tick(&mut self, elapsed: Duration) -> usize {
        let (Some(transport), Some(visual)) = (self.transport.as_mut(), self.visual.as_mut()) else {
            return 0;
        };
        let due = transport.tick(elapsed);
        self.sync.apply_all(visual, &due);
        due.len()
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
        if let Some(transport) = self.transport.as_mut() {
            transport.set_volume(self.volume);
        }
    }

    pub fn svg(&self) -> Option<String> {
        self.visual.as_ref().map(|visual| to_svg(visual, &self.id))
    }

    pub fn view(&self) -> WidgetView {
        let body = match (&self.state, self.visual.as_ref()) {
            (WidgetState::ParseError(e), _) => WidgetBody::Error {
                message: e.to_string(),
            },
            (WidgetState::Ready, Some(visual)) => WidgetBody::Score {
                svg: to_svg(visual, &self.id),
            },
            _ => WidgetBody::Empty,
        };

        let controls = match (&self.state, &self.audio) {
            (WidgetState::Ready, AudioAvailability::Available) => Controls::Playback(self.playback()),
            (WidgetState::Ready, AudioAvailability::Unavailable(reason)) => Controls::Disabled(reason.clone()),
            _ => Controls::Hidden,
        };

        let volume = (self.options.show_volume && matches!(controls, Controls::Playback(_))).then_some(self.volume);

        WidgetView {
            id: self.id.clone(),
            body,
            controls,
            volume,
        }
    }
}

impl Drop for NotationWidget {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AudioInitError;
    use crate::notation::ElementId;
    use crate::playback::{AudioScore, SilentBackend, SynthHandle, UnavailableBackend};
    use std::cell::Cell;
    use std::rc::Rc;

    /// Backend that counts prepared and released handles
    #[derive(Default)]
    struct CountingBackend {
        prepared: Rc<Cell<usize>>,
        released: Rc<Cell<usize>>,
    }

    struct CountingHandle {
        released: Rc<Cell<usize>>,
        done: bool,
        volume: f32,
    }

    impl SynthHandle for CountingHandle {
        fn play(&mut self, _seconds: f64) {}
        fn pause(&mut self) {}
        fn stop(&mut self) {}
        fn set_volume(&mut self, volume: f32) {
            self.volume = volume;
        }
        fn volume(&self) -> f32 {
            self.volume
        }
        fn release(&mut self) {
            if !self.done {
                self.done = true;
                self.released.set(self.released.get() + 1);
            }
        }
        fn is_released(&self) -> bool {
            self.done
        }
    }

    impl SynthBackend for CountingBackend {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn prepare(&self, _score: &AudioScore) -> Result<Box<dyn SynthHandle>, AudioInitError> {
            self.prepared.set(self.prepared.get() + 1);
            Ok(Box::new(CountingHandle {
                released: self.released.clone(),
                done: false,
                volume: 0.0,
            }))
        }
    }

    const SCALE: &str = "X:1\nK:C\nC D E F";

    #[test]
    fn test_new_widget_is_uninitialized() {
        let widget = NotationWidget::new("w1", RenderOptions::full());
        assert_eq!(widget.state(), &WidgetState::Uninitialized);
        assert_eq!(widget.view().body, WidgetBody::Empty);
        assert_eq!(widget.view().controls, Controls::Hidden);
    }

    #[test]
    fn test_ready_after_source() {
        let mut widget = NotationWidget::new("w1", RenderOptions::full());
        assert!(widget.set_source(SCALE, &SilentBackend));
        assert_eq!(widget.state(), &WidgetState::Ready);

        let view = widget.view();
        match view.body {
            WidgetBody::Score { svg } => assert!(svg.contains("id=\"w1-e0\"")),
            other => panic!("expected a score, got {:?}", other),
        }
        assert_eq!(view.controls, Controls::Playback(PlaybackStatus::Stopped));
        assert_eq!(view.volume, Some(0.5));
    }

    #[test]
    fn test_parse_error_is_visible() {
        let mut widget = NotationWidget::new("w1", RenderOptions::full());
        widget.set_source("X:1\nK:C\nC [D E", &SilentBackend);
        assert!(matches!(widget.state(), WidgetState::ParseError(_)));
        match widget.view().body {
            WidgetBody::Error { message } => assert!(message.contains("line 3")),
            other => panic!("expected an error, got {:?}", other),
        }
        assert!(!widget.can_play());
    }

    #[test]
    fn test_same_source_is_a_noop() {
        let backend = CountingBackend::default();
        let mut widget = NotationWidget::new("w1", RenderOptions::full());
        assert!(widget.set_source(SCALE, &backend));
        assert!(!widget.set_source(SCALE, &backend));
        assert_eq!(backend.prepared.get(), 1);
        assert_eq!(backend.released.get(), 0);
    }

    #[test]
    fn test_source_change_releases_previous_transport() {
        let backend = CountingBackend::default();
        let mut widget = NotationWidget::new("w1", RenderOptions::full());
        widget.set_source(SCALE, &backend);
        widget.toggle_play();
        widget.tick(Duration::from_millis(300));

        widget.set_source("X:1\nK:C\nG A B c", &backend);
        assert_eq!(backend.prepared.get(), 2);
        assert_eq!(backend.released.get(), 1);
        assert_eq!(widget.playback(), PlaybackStatus::Stopped);
        assert!(widget.visual().is_some_and(|v| v.highlighted().is_empty()));
    }

    #[test]
    fn test_options_change_recompiles() {
        let backend = CountingBackend::default();
        let mut widget = NotationWidget::new("w1", RenderOptions::full());
        widget.set_source(SCALE, &backend);
        assert!(!widget.set_options(RenderOptions::full(), &backend));
        assert!(widget.set_options(RenderOptions::mini(), &backend));
        assert_eq!(backend.prepared.get(), 2);
        assert_eq!(widget.view().volume, None);
    }

    #[test]
    fn test_audio_failure_keeps_score_visible() {
        let mut widget = NotationWidget::new("w1", RenderOptions::full());
        widget.set_source(SCALE, &UnavailableBackend);
        assert_eq!(widget.state(), &WidgetState::Ready);
        assert!(matches!(widget.audio(), AudioAvailability::Unavailable(_)));

        let view = widget.view();
        assert!(matches!(view.body, WidgetBody::Score { .. }));
        assert!(matches!(view.controls, Controls::Disabled(_)));
        assert_eq!(view.volume, None);

        widget.toggle_play();
        assert_eq!(widget.playback(), PlaybackStatus::Stopped);
    }

    #[test]
    fn test_play_pause_resume_keeps_highlight() {
        let mut widget = NotationWidget::new("w1", RenderOptions::full());
        widget.set_source(SCALE, &SilentBackend);

        widget.toggle_play();
        assert_eq!(widget.tick(Duration::from_millis(300)), 2);
        widget.toggle_play();
        assert_eq!(widget.playback(), PlaybackStatus::Paused);
        assert!(widget.visual().is_some_and(|v| v.is_highlighted(ElementId(1))));

        // Paused ticks leave the markers alone
        assert_eq!(widget.tick(Duration::from_millis(300)), 0);
        assert!(widget.visual().is_some_and(|v| v.is_highlighted(ElementId(1))));

        widget.toggle_play();
        assert_eq!(widget.tick(Duration::from_millis(250)), 1);
        assert!(widget.visual().is_some_and(|v| v.is_highlighted(ElementId(2))));
    }

    #[test]
    fn test_volume_is_clamped_and_kept_across_recompile() {
        let mut widget = NotationWidget::new("w1", RenderOptions::full());
        widget.set_volume(2.0);
        assert_eq!(widget.volume(), 1.0);
        widget.set_source(SCALE, &SilentBackend);
        widget.set_volume(0.2);
        widget.set_source("X:1\nK:C\nG", &SilentBackend);
        assert_eq!(widget.volume(), 0.2);
        assert_eq!(widget.view().volume, Some(0.2));
    }

    #[test]
    fn test_drop_releases_transport() {
        let backend = CountingBackend::default();
        let mut widget = NotationWidget::new("w1", RenderOptions::full());
        widget.set_source(SCALE, &backend);
        widget.toggle_play();
        drop(widget);
        assert_eq!(backend.released.get(), 1);
    }

    #[test]
    fn test_parse_error_recovers_on_new_source() {
        let mut widget = NotationWidget::new("w1", RenderOptions::mini());
        widget.set_source("", &SilentBackend);
        assert_eq!(widget.state(), &WidgetState::ParseError(NotationParseError::Empty));
        widget.set_source(SCALE, &SilentBackend);
        assert_eq!(widget.state(), &WidgetState::Ready);
    }
}
