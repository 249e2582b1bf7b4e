//! # Mixed-Content Transcript
//!
//! Splits a (possibly still growing) assistant message into plain text, fenced
//! code and notation segments, and keeps a notation widget alive for every
//! notation segment across re-renders.
//!
//! ## Segmentation rules
//! - A fence runs from "```" to the next "```"
//! - The info string is the rest of the opening line; `abc` (any case) makes the
//!   block a notation segment, anything else a code segment
//! - A fence with no closing marker yet stays inside a plain text segment
//! - Segment spans tile the input: every byte belongs to exactly one span
//!
//! ## Example
//! ```rust
//! use theory_reader::transcript::{segment, SegmentKind};
//!
//! let text = "Try this:\n```abc\nX:1\nK:C\nC D E\n```\nGreat job!";
//! let segments = segment(text);
//! assert_eq!(segments.len(), 3);
//! assert_eq!(segments[1].kind, SegmentKind::Notation("X:1\nK:C\nC D E".to_string()));
//! assert_eq!(segments[2].kind, SegmentKind::Text("Great job!".to_string()));
//! ```

use crate::notation::RenderOptions;
use crate::playback::SynthBackend;
use crate::widget::{NotationWidget, WidgetView};
use std::collections::BTreeMap;
use std::ops::Range;
use std::time::Duration;
use uuid::Uuid;

const FENCE: &str = "```";

#[derive(Debug, Clone, PartialEq)]
pub enum SegmentKind {
    /// Plain text, trimmed
    Text(String),
    Code {
        language: Option<String>,
        code: String,
    },
    /// Score source with the fence stripped and trimmed
    Notation(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    /// Byte range of the segment in the message text, fences included
    pub span: Range<usize>,
    pub kind: SegmentKind,
}

impl Segment {
    /// Text segment with nothing but whitespace
    pub fn is_blank(&self) -> bool {
        matches!(&self.kind, SegmentKind::Text(text) if text.is_empty())
    }
}

/// Split `text` into segments in document order.
pub fn segment(text: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut text_start = 0;
    let mut cursor = 0;

    while let Some(found) = text[cursor..].find(FENCE) {
        let open = cursor + found;
        let Some(found_close) = text[open + FENCE.len()..].find(FENCE) else {
            break;
        };
        let close = open + FENCE.len() + found_close;
        let end = close + FENCE.len();

        push_text(&mut segments, text, text_start..open);
        segments.push(Segment {
            span: open..end,
            kind: fenced(&text[open + FENCE.len()..close]),
        });

        text_start = end;
        cursor = end;
    }

    push_text(&mut segments, text, text_start..text.len());
    segments
}

fn push_text(segments: &mut Vec<Segment>, text: &str, span: Range<usize>) {
    if span.is_empty() {
        return;
    }
    let kind = SegmentKind::Text(text[span.clone()].trim().to_string());
    segments.push(Segment { span, kind });
}

/// Classify the inside of a closed fence.
fn fenced(inner: &str) -> SegmentKind {
    let (info, body) = match inner.find('\n') {
        Some(n) => (inner[..n].trim(), &inner[n + 1..]),
        None => ("", inner),
    };

    if info.eq_ignore_ascii_case("abc") {
        return SegmentKind::Notation(body.trim().to_string());
    }

    SegmentKind::Code {
        language: (!info.is_empty()).then(|| info.to_string()),
        code: body.strip_suffix('\n').unwrap_or(body).to_string(),
    }
}

/// One rendered piece of a message
#[derive(Debug, Clone, PartialEq)]
pub enum TranscriptBlock {
    Text(String),
    Code {
        language: Option<String>,
        code: String,
    },
    Notation(WidgetView),
}

/// Notation widgets for the messages of one conversation.
///
/// Widgets are keyed by message id and the ordinal of the notation segment in
/// that message, so a block that is still streaming keeps its widget and only
/// sees a new source.
pub struct TranscriptView {
    options: RenderOptions,
    widgets: BTreeMap<(Uuid, usize), NotationWidget>,
}

impl TranscriptView {
    pub fn new() -> Self {
        Self::with_options(RenderOptions::mini())
    }

    pub fn with_options(options: RenderOptions) -> Self {
        Self {
            options,
            widgets: BTreeMap::new(),
        }
    }

    /// Segment `text` and sync the message's widgets with its notation segments.
    pub fn render(&mut self, message_id: Uuid, text: &str, backend: &dyn SynthBackend) -> Vec<TranscriptBlock> {
        let segments = segment(text);
        let mut ordinal = 0;
        let mut blocks = Vec::with_capacity(segments.len());

        for seg in segments {
            if seg.is_blank() {
                continue;
            }
            match seg.kind {
                SegmentKind::Text(text) => blocks.push(TranscriptBlock::Text(text)),
                SegmentKind::Code { language, code } => blocks.push(TranscriptBlock::Code { language, code }),
                SegmentKind::Notation(source) => {
                    let options = &self.options;
                    let widget = self.widgets.entry((message_id, ordinal)).or_insert_with(|| {
                        NotationWidget::new(format!("msg-{}-{}", message_id.simple(), ordinal), options.clone())
                    });
                    widget.set_source(&source, backend);
                    blocks.push(TranscriptBlock::Notation(widget.view()));
                    ordinal += 1;
                }
            }
        }

        // Drop widgets for notation blocks the message no longer has
        self.widgets
            .retain(|(id, n), _| *id != message_id || *n < ordinal);

        blocks
    }

    pub fn widget(&self, message_id: Uuid, ordinal: usize) -> Option<&NotationWidget> {
        self.widgets.get(&(message_id, ordinal))
    }

    pub fn widget_mut(&mut self, message_id: Uuid, ordinal: usize) -> Option<&mut NotationWidget> {
        self.widgets.get_mut(&(message_id, ordinal))
    }

    pub fn widget_count(&self) -> usize {
        self.widgets.len()
    }

    /// Advance every playing widget.
    pub fn tick(&mut self, elapsed: Duration) {
        for widget in self.widgets.values_mut() {
            widget.tick(elapsed);
        }
    }

    /// Keep only the widgets of messages still in the conversation.
    pub fn retain_messages(&mut self, ids: &[Uuid]) {
        self.widgets.retain(|(id, _), _| ids.contains(id));
    }

    /// Release every widget.
    pub fn clear(&mut self) {
        self.widgets.clear();
    }
}

impl Default for TranscriptView {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::{PlaybackStatus, SilentBackend};
    use crate::widget::WidgetState;

    fn rebuild(text: &str, segments: &[Segment]) -> String {
        segments.iter().map(|s| &text[s.span.clone()]).collect()
    }

    #[test]
    fn test_plain_text_only() {
        let segments = segment("Hello there");
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].kind, SegmentKind::Text("Hello there".to_string()));
        assert_eq!(segments[0].span, 0..11);
    }

    #[test]
    fn test_empty_text_has_no_segments() {
        assert!(segment("").is_empty());
    }

    #[test]
    fn test_notation_and_code_blocks() {
        let text = "A scale:\n```abc\nX:1\nK:C\nCDEF\n```\nIn code:\n```rust\nfn main() {}\n```";
        let segments = segment(text);
        assert_eq!(segments.len(), 4);
        assert_eq!(segments[0].kind, SegmentKind::Text("A scale:".to_string()));
        assert_eq!(segments[1].kind, SegmentKind::Notation("X:1\nK:C\nCDEF".to_string()));
        assert_eq!(segments[2].kind, SegmentKind::Text("In code:".to_string()));
        assert_eq!(
            segments[3].kind,
            SegmentKind::Code {
                language: Some("rust".to_string()),
                code: "fn main() {}".to_string(),
            }
        );
        assert_eq!(rebuild(text, &segments), text);
    }

    #[test]
    fn test_info_string_is_case_insensitive() {
        let segments = segment("```ABC\nX:1\nK:C\nC\n```");
        assert_eq!(segments[0].kind, SegmentKind::Notation("X:1\nK:C\nC".to_string()));
    }

    #[test]
    fn test_generic_fence_is_code() {
        let segments = segment("```\nplain block\n```");
        assert_eq!(
            segments[0].kind,
            SegmentKind::Code {
                language: None,
                code: "plain block".to_string(),
            }
        );
    }

    #[test]
    fn test_unterminated_fence_stays_text() {
        let text = "Look:\n```abc\nX:1\nK:C\nC D";
        let segments = segment(text);
        assert_eq!(segments.len(), 1);
        assert!(matches!(segments[0].kind, SegmentKind::Text(_)));
        assert_eq!(segments[0].span, 0..text.len());
    }

    #[test]
    fn test_second_block_unterminated() {
        let text = "```abc\nK:C\nC\n```\nthen ```abc\nK:C";
        let segments = segment(text);
        assert_eq!(segments.len(), 2);
        assert!(matches!(segments[0].kind, SegmentKind::Notation(_)));
        assert!(matches!(segments[1].kind, SegmentKind::Text(_)));
        assert_eq!(rebuild(text, &segments), text);
    }

    #[test]
    fn test_spans_tile_varied_inputs() {
        let inputs = [
            "",
            "```",
            "``````",
            "a```b```c",
            "```abc\n```",
            "\n\n```abc\nX:1\n```\n\n```\n```\n",
            "text ``` more ``` and ``` dangling",
            "unicode ♪ ```abc\nK:C\nC\n``` ♫",
        ];
        for text in inputs {
            let segments = segment(text);
            assert_eq!(rebuild(text, &segments), text, "input {:?}", text);
            for pair in segments.windows(2) {
                assert_eq!(pair[0].span.end, pair[1].span.start);
            }
        }
    }

    #[test]
    fn test_streamed_fragments_resolve_once_closed() {
        let fragments = ["```abc\nX:1\n", "K:C\nC D E", "\n```\nGreat job!"];
        let mut text = String::new();

        text.push_str(fragments[0]);
        assert!(segment(&text).iter().all(|s| matches!(s.kind, SegmentKind::Text(_))));
        text.push_str(fragments[1]);
        assert!(segment(&text).iter().all(|s| matches!(s.kind, SegmentKind::Text(_))));

        text.push_str(fragments[2]);
        let segments = segment(&text);
        assert_eq!(
            segments.iter().map(|s| s.kind.clone()).collect::<Vec<_>>(),
            vec![
                SegmentKind::Notation("X:1\nK:C\nC D E".to_string()),
                SegmentKind::Text("Great job!".to_string()),
            ]
        );
    }

    #[test]
    fn test_view_keeps_widget_while_block_grows() {
        let mut view = TranscriptView::new();
        let id = Uuid::new_v4();

        let blocks = view.render(id, "Here:\n```abc\nX:1\nK:C\nC D", &SilentBackend);
        assert_eq!(blocks.len(), 1);
        assert_eq!(view.widget_count(), 0);

        let blocks = view.render(id, "Here:\n```abc\nX:1\nK:C\nC D\n```", &SilentBackend);
        assert_eq!(blocks.len(), 2);
        assert!(matches!(blocks[1], TranscriptBlock::Notation(_)));
        assert_eq!(view.widget_count(), 1);

        if let Some(widget) = view.widget_mut(id, 0) {
            widget.toggle_play();
        }
        view.tick(Duration::from_millis(100));
        assert_eq!(view.widget(id, 0).map(|w| w.playback()), Some(PlaybackStatus::Playing));

        // Same payload after more text arrives: the widget keeps playing
        view.render(id, "Here:\n```abc\nX:1\nK:C\nC D\n```\nNice.", &SilentBackend);
        assert_eq!(view.widget(id, 0).map(|w| w.playback()), Some(PlaybackStatus::Playing));
    }

    #[test]
    fn test_view_uses_mini_widgets() {
        let mut view = TranscriptView::new();
        let id = Uuid::new_v4();
        let blocks = view.render(id, "```abc\nX:1\nK:C\nC\n```", &SilentBackend);
        match &blocks[0] {
            TranscriptBlock::Notation(widget) => assert_eq!(widget.volume, None),
            other => panic!("expected notation, got {:?}", other),
        }
        assert_eq!(view.widget(id, 0).map(|w| w.options().clone()), Some(RenderOptions::mini()));
    }

    #[test]
    fn test_bad_notation_shows_error_widget() {
        let mut view = TranscriptView::new();
        let id = Uuid::new_v4();
        view.render(id, "```abc\nX:1\nK:C\nC (D\n```", &SilentBackend);
        assert!(matches!(
            view.widget(id, 0).map(|w| w.state().clone()),
            Some(WidgetState::ParseError(_))
        ));
    }

    #[test]
    fn test_retain_and_clear() {
        let mut view = TranscriptView::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        view.render(a, "```abc\nK:C\nC\n```", &SilentBackend);
        view.render(b, "```abc\nK:C\nD\n```\n```abc\nK:C\nE\n```", &SilentBackend);
        assert_eq!(view.widget_count(), 3);
        view.retain_messages(&[b]);
        assert_eq!(view.widget_count(), 2);
        view.clear();
        assert_eq!(view.widget_count(), 0);
    }
}
