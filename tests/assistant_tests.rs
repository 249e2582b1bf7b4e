//! Integration tests for the assistant pipeline
//!
//! The remote model is replaced by in-memory services: scripted fragment lists
//! and channel-fed streams the test pushes into while a turn is running.

use futures::StreamExt;
use std::cell::RefCell;
use std::sync::{Arc, Mutex};
use theory_reader::assistant::{
    run_turn, AssistantPanel, AssistantService, FragmentStream, Message, Role, TurnOutcome, TurnRequest, APOLOGY,
};
use theory_reader::illustration::{ImageService, IllustrationState};
use theory_reader::playback::SilentBackend;
use theory_reader::reader::{load_illustrations, PageBlock, Reader};
use theory_reader::transcript::TranscriptBlock;
use theory_reader::widget::{WidgetBody, WidgetState};
use theory_reader::{Chapter, Config, Curriculum, ImageGenerationError, StreamTransportError};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

type Item = Result<String, StreamTransportError>;

/// Replays a fixed list of stream items and records every request
#[derive(Default)]
struct ScriptedService {
    script: Vec<Item>,
    connect_error: Option<StreamTransportError>,
    requests: Mutex<Vec<TurnRequest>>,
}

impl ScriptedService {
    fn new(script: Vec<Item>) -> Self {
        Self {
            script,
            ..Self::default()
        }
    }

    fn requests(&self) -> Vec<TurnRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl AssistantService for ScriptedService {
    async fn send_turn(&self, request: TurnRequest) -> Result<FragmentStream, StreamTransportError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
        if let Some(error) = self.connect_error.clone() {
            return Err(error);
        }
        Ok(futures::stream::iter(self.script.clone()).boxed())
    }
}

/// Streams whatever the test sends into the channel
struct ChannelService {
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Item>>>,
}

impl ChannelService {
    fn new() -> (Self, mpsc::UnboundedSender<Item>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                receiver: Mutex::new(Some(rx)),
            },
            tx,
        )
    }
}

#[async_trait::async_trait]
impl AssistantService for ChannelService {
    async fn send_turn(&self, _request: TurnRequest) -> Result<FragmentStream, StreamTransportError> {
        let receiver = self
            .receiver
            .lock()
            .ok()
            .and_then(|mut r| r.take())
            .ok_or_else(|| StreamTransportError::Connect("already used".to_string()))?;
        Ok(UnboundedReceiverStream::new(receiver).boxed())
    }
}

fn book() -> Curriculum {
    Curriculum::builtin().unwrap()
}

fn chapter(id: &str) -> Chapter {
    book().chapter(id).cloned().unwrap()
}

/// Let the other branch of a `join!` run until it waits again.
async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn test_turn_streams_into_one_message() {
    let panel = RefCell::new(AssistantPanel::new(&chapter("part1-ch3")));
    let service = ScriptedService::new(vec![Ok("The major ".to_string()), Ok("scale.".to_string())]);

    panel.borrow_mut().set_input("What is the major scale?");
    assert_eq!(run_turn(&panel, &service).await, TurnOutcome::Completed);

    let panel = panel.borrow();
    let texts: Vec<(Role, &str)> = panel.messages().iter().map(|m| (m.role, m.text.as_str())).collect();
    assert_eq!(
        texts,
        vec![(Role::User, "What is the major scale?"), (Role::Assistant, "The major scale.")]
    );
    assert!(!panel.is_loading());

    let requests = service.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].prompt, "What is the major scale?");
    assert!(requests[0].system_directive.contains("Chapter \"Scales\""));
}

#[tokio::test]
async fn test_history_window_over_long_conversation() {
    let panel = RefCell::new(AssistantPanel::new(&chapter("part1-ch1")));
    let service = ScriptedService::new(vec![Ok("ok".to_string())]);

    for i in 0..8 {
        panel.borrow_mut().set_input(format!("question {}", i));
        run_turn(&panel, &service).await;
    }

    let requests = service.requests();
    let last = &requests[7];
    assert_eq!(last.history.len(), 10);
    let expected: Vec<Message> = panel.borrow().messages()[4..14].to_vec();
    assert_eq!(last.history, expected);
    assert_eq!(last.history[0].text, "question 2");
    assert_eq!(last.history[9].text, "ok");
    // Earlier turns stay in the local transcript
    assert_eq!(panel.borrow().messages().len(), 16);
}

#[tokio::test]
async fn test_connection_failure_shows_apology() {
    let panel = RefCell::new(AssistantPanel::new(&chapter("part1-ch1")));
    let service = ScriptedService {
        connect_error: Some(StreamTransportError::MissingApiKey),
        ..ScriptedService::default()
    };

    panel.borrow_mut().set_input("hello?");
    assert_eq!(run_turn(&panel, &service).await, TurnOutcome::Failed);
    let panel = panel.borrow();
    assert_eq!(panel.messages().len(), 2);
    assert_eq!(panel.messages()[1].text, APOLOGY);
    assert!(!panel.typing_indicator());
}

#[tokio::test]
async fn test_interruption_keeps_partial_text() {
    let panel = RefCell::new(AssistantPanel::new(&chapter("part1-ch1")));
    let service = ScriptedService::new(vec![
        Ok("A clef ".to_string()),
        Err(StreamTransportError::Interrupted("connection reset".to_string())),
        Ok("never seen".to_string()),
    ]);

    panel.borrow_mut().set_input("What is a clef?");
    assert_eq!(run_turn(&panel, &service).await, TurnOutcome::Failed);
    let texts: Vec<String> = panel.borrow().messages().iter().map(|m| m.text.clone()).collect();
    assert_eq!(texts, vec!["What is a clef?", "A clef ", APOLOGY]);
}

#[tokio::test]
async fn test_blank_input_sends_nothing() {
    let panel = RefCell::new(AssistantPanel::new(&chapter("part1-ch1")));
    let service = ScriptedService::new(vec![Ok("hi".to_string())]);
    panel.borrow_mut().set_input("   ");
    assert_eq!(run_turn(&panel, &service).await, TurnOutcome::Ignored);
    assert!(service.requests().is_empty());
}

#[tokio::test]
async fn test_growth_is_monotonic_and_indicator_clears() {
    let panel = RefCell::new(AssistantPanel::new(&chapter("part1-ch1")));
    let (service, tx) = ChannelService::new();
    panel.borrow_mut().set_input("Tell me about pitch");

    let fragments = ["Pitch ", "is how ", "high or low ", "a note sounds."];
    let turn = run_turn(&panel, &service);
    let driver = async {
        settle().await;
        assert!(panel.borrow().typing_indicator());

        let mut previous = String::new();
        for fragment in fragments {
            tx.send(Ok(fragment.to_string())).ok();
            settle().await;
            let current = panel.borrow().messages()[1].text.clone();
            assert_eq!(current, format!("{}{}", previous, fragment));
            assert!(!panel.borrow().typing_indicator());
            previous = current;
        }
        drop(tx);
    };

    let (outcome, ()) = tokio::join!(turn, driver);
    assert_eq!(outcome, TurnOutcome::Completed);
    assert_eq!(panel.borrow().messages()[1].text, fragments.concat());
}

#[tokio::test]
async fn test_chapter_switch_releases_stream_at_once() {
    let panel = RefCell::new(AssistantPanel::new(&chapter("part1-ch1")));
    let (service, tx) = ChannelService::new();
    panel.borrow_mut().set_input("What is a staff?");

    let turn = run_turn(&panel, &service);
    let driver = async {
        tx.send(Ok("A staff has ".to_string())).ok();
        settle().await;
        assert_eq!(panel.borrow().messages().len(), 2);
        assert!(!tx.is_closed());

        // The remote goes quiet; switching chapter alone must close the stream
        panel.borrow_mut().select_chapter(&chapter("part1-ch2"));
        assert!(panel.borrow().messages().is_empty());
        settle().await;
        assert!(tx.is_closed());
        tx
    };

    let (outcome, tx) = tokio::join!(turn, driver);
    assert_eq!(outcome, TurnOutcome::Cancelled);
    assert!(panel.borrow().messages().is_empty());
    assert!(!panel.borrow().is_loading());
    assert!(tx.send(Ok("late".to_string())).is_err());
}

#[tokio::test]
async fn test_streamed_notation_becomes_a_widget_once_closed() {
    let curriculum = Arc::new(book());
    let mut reader = Reader::new(curriculum, &Config::default(), Box::new(SilentBackend)).unwrap();
    let panel = reader.panel();
    let (service, tx) = ChannelService::new();
    panel.borrow_mut().set_input("Show me three notes");

    let notation_blocks = |blocks: &[TranscriptBlock]| {
        blocks
            .iter()
            .filter(|b| matches!(b, TranscriptBlock::Notation(_)))
            .count()
    };

    let turn = run_turn(&panel, &service);
    let driver = async {
        tx.send(Ok("```abc\nX:1\n".to_string())).ok();
        settle().await;
        let entries = reader.render_transcript();
        assert_eq!(notation_blocks(&entries[1].blocks), 0);

        tx.send(Ok("K:C\nC D E".to_string())).ok();
        settle().await;
        let entries = reader.render_transcript();
        assert_eq!(notation_blocks(&entries[1].blocks), 0);
        assert_eq!(reader.transcript().widget_count(), 0);

        tx.send(Ok("\n```\nGreat job!".to_string())).ok();
        settle().await;
        let entries = reader.render_transcript();
        assert_eq!(entries[1].blocks.len(), 2);
        match &entries[1].blocks[0] {
            TranscriptBlock::Notation(view) => assert!(matches!(view.body, WidgetBody::Score { .. })),
            other => panic!("expected notation, got {:?}", other),
        }
        assert_eq!(entries[1].blocks[1], TranscriptBlock::Text("Great job!".to_string()));
        drop(tx);
        reader
    };

    let (outcome, reader) = tokio::join!(turn, driver);
    assert_eq!(outcome, TurnOutcome::Completed);

    let message_id = panel.borrow().messages()[1].id;
    let widget = reader.transcript().widget(message_id, 0).unwrap();
    assert_eq!(widget.state(), &WidgetState::Ready);
    assert_eq!(widget.source(), Some("X:1\nK:C\nC D E"));
}

#[tokio::test]
async fn test_reader_chapter_switch_empties_conversation() {
    let curriculum = Arc::new(book());
    let mut reader = Reader::new(curriculum, &Config::default(), Box::new(SilentBackend)).unwrap();
    let panel = reader.panel();
    let service = ScriptedService::new(vec![Ok("Sure.".to_string())]);

    panel.borrow_mut().set_input("Help");
    run_turn(&panel, &service).await;
    assert_eq!(panel.borrow().messages().len(), 2);

    reader.select_chapter("part2-ch6").unwrap();
    assert!(panel.borrow().messages().is_empty());
    assert!(service.requests()[0].system_directive.contains("Pitches and Clefs"));

    panel.borrow_mut().set_input("Help again");
    run_turn(&panel, &service).await;
    let requests = service.requests();
    assert!(requests[1].history.is_empty());
    assert!(requests[1].system_directive.contains("Time Signatures"));
}

/// Succeeds for prompts mentioning a clef
struct FakeImages;

#[async_trait::async_trait]
impl ImageService for FakeImages {
    async fn generate(&self, prompt: &str) -> Result<String, ImageGenerationError> {
        if prompt.contains("clef") {
            Ok("data:image/png;base64,AAAA".to_string())
        } else {
            Err(ImageGenerationError::NoImage)
        }
    }
}

#[tokio::test]
async fn test_illustrations_load_for_current_page() {
    let curriculum = Arc::new(book());
    let reader = RefCell::new(Reader::new(curriculum, &Config::default(), Box::new(SilentBackend)).unwrap());

    assert_eq!(load_illustrations(&reader, &FakeImages).await, 1);
    let states: Vec<IllustrationState> = reader
        .borrow()
        .blocks()
        .iter()
        .filter_map(|b| match b {
            PageBlock::Image(illustration) => Some(illustration.state.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        vec![IllustrationState::Ready {
            data_uri: "data:image/png;base64,AAAA".to_string()
        }]
    );

    reader.borrow_mut().select_chapter("part6-ch20").unwrap();
    assert_eq!(load_illustrations(&reader, &FakeImages).await, 1);
    let failed = reader.borrow().blocks().iter().any(|b| {
        matches!(b, PageBlock::Image(illustration) if illustration.state == IllustrationState::Failed)
    });
    assert!(failed);
}
