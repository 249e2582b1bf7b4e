//! Assistant panel
//!
//! Message list, input box and loading state for one chapter's conversation.
//! A turn goes through:
//!
//! 1. [`AssistantPanel::begin_turn`] - user message and an empty assistant
//!    placeholder are appended; the returned [`TurnTicket`] carries the request
//! 2. [`AssistantPanel::apply_fragment`] - each fragment is appended once to the
//!    placeholder, addressed by its id
//! 3. [`AssistantPanel::finish_turn`] or [`AssistantPanel::fail_turn`]
//!
//! Changing chapter clears the conversation and bumps the epoch, which kills
//! every outstanding ticket: late fragments for it are dropped. The running
//! [`run_turn`] is aborted at the same time, so its stream is released without
//! waiting for another fragment.

use super::{history_window, AssistantService, Message, Role, Sampling, TurnRequest, HISTORY_WINDOW};
use crate::curriculum::Chapter;
use crate::error::StreamTransportError;
use futures::future::{AbortHandle, Abortable};
use futures::StreamExt;
use std::cell::RefCell;
use tracing::{debug, warn};
use uuid::Uuid;

/// Shown in place of (or after) an answer whose stream failed
pub const APOLOGY: &str = "I'm sorry, I'm having trouble connecting right now. Please try again later.";

const BASE_DIRECTIVE: &str = "You are a friendly and expert music theory tutor.
Explain concepts clearly and simply, like you're talking to a beginner.
Keep your answers concise and encouraging.

IMPORTANT: The student CANNOT read ABC notation.
Whenever you provide a musical example (scales, chords, melodies), you MUST wrap the ABC notation in a code block tagged with 'abc'.
Format:
```abc
X:1
K:C
C D E F
```
The application will automatically render this as a visual staff for the student. Do not just write the notes as text; always provide the rendered notation block for clarity.";

/// System directive for a chapter: the tutor instructions plus the chapter as JSON.
pub fn build_system_directive(chapter: &Chapter) -> String {
    let content = serde_json::to_string(&chapter.content).unwrap_or_else(|_| "[]".to_string());
    format!(
        "{}\n\nCONTEXT: The user is currently reading Chapter \"{}\".\nHere is the content of the chapter in JSON format:\n{}",
        BASE_DIRECTIVE, chapter.title, content
    )
}

/// Handle for one in-flight turn
#[derive(Debug, Clone, PartialEq)]
pub struct TurnTicket {
    epoch: u64,
    /// Id of the assistant placeholder receiving the answer
    pub message_id: Uuid,
    pub request: TurnRequest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed,
    Failed,
    /// The ticket died (chapter changed) before the turn ended
    Cancelled,
    /// Nothing to send, or a turn was already running
    Ignored,
}

#[derive(Debug)]
struct PendingTurn {
    message_id: Uuid,
    received: bool,
    abort: Option<AbortHandle>,
}

#[derive(Debug)]
pub struct AssistantPanel {
    chapter_title: String,
    system_directive: String,
    messages: Vec<Message>,
    input: String,
    open: bool,
    pending: Option<PendingTurn>,
    epoch: u64,
    sampling: Sampling,
}

impl AssistantPanel {
    pub fn new(chapter: &Chapter) -> Self {
        Self::with_sampling(chapter, Sampling::default())
    }

    pub fn with_sampling(chapter: &Chapter, sampling: Sampling) -> Self {
        Self {
            chapter_title: chapter.title.clone(),
            system_directive: build_system_directive(chapter),
            messages: Vec::new(),
            input: String::new(),
            open: false,
            pending: None,
            epoch: 0,
            sampling,
        }
    }

    pub fn chapter_title(&self) -> &str {
        &self.chapter_title
    }

    pub fn system_directive(&self) -> &str {
        &self.system_directive
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Messages to draw: everything except an assistant placeholder still waiting
    /// for its first fragment.
    pub fn visible_messages(&self) -> impl Iterator<Item = &Message> {
        let waiting = self
            .pending
            .as_ref()
            .filter(|p| !p.received)
            .map(|p| p.message_id);
        self.messages.iter().filter(move |m| Some(m.id) != waiting)
    }

    pub fn message(&self, id: Uuid) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// Welcome line shown while the conversation is empty
    pub fn greeting(&self) -> String {
        format!(
            "Hi! I'm your music theory tutor. Ask me anything about {} or music theory in general!",
            self.chapter_title
        )
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn set_input(&mut self, input: impl Into<String>) {
        self.input = input.into();
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn toggle_open(&mut self) {
        self.open = !self.open;
    }

    pub fn is_loading(&self) -> bool {
        self.pending.is_some()
    }

    /// True while a turn is outstanding and no fragment has arrived yet.
    pub fn typing_indicator(&self) -> bool {
        self.pending.as_ref().is_some_and(|p| !p.received)
    }

    /// Start a turn from the current input.
    ///
    /// Returns `None` for blank input or while another turn is running.
    pub fn begin_turn(&mut self) -> Option<TurnTicket> {
        let prompt = self.input.trim().to_string();
        if prompt.is_empty() || self.pending.is_some() {
            return None;
        }

        let history = history_window(&self.messages, HISTORY_WINDOW);
        self.messages.push(Message::user(prompt.clone()));
        self.input.clear();

        let placeholder = Message::assistant(String::new());
        let message_id = placeholder.id;
        self.messages.push(placeholder);
        self.pending = Some(PendingTurn {
            message_id,
            received: false,
            abort: None,
        });

        debug!(history = history.len(), %message_id, "Began assistant turn");
        Some(TurnTicket {
            epoch: self.epoch,
            message_id,
            request: TurnRequest {
                prompt,
                history,
                system_directive: self.system_directive.clone(),
                sampling: self.sampling,
            },
        })
    }

    /// Whether updates for `ticket` may still touch the conversation.
    pub fn is_live(&self, ticket: &TurnTicket) -> bool {
        ticket.epoch == self.epoch
            && self
                .pending
                .as_ref()
                .is_some_and(|p| p.message_id == ticket.message_id)
    }

    /// Register the handle that stops the task driving `ticket`.
    ///
    /// A dead ticket is aborted right away.
    pub fn attach_abort(&mut self, ticket: &TurnTicket, handle: AbortHandle) {
        if !self.is_live(ticket) {
            handle.abort();
            return;
        }
        if let Some(pending) = self.pending.as_mut() {
            pending.abort = Some(handle);
        }
    }

    /// Append a fragment to the ticket's message. Returns false if the ticket is dead.
    pub fn apply_fragment(&mut self, ticket: &TurnTicket, fragment: &str) -> bool {
        if !self.is_live(ticket) {
            return false;
        }
        let Some(message) = self.messages.iter_mut().find(|m| m.id == ticket.message_id) else {
            return false;
        };
        message.text.push_str(fragment);
        if let Some(pending) = self.pending.as_mut() {
            pending.received = true;
        }
        true
    }

    /// Seal the answer. An answer that never received text is removed.
    pub fn finish_turn(&mut self, ticket: &TurnTicket) -> bool {
        if !self.is_live(ticket) {
            return false;
        }
        self.pending = None;
        self.messages
            .retain(|m| m.id != ticket.message_id || !m.text.is_empty());
        debug!(message_id = %ticket.message_id, "Finished assistant turn");
        true
    }

    /// Record a failed stream: the apology replaces an empty placeholder, or
    /// follows the partial answer as its own message.
    pub fn fail_turn(&mut self, ticket: &TurnTicket, error: &StreamTransportError) -> bool {
        if !self.is_live(ticket) {
            return false;
        }
        warn!(error = %error, message_id = %ticket.message_id, "Assistant turn failed");
        self.pending = None;

        match self.messages.iter_mut().find(|m| m.id == ticket.message_id) {
            Some(message) if message.text.is_empty() => message.text = APOLOGY.to_string(),
            _ => self.messages.push(Message::assistant(APOLOGY)),
        }
        true
    }

    /// Switch to another chapter: the conversation is discarded and any
    /// in-flight turn is abandoned.
    pub fn select_chapter(&mut self, chapter: &Chapter) {
        self.epoch += 1;
        if let Some(abort) = self.pending.take().and_then(|p| p.abort) {
            abort.abort();
        }
        self.messages.clear();
        self.chapter_title = chapter.title.clone();
        self.system_directive = build_system_directive(chapter);
        debug!(chapter = %chapter.id, epoch = self.epoch, "Assistant conversation reset");
    }

    /// Number of messages from the assistant so far.
    pub fn answer_count(&self) -> usize {
        self.messages.iter().filter(|m| m.role == Role::Assistant).count()
    }
}

/// Run one turn from the panel's current input to the end of the stream.
///
/// The panel is borrowed only between awaits. When the ticket dies mid-stream
/// the turn is aborted and the stream dropped, which closes the connection.
pub async fn run_turn(panel: &RefCell<AssistantPanel>, service: &dyn AssistantService) -> TurnOutcome {
    let Some(ticket) = panel.borrow_mut().begin_turn() else {
        return TurnOutcome::Ignored;
    };

    let (abort, registration) = AbortHandle::new_pair();
    panel.borrow_mut().attach_abort(&ticket, abort);

    match Abortable::new(stream_turn(panel, service, &ticket), registration).await {
        Ok(outcome) => outcome,
        Err(_) => {
            debug!(message_id = %ticket.message_id, "Released stream for an abandoned turn");
            TurnOutcome::Cancelled
        }
    }
}

async fn stream_turn(panel: &RefCell<AssistantPanel>, service: &dyn AssistantService, ticket: &TurnTicket) -> TurnOutcome {
    let mut stream = match service.send_turn(ticket.request.clone()).await {
        Ok(stream) => stream,
        Err(e) => return failed(panel, ticket, &e),
    };

    while let Some(item) = stream.next().await {
        match item {
            Ok(fragment) => {
                if !panel.borrow_mut().apply_fragment(ticket, &fragment) {
                    debug!(message_id = %ticket.message_id, "Dropping stream for a stale turn");
                    return TurnOutcome::Cancelled;
                }
            }
            Err(e) => return failed(panel, ticket, &e),
        }
    }

    if panel.borrow_mut().finish_turn(ticket) {
        TurnOutcome::Completed
    } else {
        TurnOutcome::Cancelled
    }
}

fn failed(panel: &RefCell<AssistantPanel>, ticket: &TurnTicket, error: &StreamTransportError) -> TurnOutcome {
    if panel.borrow_mut().fail_turn(ticket, error) {
        TurnOutcome::Failed
    } else {
        TurnOutcome::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curriculum::{ContentItem, Curriculum};

    fn chapter(id: &str, title: &str) -> Chapter {
        Chapter {
            id: id.to_string(),
            title: title.to_string(),
            content: vec![ContentItem::Paragraph {
                text: "Scales are ordered notes.".to_string(),
            }],
        }
    }

    fn ask(panel: &mut AssistantPanel, question: &str) -> TurnTicket {
        panel.set_input(question);
        panel.begin_turn().unwrap()
    }

    #[test]
    fn test_directive_mentions_chapter_and_content() {
        let directive = build_system_directive(&chapter("c1", "Scales"));
        assert!(directive.contains("```abc"));
        assert!(directive.contains("CONTEXT: The user is currently reading Chapter \"Scales\"."));
        assert!(directive.contains(r#"[{"type":"paragraph","text":"Scales are ordered notes."}]"#));
    }

    #[test]
    fn test_directive_for_builtin_chapter() {
        let book = Curriculum::builtin().unwrap();
        let directive = build_system_directive(book.chapter("part1-ch3").unwrap());
        assert!(directive.contains("\"abcString\":\"X:1\\nK:C\\nC D E F G A B c\""));
    }

    #[test]
    fn test_begin_turn_appends_user_and_placeholder() {
        let mut panel = AssistantPanel::new(&chapter("c1", "Scales"));
        let ticket = ask(&mut panel, "  What is a scale?  ");

        assert_eq!(panel.input(), "");
        assert_eq!(panel.messages().len(), 2);
        assert_eq!(panel.messages()[0].role, Role::User);
        assert_eq!(panel.messages()[0].text, "What is a scale?");
        assert_eq!(panel.messages()[1].id, ticket.message_id);
        assert!(panel.messages()[1].text.is_empty());
        assert_eq!(ticket.request.prompt, "What is a scale?");
        assert!(ticket.request.history.is_empty());
        assert!(panel.is_loading());
        assert!(panel.typing_indicator());
        assert_eq!(panel.visible_messages().count(), 1);
    }

    #[test]
    fn test_blank_input_or_running_turn_is_ignored() {
        let mut panel = AssistantPanel::new(&chapter("c1", "Scales"));
        panel.set_input("   ");
        assert!(panel.begin_turn().is_none());

        ask(&mut panel, "first");
        panel.set_input("second");
        assert!(panel.begin_turn().is_none());
        assert_eq!(panel.input(), "second");
    }

    #[test]
    fn test_fragments_accumulate_exactly() {
        let mut panel = AssistantPanel::new(&chapter("c1", "Scales"));
        let ticket = ask(&mut panel, "Explain");

        let mut previous = String::new();
        for fragment in ["A scale ", "is a ", "ladder."] {
            assert!(panel.apply_fragment(&ticket, fragment));
            let current = panel.message(ticket.message_id).unwrap().text.clone();
            assert!(current.starts_with(&previous));
            assert_eq!(current.len(), previous.len() + fragment.len());
            previous = current;
            assert!(!panel.typing_indicator());
        }
        assert!(panel.finish_turn(&ticket));
        assert_eq!(panel.messages()[1].text, "A scale is a ladder.");
        assert!(!panel.is_loading());
    }

    #[test]
    fn test_history_excludes_new_messages() {
        let mut panel = AssistantPanel::new(&chapter("c1", "Scales"));
        for i in 0..7 {
            let ticket = ask(&mut panel, &format!("q{}", i));
            panel.apply_fragment(&ticket, &format!("a{}", i));
            panel.finish_turn(&ticket);
        }
        let ticket = ask(&mut panel, "last");
        let history: Vec<&str> = ticket.request.history.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(history, vec!["q2", "a2", "q3", "a3", "q4", "a4", "q5", "a5", "q6", "a6"]);
        assert_eq!(ticket.request.prompt, "last");
    }

    #[test]
    fn test_failure_with_no_text_becomes_apology() {
        let mut panel = AssistantPanel::new(&chapter("c1", "Scales"));
        let ticket = ask(&mut panel, "hello");
        assert!(panel.fail_turn(&ticket, &StreamTransportError::MissingApiKey));
        assert_eq!(panel.messages().len(), 2);
        assert_eq!(panel.messages()[1].text, APOLOGY);
        assert!(!panel.is_loading());
    }

    #[test]
    fn test_failure_keeps_partial_answer() {
        let mut panel = AssistantPanel::new(&chapter("c1", "Scales"));
        let ticket = ask(&mut panel, "hello");
        panel.apply_fragment(&ticket, "Partial");
        panel.fail_turn(&ticket, &StreamTransportError::Interrupted("reset".to_string()));
        let texts: Vec<&str> = panel.messages().iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["hello", "Partial", APOLOGY]);
    }

    #[test]
    fn test_empty_answer_is_removed_on_finish() {
        let mut panel = AssistantPanel::new(&chapter("c1", "Scales"));
        let ticket = ask(&mut panel, "hello");
        panel.finish_turn(&ticket);
        assert_eq!(panel.messages().len(), 1);
    }

    #[test]
    fn test_select_chapter_resets_and_kills_tickets() {
        let mut panel = AssistantPanel::new(&chapter("c1", "Scales"));
        let ticket = ask(&mut panel, "hello");
        panel.apply_fragment(&ticket, "Hi");

        panel.select_chapter(&chapter("c2", "Intervals"));
        assert!(panel.messages().is_empty());
        assert!(!panel.is_loading());
        assert_eq!(panel.chapter_title(), "Intervals");
        assert!(panel.system_directive().contains("\"Intervals\""));

        assert!(!panel.apply_fragment(&ticket, " there"));
        assert!(!panel.finish_turn(&ticket));
        assert!(!panel.fail_turn(&ticket, &StreamTransportError::MissingApiKey));
        assert!(panel.messages().is_empty());
        assert!(panel.greeting().contains("Intervals"));
    }

    #[test]
    fn test_select_chapter_aborts_running_task() {
        use futures::FutureExt;

        let mut panel = AssistantPanel::new(&chapter("c1", "Scales"));
        let ticket = ask(&mut panel, "hello");
        let (handle, registration) = AbortHandle::new_pair();
        panel.attach_abort(&ticket, handle);
        let task = Abortable::new(futures::future::pending::<()>(), registration);

        panel.select_chapter(&chapter("c2", "Intervals"));
        assert!(matches!(task.now_or_never(), Some(Err(_))));

        // Registering against a dead ticket aborts at once
        let (late, registration) = AbortHandle::new_pair();
        panel.attach_abort(&ticket, late);
        let task = Abortable::new(futures::future::pending::<()>(), registration);
        assert!(matches!(task.now_or_never(), Some(Err(_))));
    }

    #[test]
    fn test_finished_turn_is_not_aborted_by_chapter_change() {
        use futures::FutureExt;

        let mut panel = AssistantPanel::new(&chapter("c1", "Scales"));
        let ticket = ask(&mut panel, "hello");
        let (handle, registration) = AbortHandle::new_pair();
        panel.attach_abort(&ticket, handle);
        panel.apply_fragment(&ticket, "Hi");
        assert!(panel.finish_turn(&ticket));

        panel.select_chapter(&chapter("c2", "Intervals"));
        let task = Abortable::new(futures::future::ready(()), registration);
        assert!(matches!(task.now_or_never(), Some(Ok(()))));
    }

    #[test]
    fn test_toggle_open() {
        let mut panel = AssistantPanel::new(&chapter("c1", "Scales"));
        assert!(!panel.is_open());
        panel.toggle_open();
        assert!(panel.is_open());
    }
}
