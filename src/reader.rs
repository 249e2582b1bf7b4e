//! # Reader
//!
//! The page being read: one selected chapter turned into blocks (headings, text,
//! callouts, playable notation widgets, illustrations), plus the assistant panel
//! and the widgets inside its transcript.
//!
//! Switching chapter tears all of that down at once. Widgets are dropped (which
//! releases their transports), the conversation is cleared, and the epoch moves
//! on so that illustration results still in flight for the old page are ignored.
//!
//! ## Related Modules
//! - `curriculum` - the book being read
//! - `widget` - one per notation item
//! - `assistant` - the panel and its turn driver
//! - `illustration` - image state and the image service

use crate::assistant::{AssistantPanel, Message, Role};
use crate::config::Config;
use crate::curriculum::{CalloutKind, Chapter, ContentItem, Curriculum, Part};
use crate::error::{ImageGenerationError, ReaderError};
use crate::illustration::{ImageService, Illustration, IllustrationState};
use crate::notation::RenderOptions;
use crate::playback::SynthBackend;
use crate::transcript::{TranscriptBlock, TranscriptView};
use crate::widget::NotationWidget;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub enum PageBlock {
    Heading { level: u8, text: String },
    Paragraph(String),
    List(Vec<String>),
    Callout { kind: CalloutKind, content: String },
    Notation { widget: NotationWidget, caption: Option<String> },
    Image(Illustration),
}

/// Pending illustration request for the page that issued it
#[derive(Debug, Clone, PartialEq)]
pub struct IllustrationTicket {
    epoch: u64,
    pub block: usize,
    pub prompt: String,
}

/// One message of the assistant transcript, split into blocks
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptEntry {
    pub role: Role,
    pub blocks: Vec<TranscriptBlock>,
}

pub struct Reader {
    curriculum: Arc<Curriculum>,
    chapter_id: String,
    blocks: Vec<PageBlock>,
    panel: Rc<RefCell<AssistantPanel>>,
    transcript: TranscriptView,
    backend: Box<dyn SynthBackend>,
    images_enabled: bool,
    epoch: u64,
}

impl Reader {
    /// Open the configured start chapter, or the first chapter of the book.
    pub fn new(curriculum: Arc<Curriculum>, config: &Config, backend: Box<dyn SynthBackend>) -> Result<Self, ReaderError> {
        let chapter = match config.start_chapter.as_deref() {
            Some(id) => curriculum
                .chapter(id)
                .ok_or_else(|| ReaderError::UnknownChapter(id.to_string()))?,
            None => curriculum.first_chapter().ok_or(ReaderError::EmptyCurriculum)?,
        };

        let panel = AssistantPanel::with_sampling(chapter, config.assistant.sampling());
        let chapter_id = chapter.id.clone();

        let mut reader = Self {
            curriculum: curriculum.clone(),
            chapter_id,
            blocks: Vec::new(),
            panel: Rc::new(RefCell::new(panel)),
            transcript: TranscriptView::new(),
            backend,
            images_enabled: config.images.enabled,
            epoch: 0,
        };
        reader.build_page();
        Ok(reader)
    }

    pub fn curriculum(&self) -> &Curriculum {
        &self.curriculum
    }

    pub fn chapter(&self) -> Option<&Chapter> {
        self.curriculum.chapter(&self.chapter_id)
    }

    pub fn chapter_id(&self) -> &str {
        &self.chapter_id
    }

    pub fn part(&self) -> Option<&Part> {
        self.curriculum.part_of(&self.chapter_id)
    }

    pub fn blocks(&self) -> &[PageBlock] {
        &self.blocks
    }

    /// The `n`th notation widget on the page.
    pub fn widget_mut(&mut self, n: usize) -> Option<&mut NotationWidget> {
        self.blocks
            .iter_mut()
            .filter_map(|block| match block {
                PageBlock::Notation { widget, .. } => Some(widget),
                _ => None,
            })
            .nth(n)
    }

    pub fn widgets(&self) -> impl Iterator<Item = &NotationWidget> {
        self.blocks.iter().filter_map(|block| match block {
            PageBlock::Notation { widget, .. } => Some(widget),
            _ => None,
        })
    }

    pub fn panel(&self) -> Rc<RefCell<AssistantPanel>> {
        self.panel.clone()
    }

    pub fn select_chapter(&mut self, id: &str) -> Result<(), ReaderError> {
        if id == self.chapter_id {
            return Ok(());
        }
        let chapter = self
            .curriculum
            .chapter(id)
            .ok_or_else(|| ReaderError::UnknownChapter(id.to_string()))?;

        self.epoch += 1;
        self.blocks.clear();
        self.transcript.clear();
        self.panel.borrow_mut().select_chapter(chapter);
        self.chapter_id = chapter.id.clone();
        info!(chapter = %self.chapter_id, "Opened chapter");

        self.build_page();
        Ok(())
    }

    /// Chapter after the current one in reading order.
    pub fn next_chapter_id(&self) -> Option<&str> {
        let mut chapters = self.curriculum.chapters().skip_while(|c| c.id != self.chapter_id);
        chapters.next();
        chapters.next().map(|c| c.id.as_str())
    }

    pub fn previous_chapter_id(&self) -> Option<&str> {
        self.curriculum
            .chapters()
            .take_while(|c| c.id != self.chapter_id)
            .last()
            .map(|c| c.id.as_str())
    }

    fn build_page(&mut self) {
        let Some(chapter) = self.curriculum.chapter(&self.chapter_id) else {
            return;
        };

        let mut notation_count = 0;
        let mut blocks = Vec::with_capacity(chapter.content.len());

        for item in &chapter.content {
            let block = match item {
                ContentItem::Heading1 { text } => PageBlock::Heading {
                    level: 1,
                    text: text.clone(),
                },
                ContentItem::Heading2 { text } => PageBlock::Heading {
                    level: 2,
                    text: text.clone(),
                },
                ContentItem::Paragraph { text } => PageBlock::Paragraph(text.clone()),
                ContentItem::List { items } => PageBlock::List(items.clone()),
                ContentItem::Callout { kind, content } => PageBlock::Callout {
                    kind: *kind,
                    content: content.clone(),
                },
                ContentItem::Notation { data, caption } => {
                    let id = format!("{}-n{}", chapter.id, notation_count);
                    notation_count += 1;
                    let mut widget = NotationWidget::new(id, RenderOptions::full());
                    widget.set_source(&data.abc_string, self.backend.as_ref());
                    PageBlock::Notation {
                        widget,
                        caption: caption.clone(),
                    }
                }
                ContentItem::Image { prompt, caption } => {
                    let mut illustration = Illustration::new(prompt.clone(), caption.clone());
                    if !self.images_enabled {
                        illustration.state = IllustrationState::Disabled;
                    }
                    PageBlock::Image(illustration)
                }
            };
            blocks.push(block);
        }

        debug!(chapter = %chapter.id, blocks = blocks.len(), widgets = notation_count, "Built page");
        self.blocks = blocks;
    }

    /// Illustrations on this page still waiting for their image.
    pub fn pending_illustrations(&self) -> Vec<IllustrationTicket> {
        self.blocks
            .iter()
            .enumerate()
            .filter_map(|(index, block)| match block {
                PageBlock::Image(illustration) if illustration.state == IllustrationState::Loading => {
                    Some(IllustrationTicket {
                        epoch: self.epoch,
                        block: index,
                        prompt: illustration.prompt.clone(),
                    })
                }
                _ => None,
            })
            .collect()
    }

    /// Store an image result. Results for a page that is no longer shown are dropped.
    pub fn resolve_illustration(
        &mut self,
        ticket: &IllustrationTicket,
        result: Result<String, ImageGenerationError>,
    ) -> bool {
        if ticket.epoch != self.epoch {
            debug!(block = ticket.block, "Ignoring illustration for a closed page");
            return false;
        }
        match self.blocks.get_mut(ticket.block) {
            Some(PageBlock::Image(illustration)) => {
                illustration.resolve(result);
                true
            }
            _ => false,
        }
    }

    /// Advance every playing widget, on the page and in the transcript.
    pub fn tick(&mut self, elapsed: Duration) {
        for block in &mut self.blocks {
            if let PageBlock::Notation { widget, .. } = block {
                widget.tick(elapsed);
            }
        }
        self.transcript.tick(elapsed);
    }

    /// Split the visible conversation into blocks, creating or updating the
    /// widgets of assistant notation blocks.
    pub fn render_transcript(&mut self) -> Vec<TranscriptEntry> {
        let messages: Vec<Message> = self.panel.borrow().visible_messages().cloned().collect();
        let ids: Vec<_> = messages.iter().map(|m| m.id).collect();
        self.transcript.retain_messages(&ids);

        messages
            .into_iter()
            .map(|message| {
                let blocks = match message.role {
                    Role::User => vec![TranscriptBlock::Text(message.text)],
                    Role::Assistant => self.transcript.render(message.id, &message.text, self.backend.as_ref()),
                };
                TranscriptEntry {
                    role: message.role,
                    blocks,
                }
            })
            .collect()
    }

    pub fn transcript(&self) -> &TranscriptView {
        &self.transcript
    }
}

/// Fetch every pending illustration of the current page concurrently.
///
/// Each result is applied only if the page is still the one that asked for it.
pub async fn load_illustrations(reader: &RefCell<Reader>, service: &dyn ImageService) -> usize {
    let tickets = reader.borrow().pending_illustrations();
    let requests = tickets.into_iter().map(|ticket| async move {
        let result = service.generate(&ticket.prompt).await;
        (ticket, result)
    });

    let mut applied = 0;
    for (ticket, result) in futures::future::join_all(requests).await {
        if reader.borrow_mut().resolve_illustration(&ticket, result) {
            applied += 1;
        }
    }
    applied
}
