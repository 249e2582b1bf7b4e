//! # Assistant
//!
//! Conversational tutor for the chapter being read.
//!
//! ## Purpose
//! Sends the learner's question with a bounded window of earlier messages and a
//! chapter-aware system directive to a remote model, and streams the answer into
//! the transcript fragment by fragment.
//!
//! ## Sub-modules
//! - `client` - [`AssistantService`] implementation over the Gemini streaming API
//! - `panel` - [`AssistantPanel`]: messages, input, loading state, one turn at a time
//!
//! ## Seams
//! The panel only sees `Arc<dyn AssistantService>`, so tests and alternative
//! backends plug in without touching the orchestration.
//!
//! ## Related Modules
//! - `transcript` - splits assistant messages into text and notation blocks
//! - `reader` - owns the panel and resets it on chapter change

mod client;
mod panel;

pub use client::GeminiClient;
pub use panel::{build_system_directive, run_turn, AssistantPanel, TurnOutcome, TurnTicket, APOLOGY};

use crate::error::StreamTransportError;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Number of earlier messages sent with each question. Fixed, not read from config.
pub const HISTORY_WINDOW: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Stable id; streaming updates address the message by it
    pub id: Uuid,
    pub role: Role,
    pub text: String,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: Role::Assistant,
            text: text.into(),
        }
    }
}

/// Sampling parameters sent with every turn
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sampling {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
}

impl Default for Sampling {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.95,
            top_k: 40,
        }
    }
}

/// Everything the remote assistant receives for one question
#[derive(Debug, Clone, PartialEq)]
pub struct TurnRequest {
    pub prompt: String,
    /// Earlier messages, oldest first, at most [`HISTORY_WINDOW`] of them
    pub history: Vec<Message>,
    pub system_directive: String,
    pub sampling: Sampling,
}

/// The last `window` messages in their original order.
pub fn history_window(messages: &[Message], window: usize) -> Vec<Message> {
    messages[messages.len().saturating_sub(window)..].to_vec()
}

/// Ordered answer fragments; ends after the last fragment or one error.
pub type FragmentStream = BoxStream<'static, Result<String, StreamTransportError>>;

/// Remote assistant that answers one turn as a stream of text fragments.
///
/// Dropping the returned stream releases the underlying connection.
#[async_trait::async_trait]
pub trait AssistantService: Send + Sync {
    async fn send_turn(&self, request: TurnRequest) -> Result<FragmentStream, StreamTransportError>;
}
