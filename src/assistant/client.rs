//! Gemini streaming client
//!
//! Posts one turn to `models/{model}:streamGenerateContent?alt=sse` and turns the
//! server-sent events into a [`FragmentStream`]. Each SSE message carries a
//! `GenerateContentResponse`; the text parts of its first candidate form one
//! fragment.
//!
//! ```text
//! data: {"candidates":[{"content":{"parts":[{"text":"A major scale"}],"role":"model"}}]}
//! data: {"candidates":[{"content":{"parts":[{"text":" has seven notes."}],"role":"model"}}]}
//! ```

use super::{AssistantService, FragmentStream, Role, TurnRequest};
use crate::config::{get_env_or_value, AssistantConfig};
use crate::error::StreamTransportError;
use futures::StreamExt;
use reqwest::Client as HttpClient;
use reqwest_eventsource::{Event, EventSource};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GeminiClient {
    api_url: String,
    api_key: String,
    model: String,
    client: HttpClient,
}

impl GeminiClient {
    pub fn new(config: &AssistantConfig) -> Self {
        let client = HttpClient::builder()
            .connect_timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .unwrap_or_else(|_| HttpClient::new());

        Self {
            api_url: config.api_url.trim_end_matches('/').to_string(),
            api_key: get_env_or_value(&config.api_key),
            model: config.model.clone(),
            client,
        }
    }

    pub fn stream_url(&self) -> String {
        format!("{}/models/{}:streamGenerateContent?alt=sse", self.api_url, self.model)
    }
}

/// JSON body for one turn: system instruction, history then the new prompt.
pub(crate) fn request_body(request: &TurnRequest) -> serde_json::Value {
    let mut contents: Vec<serde_json::Value> = request
        .history
        .iter()
        .map(|message| {
            let role = match message.role {
                Role::User => "user",
                Role::Assistant => "model",
            };
            json!({ "role": role, "parts": [{ "text": message.text }] })
        })
        .collect();
    contents.push(json!({ "role": "user", "parts": [{ "text": request.prompt }] }));

    json!({
        "systemInstruction": { "parts": [{ "text": request.system_directive }] },
        "contents": contents,
        "generationConfig": {
            "temperature": request.sampling.temperature,
            "topP": request.sampling.top_p,
            "topK": request.sampling.top_k,
        }
    })
}

/// Text carried by one SSE payload, if any.
pub(crate) fn parse_chunk(data: &str) -> Option<String> {
    let chunk: StreamChunk = match serde_json::from_str(data) {
        Ok(chunk) => chunk,
        Err(e) => {
            debug!(error = %e, "Skipping unparseable stream chunk");
            return None;
        }
    };
    let text: String = chunk
        .candidates
        .first()
        .and_then(|c| c.content.as_ref())
        .map(|content| content.parts.iter().filter_map(|p| p.text.as_deref()).collect())
        .unwrap_or_default();
    (!text.is_empty()).then_some(text)
}

struct StreamState {
    source: EventSource,
    opened: bool,
    fragments: usize,
}

#[async_trait::async_trait]
impl AssistantService for GeminiClient {
    async fn send_turn(&self, request: TurnRequest) -> Result<FragmentStream, StreamTransportError> {
        if self.api_key.is_empty() {
            return Err(StreamTransportError::MissingApiKey);
        }

        let builder = self
            .client
            .post(self.stream_url())
            .header("x-goog-api-key", &self.api_key)
            .json(&request_body(&request));

        let source = EventSource::new(builder).map_err(|e| StreamTransportError::Connect(e.to_string()))?;
        debug!(model = %self.model, history = request.history.len(), "Opened assistant stream");

        let state = StreamState {
            source,
            opened: false,
            fragments: 0,
        };

        let stream = futures::stream::unfold(Some(state), |state| async move {
            let mut state = state?;
            loop {
                match state.source.next().await {
                    Some(Ok(Event::Open)) => state.opened = true,
                    Some(Ok(Event::Message(message))) => {
                        if let Some(text) = parse_chunk(&message.data) {
                            state.fragments += 1;
                            return Some((Ok(text), Some(state)));
                        }
                    }
                    Some(Err(reqwest_eventsource::Error::StreamEnded)) | None => {
                        state.source.close();
                        debug!(fragments = state.fragments, "Assistant stream finished");
                        return None;
                    }
                    Some(Err(e)) => {
                        state.source.close();
                        warn!(error = %e, fragments = state.fragments, "Assistant stream failed");
                        let error = if state.opened {
                            StreamTransportError::Interrupted(e.to_string())
                        } else {
                            StreamTransportError::Connect(e.to_string())
                        };
                        return Some((Err(error), None));
                    }
                }
            }
        });

        Ok(stream.boxed())
    }
}
