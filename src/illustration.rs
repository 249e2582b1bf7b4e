//! # Illustrations
//!
//! Generated images for `image` content items. Each item asks an
//! [`ImageService`] for one picture from its prompt and shows a placeholder while
//! loading or after a failure. There is no retry; a failed picture stays failed
//! until the chapter is opened again.

use crate::config::{get_env_or_value, AssistantConfig, ImagesConfig};
use crate::error::ImageGenerationError;
use reqwest::Client as HttpClient;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

pub const LOADING_LABEL: &str = "Generating AI Illustration...";
pub const FAILED_LABEL: &str = "Image failed to load";

/// Produces one image for a text prompt, as a `data:` URI.
#[async_trait::async_trait]
pub trait ImageService: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, ImageGenerationError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum IllustrationState {
    Loading,
    Ready { data_uri: String },
    Failed,
    /// Image generation is switched off; only the caption is shown
    Disabled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Illustration {
    pub prompt: String,
    pub caption: String,
    pub state: IllustrationState,
}

impl Illustration {
    pub fn new(prompt: impl Into<String>, caption: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            caption: caption.into(),
            state: IllustrationState::Loading,
        }
    }

    /// Placeholder text for the current state, if one is shown.
    pub fn placeholder(&self) -> Option<&'static str> {
        match self.state {
            IllustrationState::Loading => Some(LOADING_LABEL),
            IllustrationState::Failed => Some(FAILED_LABEL),
            IllustrationState::Ready { .. } | IllustrationState::Disabled => None,
        }
    }

    /// Store the outcome of a generation request.
    pub fn resolve(&mut self, result: Result<String, ImageGenerationError>) {
        self.state = match result {
            Ok(data_uri) => IllustrationState::Ready { data_uri },
            Err(e) => {
                warn!(error = %e, prompt = %self.prompt, "Illustration failed");
                IllustrationState::Failed
            }
        };
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
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
#[serde(rename_all = "camelCase")]
struct Part {
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: Option<String>,
    data: String,
}

/// First inline image of a `generateContent` response as a data URI.
pub(crate) fn extract_image(body: &str) -> Result<String, ImageGenerationError> {
    let response: GenerateResponse =
        serde_json::from_str(body).map_err(|e| ImageGenerationError::Request(e.to_string()))?;
    response
        .candidates
        .iter()
        .filter_map(|c| c.content.as_ref())
        .flat_map(|content| content.parts.iter())
        .find_map(|part| part.inline_data.as_ref())
        .map(|inline| {
            let mime = inline.mime_type.as_deref().unwrap_or("image/png");
            format!("data:{};base64,{}", mime, inline.data)
        })
        .ok_or(ImageGenerationError::NoImage)
}

/// Gemini image model over `models/{model}:generateContent`
#[derive(Debug, Clone)]
pub struct GeminiImageClient {
    api_url: String,
    api_key: String,
    model: String,
    client: HttpClient,
}

impl GeminiImageClient {
    /// Shares the assistant's endpoint and key; the model comes from `images`.
    pub fn new(assistant: &AssistantConfig, images: &ImagesConfig) -> Self {
        let client = HttpClient::builder()
            .timeout(Duration::from_secs(assistant.request_timeout_secs))
            .build()
            .unwrap_or_else(|_| HttpClient::new());

        Self {
            api_url: assistant.api_url.trim_end_matches('/').to_string(),
            api_key: get_env_or_value(&assistant.api_key),
            model: images.model.clone(),
            client,
        }
    }

    pub fn url(&self) -> String {
        format!("{}/models/{}:generateContent", self.api_url, self.model)
    }
}

#[async_trait::async_trait]
impl ImageService for GeminiImageClient {
    async fn generate(&self, prompt: &str) -> Result<String, ImageGenerationError> {
        if self.api_key.is_empty() {
            return Err(ImageGenerationError::MissingApiKey);
        }

        let body = json!({ "contents": [{ "parts": [{ "text": prompt }] }] });
        let response = self
            .client
            .post(self.url())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ImageGenerationError::Request(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ImageGenerationError::Request(e.to_string()))?;
        if !status.is_success() {
            return Err(ImageGenerationError::Request(format!("HTTP {}: {}", status, text)));
        }

        debug!(model = %self.model, "Received illustration");
        extract_image(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_image_data_uri() {
        let body = r#"{"candidates":[{"content":{"parts":[
            {"text":"Here is your image"},
            {"inlineData":{"mimeType":"image/png","data":"iVBORw0KGgo="}}
        ]}}]}"#;
        assert_eq!(extract_image(body).unwrap(), "data:image/png;base64,iVBORw0KGgo=");
    }

    #[test]
    fn test_extract_image_defaults_to_png() {
        let body = r#"{"candidates":[{"content":{"parts":[{"inlineData":{"data":"AAAA"}}]}}]}"#;
        assert_eq!(extract_image(body).unwrap(), "data:image/png;base64,AAAA");
    }

    #[test]
    fn test_extract_image_without_image() {
        let body = r#"{"candidates":[{"content":{"parts":[{"text":"no picture"}]}}]}"#;
        assert!(matches!(extract_image(body), Err(ImageGenerationError::NoImage)));
        assert!(matches!(extract_image("oops"), Err(ImageGenerationError::Request(_))));
    }

    #[test]
    fn test_illustration_states() {
        let mut picture = Illustration::new("a clef", "Treble");
        assert_eq!(picture.placeholder(), Some(LOADING_LABEL));

        picture.resolve(Err(ImageGenerationError::NoImage));
        assert_eq!(picture.state, IllustrationState::Failed);
        assert_eq!(picture.placeholder(), Some(FAILED_LABEL));

        picture.resolve(Ok("data:image/png;base64,AA".to_string()));
        assert_eq!(picture.placeholder(), None);
    }

    #[test]
    fn test_url_uses_image_model() {
        let client = GeminiImageClient::new(&AssistantConfig::default(), &ImagesConfig::default());
        assert!(client.url().ends_with("/models/gemini-2.5-flash-image:generateContent"));
    }

    #[tokio::test]
    async fn test_missing_key() {
        let assistant = AssistantConfig {
            api_key: String::new(),
            ..AssistantConfig::default()
        };
        let client = GeminiImageClient::new(&assistant, &ImagesConfig::default());
        assert!(matches!(
            client.generate("a clef").await,
            Err(ImageGenerationError::MissingApiKey)
        ));
    }
}
