use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::InferenceError;

/// Token counts reported by the service for one call.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct TokenCounts {
    #[serde(default)]
    pub prompt_tokens: i64,
    #[serde(default)]
    pub completion_tokens: i64,
    #[serde(default)]
    pub total_tokens: i64,
}

/// One completed chat call: the text content plus usage, when reported.
#[derive(Debug, Clone)]
pub struct ChatCompletion {
    pub content: String,
    pub usage: Option<TokenCounts>,
}

/// The bytes-over-wire seam to the multimodal inference service. The
/// gateway owns credential/model selection, retry and metering; a transport
/// only turns one request into one response or a typed failure.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Stage 1: video plus prompt.
    async fn chat_video(
        &self,
        video: &[u8],
        prompt: &str,
        model: &str,
    ) -> Result<ChatCompletion, InferenceError>;

    /// Stage 2: text-only prompt.
    async fn chat_text(&self, prompt: &str, model: &str)
        -> Result<ChatCompletion, InferenceError>;
}

// Wire shapes for an OpenAI-style chat-completions endpoint.

#[derive(Serialize)]
struct ChatRequestBody {
    model: String,
    messages: Vec<ChatMessage>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: Vec<ContentPart>,
}

#[derive(Serialize)]
#[serde(tag = "type")]
enum ContentPart {
    #[serde(rename = "video_url")]
    VideoUrl { video_url: VideoUrl },
    #[serde(rename = "text")]
    Text { text: String },
}

#[derive(Serialize)]
struct VideoUrl {
    url: String,
}

#[derive(Deserialize)]
struct ChatResponseBody {
    choices: Vec<ChatChoice>,
    usage: Option<TokenCounts>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// `reqwest` transport against an ARK-compatible chat-completions API.
/// Stage-1 video is passed inline as a base64 data URL.
pub struct ArkTransport {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl ArkTransport {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    async fn send(&self, body: ChatRequestBody) -> Result<ChatCompletion, InferenceError> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    InferenceError::Timeout
                } else {
                    InferenceError::Transport(err.to_string())
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED
            || status == reqwest::StatusCode::FORBIDDEN
        {
            let detail = response.text().await.unwrap_or_default();
            return Err(InferenceError::AuthRejected(detail));
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(InferenceError::RateLimited);
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(InferenceError::Transport(format!(
                "unexpected status {status}: {detail}"
            )));
        }

        let parsed: ChatResponseBody = response
            .json()
            .await
            .map_err(|err| InferenceError::MalformedResponse(err.to_string()))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| InferenceError::MalformedResponse("empty choices".into()))?;

        Ok(ChatCompletion {
            content: choice.message.content,
            usage: parsed.usage,
        })
    }
}

#[async_trait]
impl ChatTransport for ArkTransport {
    async fn chat_video(
        &self,
        video: &[u8],
        prompt: &str,
        model: &str,
    ) -> Result<ChatCompletion, InferenceError> {
        let data_url = format!("data:video/mp4;base64,{}", BASE64.encode(video));
        let body = ChatRequestBody {
            model: model.to_string(),
            messages: vec![ChatMessage {
                role: "user",
                content: vec![
                    ContentPart::VideoUrl {
                        video_url: VideoUrl { url: data_url },
                    },
                    ContentPart::Text {
                        text: prompt.to_string(),
                    },
                ],
            }],
        };
        self.send(body).await
    }

    async fn chat_text(
        &self,
        prompt: &str,
        model: &str,
    ) -> Result<ChatCompletion, InferenceError> {
        let body = ChatRequestBody {
            model: model.to_string(),
            messages: vec![ChatMessage {
                role: "user",
                content: vec![ContentPart::Text {
                    text: prompt.to_string(),
                }],
            }],
        };
        self.send(body).await
    }
}
