use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::offline::{OfflineClassifier, OfflineRecord};

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

const SCAN_MAX_TOKENS: u32 = 800;
const CHAT_MAX_TOKENS: u32 = 600;

const SCAN_SYSTEM_PROMPT: &str = "You are an assistant that can analyze an image (base64) \
and classify waste and detect receipts.";

const SCAN_PROMPT: &str = "Analyze the following image (base64). Determine if this image is a \
bank transaction receipt (yes/no). If yes, include isReceipt, vendor, amount and date. \
Regardless, classify the waste item shown (organic/non-organic), guess the item name, and \
provide guidance in short plain English. Answer with one JSON object using the keys \
\"type\", \"item\", \"guidance\", \"isReceipt\", \"vendor\", \"amount\", \"date\".";

const CHAT_SYSTEM_PROMPT: &str = "You are Rosy, a friendly assistant that helps people sort \
household waste into organic and non-organic and explains how community waste banks work. \
Keep answers short and practical.";

#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// Completion endpoint. Both this and `api_key` must be set to go online.
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub model: String,
    /// Upper bound on one upstream call, connect through body.
    pub timeout: Duration,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ClassificationInput {
    Image { bytes: Bytes, filename: String },
    Text(String),
}

/// What the gateway produced, before interpretation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawModelOutput {
    /// Free-form text returned by the model.
    Model(String),
    /// Offline record for an image.
    Offline(OfflineRecord),
    /// Offline chat reply.
    OfflineReply(String),
}

impl RawModelOutput {
    pub fn is_offline(&self) -> bool {
        !matches!(self, Self::Model(_))
    }

    /// Plain reply text, as shown to a chat user.
    pub fn into_reply(self) -> String {
        match self {
            Self::Model(text) | Self::OfflineReply(text) => text,
            Self::Offline(record) => record.guidance,
        }
    }
}

/// Why an upstream call did not produce text. Never leaves this crate's
/// public `classify`; every variant degrades to the offline path.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("classifier endpoint is not configured")]
    Unconfigured,
    #[error("classifier call timed out")]
    Timeout,
    #[error("classifier transport error: {0}")]
    Transport(String),
    #[error("classifier returned HTTP {0}")]
    Status(u16),
    #[error("malformed completion response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for UpstreamError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_decode() {
            Self::Malformed(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

// -- Wire types for the completion endpoint --

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl CompletionResponse {
    fn into_first_content(self) -> Option<String> {
        self.choices.into_iter().next()?.message?.content
    }
}

/// Gateway to the external model with an offline fallback.
pub struct Classifier {
    client: reqwest::Client,
    config: ClassifierConfig,
    offline: Arc<dyn OfflineClassifier>,
}

impl Classifier {
    pub fn new(
        config: ClassifierConfig,
        offline: Arc<dyn OfflineClassifier>,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.timeout)
            .build()?;
        Ok(Self {
            client,
            config,
            offline,
        })
    }

    pub fn is_online(&self) -> bool {
        self.config.endpoint.is_some() && self.config.api_key.is_some()
    }

    /// Runs one classification. Upstream faults are logged and replaced by
    /// the offline strategy's answer; this never fails and never waits past
    /// the configured timeout.
    pub async fn classify(&self, input: &ClassificationInput) -> RawModelOutput {
        let call = self.complete(input);
        let outcome = match tokio::time::timeout(self.config.timeout, call).await {
            Ok(outcome) => outcome,
            Err(_) => Err(UpstreamError::Timeout),
        };

        match outcome {
            Ok(text) => RawModelOutput::Model(text),
            Err(UpstreamError::Unconfigured) => {
                debug!("Classifier offline, using local result");
                self.offline_output(input)
            }
            Err(e) => {
                warn!("Classifier unavailable, falling back to local result: {}", e);
                self.offline_output(input)
            }
        }
    }

    fn offline_output(&self, input: &ClassificationInput) -> RawModelOutput {
        match input {
            ClassificationInput::Image { bytes, filename } => {
                RawModelOutput::Offline(self.offline.classify_image(filename, bytes))
            }
            ClassificationInput::Text(message) => {
                RawModelOutput::OfflineReply(self.offline.chat_reply(message))
            }
        }
    }

    async fn complete(&self, input: &ClassificationInput) -> Result<String, UpstreamError> {
        let (Some(endpoint), Some(api_key)) = (&self.config.endpoint, &self.config.api_key) else {
            return Err(UpstreamError::Unconfigured);
        };

        let request = self.build_request(input);
        let resp = self
            .client
            .post(endpoint)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(UpstreamError::Status(status.as_u16()));
        }

        let completion: CompletionResponse = resp.json().await?;
        completion
            .into_first_content()
            .ok_or_else(|| UpstreamError::Malformed("no choices[0].message.content".into()))
    }

    fn build_request(&self, input: &ClassificationInput) -> CompletionRequest<'_> {
        match input {
            ClassificationInput::Image { bytes, .. } => CompletionRequest {
                model: &self.config.model,
                messages: vec![
                    ChatMessage {
                        role: "system",
                        content: SCAN_SYSTEM_PROMPT.to_string(),
                    },
                    ChatMessage {
                        role: "user",
                        content: format!("{}\nIMAGE_BASE64:{}", SCAN_PROMPT, B64.encode(bytes)),
                    },
                ],
                max_tokens: SCAN_MAX_TOKENS,
            },
            ClassificationInput::Text(message) => CompletionRequest {
                model: &self.config.model,
                messages: vec![
                    ChatMessage {
                        role: "system",
                        content: CHAT_SYSTEM_PROMPT.to_string(),
                    },
                    ChatMessage {
                        role: "user",
                        content: message.clone(),
                    },
                ],
                max_tokens: CHAT_MAX_TOKENS,
            },
        }
    }
}
