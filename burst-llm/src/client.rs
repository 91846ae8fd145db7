use crate::error::{LlmError, Result};
use crate::types::{ChatMessage, ReplyOutcome};
use serde::{Deserialize, Serialize};

const CHAT_COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";

// SMS replies are short by policy; capping output keeps the responder from
// rambling past what fits in a text.
const REPLY_MAX_TOKENS: u32 = 100;
const REPLY_TEMPERATURE: f32 = 0.7;

#[derive(Clone)]
pub struct LlmClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl LlmClient {
    pub fn new(api_key: &str, model: &str) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(%e, "reqwest client build failed; falling back to default client");
                reqwest::Client::new()
            });
        Self {
            http,
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    #[tracing::instrument(level = "info", skip_all, fields(model = %self.model, messages = messages.len()))]
    pub async fn generate_reply(&self, messages: &[ChatMessage]) -> Result<ReplyOutcome> {
        if messages.is_empty() {
            return Err(LlmError::InvalidInput(
                "at least one chat message is required".to_string(),
            ));
        }

        let req = ChatCompletionRequest {
            model: &self.model,
            messages,
            temperature: REPLY_TEMPERATURE,
            max_tokens: REPLY_MAX_TOKENS,
        };

        let response = self
            .http
            .post(CHAT_COMPLETIONS_URL)
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(LlmError::Http(format!(
                "chat completions status={status} body={body}"
            )));
        }

        let parsed: ChatCompletionResponse = serde_json::from_str(&body)?;
        parsed.into_outcome(&self.model)
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    usage: Option<ResponseUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseUsage {
    total_tokens: Option<u32>,
}

impl ChatCompletionResponse {
    fn into_outcome(self, model: &str) -> Result<ReplyOutcome> {
        let text = self
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| {
                LlmError::ResponseFormat("chat completion had no message content".to_string())
            })?;
        Ok(ReplyOutcome {
            text,
            model: model.to_string(),
            tokens_used: self.usage.and_then(|u| u.total_tokens).unwrap_or(0),
        })
    }
}
