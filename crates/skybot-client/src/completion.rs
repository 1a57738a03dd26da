use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use skybot_engine::CompletionClient;
use skybot_types::{ChatMessage, ClientError};

use crate::http::{build_client, read_json, send_error};

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// Chat completions against an OpenAI-compatible endpoint.
pub struct OpenAiCompletion {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiCompletion {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, ClientError> {
        Ok(Self {
            http: build_client(Duration::from_secs(60))?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
        })
    }
}

fn build_request<'a>(
    model: &'a str,
    system: &'a str,
    history: &'a [ChatMessage],
    user: &'a str,
) -> ChatRequest<'a> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(WireMessage {
        role: "system",
        content: system,
    });
    messages.extend(history.iter().map(|m| WireMessage {
        role: m.role.as_str(),
        content: &m.content,
    }));
    messages.push(WireMessage {
        role: "user",
        content: user,
    });
    ChatRequest { model, messages }
}

fn first_answer(resp: ChatResponse) -> Result<String, ClientError> {
    resp.choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| ClientError::Malformed("completion returned no choices".into()))
}

#[async_trait]
impl CompletionClient for OpenAiCompletion {
    async fn complete(
        &self,
        system: &str,
        history: &[ChatMessage],
        user: &str,
    ) -> Result<String, ClientError> {
        let request = build_request(&self.model, system, history, user);
        debug!(model = %self.model, messages = request.messages.len(), "Requesting completion");

        let resp = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(send_error)?;
        first_answer(read_json(resp).await?)
    }
}
