use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::retry::send_with_retry;
use super::Provider;
use crate::config::Config;
use crate::errors::GatewayError;

/// Anthropic Messages API adapter.
pub struct Anthropic {
    client: Client,
    model: String,
    api_key: String,
    api_base: String,
    api_version: String,
    max_tokens: u32,
    max_retries: u32,
}

impl Anthropic {
    pub fn new(cfg: &Config, api_key: String) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .map_err(|e| GatewayError::Http(e.to_string()))?;
        Ok(Self {
            client,
            model: cfg.model.clone(),
            api_key,
            api_base: cfg.api_base.clone(),
            api_version: cfg.api_version.clone(),
            max_tokens: cfg.max_tokens,
            max_retries: cfg.max_retries,
        })
    }
}

#[derive(Serialize)]
struct MsgRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<Msg<'a>>,
}

#[derive(Serialize)]
struct Msg<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MsgResponse {
    content: Vec<Block>,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Deserialize)]
struct Block {
    #[serde(default)]
    text: String,
    #[serde(default)]
    r#type: String,
}

/// Rejects truncated completions and bare refusals.
fn check_completion(stop_reason: Option<&str>, text: String) -> Result<String, GatewayError> {
    match stop_reason {
        Some("end_turn") | Some("stop_sequence") | None => {}
        Some(other) => {
            return Err(GatewayError::Incomplete { stop_reason: other.to_string() });
        }
    }
    if text.trim().len() < 10 && text.to_lowercase().contains("no") {
        return Err(GatewayError::Refusal);
    }
    Ok(text)
}

#[async_trait]
impl Provider for Anthropic {
    async fn send(&self, prompt: &str, temperature: f32) -> Result<String, GatewayError> {
        let url = format!("{}/v1/messages", self.api_base.trim_end_matches('/'));
        let body = MsgRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            temperature,
            messages: vec![Msg { role: "user", content: prompt }],
        };

        debug!(%url, temperature, prompt_chars = prompt.len(), "anthropic request");

        let resp = send_with_retry(
            || {
                self.client
                    .post(&url)
                    .header("x-api-key", &self.api_key)
                    .header("anthropic-version", &self.api_version)
                    .json(&body)
            },
            "anthropic",
            self.max_retries,
        )
        .await?;

        let text = resp
            .text()
            .await
            .map_err(|e| GatewayError::Http(format!("read body failed: {e}")))?;
        debug!(body_chars = text.len(), "anthropic response");

        let parsed: MsgResponse = serde_json::from_str(&text)
            .map_err(|e| GatewayError::Decode(format!("{e}")))?;

        let content = parsed
            .content
            .into_iter()
            .filter(|b| b.r#type == "text" || !b.text.is_empty())
            .map(|b| b.text)
            .collect::<Vec<_>>()
            .join("");
        if content.is_empty() {
            return Err(GatewayError::Decode("empty content".into()));
        }

        check_completion(parsed.stop_reason.as_deref(), content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_natural_stop_accepted() {
        let text = "<GENERATED_PROMPT>x</GENERATED_PROMPT>".to_string();
        assert_eq!(check_completion(Some("end_turn"), text.clone()).unwrap(), text);
        assert!(check_completion(Some("stop_sequence"), text).is_ok());
    }

    #[test]
    fn test_max_tokens_stop_rejected() {
        let err = check_completion(Some("max_tokens"), "a long but cut off answer".into()).unwrap_err();
        assert!(matches!(err, GatewayError::Incomplete { stop_reason } if stop_reason == "max_tokens"));
    }

    #[test]
    fn test_short_refusal_rejected() {
        assert!(matches!(check_completion(Some("end_turn"), "No.".into()), Err(GatewayError::Refusal)));
        assert!(check_completion(Some("end_turn"), "PASS".into()).is_ok());
    }

    #[test]
    fn test_response_decoding() {
        let raw = r#"{"content":[{"type":"text","text":"hello"}],"stop_reason":"end_turn"}"#;
        let parsed: MsgResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.content[0].text, "hello");
        assert_eq!(parsed.stop_reason.as_deref(), Some("end_turn"));
    }
}
