//! Google Gemini `generateContent` provider.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::{http_client, read_json};
use crate::error::ProviderError;
use crate::provider::ModelProvider;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

pub struct GeminiProvider {
    client: Client,
    api_key: Option<String>,
    base_url: String,
}

impl GeminiProvider {
    pub fn new(api_key: Option<String>, timeout: Duration) -> Result<Self, ProviderError> {
        Self::with_base_url(api_key, DEFAULT_BASE_URL, timeout)
    }

    /// Point at a Gemini-compatible endpoint (proxy, mock server).
    pub fn with_base_url(
        api_key: Option<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            client: http_client(timeout)?,
            api_key: api_key.filter(|k| !k.is_empty()),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn generate_content(&self, model: &str, body: Value) -> Result<String, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::Config("GEMINI_API_KEY is not set".into()))?;
        let url = format!("{}/v1beta/models/{}:generateContent", self.base_url, model);

        let resp = self
            .client
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await?;
        let json = read_json(resp).await?;
        extract_text(&json)
    }
}

fn user_contents(prompt: &str) -> Value {
    json!([{ "role": "user", "parts": [{ "text": prompt }] }])
}

/// Concatenated text of the first candidate's parts.
fn extract_text(json: &Value) -> Result<String, ProviderError> {
    let parts = json
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            let reason = json
                .pointer("/promptFeedback/blockReason")
                .and_then(Value::as_str)
                .unwrap_or("no candidates");
            ProviderError::Parse(format!("response has no content parts ({reason})"))
        })?;
    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(Value::as_str))
        .collect();
    if text.trim().is_empty() {
        return Err(ProviderError::EmptyResponse);
    }
    Ok(text)
}

/// Gemini's OpenAPI subset spells types in upper case ("OBJECT", "NUMBER").
fn to_gemini_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    let v = match (k.as_str(), v) {
                        ("type", Value::String(t)) => Value::String(t.to_uppercase()),
                        _ => to_gemini_schema(v),
                    };
                    (k.clone(), v)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(to_gemini_schema).collect()),
        other => other.clone(),
    }
}

#[async_trait]
impl ModelProvider for GeminiProvider {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn generate(&self, model: &str, prompt: &str) -> Result<String, ProviderError> {
        self.generate_content(model, json!({ "contents": user_contents(prompt) }))
            .await
    }

    async fn generate_structured(
        &self,
        model: &str,
        prompt: &str,
        schema: &Value,
    ) -> Result<String, ProviderError> {
        let body = json!({
            "contents": user_contents(prompt),
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": to_gemini_schema(schema),
            }
        });
        self.generate_content(model, body).await
    }
}
