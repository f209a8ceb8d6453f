//! OpenAI-compatible `/chat/completions` provider (OpenAI, llama.cpp, vLLM, ...).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::{http_client, read_json};
use crate::error::ProviderError;
use crate::provider::ModelProvider;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiCompatProvider {
    client: Client,
    api_key: Option<String>,
    base_url: String,
}

impl OpenAiCompatProvider {
    pub fn new(
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

    async fn complete(&self, body: Value) -> Result<String, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut req = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let json = read_json(req.send().await?).await?;

        let content = json
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::Parse("response missing choices[0].message.content".into()))?;
        if content.trim().is_empty() {
            return Err(ProviderError::EmptyResponse);
        }
        Ok(content.to_string())
    }
}

/// Strict json_schema mode wants `additionalProperties: false` and no vendor keys.
fn to_openai_schema(schema: &Value) -> Value {
    let mut schema = schema.clone();
    if let Some(map) = schema.as_object_mut() {
        map.remove("propertyOrdering");
        if map.get("type").and_then(Value::as_str) == Some("object") {
            map.insert("additionalProperties".into(), Value::Bool(false));
        }
    }
    schema
}

fn user_message(prompt: &str) -> Value {
    json!([{ "role": "user", "content": prompt }])
}

#[async_trait]
impl ModelProvider for OpenAiCompatProvider {
    fn name(&self) -> &'static str {
        "openai_compat"
    }

    async fn generate(&self, model: &str, prompt: &str) -> Result<String, ProviderError> {
        self.complete(json!({ "model": model, "messages": user_message(prompt) }))
            .await
    }

    async fn generate_structured(
        &self,
        model: &str,
        prompt: &str,
        schema: &Value,
    ) -> Result<String, ProviderError> {
        self.complete(json!({
            "model": model,
            "messages": user_message(prompt),
            "temperature": 0.0,
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": "evaluation",
                    "strict": true,
                    "schema": to_openai_schema(schema),
                }
            }
        }))
        .await
    }
}
