//! HTTP implementations of `ModelProvider`.

use std::time::Duration;

use reqwest::{Client, Response};
use serde_json::Value;

use crate::error::ProviderError;

pub mod gemini;
pub mod openai_compat;

fn http_client(timeout: Duration) -> Result<Client, ProviderError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ProviderError::Config(format!("failed to build HTTP client: {e}")))
}

/// Read a JSON body, turning non-success statuses into `ProviderError::Api`.
async fn read_json(resp: Response) -> Result<Value, ProviderError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        // Both Gemini and OpenAI-style APIs wrap failures as {"error": {"message": ...}}
        let message = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v.pointer("/error/message").and_then(Value::as_str).map(String::from))
            .unwrap_or(body);
        return Err(ProviderError::Api {
            status: status.as_u16(),
            message,
        });
    }
    resp.json::<Value>()
        .await
        .map_err(|e| ProviderError::Parse(e.to_string()))
}
