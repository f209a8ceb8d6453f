use async_trait::async_trait;
use serde_json::Value;

use crate::error::ProviderError;

/// External generative-text service.
///
/// Implementations make exactly one request per call; retrying and fallback
/// live in `ModelClient`.
#[async_trait]
pub trait ModelProvider: Send + Sync {
	fn name(&self) -> &'static str;

	/// Free-text generation.
	async fn generate(&self, model: &str, prompt: &str) -> Result<String, ProviderError>;

	/// Generation constrained to `schema` (a JSON-schema object). Returns the raw JSON text.
	async fn generate_structured(
		&self,
		model: &str,
		prompt: &str,
		schema: &Value,
	) -> Result<String, ProviderError>;
}
