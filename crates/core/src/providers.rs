use crate::error::ProviderError;
use crate::traits::{AnswerProvider, EmbeddingProvider};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 1_536;

/// OpenAI-compatible `/embeddings` client.
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    dimensions: usize,
}

impl OpenAiEmbedder {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }

    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = dimensions;
        self
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "input": text,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ProviderError::Status {
                provider: "embeddings".to_string(),
                status: response.status().to_string(),
            });
        }

        let payload: Value = response.json().await?;
        parse_embedding_response(&payload)
    }
}

pub(crate) fn parse_embedding_response(payload: &Value) -> Result<Vec<f32>, ProviderError> {
    let values = payload
        .pointer("/data/0/embedding")
        .and_then(Value::as_array)
        .ok_or_else(|| ProviderError::Malformed {
            provider: "embeddings".to_string(),
            details: "missing data[0].embedding".to_string(),
        })?;

    let mut vector = Vec::with_capacity(values.len());
    for value in values {
        let number = value.as_f64().ok_or_else(|| ProviderError::Malformed {
            provider: "embeddings".to_string(),
            details: "non-numeric embedding component".to_string(),
        })?;
        vector.push(number as f32);
    }

    if vector.is_empty() {
        return Err(ProviderError::Malformed {
            provider: "embeddings".to_string(),
            details: "empty embedding".to_string(),
        });
    }

    Ok(vector)
}

/// OpenAI-compatible `/chat/completions` client.
#[derive(Clone)]
pub struct OpenAiCompleter {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
}

impl OpenAiCompleter {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            temperature: 0.1,
        }
    }
}

#[async_trait]
impl AnswerProvider for OpenAiCompleter {
    async fn complete(&self, prompt: &str) -> Result<String, ProviderError> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "temperature": self.temperature,
                "messages": [
                    {"role": "user", "content": prompt}
                ],
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ProviderError::Status {
                provider: "completions".to_string(),
                status: response.status().to_string(),
            });
        }

        let payload: Value = response.json().await?;
        parse_completion_response(&payload)
    }
}

pub(crate) fn parse_completion_response(payload: &Value) -> Result<String, ProviderError> {
    payload
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(|text| text.trim().to_string())
        .ok_or_else(|| ProviderError::Malformed {
            provider: "completions".to_string(),
            details: "missing choices[0].message.content".to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::{parse_completion_response, parse_embedding_response};
    use serde_json::json;

    #[test]
    fn embedding_response_is_decoded() {
        let payload = json!({
            "data": [{"embedding": [0.25, -0.5, 1.0]}],
            "model": "text-embedding-3-small",
        });

        let vector = parse_embedding_response(&payload).expect("embedding should decode");
        assert_eq!(vector, vec![0.25, -0.5, 1.0]);
    }

    #[test]
    fn embedding_response_without_data_is_rejected() {
        let payload = json!({"error": {"message": "rate limited"}});
        assert!(parse_embedding_response(&payload).is_err());
    }

    #[test]
    fn completion_response_is_decoded_and_trimmed() {
        let payload = json!({
            "choices": [{"message": {"role": "assistant", "content": "  hello\n"}}],
        });

        let text = parse_completion_response(&payload).expect("completion should decode");
        assert_eq!(text, "hello");
    }
}
