use crate::error::StructuredExtractionError;
use crate::models::StructuredRecord;
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

/// Characters of document text sent to the chat model.
pub const DEFAULT_MAX_INPUT_CHARS: usize = 12_000;

/// Infers organization metadata from text. Best effort: callers treat any
/// error as "no fields".
#[async_trait]
pub trait StructuredFieldExtractor: Send + Sync {
    async fn extract_fields(&self, text: &str) -> Result<StructuredRecord, StructuredExtractionError>;
}

#[async_trait]
impl<T: StructuredFieldExtractor + ?Sized> StructuredFieldExtractor for Arc<T> {
    async fn extract_fields(&self, text: &str) -> Result<StructuredRecord, StructuredExtractionError> {
        (**self).extract_fields(text).await
    }
}

/// Extractor used when no chat endpoint is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopFieldExtractor;

#[async_trait]
impl StructuredFieldExtractor for NoopFieldExtractor {
    async fn extract_fields(&self, _text: &str) -> Result<StructuredRecord, StructuredExtractionError> {
        Ok(StructuredRecord::new())
    }
}

/// Runs `extractor` under `policy`; every failure becomes an empty record.
pub async fn extract_or_empty<X>(extractor: &X, text: &str, policy: &RetryPolicy) -> StructuredRecord
where
    X: StructuredFieldExtractor + ?Sized,
{
    if text.trim().is_empty() {
        return StructuredRecord::new();
    }

    match policy
        .run("structured_extraction", || extractor.extract_fields(text))
        .await
    {
        Ok(record) => record,
        Err(error) => {
            warn!(%error, "structured extraction failed, continuing without fields");
            StructuredRecord::new()
        }
    }
}

/// Client for OpenAI-compatible `/chat/completions` endpoints in JSON mode.
pub struct ChatCompletionFieldExtractor {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    max_input_chars: usize,
}

impl ChatCompletionFieldExtractor {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            api_key,
            model: model.into(),
            max_input_chars: DEFAULT_MAX_INPUT_CHARS,
        }
    }

    pub fn with_max_input_chars(mut self, max_input_chars: usize) -> Self {
        self.max_input_chars = max_input_chars.max(1);
        self
    }

    fn request_body(&self, text: &str) -> Value {
        let excerpt: String = text.chars().take(self.max_input_chars).collect();
        json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system_prompt()},
                {"role": "user", "content": format!("Extract organization information from this text:\n\n{excerpt}")}
            ],
            "response_format": {"type": "json_object"},
            "temperature": 0.1,
            "max_tokens": 2048
        })
    }
}

#[async_trait]
impl StructuredFieldExtractor for ChatCompletionFieldExtractor {
    async fn extract_fields(&self, text: &str) -> Result<StructuredRecord, StructuredExtractionError> {
        let url = format!("{}/chat/completions", self.endpoint.trim_end_matches('/'));
        let mut request = self.client.post(url).json(&self.request_body(text));
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key).header("api-key", api_key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(StructuredExtractionError::Response(format!("{status}: {body}")));
        }

        let body: Value = response.json().await?;
        let content = body
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .ok_or_else(|| StructuredExtractionError::Response("missing message content".into()))?;

        let record = parse_model_output(content)?;
        debug!(fields = record.len(), "structured fields extracted");
        Ok(record)
    }
}

/// Parses a model answer, tolerating a fenced code block around the JSON.
pub fn parse_model_output(content: &str) -> Result<StructuredRecord, StructuredExtractionError> {
    let trimmed = content.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed);

    let value: Value = serde_json::from_str(unfenced.trim())?;
    if !value.is_object() {
        return Err(StructuredExtractionError::Response(
            "model output is not a json object".into(),
        ));
    }
    Ok(StructuredRecord::from_llm_output(value))
}

pub fn org_schema() -> Value {
    let string = json!({"type": "string"});
    let nullable_string = json!({"type": ["string", "null"]});
    let string_list = json!({"type": "array", "items": {"type": "string"}});

    json!({
        "type": "object",
        "properties": {
            "org_name": string,
            "country": string,
            "address": string,
            "founded_year": {"type": ["integer", "null"]},
            "size": string,
            "industry": string,
            "is_DU_member": {"type": ["boolean", "null"]},
            "website": nullable_string,
            "contacts": {"type": "array", "items": {"type": "object", "properties": {
                "name": string, "email": nullable_string, "phone": nullable_string,
                "title": nullable_string, "address": nullable_string
            }}},
            "members": {"type": "array", "items": {"type": "object", "properties": {
                "name": string, "title": nullable_string, "role": nullable_string
            }}},
            "facilities": {"type": "array", "items": {"type": "object", "properties": {
                "name": string, "type": nullable_string, "usage": nullable_string
            }}},
            "capabilities": string_list,
            "projects": string_list,
            "awards": string_list,
            "services": string_list,
            "notes": string
        }
    })
}

fn system_prompt() -> String {
    let schema = serde_json::to_string_pretty(&org_schema()).unwrap_or_default();
    format!(
        "You are a precise information extraction assistant. Given an organization \
brochure or manual, extract one JSON object following this JSON Schema:\n\n{schema}\n\n\
Rules:\n- Only extract facts explicitly present\n- Use null for missing scalars and [] for missing arrays\n\
- Field names must match the schema exactly\n- Return valid JSON only"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FailingExtractor {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl StructuredFieldExtractor for FailingExtractor {
        async fn extract_fields(&self, _text: &str) -> Result<StructuredRecord, StructuredExtractionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(StructuredExtractionError::Response("rate limited".into()))
        }
    }

    #[test]
    fn fenced_model_output_is_parsed() {
        let record = parse_model_output("```json\n{\"org_name\": \"Lab\", \"capabilities\": \"cutting\"}\n```")
            .unwrap();
        assert_eq!(record.get_str("org_name"), Some("Lab"));
        assert_eq!(record.get_list("capabilities"), vec!["cutting"]);
    }

    #[test]
    fn non_object_output_is_an_error() {
        assert!(parse_model_output("[1, 2]").is_err());
        assert!(parse_model_output("not json").is_err());
    }

    #[test]
    fn request_truncates_input_and_uses_json_mode() {
        let extractor =
            ChatCompletionFieldExtractor::new("http://localhost", None, "chat").with_max_input_chars(5);
        let body = extractor.request_body("abcdefghij");

        assert_eq!(body["response_format"]["type"], "json_object");
        let user = body["messages"][1]["content"].as_str().unwrap();
        assert!(user.ends_with("abcde"));
        assert!(body["messages"][0]["content"].as_str().unwrap().contains("is_DU_member"));
    }

    #[tokio::test]
    async fn failures_downgrade_to_empty_record() {
        let extractor = FailingExtractor {
            calls: AtomicUsize::new(0),
        };
        let policy = RetryPolicy::new(2, Duration::ZERO, Duration::from_secs(1));

        let record = extract_or_empty(&extractor, "some brochure text", &policy).await;
        assert!(record.is_empty());
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn blank_text_skips_the_extractor() {
        let extractor = FailingExtractor {
            calls: AtomicUsize::new(0),
        };
        let record = extract_or_empty(&extractor, "  ", &RetryPolicy::default()).await;
        assert!(record.is_empty());
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 0);
    }
}
