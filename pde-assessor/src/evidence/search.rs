use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::{debug, error};

use super::{EvidenceClient, EvidenceError, RetryPolicy, answer_from_content};
use crate::models::EvidenceAnswer;

/// Retrieval-augmented search model behind an OpenAI-compatible chat endpoint.
///
/// The response's top-level `citations` array becomes the answer's citations.
pub struct SearchEvidenceClient {
    http: Client,
    api_key: String,
    base_url: String,
    model: String,
    policy: RetryPolicy,
}

impl SearchEvidenceClient {
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            http: Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            policy,
        }
    }

    async fn call_search_api(&self, prompt: &str) -> Result<(String, Vec<String>), EvidenceError> {
        if self.api_key.is_empty() {
            return Err(EvidenceError::MissingCredentials("SEARCH_API_KEY"));
        }

        let payload = json!({
            "model": self.model,
            "messages": [
                {
                    "role": "user",
                    "content": prompt
                }
            ]
        });

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EvidenceError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let response_json: Value = response.json().await?;
        read_completion(&response_json)
    }
}

/// Pull the message content and citations out of a chat-completion body
pub fn read_completion(body: &Value) -> Result<(String, Vec<String>), EvidenceError> {
    let content = body["choices"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|choice| choice["message"]["content"].as_str())
        .collect::<Vec<_>>()
        .join("\n");
    if content.trim().is_empty() {
        return Err(EvidenceError::Provider("Invalid response format from search model".to_string()));
    }

    let citations = body["citations"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|c| c.as_str().map(str::to_string))
        .collect();
    Ok((content, citations))
}

#[async_trait]
impl EvidenceClient for SearchEvidenceClient {
    async fn ask(&self, prompt: &str) -> EvidenceAnswer {
        debug!(model = %self.model, prompt_chars = prompt.len(), "search query");
        match self.policy.run("search", || self.call_search_api(prompt)).await {
            Ok((content, citations)) => answer_from_content(content, citations),
            Err(e) => {
                error!(model = %self.model, error = %e, "search query failed");
                EvidenceAnswer::failure(e.to_string(), "")
            }
        }
    }
}
