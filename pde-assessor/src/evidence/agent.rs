use async_trait::async_trait;
use rig::{agent::Agent, client::CompletionClient, completion::Prompt, providers::openrouter};
use tracing::{debug, error};

use super::{EvidenceClient, EvidenceError, RetryPolicy, answer_from_content};
use crate::models::EvidenceAnswer;

const PREAMBLE: &str = "You are a pharmacology and toxicology assessment assistant. \
Follow the instructions exactly and answer only with the JSON object requested, inside a ```json block.";

/// Reasoning / extraction model reached through an OpenRouter agent
pub struct AgentEvidenceClient {
    agent: Option<Agent<openrouter::CompletionModel>>,
    model: String,
    policy: RetryPolicy,
}

impl AgentEvidenceClient {
    /// Build the agent; an empty key leaves the client unconfigured and every ask fails cleanly
    pub fn new(api_key: &str, model: impl Into<String>, policy: RetryPolicy) -> Self {
        let model = model.into();
        let agent = (!api_key.is_empty()).then(|| {
            let client = openrouter::Client::new(api_key);
            client.agent(&model).preamble(PREAMBLE).build()
        });
        Self { agent, model, policy }
    }

    async fn call_agent(&self, prompt: &str) -> Result<String, EvidenceError> {
        let agent = self
            .agent
            .as_ref()
            .ok_or(EvidenceError::MissingCredentials("OPENROUTER_API_KEY"))?;

        agent
            .prompt(prompt)
            .await
            .map_err(|e| EvidenceError::Transport(format!("LLM prompt failed: {}", e)))
    }
}

#[async_trait]
impl EvidenceClient for AgentEvidenceClient {
    async fn ask(&self, prompt: &str) -> EvidenceAnswer {
        debug!(model = %self.model, prompt_chars = prompt.len(), "reasoning query");
        match self.policy.run("reasoning", || self.call_agent(prompt)).await {
            Ok(content) => answer_from_content(content, Vec::new()),
            Err(e) => {
                error!(model = %self.model, error = %e, "reasoning query failed");
                EvidenceAnswer::failure(e.to_string(), "")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_client_reports_missing_key() {
        let client = AgentEvidenceClient::new("", "openai/gpt-4o-mini", RetryPolicy::default());
        let answer = client.ask("Compute alpha").await;
        assert!(!answer.is_success());
        assert!(answer.error_message().contains("OPENROUTER_API_KEY"));
    }

    /// Usage: OPENROUTER_API_KEY=key cargo test live_reasoning -- --nocapture
    #[tokio::test]
    async fn live_reasoning() {
        let Ok(key) = std::env::var("OPENROUTER_API_KEY") else {
            println!("Skipping test - set OPENROUTER_API_KEY environment variable");
            return;
        };
        let client = AgentEvidenceClient::new(&key, "openai/gpt-4o-mini", RetryPolicy::default());
        let answer = client
            .ask("Return ```json {\"Effect_Level\": \"NOAEL\", \"F5_value\": 1}``` unchanged.")
            .await;
        println!("{:?}", answer);
    }
}
