//! Gateways to external knowledge: evidence models and the chemical database.

pub mod agent;
pub mod cache;
pub mod parse;
pub mod pubchem;
pub mod search;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

use crate::models::{ChemicalIdentity, EvidenceAnswer};

pub use agent::AgentEvidenceClient;
pub use cache::CachedEvidenceClient;
pub use parse::{ParseError, extract_object, unescape_markdown};
pub use pubchem::PubChemLookup;
pub use search::SearchEvidenceClient;

/// Ask a model a free-text question and get a best-effort structured answer back.
///
/// Implementations never fail: transport, provider and parse problems come back as an
/// answer with `status = error` and the raw response kept for inspection.
#[async_trait]
pub trait EvidenceClient: Send + Sync {
    async fn ask(&self, prompt: &str) -> EvidenceAnswer;
}

/// Deterministic chemical-database lookup
#[async_trait]
pub trait IdentityLookup: Send + Sync {
    async fn resolve(&self, name: &str) -> Result<ChemicalIdentity, IdentityError>;
}

#[derive(Debug, Error)]
pub enum EvidenceError {
    #[error("Missing credentials: {0} is not set")]
    MissingCredentials(&'static str),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("Provider error: {0}")]
    Provider(String),
}

impl EvidenceError {
    /// Timeouts, connection problems and server-side errors are worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            EvidenceError::Transport(_) | EvidenceError::Timeout(_) => true,
            EvidenceError::Status { status, .. } => *status == 429 || *status >= 500,
            EvidenceError::MissingCredentials(_) | EvidenceError::Provider(_) => false,
        }
    }
}

impl From<reqwest::Error> for EvidenceError {
    fn from(err: reqwest::Error) -> Self {
        EvidenceError::Transport(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("No compound named {0} in the chemical database")]
    NotFound(String),

    #[error("Chemical database request failed: {0}")]
    Transport(String),

    #[error("Unexpected chemical database response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for IdentityError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            IdentityError::Decode(err.to_string())
        } else {
            IdentityError::Transport(err.to_string())
        }
    }
}

/// Per-call timeout and retry budget shared by the model clients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            max_retries: 2,
            backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Run `call` under the timeout, retrying retryable failures with doubling backoff
    pub async fn run<T, F, Fut>(&self, label: &str, mut call: F) -> Result<T, EvidenceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, EvidenceError>>,
    {
        let mut attempt = 0;
        loop {
            let outcome = match tokio::time::timeout(self.timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(EvidenceError::Timeout(self.timeout.as_secs())),
            };

            match outcome {
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    warn!(provider = label, attempt, error = %e, "evidence call failed, retrying");
                    tokio::time::sleep(self.backoff * 2u32.saturating_pow(attempt - 1)).await;
                }
                other => return other,
            }
        }
    }
}

/// Turn model content into an answer: fenced JSON becomes `fields`, anything else is a parse error
pub fn answer_from_content(content: String, citations: Vec<String>) -> EvidenceAnswer {
    match extract_object(&content) {
        Ok(fields) => EvidenceAnswer::success(fields, citations, content),
        Err(e) => {
            warn!(error = %e, "model response did not contain a JSON object");
            let mut answer = EvidenceAnswer::failure(format!("Unparseable model response: {}", e), content);
            answer.citations = citations;
            answer
        }
    }
}
