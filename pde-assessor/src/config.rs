use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::evidence::cache::DEFAULT_MEMORY_ENTRIES;
use crate::evidence::{
    AgentEvidenceClient, CachedEvidenceClient, EvidenceClient, PubChemLookup, RetryPolicy, SearchEvidenceClient,
};
use crate::workflow::EvidenceSources;

pub const DEFAULT_SEARCH_BASE_URL: &str = "https://api.perplexity.ai";
pub const DEFAULT_SEARCH_MODEL: &str = "sonar";
pub const DEFAULT_REASONING_MODEL: &str = "openai/gpt-4o-mini";
pub const DEFAULT_PUBCHEM_BASE_URL: &str = "https://pubchem.ncbi.nlm.nih.gov/rest";

/// Runtime settings, read from the environment
#[derive(Debug, Clone, PartialEq)]
pub struct AssessorConfig {
    pub search_api_key: String,
    pub search_base_url: String,
    pub search_model: String,
    pub openrouter_api_key: String,
    pub reasoning_model: String,
    pub evidence_timeout: Duration,
    pub evidence_max_retries: u32,
    pub cache_dir: Option<PathBuf>,
    pub cache_memory_entries: usize,
    pub force_refresh: bool,
    pub pubchem_base_url: String,
    pub batch_concurrency: usize,
    pub stage_timeout: Duration,
    pub port: u16,
}

impl Default for AssessorConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl AssessorConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset or unparseable values fall back to defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let text = |key: &str, default: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };
        Self {
            search_api_key: text("SEARCH_API_KEY", ""),
            search_base_url: text("SEARCH_BASE_URL", DEFAULT_SEARCH_BASE_URL),
            search_model: text("SEARCH_MODEL", DEFAULT_SEARCH_MODEL),
            openrouter_api_key: text("OPENROUTER_API_KEY", ""),
            reasoning_model: text("REASONING_MODEL", DEFAULT_REASONING_MODEL),
            evidence_timeout: Duration::from_secs(setting(&lookup, "EVIDENCE_TIMEOUT_SECS", 120)),
            evidence_max_retries: setting(&lookup, "EVIDENCE_MAX_RETRIES", 2u32),
            cache_dir: lookup("EVIDENCE_CACHE_DIR")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
            cache_memory_entries: setting(&lookup, "EVIDENCE_CACHE_ENTRIES", DEFAULT_MEMORY_ENTRIES),
            force_refresh: false,
            pubchem_base_url: text("PUBCHEM_BASE_URL", DEFAULT_PUBCHEM_BASE_URL),
            batch_concurrency: setting(&lookup, "BATCH_CONCURRENCY", 4usize).max(1),
            stage_timeout: Duration::from_secs(setting(&lookup, "STAGE_TIMEOUT_SECS", 600)),
            port: setting(&lookup, "PORT", 3000u16),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            timeout: self.evidence_timeout,
            max_retries: self.evidence_max_retries,
            ..RetryPolicy::default()
        }
    }

    /// The production collaborators: cached search and reasoning models plus PubChem
    pub fn evidence_sources(&self) -> EvidenceSources {
        let policy = self.retry_policy();
        if self.search_api_key.is_empty() {
            warn!("SEARCH_API_KEY not set, evidence searches will fail");
        }
        if self.openrouter_api_key.is_empty() {
            warn!("OPENROUTER_API_KEY not set, reasoning requests will fail");
        }

        let search = SearchEvidenceClient::new(
            self.search_api_key.clone(),
            self.search_base_url.clone(),
            self.search_model.clone(),
            policy,
        );
        let reasoning = AgentEvidenceClient::new(&self.openrouter_api_key, self.reasoning_model.clone(), policy);

        EvidenceSources {
            search: self.cached(Arc::new(search), "search"),
            reasoning: self.cached(Arc::new(reasoning), "reasoning"),
            identity: Arc::new(PubChemLookup::new(self.pubchem_base_url.clone(), self.evidence_timeout)),
        }
    }

    fn cached(&self, inner: Arc<dyn EvidenceClient>, namespace: &str) -> Arc<dyn EvidenceClient> {
        let mut cache = CachedEvidenceClient::new(inner, namespace)
            .with_force_refresh(self.force_refresh)
            .with_memory_capacity(self.cache_memory_entries);
        if let Some(dir) = &self.cache_dir {
            info!(namespace, dir = %dir.display(), "evidence cache persisted to disk");
            cache = cache.with_dir(dir.join(namespace));
        }
        Arc::new(cache)
    }
}

/// Parse a setting into its target type; unparseable or out-of-range values fall back to the default
fn setting<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    let Some(raw) = lookup(key) else {
        return default;
    };
    raw.trim().parse::<T>().unwrap_or_else(|e| {
        warn!(key, value = %raw, default = %default, error = %e, "ignoring invalid setting");
        default
    })
}
