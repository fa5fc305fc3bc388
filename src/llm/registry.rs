//! Provider kinds and the startup-built client registry.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use super::anthropic::AnthropicClient;
use super::openai::{
    OpenAiCompatibleClient, GOOGLE_OPENAI_API_URL, OPENAI_API_URL, OPENROUTER_API_URL,
};
use super::LlmClient;

/// Inference providers the router knows how to reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Anthropic,
    #[serde(rename = "openai")]
    OpenAi,
    Google,
    OpenRouter,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::Anthropic,
        ProviderKind::OpenAi,
        ProviderKind::Google,
        ProviderKind::OpenRouter,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
            Self::Google => "google",
            Self::OpenRouter => "openrouter",
        }
    }

    /// Environment variable holding this provider's API key.
    pub fn api_key_var(&self) -> &'static str {
        match self {
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::OpenAi => "OPENAI_API_KEY",
            Self::Google => "GOOGLE_API_KEY",
            Self::OpenRouter => "OPENROUTER_API_KEY",
        }
    }

    fn build_client(&self, api_key: String, timeout: Duration) -> Arc<dyn LlmClient> {
        match self {
            Self::Anthropic => Arc::new(AnthropicClient::new(api_key, timeout)),
            Self::OpenAi => Arc::new(OpenAiCompatibleClient::new(api_key, OPENAI_API_URL, timeout)),
            Self::Google => Arc::new(OpenAiCompatibleClient::new(
                api_key,
                GOOGLE_OPENAI_API_URL,
                timeout,
            )),
            Self::OpenRouter => Arc::new(OpenAiCompatibleClient::new(
                api_key,
                OPENROUTER_API_URL,
                timeout,
            )),
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProviderKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s.trim().to_ascii_lowercase())
            .ok_or_else(|| {
                format!(
                    "unknown provider '{}' (expected one of: anthropic, openai, google, openrouter)",
                    s
                )
            })
    }
}

/// Clients keyed by provider, constructed once at startup.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    clients: HashMap<ProviderKind, Arc<dyn LlmClient>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client for every provider whose API key is set.
    pub fn from_env(timeout: Duration) -> Self {
        let mut registry = Self::new();
        for kind in ProviderKind::ALL {
            match std::env::var(kind.api_key_var()) {
                Ok(key) if !key.trim().is_empty() => {
                    registry.insert(kind, kind.build_client(key, timeout));
                    tracing::debug!(provider = %kind, "Registered inference provider");
                }
                _ => {
                    tracing::debug!(
                        provider = %kind,
                        env = kind.api_key_var(),
                        "No API key set, provider disabled"
                    );
                }
            }
        }
        registry
    }

    pub fn insert(&mut self, kind: ProviderKind, client: Arc<dyn LlmClient>) {
        self.clients.insert(kind, client);
    }

    pub fn with_client(mut self, kind: ProviderKind, client: Arc<dyn LlmClient>) -> Self {
        self.insert(kind, client);
        self
    }

    pub fn get(&self, kind: ProviderKind) -> Option<&Arc<dyn LlmClient>> {
        self.clients.get(&kind)
    }

    pub fn configured(&self) -> Vec<ProviderKind> {
        let mut kinds: Vec<ProviderKind> = self.clients.keys().copied().collect();
        kinds.sort();
        kinds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_kind_parsing() {
        assert_eq!("anthropic".parse::<ProviderKind>(), Ok(ProviderKind::Anthropic));
        assert_eq!("OpenAI".parse::<ProviderKind>(), Ok(ProviderKind::OpenAi));
        assert_eq!(" google ".parse::<ProviderKind>(), Ok(ProviderKind::Google));
        assert!("cohere".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn test_provider_kind_serde_names() {
        let kinds: Vec<ProviderKind> =
            serde_json::from_str(r#"["anthropic","openai","google","openrouter"]"#).unwrap();
        assert_eq!(kinds, ProviderKind::ALL.to_vec());
    }
}
