//! Inference router: per-role provider preference with ordered fallback.
//!
//! For every call the router builds an attempt order from the role's preferred
//! model followed by the global fallback chain, tries each entry with a
//! request timeout, and records token usage for whichever provider answered.
//! When a full pass fails it waits out a cooldown and makes exactly one more
//! pass before giving up with [`RouterError::Exhausted`].

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;

use super::error::LlmError;
use super::registry::{ProviderKind, ProviderRegistry};
use super::{ChatMessage, ChatResponse, ToolDefinition};

/// The four orchestration roles that talk to models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    Planner,
    Implementer,
    Reviewer,
    Committer,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planner => "planner",
            Self::Implementer => "implementer",
            Self::Reviewer => "reviewer",
            Self::Committer => "committer",
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A `(provider, model)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelSpec {
    pub provider: ProviderKind,
    pub model: String,
}

impl ModelSpec {
    pub fn new(provider: ProviderKind, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }

    /// Key used for usage accounting and the active-provider display.
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ModelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}

/// Parses `provider/model`, e.g. `anthropic/claude-sonnet-4-5`.
impl FromStr for ModelSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (provider, model) = s
            .split_once('/')
            .ok_or_else(|| format!("model '{}' must be written as provider/model", s))?;
        if model.trim().is_empty() {
            return Err(format!("model '{}' has an empty model name", s));
        }
        Ok(Self::new(provider.parse()?, model.trim()))
    }
}

/// Accumulated token counts for one provider/model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenTally {
    pub input: u64,
    pub output: u64,
}

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("no inference providers configured for role {role}")]
    NoProviders { role: AgentRole },

    #[error("all inference providers exhausted for role {role} after {attempts} attempts: {last_error}")]
    Exhausted {
        role: AgentRole,
        attempts: usize,
        last_error: String,
    },
}

/// Preferred model first, then the global chain with duplicates removed.
pub fn attempt_order(preferred: Option<&ModelSpec>, chain: &[ModelSpec]) -> Vec<ModelSpec> {
    let mut seen = HashSet::new();
    preferred
        .into_iter()
        .chain(chain.iter())
        .filter(|spec| seen.insert((*spec).clone()))
        .cloned()
        .collect()
}

#[derive(Debug, Default)]
struct Ledger {
    current: String,
    usage: BTreeMap<String, TokenTally>,
}

/// Routes role calls through the provider chain.
pub struct ModelRouter {
    registry: ProviderRegistry,
    preferred: HashMap<AgentRole, ModelSpec>,
    fallback_chain: Vec<ModelSpec>,
    request_timeout: Duration,
    cooldown: Duration,
    ledger: Mutex<Ledger>,
}

impl ModelRouter {
    pub fn new(
        registry: ProviderRegistry,
        preferred: HashMap<AgentRole, ModelSpec>,
        fallback_chain: Vec<ModelSpec>,
        request_timeout: Duration,
        cooldown: Duration,
    ) -> Self {
        Self {
            registry,
            preferred,
            fallback_chain,
            request_timeout,
            cooldown,
            ledger: Mutex::new(Ledger::default()),
        }
    }

    /// Attempt order for a role.
    pub fn attempt_order_for(&self, role: AgentRole) -> Vec<ModelSpec> {
        attempt_order(self.preferred.get(&role), &self.fallback_chain)
    }

    /// Seed accounting from a checkpoint so resumed runs keep counting.
    pub fn restore(&self, current: &str, usage: &BTreeMap<String, TokenTally>) {
        let mut ledger = self.lock_ledger();
        ledger.current = current.to_string();
        ledger.usage = usage.clone();
    }

    /// Active provider key and usage totals.
    pub fn snapshot(&self) -> (String, BTreeMap<String, TokenTally>) {
        let ledger = self.lock_ledger();
        (ledger.current.clone(), ledger.usage.clone())
    }

    fn lock_ledger(&self) -> std::sync::MutexGuard<'_, Ledger> {
        // Poisoning only happens if a holder panicked; the counters are still usable.
        self.ledger.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Send a transcript to the first provider that answers.
    pub async fn invoke(
        &self,
        role: AgentRole,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
    ) -> Result<ChatResponse, RouterError> {
        let order = self.attempt_order_for(role);
        if order.is_empty() {
            return Err(RouterError::NoProviders { role });
        }

        if let Ok(response) = self.pass(role, &order, messages, tools).await {
            return Ok(response);
        }

        tracing::warn!(
            agent = %role,
            cooldown_secs = self.cooldown.as_secs(),
            "All providers failed. Waiting before final retry..."
        );
        tokio::time::sleep(self.cooldown).await;

        match self.pass(role, &order, messages, tools).await {
            Ok(response) => Ok(response),
            Err(last_error) => {
                tracing::error!(agent = %role, error = %last_error, "All providers exhausted after retry");
                Err(RouterError::Exhausted {
                    role,
                    attempts: order.len() * 2,
                    last_error: last_error.to_string(),
                })
            }
        }
    }

    /// One pass over the attempt order. Returns the last error if every entry fails.
    async fn pass(
        &self,
        role: AgentRole,
        order: &[ModelSpec],
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
    ) -> Result<ChatResponse, LlmError> {
        let mut last_error = LlmError::not_configured("empty attempt order".to_string());

        for spec in order {
            let Some(client) = self.registry.get(spec.provider) else {
                tracing::warn!(agent = %role, provider = %spec, "Provider not configured, skipping");
                last_error = LlmError::not_configured(format!(
                    "{} has no client (set {})",
                    spec.provider,
                    spec.provider.api_key_var()
                ));
                continue;
            };

            let start = Instant::now();
            let result = match tokio::time::timeout(
                self.request_timeout,
                client.chat_completion(&spec.model, messages, tools),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(LlmError::timeout(self.request_timeout)),
            };

            match result {
                Ok(response) => {
                    let latency_ms = start.elapsed().as_millis() as u64;
                    self.record_success(spec, &response);
                    let usage = response.usage.unwrap_or(super::TokenUsage::new(0, 0));
                    tracing::info!(
                        agent = %role,
                        llm_provider = %spec,
                        latency_ms,
                        tokens_in = usage.prompt_tokens,
                        tokens_out = usage.completion_tokens,
                        "LLM call succeeded"
                    );
                    return Ok(response);
                }
                Err(e) => {
                    tracing::warn!(agent = %role, llm_provider = %spec, error = %e, "LLM call failed");
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }

    fn record_success(&self, spec: &ModelSpec, response: &ChatResponse) {
        let key = spec.key();
        let mut ledger = self.lock_ledger();
        ledger.current = key.clone();
        if let Some(usage) = response.usage {
            let tally = ledger.usage.entry(key).or_default();
            tally.input = tally.input.saturating_add(usage.prompt_tokens);
            tally.output = tally.output.saturating_add(usage.completion_tokens);
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted clients shared by router and agent tests.

    use super::*;
    use crate::llm::LlmClient;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Arc;

    /// Client that replays queued results and records the models it was asked for.
    #[derive(Default)]
    pub struct ScriptedClient {
        replies: Mutex<VecDeque<Result<ChatResponse, LlmError>>>,
        calls: Mutex<Vec<String>>,
        transcripts: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedClient {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn push(&self, reply: Result<ChatResponse, LlmError>) {
            self.replies.lock().unwrap().push_back(reply);
        }

        pub fn push_text(&self, text: &str) {
            self.push(Ok(ChatResponse::text(text)));
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        pub fn transcripts(&self) -> Vec<Vec<ChatMessage>> {
            self.transcripts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedClient {
        async fn chat_completion(
            &self,
            model: &str,
            messages: &[ChatMessage],
            _tools: Option<&[ToolDefinition]>,
        ) -> Result<ChatResponse, LlmError> {
            self.calls.lock().unwrap().push(model.to_string());
            self.transcripts.lock().unwrap().push(messages.to_vec());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(LlmError::server_error(500, "script exhausted".into())))
        }
    }

    /// Router with a single Anthropic entry backed by `client`.
    pub fn single_provider_router(client: Arc<ScriptedClient>) -> ModelRouter {
        let registry = ProviderRegistry::new().with_client(ProviderKind::Anthropic, client);
        ModelRouter::new(
            registry,
            HashMap::new(),
            vec![ModelSpec::new(ProviderKind::Anthropic, "test-model")],
            Duration::from_secs(5),
            Duration::ZERO,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedClient;
    use super::*;
    use crate::llm::{LlmClient, TokenUsage};
    use async_trait::async_trait;
    use std::sync::Arc;

    fn spec(provider: ProviderKind, model: &str) -> ModelSpec {
        ModelSpec::new(provider, model)
    }

    #[test]
    fn test_attempt_order_moves_preferred_to_front_without_duplicates() {
        let preferred = spec(ProviderKind::Anthropic, "fast");
        let chain = vec![
            spec(ProviderKind::Anthropic, "fast"),
            spec(ProviderKind::Anthropic, "slow"),
            spec(ProviderKind::OpenAi, "base"),
        ];

        let order = attempt_order(Some(&preferred), &chain);
        assert_eq!(
            order,
            vec![
                spec(ProviderKind::Anthropic, "fast"),
                spec(ProviderKind::Anthropic, "slow"),
                spec(ProviderKind::OpenAi, "base"),
            ]
        );
    }

    #[test]
    fn test_attempt_order_preferred_from_middle_of_chain() {
        let preferred = spec(ProviderKind::Google, "flash");
        let chain = vec![
            spec(ProviderKind::Anthropic, "sonnet"),
            spec(ProviderKind::Google, "flash"),
            spec(ProviderKind::OpenAi, "mini"),
            spec(ProviderKind::Anthropic, "sonnet"),
        ];

        let order = attempt_order(Some(&preferred), &chain);
        assert_eq!(
            order,
            vec![
                spec(ProviderKind::Google, "flash"),
                spec(ProviderKind::Anthropic, "sonnet"),
                spec(ProviderKind::OpenAi, "mini"),
            ]
        );
        let unique: HashSet<_> = order.iter().collect();
        assert_eq!(unique.len(), order.len());
    }

    #[test]
    fn test_attempt_order_same_model_different_provider_kept() {
        let preferred = spec(ProviderKind::OpenRouter, "gpt-4o");
        let chain = vec![spec(ProviderKind::OpenAi, "gpt-4o")];
        assert_eq!(attempt_order(Some(&preferred), &chain).len(), 2);
        assert_eq!(attempt_order(None, &chain), chain);
    }

    #[test]
    fn test_model_spec_parse() {
        let parsed: ModelSpec = "anthropic/claude-sonnet-4-5".parse().unwrap();
        assert_eq!(parsed, spec(ProviderKind::Anthropic, "claude-sonnet-4-5"));
        let nested: ModelSpec = "openrouter/meta-llama/llama-3.3-70b".parse().unwrap();
        assert_eq!(nested.model, "meta-llama/llama-3.3-70b");
        assert!("claude".parse::<ModelSpec>().is_err());
        assert!("mystery/model".parse::<ModelSpec>().is_err());
    }

    fn router_with(
        registry: ProviderRegistry,
        preferred: Option<ModelSpec>,
        chain: Vec<ModelSpec>,
    ) -> ModelRouter {
        let mut prefs = HashMap::new();
        if let Some(p) = preferred {
            prefs.insert(AgentRole::Implementer, p);
        }
        ModelRouter::new(
            registry,
            prefs,
            chain,
            Duration::from_millis(200),
            Duration::ZERO,
        )
    }

    #[tokio::test]
    async fn test_falls_back_and_accounts_usage() {
        let anthropic = ScriptedClient::new();
        let openai = ScriptedClient::new();
        anthropic.push(Err(LlmError::server_error(503, "overloaded".into())));
        openai.push(Ok(ChatResponse {
            content: Some("done".into()),
            usage: Some(TokenUsage::new(10, 3)),
            ..Default::default()
        }));

        let registry = ProviderRegistry::new()
            .with_client(ProviderKind::Anthropic, anthropic.clone())
            .with_client(ProviderKind::OpenAi, openai.clone());
        let router = router_with(
            registry,
            Some(spec(ProviderKind::Anthropic, "fast")),
            vec![spec(ProviderKind::OpenAi, "base")],
        );

        let response = router
            .invoke(AgentRole::Implementer, &[ChatMessage::user("hi")], None)
            .await
            .unwrap();
        assert_eq!(response.content_text(), "done");
        assert_eq!(anthropic.calls(), vec!["fast"]);
        assert_eq!(openai.calls(), vec!["base"]);

        let (current, usage) = router.snapshot();
        assert_eq!(current, "openai/base");
        assert_eq!(usage["openai/base"], TokenTally { input: 10, output: 3 });
        assert!(!usage.contains_key("anthropic/fast"));
    }

    #[tokio::test]
    async fn test_second_pass_after_total_failure() {
        let client = ScriptedClient::new();
        client.push(Err(LlmError::network_error("down".into())));
        client.push_text("recovered");

        let router = router_with(
            ProviderRegistry::new().with_client(ProviderKind::Anthropic, client.clone()),
            None,
            vec![spec(ProviderKind::Anthropic, "only")],
        );

        let response = router
            .invoke(AgentRole::Planner, &[ChatMessage::user("hi")], None)
            .await
            .unwrap();
        assert_eq!(response.content_text(), "recovered");
        assert_eq!(client.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_exhaustion_is_an_error() {
        let client = ScriptedClient::new();
        let router = router_with(
            ProviderRegistry::new().with_client(ProviderKind::Anthropic, client.clone()),
            None,
            vec![
                spec(ProviderKind::Anthropic, "a"),
                spec(ProviderKind::Google, "unconfigured"),
            ],
        );

        let err = router
            .invoke(AgentRole::Reviewer, &[ChatMessage::user("hi")], None)
            .await
            .unwrap_err();
        match err {
            RouterError::Exhausted { role, attempts, .. } => {
                assert_eq!(role, AgentRole::Reviewer);
                assert_eq!(attempts, 4);
            }
            other => panic!("unexpected error: {other}"),
        }
        // Two passes, one real call each; the unconfigured provider is skipped.
        assert_eq!(client.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_empty_chain_has_no_providers() {
        let router = router_with(ProviderRegistry::new(), None, Vec::new());
        let err = router
            .invoke(AgentRole::Committer, &[], None)
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::NoProviders { .. }));
    }

    struct SlowClient;

    #[async_trait]
    impl LlmClient for SlowClient {
        async fn chat_completion(
            &self,
            _model: &str,
            _messages: &[ChatMessage],
            _tools: Option<&[ToolDefinition]>,
        ) -> Result<ChatResponse, LlmError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(ChatResponse::text("too late"))
        }
    }

    #[tokio::test]
    async fn test_timeout_advances_to_next_provider() {
        let fallback = ScriptedClient::new();
        fallback.push_text("fast answer");
        let registry = ProviderRegistry::new()
            .with_client(ProviderKind::Anthropic, Arc::new(SlowClient))
            .with_client(ProviderKind::OpenAi, fallback.clone());
        let router = router_with(
            registry,
            None,
            vec![
                spec(ProviderKind::Anthropic, "slow"),
                spec(ProviderKind::OpenAi, "quick"),
            ],
        );

        let response = router
            .invoke(AgentRole::Implementer, &[ChatMessage::user("hi")], None)
            .await
            .unwrap();
        assert_eq!(response.content_text(), "fast answer");
        assert_eq!(router.snapshot().0, "openai/quick");
    }

    #[test]
    fn test_restore_seeds_ledger() {
        let router = router_with(ProviderRegistry::new(), None, Vec::new());
        let mut usage = BTreeMap::new();
        usage.insert("anthropic/x".to_string(), TokenTally { input: 5, output: 1 });
        router.restore("anthropic/x", &usage);
        assert_eq!(router.snapshot(), ("anthropic/x".to_string(), usage));
    }
}
