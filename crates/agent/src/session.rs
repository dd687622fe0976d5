//! The chat turn loop.
//!
//! One turn: assemble context for the user message, ask the completion
//! model, account for the call, then embed and append the new exchange.
//! Nothing is appended to the exchange store unless every step succeeds.

use crate::context::{
    ContextAssembler, EmbeddingContext, FullHistoryContext, HistorySelector, token,
};
use crate::embedder::Embedder;
use chatrecall_config::{AppConfig, ContextMode, RetrySettings};
use chatrecall_core::error::{Error, ProviderError, Result};
use chatrecall_core::message::{Message, Role};
use chatrecall_core::provider::{Provider, ProviderRequest, Usage};
use chatrecall_memory::{ExchangeStore, flatten};
use chatrecall_providers::{RetryConfig, retry_with_backoff};
use chatrecall_telemetry::{Ledger, LedgerSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Completion settings for a session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub chat_model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// Placed ahead of the context on every request.
    pub system_prompt: Option<String>,
    pub retry: RetryConfig,
}

impl SessionOptions {
    pub fn new(chat_model: impl Into<String>) -> Self {
        Self {
            chat_model: chat_model.into(),
            temperature: 0.7,
            max_tokens: None,
            system_prompt: None,
            retry: RetryConfig::default(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            chat_model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            system_prompt: config.system_prompt.clone(),
            retry: retry_policy(&config.retry),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

/// Backoff policy described by the `[retry]` config table.
pub fn retry_policy(settings: &RetrySettings) -> RetryConfig {
    RetryConfig::new()
        .with_max_attempts(settings.max_attempts)
        .with_initial_delay(Duration::from_millis(settings.initial_delay_ms))
        .with_max_delay(Duration::from_millis(settings.max_delay_ms))
        .with_backoff_multiplier(settings.backoff_multiplier)
}

/// Result of one completed turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub reply: Message,
    /// Storage id of the appended exchange.
    pub exchange_id: i64,
    /// Tokens billed for the completion call.
    pub usage: Usage,
    /// Messages sent to the completion model.
    pub prompt_messages: usize,
    pub estimated_prompt_tokens: usize,
}

/// A conversation bound to one exchange store and its usage ledgers.
pub struct ChatSession {
    id: String,
    options: SessionOptions,
    provider: Arc<dyn Provider>,
    assembler: ContextAssembler,
    store: Arc<ExchangeStore>,
    ledgers: LedgerSet,
}

impl ChatSession {
    /// Assemble a session from its parts.
    ///
    /// Fails before any billed call when the store is pinned to another
    /// embedding model or when a ledger cannot price the chat or embedding
    /// model.
    pub async fn new(
        id: impl Into<String>,
        options: SessionOptions,
        provider: Arc<dyn Provider>,
        assembler: ContextAssembler,
        store: Arc<ExchangeStore>,
        ledgers: LedgerSet,
    ) -> Result<Self> {
        store.ensure_compatible().await?;
        ledgers.ensure_known(&options.chat_model)?;
        ledgers.ensure_known(store.embedding_model())?;

        let id = id.into();
        info!(
            session = %id,
            chat_model = %options.chat_model,
            embedding_model = %store.embedding_model(),
            selector = assembler.selector().name(),
            "Chat session ready"
        );

        Ok(Self {
            id,
            options,
            provider,
            assembler,
            store,
            ledgers,
        })
    }

    /// Open (or create) the on-disk session `session_id` under the
    /// configured data directory. Usage is recorded both in the session's
    /// own ledger and in the process-wide one.
    pub async fn open(config: &AppConfig, session_id: &str, provider: Arc<dyn Provider>) -> Result<Self> {
        validate_session_id(session_id)?;

        let rates = Arc::new(config.rate_table());
        let session_ledger = Ledger::open(config.session_usage_path(session_id), rates.clone()).await?;
        let global_ledger = Ledger::open(config.global_usage_path(), rates).await?;
        let ledgers = LedgerSet::new(vec![Arc::new(session_ledger), Arc::new(global_ledger)]);

        let store = Arc::new(
            ExchangeStore::open(
                config.session_embeddings_path(session_id),
                config.context.pinned_model(),
            )
            .await?,
        );

        let options = SessionOptions::from_config(config);
        let selector: Arc<dyn HistorySelector> = match config.context.mode {
            ContextMode::FullHistory => Arc::new(FullHistoryContext::new(store.clone())),
            ContextMode::Embedding => {
                let embedder = Embedder::new(
                    provider.clone(),
                    config.context.embedding_model.clone(),
                    options.retry.clone(),
                    ledgers.clone(),
                );
                Arc::new(
                    EmbeddingContext::new(store.clone(), embedder)
                        .with_similar(config.context.similar_exchanges)
                        .with_recent(config.context.recent_exchanges),
                )
            }
        };
        let assembler = ContextAssembler::new(selector, config.assistant_name.clone());

        Self::new(session_id, options, provider, assembler, store, ledgers).await
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn store(&self) -> &Arc<ExchangeStore> {
        &self.store
    }

    pub fn ledgers(&self) -> &LedgerSet {
        &self.ledgers
    }

    /// Every stored message, oldest first.
    pub async fn history(&self) -> Result<Vec<Message>> {
        let records = self.store.load_all().await?;
        Ok(flatten(&records))
    }

    /// Run one turn for `user_input`.
    ///
    /// The exchange is appended only when every step succeeds. Usage is
    /// not rolled back: each provider call that succeeded stays recorded in
    /// the ledgers even if a later step fails the turn, so a failed turn can
    /// leave ledger rows without a stored exchange.
    pub async fn respond(&self, user_input: &str) -> Result<TurnOutcome> {
        let user = Message::user(user_input);

        let mut prompt = Vec::new();
        if let Some(system_prompt) = &self.options.system_prompt {
            prompt.push(Message::system(system_prompt.clone()));
        }
        prompt.extend(self.assembler.assemble(&user).await?);
        prompt.push(user.clone());

        let prompt_messages = prompt.len();
        let estimated_prompt_tokens = token::estimate_prompt_tokens(&prompt);
        debug!(
            session = %self.id,
            prompt_messages,
            estimated_prompt_tokens,
            "Prompt assembled"
        );

        let request = ProviderRequest {
            model: self.options.chat_model.clone(),
            messages: prompt,
            temperature: self.options.temperature,
            max_tokens: self.options.max_tokens,
        };

        let response = retry_with_backoff(
            &self.options.retry,
            || self.provider.complete(request.clone()),
            ProviderError::is_retryable,
        )
        .await
        .map_err(|e| {
            warn!(session = %self.id, attempts = e.attempts, error = %e.last_error, "Completion failed");
            Error::Provider(e.last_error)
        })?;

        let usage = response.usage.ok_or_else(|| {
            Error::Provider(ProviderError::MalformedResponse(
                "completion response has no usage".into(),
            ))
        })?;
        self.ledgers
            .record(
                Some(&self.options.chat_model),
                usage.prompt_tokens,
                usage.completion_tokens,
            )
            .await?;

        let mut reply = response.message;
        reply.role = Role::Assistant;

        let exchange = vec![user, reply.clone()];
        let embedding = self
            .assembler
            .selector()
            .embed_exchange(&exchange)
            .await?;
        let exchange_id = self
            .store
            .insert_exchange(&self.options.chat_model, &exchange, embedding.as_deref())
            .await?;

        info!(
            session = %self.id,
            exchange_id,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            "Turn complete"
        );

        Ok(TurnOutcome {
            reply,
            exchange_id,
            usage,
            prompt_messages,
            estimated_prompt_tokens,
        })
    }
}

/// Session ids name a directory, so they must be a single plain path part.
pub fn validate_session_id(id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && id != "."
        && id != ".."
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(Error::Config {
            message: format!("invalid session id '{id}'"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CONTEXT_DIRECTIVE;
    use crate::test_helpers::ScriptedProvider;
    use chatrecall_core::error::{LedgerError, MemoryError};
    use chatrecall_telemetry::RateTable;

    const EMBEDDING_MODEL: &str = "text-embedding-ada-002";

    fn fast_retry() -> RetryConfig {
        RetryConfig::new()
            .with_max_attempts(3)
            .with_initial_delay(Duration::from_millis(1))
            .with_max_delay(Duration::from_millis(2))
            .with_jitter(false)
    }

    struct Fixture {
        session: ChatSession,
        provider: Arc<ScriptedProvider>,
        ledger: Arc<Ledger>,
    }

    async fn embedding_session(provider: ScriptedProvider, options: SessionOptions) -> Fixture {
        let provider = Arc::new(provider);
        let rates = Arc::new(RateTable::with_defaults());
        let ledger = Arc::new(Ledger::in_memory(rates).await.unwrap());
        let ledgers = LedgerSet::new(vec![ledger.clone()]);
        let store = Arc::new(ExchangeStore::in_memory(EMBEDDING_MODEL).await.unwrap());
        let embedder = Embedder::new(provider.clone(), EMBEDDING_MODEL, fast_retry(), ledgers.clone());
        let selector = Arc::new(EmbeddingContext::new(store.clone(), embedder));
        let assembler = ContextAssembler::new(selector, "Buddy");

        let session = ChatSession::new(
            "test",
            options.with_retry(fast_retry()),
            provider.clone(),
            assembler,
            store,
            ledgers,
        )
        .await
        .unwrap();

        Fixture {
            session,
            provider,
            ledger,
        }
    }

    #[tokio::test]
    async fn turn_stores_exchange_and_records_usage() {
        let fx = embedding_session(
            ScriptedProvider::new().reply("hi there", 100, 50),
            SessionOptions::new("gpt-4"),
        )
        .await;

        let outcome = fx.session.respond("hello").await.unwrap();
        assert_eq!(outcome.reply.content, "hi there");
        assert_eq!(outcome.usage.prompt_tokens, 100);
        // directive + user message
        assert_eq!(outcome.prompt_messages, 2);

        let records = fx.session.store().load_all().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, outcome.exchange_id);
        assert_eq!(records[0].chat_model, "gpt-4");
        assert_eq!(records[0].message_exchange[0].content, "hello");
        assert_eq!(records[0].message_exchange[1].content, "hi there");
        assert!(!records[0].embedding.is_empty());
        assert_eq!(
            fx.session.store().get_embedding_model().await.unwrap().as_deref(),
            Some(EMBEDDING_MODEL)
        );

        // query embedding, completion, exchange embedding
        let usage = fx.ledger.records().await.unwrap();
        let models: Vec<&str> = usage.iter().map(|r| r.model.as_str()).collect();
        assert_eq!(models, vec![EMBEDDING_MODEL, "gpt-4", EMBEDDING_MODEL]);
        assert_eq!(usage[1].input_tokens, 100);
        assert_eq!(usage[1].output_tokens, 50);

        assert_eq!(
            fx.provider.embed_inputs(),
            vec!["hello".to_string(), "user: hello\nassistant: hi there".to_string()]
        );
    }

    #[tokio::test]
    async fn prompt_order_is_system_history_directive_user() {
        let fx = embedding_session(
            ScriptedProvider::new().reply("one", 1, 1).reply("two", 1, 1),
            SessionOptions::new("gpt-4").with_system_prompt("Be brief."),
        )
        .await;

        fx.session.respond("first").await.unwrap();
        fx.session.respond("second").await.unwrap();

        let requests = fx.provider.requests();
        let second: Vec<(Role, &str)> = requests[1]
            .messages
            .iter()
            .map(|m| (m.role, m.content.as_str()))
            .collect();
        assert_eq!(
            second,
            vec![
                (Role::System, "Be brief."),
                (Role::User, "first"),
                (Role::Assistant, "one"),
                (Role::System, CONTEXT_DIRECTIVE),
                (Role::User, "second"),
            ]
        );
        assert_eq!(requests[1].model, "gpt-4");
    }

    #[tokio::test]
    async fn transient_completion_failure_is_retried() {
        let fx = embedding_session(
            ScriptedProvider::new()
                .fail_completion(ProviderError::ApiError {
                    status_code: 503,
                    message: "overloaded".into(),
                })
                .reply("ok", 3, 1),
            SessionOptions::new("gpt-4"),
        )
        .await;

        let outcome = fx.session.respond("hello").await.unwrap();
        assert_eq!(outcome.reply.content, "ok");
        assert_eq!(fx.provider.requests().len(), 2);

        let completions = fx
            .ledger
            .records()
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.model == "gpt-4")
            .count();
        assert_eq!(completions, 1);
    }

    #[tokio::test]
    async fn failed_completion_writes_no_exchange() {
        let fx = embedding_session(
            ScriptedProvider::new().fail_completion(ProviderError::AuthenticationFailed("bad".into())),
            SessionOptions::new("gpt-4"),
        )
        .await;

        let err = fx.session.respond("hello").await.unwrap_err();
        assert!(matches!(err, Error::Provider(ProviderError::AuthenticationFailed(_))));
        assert_eq!(fx.session.store().count().await.unwrap(), 0);
        assert_eq!(fx.session.store().get_embedding_model().await.unwrap(), None);

        // The query embedding was billed and stays billed.
        let usage = fx.ledger.records().await.unwrap();
        assert_eq!(usage.len(), 1);
        assert_eq!(usage[0].model, EMBEDDING_MODEL);
    }

    #[tokio::test]
    async fn completion_without_usage_fails_unbilled() {
        let fx = embedding_session(
            ScriptedProvider::new().reply_without_usage("hi"),
            SessionOptions::new("gpt-4"),
        )
        .await;

        let err = fx.session.respond("hello").await.unwrap_err();
        assert!(matches!(err, Error::Provider(ProviderError::MalformedResponse(_))));
        assert_eq!(fx.session.store().count().await.unwrap(), 0);

        let usage = fx.ledger.records().await.unwrap();
        assert!(usage.iter().all(|r| r.model != "gpt-4"));
        assert_eq!(usage.len(), 1);
    }

    #[tokio::test]
    async fn failed_exchange_embedding_keeps_billed_usage() {
        let fx = embedding_session(
            ScriptedProvider::new()
                .reply("hi", 10, 5)
                .with_embed_fn(|text| if text.contains('\n') { vec![] } else { vec![1.0, 0.0] }),
            SessionOptions::new("gpt-4"),
        )
        .await;

        assert!(fx.session.respond("hello").await.is_err());
        assert_eq!(fx.session.store().count().await.unwrap(), 0);

        // Query embedding and completion were billed before the failure.
        let usage = fx.ledger.records().await.unwrap();
        let models: Vec<&str> = usage.iter().map(|r| r.model.as_str()).collect();
        assert_eq!(models, vec![EMBEDDING_MODEL, "gpt-4"]);
    }

    #[tokio::test]
    async fn failed_exchange_embedding_writes_no_exchange() {
        let fx = embedding_session(
            ScriptedProvider::new()
                .reply("hi", 1, 1)
                .with_embed_fn(|text| if text.contains('\n') { vec![] } else { vec![1.0, 0.0] }),
            SessionOptions::new("gpt-4"),
        )
        .await;

        assert!(fx.session.respond("hello").await.is_err());
        assert_eq!(fx.session.store().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn pin_mismatch_fails_before_any_call() {
        let provider = Arc::new(ScriptedProvider::new());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("embeddings.db");

        let first = ExchangeStore::open(&path, "text-embedding-3-small").await.unwrap();
        first
            .insert_exchange("gpt-4", &[Message::user("a"), Message::assistant("b")], Some(&[1.0]))
            .await
            .unwrap();
        drop(first);

        let store = Arc::new(ExchangeStore::open(&path, EMBEDDING_MODEL).await.unwrap());
        let ledgers = LedgerSet::new(vec![Arc::new(
            Ledger::in_memory(Arc::new(RateTable::with_defaults())).await.unwrap(),
        )]);
        let assembler = ContextAssembler::new(Arc::new(FullHistoryContext::new(store.clone())), "Buddy");

        let err = ChatSession::new(
            "test",
            SessionOptions::new("gpt-4"),
            provider.clone(),
            assembler,
            store,
            ledgers,
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, Error::Memory(MemoryError::EmbeddingModelMismatch { .. })));
        assert!(provider.requests().is_empty());
        assert!(provider.embed_inputs().is_empty());
    }

    #[tokio::test]
    async fn unknown_chat_model_fails_at_construction() {
        let store = Arc::new(ExchangeStore::in_memory(EMBEDDING_MODEL).await.unwrap());
        let ledgers = LedgerSet::new(vec![Arc::new(
            Ledger::in_memory(Arc::new(RateTable::with_defaults())).await.unwrap(),
        )]);
        let assembler = ContextAssembler::new(Arc::new(FullHistoryContext::new(store.clone())), "Buddy");

        let err = ChatSession::new(
            "test",
            SessionOptions::new("no-such-model"),
            Arc::new(ScriptedProvider::new()),
            assembler,
            store,
            ledgers,
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, Error::Ledger(LedgerError::UnknownModel(_))));
    }

    #[tokio::test]
    async fn open_lays_out_session_files() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig {
            data_dir: Some(dir.path().to_path_buf()),
            model: "gpt-4".into(),
            context: chatrecall_config::ContextConfig {
                mode: ContextMode::FullHistory,
                ..Default::default()
            },
            ..AppConfig::default()
        };
        let provider = Arc::new(ScriptedProvider::new().reply("hi", 10, 5));

        let session = ChatSession::open(&config, "abc", provider.clone()).await.unwrap();
        session.respond("hello").await.unwrap();

        assert!(config.session_embeddings_path("abc").exists());
        assert!(config.session_usage_path("abc").exists());
        assert!(config.global_usage_path().exists());
        assert!(provider.embed_inputs().is_empty());
        assert_eq!(session.history().await.unwrap().len(), 2);

        for ledger in session.ledgers().iter() {
            let summary = ledger.summarize().await.unwrap();
            let gpt4 = summary.get("gpt-4").unwrap();
            assert_eq!(gpt4.input_tokens, 10);
            assert_eq!(gpt4.output_tokens, 5);
        }
    }

    #[tokio::test]
    async fn open_rejects_path_like_session_ids() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig {
            data_dir: Some(dir.path().to_path_buf()),
            ..AppConfig::default()
        };
        for id in ["", "..", "a/b"] {
            let result = ChatSession::open(&config, id, Arc::new(ScriptedProvider::new())).await;
            assert!(matches!(result, Err(Error::Config { .. })), "id {id:?}");
        }
    }

    #[test]
    fn retry_policy_follows_settings() {
        let settings = RetrySettings {
            max_attempts: 5,
            initial_delay_ms: 10,
            max_delay_ms: 100,
            backoff_multiplier: 3.0,
        };
        let policy = retry_policy(&settings);
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.initial_delay, Duration::from_millis(10));
        assert_eq!(policy.max_delay, Duration::from_millis(100));
        assert_eq!(policy.backoff_multiplier, 3.0);
    }
}
