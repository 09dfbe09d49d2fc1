//! Gateway to the external multimodal inference service.
//!
//! Owns the cached transport (keyed by credential/model/endpoint so a config
//! rotation takes effect on the very next call), the transient-failure retry
//! loop, and token-usage metering. Debug mode never reaches this module.

pub mod parse;
pub mod prompts;
pub mod transport;

use std::{sync::Arc, time::Duration};

use chrono::{NaiveDate, Utc};
use rand::Rng;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{
    config::ConfigStore,
    db::{
        models::{RequestKind, TokenUsageRecord},
        Database,
    },
    error::InferenceError,
};
use parse::{CardDraft, ObservationDraft};
use transport::{ArkTransport, ChatTransport, TokenCounts};

const ENABLE_LOGS: bool = true;
use crate::{log_info, log_warn};

const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_secs(2);

/// Cache key for the transport. A change in any field invalidates the
/// cached client on the next call.
#[derive(Clone, PartialEq, Eq)]
pub struct GatewayKey {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

struct CachedTransport {
    key: GatewayKey,
    transport: Arc<dyn ChatTransport>,
}

pub type TransportFactory = Arc<dyn Fn(&GatewayKey) -> Arc<dyn ChatTransport> + Send + Sync>;

enum ChatPayload<'a> {
    Video { video: &'a [u8], prompt: String },
    Text { prompt: String },
}

pub struct InferenceGateway {
    db: Database,
    config: Arc<ConfigStore>,
    cached: Mutex<Option<CachedTransport>>,
    factory: TransportFactory,
}

impl InferenceGateway {
    pub fn new(db: Database, config: Arc<ConfigStore>) -> Self {
        Self::with_factory(
            db,
            config,
            Arc::new(|key: &GatewayKey| {
                Arc::new(ArkTransport::new(key.base_url.clone(), key.api_key.clone()))
                    as Arc<dyn ChatTransport>
            }),
        )
    }

    /// Inject a transport builder. Tests use this to count rebuilds and to
    /// substitute a scripted service.
    pub fn with_factory(db: Database, config: Arc<ConfigStore>, factory: TransportFactory) -> Self {
        Self {
            db,
            config,
            cached: Mutex::new(None),
            factory,
        }
    }

    fn current_key(&self) -> GatewayKey {
        GatewayKey {
            base_url: self.config.string("inference.base_url"),
            api_key: self.config.string("secrets.api_key"),
            model: self.config.string("analysis.model"),
        }
    }

    /// Return the transport for `key`, rebuilding under a short exclusive
    /// section only when the key changed. The replacement is built fresh and
    /// swapped in whole, never mutated in place.
    async fn transport_for(&self, key: &GatewayKey) -> Arc<dyn ChatTransport> {
        let mut guard = self.cached.lock().await;
        if let Some(cached) = guard.as_ref() {
            if cached.key == *key {
                return cached.transport.clone();
            }
            log_info!("Inference credential/model changed, rebuilding client");
        }
        let transport = (self.factory)(key);
        *guard = Some(CachedTransport {
            key: key.clone(),
            transport: transport.clone(),
        });
        transport
    }

    /// Stage 1: video bytes to observation drafts. `window_secs` bounds the
    /// timestamps the prompt allows.
    pub async fn transcribe(
        &self,
        video: &[u8],
        window_secs: i64,
        batch_id: Option<&str>,
    ) -> Result<Vec<ObservationDraft>, InferenceError> {
        let prompt = prompts::transcription_prompt(&prompts::format_offset(window_secs));
        let content = self
            .execute_chat(
                ChatPayload::Video { video, prompt },
                RequestKind::Transcribe,
                batch_id,
            )
            .await?;
        parse::parse_observations(&content)
    }

    /// Stage 2: formatted observations to card drafts anchored on `date`.
    pub async fn generate_cards(
        &self,
        observations_text: &str,
        existing_cards_json: &str,
        date: NaiveDate,
        batch_id: Option<&str>,
    ) -> Result<Vec<CardDraft>, InferenceError> {
        let prompt = prompts::activity_cards_prompt(observations_text, existing_cards_json);
        let content = self
            .execute_chat(
                ChatPayload::Text { prompt },
                RequestKind::GenerateCards,
                batch_id,
            )
            .await?;
        parse::parse_cards(&content, date)
    }

    async fn execute_chat(
        &self,
        payload: ChatPayload<'_>,
        kind: RequestKind,
        batch_id: Option<&str>,
    ) -> Result<String, InferenceError> {
        let mut attempt = 0;
        loop {
            attempt += 1;

            // Re-read config on every attempt so a credential rotation
            // between retries is honored too.
            let key = self.current_key();
            let transport = self.transport_for(&key).await;

            let result = match &payload {
                ChatPayload::Video { video, prompt } => {
                    transport.chat_video(video, prompt, &key.model).await
                }
                ChatPayload::Text { prompt } => transport.chat_text(prompt, &key.model).await,
            };

            match result {
                Ok(completion) => {
                    self.record_usage(kind, &key.model, completion.usage, batch_id)
                        .await;
                    return Ok(completion.content);
                }
                Err(err) => {
                    // The service saw the request, so the audit trail gets a
                    // row even though the call failed.
                    if err.reached_service() {
                        self.record_usage(kind, &key.model, None, batch_id).await;
                    }
                    if err.is_transient() && attempt < MAX_ATTEMPTS {
                        let delay = backoff_delay(attempt);
                        log_warn!(
                            "{} attempt {attempt}/{MAX_ATTEMPTS} failed ({err}), retrying in {delay:?}",
                            kind.as_str()
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(err);
                }
            }
        }
    }

    async fn record_usage(
        &self,
        kind: RequestKind,
        model: &str,
        usage: Option<TokenCounts>,
        batch_id: Option<&str>,
    ) {
        let counts = usage.unwrap_or_default();
        let record = TokenUsageRecord {
            id: format!("tok_{}", Uuid::new_v4()),
            request_kind: kind,
            model: model.to_string(),
            prompt_tokens: counts.prompt_tokens,
            completion_tokens: counts.completion_tokens,
            total_tokens: counts.total_tokens,
            batch_id: batch_id.map(|id| id.to_string()),
            created_at: Utc::now(),
        };
        // Metering must not fail the analysis call.
        if let Err(err) = self.db.append_token_usage(&record).await {
            log_warn!("Failed to record token usage: {err:?}");
        }
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let exp = BACKOFF_BASE * 2u32.saturating_pow(attempt - 1);
    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..500));
    exp + jitter
}
