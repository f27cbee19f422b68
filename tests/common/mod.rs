//! Shared fakes for orchestrator integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

use mail_triage::error::{Result, TriageError};
use mail_triage::models::{Category, ClassificationResult, Credential, MessageRecord, Sentiment};
use mail_triage::provider::{
    ClassificationProvider, LabelInfo, MailProvider, MessagePage, ProviderMessage,
};
use mail_triage::{BatchConfig, ClassificationConfig, Config, RateLimitConfig};

/// Opt-in tracing output for debugging test runs (RUST_LOG=debug)
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Stateful in-memory mail provider with fault injection
pub struct FakeMailProvider {
    messages: Vec<ProviderMessage>,
    /// Provider-side cap on listing page length
    page_cap: usize,
    /// Message ids whose metadata fetch fails
    broken_ids: Vec<String>,
    /// Upcoming provider calls that fail with an authorization error
    auth_failures: AtomicUsize,
    refresh_ok: bool,
    pub refresh_calls: AtomicUsize,
    label_counter: AtomicUsize,
    labels: Mutex<HashMap<String, String>>,
    /// `(message_id, label_ids)` for every successful apply
    pub applied: Mutex<Vec<(String, Vec<String>)>>,
}

impl FakeMailProvider {
    pub fn new(messages: Vec<ProviderMessage>) -> Self {
        Self {
            messages,
            page_cap: 10,
            broken_ids: Vec::new(),
            auth_failures: AtomicUsize::new(0),
            refresh_ok: true,
            refresh_calls: AtomicUsize::new(0),
            label_counter: AtomicUsize::new(0),
            labels: Mutex::new(HashMap::new()),
            applied: Mutex::new(Vec::new()),
        }
    }

    pub fn with_page_cap(mut self, page_cap: usize) -> Self {
        self.page_cap = page_cap;
        self
    }

    pub fn with_broken_ids(mut self, ids: Vec<String>) -> Self {
        self.broken_ids = ids;
        self
    }

    /// The next `count` provider calls fail with an authorization error
    pub fn with_auth_failures(self, count: usize) -> Self {
        self.auth_failures.store(count, Ordering::SeqCst);
        self
    }

    pub fn with_refresh_failing(mut self) -> Self {
        self.refresh_ok = false;
        self
    }

    fn check_auth(&self) -> Result<()> {
        let remaining = self.auth_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.auth_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(TriageError::AuthExpired("token expired".to_string()));
        }
        Ok(())
    }

    pub async fn applied_count(&self) -> usize {
        self.applied.lock().await.len()
    }

    pub async fn label_count(&self) -> usize {
        self.labels.lock().await.len()
    }
}

#[async_trait]
impl MailProvider for FakeMailProvider {
    async fn list_messages(
        &self,
        _credential: &Credential,
        _query: &str,
        page_token: Option<&str>,
        page_size: usize,
    ) -> Result<MessagePage> {
        self.check_auth()?;

        let offset: usize = page_token.map(|t| t.parse().unwrap_or(0)).unwrap_or(0);
        let len = page_size.min(self.page_cap);
        let ids: Vec<String> = self
            .messages
            .iter()
            .skip(offset)
            .take(len)
            .map(|m| m.provider_id.clone())
            .collect();

        let next = offset + ids.len();
        let next_page_token = if next < self.messages.len() {
            Some(next.to_string())
        } else {
            None
        };
        Ok(MessagePage {
            ids,
            next_page_token,
        })
    }

    async fn get_message_metadata(
        &self,
        _credential: &Credential,
        id: &str,
    ) -> Result<ProviderMessage> {
        self.check_auth()?;

        if self.broken_ids.iter().any(|broken| broken == id) {
            return Err(TriageError::Provider(format!("metadata for {id} unavailable")));
        }
        self.messages
            .iter()
            .find(|m| m.provider_id == id)
            .cloned()
            .ok_or_else(|| TriageError::Provider(format!("unknown message {id}")))
    }

    async fn create_label(&self, _credential: &Credential, name: &str) -> Result<String> {
        self.check_auth()?;

        let mut labels = self.labels.lock().await;
        let key = name.to_lowercase();
        if labels.contains_key(&key) {
            return Err(TriageError::Provider(format!("label '{name}' already exists")));
        }
        let id = format!("L{}", self.label_counter.fetch_add(1, Ordering::SeqCst));
        labels.insert(key, id.clone());
        Ok(id)
    }

    async fn list_labels(&self, _credential: &Credential) -> Result<Vec<LabelInfo>> {
        self.check_auth()?;

        Ok(self
            .labels
            .lock()
            .await
            .iter()
            .map(|(name, id)| LabelInfo {
                id: id.clone(),
                name: name.clone(),
            })
            .collect())
    }

    async fn modify_message_labels(
        &self,
        _credential: &Credential,
        id: &str,
        add_label_ids: &[String],
    ) -> Result<()> {
        self.check_auth()?;

        self.applied
            .lock()
            .await
            .push((id.to_string(), add_label_ids.to_vec()));
        Ok(())
    }

    async fn refresh_credential(&self, _refresh_token: &str) -> Result<Credential> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        if self.refresh_ok {
            Ok(Credential::new("refreshed-access", "refreshed-refresh"))
        } else {
            Err(TriageError::Provider("invalid_grant".to_string()))
        }
    }
}

/// AI backend that only ever produces prose, never a decodable payload
pub struct GarbageAiProvider;

#[async_trait]
impl ClassificationProvider for GarbageAiProvider {
    async fn generate(&self, _prompt: &str) -> Result<String> {
        Ok("This looks like a perfectly pleasant email to me!".to_string())
    }
}

/// AI backend that never answers within any reasonable deadline
pub struct SlowAiProvider;

#[async_trait]
impl ClassificationProvider for SlowAiProvider {
    async fn generate(&self, _prompt: &str) -> Result<String> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok("{}".to_string())
    }
}

/// Deterministic sample mailbox cycling through three rule-detectable kinds
pub fn sample_messages(count: usize) -> Vec<ProviderMessage> {
    (0..count)
        .map(|i| {
            let (subject, sender) = match i % 3 {
                0 => (
                    format!("Your order confirmation #{i}"),
                    "orders@shop.example".to_string(),
                ),
                1 => (
                    format!("Weekly digest issue {i}"),
                    "news@letters.example".to_string(),
                ),
                _ => (
                    format!("Security alert {i}"),
                    "alerts@service.example".to_string(),
                ),
            };
            ProviderMessage {
                provider_id: format!("m{i:03}"),
                subject,
                sender,
                recipient: "user@example.com".to_string(),
                snippet: "sample snippet".to_string(),
                timestamp: Utc::now() - chrono::Duration::minutes((count - i) as i64),
            }
        })
        .collect()
}

/// A message record as it looks after fetch (unprocessed)
pub fn unprocessed_record(user_id: &str, message: &ProviderMessage) -> MessageRecord {
    MessageRecord {
        provider_id: message.provider_id.clone(),
        user_id: user_id.to_string(),
        subject: message.subject.clone(),
        sender: message.sender.clone(),
        recipient: message.recipient.clone(),
        snippet: message.snippet.clone(),
        timestamp: message.timestamp,
        processed: false,
        synced: false,
        analysis: None,
    }
}

/// A record that has been classified but not yet labeled provider-side
pub fn analyzed_record(user_id: &str, message: &ProviderMessage, label: &str) -> MessageRecord {
    let mut record = unprocessed_record(user_id, message);
    record.processed = true;
    record.analysis = Some(ClassificationResult {
        category: Category::Newsletter,
        summary: message.subject.clone(),
        sentiment: Sentiment::Neutral,
        suggested_label: label.to_string(),
    });
    record
}

/// Fast test configuration: no throttle delay, rules-only classification
pub fn test_config() -> Config {
    Config {
        classification: ClassificationConfig {
            enabled: false,
            ..Default::default()
        },
        rate_limit: RateLimitConfig::default(),
        batch: BatchConfig {
            chunk_size: 5,
            chunk_delay_ms: 0,
            page_size: 10,
            request_timeout_secs: 5,
        },
    }
}

/// Same as [`test_config`] but with the AI path enabled and a short deadline
pub fn ai_config() -> Config {
    let mut config = test_config();
    config.classification.enabled = true;
    config.classification.request_timeout_secs = 1;
    config
}
