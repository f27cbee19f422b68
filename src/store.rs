//! Persistence contract and in-memory reference implementation
//!
//! The engine never talks to a database directly; everything durable goes
//! through [`TriageStore`]. Implementations must make each operation atomic
//! at single-document granularity — that atomicity is what lets distinct
//! batches for the same user run concurrently without in-process locks.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::error::{Result, TriageError};
use crate::models::{BatchCounters, BatchJob, BatchStatus, Credential, LabelRecord, MessageRecord};

/// Partial update applied to a job record. Unset fields are left untouched;
/// `errors` is appended, never replaced.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub status: Option<BatchStatus>,
    pub counters: Option<BatchCounters>,
    pub errors: Vec<String>,
    pub start_time: Option<chrono::DateTime<chrono::Utc>>,
    pub end_time: Option<chrono::DateTime<chrono::Utc>>,
}

/// Selection criteria for message queries
#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    pub processed: Option<bool>,
    pub synced: Option<bool>,
    pub limit: Option<usize>,
}

#[async_trait]
pub trait TriageStore: Send + Sync {
    async fn create_job(&self, job: &BatchJob) -> Result<()>;

    async fn update_job(&self, batch_id: &str, update: JobUpdate) -> Result<()>;

    async fn get_job(&self, batch_id: &str) -> Result<Option<BatchJob>>;

    /// Most recent jobs for a user, newest first
    async fn list_jobs(&self, user_id: &str, limit: usize) -> Result<Vec<BatchJob>>;

    /// Insert or refresh a message record, keyed `(provider_id, user_id)`.
    /// For an existing record the pipeline flags are merged forward:
    /// `processed`/`synced` stay true once true and `analysis` is never
    /// cleared, so a re-fetch cannot regress triage progress.
    async fn upsert_message(&self, record: &MessageRecord) -> Result<()>;

    async fn query_messages(
        &self,
        user_id: &str,
        filter: MessageFilter,
    ) -> Result<Vec<MessageRecord>>;

    /// Insert a label mapping if absent and return the canonical stored
    /// record. The first write wins; the provider label id is immutable.
    async fn upsert_label(&self, record: &LabelRecord) -> Result<LabelRecord>;

    async fn get_label_by_name(&self, user_id: &str, name: &str) -> Result<Option<LabelRecord>>;

    /// Atomically check the rate window for `(user_id, tag)` and record the
    /// call if it is under the ceiling. Returns false (recording nothing)
    /// when the window is already full.
    async fn rate_limit_check_and_record(
        &self,
        user_id: &str,
        tag: &str,
        ceiling: u32,
        window: Duration,
    ) -> Result<bool>;

    /// Persist a refreshed credential so later executions start from the
    /// newest token pair
    async fn save_credential(&self, user_id: &str, credential: &Credential) -> Result<()>;
}

/// In-memory [`TriageStore`] for tests and single-process embedding.
/// Per-collection mutexes give the same single-document atomicity a real
/// backend would.
#[derive(Default)]
pub struct MemoryStore {
    jobs: Mutex<HashMap<String, BatchJob>>,
    messages: Mutex<HashMap<(String, String), MessageRecord>>,
    labels: Mutex<HashMap<(String, String), LabelRecord>>,
    rate_windows: Mutex<HashMap<(String, String), VecDeque<Instant>>>,
    credentials: Mutex<HashMap<String, Credential>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last credential persisted for a user (test observability)
    pub async fn credential(&self, user_id: &str) -> Option<Credential> {
        self.credentials.lock().await.get(user_id).cloned()
    }
}

fn message_key(user_id: &str, provider_id: &str) -> (String, String) {
    (user_id.to_string(), provider_id.to_string())
}

fn label_key(user_id: &str, name: &str) -> (String, String) {
    (user_id.to_string(), name.to_lowercase())
}

#[async_trait]
impl TriageStore for MemoryStore {
    async fn create_job(&self, job: &BatchJob) -> Result<()> {
        let mut jobs = self.jobs.lock().await;
        if jobs.contains_key(&job.batch_id) {
            return Err(TriageError::Store(format!(
                "job {} already exists",
                job.batch_id
            )));
        }
        jobs.insert(job.batch_id.clone(), job.clone());
        Ok(())
    }

    async fn update_job(&self, batch_id: &str, update: JobUpdate) -> Result<()> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs
            .get_mut(batch_id)
            .ok_or_else(|| TriageError::Store(format!("unknown job {}", batch_id)))?;

        if let Some(status) = update.status {
            job.status = status;
        }
        if let Some(counters) = update.counters {
            job.counters = counters;
        }
        job.errors.extend(update.errors);
        if let Some(start_time) = update.start_time {
            job.start_time = Some(start_time);
        }
        if let Some(end_time) = update.end_time {
            job.end_time = Some(end_time);
        }
        Ok(())
    }

    async fn get_job(&self, batch_id: &str) -> Result<Option<BatchJob>> {
        Ok(self.jobs.lock().await.get(batch_id).cloned())
    }

    async fn list_jobs(&self, user_id: &str, limit: usize) -> Result<Vec<BatchJob>> {
        let jobs = self.jobs.lock().await;
        let mut matching: Vec<BatchJob> = jobs
            .values()
            .filter(|job| job.user_id == user_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matching.truncate(limit);
        Ok(matching)
    }

    async fn upsert_message(&self, record: &MessageRecord) -> Result<()> {
        let mut messages = self.messages.lock().await;
        let key = message_key(&record.user_id, &record.provider_id);
        match messages.get_mut(&key) {
            Some(existing) => {
                existing.subject = record.subject.clone();
                existing.sender = record.sender.clone();
                existing.recipient = record.recipient.clone();
                existing.snippet = record.snippet.clone();
                existing.timestamp = record.timestamp;
                existing.processed |= record.processed;
                existing.synced |= record.synced;
                if record.analysis.is_some() {
                    existing.analysis = record.analysis.clone();
                }
            }
            None => {
                messages.insert(key, record.clone());
            }
        }
        Ok(())
    }

    async fn query_messages(
        &self,
        user_id: &str,
        filter: MessageFilter,
    ) -> Result<Vec<MessageRecord>> {
        let messages = self.messages.lock().await;
        let mut matching: Vec<MessageRecord> = messages
            .values()
            .filter(|record| record.user_id == user_id)
            .filter(|record| filter.processed.map_or(true, |p| record.processed == p))
            .filter(|record| filter.synced.map_or(true, |s| record.synced == s))
            .cloned()
            .collect();
        // Stable enumeration order for sub-batch processing
        matching.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.provider_id.cmp(&b.provider_id))
        });
        if let Some(limit) = filter.limit {
            matching.truncate(limit);
        }
        Ok(matching)
    }

    async fn upsert_label(&self, record: &LabelRecord) -> Result<LabelRecord> {
        let mut labels = self.labels.lock().await;
        let key = label_key(&record.user_id, &record.name);
        match labels.get(&key) {
            Some(existing) => Ok(existing.clone()),
            None => {
                labels.insert(key, record.clone());
                Ok(record.clone())
            }
        }
    }

    async fn get_label_by_name(&self, user_id: &str, name: &str) -> Result<Option<LabelRecord>> {
        let labels = self.labels.lock().await;
        Ok(labels.get(&label_key(user_id, name)).cloned())
    }

    async fn rate_limit_check_and_record(
        &self,
        user_id: &str,
        tag: &str,
        ceiling: u32,
        window: Duration,
    ) -> Result<bool> {
        let mut windows = self.rate_windows.lock().await;
        let entries = windows
            .entry((user_id.to_string(), tag.to_string()))
            .or_default();

        let now = Instant::now();
        while entries
            .front()
            .is_some_and(|t| now.duration_since(*t) >= window)
        {
            entries.pop_front();
        }

        if entries.len() >= ceiling as usize {
            return Ok(false);
        }
        entries.push_back(now);
        Ok(true)
    }

    async fn save_credential(&self, user_id: &str, credential: &Credential) -> Result<()> {
        self.credentials
            .lock()
            .await
            .insert(user_id.to_string(), credential.clone());
        Ok(())
    }
}
