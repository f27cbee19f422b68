//! Batch orchestration engine
//!
//! Turns a declarative `(operation, options)` request into a tracked,
//! resumable, partially-failable sequence of remote calls. One job record per
//! request, single writer, lifecycle `created → running → {completed,
//! failed}`. Item-scoped failures are counted and logged without aborting the
//! enclosing sub-batch; step-scoped failures and reauthentication mark the
//! job failed and surface to the caller.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::classifier::ClassificationEngine;
use crate::config::{BatchConfig, Config};
use crate::error::{Result, TriageError};
use crate::guard::CredentialGuard;
use crate::labels::LabelResolver;
use crate::models::{
    BatchCounters, BatchJob, BatchOperation, BatchOptions, BatchStatus, Credential, MessageRecord,
};
use crate::provider::{ClassificationProvider, MailProvider, MessagePage, ProviderMessage};
use crate::rate_limiter::RateLimiter;
use crate::store::{JobUpdate, MessageFilter, TriageStore};

/// Requested total when the caller leaves `batch_size` unset
const DEFAULT_BATCH_SIZE: usize = 100;

/// Running result of one sub-procedure. `errors` holds diagnostics not yet
/// flushed to the job record by a checkpoint.
#[derive(Debug, Default)]
struct StepOutcome {
    counters: BatchCounters,
    errors: Vec<String>,
}

impl StepOutcome {
    fn push_error(&mut self, message: String) {
        self.errors.push(message);
    }

    fn absorb(&mut self, other: StepOutcome) {
        self.counters.merge(&other.counters);
        self.errors.extend(other.errors);
    }
}

/// Enforce a deadline on a remote call; elapsed deadlines count as failures
async fn timed<T, F>(deadline: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(TriageError::Timeout(deadline.as_secs())),
    }
}

pub struct BatchOrchestrator {
    store: Arc<dyn TriageStore>,
    provider: Arc<dyn MailProvider>,
    guard: CredentialGuard,
    classifier: ClassificationEngine,
    labels: LabelResolver,
    config: BatchConfig,
}

impl BatchOrchestrator {
    pub fn new(
        store: Arc<dyn TriageStore>,
        provider: Arc<dyn MailProvider>,
        ai: Option<Arc<dyn ClassificationProvider>>,
        config: Config,
    ) -> Self {
        let limiter = RateLimiter::from_config(Arc::clone(&store), &config.rate_limit);
        let classifier = ClassificationEngine::new(ai, limiter, config.classification);
        let labels = LabelResolver::new(Arc::clone(&provider), Arc::clone(&store));
        let guard = CredentialGuard::new(Arc::clone(&provider), Arc::clone(&store));
        Self {
            store,
            provider,
            guard,
            classifier,
            labels,
            config: config.batch,
        }
    }

    /// Validate and persist a new job in `created`. Execution does not start
    /// here.
    pub async fn create(
        &self,
        user_id: &str,
        operation: BatchOperation,
        options: BatchOptions,
    ) -> Result<String> {
        if let Some(size) = options.batch_size {
            if size < 1 {
                return Err(TriageError::Validation(
                    "batchSize must be at least 1".to_string(),
                ));
            }
            let ceiling = operation.max_batch_size();
            if size > ceiling {
                return Err(TriageError::Validation(format!(
                    "batchSize {} exceeds the ceiling of {} for {}",
                    size,
                    ceiling,
                    operation.as_str()
                )));
            }
        }

        let job = BatchJob::new(user_id, operation, options);
        let batch_id = job.batch_id.clone();
        self.store.create_job(&job).await?;
        info!(batch_id = %batch_id, operation = operation.as_str(), user_id, "created batch job");
        Ok(batch_id)
    }

    /// Run a created job to completion or failure. The job record is the
    /// durable account of what happened; the caller additionally learns
    /// synchronously.
    pub async fn execute(&self, batch_id: &str, credential: Credential) -> Result<BatchCounters> {
        let mut credential = credential;

        let job = self
            .store
            .get_job(batch_id)
            .await?
            .ok_or_else(|| TriageError::NotFound(batch_id.to_string()))?;
        if job.status != BatchStatus::Created {
            return Err(TriageError::Validation(format!(
                "batch {} is {} and cannot be executed",
                batch_id,
                job.status.as_str()
            )));
        }

        self.store
            .update_job(
                batch_id,
                JobUpdate {
                    status: Some(BatchStatus::Running),
                    start_time: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await?;
        info!(batch_id, operation = job.operation.as_str(), "batch running");

        match self.dispatch(&job, &mut credential).await {
            Ok(outcome) => {
                self.store
                    .update_job(
                        batch_id,
                        JobUpdate {
                            status: Some(BatchStatus::Completed),
                            counters: Some(outcome.counters.clone()),
                            errors: outcome.errors,
                            end_time: Some(Utc::now()),
                            ..Default::default()
                        },
                    )
                    .await?;
                info!(
                    batch_id,
                    emails_processed = outcome.counters.emails_processed,
                    "batch completed"
                );
                Ok(outcome.counters)
            }
            Err(err) => {
                warn!(batch_id, "batch failed: {err}");
                let update = JobUpdate {
                    status: Some(BatchStatus::Failed),
                    errors: vec![err.to_string()],
                    end_time: Some(Utc::now()),
                    ..Default::default()
                };
                if let Err(store_err) = self.store.update_job(batch_id, update).await {
                    warn!(batch_id, "could not record batch failure: {store_err}");
                }
                Err(err)
            }
        }
    }

    /// Read-only snapshot of a job record
    pub async fn status(&self, batch_id: &str) -> Result<BatchJob> {
        self.store
            .get_job(batch_id)
            .await?
            .ok_or_else(|| TriageError::NotFound(batch_id.to_string()))
    }

    /// Most recent jobs for a user, newest first
    pub async fn history(&self, user_id: &str, limit: usize) -> Result<Vec<BatchJob>> {
        self.store.list_jobs(user_id, limit).await
    }

    async fn dispatch(&self, job: &BatchJob, credential: &mut Credential) -> Result<StepOutcome> {
        let base = BatchCounters::default();
        match job.operation {
            BatchOperation::FetchEmails => self.fetch_emails(job, credential, &base).await,
            BatchOperation::AnalyzeEmails => self.analyze_emails(job, credential, &base).await,
            BatchOperation::CreateLabels => self.create_labels(job, credential, &base).await,
            BatchOperation::AssignLabels => self.assign_labels(job, credential, &base).await,
            BatchOperation::OrganizeLabels => {
                // Label maintenance for already-analyzed data: create the
                // missing labels, then apply them.
                let mut total = StepOutcome::default();
                let step = self.create_labels(job, credential, &base).await?;
                total.absorb(step);
                let step = self.assign_labels(job, credential, &total.counters).await?;
                total.absorb(step);
                Ok(total)
            }
            BatchOperation::FullProcess => {
                // Fixed order: each step's precondition is the previous
                // step's postcondition.
                let mut total = StepOutcome::default();
                let step = self.fetch_emails(job, credential, &base).await?;
                total.absorb(step);
                let step = self.analyze_emails(job, credential, &total.counters).await?;
                total.absorb(step);
                let step = self.create_labels(job, credential, &total.counters).await?;
                total.absorb(step);
                let step = self.assign_labels(job, credential, &total.counters).await?;
                total.absorb(step);
                Ok(total)
            }
        }
    }

    /// Page through the provider listing and upsert message metadata until
    /// the requested total is reached or pages run out
    async fn fetch_emails(
        &self,
        job: &BatchJob,
        credential: &mut Credential,
        base: &BatchCounters,
    ) -> Result<StepOutcome> {
        let target = job.options.batch_size.unwrap_or(DEFAULT_BATCH_SIZE);
        let query = job.options.query.clone().unwrap_or_default();
        let mut outcome = StepOutcome::default();
        let mut page_token: Option<String> = None;
        let mut fetched = 0usize;
        let mut chunk_index = 0usize;

        loop {
            let page_size = self.config.page_size.min(target - fetched);
            let page = self
                .list_page(&job.user_id, credential, &query, page_token.as_deref(), page_size)
                .await?;
            let ids: Vec<String> = page.ids.into_iter().take(target - fetched).collect();
            debug!(batch_id = %job.batch_id, page_len = ids.len(), "fetched listing page");

            for chunk in ids.chunks(self.config.chunk_size) {
                self.throttle(chunk_index).await;
                chunk_index += 1;

                let results = self.fetch_chunk(&job.user_id, credential, chunk).await?;
                for (id, result) in results {
                    match result {
                        Ok(message) => {
                            let record = message_record(&job.user_id, message);
                            match self.store.upsert_message(&record).await {
                                Ok(()) => {
                                    fetched += 1;
                                    outcome.counters.emails_processed += 1;
                                    outcome.counters.emails_total += 1;
                                }
                                Err(e) => {
                                    warn!(batch_id = %job.batch_id, id = %id, "message upsert failed: {e}");
                                    outcome.push_error(format!("message {id}: {e}"));
                                }
                            }
                        }
                        Err(e) => {
                            // One message's failure never aborts the page
                            warn!(batch_id = %job.batch_id, id = %id, "message fetch failed, skipping: {e}");
                            outcome.push_error(format!("message {id}: {e}"));
                        }
                    }
                }
                self.checkpoint(&job.batch_id, base, &mut outcome).await;
            }

            page_token = page.next_page_token;
            if fetched >= target || page_token.is_none() {
                break;
            }
        }

        Ok(outcome)
    }

    /// Classify unprocessed records and persist their analysis
    async fn analyze_emails(
        &self,
        job: &BatchJob,
        _credential: &mut Credential,
        base: &BatchCounters,
    ) -> Result<StepOutcome> {
        let limit = job
            .options
            .limit
            .or(job.options.batch_size)
            .unwrap_or(DEFAULT_BATCH_SIZE);
        let records = self
            .store
            .query_messages(
                &job.user_id,
                MessageFilter {
                    processed: Some(false),
                    limit: Some(limit),
                    ..Default::default()
                },
            )
            .await?;

        let mut outcome = StepOutcome::default();
        outcome.counters.emails_total = records.len();
        debug!(batch_id = %job.batch_id, count = records.len(), "analyzing messages");

        for (index, chunk) in records.chunks(self.config.chunk_size).enumerate() {
            self.throttle(index).await;

            for record in chunk {
                // Classification is total; only the persistence can fail here
                let analysis = self
                    .classifier
                    .classify(&record.subject, &record.sender, &record.snippet, &job.user_id)
                    .await;

                let mut updated = record.clone();
                updated.analysis = Some(analysis);
                updated.processed = true;
                match self.store.upsert_message(&updated).await {
                    Ok(()) => outcome.counters.emails_processed += 1,
                    Err(e) => {
                        warn!(batch_id = %job.batch_id, id = %record.provider_id, "analysis upsert failed: {e}");
                        outcome.push_error(format!("message {}: {e}", record.provider_id));
                    }
                }
            }
            self.checkpoint(&job.batch_id, base, &mut outcome).await;
        }

        Ok(outcome)
    }

    /// Resolve the distinct suggested labels across processed records,
    /// creating the missing ones
    async fn create_labels(
        &self,
        job: &BatchJob,
        credential: &mut Credential,
        base: &BatchCounters,
    ) -> Result<StepOutcome> {
        let records = self
            .store
            .query_messages(
                &job.user_id,
                MessageFilter {
                    processed: Some(true),
                    ..Default::default()
                },
            )
            .await?;

        // Distinct labels in first-seen order
        let mut seen = HashSet::new();
        let mut names = Vec::new();
        for record in &records {
            if let Some(analysis) = &record.analysis {
                if seen.insert(analysis.suggested_label.to_lowercase()) {
                    names.push(analysis.suggested_label.clone());
                }
            }
        }

        let mut outcome = StepOutcome::default();
        debug!(batch_id = %job.batch_id, count = names.len(), "resolving labels");

        for (index, chunk) in names.chunks(self.config.chunk_size).enumerate() {
            self.throttle(index).await;

            for name in chunk {
                match self.labels.resolve(&job.user_id, name, credential).await {
                    Ok(resolved) => {
                        if resolved.created {
                            outcome.counters.labels_created += 1;
                        } else {
                            outcome.counters.labels_used += 1;
                        }
                    }
                    Err(e) if e.requires_reauth() => return Err(e),
                    Err(e) => {
                        warn!(batch_id = %job.batch_id, name = %name, "label resolution failed: {e}");
                        outcome.push_error(format!("label '{name}': {e}"));
                    }
                }
            }
            self.checkpoint(&job.batch_id, base, &mut outcome).await;
        }

        Ok(outcome)
    }

    /// Apply resolved labels to processed-but-unsynced records
    async fn assign_labels(
        &self,
        job: &BatchJob,
        credential: &mut Credential,
        base: &BatchCounters,
    ) -> Result<StepOutcome> {
        let limit = job.options.batch_size.unwrap_or(DEFAULT_BATCH_SIZE);
        let records = self
            .store
            .query_messages(
                &job.user_id,
                MessageFilter {
                    processed: Some(true),
                    synced: Some(false),
                    limit: Some(limit),
                },
            )
            .await?;

        let mut outcome = StepOutcome::default();
        let mut applied_labels: HashSet<String> = HashSet::new();
        debug!(batch_id = %job.batch_id, count = records.len(), "assigning labels");

        for (index, chunk) in records.chunks(self.config.chunk_size).enumerate() {
            self.throttle(index).await;

            for record in chunk {
                let Some(analysis) = &record.analysis else {
                    outcome.push_error(format!(
                        "message {}: processed without analysis",
                        record.provider_id
                    ));
                    continue;
                };

                let label_id = match self.labels.lookup(&job.user_id, &analysis.suggested_label).await
                {
                    Ok(Some(id)) => id,
                    Ok(None) => {
                        outcome.push_error(format!(
                            "message {}: no label named '{}'",
                            record.provider_id, analysis.suggested_label
                        ));
                        continue;
                    }
                    Err(e) => {
                        outcome.push_error(format!("message {}: {e}", record.provider_id));
                        continue;
                    }
                };

                match self
                    .apply_label(&job.user_id, credential, &record.provider_id, &label_id)
                    .await
                {
                    Ok(()) => {
                        let mut updated = record.clone();
                        updated.synced = true;
                        match self.store.upsert_message(&updated).await {
                            Ok(()) => {
                                outcome.counters.emails_processed += 1;
                                applied_labels.insert(label_id);
                                outcome.counters.labels_used = applied_labels.len();
                            }
                            Err(e) => outcome
                                .push_error(format!("message {}: {e}", record.provider_id)),
                        }
                    }
                    Err(e) if e.requires_reauth() => return Err(e),
                    Err(e) => {
                        warn!(batch_id = %job.batch_id, id = %record.provider_id, "label apply failed: {e}");
                        outcome.push_error(format!("message {}: {e}", record.provider_id));
                    }
                }
            }
            self.checkpoint(&job.batch_id, base, &mut outcome).await;
        }

        Ok(outcome)
    }

    async fn list_page(
        &self,
        user_id: &str,
        credential: &mut Credential,
        query: &str,
        page_token: Option<&str>,
        page_size: usize,
    ) -> Result<MessagePage> {
        let provider = Arc::clone(&self.provider);
        let query = query.to_string();
        let token = page_token.map(String::from);
        let deadline = self.request_timeout();

        self.guard
            .run(user_id, credential, move |cred| {
                let provider = Arc::clone(&provider);
                let query = query.clone();
                let token = token.clone();
                async move {
                    timed(
                        deadline,
                        provider.list_messages(&cred, &query, token.as_deref(), page_size),
                    )
                    .await
                }
            })
            .await
    }

    /// Fetch metadata for one chunk of message ids, bounded-concurrent.
    /// Individual failures come back per item; an authorization expiry fails
    /// the whole chunk so the guard can refresh once and rerun it (the reads
    /// are idempotent).
    async fn fetch_chunk(
        &self,
        user_id: &str,
        credential: &mut Credential,
        ids: &[String],
    ) -> Result<Vec<(String, Result<ProviderMessage>)>> {
        let provider = Arc::clone(&self.provider);
        let ids: Vec<String> = ids.to_vec();
        let deadline = self.request_timeout();
        let concurrency = self.config.chunk_size.max(1);

        self.guard
            .run(user_id, credential, move |cred| {
                let provider = Arc::clone(&provider);
                let ids = ids.clone();
                async move {
                    let fetched: Vec<(String, Result<ProviderMessage>)> = stream::iter(ids)
                        .map(|id| {
                            let provider = Arc::clone(&provider);
                            let cred = cred.clone();
                            async move {
                                let result =
                                    timed(deadline, provider.get_message_metadata(&cred, &id))
                                        .await;
                                (id, result)
                            }
                        })
                        .buffer_unordered(concurrency)
                        .collect()
                        .await;

                    if let Some(message) = fetched.iter().find_map(|(_, r)| match r {
                        Err(e) if e.is_auth_expired() => Some(e.to_string()),
                        _ => None,
                    }) {
                        return Err(TriageError::AuthExpired(message));
                    }
                    Ok(fetched)
                }
            })
            .await
    }

    async fn apply_label(
        &self,
        user_id: &str,
        credential: &mut Credential,
        message_id: &str,
        label_id: &str,
    ) -> Result<()> {
        let provider = Arc::clone(&self.provider);
        let message_id = message_id.to_string();
        let label_id = label_id.to_string();
        let deadline = self.request_timeout();

        self.guard
            .run(user_id, credential, move |cred| {
                let provider = Arc::clone(&provider);
                let message_id = message_id.clone();
                let add = vec![label_id.clone()];
                async move {
                    timed(
                        deadline,
                        provider.modify_message_labels(&cred, &message_id, &add),
                    )
                    .await
                }
            })
            .await
    }

    /// Cooperative pause between chunks of remote calls, independent of the
    /// classification rate cap
    async fn throttle(&self, chunk_index: usize) {
        if chunk_index > 0 && self.config.chunk_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.chunk_delay_ms)).await;
        }
    }

    /// Persist progress counters and drain accumulated item errors onto the
    /// job record. Best-effort: a checkpoint failure is logged, the final
    /// terminal update will try again.
    async fn checkpoint(&self, batch_id: &str, base: &BatchCounters, outcome: &mut StepOutcome) {
        let mut counters = base.clone();
        counters.merge(&outcome.counters);
        let update = JobUpdate {
            counters: Some(counters),
            errors: std::mem::take(&mut outcome.errors),
            ..Default::default()
        };
        if let Err(e) = self.store.update_job(batch_id, update).await {
            warn!(batch_id, "progress checkpoint failed: {e}");
        }
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.config.request_timeout_secs)
    }
}

fn message_record(user_id: &str, message: ProviderMessage) -> MessageRecord {
    MessageRecord {
        provider_id: message.provider_id,
        user_id: user_id.to_string(),
        subject: message.subject,
        sender: message.sender,
        recipient: message.recipient,
        snippet: message.snippet,
        timestamp: message.timestamp,
        processed: false,
        synced: false,
        analysis: None,
    }
}
