//! Mail Triage
//!
//! A batch orchestration engine for AI-assisted inbox triage. It pulls
//! messages from a mail provider, classifies each with an AI model (falling
//! back to deterministic rules), creates or reuses provider-side labels, and
//! applies them — one email at a time or as a multi-stage batch covering
//! thousands of messages.
//!
//! # Overview
//!
//! - **Batch orchestration**: tracked, resumable jobs with progress
//!   checkpointing and partial-failure accounting
//! - **Classification**: AI-backed with a total rule-based fallback
//! - **Credential handling**: transparent single-refresh retry on token
//!   expiry
//! - **Rate limiting**: per-user sliding windows over the classification API
//! - **Label resolution**: idempotent, concurrency-safe label creation
//!
//! # Example Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use mail_triage::{
//!     BatchOperation, BatchOptions, BatchOrchestrator, Config, Credential, MemoryStore,
//! };
//! # use mail_triage::provider::MailProvider;
//! # fn provider() -> Arc<dyn MailProvider> { unimplemented!() }
//!
//! #[tokio::main]
//! async fn main() -> mail_triage::Result<()> {
//!     let store = Arc::new(MemoryStore::new());
//!     let orchestrator = BatchOrchestrator::new(store, provider(), None, Config::default());
//!
//!     let batch_id = orchestrator
//!         .create("user-1", BatchOperation::FullProcess, BatchOptions {
//!             batch_size: Some(100),
//!             ..Default::default()
//!         })
//!         .await?;
//!
//!     let credential = Credential::new("access-token", "refresh-token");
//!     let counters = orchestrator.execute(&batch_id, credential).await?;
//!     println!("processed {} messages", counters.emails_processed);
//!
//!     Ok(())
//! }
//! ```
//!
//! # Module Organization
//!
//! - [`batch`] - Batch job lifecycle and sub-procedure orchestration
//! - [`classifier`] - Email classification (AI-backed and rule-based)
//! - [`config`] - Configuration management
//! - [`error`] - Error types and result alias
//! - [`guard`] - Credential refresh wrapper for provider calls
//! - [`labels`] - Label resolution and memoized mappings
//! - [`models`] - Core data structures
//! - [`provider`] - Mail provider and AI backend contracts
//! - [`rate_limiter`] - Per-user sliding-window rate limiting
//! - [`store`] - Persistence contract and in-memory implementation

pub mod batch;
pub mod classifier;
pub mod config;
pub mod error;
pub mod guard;
pub mod labels;
pub mod models;
pub mod provider;
pub mod rate_limiter;
pub mod store;

#[cfg(feature = "ml")]
pub mod ml;

// Re-export commonly used types for convenience
pub use error::{Result, TriageError};

// Core data models
pub use models::{
    BatchCounters, BatchJob, BatchOperation, BatchOptions, BatchStatus, Category,
    ClassificationResult, Credential, LabelRecord, MessageRecord, Sentiment,
};

// Orchestration
pub use batch::BatchOrchestrator;

// Classification
pub use classifier::ClassificationEngine;

// Credential handling
pub use guard::CredentialGuard;

// Label resolution
pub use labels::{LabelResolver, ResolvedLabel};

// Rate limiting
pub use rate_limiter::RateLimiter;

// Persistence
pub use store::{JobUpdate, MemoryStore, MessageFilter, TriageStore};

// Config types
pub use config::{BatchConfig, ClassificationConfig, Config, RateLimitConfig};

#[cfg(feature = "ml")]
pub use ml::OpenAiProvider;
