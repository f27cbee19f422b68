//! Remote collaborator contracts: the mail provider and the AI backend
//!
//! Both services live behind narrow async traits so the orchestration engine
//! can be driven against fakes in tests. Every mail provider call takes the
//! caller's credential explicitly; there is no ambient authenticated client.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::Credential;

/// One page of the provider's message listing
#[derive(Debug, Clone)]
pub struct MessagePage {
    pub ids: Vec<String>,
    pub next_page_token: Option<String>,
}

/// Message metadata as returned by the provider
#[derive(Debug, Clone)]
pub struct ProviderMessage {
    pub provider_id: String,
    pub subject: String,
    pub sender: String,
    pub recipient: String,
    pub snippet: String,
    pub timestamp: DateTime<Utc>,
}

/// Label info returned from the provider
#[derive(Debug, Clone)]
pub struct LabelInfo {
    pub id: String,
    pub name: String,
}

/// Trait defining mail provider operations for easier testing
#[async_trait]
pub trait MailProvider: Send + Sync {
    /// List message ids matching a query, one page at a time
    async fn list_messages(
        &self,
        credential: &Credential,
        query: &str,
        page_token: Option<&str>,
        page_size: usize,
    ) -> Result<MessagePage>;

    /// Get metadata for a single message
    async fn get_message_metadata(
        &self,
        credential: &Credential,
        id: &str,
    ) -> Result<ProviderMessage>;

    /// Create a new label, returning its provider-side identifier
    async fn create_label(&self, credential: &Credential, name: &str) -> Result<String>;

    /// List all labels in the account
    async fn list_labels(&self, credential: &Credential) -> Result<Vec<LabelInfo>>;

    /// Add labels to a message
    async fn modify_message_labels(
        &self,
        credential: &Credential,
        id: &str,
        add_label_ids: &[String],
    ) -> Result<()>;

    /// Exchange a refresh token for a fresh credential
    async fn refresh_credential(&self, refresh_token: &str) -> Result<Credential>;
}

/// Trait for the AI classification backend. The response carries no
/// structural guarantee beyond "some text"; all parsing and validation is
/// the classification engine's job.
#[async_trait]
pub trait ClassificationProvider: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}
