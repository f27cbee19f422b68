//! Category-name to provider-label resolution with memoized mappings
//!
//! Resolution order: in-process cache, then the store, then label creation
//! on the provider. Creation is concurrency-safe for the same
//! `(user_id, name)`: the store upsert keeps the first write, and a
//! provider-side "already exists" answer is handled by re-reading the label
//! listing instead of failing.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::Result;
use crate::guard::CredentialGuard;
use crate::models::{Credential, LabelRecord};
use crate::provider::MailProvider;
use crate::store::TriageStore;

/// Outcome of a label resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLabel {
    pub id: String,
    /// True when this call created the provider-side label
    pub created: bool,
}

pub struct LabelResolver {
    provider: Arc<dyn MailProvider>,
    store: Arc<dyn TriageStore>,
    guard: CredentialGuard,
    // name keys are lowercased for case-insensitive lookups
    cache: Mutex<HashMap<(String, String), String>>,
}

impl LabelResolver {
    pub fn new(provider: Arc<dyn MailProvider>, store: Arc<dyn TriageStore>) -> Self {
        let guard = CredentialGuard::new(Arc::clone(&provider), Arc::clone(&store));
        Self {
            provider,
            store,
            guard,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn cache_key(user_id: &str, name: &str) -> (String, String) {
        (user_id.to_string(), name.to_lowercase())
    }

    /// Read-only lookup: cache, then store. Never creates anything.
    pub async fn lookup(&self, user_id: &str, name: &str) -> Result<Option<String>> {
        let key = Self::cache_key(user_id, name);
        if let Some(id) = self.cache.lock().await.get(&key) {
            return Ok(Some(id.clone()));
        }

        if let Some(record) = self.store.get_label_by_name(user_id, name).await? {
            let id = record.provider_label_id;
            self.cache.lock().await.insert(key, id.clone());
            return Ok(Some(id));
        }

        Ok(None)
    }

    /// Map a label name to its provider id, creating the label when absent.
    /// Repeated calls for the same `(user_id, name)` return the same id.
    pub async fn resolve(
        &self,
        user_id: &str,
        name: &str,
        credential: &mut Credential,
    ) -> Result<ResolvedLabel> {
        if let Some(id) = self.lookup(user_id, name).await? {
            return Ok(ResolvedLabel { id, created: false });
        }

        let (provider_label_id, remote_created) =
            self.create_remote(user_id, name, credential).await?;

        let record = LabelRecord {
            user_id: user_id.to_string(),
            name: name.to_string(),
            provider_label_id: provider_label_id.clone(),
            is_auto: remote_created,
        };
        // The store keeps the first write; a racing resolver for the same
        // name lands on the canonical record either way.
        let canonical = self.store.upsert_label(&record).await?;
        let created = remote_created && canonical.provider_label_id == provider_label_id;

        self.cache.lock().await.insert(
            Self::cache_key(user_id, name),
            canonical.provider_label_id.clone(),
        );

        if created {
            info!(user_id, name, id = %canonical.provider_label_id, "created label");
        }
        Ok(ResolvedLabel {
            id: canonical.provider_label_id,
            created,
        })
    }

    /// Create the label on the provider, returning `(id, created)`; a
    /// conflicting pre-existing label resolves to `created = false`
    async fn create_remote(
        &self,
        user_id: &str,
        name: &str,
        credential: &mut Credential,
    ) -> Result<(String, bool)> {
        let provider = Arc::clone(&self.provider);
        let label_name = name.to_string();
        let result = self
            .guard
            .run(user_id, credential, move |cred| {
                let provider = Arc::clone(&provider);
                let label_name = label_name.clone();
                async move { provider.create_label(&cred, &label_name).await }
            })
            .await;

        match result {
            Ok(id) => Ok((id, true)),
            Err(err) if err.requires_reauth() => Err(err),
            Err(err) => {
                // The provider may already hold this label (another batch or
                // a pre-existing mailbox label). Re-read the listing before
                // giving up.
                debug!(user_id, name, "create_label failed ({err}), re-reading labels");
                let provider = Arc::clone(&self.provider);
                let labels = self
                    .guard
                    .run(user_id, credential, move |cred| {
                        let provider = Arc::clone(&provider);
                        async move { provider.list_labels(&cred).await }
                    })
                    .await?;

                labels
                    .into_iter()
                    .find(|label| label.name.eq_ignore_ascii_case(name))
                    .map(|label| (label.id, false))
                    .ok_or(err)
            }
        }
    }
}
