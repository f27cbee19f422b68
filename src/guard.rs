//! Credential-aware wrapper around mail provider calls
//!
//! Access tokens expire mid-batch. [`CredentialGuard::run`] executes a
//! provider operation with the caller's current credential; when the
//! provider signals authorization expiry, it refreshes the credential
//! exactly once, persists the refreshed pair, and retries the operation
//! exactly once. There is no retry loop: a second authorization failure, or
//! a failed refresh, surfaces as `RequiresReauth`.

use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{Result, TriageError};
use crate::models::Credential;
use crate::provider::MailProvider;
use crate::store::TriageStore;

#[derive(Clone)]
pub struct CredentialGuard {
    provider: Arc<dyn MailProvider>,
    store: Arc<dyn TriageStore>,
}

impl CredentialGuard {
    pub fn new(provider: Arc<dyn MailProvider>, store: Arc<dyn TriageStore>) -> Self {
        Self { provider, store }
    }

    /// Run `op` with the current credential. On authorization expiry the
    /// credential is refreshed once, written back through the `&mut` borrow,
    /// persisted, and `op` is retried once. The closure is called at most
    /// twice.
    pub async fn run<T, F, Fut>(
        &self,
        user_id: &str,
        credential: &mut Credential,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut(Credential) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match op(credential.clone()).await {
            Err(err) if err.is_auth_expired() => {
                debug!(user_id, "access token expired, refreshing credential");

                let refreshed = self
                    .provider
                    .refresh_credential(&credential.refresh_token)
                    .await
                    .map_err(|e| {
                        warn!(user_id, "credential refresh failed: {e}");
                        TriageError::RequiresReauth(format!("credential refresh failed: {e}"))
                    })?;

                self.store.save_credential(user_id, &refreshed).await?;
                *credential = refreshed;

                match op(credential.clone()).await {
                    Err(err) if err.is_auth_expired() => {
                        warn!(user_id, "call still unauthorized after refresh");
                        Err(TriageError::RequiresReauth(format!(
                            "authorization failed after refresh: {err}"
                        )))
                    }
                    other => other,
                }
            }
            other => other,
        }
    }
}
