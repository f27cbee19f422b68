//! Per-user sliding-window limiter for classification calls
//!
//! The window state lives in the store, keyed `(user_id, tag)`, so the cap
//! holds across every orchestrator instance sharing that store. The ceiling
//! is checked before the call is recorded: a full window denies without
//! consuming anything.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::RateLimitConfig;
use crate::store::TriageStore;

/// Operation tag for classification-API calls
pub const CLASSIFY_TAG: &str = "classify";

#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn TriageStore>,
    max_calls: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn TriageStore>, max_calls: u32, window: Duration) -> Self {
        Self {
            store,
            max_calls,
            window,
        }
    }

    pub fn from_config(store: Arc<dyn TriageStore>, config: &RateLimitConfig) -> Self {
        Self::new(
            store,
            config.max_calls_per_window,
            Duration::from_secs(config.window_secs),
        )
    }

    /// Check whether a call for `(user_id, tag)` is within the window
    /// ceiling, recording it when allowed.
    ///
    /// Fails open: when the counter store is unreachable the call is allowed,
    /// trading strictness for availability so a limiter outage cannot stall
    /// the pipeline.
    pub async fn allow(&self, user_id: &str, tag: &str) -> bool {
        match self
            .store
            .rate_limit_check_and_record(user_id, tag, self.max_calls, self.window)
            .await
        {
            Ok(allowed) => {
                if !allowed {
                    debug!(user_id, tag, "rate ceiling reached, call denied");
                }
                allowed
            }
            Err(e) => {
                warn!(user_id, tag, "rate limiter store unavailable, allowing call: {e}");
                true
            }
        }
    }
}
