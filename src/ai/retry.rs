//! Retry Orchestrator
//!
//! Bounded network-level retry around one backend call. The same payload is
//! resent on every attempt; re-prompting belongs to the logical loop in
//! `provider`, which owns a separate budget.
//!
//! Per attempt:
//! 1. Proactive delay + cooldown from the shared [`AdaptiveRateController`]
//! 2. Invoke the call
//! 3. Success: decay the adaptive delay, return
//! 4. Rate limit: signal the controller, next attempt
//! 5. Anything else: flat pause, next attempt

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::rate::AdaptiveRateController;
use crate::constants::retry as retry_constants;
use crate::types::LlmError;

#[derive(Debug, Clone)]
pub struct RetryOrchestrator {
    controller: Arc<AdaptiveRateController>,
    max_attempts: u32,
    failure_pause: Duration,
}

impl RetryOrchestrator {
    pub fn new(controller: Arc<AdaptiveRateController>) -> Self {
        Self {
            controller,
            max_attempts: retry_constants::MAX_NETWORK_ATTEMPTS,
            failure_pause: Duration::from_millis(retry_constants::GENERIC_FAILURE_PAUSE_MS),
        }
    }

    pub fn controller(&self) -> &Arc<AdaptiveRateController> {
        &self.controller
    }

    /// Run `call` until it succeeds or the attempt budget is spent.
    ///
    /// `call` receives the 0-based attempt index. Returns `None` once every
    /// attempt has failed; the error detail only reaches the log.
    pub async fn execute<T, F, Fut>(&self, mut call: F) -> Option<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, LlmError>>,
    {
        for attempt in 0..self.max_attempts {
            self.controller.wait_before_attempt().await;

            match call(attempt).await {
                Ok(response) => {
                    self.controller.on_success();
                    if attempt > 0 {
                        debug!(
                            target: "docsift::retry",
                            attempt = attempt + 1,
                            "Call succeeded after retry"
                        );
                    }
                    return Some(response);
                }
                Err(err) if err.is_rate_limit() => {
                    warn!(
                        target: "docsift::retry",
                        attempt = attempt + 1,
                        max_attempts = self.max_attempts,
                        category = %err.category,
                        "Rate limited: {}",
                        err.message
                    );
                    let wait = self.controller.on_rate_limit_signal(attempt);
                    if let Some(hint) = err.retry_after.filter(|hint| *hint > wait) {
                        self.controller.extend_cooldown(hint);
                    }
                }
                Err(err) => {
                    warn!(
                        target: "docsift::retry",
                        attempt = attempt + 1,
                        max_attempts = self.max_attempts,
                        category = %err.category,
                        "Attempt failed: {}",
                        err.message
                    );
                    if attempt + 1 < self.max_attempts {
                        tokio::time::sleep(self.failure_pause).await;
                    }
                }
            }
        }

        warn!(
            target: "docsift::retry",
            attempts = self.max_attempts,
            "Retry budget exhausted, no response from backend"
        );
        None
    }
}
