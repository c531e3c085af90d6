//! Adaptive Rate Controller
//!
//! Shared backoff state for one backend kind. Two independent delays apply
//! before every network attempt:
//!
//! - **Proactive**: `extra_delay`, doubled on each rate-limit signal (min 2s,
//!   max 256s) and halved on each success, snapping to zero near the bottom
//! - **Reactive**: a cooldown deadline set by the most recent rate-limit signal
//!
//! ```text
//! signal:  extra = clamp(max(2, extra * 2), 0, 256)
//!          wait  = max(2 * 2^attempt + jitter, extra)
//!          cooldown_until = now + wait
//! success: extra = extra * 0.5  (0 when below 0.2)
//! ```
//!
//! Controllers are handed out by a [`RateRegistry`], one per backend kind.
//! There is no process-wide singleton: each registry is an isolated world,
//! which keeps parallel tests from sharing state.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use dashmap::DashMap;
use rand::Rng;
use tokio::time::{Instant, sleep, sleep_until};
use tracing::{debug, info};

use crate::config::BackendKind;
use crate::constants::rate as rate_constants;

#[derive(Debug)]
struct AdaptiveState {
    extra_delay_secs: f64,
    cooldown_until: Option<Instant>,
}

/// Point-in-time view of a controller
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdaptiveSnapshot {
    pub extra_delay_secs: f64,
    pub cooldown_remaining: Option<Duration>,
}

/// Lock-protected adaptive delay and cooldown for one backend kind
#[derive(Debug)]
pub struct AdaptiveRateController {
    name: String,
    inner: Mutex<AdaptiveState>,
}

impl AdaptiveRateController {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(AdaptiveState {
                extra_delay_secs: 0.0,
                cooldown_until: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, AdaptiveState> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current proactive delay in seconds
    pub fn extra_delay_secs(&self) -> f64 {
        self.lock().extra_delay_secs
    }

    pub fn snapshot(&self) -> AdaptiveSnapshot {
        let inner = self.lock();
        let now = Instant::now();
        AdaptiveSnapshot {
            extra_delay_secs: inner.extra_delay_secs,
            cooldown_remaining: inner
                .cooldown_until
                .filter(|until| *until > now)
                .map(|until| until - now),
        }
    }

    /// Record a rate-limit signal for `attempt_index` (0-based) and return the wait it imposes
    pub fn on_rate_limit_signal(&self, attempt_index: u32) -> Duration {
        let jitter = rand::rng().random_range(0.0..1.0);
        self.on_rate_limit_signal_with_jitter(attempt_index, jitter)
    }

    fn on_rate_limit_signal_with_jitter(&self, attempt_index: u32, jitter: f64) -> Duration {
        let exponent = attempt_index.min(rate_constants::MAX_BACKOFF_EXPONENT);
        let backoff =
            rate_constants::BACKOFF_BASE_SECS * f64::from(2u32.pow(exponent)) + jitter;

        let mut inner = self.lock();
        inner.extra_delay_secs = (inner.extra_delay_secs * rate_constants::GROWTH_FACTOR)
            .max(rate_constants::MIN_SIGNAL_DELAY_SECS)
            .min(rate_constants::MAX_EXTRA_DELAY_SECS);

        let wait = Duration::from_secs_f64(backoff.max(inner.extra_delay_secs));
        push_cooldown(&mut inner, Instant::now() + wait);

        info!(
            target: "docsift::retry",
            controller = %self.name,
            attempt = attempt_index,
            extra_delay_secs = inner.extra_delay_secs,
            wait_secs = wait.as_secs_f64(),
            "Rate limit signal, cooling down"
        );

        wait
    }

    /// Hold every caller back for at least `wait` from now (backend Retry-After hint)
    pub fn extend_cooldown(&self, wait: Duration) {
        let mut inner = self.lock();
        push_cooldown(&mut inner, Instant::now() + wait);
        debug!(
            target: "docsift::retry",
            controller = %self.name,
            wait_secs = wait.as_secs_f64(),
            "Cooldown extended by backend hint"
        );
    }

    /// Decay the proactive delay after a successful call
    pub fn on_success(&self) {
        let mut inner = self.lock();
        if inner.extra_delay_secs == 0.0 {
            return;
        }

        let decayed = inner.extra_delay_secs * rate_constants::DECAY_FACTOR;
        inner.extra_delay_secs = if decayed < rate_constants::SNAP_TO_ZERO_SECS {
            0.0
        } else {
            decayed
        };

        debug!(
            target: "docsift::retry",
            controller = %self.name,
            extra_delay_secs = inner.extra_delay_secs,
            "Adaptive delay decayed"
        );
    }

    /// Suspend until any active cooldown has elapsed, then clear it.
    ///
    /// The deadline is re-read after every sleep: another call may have
    /// extended it in the meantime.
    pub async fn await_cooldown(&self) {
        loop {
            let deadline = self.lock().cooldown_until;
            match deadline {
                None => return,
                Some(until) if Instant::now() >= until => {
                    let mut inner = self.lock();
                    if inner
                        .cooldown_until
                        .is_some_and(|current| current <= Instant::now())
                    {
                        inner.cooldown_until = None;
                    }
                    return;
                }
                Some(until) => {
                    debug!(
                        target: "docsift::retry",
                        controller = %self.name,
                        remaining_ms = (until - Instant::now()).as_millis() as u64,
                        "Waiting for cooldown"
                    );
                    sleep_until(until).await;
                }
            }
        }
    }

    /// Proactive delay followed by the reactive cooldown; call before every attempt
    pub async fn wait_before_attempt(&self) {
        let extra = self.extra_delay_secs();
        if extra > 0.0 {
            debug!(
                target: "docsift::retry",
                controller = %self.name,
                extra_delay_secs = extra,
                "Applying adaptive delay"
            );
            sleep(Duration::from_secs_f64(extra)).await;
        }
        self.await_cooldown().await;
    }
}

/// Never shorten a cooldown another call pushed further out
fn push_cooldown(state: &mut AdaptiveState, until: Instant) {
    state.cooldown_until = Some(match state.cooldown_until {
        Some(existing) if existing > until => existing,
        _ => until,
    });
}

// =============================================================================
// Registry
// =============================================================================

/// Hands out one shared controller per backend kind
#[derive(Debug, Default, Clone)]
pub struct RateRegistry {
    controllers: Arc<DashMap<BackendKind, Arc<AdaptiveRateController>>>,
}

impl RateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Controller shared by every provider of `kind` built from this registry
    pub fn controller(&self, kind: BackendKind) -> Arc<AdaptiveRateController> {
        self.controllers
            .entry(kind)
            .or_insert_with(|| Arc::new(AdaptiveRateController::new(kind.as_str())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signals_double_from_two() {
        let controller = AdaptiveRateController::new("test");
        assert_eq!(controller.extra_delay_secs(), 0.0);

        let mut seen = Vec::new();
        for attempt in 0..3 {
            controller.on_rate_limit_signal(attempt);
            seen.push(controller.extra_delay_secs());
        }
        assert_eq!(seen, vec![2.0, 4.0, 8.0]);

        controller.on_success();
        assert_eq!(controller.extra_delay_secs(), 4.0);
    }

    #[test]
    fn test_success_snaps_to_zero() {
        let controller = AdaptiveRateController::new("test");
        controller.on_rate_limit_signal(0);

        let mut seen = Vec::new();
        for _ in 0..4 {
            controller.on_success();
            seen.push(controller.extra_delay_secs());
        }
        // 2.0 -> 1.0 -> 0.5 -> 0.25 -> 0.125 snaps to 0
        assert_eq!(seen, vec![1.0, 0.5, 0.25, 0.0]);

        controller.on_success();
        assert_eq!(controller.extra_delay_secs(), 0.0);
    }

    #[test]
    fn test_extra_delay_is_capped() {
        let controller = AdaptiveRateController::new("test");
        for attempt in 0..12 {
            controller.on_rate_limit_signal(attempt);
        }
        assert_eq!(controller.extra_delay_secs(), 256.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_is_max_of_backoff_and_extra_delay() {
        let controller = AdaptiveRateController::new("test");

        // attempt 0: backoff 2 + 0.5 beats extra 2.0
        let wait = controller.on_rate_limit_signal_with_jitter(0, 0.5);
        assert_eq!(wait, Duration::from_secs_f64(2.5));

        // Pump extra delay to 64, then an early attempt is dominated by it
        for _ in 0..5 {
            controller.on_rate_limit_signal_with_jitter(0, 0.0);
        }
        assert_eq!(controller.extra_delay_secs(), 64.0);
        let wait = controller.on_rate_limit_signal_with_jitter(1, 0.0);
        assert_eq!(wait, Duration::from_secs(128));
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_cooldown_blocks_until_deadline() {
        let controller = AdaptiveRateController::new("test");
        let wait = controller.on_rate_limit_signal_with_jitter(1, 0.25);
        assert_eq!(wait, Duration::from_secs_f64(4.25));

        let start = Instant::now();
        controller.await_cooldown().await;
        assert!(start.elapsed() >= wait);
        assert_eq!(controller.snapshot().cooldown_remaining, None);

        // Cleared: a second await returns immediately
        let start = Instant::now();
        controller.await_cooldown().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_signal_never_shortens_existing_cooldown() {
        let controller = AdaptiveRateController::new("test");
        controller.on_rate_limit_signal_with_jitter(4, 0.0); // 32s
        let long = controller.snapshot().cooldown_remaining.unwrap();

        controller.on_rate_limit_signal_with_jitter(0, 0.0); // max(2, 4) = 4s
        let after = controller.snapshot().cooldown_remaining.unwrap();
        assert_eq!(after, long);
    }

    #[tokio::test(start_paused = true)]
    async fn test_extend_cooldown_only_lengthens() {
        let controller = AdaptiveRateController::new("test");
        controller.extend_cooldown(Duration::from_secs(30));
        controller.extend_cooldown(Duration::from_secs(5));

        assert_eq!(
            controller.snapshot().cooldown_remaining,
            Some(Duration::from_secs(30))
        );
        // A hint alone does not touch the proactive delay
        assert_eq!(controller.extra_delay_secs(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_waiter_honors_extended_cooldown() {
        let controller = Arc::new(AdaptiveRateController::new("test"));
        controller.on_rate_limit_signal_with_jitter(0, 0.0); // 2s

        let waiter = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move {
                let start = Instant::now();
                controller.await_cooldown().await;
                start.elapsed()
            })
        };

        // Another call hits a 429 while the waiter sleeps
        sleep(Duration::from_secs(1)).await;
        controller.on_rate_limit_signal_with_jitter(3, 0.0); // 16s from now

        let waited = waiter.await.unwrap();
        assert!(waited >= Duration::from_secs(17));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_before_attempt_applies_both_delays() {
        let controller = AdaptiveRateController::new("test");
        controller.on_rate_limit_signal_with_jitter(0, 0.0); // extra 2, cooldown 2

        let start = Instant::now();
        controller.wait_before_attempt().await;
        // Proactive 2s sleep consumes the 2s cooldown; cooldown adds nothing more
        assert!(start.elapsed() >= Duration::from_secs(2));
        assert!(start.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_concurrent_signals_are_serialized() {
        let controller = Arc::new(AdaptiveRateController::new("test"));

        let handles: Vec<_> = (0..5)
            .map(|_| {
                let controller = Arc::clone(&controller);
                tokio::spawn(async move {
                    controller.on_rate_limit_signal(0);
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(controller.extra_delay_secs(), 32.0);
    }

    #[test]
    fn test_registry_shares_per_kind() {
        let registry = RateRegistry::new();
        let a = registry.controller(BackendKind::Gemini);
        let b = registry.controller(BackendKind::Gemini);
        let c = registry.controller(BackendKind::OpenAi);

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));

        a.on_rate_limit_signal(0);
        assert_eq!(b.extra_delay_secs(), 2.0);
        assert_eq!(c.extra_delay_secs(), 0.0);
    }

    #[test]
    fn test_registries_are_isolated() {
        let first = RateRegistry::new();
        let second = RateRegistry::new();

        first.controller(BackendKind::Anthropic).on_rate_limit_signal(0);
        assert_eq!(
            second.controller(BackendKind::Anthropic).extra_delay_secs(),
            0.0
        );

        // Clones share the same controllers
        let cloned = first.clone();
        assert_eq!(
            cloned.controller(BackendKind::Anthropic).extra_delay_secs(),
            2.0
        );
    }
}
