//! Per-source request throttling for polite fetching.
//!
//! Each source gets its own [`Throttle`]; concurrent fetch tasks for that
//! source reserve consecutive time slots spaced by the configured delay
//! (plus jitter), so the delay holds even when several fetches are in
//! flight at once.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::util::jitter_ms;

#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    /// Minimum delay between consecutive requests to the same source.
    pub delay: Duration,

    /// Maximum random jitter added on top of `delay` (uniform [0, jitter)).
    /// Set to `Duration::ZERO` to disable.
    pub jitter: Duration,
}

impl ThrottleConfig {
    /// Create a new config with the given delay and no jitter.
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            jitter: Duration::ZERO,
        }
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Effective spacing for a single slot (delay + random jitter).
    fn effective_delay(&self) -> Duration {
        if self.jitter.is_zero() {
            return self.delay;
        }
        self.delay + Duration::from_millis(jitter_ms(self.jitter.as_millis() as u64))
    }
}

impl Default for ThrottleConfig {
    /// 1 second delay, 250ms jitter.
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(1),
            jitter: Duration::from_millis(250),
        }
    }
}

/// Politeness gate shared by all fetch tasks of one source.
#[derive(Debug, Clone)]
pub struct Throttle {
    config: ThrottleConfig,
    next_slot: Arc<Mutex<Option<Instant>>>,
}

impl Throttle {
    pub fn new(config: ThrottleConfig) -> Self {
        Self {
            config,
            next_slot: Arc::new(Mutex::new(None)),
        }
    }

    pub fn config(&self) -> &ThrottleConfig {
        &self.config
    }

    /// Wait for this caller's slot. The first call returns immediately.
    pub async fn wait(&self) {
        let slot = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = match *next {
                Some(at) if at > now => at,
                _ => now,
            };
            *next = Some(slot + self.config.effective_delay());
            slot
        };

        let now = Instant::now();
        if slot > now {
            tracing::debug!(
                sleep_ms = %(slot - now).as_millis(),
                "Throttling request"
            );
            tokio::time::sleep_until(slot).await;
        }
    }
}
