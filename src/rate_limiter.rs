use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

use crate::config::Config;

/// Sliding-window rate limiter shared by every caller of one provider.
///
/// Keeps the reservation timestamps of the trailing window. `acquire` admits
/// a caller once fewer than `max_requests` reservations remain inside the
/// window, otherwise sleeps until the oldest one expires and tries again.
/// The check and the reservation happen under the same lock, so two callers
/// can never both take the last free slot.
#[derive(Debug)]
pub struct RateLimiter {
    name: &'static str,
    max_requests: usize,
    window: Duration,
    slots: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(name: &'static str, max_requests: usize, window: Duration) -> Self {
        let max_requests = max_requests.max(1);
        Self {
            name,
            max_requests,
            window,
            slots: Mutex::new(VecDeque::with_capacity(max_requests)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Waits until one more request fits in the window, then reserves it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut slots = self.slots.lock().await;
                let now = Instant::now();

                while let Some(oldest) = slots.front() {
                    if now.duration_since(*oldest) >= self.window {
                        slots.pop_front();
                    } else {
                        break;
                    }
                }

                if slots.len() < self.max_requests {
                    slots.push_back(now);
                    return;
                }

                match slots.front() {
                    Some(oldest) => self.window.saturating_sub(now.duration_since(*oldest)),
                    None => Duration::ZERO,
                }
            };

            tracing::debug!(
                "Rate limiter '{}' full ({} per {:?}), waiting {:?}",
                self.name,
                self.max_requests,
                self.window,
                wait
            );
            sleep(wait).await;
        }
    }
}

/// The two process-wide provider limiters.
///
/// Built once at startup and handed to every verifier, so the external quota
/// holds no matter how many batch workers run at once. Never rebuild these
/// mid-run: a second instance would have its own window.
#[derive(Debug, Clone)]
pub struct ProviderLimiters {
    pub places: Arc<RateLimiter>,
    pub yelp: Arc<RateLimiter>,
}

impl ProviderLimiters {
    pub fn from_config(config: &Config) -> Self {
        tracing::info!(
            "Rate limits: Google Places {} per {:?}, Yelp {} per {:?}",
            config.places_rate_limit,
            config.places_rate_window,
            config.yelp_rate_limit,
            config.yelp_rate_window
        );
        Self {
            places: Arc::new(RateLimiter::new(
                "google_places",
                config.places_rate_limit,
                config.places_rate_window,
            )),
            yelp: Arc::new(RateLimiter::new(
                "yelp",
                config.yelp_rate_limit,
                config.yelp_rate_window,
            )),
        }
    }
}
