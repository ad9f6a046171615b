//! Reactive per-category throttling
//!
//! Nothing is throttled until the service answers 429. The endpoint's
//! category then pauses for the server's `Retry-After`, after which calls in
//! that category are paced by a quota until a quiet period passes with no
//! further 429.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use log::debug;
use reqwest::Method;
use tokio::time::Instant;

/// Longest pause honored from a `Retry-After`
pub const MAX_PAUSE: Duration = Duration::from_secs(60);

/// Pacing stays on this long after the pause of the latest 429 ends
pub const QUIET_PERIOD: Duration = Duration::from_secs(300);

/// Endpoint families the service rate-limits separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointCategory {
    /// Telemetry ingestion
    Analytics,
    /// Survey reads, responses and results
    Surveys,
    /// Credential exchanges (login, register, refresh, logout)
    Auth,
    Default,
}

impl EndpointCategory {
    pub const ALL: [EndpointCategory; 4] = [
        EndpointCategory::Analytics,
        EndpointCategory::Surveys,
        EndpointCategory::Auth,
        EndpointCategory::Default,
    ];

    /// Categorize by the first recognised path segment, so relative
    /// endpoints and absolute URLs with a base path agree.
    pub fn of(endpoint: &str, method: &Method) -> Self {
        let path = match endpoint.split_once("://") {
            Some((_, rest)) => rest.find('/').map_or("", |i| &rest[i..]),
            None => endpoint,
        };

        path.split(['/', '?'])
            .find_map(|segment| match segment {
                "analytics" => Some(EndpointCategory::Analytics),
                "surveys" | "results" => Some(EndpointCategory::Surveys),
                // Token verification is a cheap read
                "auth" if *method == Method::GET => Some(EndpointCategory::Default),
                "auth" => Some(EndpointCategory::Auth),
                _ => None,
            })
            .unwrap_or(EndpointCategory::Default)
    }

    /// Sustained rate while throttled
    fn quota(self) -> Quota {
        match self {
            EndpointCategory::Analytics => Quota::per_second(per(2)),
            EndpointCategory::Surveys => Quota::per_second(per(10)),
            EndpointCategory::Auth => Quota::per_minute(per(12)),
            EndpointCategory::Default => Quota::per_second(per(6)),
        }
    }
}

fn per(n: u32) -> NonZeroU32 {
    NonZeroU32::new(n).unwrap_or(NonZeroU32::MIN)
}

#[derive(Debug, Clone, Copy)]
struct Backoff {
    resume_at: Instant,
    paced_until: Instant,
}

struct Throttle {
    pacer: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    backoff: Mutex<Option<Backoff>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One throttle per [`EndpointCategory`], all idle until a 429 arrives.
pub struct RateLimiterSet {
    throttles: HashMap<EndpointCategory, Throttle>,
    quiet_period: Duration,
}

impl Default for RateLimiterSet {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiterSet {
    pub fn new() -> Self {
        Self::with_quiet_period(QUIET_PERIOD)
    }

    pub fn with_quiet_period(quiet_period: Duration) -> Self {
        let throttles = EndpointCategory::ALL
            .into_iter()
            .map(|category| {
                let throttle = Throttle {
                    pacer: RateLimiter::direct(category.quota()),
                    backoff: Mutex::new(None),
                };
                (category, throttle)
            })
            .collect();

        Self {
            throttles,
            quiet_period,
        }
    }

    /// Record a 429 for `category`. Calls pause for `retry_after` (capped at
    /// [`MAX_PAUSE`]) and are then paced until the quiet period runs out.
    pub fn throttle(&self, category: EndpointCategory, retry_after: Duration) {
        let Some(throttle) = self.throttles.get(&category) else {
            return;
        };
        let pause = retry_after.min(MAX_PAUSE);
        let resume_at = Instant::now() + pause;
        *lock(&throttle.backoff) = Some(Backoff {
            resume_at,
            paced_until: resume_at + self.quiet_period,
        });
        debug!("Throttling {:?} calls; pausing {:?}", category, pause);
    }

    pub fn is_throttled(&self, category: EndpointCategory) -> bool {
        self.throttles.get(&category).is_some_and(|throttle| {
            lock(&throttle.backoff).is_some_and(|b| Instant::now() < b.paced_until)
        })
    }

    /// Wait until a call in `category` may go out. Returns at once for
    /// categories that have not seen a 429 recently.
    pub async fn wait_for(&self, category: EndpointCategory) {
        let Some(throttle) = self.throttles.get(&category) else {
            return;
        };

        let backoff = {
            let mut backoff = lock(&throttle.backoff);
            let current = *backoff;
            match current {
                None => return,
                Some(b) if Instant::now() >= b.paced_until => {
                    debug!("{:?} quiet again, lifting throttle", category);
                    *backoff = None;
                    return;
                }
                Some(b) => b,
            }
        };

        if Instant::now() < backoff.resume_at {
            debug!("Waiting out Retry-After for {:?}", category);
            tokio::time::sleep_until(backoff.resume_at).await;
        }
        throttle.pacer.until_ready().await;
    }
}
