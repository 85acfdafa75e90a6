//! Fixed-window rate limiting per client.
//!
//! A client's window opens on its first request and lasts `window`. Within a
//! window at most `max` requests pass; the rest are rejected with 429 until
//! the window expires. State lives in memory and is shared by all workers.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use actix_web::http::header::{HeaderName, HeaderValue};
use futures_util::future::LocalBoxFuture;
use tokio::sync::Mutex;

use crate::errors::AppError;
use crate::pipeline::{Exchange, Flow, Stage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed { remaining: u32, reset_in: Duration },
    Limited { retry_after: Duration },
}

#[derive(Debug, Clone, Copy)]
struct Window {
    opened: Instant,
    hits: u32,
}

struct Table {
    windows: HashMap<String, Window>,
    last_sweep: Instant,
}

pub struct FixedWindowLimiter {
    max: u32,
    window: Duration,
    table: Mutex<Table>,
}

impl FixedWindowLimiter {
    pub fn new(max: u32, window: Duration) -> Self {
        Self {
            max,
            window,
            table: Mutex::new(Table {
                windows: HashMap::new(),
                last_sweep: Instant::now(),
            }),
        }
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    pub async fn hit(&self, key: &str) -> Decision {
        self.hit_at(key, Instant::now()).await
    }

    /// Counts one request from `key` at `now`.
    pub async fn hit_at(&self, key: &str, now: Instant) -> Decision {
        let mut table = self.table.lock().await;

        if now.saturating_duration_since(table.last_sweep) >= self.window {
            let window = self.window;
            let before = table.windows.len();
            table
                .windows
                .retain(|_, w| now.saturating_duration_since(w.opened) < window);
            table.last_sweep = now;
            log::debug!("rate limiter swept {} expired window(s)", before - table.windows.len());
        }

        let entry = table
            .windows
            .entry(key.to_string())
            .or_insert(Window { opened: now, hits: 0 });
        if now.saturating_duration_since(entry.opened) >= self.window {
            *entry = Window { opened: now, hits: 0 };
        }

        let reset_in = self
            .window
            .saturating_sub(now.saturating_duration_since(entry.opened));
        if entry.hits >= self.max {
            return Decision::Limited { retry_after: reset_in };
        }

        entry.hits += 1;
        Decision::Allowed {
            remaining: self.max - entry.hits,
            reset_in,
        }
    }

    pub async fn tracked_clients(&self) -> usize {
        self.table.lock().await.windows.len()
    }
}

pub struct RateLimit {
    limiter: FixedWindowLimiter,
}

impl RateLimit {
    pub fn new(max: u32, window: Duration) -> Self {
        Self {
            limiter: FixedWindowLimiter::new(max, window),
        }
    }
}

fn reset_timestamp(reset_in: Duration) -> i64 {
    let reset_in = chrono::Duration::from_std(reset_in).unwrap_or_else(|_| chrono::Duration::zero());
    (chrono::Utc::now() + reset_in).timestamp()
}

/// Rounds up so a client never retries a fraction of a second too early.
fn ceil_secs(duration: Duration) -> u64 {
    duration.as_secs() + u64::from(duration.subsec_nanos() > 0)
}

impl Stage for RateLimit {
    fn name(&self) -> &'static str {
        "rate-limit"
    }

    fn process<'a>(&'a self, exchange: &'a mut Exchange) -> LocalBoxFuture<'a, Result<Flow, AppError>> {
        Box::pin(async move {
            let key = exchange.client_key();
            let decision = self.limiter.hit(&key).await;

            exchange.queue_header(
                HeaderName::from_static("x-ratelimit-limit"),
                HeaderValue::from(self.limiter.max()),
            );

            match decision {
                Decision::Allowed { remaining, reset_in } => {
                    exchange.queue_header(
                        HeaderName::from_static("x-ratelimit-remaining"),
                        HeaderValue::from(remaining),
                    );
                    exchange.queue_header(
                        HeaderName::from_static("x-ratelimit-reset"),
                        HeaderValue::from(reset_timestamp(reset_in)),
                    );
                    Ok(Flow::Continue)
                }
                Decision::Limited { retry_after } => {
                    exchange.queue_header(
                        HeaderName::from_static("x-ratelimit-remaining"),
                        HeaderValue::from(0u32),
                    );
                    exchange.queue_header(
                        HeaderName::from_static("x-ratelimit-reset"),
                        HeaderValue::from(reset_timestamp(retry_after)),
                    );
                    log::warn!("rate limit exceeded for client {}", key);
                    Err(AppError::TooManyRequests {
                        retry_after_secs: ceil_secs(retry_after),
                    })
                }
            }
        })
    }
}
