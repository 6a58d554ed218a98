/// Sliding-window rate limiter with provider cooldown support
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// One call budget: at most `max_calls` grants inside any `window`.
#[derive(Debug, Clone, Copy)]
struct Budget {
    max_calls: u32,
    window: Duration,
}

struct LimiterState {
    calls: VecDeque<Instant>,
    last_call: Option<Instant>,
    penalty_until: Option<Instant>,
    penalty_count: u32,
}

/// Per-provider rate limiter.
///
/// `acquire` blocks until one more call stays inside every configured
/// budget, the minimum inter-call spacing, and any active penalty. It never
/// fails; it only waits. `penalize` is invoked by callers when the provider
/// signals throttling (HTTP 429) and forces the next grant to wait at least
/// the given cooldown.
pub struct RateLimiter {
    name: String,
    budgets: Vec<Budget>,
    min_interval: Duration,
    state: Arc<Mutex<LimiterState>>,
}

impl RateLimiter {
    pub fn new(name: &str, max_calls: u32, window: Duration, min_interval: Duration) -> Self {
        RateLimiter {
            name: name.to_string(),
            budgets: vec![Budget { max_calls, window }],
            min_interval,
            state: Arc::new(Mutex::new(LimiterState {
                calls: VecDeque::new(),
                last_call: None,
                penalty_until: None,
                penalty_count: 0,
            })),
        }
    }

    /// Stack an additional ceiling on top of the primary budget
    /// (e.g. a monthly call cap).
    pub fn with_budget(mut self, max_calls: u32, window: Duration) -> Self {
        self.budgets.push(Budget { max_calls, window });
        self
    }

    /// Wait until a call is safe under every budget, then record it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                match self.next_wait(&mut state, now) {
                    Some(wait) => wait,
                    None => {
                        state.calls.push_back(now);
                        state.last_call = Some(now);
                        return;
                    }
                }
            };

            debug!("{} rate limit: waiting {:.1}s", self.name, wait.as_secs_f64());
            tokio::time::sleep(wait).await;
        }
    }

    /// Force the next `acquire` to wait at least `cooldown`, regardless of
    /// the normal budgets. Penalties extend, never shorten.
    pub async fn penalize(&self, cooldown: Duration) {
        let mut state = self.state.lock().await;
        let until = Instant::now() + cooldown;
        let extended = match state.penalty_until {
            Some(existing) => existing.max(until),
            None => until,
        };
        state.penalty_until = Some(extended);
        state.penalty_count += 1;
        warn!(
            "{} penalized: cooling down for {:.0}s",
            self.name,
            cooldown.as_secs_f64()
        );
    }

    /// Grants recorded inside the trailing `window`.
    pub async fn calls_in_window(&self, window: Duration) -> usize {
        let state = self.state.lock().await;
        let now = Instant::now();
        state
            .calls
            .iter()
            .filter(|t| now.duration_since(**t) < window)
            .count()
    }

    /// Number of penalties applied over the limiter's lifetime.
    pub async fn penalty_count(&self) -> u32 {
        let state = self.state.lock().await;
        state.penalty_count
    }

    /// Compute how long the caller must wait before the next grant, or
    /// `None` when a call is safe right now.
    fn next_wait(&self, state: &mut LimiterState, now: Instant) -> Option<Duration> {
        // Active penalty dominates everything else
        if let Some(until) = state.penalty_until {
            if now < until {
                return Some(until - now);
            }
            state.penalty_until = None;
        }

        // Minimum inter-call spacing
        if let Some(last) = state.last_call {
            let since = now.duration_since(last);
            if since < self.min_interval {
                return Some(self.min_interval - since);
            }
        }

        // Prune timestamps older than the widest window
        if let Some(max_window) = self.budgets.iter().map(|b| b.window).max() {
            while let Some(front) = state.calls.front() {
                if now.duration_since(*front) >= max_window {
                    state.calls.pop_front();
                } else {
                    break;
                }
            }
        }

        // Each budget must have room for one more call
        let mut wait: Option<Duration> = None;
        for budget in &self.budgets {
            let in_window: Vec<Instant> = state
                .calls
                .iter()
                .copied()
                .filter(|t| now.duration_since(*t) < budget.window)
                .collect();
            if in_window.len() >= budget.max_calls as usize {
                // Safe to call again once the oldest in-window call expires
                let oldest = in_window[in_window.len() - budget.max_calls as usize];
                let until = oldest + budget.window;
                let needed = until.saturating_duration_since(now);
                wait = Some(match wait {
                    Some(w) => w.max(needed),
                    None => needed,
                });
            }
        }
        wait
    }
}
