use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

/// Request budget for one sliding window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowLimit {
    /// Maximum cost granted within any `period`
    pub capacity: u32,
    pub period: Duration,
}

impl WindowLimit {
    pub fn new(capacity: u32, period: Duration) -> Self {
        Self { capacity, period }
    }
}

#[derive(Debug)]
struct Window {
    limit: WindowLimit,
    /// Grants still inside the window, oldest first
    grants: VecDeque<(Instant, u32)>,
    used: u32,
}

impl Window {
    fn new(limit: WindowLimit) -> Self {
        Self {
            limit,
            grants: VecDeque::new(),
            used: 0,
        }
    }

    fn prune(&mut self, now: Instant) {
        while let Some(&(at, cost)) = self.grants.front() {
            if now.duration_since(at) >= self.limit.period {
                self.grants.pop_front();
                self.used -= cost;
            } else {
                break;
            }
        }
    }

    /// Time until `cost` fits, or zero if it fits now
    fn wait_for(&self, cost: u32, now: Instant) -> Duration {
        if self.used + cost <= self.limit.capacity {
            return Duration::ZERO;
        }

        // Walk the oldest grants until enough budget would be released
        let mut released = 0;
        for &(at, grant) in &self.grants {
            released += grant;
            if self.used - released + cost <= self.limit.capacity {
                return (at + self.limit.period).saturating_duration_since(now);
            }
        }
        self.limit.period
    }

    fn record(&mut self, cost: u32, now: Instant) {
        self.grants.push_back((now, cost));
        self.used += cost;
    }
}

#[derive(Debug)]
struct LimiterState {
    windows: Vec<Window>,
    paused_until: Option<Instant>,
}

/// Multi-window sliding rate limiter.
///
/// All windows are checked and charged under a single lock so concurrent
/// callers can never jointly overshoot a window. The lock is never held
/// across an await point.
#[derive(Debug)]
pub struct RateLimiter {
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    pub fn new(limits: &[WindowLimit]) -> Self {
        Self {
            state: Mutex::new(LimiterState {
                windows: limits.iter().copied().map(Window::new).collect(),
                paused_until: None,
            }),
        }
    }

    /// Try to spend `cost` from every window.
    ///
    /// Returns `Duration::ZERO` when the cost was granted, otherwise how long
    /// the caller should wait before trying again. Nothing is charged when a
    /// wait is returned.
    pub fn acquire(&self, cost: u32) -> Duration {
        let now = Instant::now();
        let mut state = self.state.lock();

        if let Some(until) = state.paused_until {
            if until > now {
                return until - now;
            }
            state.paused_until = None;
        }

        let mut wait = Duration::ZERO;
        for window in state.windows.iter_mut() {
            window.prune(now);
            let cost = clamp_cost(cost, &window.limit);
            wait = wait.max(window.wait_for(cost, now));
        }

        if wait.is_zero() {
            for window in state.windows.iter_mut() {
                let cost = clamp_cost(cost, &window.limit);
                window.record(cost, now);
            }
        }

        wait
    }

    /// Wait until `cost` has been granted
    pub async fn until_ready(&self, cost: u32) {
        loop {
            let wait = self.acquire(cost);
            if wait.is_zero() {
                return;
            }
            debug!("Rate limiter full, waiting {:?}", wait);
            sleep(wait).await;
        }
    }

    /// Refuse all grants for `duration`, e.g. after the server answered 429
    pub fn pause_for(&self, duration: Duration) {
        let until = Instant::now() + duration;
        let mut state = self.state.lock();
        if state.paused_until.map_or(true, |current| current < until) {
            state.paused_until = Some(until);
        }
    }

    /// Cost currently charged against each window, in configuration order
    pub fn usage(&self) -> Vec<u32> {
        let now = Instant::now();
        let mut state = self.state.lock();
        state
            .windows
            .iter_mut()
            .map(|w| {
                w.prune(now);
                w.used
            })
            .collect()
    }
}

fn clamp_cost(cost: u32, limit: &WindowLimit) -> u32 {
    if cost > limit.capacity {
        warn!(
            "Request cost {} exceeds window capacity {}, clamping",
            cost, limit.capacity
        );
        limit.capacity
    } else {
        cost
    }
}

/// One limiter per routing host, created on first use.
///
/// Regional and platform hosts have independent budgets upstream, so they
/// get independent locks here.
#[derive(Debug)]
pub struct RateLimiterRegistry {
    limits: Vec<WindowLimit>,
    limiters: DashMap<String, Arc<RateLimiter>>,
}

impl RateLimiterRegistry {
    pub fn new(limits: Vec<WindowLimit>) -> Self {
        Self {
            limits,
            limiters: DashMap::new(),
        }
    }

    pub fn limiter(&self, host: &str) -> Arc<RateLimiter> {
        if let Some(limiter) = self.limiters.get(host) {
            return Arc::clone(&limiter);
        }

        let limiter = self
            .limiters
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(RateLimiter::new(&self.limits)));
        Arc::clone(&limiter)
    }
}
