//! Admission control: allowlist membership plus a per-user sliding-window
//! rate limiter. Runs before any planning happens.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

use concierge_core::config::SecurityConfig;
use concierge_core::domain::request::UserId;
use concierge_core::errors::ErrorKind;

pub const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Monotonic time source for rate windows.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Test clock that only moves when told to.
#[derive(Clone, Debug)]
pub struct ManualClock {
    origin: Instant,
    elapsed: Arc<Mutex<Duration>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self { origin: Instant::now(), elapsed: Arc::new(Mutex::new(Duration::ZERO)) }
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        let mut elapsed = self.elapsed.lock().unwrap_or_else(PoisonError::into_inner);
        *elapsed += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let elapsed = self.elapsed.lock().unwrap_or_else(PoisonError::into_inner);
        self.origin + *elapsed
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("You are not authorised to use this bot.")]
    AccessDenied,
    #[error("Too many requests. Please slow down.")]
    RateLimited,
}

impl AdmissionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AccessDenied => ErrorKind::AccessDenied,
            Self::RateLimited => ErrorKind::RateLimited,
        }
    }
}

type RateWindow = Arc<Mutex<VecDeque<Instant>>>;

pub struct SecurityGuard {
    allowed_user_ids: HashSet<UserId>,
    rate_limit_rpm: i64,
    windows: RwLock<HashMap<UserId, RateWindow>>,
    clock: Arc<dyn Clock>,
}

impl SecurityGuard {
    pub fn new<I, U>(allowed_user_ids: I, rate_limit_rpm: i64, clock: Arc<dyn Clock>) -> Self
    where
        I: IntoIterator<Item = U>,
        U: Into<UserId>,
    {
        Self {
            allowed_user_ids: allowed_user_ids.into_iter().map(Into::into).collect(),
            rate_limit_rpm,
            windows: RwLock::new(HashMap::new()),
            clock,
        }
    }

    pub fn from_config(config: &SecurityConfig) -> Self {
        Self::new(
            config.allowed_user_ids.iter().cloned(),
            config.rate_limit_rpm,
            Arc::new(SystemClock),
        )
    }

    pub fn is_allowed(&self, user_id: &UserId) -> bool {
        self.allowed_user_ids.is_empty() || self.allowed_user_ids.contains(user_id)
    }

    /// Purges expired entries, then records `now` if the user still has room.
    /// Check and record happen under the user's own lock.
    pub fn check_rate_limit(&self, user_id: &UserId) -> bool {
        let window = self.window_for(user_id);
        let mut timestamps = window.lock().unwrap_or_else(PoisonError::into_inner);
        let now = self.clock.now();

        purge_expired(&mut timestamps, now);

        let in_window = i64::try_from(timestamps.len()).unwrap_or(i64::MAX);
        if in_window >= self.rate_limit_rpm {
            return false;
        }

        timestamps.push_back(now);
        true
    }

    /// Allowlist first, so a rejected user is never charged a rate slot.
    pub fn validate(&self, user_id: &UserId) -> Result<(), AdmissionError> {
        if !self.is_allowed(user_id) {
            warn!(
                event_name = "guard.request.rejected",
                user_id = %user_id,
                error_kind = ErrorKind::AccessDenied.as_str(),
                "user is not on the allowlist"
            );
            return Err(AdmissionError::AccessDenied);
        }

        if !self.check_rate_limit(user_id) {
            warn!(
                event_name = "guard.request.rejected",
                user_id = %user_id,
                error_kind = ErrorKind::RateLimited.as_str(),
                limit = self.rate_limit_rpm,
                "rate limit exceeded"
            );
            return Err(AdmissionError::RateLimited);
        }

        Ok(())
    }

    /// Drops windows that are empty after purging and not in use by a
    /// concurrent check. Returns how many were removed.
    pub fn evict_idle_windows(&self) -> usize {
        let now = self.clock.now();
        let mut windows = self.windows.write().unwrap_or_else(PoisonError::into_inner);
        let before = windows.len();

        windows.retain(|_, window| {
            if Arc::strong_count(window) > 1 {
                return true;
            }
            let mut timestamps = window.lock().unwrap_or_else(PoisonError::into_inner);
            purge_expired(&mut timestamps, now);
            !timestamps.is_empty()
        });

        let evicted = before - windows.len();
        if evicted > 0 {
            debug!(
                event_name = "guard.windows.evicted",
                evicted,
                remaining = windows.len(),
                "evicted idle rate windows"
            );
        }
        evicted
    }

    pub fn tracked_users(&self) -> usize {
        self.windows.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn window_for(&self, user_id: &UserId) -> RateWindow {
        {
            let windows = self.windows.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(window) = windows.get(user_id) {
                return Arc::clone(window);
            }
        }

        let mut windows = self.windows.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(windows.entry(user_id.clone()).or_default())
    }
}

fn purge_expired(timestamps: &mut VecDeque<Instant>, now: Instant) {
    // Before the clock has run for a full window nothing can be expired.
    let Some(cutoff) = now.checked_sub(RATE_WINDOW) else {
        return;
    };
    while timestamps.front().is_some_and(|stamp| *stamp < cutoff) {
        timestamps.pop_front();
    }
}
