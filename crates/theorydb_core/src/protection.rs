//! Client-side rate and concurrency limits.
//!
//! Neither limiter sits in the request path; callers wrap their own calls.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::error::{CoreError, CoreResult};
use crate::retry::{Clock, SystemClock};

/// Token bucket: `burst` tokens, refilled at `rps` per second in whole
/// tokens.
pub struct RateLimiter {
    clock: Arc<dyn Clock>,
    refill_interval: f64,
    max_tokens: u32,
    state: Mutex<Bucket>,
}

#[derive(Debug)]
struct Bucket {
    tokens: u32,
    last_refill: f64,
}

impl RateLimiter {
    /// A full bucket on the system clock.
    pub fn new(rps: f64, burst: u32) -> CoreResult<Self> {
        Self::with_clock(rps, burst, Arc::new(SystemClock))
    }

    /// A full bucket on `clock`.
    pub fn with_clock(rps: f64, burst: u32, clock: Arc<dyn Clock>) -> CoreResult<Self> {
        if !(rps.is_finite() && rps > 0.0) {
            return Err(CoreError::validation("rps must be > 0"));
        }
        if burst == 0 {
            return Err(CoreError::validation("burst must be > 0"));
        }
        let now = clock.now_unix();
        Ok(Self {
            clock,
            refill_interval: 1.0 / rps,
            max_tokens: burst,
            state: Mutex::new(Bucket {
                tokens: burst,
                last_refill: now,
            }),
        })
    }

    /// Take a token if one is available.
    pub fn allow(&self) -> bool {
        let mut bucket = self.state.lock();
        let now = self.clock.now_unix();
        let earned = ((now - bucket.last_refill) / self.refill_interval).floor();
        if earned >= 1.0 {
            let earned = earned.min(f64::from(self.max_tokens)) as u32;
            bucket.tokens = bucket.tokens.saturating_add(earned).min(self.max_tokens);
            bucket.last_refill = now;
        }
        if bucket.tokens > 0 {
            bucket.tokens -= 1;
            true
        } else {
            false
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("refill_interval", &self.refill_interval)
            .field("max_tokens", &self.max_tokens)
            .finish_non_exhaustive()
    }
}

/// Bounded semaphore handing out RAII permits.
#[derive(Debug)]
pub struct ConcurrencyLimiter {
    max: usize,
    in_use: Mutex<usize>,
    released: Condvar,
}

/// A held slot; dropping it frees the slot.
#[derive(Debug)]
#[must_use = "the slot is released when the permit is dropped"]
pub struct Permit<'a> {
    limiter: &'a ConcurrencyLimiter,
}

impl ConcurrencyLimiter {
    /// Allow up to `max_concurrent` permits at once.
    pub fn new(max_concurrent: usize) -> CoreResult<Self> {
        if max_concurrent == 0 {
            return Err(CoreError::validation("max_concurrent must be > 0"));
        }
        Ok(Self {
            max: max_concurrent,
            in_use: Mutex::new(0),
            released: Condvar::new(),
        })
    }

    /// Take a permit without blocking.
    pub fn try_acquire(&self) -> Option<Permit<'_>> {
        let mut in_use = self.in_use.lock();
        if *in_use >= self.max {
            return None;
        }
        *in_use += 1;
        Some(Permit { limiter: self })
    }

    /// Block until a permit is free.
    pub fn acquire(&self) -> Permit<'_> {
        let mut in_use = self.in_use.lock();
        while *in_use >= self.max {
            self.released.wait(&mut in_use);
        }
        *in_use += 1;
        Permit { limiter: self }
    }

    /// Permits currently held.
    pub fn in_use(&self) -> usize {
        *self.in_use.lock()
    }

    /// Permits available right now.
    pub fn available(&self) -> usize {
        self.max - self.in_use()
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        let mut in_use = self.limiter.in_use.lock();
        *in_use = in_use.saturating_sub(1);
        self.limiter.released.notify_one();
    }
}
