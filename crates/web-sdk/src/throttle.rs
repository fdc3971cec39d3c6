//! Leading-edge rate limiter for high-frequency signals (pointer movement,
//! scroll). Calls inside the window are dropped, never queued or delayed.

/// Admission state of a leading-edge throttle.
#[derive(Debug, Clone)]
pub struct Throttle {
    min_interval_ms: i64,
    last_fired: Option<i64>,
}

impl Throttle {
    pub fn new(min_interval_ms: u64) -> Self {
        Self {
            min_interval_ms: i64::try_from(min_interval_ms).unwrap_or(i64::MAX),
            last_fired: None,
        }
    }

    /// Returns true and records `now_ms` if at least the minimum interval has
    /// elapsed since the last admitted call.
    pub fn admit(&mut self, now_ms: i64) -> bool {
        if let Some(last) = self.last_fired {
            if now_ms < last.saturating_add(self.min_interval_ms) {
                return false;
            }
        }
        self.last_fired = Some(now_ms);
        true
    }

    pub fn reset(&mut self) {
        self.last_fired = None;
    }
}

/// A function wrapped by [`limit`].
#[derive(Debug, Clone)]
pub struct Limited<F> {
    f: F,
    throttle: Throttle,
}

impl<F> Limited<F> {
    /// Invoke the wrapped function at `now_ms` unless the call falls inside
    /// the window. Returns `None` for dropped calls.
    pub fn call<A, R>(&mut self, now_ms: i64, arg: A) -> Option<R>
    where
        F: FnMut(A) -> R,
    {
        if self.throttle.admit(now_ms) {
            Some((self.f)(arg))
        } else {
            None
        }
    }

    /// Open a fresh window: the next call executes.
    pub fn reset(&mut self) {
        self.throttle.reset();
    }
}

/// Wrap `f` so that it executes at most once per `min_interval_ms`.
pub fn limit<F>(f: F, min_interval_ms: u64) -> Limited<F> {
    Limited {
        f,
        throttle: Throttle::new(min_interval_ms),
    }
}
