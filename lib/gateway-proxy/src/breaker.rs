//! Circuit breaker guarding the resolve-and-forward path

use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Breaker phase. Transitions happen only inside the breaker itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CircuitPhase {
    /// Normal operation, calls flow through.
    Closed,
    /// Fast-fail, calls rejected until the reset timeout elapses.
    Open,
    /// One trial call in flight to probe recovery.
    HalfOpen,
}

#[derive(Clone, Debug)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// How long the circuit stays open before permitting a trial.
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    phase: CircuitPhase,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

/// A call attempt rejected without touching the dependency.
#[derive(Debug)]
pub struct RejectedCall {
    /// Time remaining until a trial call will be permitted. Zero when a
    /// half-open trial is already in flight.
    pub retry_after: Duration,
}

/// Circuit breaker with wall-clock reset evaluated at acquire time.
///
/// One instance guards the whole dispatch chain. Callers obtain a
/// [`CallPermit`] per attempt and record exactly one outcome on it; outcomes
/// that say nothing about dependency health are recorded as `abandon` and do
/// not move the failure counter.
pub struct CircuitBreaker {
    state: Mutex<BreakerState>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            state: Mutex::new(BreakerState {
                phase: CircuitPhase::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_in_flight: false,
            }),
            config,
        }
    }

    pub fn phase(&self) -> CircuitPhase {
        self.lock().phase
    }

    /// Ask to make one guarded call.
    ///
    /// While open, the elapsed time since `opened_at` decides: within the
    /// reset timeout the call is rejected outright; past it the breaker moves
    /// to half-open and this caller becomes the single trial.
    pub fn try_acquire(&self) -> Result<CallPermit<'_>, RejectedCall> {
        let mut state = self.lock();
        match state.phase {
            CircuitPhase::Closed => Ok(CallPermit::new(self, false)),
            CircuitPhase::Open => {
                let elapsed = state
                    .opened_at
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.config.reset_timeout {
                    debug!("Circuit breaker: reset timeout elapsed, permitting trial call");
                    state.phase = CircuitPhase::HalfOpen;
                    state.trial_in_flight = true;
                    Ok(CallPermit::new(self, true))
                } else {
                    Err(RejectedCall {
                        retry_after: self.config.reset_timeout - elapsed,
                    })
                }
            }
            CircuitPhase::HalfOpen => {
                if state.trial_in_flight {
                    Err(RejectedCall {
                        retry_after: Duration::ZERO,
                    })
                } else {
                    debug!("Circuit breaker: permitting trial call");
                    state.trial_in_flight = true;
                    Ok(CallPermit::new(self, true))
                }
            }
        }
    }

    fn on_success(&self, trial: bool) {
        let mut state = self.lock();
        match state.phase {
            CircuitPhase::HalfOpen if trial => {
                debug!("Circuit breaker: trial succeeded, closing circuit");
                state.phase = CircuitPhase::Closed;
                state.consecutive_failures = 0;
                state.opened_at = None;
                state.trial_in_flight = false;
            }
            CircuitPhase::Closed => {
                state.consecutive_failures = 0;
            }
            // Late result from before a phase change; nothing to learn.
            _ => {}
        }
    }

    fn on_failure(&self, trial: bool) {
        let mut state = self.lock();
        match state.phase {
            CircuitPhase::HalfOpen if trial => {
                warn!("Circuit breaker: trial failed, reopening circuit");
                state.phase = CircuitPhase::Open;
                state.opened_at = Some(Instant::now());
                state.trial_in_flight = false;
            }
            CircuitPhase::Closed => {
                state.consecutive_failures += 1;
                if state.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        failures = state.consecutive_failures,
                        "Circuit breaker: failure threshold reached, opening circuit"
                    );
                    state.phase = CircuitPhase::Open;
                    state.opened_at = Some(Instant::now());
                }
            }
            _ => {}
        }
    }

    fn on_abandon(&self, trial: bool) {
        if !trial {
            return;
        }
        let mut state = self.lock();
        if state.phase == CircuitPhase::HalfOpen {
            debug!("Circuit breaker: trial abandoned, slot released");
            state.trial_in_flight = false;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Permission for one guarded call. Record exactly one outcome:
/// [`success`](CallPermit::success), [`failure`](CallPermit::failure) or
/// [`abandon`](CallPermit::abandon). Dropping an unresolved permit abandons
/// it, so a cancelled call can never strand the breaker in half-open.
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    resolved: bool,
}

impl std::fmt::Debug for CallPermit<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallPermit")
            .field("trial", &self.trial)
            .field("resolved", &self.resolved)
            .finish()
    }
}

impl<'a> CallPermit<'a> {
    fn new(breaker: &'a CircuitBreaker, trial: bool) -> Self {
        Self {
            breaker,
            trial,
            resolved: false,
        }
    }

    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn success(mut self) {
        self.resolved = true;
        self.breaker.on_success(self.trial);
    }

    pub fn failure(mut self) {
        self.resolved = true;
        self.breaker.on_failure(self.trial);
    }

    /// The call concluded without saying anything about dependency health.
    pub fn abandon(mut self) {
        self.resolved = true;
        self.breaker.on_abandon(self.trial);
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.resolved {
            self.breaker.on_abandon(self.trial);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    fn breaker(threshold: u32, reset: Duration) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: threshold,
            reset_timeout: reset,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_exactly_threshold_failures() {
        let cb = breaker(3, Duration::from_secs(10));

        for _ in 0..2 {
            cb.try_acquire().expect("closed").failure();
        }
        assert_eq!(cb.phase(), CircuitPhase::Closed);

        cb.try_acquire().expect("closed").failure();
        assert_eq!(cb.phase(), CircuitPhase::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_consecutive_failures() {
        let cb = breaker(3, Duration::from_secs(10));

        cb.try_acquire().expect("closed").failure();
        cb.try_acquire().expect("closed").failure();
        cb.try_acquire().expect("closed").success();
        cb.try_acquire().expect("closed").failure();
        cb.try_acquire().expect("closed").failure();
        assert_eq!(cb.phase(), CircuitPhase::Closed);

        cb.try_acquire().expect("closed").failure();
        assert_eq!(cb.phase(), CircuitPhase::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_rejects_within_reset_timeout() {
        let cb = breaker(1, Duration::from_secs(10));
        cb.try_acquire().expect("closed").failure();

        advance(Duration::from_secs(9)).await;
        let rejected = cb.try_acquire().expect_err("must reject while open");
        assert_eq!(rejected.retry_after, Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_trial_success_closes_circuit() {
        let cb = breaker(1, Duration::from_secs(10));
        cb.try_acquire().expect("closed").failure();

        advance(Duration::from_secs(10)).await;
        let trial = cb.try_acquire().expect("trial permitted");
        assert!(trial.is_trial());
        trial.success();
        assert_eq!(cb.phase(), CircuitPhase::Closed);

        // Counter was reset along with the close.
        cb.try_acquire().expect("closed").success();
        assert_eq!(cb.phase(), CircuitPhase::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trial_failure_reopens_with_fresh_clock() {
        let cb = breaker(1, Duration::from_secs(10));
        cb.try_acquire().expect("closed").failure();

        advance(Duration::from_secs(10)).await;
        cb.try_acquire().expect("trial permitted").failure();
        assert_eq!(cb.phase(), CircuitPhase::Open);

        // The reopen restarted the reset clock.
        advance(Duration::from_secs(9)).await;
        assert!(cb.try_acquire().is_err());
        advance(Duration::from_secs(1)).await;
        assert!(cb.try_acquire().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_trial_while_half_open() {
        let cb = breaker(1, Duration::from_secs(10));
        cb.try_acquire().expect("closed").failure();
        advance(Duration::from_secs(10)).await;

        let trial = cb.try_acquire().expect("trial permitted");
        let rejected = cb.try_acquire().expect_err("second caller rejected");
        assert_eq!(rejected.retry_after, Duration::ZERO);
        trial.success();
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_trial_releases_slot() {
        let cb = breaker(1, Duration::from_secs(10));
        cb.try_acquire().expect("closed").failure();
        advance(Duration::from_secs(10)).await;

        cb.try_acquire().expect("trial permitted").abandon();
        assert_eq!(cb.phase(), CircuitPhase::HalfOpen);

        // Slot free again; phase unchanged.
        let trial = cb.try_acquire().expect("next trial permitted");
        trial.success();
        assert_eq!(cb.phase(), CircuitPhase::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_permit_counts_as_abandon() {
        let cb = breaker(1, Duration::from_secs(10));
        cb.try_acquire().expect("closed").failure();
        advance(Duration::from_secs(10)).await;

        {
            let _trial = cb.try_acquire().expect("trial permitted");
            // Caller disconnected before the call resolved.
        }
        assert!(cb.try_acquire().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandon_while_closed_does_not_count() {
        let cb = breaker(1, Duration::from_secs(10));
        cb.try_acquire().expect("closed").abandon();
        assert_eq!(cb.phase(), CircuitPhase::Closed);
        cb.try_acquire().expect("still closed").success();
    }
}
