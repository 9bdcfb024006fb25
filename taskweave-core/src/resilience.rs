// Copyright 2025 Taskweave (https://github.com/taskweave)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Resilience primitives: circuit breaker guarding a flaky dependency.
//!
//! Transitions are pure functions of `(state, outcome, now)`. The breaker
//! never reads the clock itself, so tests drive it with fabricated instants.
//! A cancelled call records neither success nor failure; only retryable
//! failures (timeouts, refused connections) count toward the trip tally.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Classifies an operation error for the breaker's failure tally.
pub trait FailureClass {
    /// Retryable failures (timeout, connection refused) count toward
    /// tripping the breaker; non-retryable ones (bad request) do not:
    /// the dependency answered, it just didn't like the request.
    fn is_retryable(&self) -> bool;
}

/// Breaker tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitConfig {
    /// Consecutive retryable failures before the circuit opens.
    pub failure_threshold: u32,
    /// First cooldown after opening.
    pub initial_cooldown: Duration,
    /// Cooldown growth is capped here (exponential doubling until the cap).
    pub max_cooldown: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            initial_cooldown: Duration::from_secs(2),
            max_cooldown: Duration::from_secs(60),
        }
    }
}

/// Snapshot of the breaker state, for status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
enum Inner {
    Closed {
        failures: u32,
    },
    Open {
        until: Instant,
        cooldown: Duration,
    },
    HalfOpen {
        cooldown: Duration,
        probe_in_flight: bool,
    },
}

/// Rejection raised without touching the network.
#[derive(Debug, Error)]
pub enum CircuitError<E: std::error::Error> {
    /// Circuit is open (or a half-open probe is already in flight).
    #[error("circuit open, retry after {retry_after:?}")]
    Open { retry_after: Duration },
    /// The guarded operation itself failed.
    #[error("operation failed: {0}")]
    Inner(E),
}

/// Circuit breaker with exponential-cooldown recovery.
///
/// Shared mutable state per logical collection; every transition happens
/// under one mutex and callers observe a consistent snapshot per call.
pub struct CircuitBreaker {
    state: Mutex<Inner>,
    config: CircuitConfig,
}

impl CircuitBreaker {
    pub fn new(config: CircuitConfig) -> Self {
        Self {
            state: Mutex::new(Inner::Closed { failures: 0 }),
            config,
        }
    }

    /// Current state as observed at `now`.
    pub fn state_at(&self, now: Instant) -> BreakerState {
        let state = self.state.lock();
        match *state {
            Inner::Closed { .. } => BreakerState::Closed,
            Inner::Open { until, .. } => {
                if now >= until {
                    BreakerState::HalfOpen
                } else {
                    BreakerState::Open
                }
            }
            Inner::HalfOpen { .. } => BreakerState::HalfOpen,
        }
    }

    /// Ask to proceed with a call at `now`.
    ///
    /// `Ok(permit)` means the call may go out; the permit must be resolved
    /// with `success`/`failure`, or dropped on cancellation (which counts
    /// as neither). `Err(retry_after)` means fail fast.
    pub fn try_acquire(&self, now: Instant) -> Result<CallPermit<'_>, Duration> {
        let mut state = self.state.lock();
        match *state {
            Inner::Closed { .. } => Ok(CallPermit::new(self, false)),
            Inner::Open { until, cooldown } => {
                if now >= until {
                    *state = Inner::HalfOpen {
                        cooldown,
                        probe_in_flight: true,
                    };
                    tracing::debug!("circuit half-open, sending probe");
                    Ok(CallPermit::new(self, true))
                } else {
                    Err(until.saturating_duration_since(now))
                }
            }
            Inner::HalfOpen {
                cooldown,
                probe_in_flight,
            } => {
                if probe_in_flight {
                    // One probe at a time; other callers fail fast.
                    Err(Duration::ZERO)
                } else {
                    *state = Inner::HalfOpen {
                        cooldown,
                        probe_in_flight: true,
                    };
                    Ok(CallPermit::new(self, true))
                }
            }
        }
    }

    fn record_success(&self) {
        let mut state = self.state.lock();
        match *state {
            Inner::Closed { .. } => {
                *state = Inner::Closed { failures: 0 };
            }
            Inner::HalfOpen { .. } => {
                tracing::info!("circuit probe succeeded, closing");
                *state = Inner::Closed { failures: 0 };
            }
            // A success can land after the breaker re-opened for another
            // caller's failure; the open verdict stands.
            Inner::Open { .. } => {}
        }
    }

    fn record_failure(&self, now: Instant) {
        let mut state = self.state.lock();
        match *state {
            Inner::Closed { failures } => {
                let failures = failures + 1;
                if failures >= self.config.failure_threshold {
                    let cooldown = self.config.initial_cooldown;
                    tracing::warn!(?cooldown, "circuit opened after consecutive failures");
                    *state = Inner::Open {
                        until: now + cooldown,
                        cooldown,
                    };
                } else {
                    *state = Inner::Closed { failures };
                }
            }
            Inner::HalfOpen { cooldown, .. } => {
                let next = (cooldown * 2).min(self.config.max_cooldown);
                tracing::warn!(cooldown = ?next, "circuit probe failed, reopening");
                *state = Inner::Open {
                    until: now + next,
                    cooldown: next,
                };
            }
            Inner::Open { .. } => {}
        }
    }

    fn release_probe(&self) {
        let mut state = self.state.lock();
        if let Inner::HalfOpen { cooldown, .. } = *state {
            // Cancelled probe: allow the next caller to probe instead.
            *state = Inner::HalfOpen {
                cooldown,
                probe_in_flight: false,
            };
        }
    }

    /// Run `operation` under the breaker, reading the clock once per call.
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: FailureClass + std::error::Error,
    {
        let now = Instant::now();
        let permit = self
            .try_acquire(now)
            .map_err(|retry_after| CircuitError::Open { retry_after })?;

        let result = operation().await;
        match &result {
            Ok(_) => permit.success(),
            Err(e) => permit.failure(Instant::now(), e.is_retryable()),
        }
        result.map_err(CircuitError::Inner)
    }
}

/// Permission to run one guarded call. Dropping it without resolving
/// records no outcome (cancellation semantics) and releases a half-open
/// probe slot.
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    resolved: bool,
}

impl<'a> CallPermit<'a> {
    fn new(breaker: &'a CircuitBreaker, probe: bool) -> Self {
        Self {
            breaker,
            probe,
            resolved: false,
        }
    }

    /// Record a successful call.
    pub fn success(mut self) {
        self.resolved = true;
        self.breaker.record_success();
    }

    /// Record a failed call. Non-retryable failures reached the dependency
    /// and got an answer, so they close a half-open probe like a success
    /// and leave the tally alone.
    pub fn failure(mut self, now: Instant, retryable: bool) {
        self.resolved = true;
        if retryable {
            self.breaker.record_failure(now);
        } else {
            self.breaker.record_success();
        }
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.resolved && self.probe {
            self.breaker.release_probe();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(CircuitConfig::default())
    }

    fn fail(b: &CircuitBreaker, now: Instant) {
        let permit = b.try_acquire(now).expect("call allowed");
        permit.failure(now, true);
    }

    #[test]
    fn test_opens_after_three_consecutive_failures() {
        let b = breaker();
        let t0 = Instant::now();
        fail(&b, t0);
        fail(&b, t0);
        assert_eq!(b.state_at(t0), BreakerState::Closed);
        fail(&b, t0);
        assert_eq!(b.state_at(t0), BreakerState::Open);
        assert!(b.try_acquire(t0).is_err());
    }

    #[test]
    fn test_success_resets_failure_tally() {
        let b = breaker();
        let t0 = Instant::now();
        fail(&b, t0);
        fail(&b, t0);
        b.try_acquire(t0).unwrap().success();
        fail(&b, t0);
        fail(&b, t0);
        assert_eq!(b.state_at(t0), BreakerState::Closed);
    }

    #[test]
    fn test_half_open_probe_closes_on_success() {
        let b = breaker();
        let t0 = Instant::now();
        for _ in 0..3 {
            fail(&b, t0);
        }
        let after_cooldown = t0 + Duration::from_secs(2);
        let permit = b.try_acquire(after_cooldown).expect("probe allowed");
        permit.success();
        assert_eq!(b.state_at(after_cooldown), BreakerState::Closed);
    }

    #[test]
    fn test_cooldown_doubles_on_probe_failure() {
        let b = breaker();
        let t0 = Instant::now();
        for _ in 0..3 {
            fail(&b, t0);
        }
        // First cooldown: 2s.
        let t1 = t0 + Duration::from_secs(2);
        let probe = b.try_acquire(t1).expect("probe allowed");
        probe.failure(t1, true);
        // Second cooldown: 4s. Not yet elapsed at +3s.
        assert!(b.try_acquire(t1 + Duration::from_secs(3)).is_err());
        let t2 = t1 + Duration::from_secs(4);
        let probe = b.try_acquire(t2).expect("probe allowed");
        probe.success();
        assert_eq!(b.state_at(t2), BreakerState::Closed);
    }

    #[test]
    fn test_only_one_probe_at_a_time() {
        let b = breaker();
        let t0 = Instant::now();
        for _ in 0..3 {
            fail(&b, t0);
        }
        let t1 = t0 + Duration::from_secs(2);
        let _probe = b.try_acquire(t1).expect("probe allowed");
        assert!(b.try_acquire(t1).is_err());
    }

    #[test]
    fn test_cancelled_probe_releases_slot() {
        let b = breaker();
        let t0 = Instant::now();
        for _ in 0..3 {
            fail(&b, t0);
        }
        let t1 = t0 + Duration::from_secs(2);
        {
            let _probe = b.try_acquire(t1).expect("probe allowed");
            // Dropped without an outcome: cancellation.
        }
        assert!(b.try_acquire(t1).is_ok());
    }

    #[test]
    fn test_cancelled_call_counts_as_neither() {
        let b = breaker();
        let t0 = Instant::now();
        fail(&b, t0);
        fail(&b, t0);
        {
            let _permit = b.try_acquire(t0).unwrap();
        }
        // Still two failures on the tally: one more trips it.
        fail(&b, t0);
        assert_eq!(b.state_at(t0), BreakerState::Open);
    }

    #[test]
    fn test_non_retryable_failure_does_not_trip() {
        let b = breaker();
        let t0 = Instant::now();
        for _ in 0..5 {
            let permit = b.try_acquire(t0).unwrap();
            permit.failure(t0, false);
        }
        assert_eq!(b.state_at(t0), BreakerState::Closed);
    }

    #[test]
    fn test_cooldown_caps_at_max() {
        let config = CircuitConfig {
            failure_threshold: 1,
            initial_cooldown: Duration::from_secs(2),
            max_cooldown: Duration::from_secs(8),
        };
        let b = CircuitBreaker::new(config);
        let mut now = Instant::now();
        fail(&b, now);
        // Walk through several probe failures; cooldown: 2, 4, 8, 8, ...
        for expected_secs in [2u64, 4, 8, 8] {
            now += Duration::from_secs(expected_secs);
            let probe = b.try_acquire(now).expect("probe allowed");
            probe.failure(now, true);
            // Just before the next cooldown elapses the circuit is closed
            // to traffic.
            let next = (expected_secs * 2).min(8);
            assert!(b.try_acquire(now + Duration::from_secs(next) - Duration::from_millis(1)).is_err());
        }
    }
}
