//! Per-tenant circuit breaker state machine.
//!
//! The transition logic here is pure: callers load a [`BreakerSnapshot`]
//! from the shared key-value store, apply an event, and persist the result.
//! Keeping the math out of the storage layer means every instance of the
//! service computes identical transitions over the same persisted counters.
//!
//! ```text
//! Closed   -> Open      failure_count reaches failure_threshold
//! Open     -> HalfOpen  recovery_timeout elapsed since last failure
//! HalfOpen -> Closed    success_threshold consecutive successes
//! HalfOpen -> Open      any failure during the trial
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "closed" => Some(Self::Closed),
            "open" => Some(Self::Open),
            "half_open" => Some(Self::HalfOpen),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Failures within a day before the breaker opens.
    pub failure_threshold: u32,
    /// Seconds the breaker stays open before allowing a half-open trial.
    pub recovery_timeout_secs: u64,
    /// Consecutive half-open successes required to close again.
    pub success_threshold: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self { failure_threshold: 5, recovery_timeout_secs: 1800, success_threshold: 2 }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
}

impl Default for BreakerSnapshot {
    fn default() -> Self {
        Self {
            state: BreakerState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_at: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BreakerAvailability {
    /// Calls may proceed. `trial` marks the single half-open probe.
    Allowed { trial: bool },
    /// The breaker is open; no call may proceed before `retry_at`.
    Blocked { retry_at: Option<DateTime<Utc>> },
}

#[derive(Clone, Copy, Debug, Default)]
pub struct BreakerPolicy {
    config: BreakerConfig,
}

impl BreakerPolicy {
    pub fn new(config: BreakerConfig) -> Self {
        Self { config }
    }

    fn recovery_window(&self) -> Duration {
        Duration::seconds(self.config.recovery_timeout_secs as i64)
    }

    /// Resolve the effective state at `now`, promoting an elapsed Open
    /// breaker to HalfOpen without waiting for the next failure event.
    pub fn effective_state(&self, snapshot: &BreakerSnapshot, now: DateTime<Utc>) -> BreakerState {
        match snapshot.state {
            BreakerState::Open => {
                let elapsed = snapshot
                    .last_failure_at
                    .map_or(true, |at| now >= at + self.recovery_window());
                if elapsed {
                    BreakerState::HalfOpen
                } else {
                    BreakerState::Open
                }
            }
            other => other,
        }
    }

    pub fn availability(
        &self,
        snapshot: &BreakerSnapshot,
        now: DateTime<Utc>,
    ) -> BreakerAvailability {
        match self.effective_state(snapshot, now) {
            BreakerState::Closed => BreakerAvailability::Allowed { trial: false },
            BreakerState::HalfOpen => BreakerAvailability::Allowed { trial: true },
            BreakerState::Open => BreakerAvailability::Blocked {
                retry_at: snapshot.last_failure_at.map(|at| at + self.recovery_window()),
            },
        }
    }

    pub fn on_success(&self, snapshot: &BreakerSnapshot, now: DateTime<Utc>) -> BreakerSnapshot {
        match self.effective_state(snapshot, now) {
            BreakerState::HalfOpen => {
                let success_count = snapshot.success_count + 1;
                if success_count >= self.config.success_threshold {
                    BreakerSnapshot::default()
                } else {
                    BreakerSnapshot {
                        state: BreakerState::HalfOpen,
                        failure_count: snapshot.failure_count,
                        success_count,
                        last_failure_at: snapshot.last_failure_at,
                    }
                }
            }
            // A success while open-but-not-elapsed should not happen (the
            // caller was vetoed); treat it as closed-path bookkeeping.
            BreakerState::Closed | BreakerState::Open => BreakerSnapshot {
                state: BreakerState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure_at: snapshot.last_failure_at,
            },
        }
    }

    pub fn on_failure(&self, snapshot: &BreakerSnapshot, now: DateTime<Utc>) -> BreakerSnapshot {
        match self.effective_state(snapshot, now) {
            BreakerState::HalfOpen => BreakerSnapshot {
                state: BreakerState::Open,
                failure_count: snapshot.failure_count + 1,
                success_count: 0,
                last_failure_at: Some(now),
            },
            BreakerState::Closed => {
                let failure_count = snapshot.failure_count + 1;
                let state = if failure_count >= self.config.failure_threshold {
                    BreakerState::Open
                } else {
                    BreakerState::Closed
                };
                BreakerSnapshot {
                    state,
                    failure_count,
                    success_count: 0,
                    last_failure_at: Some(now),
                }
            }
            BreakerState::Open => BreakerSnapshot {
                state: BreakerState::Open,
                failure_count: snapshot.failure_count + 1,
                success_count: 0,
                last_failure_at: Some(now),
            },
        }
    }
}
