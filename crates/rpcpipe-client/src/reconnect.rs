use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

/// Automatic reconnection policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    /// Attempts allowed before giving up.
    pub max_attempts: u32,
    /// Delay unit; attempt `n` waits `base_delay * 2^n`.
    pub base_delay: Duration,
    /// Ceiling for any single delay.
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl ReconnectPolicy {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_delays(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }

    /// `min(base_delay * 2^attempt, max_delay)`.
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Attempt accounting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconnectState {
    pub attempts: u32,
    pub max_attempts: u32,
    pub in_progress: bool,
}

/// What to do after a disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Nothing: reconnection is disabled, disarmed, or already running.
    Idle,
    /// Wait `delay`, then try again.
    Retry { attempt: u32, delay: Duration },
    /// Out of attempts; stay down until an explicit connect.
    Exhausted { attempts: u32 },
}

/// Decides when to reconnect. Owns no I/O: the driver asks it for a
/// decision on each disconnect and for the next due time.
#[derive(Debug)]
pub struct Supervisor {
    policy: ReconnectPolicy,
    state: ReconnectState,
    armed: bool,
    next_attempt: Option<Instant>,
}

impl Supervisor {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            state: ReconnectState {
                attempts: 0,
                max_attempts: policy.max_attempts,
                in_progress: false,
            },
            policy,
            armed: true,
            next_attempt: None,
        }
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    pub fn state(&self) -> ReconnectState {
        self.state
    }

    /// A reconnect sequence is running (waiting or attempting).
    pub fn is_reconnecting(&self) -> bool {
        self.state.in_progress
    }

    /// When the next attempt is due, if one is scheduled.
    pub fn due(&self) -> Option<Instant> {
        self.next_attempt
    }

    /// The session dropped.
    pub fn on_disconnected(&mut self, now: Instant) -> ReconnectDecision {
        if !self.policy.enabled || !self.armed || self.state.in_progress {
            return ReconnectDecision::Idle;
        }

        self.state.attempts += 1;
        if self.state.attempts > self.state.max_attempts {
            warn!(attempts = self.state.max_attempts, "reconnection exhausted");
            self.armed = false;
            self.next_attempt = None;
            return ReconnectDecision::Exhausted {
                attempts: self.state.max_attempts,
            };
        }

        let attempt = self.state.attempts;
        let delay = self.policy.backoff_for_attempt(attempt);
        self.state.in_progress = true;
        self.next_attempt = Some(now + delay);
        info!(attempt, delay_ms = delay.as_millis() as u64, "reconnect scheduled");
        ReconnectDecision::Retry { attempt, delay }
    }

    /// The scheduled attempt is starting now.
    pub fn begin_attempt(&mut self) {
        self.next_attempt = None;
    }

    /// The attempt did not reach READY.
    pub fn attempt_failed(&mut self, now: Instant) -> ReconnectDecision {
        self.state.in_progress = false;
        self.on_disconnected(now)
    }

    /// READY reached. Returns whether this completed a reconnect.
    pub fn on_ready(&mut self) -> bool {
        let reconnected = self.state.in_progress || self.state.attempts > 0;
        self.state.attempts = 0;
        self.state.in_progress = false;
        self.next_attempt = None;
        self.armed = true;
        reconnected
    }

    /// Stop reconnecting (explicit close).
    pub fn disarm(&mut self) {
        self.armed = false;
        self.state.in_progress = false;
        self.next_attempt = None;
    }
}
