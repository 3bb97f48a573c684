// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Exponential backoff policy for rescheduling failed reconciliations
//!
//! The policy is pure: the delay sequence depends only on the configuration
//! and the number of calls made, never on the wall clock. The elapsed-time
//! cap is enforced against the cumulative sum of granted delays.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the exponential backoff sequence
///
/// Defaults bound a single event's retries to well under two minutes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(with = "humantime_serde")]
    pub initial_interval: Duration,
    pub interval_multiplier: f64,
    #[serde(with = "humantime_serde")]
    pub max_interval: Duration,
    /// Total number of executions granted, the initial one included
    pub max_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub max_elapsed_time: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(2),
            interval_multiplier: 1.5,
            max_interval: Duration::from_secs(30),
            max_attempts: 5,
            max_elapsed_time: Duration::from_secs(120),
        }
    }
}

impl RetryConfig {
    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    pub fn with_interval_multiplier(mut self, multiplier: f64) -> Self {
        self.interval_multiplier = multiplier;
        self
    }

    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_max_elapsed_time(mut self, elapsed: Duration) -> Self {
        self.max_elapsed_time = elapsed;
        self
    }

    /// Start a fresh execution of this policy
    pub fn execution(&self) -> RetryExecution {
        RetryExecution {
            config: self.clone(),
            attempts: 0,
            cumulative_delay: Duration::ZERO,
        }
    }
}

/// Per-event attempt counter over a [`RetryConfig`]
///
/// `next_delay` returns `Some(0)` on the first call, then the exponential
/// sequence clamped to `max_interval`. `None` means exhausted and is
/// terminal.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryExecution {
    config: RetryConfig,
    attempts: u32,
    cumulative_delay: Duration,
}

impl RetryExecution {
    /// Delay before the next execution, or `None` when the policy is spent
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.config.max_attempts {
            return None;
        }
        let delay = if self.attempts == 0 {
            Duration::ZERO
        } else {
            let factor = self.config.interval_multiplier.powi(self.attempts as i32 - 1);
            self.config
                .initial_interval
                .mul_f64(factor.max(0.0))
                .min(self.config.max_interval)
        };
        if self.cumulative_delay + delay > self.config.max_elapsed_time {
            return None;
        }
        self.attempts += 1;
        self.cumulative_delay += delay;
        Some(delay)
    }

    /// Number of executions granted so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
