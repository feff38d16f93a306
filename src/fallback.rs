//! Ordered fallback over unreliable host operations
//!
//! A stage declares a fixed list of named strategies sharing one signature.
//! They are tried in order; the first success wins and every failure is
//! logged and recorded before moving on to the next one.

use std::fmt;
use tracing::{debug, warn};

/// A single named strategy
pub struct Strategy<I, O> {
    /// Identity used in logs and diagnostics
    pub name: &'static str,
    /// Strategy body
    pub run: fn(&I) -> anyhow::Result<O>,
}

impl<I, O> Strategy<I, O> {
    pub const fn new(name: &'static str, run: fn(&I) -> anyhow::Result<O>) -> Self {
        Self { name, run }
    }
}

/// The strategy that produced a value, and the value
#[derive(Debug)]
pub struct Success<O> {
    pub strategy: &'static str,
    pub value: O,
    /// Failures recorded before the winning strategy
    pub failed: Vec<FailedAttempt>,
}

/// A strategy that did not succeed
#[derive(Debug, Clone)]
pub struct FailedAttempt {
    pub strategy: &'static str,
    pub error: String,
}

impl fmt::Display for FailedAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.strategy, self.error)
    }
}

/// Every strategy failed
#[derive(Debug, Clone)]
pub struct Exhausted {
    pub attempts: Vec<FailedAttempt>,
}

impl fmt::Display for Exhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.attempts.iter().map(ToString::to_string).collect();
        write!(f, "all {} strategies failed ({})", self.attempts.len(), parts.join("; "))
    }
}

impl std::error::Error for Exhausted {}

/// Try `strategies` in order against `input`, returning the first success
pub fn first_success<I, O>(
    stage: &str,
    input: &I,
    strategies: &[Strategy<I, O>],
) -> Result<Success<O>, Exhausted> {
    let mut failed = Vec::new();

    for strategy in strategies {
        debug!("{}: trying strategy '{}'", stage, strategy.name);
        match (strategy.run)(input) {
            Ok(value) => {
                debug!("{}: strategy '{}' succeeded", stage, strategy.name);
                return Ok(Success {
                    strategy: strategy.name,
                    value,
                    failed,
                });
            }
            Err(e) => {
                warn!("{}: strategy '{}' failed: {:#}", stage, strategy.name, e);
                failed.push(FailedAttempt {
                    strategy: strategy.name,
                    error: format!("{:#}", e),
                });
            }
        }
    }

    Err(Exhausted { attempts: failed })
}
