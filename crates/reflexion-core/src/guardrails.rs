use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::ReflexionError;

/// Hard limits bounding one run. Immutable once the orchestrator is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guardrails {
    /// Upper bound on researcher drafting steps.
    #[serde(default = "Guardrails::default_max_steps")]
    pub max_steps: usize,
    /// Upper bound on reflection-triggered retries.
    #[serde(default = "Guardrails::default_max_retries")]
    pub max_retries: usize,
    /// Wall-clock budget, checked between calls.
    #[serde(default = "Guardrails::default_max_total_seconds")]
    pub max_total_seconds: u64,
}

impl Guardrails {
    pub fn new(
        max_steps: usize,
        max_retries: usize,
        max_total_seconds: u64,
    ) -> Result<Self, ReflexionError> {
        let guardrails = Self {
            max_steps,
            max_retries,
            max_total_seconds,
        };
        guardrails.validate()?;
        Ok(guardrails)
    }

    pub fn validate(&self) -> Result<(), ReflexionError> {
        if self.max_steps == 0 {
            return Err(ReflexionError::InvalidConfiguration(
                "guardrails.max_steps must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn time_budget(&self) -> Duration {
        Duration::from_secs(self.max_total_seconds)
    }

    const fn default_max_steps() -> usize {
        10
    }

    const fn default_max_retries() -> usize {
        2
    }

    const fn default_max_total_seconds() -> u64 {
        60
    }
}

impl Default for Guardrails {
    fn default() -> Self {
        Self {
            max_steps: Self::default_max_steps(),
            max_retries: Self::default_max_retries(),
            max_total_seconds: Self::default_max_total_seconds(),
        }
    }
}

/// Which guardrail ended a run early.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitKind {
    Steps,
    Retries,
    Time,
}

impl fmt::Display for LimitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LimitKind::Steps => "max steps",
            LimitKind::Retries => "max retries",
            LimitKind::Time => "time budget",
        };
        f.write_str(label)
    }
}

/// Wall clock for one run. Uses tokio's clock so paused-time tests can
/// advance it deterministically.
#[derive(Debug, Clone, Copy)]
pub struct RunClock {
    started: Instant,
    budget: Duration,
}

impl RunClock {
    pub fn start(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn exhausted(&self) -> bool {
        self.elapsed() > self.budget
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_steps_is_rejected() {
        let err = Guardrails::new(0, 2, 60).unwrap_err();
        assert!(matches!(err, ReflexionError::InvalidConfiguration(_)));
        assert!(Guardrails::new(1, 0, 0).is_ok());
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let guardrails: Guardrails = toml::from_str("max_retries = 5").unwrap();
        assert_eq!(guardrails.max_steps, 10);
        assert_eq!(guardrails.max_retries, 5);
        assert_eq!(guardrails.max_total_seconds, 60);
    }

    #[tokio::test(start_paused = true)]
    async fn clock_exhausts_after_budget() {
        let clock = RunClock::start(Duration::from_secs(2));
        assert!(!clock.exhausted());
        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(clock.exhausted());
    }
}
