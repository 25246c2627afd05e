//! Engine and runtime configuration.

use crate::error::{LedgerError, LedgerResult};

/// Limits applied to every submitted workout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Maximum exercises in one workout.
    pub max_exercises_per_workout: usize,
    /// Maximum sets under one exercise.
    pub max_sets_per_exercise: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_exercises_per_workout: 64,
            max_sets_per_exercise: 64,
        }
    }
}

impl EngineConfig {
    /// Checks the configuration, returning it unchanged when valid.
    pub fn validate(self) -> LedgerResult<Self> {
        if self.max_exercises_per_workout == 0 {
            return Err(LedgerError::internal(
                "max_exercises_per_workout must be at least 1",
            ));
        }
        if self.max_sets_per_exercise == 0 {
            return Err(LedgerError::internal("max_sets_per_exercise must be at least 1"));
        }
        Ok(self)
    }
}

/// Worker pool settings for [`crate::LedgerRuntime`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Worker threads. Each request runs to completion on one worker.
    pub workers: usize,
    /// Requests that may wait for a worker before submissions are refused.
    pub queue_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            queue_capacity: 256,
        }
    }
}

impl RuntimeConfig {
    /// Checks the configuration, returning it unchanged when valid.
    pub fn validate(self) -> LedgerResult<Self> {
        if self.workers == 0 || self.queue_capacity == 0 {
            return Err(LedgerError::internal(format!(
                "runtime needs at least one worker and one queue slot (got workers={}, queue_capacity={})",
                self.workers, self.queue_capacity
            )));
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(EngineConfig::default().validate().is_ok());
        assert!(RuntimeConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_limits_rejected() {
        let engine = EngineConfig {
            max_sets_per_exercise: 0,
            ..EngineConfig::default()
        };
        assert!(engine.validate().is_err());

        let runtime = RuntimeConfig {
            workers: 0,
            queue_capacity: 8,
        };
        assert!(runtime.validate().is_err());
    }
}
