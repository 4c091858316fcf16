//! Scheduler timing configuration.

use std::time::Duration;

/// Timing and limits for the cycle loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Minimum pause between cycles
    pub cycle_interval: Duration,
    /// Hard bound on a single cycle
    pub cycle_timeout: Duration,
    /// Max cycles before stopping (None = infinite)
    pub max_cycles: Option<u64>,
    /// Results queued for the sink before new ones are dropped
    pub result_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            cycle_interval: Duration::from_secs(1),
            cycle_timeout: Duration::from_secs(30),
            max_cycles: None,
            result_capacity: 1024,
        }
    }
}

impl SchedulerConfig {
    /// Create the default config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set pause between cycles.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.cycle_interval = interval;
        self
    }

    /// Set per-cycle timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.cycle_timeout = timeout;
        self
    }

    /// Stop after `max` cycles.
    pub fn with_max_cycles(mut self, max: u64) -> Self {
        self.max_cycles = Some(max);
        self
    }

    /// Bound the result queue between the loop and the sink.
    pub fn with_result_capacity(mut self, capacity: usize) -> Self {
        self.result_capacity = capacity;
        self
    }

    /// Check the values make sense.
    pub fn validate(&self) -> Result<(), String> {
        if self.cycle_timeout.is_zero() {
            return Err("cycle timeout must be greater than zero".to_string());
        }
        if self.result_capacity == 0 {
            return Err("result queue capacity must be greater than zero".to_string());
        }
        Ok(())
    }

    /// Timeout in whole milliseconds, for reporting.
    pub fn timeout_ms(&self) -> u64 {
        self.cycle_timeout.as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let config = SchedulerConfig::new()
            .with_interval(Duration::ZERO)
            .with_timeout(Duration::from_millis(10))
            .with_max_cycles(3);

        assert_eq!(config.cycle_interval, Duration::ZERO);
        assert_eq!(config.timeout_ms(), 10);
        assert_eq!(config.max_cycles, Some(3));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = SchedulerConfig::new().with_timeout(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_result_capacity_rejected() {
        assert_eq!(SchedulerConfig::new().result_capacity, 1024);
        let config = SchedulerConfig::new().with_result_capacity(0);
        assert!(config.validate().is_err());
    }
}
