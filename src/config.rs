//! Construction parameters for an event buffer and its channel source.

use core::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_CAPACITY: usize = 10;
pub const DEFAULT_IDLE_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Config {
    /// Number of items retained in the window.
    pub capacity: usize,
    /// Virtual offset of the first write.
    pub start_offset: u64,
    /// How long a source may stay silent before it is probed for liveness.
    pub idle_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            start_offset: 0,
            idle_interval: DEFAULT_IDLE_INTERVAL,
        }
    }
}

impl Config {
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_start_offset(mut self, start_offset: u64) -> Self {
        self.start_offset = start_offset;
        self
    }

    pub fn with_idle_interval(mut self, idle_interval: Duration) -> Self {
        self.idle_interval = idle_interval;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.idle_interval.is_zero() {
            return Err(ConfigError::ZeroIdleInterval);
        }
        Ok(())
    }
}
