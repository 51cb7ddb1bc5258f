//! Kernel configuration.
//!
//! Every field has a default, so a config file only needs to name what it
//! overrides. Loading from disk lives in `quartz-data`.

use serde::{Deserialize, Serialize};

use crate::power::Ticks;
use crate::scheduler::{DEFAULT_MICRO_CAPACITY, DEFAULT_WHEEL_SIZE};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("scheduler.wheel_size {0} is not a positive power of two")]
    InvalidWheelSize(usize),
    #[error("router.region_block_size must be positive, got {0}")]
    InvalidRegionSize(i32),
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    pub scheduler: SchedulerConfig,
    pub router: RouterConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Number of wheel buckets. Must be a power of two.
    pub wheel_size: usize,
    /// Initial capacity of the micro heap.
    pub micro_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            wheel_size: DEFAULT_WHEEL_SIZE,
            micro_capacity: DEFAULT_MICRO_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Edge length of the square column regions used for the key's region
    /// field (64 = 4x4 chunks).
    pub region_block_size: i32,
    /// Smallest delay applied to tick requests that come out of a commit.
    pub min_commit_delay: Ticks,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            region_block_size: 64,
            min_commit_delay: 1,
        }
    }
}

impl KernelConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let wheel = self.scheduler.wheel_size;
        if wheel == 0 || !wheel.is_power_of_two() {
            return Err(ConfigError::InvalidWheelSize(wheel));
        }
        if self.router.region_block_size <= 0 {
            return Err(ConfigError::InvalidRegionSize(self.router.region_block_size));
        }
        Ok(())
    }
}
