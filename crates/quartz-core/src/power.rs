/// Ticks are the coarse unit of simulation time.
pub type Ticks = u64;

/// A redstone signal strength in `0..=MAX_POWER`.
pub type PowerLevel = u8;

pub const MIN_POWER: PowerLevel = 0;
pub const MAX_POWER: PowerLevel = 15;

/// Raw external input outside `MIN_POWER..=MAX_POWER`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("power level {0} outside 0..=15")]
pub struct PowerOutOfRange(pub i64);

/// Clamp an evaluated power value into range. Used for component results,
/// never for raw input.
#[inline]
pub fn clamp_power(value: i32) -> PowerLevel {
    value.clamp(MIN_POWER as i32, MAX_POWER as i32) as PowerLevel
}

/// Validate a power value supplied from outside the kernel.
#[inline]
pub fn require_power(value: i64) -> Result<PowerLevel, PowerOutOfRange> {
    if (MIN_POWER as i64..=MAX_POWER as i64).contains(&value) {
        Ok(value as PowerLevel)
    } else {
        Err(PowerOutOfRange(value))
    }
}
