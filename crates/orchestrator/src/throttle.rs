//! Load-based concurrency scaling
//!
//! Some other part of the host application (a thermal monitor, a battery
//! saver) decides how hard the engine may push. It sets a pressure level
//! here; the connection budget and the phases scale their limits from it.

use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LoadLevel {
    Nominal = 0,
    Fair = 1,
    Serious = 2,
    Critical = 3,
}

impl LoadLevel {
    #[must_use]
    pub const fn multiplier(self) -> f64 {
        match self {
            LoadLevel::Nominal | LoadLevel::Fair => 1.0,
            LoadLevel::Serious => 0.5,
            LoadLevel::Critical => 0.25,
        }
    }

    const fn from_u8(v: u8) -> Self {
        match v {
            0 => LoadLevel::Nominal,
            1 => LoadLevel::Fair,
            2 => LoadLevel::Serious,
            _ => LoadLevel::Critical,
        }
    }
}

#[derive(Debug)]
pub struct LoadThrottle {
    level: AtomicU8,
}

impl LoadThrottle {
    pub fn new() -> Self {
        Self {
            level: AtomicU8::new(LoadLevel::Nominal as u8),
        }
    }

    pub fn set_level(&self, level: LoadLevel) {
        self.level.store(level as u8, Ordering::Relaxed);
    }

    pub fn level(&self) -> LoadLevel {
        LoadLevel::from_u8(self.level.load(Ordering::Relaxed))
    }

    pub fn multiplier(&self) -> f64 {
        self.level().multiplier()
    }

    /// Scale a base limit by the current level. Never below 1.
    pub fn effective_limit(&self, base: usize) -> usize {
        ((base as f64 * self.multiplier()) as usize).max(1)
    }
}

impl Default for LoadThrottle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scales_and_floors_at_one() {
        let throttle = LoadThrottle::new();
        assert_eq!(throttle.effective_limit(40), 40);

        throttle.set_level(LoadLevel::Serious);
        assert_eq!(throttle.effective_limit(40), 20);

        throttle.set_level(LoadLevel::Critical);
        assert_eq!(throttle.effective_limit(40), 10);
        assert_eq!(throttle.effective_limit(2), 1);
        assert_eq!(throttle.level(), LoadLevel::Critical);
    }
}
