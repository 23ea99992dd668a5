/// Consecutive over-threshold samples that trip the watch.
pub const DEFAULT_OOM_SAMPLES: u32 = 3;

/// Share of `ceiling` taken by `used`, clamped into `0.0..=100.0`.
pub fn percent_used(used: u64, ceiling: u64) -> f64 {
    if ceiling == 0 {
        return 0.0;
    }
    let percent = used as f64 / ceiling as f64 * 100.0;
    percent.clamp(0.0, 100.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchVerdict {
    Healthy,
    Tripped,
}

/// Counts consecutive samples above a threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryWatch {
    threshold: f64,
    required: u32,
    consecutive: u32,
}

impl MemoryWatch {
    pub fn new(threshold_percent: u8, required_samples: u32) -> Self {
        Self {
            threshold: f64::from(threshold_percent.min(100)),
            required: required_samples.max(1),
            consecutive: 0,
        }
    }

    /// Records a sample. Once tripped, the watch keeps reporting `Tripped`
    /// until a sample at or below the threshold resets the streak.
    pub fn observe(&mut self, percent: f64) -> WatchVerdict {
        if percent > self.threshold {
            self.consecutive = self.consecutive.saturating_add(1);
        } else {
            self.consecutive = 0;
        }
        if self.consecutive >= self.required {
            WatchVerdict::Tripped
        } else {
            WatchVerdict::Healthy
        }
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }
}

/// Display bands for memory samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryBand {
    Low,
    Moderate,
    High,
    Critical,
}

impl MemoryBand {
    pub fn from_percent(percent: f64) -> Self {
        if percent < 40.0 {
            MemoryBand::Low
        } else if percent < 60.0 {
            MemoryBand::Moderate
        } else if percent < 80.0 {
            MemoryBand::High
        } else {
            MemoryBand::Critical
        }
    }
}
