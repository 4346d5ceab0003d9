//! Overflow-safe {sum, count} accumulator for millisecond durations
//!
//! Samples are `u64` and the sum is `u128`, so a process would need 2^64
//! samples before the sum could saturate. The mean is produced only once,
//! at flush time, by integer division.

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AvgAccumulator {
    sum: u128,
    count: u64,
}

impl AvgAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulator holding a single sample
    pub fn with_sample(value: u64) -> Self {
        let mut acc = Self::new();
        acc.record(value);
        acc
    }

    /// Accumulator holding `value` if present, empty otherwise
    pub fn from_optional(value: Option<u64>) -> Self {
        value.map(Self::with_sample).unwrap_or_default()
    }

    pub fn record(&mut self, value: u64) {
        self.sum = self.sum.saturating_add(u128::from(value));
        self.count = self.count.saturating_add(1);
    }

    pub fn sum(&self) -> u128 {
        self.sum
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Integer mean, `None` when no samples were recorded
    pub fn mean(&self) -> Option<u64> {
        if self.count == 0 {
            return None;
        }
        // Every sample fits in u64, so the mean does too.
        Some((self.sum / u128::from(self.count)) as u64)
    }

    /// Return the current values and leave a fresh accumulator in place
    pub fn take(&mut self) -> Self {
        std::mem::take(self)
    }
}
