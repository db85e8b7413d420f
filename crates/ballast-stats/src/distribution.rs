//! Lifetime value accumulator.

/// Running aggregates over a value series.
///
/// Tracks count, mean, variance, and extrema without retaining individual
/// samples. Not synchronized; callers wrap it in a lock.
#[derive(Debug, Clone, Default)]
pub struct Distribution {
    count: u64,
    sum: f64,
    sum_of_squares: f64,
    min: f64,
    max: f64,
}

impl Distribution {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_value(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        self.sum += value;
        self.sum_of_squares += value * value;
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    /// Population variance; zero until at least two samples arrive.
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            return 0.0;
        }
        let mean = self.mean();
        let variance = self.sum_of_squares / self.count as f64 - mean * mean;
        variance.max(0.0)
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn minimum(&self) -> f64 {
        self.min
    }

    pub fn maximum(&self) -> f64 {
        self.max
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
