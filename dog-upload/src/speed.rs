use std::collections::VecDeque;

/// Sliding-window throughput average used for remaining-time estimates.
///
/// Holds at most `capacity` instantaneous bytes/second samples; pushing
/// past capacity evicts the oldest.
#[derive(Debug, Clone)]
pub struct SpeedEstimator {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl SpeedEstimator {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record one bytes/second observation
    pub fn push(&mut self, bytes_per_second: f64) {
        if !bytes_per_second.is_finite() {
            return;
        }
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(bytes_per_second);
    }

    /// Record the throughput between two observations
    pub fn record(&mut self, bytes_delta: u64, elapsed_secs: f64) {
        if elapsed_secs > 0.0 {
            self.push(bytes_delta as f64 / elapsed_secs);
        }
    }

    /// Mean of the window, `None` when empty
    pub fn average(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
    }

    /// Whole seconds to move `remaining_bytes` at the average rate.
    ///
    /// `None` unless the average is positive.
    pub fn eta_seconds(&self, remaining_bytes: u64) -> Option<u64> {
        let avg = self.average().filter(|avg| *avg > 0.0)?;
        Some((remaining_bytes as f64 / avg).round() as u64)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn reset(&mut self) {
        self.samples.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MB: f64 = 1_000_000.0;

    #[test]
    fn no_samples_means_no_estimate() {
        let est = SpeedEstimator::new(5);
        assert_eq!(est.average(), None);
        assert_eq!(est.eta_seconds(1000), None);
    }

    #[test]
    fn five_sample_average_drives_eta() {
        let mut est = SpeedEstimator::new(5);
        for rate in [1.0, 2.0, 1.0, 3.0, 1.0] {
            est.push(rate * MB);
        }
        assert!((est.average().unwrap() - 1.6 * MB).abs() < 1e-6);
        // 9MB / 1.6MB/s = 5.625s
        assert_eq!(est.eta_seconds(9_000_000), Some(6));
    }

    #[test]
    fn sixth_sample_evicts_oldest() {
        let mut est = SpeedEstimator::new(5);
        for rate in [100.0, 1.0, 1.0, 1.0, 1.0, 1.0] {
            est.push(rate);
        }
        assert_eq!(est.len(), 5);
        assert_eq!(est.average(), Some(1.0));
    }

    #[test]
    fn stalled_transfer_has_no_eta() {
        let mut est = SpeedEstimator::new(5);
        est.record(0, 0.5);
        est.record(0, 0.5);
        assert_eq!(est.average(), Some(0.0));
        assert_eq!(est.eta_seconds(500), None);
    }

    #[test]
    fn zero_elapsed_is_ignored() {
        let mut est = SpeedEstimator::new(5);
        est.record(1000, 0.0);
        assert!(est.is_empty());
        est.push(f64::INFINITY);
        assert!(est.is_empty());
    }

    #[test]
    fn record_converts_deltas() {
        let mut est = SpeedEstimator::new(5);
        est.record(500, 0.25);
        assert_eq!(est.average(), Some(2000.0));
        assert_eq!(est.eta_seconds(3000), Some(2));
        est.reset();
        assert!(est.is_empty());
    }
}
