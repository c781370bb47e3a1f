use std::collections::VecDeque;

/// Samples required before a baseline exists (cold start).
pub const COLD_START_SAMPLES: usize = 30;

/// Rolling mean and standard deviation over the last W samples of one
/// metric. No baseline is reported until the cold-start region has
/// filled.
#[derive(Debug, Clone)]
pub struct RollingBaseline {
    window: VecDeque<f64>,
    capacity: usize,
}

impl RollingBaseline {
    pub fn new(capacity: usize) -> Self {
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, value: f64) {
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(value);
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn ready(&self) -> bool {
        self.window.len() >= COLD_START_SAMPLES
    }

    /// (mean, population std dev), or None during cold start.
    pub fn stats(&self) -> Option<(f64, f64)> {
        if !self.ready() {
            return None;
        }
        let n = self.window.len() as f64;
        let mean = self.window.iter().sum::<f64>() / n;
        let variance = self.window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        Some((mean, variance.sqrt()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cold_start_produces_no_baseline() {
        let mut b = RollingBaseline::new(720);
        for _ in 0..COLD_START_SAMPLES - 1 {
            b.push(50.0);
        }
        assert!(!b.ready());
        assert!(b.stats().is_none());
    }

    #[test]
    fn baseline_ready_at_threshold() {
        let mut b = RollingBaseline::new(720);
        for _ in 0..COLD_START_SAMPLES {
            b.push(50.0);
        }
        let (mean, std) = b.stats().expect("ready");
        assert_eq!(mean, 50.0);
        assert_eq!(std, 0.0);
    }

    #[test]
    fn window_evicts_oldest() {
        let mut b = RollingBaseline::new(COLD_START_SAMPLES);
        for _ in 0..COLD_START_SAMPLES {
            b.push(0.0);
        }
        for _ in 0..COLD_START_SAMPLES {
            b.push(100.0);
        }
        let (mean, std) = b.stats().expect("ready");
        assert_eq!(mean, 100.0);
        assert_eq!(std, 0.0);
        assert_eq!(b.len(), COLD_START_SAMPLES);
    }

    #[test]
    fn std_dev_of_mixed_series() {
        let mut b = RollingBaseline::new(100);
        for _ in 0..20 {
            b.push(40.0);
        }
        for _ in 0..20 {
            b.push(60.0);
        }
        let (mean, std) = b.stats().expect("ready");
        assert!((mean - 50.0).abs() < 1e-9);
        assert!((std - 10.0).abs() < 1e-9);
    }
}
