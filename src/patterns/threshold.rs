/// Hysteresis state machine for one metric's warn/critical thresholds.
///
/// A violation fires only after the value holds at or above a threshold
/// for `sustain_window` consecutive samples; the alert state clears only
/// after the value holds below warn for the same window. A single-sample
/// spike through a threshold never alerts.
#[derive(Debug, Clone)]
pub struct ThresholdDetector {
    warn: f64,
    critical: f64,
    sustain_window: usize,
    state: AlertState,
    above_warn_streak: usize,
    above_critical_streak: usize,
    below_warn_streak: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertState {
    Normal,
    Warn,
    Critical,
}

/// What one observation did to the alert state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdEvent {
    None,
    WarnFired,
    CriticalFired,
    Cleared,
}

impl ThresholdDetector {
    pub fn new(warn: f64, critical: f64, sustain_window: usize) -> Self {
        Self {
            warn,
            critical,
            sustain_window: sustain_window.max(1),
            state: AlertState::Normal,
            above_warn_streak: 0,
            above_critical_streak: 0,
            below_warn_streak: 0,
        }
    }

    pub fn state(&self) -> AlertState {
        self.state
    }

    pub fn warn_threshold(&self) -> f64 {
        self.warn
    }

    pub fn critical_threshold(&self) -> f64 {
        self.critical
    }

    pub fn observe(&mut self, value: f64) -> ThresholdEvent {
        if value >= self.warn {
            self.above_warn_streak += 1;
            self.below_warn_streak = 0;
        } else {
            self.above_warn_streak = 0;
            self.below_warn_streak += 1;
        }
        if value >= self.critical {
            self.above_critical_streak += 1;
        } else {
            self.above_critical_streak = 0;
        }

        match self.state {
            AlertState::Normal => {
                if self.above_critical_streak >= self.sustain_window {
                    self.state = AlertState::Critical;
                    ThresholdEvent::CriticalFired
                } else if self.above_warn_streak >= self.sustain_window {
                    self.state = AlertState::Warn;
                    ThresholdEvent::WarnFired
                } else {
                    ThresholdEvent::None
                }
            }
            AlertState::Warn => {
                if self.above_critical_streak >= self.sustain_window {
                    self.state = AlertState::Critical;
                    ThresholdEvent::CriticalFired
                } else if self.below_warn_streak >= self.sustain_window {
                    self.state = AlertState::Normal;
                    ThresholdEvent::Cleared
                } else {
                    ThresholdEvent::None
                }
            }
            AlertState::Critical => {
                if self.below_warn_streak >= self.sustain_window {
                    self.state = AlertState::Normal;
                    ThresholdEvent::Cleared
                } else {
                    ThresholdEvent::None
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(det: &mut ThresholdDetector, values: &[f64]) -> Vec<ThresholdEvent> {
        values
            .iter()
            .map(|v| det.observe(*v))
            .filter(|e| *e != ThresholdEvent::None)
            .collect()
    }

    #[test]
    fn single_sample_spike_does_not_alert() {
        let mut det = ThresholdDetector::new(90.0, 99.0, 10);
        let mut series = vec![50.0; 5];
        series.push(95.0);
        series.extend(vec![50.0; 5]);
        assert!(feed(&mut det, &series).is_empty());
    }

    #[test]
    fn sustained_warn_fires_exactly_once_at_tenth_sample() {
        let mut det = ThresholdDetector::new(90.0, 200.0, 10);
        for _ in 0..20 {
            assert_eq!(det.observe(50.0), ThresholdEvent::None);
        }
        // 9 samples at warn: still nothing
        for _ in 0..9 {
            assert_eq!(det.observe(95.0), ThresholdEvent::None);
        }
        // 10th consecutive sample fires
        assert_eq!(det.observe(95.0), ThresholdEvent::WarnFired);
        // Holding above warn emits nothing further
        for _ in 0..10 {
            assert_eq!(det.observe(95.0), ThresholdEvent::None);
        }
    }

    #[test]
    fn return_to_normal_emits_cleared_not_an_alert() {
        let mut det = ThresholdDetector::new(90.0, 200.0, 10);
        for _ in 0..10 {
            det.observe(95.0);
        }
        assert_eq!(det.state(), AlertState::Warn);
        for _ in 0..9 {
            assert_eq!(det.observe(50.0), ThresholdEvent::None);
        }
        assert_eq!(det.observe(50.0), ThresholdEvent::Cleared);
        assert_eq!(det.state(), AlertState::Normal);
    }

    #[test]
    fn constant_series_above_warn_fires_once() {
        let mut det = ThresholdDetector::new(90.0, 200.0, 10);
        let events = feed(&mut det, &vec![95.0; 500]);
        assert_eq!(events, vec![ThresholdEvent::WarnFired]);
    }

    #[test]
    fn critical_escalation_from_warn() {
        let mut det = ThresholdDetector::new(80.0, 95.0, 5);
        for _ in 0..5 {
            det.observe(85.0);
        }
        assert_eq!(det.state(), AlertState::Warn);
        for _ in 0..4 {
            assert_eq!(det.observe(99.0), ThresholdEvent::None);
        }
        assert_eq!(det.observe(99.0), ThresholdEvent::CriticalFired);
        assert_eq!(det.state(), AlertState::Critical);
    }

    #[test]
    fn critical_requires_full_sustain_below_warn_to_clear() {
        let mut det = ThresholdDetector::new(80.0, 95.0, 3);
        for _ in 0..3 {
            det.observe(99.0);
        }
        assert_eq!(det.state(), AlertState::Critical);
        // Dipping to warn-band values does not clear
        det.observe(85.0);
        det.observe(85.0);
        det.observe(85.0);
        assert_eq!(det.state(), AlertState::Critical);
        // Three samples below warn clears
        det.observe(50.0);
        det.observe(50.0);
        assert_eq!(det.observe(50.0), ThresholdEvent::Cleared);
        assert_eq!(det.state(), AlertState::Normal);
    }

    #[test]
    fn interrupted_streak_restarts_count() {
        let mut det = ThresholdDetector::new(90.0, 200.0, 5);
        for _ in 0..4 {
            det.observe(95.0);
        }
        det.observe(50.0); // streak broken
        for _ in 0..4 {
            assert_eq!(det.observe(95.0), ThresholdEvent::None);
        }
        assert_eq!(det.observe(95.0), ThresholdEvent::WarnFired);
    }

    #[test]
    fn recrossing_after_clear_fires_again() {
        let mut det = ThresholdDetector::new(90.0, 200.0, 2);
        assert_eq!(feed(&mut det, &[95.0, 95.0]), vec![ThresholdEvent::WarnFired]);
        assert_eq!(feed(&mut det, &[10.0, 10.0]), vec![ThresholdEvent::Cleared]);
        assert_eq!(feed(&mut det, &[95.0, 95.0]), vec![ThresholdEvent::WarnFired]);
    }
}
