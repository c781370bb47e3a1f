/// Single-sample spike detector: flags `|value - mean| > k * std_dev`.
///
/// Independent of threshold state, and silent until the baseline has a
/// mean. Consecutive spiking samples are reported once; the flag
/// rearms after a non-spiking sample.
#[derive(Debug, Clone)]
pub struct SpikeDetector {
    k: f64,
    active: bool,
}

impl SpikeDetector {
    pub fn new(k: f64) -> Self {
        Self { k, active: false }
    }

    /// `baseline` is (mean, std_dev) from the rolling window, or None in
    /// the cold-start region.
    pub fn observe(&mut self, value: f64, baseline: Option<(f64, f64)>) -> Option<SpikeEvent> {
        let (mean, std_dev) = baseline?;
        let deviation = (value - mean).abs();
        let spiking = deviation > self.k * std_dev;

        if spiking && !self.active {
            self.active = true;
            let deviation_std = if std_dev > 0.0 { deviation / std_dev } else { 0.0 };
            Some(SpikeEvent {
                mean,
                deviation_std,
            })
        } else {
            if !spiking {
                self.active = false;
            }
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpikeEvent {
    pub mean: f64,
    pub deviation_std: f64,
}
