/// Running average of `local time - announced time` over every received
/// bounced object. Advisory only: traffic is never refused on this basis.
#[derive(Debug, Default, Clone)]
pub struct TimeShiftStats {
    sum: f64,
    samples: u64,
    average: f64,
}

impl TimeShiftStats {
    pub fn add(&mut self, shift_secs: i64) {
        self.sum += shift_secs as f64;
        self.samples += 1;
    }

    /// Refresh the published average from the accumulated samples.
    pub fn recompute(&mut self) -> f64 {
        if self.samples > 0 {
            self.average = self.sum / self.samples as f64;
        }
        self.average
    }

    pub fn average(&self) -> f64 {
        self.average
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    pub fn is_anomalous(&self, threshold_secs: f64) -> bool {
        self.average.abs() > threshold_secs
    }
}
