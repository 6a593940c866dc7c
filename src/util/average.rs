/// Exponential moving average that also tracks the variance of the samples.
#[derive(Debug)]
pub(crate) struct MovingAverage {
    smoothing_factor: f64,
    average: Option<f64>,
    variance: f64,
}

impl MovingAverage {
    pub fn new(smoothing_factor: f64) -> Self {
        Self {
            smoothing_factor,
            average: None,
            variance: 0.0,
        }
    }

    fn std(&self) -> f64 {
        self.variance.sqrt()
    }

    /// Whether `value` is within `num_std` standard deviations of the average.
    pub fn within_std(&self, value: f64, num_std: f64) -> bool {
        let Some(average) = self.average else {
            return false;
        };
        let spread = self.std() * num_std;

        (average - spread..=average + spread).contains(&value)
    }

    /// `num_std` standard deviations above the average. None until there is a spread.
    pub fn upper_range(&self, num_std: f64) -> Option<f64> {
        if self.variance == 0.0 {
            return None;
        }
        self.average.map(|avg| avg + num_std * self.std())
    }

    /// `num_std` standard deviations below the average. None until there is a spread.
    pub fn lower_range(&self, num_std: f64) -> Option<f64> {
        if self.variance == 0.0 {
            return None;
        }
        self.average.map(|avg| avg - num_std * self.std())
    }

    pub fn update(&mut self, value: f64) {
        let Some(average) = self.average else {
            self.average = Some(value);
            return;
        };

        let delta = value - average;
        let alpha = self.smoothing_factor;

        self.variance = (1.0 - alpha) * (self.variance + alpha * delta * delta);
        self.average = Some(average + alpha * delta);
    }

    pub fn valid(&self) -> bool {
        self.average.is_some()
    }

    pub fn reset(&mut self) {
        self.average = None;
        self.variance = 0.0;
    }
}
