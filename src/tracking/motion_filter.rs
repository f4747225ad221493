//! One-euro low-pass filter for the output pose.

/// Number of filtered values: the 3x4 model-view entries.
pub const POSE_VALUES: usize = 12;

/// Adaptive low-pass filter.
///
/// The cutoff rises with the estimated speed of the signal, so slow motion is
/// smoothed heavily while fast motion passes with little lag.
#[derive(Debug, Clone)]
pub struct OneEuroFilter {
    min_cutoff: f64,
    beta: f64,
    d_cutoff: f64,
    /// Previous filtered value and derivative, `None` until the first sample.
    prev: Option<([f64; POSE_VALUES], [f64; POSE_VALUES])>,
    t_prev: f64,
}

fn smoothing_factor(te: f64, cutoff: f64) -> f64 {
    let r = 2.0 * std::f64::consts::PI * cutoff * te;
    r / (r + 1.0)
}

fn exponential_smoothing(a: f64, x: f64, x_prev: f64) -> f64 {
    a * x + (1.0 - a) * x_prev
}

impl OneEuroFilter {
    pub fn new(min_cutoff: f64, beta: f64) -> Self {
        Self {
            min_cutoff,
            beta,
            d_cutoff: 0.001,
            prev: None,
            t_prev: 0.0,
        }
    }

    /// Forget history; the next sample passes through unchanged.
    pub fn reset(&mut self) {
        self.prev = None;
    }

    /// Filter `x` observed at time `t` (milliseconds).
    pub fn filter(&mut self, t: f64, x: &[f64; POSE_VALUES]) -> [f64; POSE_VALUES] {
        let Some((x_prev, dx_prev)) = self.prev else {
            self.prev = Some((*x, [0.0; POSE_VALUES]));
            self.t_prev = t;
            return *x;
        };

        let te = t - self.t_prev;
        if te <= 0.0 {
            return x_prev;
        }

        let ad = smoothing_factor(te, self.d_cutoff);
        let mut x_hat = [0.0; POSE_VALUES];
        let mut dx_hat = [0.0; POSE_VALUES];
        for i in 0..POSE_VALUES {
            let dx = (x[i] - x_prev[i]) / te;
            dx_hat[i] = exponential_smoothing(ad, dx, dx_prev[i]);
            let cutoff = self.min_cutoff + self.beta * dx_hat[i].abs();
            let a = smoothing_factor(te, cutoff);
            x_hat[i] = exponential_smoothing(a, x[i], x_prev[i]);
        }

        self.prev = Some((x_hat, dx_hat));
        self.t_prev = t;
        x_hat
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_first_sample_passes_through() {
        let mut f = OneEuroFilter::new(0.001, 1000.0);
        let x = [1.0; POSE_VALUES];
        assert_eq!(f.filter(0.0, &x), x);
    }

    #[test]
    fn test_constant_signal_is_unchanged() {
        let mut f = OneEuroFilter::new(0.001, 1000.0);
        let x = [3.5; POSE_VALUES];
        for k in 0..10 {
            let y = f.filter(k as f64 * 33.0, &x);
            assert_relative_eq!(y[0], 3.5, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_step_is_smoothed_between_old_and_new() {
        let mut f = OneEuroFilter::new(0.001, 0.0);
        f.filter(0.0, &[0.0; POSE_VALUES]);
        let y = f.filter(33.0, &[10.0; POSE_VALUES]);
        assert!(y[5] > 0.0 && y[5] < 10.0);
    }

    #[test]
    fn test_non_increasing_time_returns_previous() {
        let mut f = OneEuroFilter::new(0.001, 1000.0);
        f.filter(10.0, &[2.0; POSE_VALUES]);
        let y = f.filter(10.0, &[9.0; POSE_VALUES]);
        assert_eq!(y, [2.0; POSE_VALUES]);
    }

    #[test]
    fn test_reset_forgets_history() {
        let mut f = OneEuroFilter::new(0.001, 0.0);
        f.filter(0.0, &[0.0; POSE_VALUES]);
        f.reset();
        assert_eq!(f.filter(33.0, &[7.0; POSE_VALUES]), [7.0; POSE_VALUES]);
    }
}
