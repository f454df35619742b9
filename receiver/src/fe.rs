//! Frequency estimator: latency error in, scaling coefficient out.
//!
//! A PI controller around the target latency. The observed latency is
//! smoothed with a single pole, the error feeds proportional and integral
//! terms, and the output is a coefficient near 1.0 that the latency
//! monitor clamps and hands to the resampler. Latency above target makes
//! the coefficient exceed 1.0, so the session consumes input faster and
//! the queue drains toward the setpoint.
//!
//! The estimator is a pure function of its input sequence and profile;
//! reproducibility is load-bearing for tests.

use crate::config::FeProfile;

/// Controller gains selected by profile.
#[derive(Debug, Clone, Copy)]
struct Gains {
    // ---
    p: f64,
    i: f64,
    /// Single-pole smoothing factor for the latency input.
    alpha: f64,
}

fn profile_gains(profile: FeProfile) -> Gains {
    // ---
    match profile {
        FeProfile::Responsive => Gains {
            p: 2e-5,
            i: 1e-9,
            alpha: 0.30,
        },
        FeProfile::Balanced => Gains {
            p: 1e-5,
            i: 5e-10,
            alpha: 0.15,
        },
        FeProfile::Smooth => Gains {
            p: 5e-6,
            i: 2e-10,
            alpha: 0.08,
        },
    }
}

/// PI controller producing the resampler scaling coefficient.
#[derive(Debug)]
pub struct FreqEstimator {
    // ---
    target: f64,
    gains: Gains,
    smoothed: Option<f64>,
    integral: f64,
    integral_limit: f64,
    coeff: f32,
}

impl FreqEstimator {
    // ---
    /// `target` is the latency setpoint in sender sample units.
    pub fn new(profile: FeProfile, target: u32) -> Self {
        // ---
        let gains = profile_gains(profile);
        Self {
            target: target as f64,
            gains,
            smoothed: None,
            integral: 0.0,
            // The integral term alone may never push the coefficient
            // further than 1% from unity.
            integral_limit: 0.01 / gains.i,
            coeff: 1.0,
        }
    }

    /// Feeds one latency observation, in sender sample units.
    ///
    /// Observations are expected at roughly uniform spacing; the latency
    /// monitor provides that cadence.
    pub fn update(&mut self, latency: u32) {
        // ---
        let observed = latency as f64;
        let smoothed = match self.smoothed {
            None => observed,
            Some(prev) => prev + self.gains.alpha * (observed - prev),
        };
        self.smoothed = Some(smoothed);

        let error = smoothed - self.target;
        self.integral = (self.integral + error).clamp(-self.integral_limit, self.integral_limit);

        self.coeff = (1.0 + self.gains.p * error + self.gains.i * self.integral) as f32;
    }

    /// Current scaling coefficient, 1.0 until the first update.
    pub fn freq_coeff(&self) -> f32 {
        self.coeff
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    const TARGET: u32 = 9600; // 200ms at 48kHz

    #[test]
    fn coefficient_starts_at_unity() {
        // ---
        let fe = FreqEstimator::new(FeProfile::Balanced, TARGET);
        assert_eq!(fe.freq_coeff(), 1.0);
    }

    #[test]
    fn latency_above_target_speeds_up() {
        // ---
        let mut fe = FreqEstimator::new(FeProfile::Balanced, TARGET);
        for _ in 0..20 {
            fe.update(TARGET + 2000);
        }
        assert!(fe.freq_coeff() > 1.0);
    }

    #[test]
    fn latency_below_target_slows_down() {
        // ---
        let mut fe = FreqEstimator::new(FeProfile::Balanced, TARGET);
        for _ in 0..20 {
            fe.update(TARGET - 2000);
        }
        assert!(fe.freq_coeff() < 1.0);
    }

    #[test]
    fn latency_at_target_stays_near_unity() {
        // ---
        let mut fe = FreqEstimator::new(FeProfile::Balanced, TARGET);
        for _ in 0..100 {
            fe.update(TARGET);
        }
        assert!((fe.freq_coeff() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn same_inputs_same_outputs() {
        // ---
        let inputs: Vec<u32> = (0..200i64)
            .map(|i| (TARGET as i64 + (i * 37) % 500 - 250) as u32)
            .collect();

        let mut a = FreqEstimator::new(FeProfile::Smooth, TARGET);
        let mut b = FreqEstimator::new(FeProfile::Smooth, TARGET);
        for &l in &inputs {
            a.update(l);
            b.update(l);
            assert_eq!(a.freq_coeff(), b.freq_coeff());
        }
    }

    #[test]
    fn responsive_profile_reacts_harder_than_smooth() {
        // ---
        let mut fast = FreqEstimator::new(FeProfile::Responsive, TARGET);
        let mut slow = FreqEstimator::new(FeProfile::Smooth, TARGET);
        for _ in 0..10 {
            fast.update(TARGET + 3000);
            slow.update(TARGET + 3000);
        }
        assert!(fast.freq_coeff() > slow.freq_coeff());
    }

    #[test]
    fn integral_term_is_bounded() {
        // ---
        let mut fe = FreqEstimator::new(FeProfile::Responsive, TARGET);
        // Persistent large error must not wind the coefficient past the
        // proportional contribution plus the 1% integral cap.
        for _ in 0..100_000 {
            fe.update(TARGET + 10_000);
        }
        let p_part = 2e-5 * 10_000.0;
        assert!(fe.freq_coeff() as f64 <= 1.0 + p_part + 0.01 + 1e-6);
    }
}
