//! Closed-form quadratic braking law with near-target relaxation.
//!
//! Given a curvature constant derived from the identified control authority,
//! the distance to the target velocity transforms into a square-root
//! coordinate in which a constant-deceleration trajectory reaches the target
//! with exactly zero overshoot. Near the target the closed form degenerates
//! (one tick overshoots the parabola apex), so a proportional law over a
//! short velocity average takes over and damps chatter.

use crate::config::BrakeConfig;
use crate::ring_buffer::RingBuffer;

use super::simple_filter;

/// Smoothed curvatures below this are unusable and trigger the proportional
/// fallback.
const MIN_CURVATURE: f64 = 1e-3;

/// Velocity-to-acceleration conversion state for one axis.
#[derive(Debug, Clone)]
pub struct QuadraticBrake {
    curvature: f64,
    primed: bool,
    relax_count: u32,
}

impl Default for QuadraticBrake {
    fn default() -> Self {
        Self::new()
    }
}

impl QuadraticBrake {
    pub fn new() -> Self {
        Self {
            curvature: 0.0,
            primed: false,
            relax_count: 0,
        }
    }

    /// Smoothed braking curvature currently in use.
    pub fn curvature(&self) -> f64 {
        self.curvature
    }

    /// Desired acceleration moving `velocity` toward `desired_v`.
    ///
    /// `raw_curvature` is the identified control-authority combination for
    /// the axis; it is scaled by the configured gain and exponentially
    /// smoothed (the very first usable sample is taken as-is). When the
    /// smoothed curvature is non-finite or too small the plain proportional
    /// fallback applies.
    pub fn acceleration(
        &mut self,
        velocity: f64,
        desired_v: f64,
        raw_curvature: f64,
        velocity_history: &RingBuffer<f64>,
        dt: f64,
        config: &BrakeConfig,
    ) -> f64 {
        let new_curvature = config.quadr_kp * raw_curvature;
        if !new_curvature.is_finite() {
            return self.proportional(velocity, desired_v, config);
        }
        self.curvature = if self.primed {
            simple_filter(new_curvature, self.curvature, config.kacc_smoothing)
        } else {
            new_curvature
        };
        if self.curvature < MIN_CURVATURE {
            return self.proportional(velocity, desired_v, config);
        }
        self.primed = true;

        let v_error = velocity - desired_v;
        let sign = if v_error >= 0.0 { 1.0 } else { -1.0 };
        // Position on the braking parabola: the trajectory reaches the
        // target at x = 0 with zero velocity error.
        let quadr_x = -(v_error.abs() / self.curvature).sqrt();

        if quadr_x >= -config.relaxation_k * dt {
            self.relax_count += 1;
            let mut error = v_error;
            let frame = config.relaxation_frame.max(1) as usize;
            if self.relax_count > config.relaxation_frame && velocity_history.len() >= frame {
                let avg = (0..frame)
                    .filter_map(|i| velocity_history.get_from_tail(i).copied())
                    .sum::<f64>()
                    / frame as f64;
                error = avg - desired_v;
                // Let the effective window hover around twice the frame when
                // the error persists.
                if self.relax_count > config.relaxation_frame * 2 {
                    self.relax_count -= 1;
                }
            }
            config.relaxation_kp * -error / (config.relaxation_k.ceil() * dt)
        } else {
            self.relax_count = 0;
            let leftover = dt.min(-quadr_x);
            sign * self.curvature * ((quadr_x + leftover).powi(2) - quadr_x * quadr_x) / dt
        }
    }

    fn proportional(&self, velocity: f64, desired_v: f64, config: &BrakeConfig) -> f64 {
        config.fallback_kp * (desired_v - velocity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const DT: f64 = 0.02;

    fn default_config() -> BrakeConfig {
        BrakeConfig::default()
    }

    #[test]
    fn test_step_response_has_no_overshoot() {
        // Plant: dv/dt = commanded acceleration exactly. The identified
        // authority is constant, so the curvature settles immediately.
        let config = default_config();
        let mut brake = QuadraticBrake::new();
        let mut history = RingBuffer::new(10);
        let desired = 0.4;
        let authority = 10.0;

        let mut v = 0.0;
        history.put(v);
        let mut max_v: f64 = 0.0;
        for _ in 0..400 {
            let acc = brake.acceleration(v, desired, authority, &history, DT, &config);
            assert!(acc.is_finite());
            v += acc * DT;
            history.put(v);
            max_v = max_v.max(v);
        }
        assert!(
            max_v <= desired + 1e-9,
            "velocity crossed the target: {max_v}"
        );
        assert_relative_eq!(v, desired, epsilon = 1e-3);
    }

    #[test]
    fn test_negative_step_is_symmetric() {
        let config = default_config();
        let mut brake = QuadraticBrake::new();
        let mut history = RingBuffer::new(10);
        let desired = -0.4;

        let mut v = 0.0;
        history.put(v);
        let mut min_v: f64 = 0.0;
        for _ in 0..400 {
            let acc = brake.acceleration(v, desired, 10.0, &history, DT, &config);
            v += acc * DT;
            history.put(v);
            min_v = min_v.min(v);
        }
        assert!(min_v >= desired - 1e-9);
        assert_relative_eq!(v, desired, epsilon = 1e-3);
    }

    #[test]
    fn test_unusable_curvature_falls_back_to_proportional() {
        let config = default_config();
        let mut brake = QuadraticBrake::new();
        let history = RingBuffer::new(4);
        let acc = brake.acceleration(0.1, 0.3, 0.0, &history, DT, &config);
        assert_relative_eq!(acc, config.fallback_kp * 0.2, epsilon = 1e-12);

        let acc = brake.acceleration(0.1, 0.3, f64::NAN, &history, DT, &config);
        assert_relative_eq!(acc, config.fallback_kp * 0.2, epsilon = 1e-12);
    }

    #[test]
    fn test_zero_error_commands_zero_acceleration() {
        let config = default_config();
        let mut brake = QuadraticBrake::new();
        let mut history = RingBuffer::new(4);
        history.put(0.2);
        let acc = brake.acceleration(0.2, 0.2, 10.0, &history, DT, &config);
        assert_relative_eq!(acc, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_curvature_is_smoothed_after_priming() {
        let config = default_config();
        let mut brake = QuadraticBrake::new();
        let history = RingBuffer::new(4);

        brake.acceleration(1.0, 0.0, 10.0, &history, DT, &config);
        let first = brake.curvature();
        assert_relative_eq!(first, config.quadr_kp * 10.0, epsilon = 1e-12);

        brake.acceleration(1.0, 0.0, 20.0, &history, DT, &config);
        let second = brake.curvature();
        // One smoothing step toward the new value, not a snap.
        assert_relative_eq!(
            second,
            first + (config.quadr_kp * 20.0 - first) / config.kacc_smoothing,
            epsilon = 1e-12
        );
    }
}
