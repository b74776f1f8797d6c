//! Short-horizon control response estimator.
//!
//! Recovers an instantaneous affine model `dv/dt ~ k * input + c` for one
//! rotation axis by finite differences over the recent input history. The
//! estimator needs two distinct control-input plateaus behind the newest
//! sample; when the pilot or autopilot has been holding the stick still there
//! is simply nothing to identify and the previous gain is kept.

use log::debug;

use crate::history::AxisHistory;

/// Per-axis affine control response estimate.
///
/// `gain` is the local slope of angular acceleration with respect to control
/// input; `bias` is re-anchored to the newest sample every update so the fit
/// always passes through the latest measurement.
#[derive(Debug, Clone, Copy)]
pub struct ShortHorizonEstimator {
    gain: f64,
    bias: f64,
}

impl Default for ShortHorizonEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShortHorizonEstimator {
    pub fn new() -> Self {
        Self {
            gain: 0.0,
            bias: 0.0,
        }
    }

    /// Current gain estimate `k`.
    pub fn gain(&self) -> f64 {
        self.gain
    }

    /// Current bias estimate `c`.
    pub fn bias(&self) -> f64 {
        self.bias
    }

    /// Refresh the estimate from the axis history.
    ///
    /// Runs only once two stable timing cycles have elapsed (the derivative
    /// buffer needs them). A failed gain refresh keeps the previous gain;
    /// the bias is recomputed from the newest sample regardless, so the
    /// affine fit stays anchored even while the gain is stale.
    pub fn update(&mut self, history: &AxisHistory, stable_steps: u32) {
        if stable_steps < 2 {
            return;
        }
        if let Some(gain) = Self::scan_gain(history) {
            self.gain = gain;
        }
        if let (Some(&dv), Some(&input)) = (history.derivative.last(), history.input.last()) {
            self.bias = dv - input * self.gain;
        }
    }

    /// Gain from the two most recent distinct input plateaus.
    ///
    /// Scans back for the newest index `i1` whose input differs from the
    /// latest value, then for an `i0` differing from `i1`. The two
    /// finite-difference slopes and their divided difference give the local
    /// slope at the newest input; any missing plateau or non-finite
    /// intermediate aborts the refresh.
    fn scan_gain(history: &AxisHistory) -> Option<f64> {
        let depth = history.input.len().min(history.derivative.len());
        let input = |i: usize| history.input.get_from_tail(i).copied();
        let deriv = |i: usize| history.derivative.get_from_tail(i).copied();

        let u0 = input(0)?;
        let i1 = match (1..depth).find(|&i| input(i) != Some(u0)) {
            Some(i) => i,
            None => {
                debug!("short-horizon: no input variation in history, gain retained");
                return None;
            }
        };
        let u1 = input(i1)?;
        let i0 = match ((i1 + 1)..depth).find(|&i| input(i) != Some(u1)) {
            Some(i) => i,
            None => {
                debug!("short-horizon: single input plateau in history, gain retained");
                return None;
            }
        };
        let u2 = input(i0)?;

        let slope_old = (deriv(i1)? - deriv(i0)?) / (u1 - u2);
        if !slope_old.is_finite() {
            debug!("short-horizon: non-finite trailing slope, gain retained");
            return None;
        }
        let slope_new = (deriv(0)? - deriv(i1)?) / (u0 - u1);
        if !slope_new.is_finite() {
            debug!("short-horizon: non-finite leading slope, gain retained");
            return None;
        }
        let curvature = (slope_new - slope_old) / (u0 - u1);
        if !curvature.is_finite() {
            debug!("short-horizon: non-finite curvature, gain retained");
            return None;
        }

        // Local slope of the divided-difference quadratic at the newest
        // input; reduces to the plain slope when the response is linear.
        let gain = slope_new + curvature * (u0 - u1);
        gain.is_finite().then_some(gain)
    }

    /// Control input expected to produce `desired_derivative` next tick.
    ///
    /// Accounts for the derivative already in progress and its trend over
    /// one step. A non-finite result (e.g. zero gain) falls back to the
    /// current input, a deliberate no-op.
    pub fn input_for(&self, history: &AxisHistory, desired_derivative: f64, dt: f64) -> f64 {
        let current = history.input.last().copied().unwrap_or(0.0);
        let dv = history.derivative.last().copied().unwrap_or(0.0);
        let d2v = history.second_derivative.last().copied().unwrap_or(0.0);
        let delta = (desired_derivative - dv - d2v * dt) / self.gain;
        let next = current + delta;
        if next.is_finite() {
            next
        } else {
            current
        }
    }
}
