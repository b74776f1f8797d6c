//! Tunable parameters for the adaptive control core.
//!
//! The core only reads current values; loading and saving is the host's
//! concern (the structs are plain serde types so any storage backend works).
//! Defaults are the values the system ships with.

use serde::{Deserialize, Serialize};

use crate::regression::{Channel, CHANNEL_COUNT};

/// How control surfaces respond to a commanded input.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum ActuatorModel {
    /// Surfaces reach the commanded position within the tick.
    #[default]
    Direct,
    /// First-order surface response; `response` is the fraction of a
    /// commanded step realized within one tick, in (0, 1].
    FirstOrder { response: f64 },
}

impl ActuatorModel {
    /// Scalar response factor entering the braking-law curvature.
    pub fn response_factor(&self) -> f64 {
        match *self {
            ActuatorModel::Direct => 1.0,
            ActuatorModel::FirstOrder { response } => response,
        }
    }
}

/// Parameters of the rolling-window regression.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegressionConfig {
    /// Samples in the regression window. Default 15.
    pub window: usize,
    /// Cap on the blend weight: how many past solves the committed model
    /// remembers. Default 10.
    pub solve_memory: u32,
    /// Per-axis channel importance weights. A zero weight removes the
    /// channel from that axis; non-zero weights scale its design column.
    pub importance: [[f64; CHANNEL_COUNT]; 3],
}

impl Default for RegressionConfig {
    fn default() -> Self {
        let mut importance = [[0.0; CHANNEL_COUNT]; 3];
        let pitch = &mut importance[0];
        pitch[Channel::PitchControl.index()] = 1.0;
        pitch[Channel::Aoa.index()] = 1.0;
        pitch[Channel::AoaPitchProduct.index()] = 1e3;
        pitch[Channel::HorizonAngle.index()] = 1e3;
        pitch[Channel::DynamicPressure.index()] = 1e6;
        let roll = &mut importance[1];
        roll[Channel::RollControl.index()] = 1.0;
        roll[Channel::Bank.index()] = 1e3;
        roll[Channel::DynamicPressure.index()] = 1e6;
        let yaw = &mut importance[2];
        yaw[Channel::YawControl.index()] = 1.0;
        yaw[Channel::Sideslip.index()] = 1.0;
        yaw[Channel::DynamicPressure.index()] = 1e6;
        Self {
            window: 15,
            solve_memory: 10,
            importance,
        }
    }
}

/// Parameters of the quadratic braking law.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrakeConfig {
    /// Gain from identified control authority to braking curvature.
    /// Default 0.3 (pitch/yaw), 0.4 (roll).
    pub quadr_kp: f64,
    /// Exponential smoothing constant for the curvature. Default 10.0.
    pub kacc_smoothing: f64,
    /// Width of the relaxation window in step durations. Default 1.0
    /// (pitch/yaw), 2.0 (roll).
    pub relaxation_k: f64,
    /// Proportional gain inside the relaxation window. Default 0.5.
    pub relaxation_kp: f64,
    /// Samples averaged for the relaxed velocity error. Default 1.
    pub relaxation_frame: u32,
    /// Plain proportional gain used when no usable curvature is identified.
    /// Default 8.0.
    pub fallback_kp: f64,
}

impl Default for BrakeConfig {
    fn default() -> Self {
        Self {
            quadr_kp: 0.3,
            kacc_smoothing: 10.0,
            relaxation_k: 1.0,
            relaxation_kp: 0.5,
            relaxation_frame: 1,
            fallback_kp: 8.0,
        }
    }
}

impl BrakeConfig {
    fn default_roll() -> Self {
        Self {
            quadr_kp: 0.4,
            relaxation_k: 2.0,
            ..Self::default()
        }
    }
}

/// Parameters of the pitch/yaw velocity law.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PitchYawLawConfig {
    /// Moderate desired velocity against the angle-of-attack envelope.
    /// Default true.
    pub moderate_aoa: bool,
    /// Moderate desired velocity against the g-force envelope. Default true.
    pub moderate_g: bool,
    /// Hard angle-of-attack limit in degrees. Default 15.
    pub max_aoa_deg: f64,
    /// G-force limit in g. Default 5.
    pub max_g_force: f64,
    /// Exponential smoothing constant for envelope bounds. Default 4.0.
    pub moderation_filter: f64,
    /// Structural angular velocity limit (rad/s). Default 0.5.
    pub max_v_construction: f64,
    /// Dynamic pressure (Pa) below which envelopes are not updated.
    /// Default 100.
    pub envelope_min_pressure: f64,
    /// Dynamic pressure (Pa) below which the non-overshoot ceiling falls
    /// back to the structural limit. Default 10.
    pub ceiling_min_pressure: f64,
    /// |AoA| bound (rad) inside which the linear model is trusted for
    /// envelope updates. Default 0.35.
    pub linear_aoa_range: f64,
    /// |AoA| bound (rad) inside which the ceiling is refreshed. Default 0.26.
    pub ceiling_aoa_range: f64,
    pub brake: BrakeConfig,
}

impl Default for PitchYawLawConfig {
    fn default() -> Self {
        Self {
            moderate_aoa: true,
            moderate_g: true,
            max_aoa_deg: 15.0,
            max_g_force: 5.0,
            moderation_filter: 4.0,
            max_v_construction: 0.5,
            envelope_min_pressure: 100.0,
            ceiling_min_pressure: 10.0,
            linear_aoa_range: 0.35,
            ceiling_aoa_range: 0.26,
            brake: BrakeConfig::default(),
        }
    }
}

/// Parameters of the roll velocity law.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RollLawConfig {
    /// Exponential smoothing constant for the equilibrium plateau.
    /// Default 4.0.
    pub moderation_filter: f64,
    /// Structural angular velocity limit (rad/s). Default 0.5.
    pub max_v_construction: f64,
    /// Dynamic pressure (Pa) below which the plateau is not updated.
    /// Default 10.
    pub min_pressure: f64,
    /// |sideslip| bound (rad) inside which the roll model is trusted.
    /// Default 0.3.
    pub max_flow_angle: f64,
    pub brake: BrakeConfig,
}

impl Default for RollLawConfig {
    fn default() -> Self {
        Self {
            moderation_filter: 4.0,
            max_v_construction: 0.5,
            min_pressure: 10.0,
            max_flow_angle: 0.3,
            brake: BrakeConfig::default_roll(),
        }
    }
}

/// Complete configuration of the adaptive control core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutopilotConfig {
    /// Depth of the per-axis state histories. Must cover the deepest
    /// look-back of the short-horizon estimator. Default 50.
    pub history_depth: usize,
    /// Maximum operator-input slew rate (full-scale units per second).
    /// Default 3.0.
    pub user_input_rate_clamp: f64,
    pub actuator: ActuatorModel,
    pub regression: RegressionConfig,
    pub pitch: PitchYawLawConfig,
    pub yaw: PitchYawLawConfig,
    pub roll: RollLawConfig,
}

impl Default for AutopilotConfig {
    fn default() -> Self {
        Self {
            history_depth: 50,
            user_input_rate_clamp: 3.0,
            actuator: ActuatorModel::default(),
            regression: RegressionConfig::default(),
            pitch: PitchYawLawConfig::default(),
            yaw: PitchYawLawConfig::default(),
            roll: RollLawConfig::default(),
        }
    }
}
