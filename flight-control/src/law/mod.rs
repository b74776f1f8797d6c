//! Velocity-control laws.
//!
//! A velocity law turns a raw desired angular velocity into (1) a moderated
//! desired velocity that respects the identified safety envelopes and (2) a
//! desired angular acceleration that approaches it without overshoot. Pitch
//! and yaw share one implementation with full angle-of-attack and g-force
//! envelopes; roll uses a simplified single-plateau variant. The orchestrator
//! composes one law per axis.

mod brake;
mod pitch_yaw;
mod roll;

pub use brake::QuadraticBrake;
pub use pitch_yaw::PitchYawVelocityLaw;
pub use roll::RollVelocityLaw;

use crate::linear_model::LinearSystemModel;
use crate::ring_buffer::RingBuffer;

/// Exponential relaxation toward a new value: moves `1/filter` of the
/// remaining distance per call. Larger constants smooth harder.
pub(crate) fn simple_filter(new_value: f64, previous: f64, filter: f64) -> f64 {
    previous + (new_value - previous) / filter
}

/// Per-tick inputs to a velocity law.
pub struct LawContext<'a> {
    /// State-space view of the identified model for this axis.
    pub model: &'a LinearSystemModel,
    /// Current angular velocity (rad/s).
    pub velocity: f64,
    /// Recent angular velocity history, newest last.
    pub velocity_history: &'a RingBuffer<f64>,
    /// Flow angle this axis moderates against (AoA or sideslip, rad).
    pub flow_angle: f64,
    /// Dynamic pressure (Pa).
    pub dynamic_pressure: f64,
    /// Surface-relative speed (m/s).
    pub surface_speed: f64,
    /// Gravity + non-inertial acceleration along this axis's turn
    /// direction (m/s^2).
    pub gravity_acc: f64,
    /// Rotation rate that would hold the current surface-relative attitude
    /// (rad/s); the attitude-hold offset under operator control.
    pub attitude_hold_rate: f64,
    /// Squared orbital speed (m^2/s^2).
    pub orbital_speed_sq: f64,
    /// Tick duration (s).
    pub dt: f64,
}

/// Strategy interface for one axis's velocity control.
pub trait VelocityLaw {
    /// Bound the desired velocity against the axis's safety envelopes.
    fn moderate(&mut self, desired_v: f64, user_driven: bool, ctx: &LawContext<'_>) -> f64;

    /// Desired angular acceleration approaching `desired_v` without
    /// overshoot. Always finite.
    fn acceleration(&mut self, desired_v: f64, ctx: &LawContext<'_>) -> f64;
}
