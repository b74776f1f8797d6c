//! Host interface contracts for the adaptive flight control core.
//!
//! The control core is driven by a host simulation that calls it once per
//! physics tick with a read-only [`FlightSnapshot`] and a mutable
//! [`ControlState`]. The core answers with a desired angular acceleration per
//! axis, which it hands to the host-provided [`AccelerationController`] — the
//! inner loop that actually turns an acceleration request into control
//! surface deflections.
//!
//! All collaborators are injected explicitly at assembly time; nothing in
//! this crate performs any control computation itself.

use nalgebra::Vector3;

/// Rotation axis of the controlled body.
///
/// Indices match the component ordering used by every per-axis array in the
/// control core: pitch = 0, roll = 1, yaw = 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    Pitch,
    Roll,
    Yaw,
}

impl Axis {
    /// All axes in canonical order.
    pub const ALL: [Axis; 3] = [Axis::Pitch, Axis::Roll, Axis::Yaw];

    /// Canonical array index for this axis.
    pub fn index(self) -> usize {
        match self {
            Axis::Pitch => 0,
            Axis::Roll => 1,
            Axis::Yaw => 2,
        }
    }
}

/// Read-only state sample supplied by the host once per physics tick.
///
/// Directions are unit vectors in the world frame. Angular quantities are in
/// radians and radians per second, expressed on body axes in [`Axis`] order.
///
/// # Timing
///
/// `dt` is the duration of the tick that produced this sample. The control
/// core watches `dt` for discontinuities and re-arms its estimators when the
/// step size jumps, so the host does not need to guarantee a fixed rate —
/// only to report it honestly.
#[derive(Debug, Clone, PartialEq)]
pub struct FlightSnapshot {
    /// Body right axis (world frame, unit length).
    pub right: Vector3<f64>,
    /// Body forward (nose) axis (world frame, unit length).
    pub forward: Vector3<f64>,
    /// Body up axis (world frame, unit length).
    pub up: Vector3<f64>,
    /// Local "away from the ground" direction (world frame, unit length).
    pub world_up: Vector3<f64>,
    /// Velocity relative to the surface (world frame, m/s).
    pub surface_velocity: Vector3<f64>,
    /// Angular velocity on body axes (rad/s), [`Axis`] order.
    pub angular_velocity: [f64; 3],
    /// Dynamic pressure (Pa).
    pub dynamic_pressure: f64,
    /// Gravitational plus non-inertial acceleration acting on the body
    /// (world frame, m/s^2).
    pub gravity_acc: Vector3<f64>,
    /// Body-frame rotation rate that would hold the current attitude fixed
    /// relative to the surface (rad/s), [`Axis`] order. Used as the
    /// attitude-hold velocity offset when an operator is flying.
    pub frame_rotation: [f64; 3],
    /// Squared orbital speed (m^2/s^2); gates the attitude-hold offset.
    pub orbital_speed_sq: f64,
    /// True while the vehicle is in ground contact. Ground contact
    /// invalidates the free-flight model and resets the estimators.
    pub grounded: bool,
    /// Duration of this physics tick (s).
    pub dt: f64,
}

/// Mutable control values the inner acceleration controller adjusts.
///
/// Values are normalized control positions in [-1, 1].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ControlState {
    pub pitch: f64,
    pub roll: f64,
    pub yaw: f64,
}

impl ControlState {
    /// Control value for the given axis.
    pub fn get(&self, axis: Axis) -> f64 {
        match axis {
            Axis::Pitch => self.pitch,
            Axis::Roll => self.roll,
            Axis::Yaw => self.yaw,
        }
    }

    /// Set the control value for the given axis, clamped to [-1, 1].
    pub fn set(&mut self, axis: Axis, value: f64) {
        let value = value.clamp(-1.0, 1.0);
        match axis {
            Axis::Pitch => self.pitch = value,
            Axis::Roll => self.roll = value,
            Axis::Yaw => self.yaw = value,
        }
    }
}

/// Raw operator stick input, when a human is flying.
///
/// `None` on an axis means the autopilot target drives that axis; `Some`
/// switches the velocity law to operator scaling for the tick.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PilotInput {
    pub pitch: Option<f64>,
    pub roll: Option<f64>,
    pub yaw: Option<f64>,
}

impl PilotInput {
    /// Operator input for the given axis, if present.
    pub fn axis(&self, axis: Axis) -> Option<f64> {
        match axis {
            Axis::Pitch => self.pitch,
            Axis::Roll => self.roll,
            Axis::Yaw => self.yaw,
        }
    }
}

/// Inner acceleration controller: realizes a desired angular acceleration as
/// a control adjustment.
///
/// The control core computes a bounded, finite desired angular acceleration
/// per axis each tick and hands it to this collaborator together with the
/// mutable [`ControlState`]. How the acceleration request is realized
/// (control surface deflection, reaction wheels, ...) is entirely the
/// implementor's concern.
///
/// # Contract
///
/// - `desired_acc` is always finite; the core filters NaN/Infinity before
///   this boundary.
/// - Called exactly once per axis per tick, in [`Axis::ALL`] order.
pub trait AccelerationController {
    /// Adjust `ctrl` so the body approaches `desired_acc` on `axis`.
    fn apply(&mut self, axis: Axis, desired_acc: f64, ctrl: &mut ControlState);
}
