//! Flow-angle and attitude extraction from the host snapshot.
//!
//! The host hands over raw orientation and velocity vectors; everything the
//! identification pipeline consumes (angle of attack, sideslip, horizon and
//! bank angles, per-axis gravity projections) is derived here.

use flight_proto::{Axis, FlightSnapshot};

/// Airspeed below which flow angles are undefined and reported as zero.
const MIN_FLOW_SPEED: f64 = 1e-3;

/// Flow and attitude angles for one tick, in radians.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FlowAngles {
    /// Pitch-plane angle of attack: positive when the nose points above the
    /// velocity vector.
    pub aoa: f64,
    /// Yaw-plane angle of attack (sideslip): positive when the flow comes
    /// from the right of the nose.
    pub sideslip: f64,
    /// Elevation of the forward axis above the horizon plane.
    pub horizon_angle: f64,
    /// Elevation of the right axis above the horizon plane (bank).
    pub bank: f64,
}

/// Extract flow and attitude angles from a snapshot.
pub fn flow_angles(snap: &FlightSnapshot) -> FlowAngles {
    let speed = snap.surface_velocity.norm();
    let (aoa, sideslip) = if speed < MIN_FLOW_SPEED {
        (0.0, 0.0)
    } else {
        let vhat = snap.surface_velocity / speed;
        (
            (-vhat.dot(&snap.up)).atan2(vhat.dot(&snap.forward)),
            vhat.dot(&snap.right).atan2(vhat.dot(&snap.forward)),
        )
    };
    FlowAngles {
        aoa,
        sideslip,
        horizon_angle: snap.forward.dot(&snap.world_up).clamp(-1.0, 1.0).asin(),
        bank: snap.right.dot(&snap.world_up).clamp(-1.0, 1.0).asin(),
    }
}

/// The flow angle the velocity law of `axis` moderates against.
///
/// Pitch turns change the angle of attack, yaw turns the sideslip. The roll
/// law gates on sideslip as well, since rolling at high sideslip is where
/// its linear model stops being trustworthy.
pub fn axis_flow_angle(angles: &FlowAngles, axis: Axis) -> f64 {
    match axis {
        Axis::Pitch => angles.aoa,
        Axis::Roll | Axis::Yaw => angles.sideslip,
    }
}

/// Component of gravitational plus non-inertial acceleration along the turn
/// direction of `axis` (m/s^2), used by the g-force limiter.
pub fn axis_gravity_projection(snap: &FlightSnapshot, axis: Axis) -> f64 {
    match axis {
        Axis::Pitch => snap.gravity_acc.dot(&snap.up),
        Axis::Yaw => snap.gravity_acc.dot(&snap.right),
        Axis::Roll => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    fn level_snapshot() -> FlightSnapshot {
        FlightSnapshot {
            right: Vector3::new(1.0, 0.0, 0.0),
            forward: Vector3::new(0.0, 1.0, 0.0),
            up: Vector3::new(0.0, 0.0, 1.0),
            world_up: Vector3::new(0.0, 0.0, 1.0),
            surface_velocity: Vector3::new(0.0, 100.0, 0.0),
            angular_velocity: [0.0; 3],
            dynamic_pressure: 6000.0,
            gravity_acc: Vector3::new(0.0, 0.0, -9.81),
            frame_rotation: [0.0; 3],
            orbital_speed_sq: 0.0,
            grounded: false,
            dt: 0.02,
        }
    }

    #[test]
    fn test_level_flight_has_zero_angles() {
        let angles = flow_angles(&level_snapshot());
        assert_relative_eq!(angles.aoa, 0.0, epsilon = 1e-12);
        assert_relative_eq!(angles.sideslip, 0.0, epsilon = 1e-12);
        assert_relative_eq!(angles.horizon_angle, 0.0, epsilon = 1e-12);
        assert_relative_eq!(angles.bank, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_descending_flow_gives_positive_aoa() {
        // Nose level, velocity 5 degrees below the forward axis.
        let mut snap = level_snapshot();
        let angle: f64 = 5f64.to_radians();
        snap.surface_velocity = Vector3::new(0.0, 100.0 * angle.cos(), -100.0 * angle.sin());
        let angles = flow_angles(&snap);
        assert_relative_eq!(angles.aoa, angle, epsilon = 1e-10);
        assert_relative_eq!(angles.sideslip, 0.0, epsilon = 1e-10);
    }

    #[test]
    fn test_sideslip_from_the_right() {
        let mut snap = level_snapshot();
        let angle: f64 = 3f64.to_radians();
        snap.surface_velocity = Vector3::new(100.0 * angle.sin(), 100.0 * angle.cos(), 0.0);
        let angles = flow_angles(&snap);
        assert_relative_eq!(angles.sideslip, angle, epsilon = 1e-10);
    }

    #[test]
    fn test_angles_zero_when_nearly_static() {
        let mut snap = level_snapshot();
        snap.surface_velocity = Vector3::new(0.0, 1e-6, 0.0);
        let angles = flow_angles(&snap);
        assert_eq!(angles.aoa, 0.0);
        assert_eq!(angles.sideslip, 0.0);
    }

    #[test]
    fn test_gravity_projection_level_flight() {
        let snap = level_snapshot();
        assert_relative_eq!(
            axis_gravity_projection(&snap, Axis::Pitch),
            -9.81,
            epsilon = 1e-12
        );
        assert_relative_eq!(
            axis_gravity_projection(&snap, Axis::Yaw),
            0.0,
            epsilon = 1e-12
        );
        assert_eq!(axis_gravity_projection(&snap, Axis::Roll), 0.0);
    }

    #[test]
    fn test_pitched_up_horizon_angle() {
        let mut snap = level_snapshot();
        let angle: f64 = 10f64.to_radians();
        snap.forward = Vector3::new(0.0, angle.cos(), angle.sin());
        snap.up = Vector3::new(0.0, -angle.sin(), angle.cos());
        let angles = flow_angles(&snap);
        assert_relative_eq!(angles.horizon_angle, angle, epsilon = 1e-10);
    }
}
