//! Per-axis linear state-space view of the identified flight model.

use crate::matrix::Matrix;

/// Small linear system `dx/dt = A x + B u + C` describing one rotation axis
/// around the current flight condition.
///
/// # Pitch/yaw convention
///
/// State `x = [angle_of_attack, angular_velocity, 1]`, input `u` = control
/// value. Row 0 is the flow-angle kinematics, row 1 the angular-acceleration
/// (moment) row; the constant third state component carries the affine terms
/// inside `A`, with `C` holding the residual bias evaluated at the latest
/// telemetry. `A[(1, 1)]` is fixed at zero: the regression has no
/// angular-velocity channel, so no damping estimate exists for that slot and
/// the envelope solves treat it as absent.
///
/// # Roll convention
///
/// State `x = [angular_velocity, 1, unused]`: `A[(0, 0)]` is roll damping,
/// `A[(0, 1)]` the affine term, `B[(0, 0)]` the control authority.
#[derive(Debug, Clone)]
pub struct LinearSystemModel {
    pub a: Matrix,
    pub b: Matrix,
    pub c: Matrix,
    /// Fraction of a control step the actuator realizes within one tick;
    /// 1.0 for direct-response actuators, lower for first-order surfaces.
    pub response: f64,
}

impl LinearSystemModel {
    /// Zero model (no identified dynamics yet).
    pub fn new(response: f64) -> Self {
        Self {
            a: Matrix::zeros(3, 3),
            b: Matrix::zeros(3, 1),
            c: Matrix::zeros(3, 1),
            response,
        }
    }

    /// Evaluate one row of `A x + B u + C` for a 3x1 state column.
    pub fn eval_row(&self, row: usize, state: &Matrix, input: f64) -> f64 {
        let mut acc = self.b[(row, 0)] * input + self.c[(row, 0)];
        for j in 0..3 {
            acc += self.a[(row, j)] * state[(j, 0)];
        }
        acc
    }
}
