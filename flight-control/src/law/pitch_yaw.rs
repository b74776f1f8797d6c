//! Pitch/yaw velocity law: flow-angle and g-force envelope moderation with a
//! non-overshoot velocity ceiling.

use log::{debug, warn};

use crate::config::PitchYawLawConfig;
use crate::linear_model::LinearSystemModel;
use crate::matrix::Matrix;

use super::{simple_filter, LawContext, QuadraticBrake, VelocityLaw};

/// Standard gravity, m/s^2.
const G0: f64 = 9.81;

/// Below this flow-angle sensitivity the g-envelope solve is meaningless.
const MIN_FLOW_SENSITIVITY: f64 = 1e-5;

/// Damping applied to equilibria found on the statically unstable branch;
/// they mark a runaway boundary rather than a settled state.
const UNSTABLE_BRANCH_DAMPING: f64 = 0.6;

/// Velocity law for an axis whose turns trade angular velocity against a
/// flow angle (pitch against angle of attack, yaw against sideslip).
///
/// All envelope state persists across ticks and is exponentially smoothed;
/// a tick that cannot update a bound (low pressure, singular solve,
/// non-finite result) simply leaves it where it was.
#[derive(Debug, Clone)]
pub struct PitchYawVelocityLaw {
    config: PitchYawLawConfig,

    // Full-deflection equilibrium envelope.
    max_input_aoa: f64,
    max_input_v: f64,
    min_input_aoa: f64,
    min_input_v: f64,
    // Equilibrium velocities at the hard flow-angle limit.
    max_aoa_v: f64,
    min_aoa_v: f64,
    // G-force envelope.
    max_g_aoa: f64,
    min_g_aoa: f64,
    max_g_v: f64,
    min_g_v: f64,
    // Effective bounds for the current tick.
    res_max_aoa: f64,
    res_min_aoa: f64,
    res_equilibr_v_upper: f64,
    res_equilibr_v_lower: f64,
    // Non-overshoot ceiling.
    transit_max_v: f64,
    held_ceiling: f64,
    scaled_aoa: f64,
    brake: QuadraticBrake,
}

impl PitchYawVelocityLaw {
    pub fn new(config: PitchYawLawConfig) -> Self {
        Self {
            config,
            max_input_aoa: 0.0,
            max_input_v: 0.0,
            min_input_aoa: 0.0,
            min_input_v: 0.0,
            max_aoa_v: 0.0,
            min_aoa_v: 0.0,
            max_g_aoa: 0.0,
            min_g_aoa: 0.0,
            max_g_v: 0.0,
            min_g_v: 0.0,
            res_max_aoa: 0.0,
            res_min_aoa: 0.0,
            res_equilibr_v_upper: 0.0,
            res_equilibr_v_lower: 0.0,
            transit_max_v: 0.0,
            held_ceiling: 0.0,
            scaled_aoa: 0.0,
            brake: QuadraticBrake::new(),
        }
    }

    /// Smoothed upper full-deflection equilibrium flow angle.
    pub fn max_input_aoa(&self) -> f64 {
        self.max_input_aoa
    }

    /// Smoothed equilibrium velocity at `max_input_aoa`.
    pub fn max_input_v(&self) -> f64 {
        self.max_input_v
    }

    /// Smoothed lower full-deflection equilibrium flow angle.
    pub fn min_input_aoa(&self) -> f64 {
        self.min_input_aoa
    }

    /// Smoothed equilibrium velocity at `min_input_aoa`.
    pub fn min_input_v(&self) -> f64 {
        self.min_input_v
    }

    /// Current non-overshoot velocity ceiling.
    pub fn ceiling(&self) -> f64 {
        self.transit_max_v
    }

    /// Equilibria reachable under sustained full deflection, from the 2x2
    /// steady-state system. The sign of the flow-angle component tells the
    /// stability branch: a +1.0 input settling at negative flow angle means
    /// the plant is statically unstable there, and the solution bounds the
    /// *opposite* side of the envelope, damped because it marks a marginal
    /// equilibrium.
    fn update_input_envelope(&mut self, model: &LinearSystemModel) {
        let filter = self.config.moderation_filter;
        let mut eq_a = Matrix::zeros(2, 2);
        eq_a[(0, 0)] = model.a[(0, 0)];
        eq_a[(0, 1)] = model.a[(0, 1)];
        eq_a[(1, 0)] = model.a[(1, 0)];
        // eq_a[(1, 1)] stays zero: the moment row carries no velocity
        // damping estimate.
        let mut eq_b = Matrix::zeros(2, 1);
        eq_b[(0, 0)] = -(model.a[(0, 2)] + model.b[(0, 0)] + model.c[(0, 0)]);
        eq_b[(1, 0)] = -(model.a[(1, 2)] + model.b[(1, 0)] + model.c[(1, 0)]);

        let eq = match eq_a.solve(&eq_b) {
            Ok(eq) => eq,
            Err(e) => {
                debug!("full-deflection equilibrium solve skipped: {e}");
                return;
            }
        };
        if !eq[(0, 0)].is_finite() || !eq[(1, 0)].is_finite() {
            return;
        }
        if eq[(0, 0)] < 0.0 {
            self.min_input_aoa = simple_filter(
                UNSTABLE_BRANCH_DAMPING * eq[(0, 0)],
                self.min_input_aoa,
                filter,
            );
            self.min_input_v = simple_filter(
                UNSTABLE_BRANCH_DAMPING * eq[(1, 0)],
                self.min_input_v,
                filter,
            );
        } else {
            self.max_input_aoa = simple_filter(eq[(0, 0)], self.max_input_aoa, filter);
            self.max_input_v = simple_filter(eq[(1, 0)], self.max_input_v, filter);
        }

        // Same system under full negative deflection.
        eq_b[(0, 0)] = -(model.a[(0, 2)] - model.b[(0, 0)] + model.c[(0, 0)]);
        eq_b[(1, 0)] = -(model.a[(1, 2)] - model.b[(1, 0)] + model.c[(1, 0)]);
        let eq = match eq_a.solve(&eq_b) {
            Ok(eq) => eq,
            Err(e) => {
                debug!("negative-deflection equilibrium solve skipped: {e}");
                return;
            }
        };
        if !eq[(0, 0)].is_finite() || !eq[(1, 0)].is_finite() {
            return;
        }
        if eq[(0, 0)] >= 0.0 {
            self.max_input_aoa = simple_filter(
                UNSTABLE_BRANCH_DAMPING * eq[(0, 0)],
                self.max_input_aoa,
                filter,
            );
            self.max_input_v = simple_filter(
                UNSTABLE_BRANCH_DAMPING * eq[(1, 0)],
                self.max_input_v,
                filter,
            );
        } else {
            self.min_input_aoa = simple_filter(eq[(0, 0)], self.min_input_aoa, filter);
            self.min_input_v = simple_filter(eq[(1, 0)], self.min_input_v, filter);
        }
    }

    /// Equilibrium velocities at the configured hard flow-angle limit,
    /// solving for (velocity, input) with the angle pinned at +/- the limit.
    fn update_aoa_limit_envelope(&mut self, model: &LinearSystemModel, rad_max_aoa: f64) {
        let filter = self.config.moderation_filter;
        let mut eq_a = Matrix::zeros(2, 2);
        eq_a[(0, 0)] = model.a[(0, 1)];
        eq_a[(0, 1)] = model.b[(0, 0)];
        eq_a[(1, 0)] = model.a[(1, 1)];
        eq_a[(1, 1)] = model.b[(1, 0)];
        let mut eq_b = Matrix::zeros(2, 1);
        eq_b[(0, 0)] = -(model.a[(0, 0)] * rad_max_aoa + model.a[(0, 2)] + model.c[(0, 0)]);
        eq_b[(1, 0)] = -(model.a[(1, 0)] * rad_max_aoa + model.a[(1, 2)] + model.c[(1, 0)]);

        let upper = match eq_a.solve(&eq_b) {
            Ok(eq) => eq[(0, 0)],
            Err(e) => {
                debug!("flow-angle limit equilibrium solve skipped: {e}");
                return;
            }
        };
        eq_b[(0, 0)] = -(model.a[(0, 0)] * -rad_max_aoa + model.a[(0, 2)] + model.c[(0, 0)]);
        eq_b[(1, 0)] = -(model.a[(1, 0)] * -rad_max_aoa + model.a[(1, 2)] + model.c[(1, 0)]);
        let lower = match eq_a.solve(&eq_b) {
            Ok(eq) => eq[(0, 0)],
            Err(e) => {
                debug!("flow-angle limit equilibrium solve skipped: {e}");
                return;
            }
        };
        if upper.is_finite() && lower.is_finite() {
            self.max_aoa_v = simple_filter(upper, self.max_aoa_v, filter);
            self.min_aoa_v = simple_filter(lower, self.min_aoa_v, filter);
        }
    }

    /// G-limited equilibrium velocities and the flow angles that realize
    /// them, accounting for the gravity and non-inertial contribution.
    fn update_g_envelope(&mut self, model: &LinearSystemModel, ctx: &LawContext<'_>) {
        let filter = self.config.moderation_filter;
        let raw_max = (self.config.max_g_force * G0 + ctx.gravity_acc) / ctx.surface_speed;
        let raw_min = (-self.config.max_g_force * G0 + ctx.gravity_acc) / ctx.surface_speed;
        if !raw_max.is_finite() || !raw_min.is_finite() {
            return;
        }
        self.max_g_v = simple_filter(raw_max, self.max_g_v, filter);
        self.min_g_v = simple_filter(raw_min, self.min_g_v, filter);

        let mut eq_a = Matrix::zeros(2, 2);
        eq_a[(0, 0)] = model.a[(0, 0)];
        eq_a[(0, 1)] = model.b[(0, 0)];
        eq_a[(1, 0)] = model.a[(1, 0)];
        eq_a[(1, 1)] = model.b[(1, 0)];
        let mut eq_b = Matrix::zeros(2, 1);
        eq_b[(0, 0)] = -(model.a[(0, 1)] * self.max_g_v + model.a[(0, 2)] + model.c[(0, 0)]);
        eq_b[(1, 0)] = -(model.a[(1, 2)] + model.c[(1, 0)]);

        let upper = match eq_a.solve(&eq_b) {
            Ok(eq) => eq[(0, 0)],
            Err(e) => {
                debug!("g-limit equilibrium solve skipped: {e}");
                return;
            }
        };
        eq_b[(0, 0)] = -(model.a[(0, 1)] * self.min_g_v + model.a[(0, 2)] + model.c[(0, 0)]);
        let lower = match eq_a.solve(&eq_b) {
            Ok(eq) => eq[(0, 0)],
            Err(e) => {
                debug!("g-limit equilibrium solve skipped: {e}");
                return;
            }
        };
        if upper.is_finite() && lower.is_finite() {
            self.max_g_aoa = simple_filter(upper, self.max_g_aoa, filter);
            self.min_g_aoa = simple_filter(lower, self.min_g_aoa, filter);
        }
    }

    /// Refresh the non-overshoot ceiling: the entry velocity that, braking
    /// at the deceleration available mid-envelope under full opposite
    /// deflection, asymptotically reaches the boundary without crossing it.
    fn update_ceiling(&mut self, model: &LinearSystemModel, ctx: &LawContext<'_>, rad_max_aoa: f64) {
        let cfg = &self.config;
        let abs_angle = ctx.flow_angle.abs();
        if abs_angle < cfg.ceiling_aoa_range && ctx.dynamic_pressure > cfg.ceiling_min_pressure {
            let transit_max_aoa = rad_max_aoa.min(self.res_max_aoa);
            let mut state = Matrix::zeros(3, 1);
            state[(0, 0)] = transit_max_aoa / 2.0;
            state[(2, 0)] = 1.0;
            let deceleration = model.eval_row(1, &state, -1.0);
            let new_ceiling = (transit_max_aoa * -deceleration).sqrt();
            if new_ceiling.is_finite() {
                let new_ceiling = new_ceiling.min(cfg.max_v_construction);
                self.transit_max_v =
                    simple_filter(new_ceiling, self.transit_max_v, cfg.moderation_filter);
                self.held_ceiling = self.transit_max_v;
            } else if self.held_ceiling != 0.0 {
                self.transit_max_v = self.held_ceiling;
            } else {
                self.held_ceiling = cfg.max_v_construction;
                self.transit_max_v = cfg.max_v_construction;
            }
        } else if ctx.dynamic_pressure <= cfg.ceiling_min_pressure {
            // Too slow for the model to mean anything; the structural limit
            // is the only bound left.
            self.transit_max_v = cfg.max_v_construction;
        } else if self.held_ceiling != 0.0 {
            self.transit_max_v = self.held_ceiling;
        } else {
            self.held_ceiling = cfg.max_v_construction;
            self.transit_max_v = cfg.max_v_construction;
        }
    }
}

impl VelocityLaw for PitchYawVelocityLaw {
    fn moderate(&mut self, desired_v: f64, user_driven: bool, ctx: &LawContext<'_>) -> f64 {
        let rad_max_aoa = self.config.max_aoa_deg.to_radians();
        self.res_max_aoa = 100.0;
        self.res_min_aoa = -100.0;
        self.res_equilibr_v_upper = 0.0;
        self.res_equilibr_v_lower = 0.0;
        let cur_angle = ctx.flow_angle;
        let abs_angle = cur_angle.abs();
        let mut moderated = false;

        if self.config.moderate_aoa && ctx.dynamic_pressure > self.config.envelope_min_pressure {
            if abs_angle < self.config.linear_aoa_range {
                self.update_input_envelope(ctx.model);
                self.update_aoa_limit_envelope(ctx.model, rad_max_aoa);
            }
            // The tighter of the full-deflection and hard-limit bounds wins,
            // carrying its equilibrium velocity.
            if self.max_input_aoa < self.res_max_aoa {
                self.res_max_aoa = self.max_input_aoa;
                self.res_equilibr_v_upper = self.max_input_v;
            }
            if self.min_input_aoa > self.res_min_aoa {
                self.res_min_aoa = self.min_input_aoa;
                self.res_equilibr_v_lower = self.min_input_v;
            }
            if rad_max_aoa < self.res_max_aoa {
                self.res_max_aoa = rad_max_aoa;
                self.res_equilibr_v_upper = self.max_aoa_v;
            }
            if -rad_max_aoa > self.res_min_aoa {
                self.res_min_aoa = -rad_max_aoa;
                self.res_equilibr_v_lower = self.min_aoa_v;
            }
            moderated = true;
        }

        if self.config.moderate_g && ctx.dynamic_pressure > self.config.envelope_min_pressure {
            moderated = true;
            if ctx.model.a[(0, 0)].abs() > MIN_FLOW_SENSITIVITY
                && abs_angle < self.config.linear_aoa_range
            {
                self.update_g_envelope(ctx.model, ctx);
            }
            // Sanity window before the g-bounds may tighten anything.
            if self.max_g_aoa < 2.0
                && self.max_g_aoa > 0.0
                && self.min_g_aoa > -2.0
                && self.max_g_aoa > self.min_g_aoa
            {
                if self.max_g_aoa < self.res_max_aoa {
                    self.res_max_aoa = self.max_g_aoa;
                    self.res_equilibr_v_upper = self.max_g_v;
                }
                if self.min_g_aoa > self.res_min_aoa {
                    self.res_min_aoa = self.min_g_aoa;
                    self.res_equilibr_v_lower = self.min_g_v;
                }
            }
        }

        self.update_ceiling(ctx.model, ctx, rad_max_aoa);

        // Hold the surface-relative attitude when the operator is flying.
        let v_offset = if user_driven && ctx.orbital_speed_sq > 1.0 {
            ctx.attitude_hold_rate
        } else {
            0.0
        };

        let mut normalized = if user_driven {
            desired_v / self.config.max_v_construction
        } else {
            desired_v / self.transit_max_v
        };
        if !normalized.is_finite() {
            normalized = 0.0;
        }
        let normalized = normalized.clamp(-1.0, 1.0);

        let scaled = if moderated {
            if desired_v >= 0.0 {
                let mut scaled_aoa =
                    (self.res_max_aoa - cur_angle) / (self.res_max_aoa - self.res_min_aoa);
                if !scaled_aoa.is_finite() {
                    scaled_aoa = 0.0;
                }
                let mut scaled_aoa = scaled_aoa.clamp(-1.0, 1.0);
                if scaled_aoa < 0.0 {
                    // Already past the boundary: double the correction to
                    // speed up recovery.
                    scaled_aoa *= 2.0;
                }
                self.scaled_aoa = scaled_aoa;
                (self.transit_max_v * normalized * scaled_aoa
                    + self.res_equilibr_v_upper * (1.0 - scaled_aoa.abs())
                    + v_offset)
                    .min(self.transit_max_v * normalized + v_offset)
            } else {
                let mut scaled_aoa =
                    (self.res_min_aoa - cur_angle) / (self.res_min_aoa - self.res_max_aoa);
                if !scaled_aoa.is_finite() {
                    scaled_aoa = 0.0;
                }
                let mut scaled_aoa = scaled_aoa.clamp(-1.0, 1.0);
                if scaled_aoa < 0.0 {
                    scaled_aoa *= 2.0;
                }
                self.scaled_aoa = scaled_aoa;
                (self.transit_max_v * normalized * scaled_aoa
                    + self.res_equilibr_v_lower * (1.0 - scaled_aoa.abs())
                    + v_offset)
                    .max(self.transit_max_v * normalized + v_offset)
            }
        } else {
            self.transit_max_v * normalized + v_offset
        };

        if scaled.is_finite() {
            scaled
        } else {
            warn!("moderated desired velocity was non-finite, commanding zero");
            0.0
        }
    }

    fn acceleration(&mut self, desired_v: f64, ctx: &LawContext<'_>) -> f64 {
        let authority = ctx.model.b[(1, 0)] * ctx.model.response;
        self.brake.acceleration(
            ctx.velocity,
            desired_v,
            authority,
            ctx.velocity_history,
            ctx.dt,
            &self.config.brake,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring_buffer::RingBuffer;
    use approx::assert_relative_eq;

    /// Statically stable plant: flow-angle kinematics `d(aoa)/dt = -2 aoa + v`,
    /// moment row `dv/dt = -5 aoa + 10 u`.
    fn stable_model() -> LinearSystemModel {
        let mut model = LinearSystemModel::new(1.0);
        model.a[(0, 0)] = -2.0;
        model.a[(0, 1)] = 1.0;
        model.a[(1, 0)] = -5.0;
        model.b[(1, 0)] = 10.0;
        model
    }

    fn context<'a>(
        model: &'a LinearSystemModel,
        history: &'a RingBuffer<f64>,
        velocity: f64,
    ) -> LawContext<'a> {
        LawContext {
            model,
            velocity,
            velocity_history: history,
            flow_angle: 0.0,
            dynamic_pressure: 200.0,
            surface_speed: 150.0,
            gravity_acc: -9.81,
            attitude_hold_rate: 0.0,
            orbital_speed_sq: 0.0,
            dt: 0.02,
        }
    }

    #[test]
    fn test_stable_plant_envelope_matches_analytic_equilibrium() {
        // Full +1 deflection equilibrium of the stable plant:
        //   -5 aoa + 10 = 0         -> aoa = 2
        //   -2 aoa + v  = 0         -> v = 4
        let model = stable_model();
        let history = RingBuffer::new(4);
        let mut law = PitchYawVelocityLaw::new(PitchYawLawConfig::default());
        for _ in 0..300 {
            let ctx = context(&model, &history, 0.0);
            law.moderate(0.1, false, &ctx);
        }
        assert_relative_eq!(law.max_input_aoa(), 2.0, epsilon = 1e-6);
        assert_relative_eq!(law.max_input_v(), 4.0, epsilon = 1e-6);
        assert_relative_eq!(law.min_input_aoa(), -2.0, epsilon = 1e-6);
        assert_relative_eq!(law.min_input_v(), -4.0, epsilon = 1e-6);
    }

    #[test]
    fn test_ceiling_is_clamped_to_structural_limit() {
        let model = stable_model();
        let history = RingBuffer::new(4);
        let config = PitchYawLawConfig::default();
        let max_v = config.max_v_construction;
        let mut law = PitchYawVelocityLaw::new(config);
        for _ in 0..300 {
            let ctx = context(&model, &history, 0.0);
            law.moderate(0.1, false, &ctx);
        }
        // Plenty of braking authority: the model-derived ceiling exceeds the
        // structural limit and is clamped to it.
        assert_relative_eq!(law.ceiling(), max_v, epsilon = 1e-6);

        // A huge request is capped at the ceiling.
        let ctx = context(&model, &history, 0.0);
        let moderated = law.moderate(10.0, false, &ctx);
        assert!(moderated <= max_v + 1e-9);
    }

    #[test]
    fn test_zero_desired_at_equilibrium_commands_near_zero_acc() {
        let model = stable_model();
        let mut history = RingBuffer::new(4);
        history.put(0.0);
        let mut law = PitchYawVelocityLaw::new(PitchYawLawConfig::default());
        let ctx = context(&model, &history, 0.0);
        let acc = law.acceleration(0.0, &ctx);
        assert_relative_eq!(acc, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_unidentified_model_skips_envelope_updates() {
        // All-zero model: every equilibrium solve is singular; bounds stay
        // where they started and the output is still finite.
        let model = LinearSystemModel::new(1.0);
        let history = RingBuffer::new(4);
        let mut law = PitchYawVelocityLaw::new(PitchYawLawConfig::default());
        let ctx = context(&model, &history, 0.0);
        let moderated = law.moderate(0.3, false, &ctx);
        assert!(moderated.is_finite());
        assert_eq!(law.max_input_aoa(), 0.0);
    }

    #[test]
    fn test_low_pressure_falls_back_to_structural_limit() {
        let model = stable_model();
        let history = RingBuffer::new(4);
        let config = PitchYawLawConfig::default();
        let max_v = config.max_v_construction;
        let mut law = PitchYawVelocityLaw::new(config);
        let mut ctx = context(&model, &history, 0.0);
        ctx.dynamic_pressure = 5.0;
        let moderated = law.moderate(10.0, false, &ctx);
        assert_relative_eq!(law.ceiling(), max_v, epsilon = 1e-12);
        assert!(moderated <= max_v + 1e-9);
    }
}
