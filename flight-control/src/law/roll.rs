//! Roll velocity law: single-plateau envelope.
//!
//! Roll has no flow-angle runaway to moderate against; the only model-derived
//! bound is the steady roll rate reachable under full deflection, which caps
//! the desired velocity on each side.

use log::warn;

use crate::config::RollLawConfig;

use super::{simple_filter, LawContext, QuadraticBrake, VelocityLaw};

/// Velocity law for the roll axis.
#[derive(Debug, Clone)]
pub struct RollVelocityLaw {
    config: RollLawConfig,
    max_input_v: f64,
    min_input_v: f64,
    brake: QuadraticBrake,
}

impl RollVelocityLaw {
    pub fn new(config: RollLawConfig) -> Self {
        Self {
            config,
            max_input_v: 0.0,
            min_input_v: 0.0,
            brake: QuadraticBrake::new(),
        }
    }

    /// Smoothed steady roll rate under full positive deflection.
    pub fn max_input_v(&self) -> f64 {
        self.max_input_v
    }

    /// Smoothed steady roll rate under full negative deflection.
    pub fn min_input_v(&self) -> f64 {
        self.min_input_v
    }
}

impl VelocityLaw for RollVelocityLaw {
    fn moderate(&mut self, desired_v: f64, user_driven: bool, ctx: &LawContext<'_>) -> f64 {
        let cfg = &self.config;
        let model = ctx.model;

        if ctx.flow_angle.abs() < cfg.max_flow_angle && ctx.dynamic_pressure > cfg.min_pressure {
            // Steady state of `damping * v + authority * u + bias = 0` under
            // full deflection on each side.
            let new_max =
                -(model.c[(0, 0)] + model.b[(0, 0)] + model.a[(0, 1)]) / model.a[(0, 0)];
            let new_min =
                -(model.c[(0, 0)] - model.b[(0, 0)] - model.a[(0, 1)]) / model.a[(0, 0)];
            if new_max.is_finite() && new_min.is_finite() {
                self.max_input_v = simple_filter(new_max, self.max_input_v, cfg.moderation_filter);
                self.min_input_v = simple_filter(new_min, self.min_input_v, cfg.moderation_filter);
            }
        }

        let scaled = if desired_v >= 0.0 {
            let mut normalized = if user_driven {
                desired_v / cfg.max_v_construction
            } else {
                desired_v / self.max_input_v
            };
            if !normalized.is_finite() {
                normalized = 0.0;
            }
            let normalized = normalized.clamp(-1.0, 1.0);
            normalized * self.max_input_v.min(cfg.max_v_construction)
        } else {
            let mut normalized = if user_driven {
                desired_v / -cfg.max_v_construction
            } else {
                desired_v / self.min_input_v
            };
            if !normalized.is_finite() {
                normalized = 0.0;
            }
            let normalized = normalized.clamp(-1.0, 1.0);
            normalized * self.min_input_v.max(-cfg.max_v_construction)
        };

        if scaled.is_finite() {
            scaled
        } else {
            warn!("moderated roll velocity was non-finite, commanding zero");
            0.0
        }
    }

    fn acceleration(&mut self, desired_v: f64, ctx: &LawContext<'_>) -> f64 {
        let authority = ctx.model.b[(0, 0)] * ctx.model.response;
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
