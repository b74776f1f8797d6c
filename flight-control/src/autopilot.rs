//! Per-tick orchestration of sampling, identification and control.

use log::warn;

use flight_proto::{AccelerationController, Axis, ControlState, FlightSnapshot, PilotInput};

use crate::aero::{axis_flow_angle, axis_gravity_projection, flow_angles};
use crate::config::AutopilotConfig;
use crate::history::AxisHistory;
use crate::law::{LawContext, PitchYawVelocityLaw, RollVelocityLaw, VelocityLaw};
use crate::regression::{Channel, RegressionModel, CHANNEL_COUNT};
use crate::short_horizon::ShortHorizonEstimator;
use crate::timing::TimingGate;

/// The assembled adaptive flight controller.
///
/// Owns every buffer and estimator; the host calls [`step`](Self::step) once
/// per physics tick. The sequence per tick: stability gate, history and
/// telemetry sampling, short-horizon update, regression
/// predict/schedule/poll, then per axis target selection, envelope
/// moderation, the braking law, and the hand-off to the injected inner
/// acceleration controller.
pub struct AdaptiveAutopilot {
    config: AutopilotConfig,
    gate: TimingGate,
    histories: [AxisHistory; 3],
    short_horizon: [ShortHorizonEstimator; 3],
    regression: RegressionModel,
    pitch_law: PitchYawVelocityLaw,
    yaw_law: PitchYawVelocityLaw,
    roll_law: RollVelocityLaw,
    acc_controller: Box<dyn AccelerationController>,
    prev_user_input: [f64; 3],
}

impl AdaptiveAutopilot {
    /// Assemble the controller with its injected inner acceleration
    /// controller.
    pub fn new(config: AutopilotConfig, acc_controller: Box<dyn AccelerationController>) -> Self {
        let histories = std::array::from_fn(|_| AxisHistory::new(config.history_depth));
        let regression = RegressionModel::new(&config.regression);
        let pitch_law = PitchYawVelocityLaw::new(config.pitch.clone());
        let yaw_law = PitchYawVelocityLaw::new(config.yaw.clone());
        let roll_law = RollVelocityLaw::new(config.roll.clone());
        Self {
            config,
            gate: TimingGate::new(),
            histories,
            short_horizon: [ShortHorizonEstimator::new(); 3],
            regression,
            pitch_law,
            yaw_law,
            roll_law,
            acc_controller,
            prev_user_input: [0.0; 3],
        }
    }

    /// Run one physics tick.
    ///
    /// `targets` are autopilot-commanded angular velocities per axis,
    /// overridden per axis by any operator input present in `pilot`. Returns
    /// the commanded angular accelerations (always finite); the same values
    /// are handed to the inner acceleration controller together with `ctrl`.
    ///
    /// While grounded the free-flight model is invalid: the stability gate
    /// and solve counters reset and the command is zero on every axis.
    pub fn step(
        &mut self,
        snap: &FlightSnapshot,
        targets: [f64; 3],
        pilot: &PilotInput,
        ctrl: &mut ControlState,
    ) -> [f64; 3] {
        if snap.grounded {
            self.gate.reset();
            self.regression.reset_counters();
            return [0.0; 3];
        }

        let stable = self.gate.observe(snap.dt);
        if stable == 0 {
            // A step-duration jump invalidates the blend memory as well.
            self.regression.reset_counters();
        }
        let angles = flow_angles(snap);

        for axis in Axis::ALL {
            let i = axis.index();
            self.histories[i].record(ctrl.get(axis), snap.angular_velocity[i], snap.dt, stable);
            self.short_horizon[i].update(&self.histories[i], stable);
        }

        let mut sample = [0.0; CHANNEL_COUNT];
        sample[Channel::PitchControl.index()] = ctrl.pitch;
        sample[Channel::RollControl.index()] = ctrl.roll;
        sample[Channel::YawControl.index()] = ctrl.yaw;
        sample[Channel::Aoa.index()] = angles.aoa;
        sample[Channel::Sideslip.index()] = angles.sideslip;
        sample[Channel::AoaPitchProduct.index()] = angles.aoa * ctrl.pitch;
        sample[Channel::HorizonAngle.index()] = angles.horizon_angle;
        sample[Channel::Bank.index()] = angles.bank;
        sample[Channel::DynamicPressure.index()] = snap.dynamic_pressure;
        self.regression
            .record(&sample, &snap.angular_velocity, snap.dt, stable);
        self.regression.predict(stable);
        self.regression.advance(stable);

        let response = self.config.actuator.response_factor();
        let surface_speed = snap.surface_velocity.norm();
        let mut commands = [0.0; 3];
        for axis in Axis::ALL {
            let i = axis.index();
            let (desired_v, user_driven) = self.select_target(axis, &targets, pilot, snap.dt);
            let model = self.regression.rotation_model(axis, response);
            let ctx = LawContext {
                model: &model,
                velocity: snap.angular_velocity[i],
                velocity_history: &self.histories[i].velocity,
                flow_angle: axis_flow_angle(&angles, axis),
                dynamic_pressure: snap.dynamic_pressure,
                surface_speed,
                gravity_acc: axis_gravity_projection(snap, axis),
                attitude_hold_rate: snap.frame_rotation[i],
                orbital_speed_sq: snap.orbital_speed_sq,
                dt: snap.dt,
            };
            let mut acc = match axis {
                Axis::Pitch => {
                    let bounded = self.pitch_law.moderate(desired_v, user_driven, &ctx);
                    self.pitch_law.acceleration(bounded, &ctx)
                }
                Axis::Yaw => {
                    let bounded = self.yaw_law.moderate(desired_v, user_driven, &ctx);
                    self.yaw_law.acceleration(bounded, &ctx)
                }
                Axis::Roll => {
                    let bounded = self.roll_law.moderate(desired_v, user_driven, &ctx);
                    self.roll_law.acceleration(bounded, &ctx)
                }
            };
            // Nothing non-finite may ever cross this boundary.
            if !acc.is_finite() {
                warn!("non-finite acceleration command on {axis:?}, commanding zero");
                acc = 0.0;
            }
            self.acc_controller.apply(axis, acc, ctrl);
            commands[i] = acc;
        }
        commands
    }

    /// Pick the desired velocity for one axis: operator input (slew-rate
    /// limited against the previous tick) scales the structural limit;
    /// otherwise the autopilot target is clamped to it.
    fn select_target(
        &mut self,
        axis: Axis,
        targets: &[f64; 3],
        pilot: &PilotInput,
        dt: f64,
    ) -> (f64, bool) {
        let i = axis.index();
        let max_v = match axis {
            Axis::Pitch => self.config.pitch.max_v_construction,
            Axis::Yaw => self.config.yaw.max_v_construction,
            Axis::Roll => self.config.roll.max_v_construction,
        };
        match pilot.axis(axis) {
            Some(raw) => {
                let clamp = self.config.user_input_rate_clamp * dt;
                let delta = (raw - self.prev_user_input[i]).clamp(-clamp, clamp);
                let input = self.prev_user_input[i] + delta;
                self.prev_user_input[i] = input;
                (input * max_v, true)
            }
            None => (targets[i].clamp(-max_v, max_v), false),
        }
    }

    /// State history of one axis.
    pub fn history(&self, axis: Axis) -> &AxisHistory {
        &self.histories[axis.index()]
    }

    /// Short-horizon estimator of one axis, for the inner acceleration
    /// controller's input conversion.
    pub fn short_horizon(&self, axis: Axis) -> &ShortHorizonEstimator {
        &self.short_horizon[axis.index()]
    }

    /// Slew-rate limited operator input currently in effect on one axis.
    pub fn effective_pilot_input(&self, axis: Axis) -> f64 {
        self.prev_user_input[axis.index()]
    }

    /// The regression model (diagnostics).
    pub fn regression(&self) -> &RegressionModel {
        &self.regression
    }

    /// Active configuration.
    pub fn config(&self) -> &AutopilotConfig {
        &self.config
    }
}
