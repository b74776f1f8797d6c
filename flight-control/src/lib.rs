//! Adaptive flight-control core.
//!
//! Steers a simulated flight vehicle along commanded pitch/roll/yaw angular
//! velocities. Every physics tick the core identifies, online, a local
//! linear model of how control input maps to angular acceleration (a
//! short-horizon finite-difference estimator plus a windowed least-squares
//! regression solved off the real-time thread), bounds the commandable
//! angular velocity against angle-of-attack and g-force envelopes derived
//! from that model, and converts the bounded velocity target into a desired
//! angular acceleration through a closed-form non-overshooting braking law.
//!
//! The host supplies a read-only [`flight_proto::FlightSnapshot`] per tick
//! and an inner acceleration controller that realizes the commanded
//! accelerations; see [`AdaptiveAutopilot`] for the per-tick sequence.

pub mod aero;
pub mod autopilot;
pub mod config;
pub mod history;
pub mod law;
pub mod linear_model;
pub mod matrix;
pub mod regression;
pub mod ring_buffer;
pub mod short_horizon;
pub mod timing;

pub use autopilot::AdaptiveAutopilot;
pub use config::{ActuatorModel, AutopilotConfig, BrakeConfig, PitchYawLawConfig, RollLawConfig};
pub use linear_model::LinearSystemModel;
pub use matrix::{Matrix, MatrixError};
pub use ring_buffer::RingBuffer;
