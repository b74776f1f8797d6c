//! Windowed least-squares flight model with an asynchronous solve.
//!
//! Maintains a rolling window of telemetry and angular-derivative samples
//! and periodically fits, per rotation axis, a linear model of angular
//! acceleration over the telemetry channels. The ordinary-least-squares
//! solve is the one computation too heavy for the real-time tick, so it runs
//! on a short-lived worker thread; the tick polls for completion and commits
//! results through an exponential blend. At most one solve is ever in
//! flight — a trigger that lands while one is running is dropped, never
//! queued.

use crossbeam_channel::{bounded, Receiver, TryRecvError};
use log::{debug, warn};

use flight_proto::Axis;

use crate::config::RegressionConfig;
use crate::history::one_sided_derivative;
use crate::linear_model::LinearSystemModel;
use crate::matrix::{least_squares, Matrix, MatrixError};
use crate::ring_buffer::RingBuffer;

/// Number of telemetry channels fed to the regression.
pub const CHANNEL_COUNT: usize = 9;

/// Telemetry channels, in design-matrix column order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    PitchControl = 0,
    RollControl = 1,
    YawControl = 2,
    /// Pitch-plane angle of attack.
    Aoa = 3,
    /// Yaw-plane angle of attack.
    Sideslip = 4,
    /// Angle of attack multiplied by pitch control, the dominant
    /// pitch-moment cross term.
    AoaPitchProduct = 5,
    /// Elevation of the nose above the horizon.
    HorizonAngle = 6,
    /// Elevation of the right wing above the horizon.
    Bank = 7,
    DynamicPressure = 8,
}

impl Channel {
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Rolling-window regression over the flight telemetry.
///
/// Single-writer discipline: the real-time loop is the only writer of the
/// history buffers and of the committed coefficients (commits happen when it
/// polls a finished solve); the worker only ever sees an immutable snapshot
/// taken at trigger time.
pub struct RegressionModel {
    window: usize,
    solve_memory: u32,
    importance: [[f64; CHANNEL_COUNT]; 3],

    telemetry: Vec<RingBuffer<f64>>,
    velocities: [RingBuffer<f64>; 3],
    derivatives: [RingBuffer<f64>; 3],
    /// First derivatives of the pitch/yaw flow angles, targets for the
    /// flow-kinematics rows of the state-space view.
    flow_rates: [RingBuffer<f64>; 2],

    /// Committed per-axis coefficients, in raw-channel units.
    coefficients: [[f64; CHANNEL_COUNT]; 3],
    /// Committed flow-kinematics rows `[angle, v, 1]` for pitch and yaw.
    flow_rows: [[f64; 3]; 2],
    /// Committed roll moment row `[v, u, 1]`.
    roll_row: [f64; 3],

    prediction_error: [f64; 3],
    solve_count: u32,
    cycle: usize,
    in_flight: Option<SolveHandle>,
    solves_started: u64,
    solves_committed: u64,
}

impl RegressionModel {
    pub fn new(config: &RegressionConfig) -> Self {
        let window = config.window;
        Self {
            window,
            solve_memory: config.solve_memory,
            importance: config.importance,
            telemetry: (0..CHANNEL_COUNT).map(|_| RingBuffer::new(window)).collect(),
            velocities: std::array::from_fn(|_| RingBuffer::new(window)),
            derivatives: std::array::from_fn(|_| RingBuffer::new(window)),
            flow_rates: std::array::from_fn(|_| RingBuffer::new(window)),
            coefficients: [[0.0; CHANNEL_COUNT]; 3],
            flow_rows: [[0.0; 3]; 2],
            roll_row: [0.0; 3],
            prediction_error: [0.0; 3],
            solve_count: 0,
            cycle: 0,
            in_flight: None,
            solves_started: 0,
            solves_committed: 0,
        }
    }

    /// Record one tick of telemetry and angular velocity.
    ///
    /// Derivative targets are appended only behind two stable timing cycles,
    /// matching the stencil depth they require.
    pub fn record(
        &mut self,
        sample: &[f64; CHANNEL_COUNT],
        angular_velocity: &[f64; 3],
        dt: f64,
        stable_steps: u32,
    ) {
        for (buf, &value) in self.telemetry.iter_mut().zip(sample.iter()) {
            buf.put(value);
        }
        for (buf, &v) in self.velocities.iter_mut().zip(angular_velocity.iter()) {
            buf.put(v);
        }

        if stable_steps < 2 {
            return;
        }
        for axis in 0..3 {
            if self.velocities[axis].len() >= 3 {
                let y0 = *self.velocities[axis].get_from_tail(2).unwrap_or(&0.0);
                let y1 = *self.velocities[axis].get_from_tail(1).unwrap_or(&0.0);
                let y2 = *self.velocities[axis].get_from_tail(0).unwrap_or(&0.0);
                self.derivatives[axis].put(one_sided_derivative(y0, y1, y2, dt));
            }
        }
        for (slot, channel) in [(0, Channel::Aoa), (1, Channel::Sideslip)] {
            let buf = &self.telemetry[channel.index()];
            if buf.len() >= 3 {
                let y0 = *buf.get_from_tail(2).unwrap_or(&0.0);
                let y1 = *buf.get_from_tail(1).unwrap_or(&0.0);
                let y2 = *buf.get_from_tail(0).unwrap_or(&0.0);
                self.flow_rates[slot].put(one_sided_derivative(y0, y1, y2, dt));
            }
        }
    }

    /// Update the per-axis prediction errors (diagnostics only).
    pub fn predict(&mut self, stable_steps: u32) {
        if stable_steps < 2 || self.telemetry[0].is_empty() {
            return;
        }
        for axis in 0..3 {
            let mut prediction = 0.0;
            for (j, buf) in self.telemetry.iter().enumerate() {
                prediction += self.coefficients[axis][j] * buf.last().copied().unwrap_or(0.0);
            }
            if let Some(&observed) = self.derivatives[axis].last() {
                self.prediction_error[axis] = prediction - observed;
            }
        }
    }

    /// Poll the background worker and, once per window of stable ticks,
    /// trigger a new solve.
    pub fn advance(&mut self, stable_steps: u32) {
        self.poll_completed();

        self.cycle = (self.cycle + 1) % self.window;
        if self.cycle != 0 || (stable_steps as usize) < self.window + 1 {
            return;
        }
        if self.in_flight.is_some() {
            debug!("regression solve still running, trigger dropped");
            return;
        }
        match self.prepare_job() {
            Some(job) => {
                self.in_flight = Some(SolveHandle::spawn(job));
                self.solves_started += 1;
            }
            None => debug!("regression window not yet filled, solve skipped"),
        }
    }

    /// Reset the blend weight and the trigger cycle (timing discontinuity or
    /// ground contact).
    pub fn reset_counters(&mut self) {
        self.solve_count = 0;
        self.cycle = 0;
    }

    /// Snapshot consistent design matrices and target vectors for the
    /// worker. Runs synchronously on the real-time thread.
    fn prepare_job(&self) -> Option<SolveJob> {
        let w = self.window;
        if self.telemetry[0].len() < w
            || self.derivatives.iter().any(|b| b.len() < w)
            || self.flow_rates.iter().any(|b| b.len() < w)
        {
            return None;
        }

        let mut axes: [Option<AxisJob>; 3] = [None, None, None];
        for (axis, slot) in axes.iter_mut().enumerate() {
            // Keep only channels with any importance-weighted signal in the
            // window; all-zero columns would make the normal matrix singular.
            let mask: Vec<usize> = (0..CHANNEL_COUNT)
                .filter(|&j| {
                    let weight = self.importance[axis][j];
                    weight != 0.0 && self.telemetry[j].iter().any(|&v| v * weight != 0.0)
                })
                .collect();
            if mask.is_empty() {
                continue;
            }
            let mut design = Matrix::zeros(w, mask.len());
            for (col, &j) in mask.iter().enumerate() {
                let weight = self.importance[axis][j];
                for (row, &value) in self.telemetry[j].iter().enumerate() {
                    design[(row, col)] = value * weight;
                }
            }
            let target = Matrix::column(&self.derivatives[axis].iter().copied().collect::<Vec<_>>());
            *slot = Some(AxisJob {
                design,
                target,
                mask,
            });
        }

        let flow = [
            Some(self.flow_job(Channel::Aoa, 0, 0)),
            Some(self.flow_job(Channel::Sideslip, 2, 1)),
        ];

        let mut roll_design = Matrix::zeros(w, 3);
        let roll_ctl = &self.telemetry[Channel::RollControl.index()];
        for (row, (&v, &u)) in self.velocities[1].iter().zip(roll_ctl.iter()).enumerate() {
            roll_design[(row, 0)] = v;
            roll_design[(row, 1)] = u;
            roll_design[(row, 2)] = 1.0;
        }
        let roll = Some(SmallJob {
            design: roll_design,
            target: Matrix::column(&self.derivatives[1].iter().copied().collect::<Vec<_>>()),
        });

        Some(SolveJob { axes, flow, roll })
    }

    /// Flow-kinematics job: angle derivative regressed on `[angle, v, 1]`.
    fn flow_job(&self, channel: Channel, velocity_axis: usize, slot: usize) -> SmallJob {
        let w = self.window;
        let mut design = Matrix::zeros(w, 3);
        let angles = &self.telemetry[channel.index()];
        for (row, (&angle, &v)) in angles.iter().zip(self.velocities[velocity_axis].iter()).enumerate()
        {
            design[(row, 0)] = angle;
            design[(row, 1)] = v;
            design[(row, 2)] = 1.0;
        }
        SmallJob {
            design,
            target: Matrix::column(&self.flow_rates[slot].iter().copied().collect::<Vec<_>>()),
        }
    }

    fn poll_completed(&mut self) {
        let result = match &self.in_flight {
            Some(handle) => handle.rx.try_recv(),
            None => return,
        };
        match result {
            Ok(outcome) => {
                self.in_flight = None;
                self.commit(outcome);
            }
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => {
                warn!("regression solve worker terminated without a result");
                self.in_flight = None;
            }
        }
    }

    /// Blend a freshly solved coefficient set into the committed model.
    fn commit(&mut self, outcome: SolveOutcome) {
        for axis in 0..3 {
            if let Some(solution) = &outcome.axes[axis] {
                for (slot, &j) in solution.mask.iter().enumerate() {
                    // Columns were importance-scaled; convert back to
                    // raw-channel units before blending.
                    let solved = solution.values[slot] * self.importance[axis][j];
                    if solved.is_finite() {
                        self.coefficients[axis][j] = self.blend(self.coefficients[axis][j], solved);
                    } else {
                        debug!("non-finite coefficient for axis {axis} channel {j}, retained previous");
                    }
                }
            }
        }
        for (slot, row) in outcome.flow.iter().enumerate() {
            if let Some(solved) = row {
                for (j, &value) in solved.iter().enumerate() {
                    if value.is_finite() {
                        self.flow_rows[slot][j] = self.blend(self.flow_rows[slot][j], value);
                    }
                }
            }
        }
        if let Some(solved) = &outcome.roll {
            for (j, &value) in solved.iter().enumerate() {
                if value.is_finite() {
                    self.roll_row[j] = self.blend(self.roll_row[j], value);
                }
            }
        }
        if outcome.full_success {
            self.solve_count = (self.solve_count + 1).min(self.solve_memory);
        }
        self.solves_committed += 1;
    }

    /// Exponential blend against the bounded solve count: adapts quickly at
    /// first, then settles into a capped-memory running average.
    fn blend(&self, previous: f64, solved: f64) -> f64 {
        let n = self.solve_count as f64;
        (solved + previous * n) / (n + 1.0)
    }

    /// Assemble the per-axis state-space view from the committed model,
    /// evaluated at the latest telemetry.
    pub fn rotation_model(&self, axis: Axis, response: f64) -> LinearSystemModel {
        let latest =
            |ch: Channel| self.telemetry[ch.index()].last().copied().unwrap_or(0.0);
        let mut model = LinearSystemModel::new(response);
        match axis {
            Axis::Pitch => {
                let k = &self.coefficients[0];
                let u = latest(Channel::PitchControl);
                let aoa = latest(Channel::Aoa);
                model.a[(0, 0)] = self.flow_rows[0][0];
                model.a[(0, 1)] = self.flow_rows[0][1];
                model.a[(0, 2)] = self.flow_rows[0][2];
                model.a[(1, 0)] =
                    k[Channel::Aoa.index()] + k[Channel::AoaPitchProduct.index()] * u;
                model.b[(1, 0)] =
                    k[Channel::PitchControl.index()] + k[Channel::AoaPitchProduct.index()] * aoa;
                model.c[(1, 0)] = self.residual_bias(
                    0,
                    &[Channel::PitchControl, Channel::Aoa, Channel::AoaPitchProduct],
                );
            }
            Axis::Yaw => {
                let k = &self.coefficients[2];
                model.a[(0, 0)] = self.flow_rows[1][0];
                model.a[(0, 1)] = self.flow_rows[1][1];
                model.a[(0, 2)] = self.flow_rows[1][2];
                model.a[(1, 0)] = k[Channel::Sideslip.index()];
                model.b[(1, 0)] = k[Channel::YawControl.index()];
                model.c[(1, 0)] =
                    self.residual_bias(2, &[Channel::YawControl, Channel::Sideslip]);
            }
            Axis::Roll => {
                model.a[(0, 0)] = self.roll_row[0];
                model.b[(0, 0)] = self.roll_row[1];
                model.a[(0, 1)] = self.roll_row[2];
            }
        }
        model
    }

    /// Committed-coefficient contribution of every channel not promoted into
    /// the state-space blocks, evaluated at the latest telemetry.
    fn residual_bias(&self, axis: usize, state_channels: &[Channel]) -> f64 {
        let mut bias = 0.0;
        for (j, buf) in self.telemetry.iter().enumerate() {
            if state_channels.iter().any(|ch| ch.index() == j) {
                continue;
            }
            bias += self.coefficients[axis][j] * buf.last().copied().unwrap_or(0.0);
        }
        bias
    }

    /// Committed coefficients for an axis, raw-channel units.
    pub fn coefficients(&self, axis: Axis) -> &[f64; CHANNEL_COUNT] {
        &self.coefficients[axis.index()]
    }

    /// Last prediction errors per axis (prediction minus observed).
    pub fn prediction_errors(&self) -> &[f64; 3] {
        &self.prediction_error
    }

    /// Current blend weight (bounded solve count).
    pub fn solve_count(&self) -> u32 {
        self.solve_count
    }

    /// True while a background solve is running.
    pub fn solve_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Number of background solves started.
    pub fn solves_started(&self) -> u64 {
        self.solves_started
    }

    /// Number of background solves whose results were committed (including
    /// partially failed ones that changed nothing).
    pub fn solves_committed(&self) -> u64 {
        self.solves_committed
    }
}

// ---------------------------------------------------------------------------
// Background solve
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct AxisJob {
    design: Matrix,
    target: Matrix,
    mask: Vec<usize>,
}

#[derive(Debug)]
struct SmallJob {
    design: Matrix,
    target: Matrix,
}

impl SmallJob {
    fn solve(&self) -> Result<[f64; 3], MatrixError> {
        let m = least_squares(&self.design, &self.target)?;
        Ok([m[(0, 0)], m[(1, 0)], m[(2, 0)]])
    }
}

/// Immutable snapshot handed to the worker thread.
#[derive(Debug)]
struct SolveJob {
    axes: [Option<AxisJob>; 3],
    flow: [Option<SmallJob>; 2],
    roll: Option<SmallJob>,
}

#[derive(Debug)]
struct AxisSolution {
    mask: Vec<usize>,
    values: Vec<f64>,
}

#[derive(Debug)]
struct SolveOutcome {
    axes: [Option<AxisSolution>; 3],
    flow: [Option<[f64; 3]>; 2],
    roll: Option<[f64; 3]>,
    /// True when every requested solve succeeded.
    full_success: bool,
}

impl SolveJob {
    /// Run every requested least-squares fit. Failures are logged and
    /// reported as absent results; nothing here can reach the control loop
    /// as an error.
    fn run(self) -> SolveOutcome {
        let mut full_success = true;

        let mut axes: [Option<AxisSolution>; 3] = [None, None, None];
        for (axis, job) in self.axes.into_iter().enumerate() {
            let Some(job) = job else { continue };
            match least_squares(&job.design, &job.target) {
                Ok(m) => {
                    axes[axis] = Some(AxisSolution {
                        values: (0..m.rows()).map(|i| m[(i, 0)]).collect(),
                        mask: job.mask,
                    });
                }
                Err(e) => {
                    debug!("regression solve for axis {axis} failed: {e}");
                    full_success = false;
                }
            }
        }

        let mut flow: [Option<[f64; 3]>; 2] = [None, None];
        for (slot, job) in self.flow.into_iter().enumerate() {
            let Some(job) = job else { continue };
            match job.solve() {
                Ok(row) => flow[slot] = Some(row),
                Err(e) => {
                    debug!("flow-kinematics solve {slot} failed: {e}");
                    full_success = false;
                }
            }
        }

        let roll = match self.roll {
            Some(job) => match job.solve() {
                Ok(row) => Some(row),
                Err(e) => {
                    debug!("roll moment solve failed: {e}");
                    full_success = false;
                    None
                }
            },
            None => None,
        };

        SolveOutcome {
            axes,
            flow,
            roll,
            full_success,
        }
    }
}

/// Completion handle for an in-flight solve; polled, never joined.
struct SolveHandle {
    rx: Receiver<SolveOutcome>,
}

impl SolveHandle {
    fn spawn(job: SolveJob) -> Self {
        let (tx, rx) = bounded(1);
        let spawned = std::thread::Builder::new()
            .name("regression-solve".into())
            .spawn(move || {
                let _ = tx.send(job.run());
            });
        if let Err(e) = spawned {
            // The closure (and sender) is dropped; the poll path sees a
            // disconnect and treats it as a failed solve.
            warn!("failed to spawn regression solve worker: {e}");
        }
        Self { rx }
    }
}
