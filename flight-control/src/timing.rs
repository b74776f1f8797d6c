//! Step-timing stability gate.
//!
//! Finite-difference estimators are only meaningful over runs of uniformly
//! spaced samples. The gate counts consecutive ticks whose duration stayed
//! within 10% of the previous one; estimators that need k consistent
//! derivative orders activate once the streak reaches the required depth.
//! Ground contact or a timing jump re-arms everything from zero.

/// Relative step-duration deviation tolerated before the streak resets.
const STABLE_DT_TOLERANCE: f64 = 0.1;

/// Upper bound on the streak counter; beyond this the exact count carries no
/// information.
const STREAK_CAP: u32 = 1000;

/// Counter of consecutive stable-duration physics steps.
#[derive(Debug, Clone)]
pub struct TimingGate {
    stable_steps: u32,
    prev_dt: f64,
}

impl Default for TimingGate {
    fn default() -> Self {
        Self::new()
    }
}

impl TimingGate {
    pub fn new() -> Self {
        Self {
            stable_steps: 0,
            prev_dt: 1.0,
        }
    }

    /// Record a tick duration and return the updated streak length.
    ///
    /// The first observed tick never extends the streak because there is no
    /// previous duration to compare against.
    pub fn observe(&mut self, dt: f64) -> u32 {
        if (dt / self.prev_dt - 1.0).abs() < STABLE_DT_TOLERANCE {
            self.stable_steps = (self.stable_steps + 1).min(STREAK_CAP);
        } else {
            self.stable_steps = 0;
        }
        self.prev_dt = dt;
        self.stable_steps
    }

    /// Length of the current stable streak.
    pub fn stable_steps(&self) -> u32 {
        self.stable_steps
    }

    /// Force the streak back to zero (timing jump, ground contact).
    pub fn reset(&mut self) {
        self.stable_steps = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_streak_grows_on_uniform_steps() {
        let mut gate = TimingGate::new();
        assert_eq!(gate.observe(0.02), 0); // first step differs from the 1.0 seed
        assert_eq!(gate.observe(0.02), 1);
        assert_eq!(gate.observe(0.02), 2);
        assert_eq!(gate.observe(0.0201), 3); // within 10%
    }

    #[test]
    fn test_jump_resets_streak() {
        let mut gate = TimingGate::new();
        for _ in 0..5 {
            gate.observe(0.02);
        }
        assert_eq!(gate.stable_steps(), 4);
        assert_eq!(gate.observe(0.04), 0);
        assert_eq!(gate.observe(0.04), 1);
    }

    #[test]
    fn test_reset() {
        let mut gate = TimingGate::new();
        gate.observe(0.02);
        gate.observe(0.02);
        gate.reset();
        assert_eq!(gate.stable_steps(), 0);
        // Streak resumes against the last observed duration.
        assert_eq!(gate.observe(0.02), 1);
    }

    #[test]
    fn test_streak_is_capped() {
        let mut gate = TimingGate::new();
        for _ in 0..2000 {
            gate.observe(0.02);
        }
        assert_eq!(gate.stable_steps(), 1000);
    }
}
