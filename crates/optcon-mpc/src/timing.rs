//! Time keeping for the receding-horizon loop
//!
//! Tracks when the last re-plan started, how long solves take, the delay
//! to compensate for and how many steps the next horizon should have.

use std::time::Duration;

use log::debug;

use crate::config::{DelayConfig, HorizonMode, MpcConfig, TimingConfig};

/// Horizons shorter than this fraction of a step count as finished
const FINAL_TIME_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone)]
pub struct TimeKeeper {
    timing: TimingConfig,
    delay: DelayConfig,
    mode: HorizonMode,
    horizon_steps: usize,
    min_horizon_steps: usize,
    replan_period: f64,
    dt: f64,
    measured_delay: Option<Duration>,
    last_replan: Option<f64>,
}

impl TimeKeeper {
    pub fn new(config: &MpcConfig, dt: f64) -> Self {
        Self {
            timing: config.timing.clone(),
            delay: config.delay.clone(),
            mode: config.mode,
            horizon_steps: config.horizon_steps,
            min_horizon_steps: config.min_horizon_steps,
            replan_period: config.replan_period,
            dt,
            measured_delay: None,
            last_replan: None,
        }
    }

    pub fn timing(&self) -> &TimingConfig {
        &self.timing
    }

    pub fn budget(&self) -> Duration {
        self.timing.budget()
    }

    /// Record the wall-clock duration of a finished solve
    pub fn record_solve(&mut self, elapsed: Duration) {
        self.measured_delay = Some(elapsed);
    }

    pub fn measured_delay(&self) -> Option<Duration> {
        self.measured_delay
    }

    /// Delay between a measurement and the start of the policy computed from it [s]
    ///
    /// `fixed_delay + delay_multiplier · measured_delay`
    pub fn expected_delay(&self) -> f64 {
        let measured = if self.delay.measure_delay {
            self.measured_delay.map_or(0.0, |d| d.as_secs_f64())
        } else {
            0.0
        };
        self.delay.fixed_delay + self.delay.delay_multiplier * measured
    }

    /// Whether the next solve should start from a forward-integrated state
    pub fn compensates_delay(&self) -> bool {
        self.delay.forward_integration && self.expected_delay() > 0.0
    }

    pub fn is_overrun(&self, elapsed: Duration) -> bool {
        elapsed > self.budget()
    }

    /// Whether a re-plan is due at time `t`
    pub fn replan_due(&self, t: f64) -> bool {
        match self.last_replan {
            None => true,
            Some(last) => t - last >= self.replan_period - 1e-9,
        }
    }

    pub fn mark_replan(&mut self, t: f64) {
        self.last_replan = Some(t);
    }

    pub fn reset(&mut self) {
        self.measured_delay = None;
        self.last_replan = None;
    }

    /// Number of steps for a solve starting at `t`
    ///
    /// `None` once the final time of a fixed-final-time problem has passed.
    pub fn horizon_steps(&self, t: f64) -> Option<usize> {
        match self.mode {
            HorizonMode::ConstantReceding => Some(self.horizon_steps),
            HorizonMode::FixedFinalTime { final_time } => {
                let remaining = final_time - t;
                if remaining <= FINAL_TIME_TOLERANCE * self.dt {
                    return None;
                }
                let steps = (remaining / self.dt - FINAL_TIME_TOLERANCE).ceil() as usize;
                let steps = steps.clamp(self.min_horizon_steps, self.horizon_steps);
                debug!("fixed final time {final_time}: {remaining:.3} s left, {steps} steps");
                Some(steps)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn config() -> MpcConfig {
        MpcConfig {
            horizon_steps: 20,
            min_horizon_steps: 5,
            replan_period: 0.1,
            ..Default::default()
        }
    }

    #[test]
    fn test_constant_horizon() {
        let keeper = TimeKeeper::new(&config(), 0.1);
        assert_eq!(keeper.horizon_steps(0.0), Some(20));
        assert_eq!(keeper.horizon_steps(1e6), Some(20));
    }

    #[test]
    fn test_fixed_final_time_shrinks() {
        let mut cfg = config();
        cfg.mode = HorizonMode::FixedFinalTime { final_time: 1.5 };
        let keeper = TimeKeeper::new(&cfg, 0.1);

        assert_eq!(keeper.horizon_steps(0.0), Some(15));
        assert_eq!(keeper.horizon_steps(0.5), Some(10));
        assert_eq!(keeper.horizon_steps(0.95), Some(6));
        // Floored at the minimum horizon
        assert_eq!(keeper.horizon_steps(1.3), Some(5));
        assert_eq!(keeper.horizon_steps(1.5), None);
        assert_eq!(keeper.horizon_steps(2.0), None);

        cfg.mode = HorizonMode::FixedFinalTime { final_time: 10.0 };
        let keeper = TimeKeeper::new(&cfg, 0.1);
        assert_eq!(keeper.horizon_steps(0.0), Some(20));
    }

    #[test]
    fn test_expected_delay() {
        let mut cfg = config();
        cfg.delay = DelayConfig {
            forward_integration: true,
            measure_delay: true,
            fixed_delay: 0.01,
            delay_multiplier: 2.0,
        };
        let mut keeper = TimeKeeper::new(&cfg, 0.1);
        assert_relative_eq!(keeper.expected_delay(), 0.01);
        assert!(keeper.compensates_delay());

        keeper.record_solve(Duration::from_millis(20));
        assert_relative_eq!(keeper.expected_delay(), 0.05, epsilon = 1e-12);

        cfg.delay.measure_delay = false;
        let mut keeper = TimeKeeper::new(&cfg, 0.1);
        keeper.record_solve(Duration::from_millis(20));
        assert_relative_eq!(keeper.expected_delay(), 0.01);
    }

    #[test]
    fn test_replan_schedule() {
        let mut keeper = TimeKeeper::new(&config(), 0.1);
        assert!(keeper.replan_due(0.0));
        keeper.mark_replan(0.0);
        assert!(!keeper.replan_due(0.05));
        assert!(keeper.replan_due(0.1));
    }

    #[test]
    fn test_overrun_detection() {
        let keeper = TimeKeeper::new(&config(), 0.1);
        assert!(!keeper.is_overrun(Duration::from_millis(50)));
        assert!(keeper.is_overrun(Duration::from_millis(150)));
    }
}
