//! Positional PID control law with anti-windup and output clamping.
//!
//! The law carries no explicit time-delta: it is tuned for a fixed sampling
//! period (the 500 ms control tick), so the integral accumulates raw error and
//! the derivative is a plain difference of consecutive errors. Changing the
//! control tick rate requires re-tuning the gains.

/// PID controller state. Mutated only by [`Pid::compute`] and [`Pid::reset`].
#[derive(Debug, Clone)]
pub struct Pid {
    kp: f64,
    ki: f64,
    kd: f64,

    setpoint: f64,

    integral: f64,
    prev_error: f64,

    output_min: f64,
    output_max: f64,
    integral_max: f64,
}

impl Pid {
    pub fn new(kp: f64, ki: f64, kd: f64) -> Self {
        Self {
            kp,
            ki,
            kd,
            setpoint: 0.0,
            integral: 0.0,
            prev_error: 0.0,
            output_min: 0.0,
            output_max: 100.0,
            integral_max: 50.0,
        }
    }

    /// Target value the measured quantity is driven toward. Takes effect on
    /// the next [`Pid::compute`].
    pub fn set_setpoint(&mut self, setpoint: f64) {
        self.setpoint = setpoint;
    }

    pub fn set_output_limits(&mut self, min: f64, max: f64) {
        self.output_min = min;
        self.output_max = max;
    }

    pub fn set_integral_limit(&mut self, max: f64) {
        self.integral_max = max;
    }

    /// Run one control step against the current measurement and return the
    /// output, clamped to the configured range.
    pub fn compute(&mut self, current: f64) -> f64 {
        let error = self.setpoint - current;

        let p_term = self.kp * error;

        // Accumulate, then clamp: the clamp is the only bound on the
        // integral, it never decays on its own.
        self.integral += error;
        self.integral = self.integral.clamp(-self.integral_max, self.integral_max);
        let i_term = self.ki * self.integral;

        let d_term = self.kd * (error - self.prev_error);
        self.prev_error = error;

        (p_term + i_term + d_term).clamp(self.output_min, self.output_max)
    }

    /// Zero the integral and previous error. Gains, setpoint and limits are
    /// untouched. Called whenever heating is deasserted so a stale integral
    /// cannot cause an overshoot on the next activation.
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.prev_error = 0.0;
    }

    pub fn setpoint(&self) -> f64 {
        self.setpoint
    }

    pub fn integral(&self) -> f64 {
        self.integral
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid() -> Pid {
        let mut pid = Pid::new(2.0, 0.1, 0.5);
        pid.set_output_limits(0.0, 100.0);
        pid.set_integral_limit(50.0);
        pid
    }

    #[test]
    fn test_integral_stays_clamped() {
        let mut pid = pid();
        pid.set_setpoint(55.0);

        // Large persistent error in both directions; the accumulator must
        // stay inside the clamp after every single step.
        for _ in 0..1000 {
            pid.compute(20.0);
            assert!(pid.integral().abs() <= 50.0);
        }
        for _ in 0..1000 {
            pid.compute(200.0);
            assert!(pid.integral().abs() <= 50.0);
        }
    }

    #[test]
    fn test_output_stays_clamped() {
        let mut pid = pid();
        pid.set_setpoint(90.0);

        let inputs = [-500.0, -50.0, 0.0, 25.0, 90.0, 150.0, 1000.0];
        for current in inputs {
            for _ in 0..100 {
                let out = pid.compute(current);
                assert!((0.0..=100.0).contains(&out), "output {out} out of range");
            }
        }
    }

    #[test]
    fn test_integral_does_not_decay_at_zero_error() {
        let mut pid = pid();
        pid.set_setpoint(55.0);

        // Wind up a nonzero integral.
        for _ in 0..20 {
            pid.compute(40.0);
        }
        let wound = pid.integral();
        assert!(wound > 0.0);

        // Hold the measurement exactly at setpoint: error is zero, so the
        // accumulator must stay put (clamping is the only bound, no decay).
        for _ in 0..100 {
            pid.compute(55.0);
            assert_eq!(pid.integral(), wound);
        }
    }

    #[test]
    fn test_proportional_response() {
        let mut pid = Pid::new(2.0, 0.0, 0.0);
        pid.set_setpoint(55.0);
        // Pure P: error 10 at kp=2 gives 20%.
        assert_eq!(pid.compute(45.0), 20.0);
    }

    #[test]
    fn test_derivative_opposes_fast_approach() {
        let mut slow = Pid::new(2.0, 0.0, 0.5);
        let mut fast = Pid::new(2.0, 0.0, 0.5);
        slow.set_setpoint(55.0);
        fast.set_setpoint(55.0);

        slow.compute(40.0);
        fast.compute(30.0);

        // Both end up at the same error, but the fast riser saw a larger
        // error drop, so its derivative term cuts the output harder.
        let out_slow = slow.compute(50.0);
        let out_fast = fast.compute(50.0);
        assert!(out_fast < out_slow);
    }

    #[test]
    fn test_reset_clears_accumulated_state_only() {
        let mut pid = pid();
        pid.set_setpoint(70.0);
        for _ in 0..10 {
            pid.compute(30.0);
        }
        assert!(pid.integral() > 0.0);

        pid.reset();
        assert_eq!(pid.integral(), 0.0);
        assert_eq!(pid.setpoint(), 70.0);

        // First post-reset step behaves like a never-used controller.
        let mut fresh = super::Pid::new(2.0, 0.1, 0.5);
        fresh.set_output_limits(0.0, 100.0);
        fresh.set_integral_limit(50.0);
        fresh.set_setpoint(70.0);
        assert_eq!(pid.compute(30.0), fresh.compute(30.0));
    }
}
