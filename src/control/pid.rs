//! PID controller for the heater and motor loops.
//!
//! The integral gain is applied inside the accumulator and the accumulator
//! itself is clamped to the output range, so windup can never push the
//! stored state past what the output could ever use. The derivative term
//! acts on the measurement, not the error, so a setpoint step does not
//! kick the output.

use crate::config::PidGains;

/// Lower output clamp shared by every loop. Heaters and motors cannot be
/// driven negative.
pub const OUTPUT_FLOOR: f32 = 0.0;

/// One PID loop.
#[derive(Debug, Clone, Copy)]
pub struct Pid {
    kp: f32,
    ki: f32,
    kd: f32,
    setpoint: f32,
    integrator: f32,
    prev_measurement: f32,
    output: f32,
    out_max: f32,
}

impl Pid {
    /// Build a loop with zeroed state.
    pub fn new(gains: &PidGains) -> Self {
        Self {
            kp: gains.kp,
            ki: gains.ki,
            kd: gains.kd,
            setpoint: gains.setpoint,
            integrator: 0.0,
            prev_measurement: 0.0,
            output: 0.0,
            out_max: gains.max_output,
        }
    }

    /// Zero the accumulated state, keeping gains and setpoint.
    pub fn reset(&mut self) {
        self.integrator = 0.0;
        self.prev_measurement = 0.0;
        self.output = 0.0;
    }

    pub fn setpoint(&self) -> f32 {
        self.setpoint
    }

    pub fn output(&self) -> f32 {
        self.output
    }

    /// Advance the loop by one sample and return the new output.
    pub fn compute(&mut self, measurement: f32) -> f32 {
        let error = self.setpoint - measurement;

        self.integrator = (self.integrator + self.ki * error).clamp(OUTPUT_FLOOR, self.out_max);

        // Derivative on measurement.
        let delta = measurement - self.prev_measurement;

        self.output =
            (self.kp * error + self.integrator - self.kd * delta).clamp(OUTPUT_FLOOR, self.out_max);
        self.prev_measurement = measurement;
        self.output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gains(kp: f32, ki: f32, kd: f32, setpoint: f32, max: f32) -> PidGains {
        PidGains {
            kp,
            ki,
            kd,
            setpoint,
            max_output: max,
        }
    }

    #[test]
    fn new_loop_starts_zeroed() {
        let pid = Pid::new(&gains(10.0, 0.5, 1.0, 95.0, 70.0));
        assert_eq!(pid.output(), 0.0);
    }

    #[test]
    fn output_stays_within_limits() {
        let mut pid = Pid::new(&gains(10.0, 0.5, 1.0, 95.0, 70.0));
        // Far below setpoint: output saturates at the max, never beyond.
        for _ in 0..100 {
            let out = pid.compute(20.0);
            assert!(out >= OUTPUT_FLOOR && out <= 70.0);
        }
        assert_eq!(pid.output(), 70.0);
        // Far above setpoint: clamped at the floor.
        for _ in 0..100 {
            let out = pid.compute(150.0);
            assert!(out >= OUTPUT_FLOOR && out <= 70.0);
        }
        assert_eq!(pid.output(), 0.0);
    }

    #[test]
    fn integrator_clamp_prevents_windup() {
        let mut pid = Pid::new(&gains(0.0, 10.0, 0.0, 95.0, 70.0));
        for _ in 0..1000 {
            pid.compute(0.0);
        }
        // After long saturation, a measurement at setpoint must not leave
        // the output pinned by a runaway integrator for long.
        assert_eq!(pid.compute(95.0), 70.0);
        for _ in 0..200 {
            pid.compute(102.0);
        }
        assert_eq!(pid.output(), 0.0);
    }

    #[test]
    fn setpoint_step_does_not_kick_derivative() {
        let mut a = Pid::new(&gains(0.0, 0.0, 50.0, 50.0, 70.0));
        let mut b = Pid::new(&gains(0.0, 0.0, 50.0, 90.0, 70.0));
        a.compute(40.0);
        b.compute(40.0);
        // Same measurement history, wildly different setpoints: the
        // derivative contribution must be identical.
        assert_eq!(a.compute(41.0), b.compute(41.0));
    }

    #[test]
    fn reset_zeroes_state() {
        let mut pid = Pid::new(&gains(10.0, 0.5, 1.0, 95.0, 70.0));
        for _ in 0..50 {
            pid.compute(20.0);
        }
        pid.reset();
        assert_eq!(pid.output(), 0.0);
        let first = pid.compute(20.0);
        let fresh = Pid::new(&gains(10.0, 0.5, 1.0, 95.0, 70.0)).compute(20.0);
        assert_eq!(first, fresh);
    }
}
