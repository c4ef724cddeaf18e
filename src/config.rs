//! Run configuration for the instrument.
//!
//! All tunable parameters for a processing run. Values are loaded from a
//! configuration file on removable storage at every Standby entry; when the
//! file is missing or unreadable the variant defaults below apply.

use serde::{Deserialize, Serialize};

/// Which heater hardware this unit carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HardwareVariant {
    /// Four independently controlled heater zones (valve + three
    /// amplification zones), one PID bank per phase.
    MultiZone,
    /// One heater plus a mixing motor, with per-phase heater and motor
    /// loops and a ramp-to-setpoint gate.
    SingleHeater,
}

/// Gains and limits for one PID loop.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PidGains {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
    /// Target value (degrees C for heater loops, RPM for motor loops).
    pub setpoint: f32,
    /// Upper output clamp (PWM duty counts). The lower clamp is always 0.
    pub max_output: f32,
}

/// Per-phase gain banks for the four-zone variant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MultiZoneConfig {
    /// Zone order: valve, amp0, amp1, amp2.
    pub phase1: [PidGains; 4],
    pub phase2: [PidGains; 4],
    /// Per-zone alarm temperature (degrees C).
    pub max_temp_c: [f32; 4],
}

/// Heater + motor loops for the single-heater variant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SingleHeaterConfig {
    /// Heater loop per phase.
    pub heater: [PidGains; 2],
    /// Motor speed loop per phase.
    pub motor: [PidGains; 2],
    /// Whether the heater runs during each phase.
    pub run_heater: [bool; 2],
    /// Whether the motor runs during each phase.
    pub run_motor: [bool; 2],
    /// Heater alarm temperature (degrees C).
    pub max_temp_c: f32,
}

/// Cycle timing and power thresholds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CycleConfig {
    /// Phase hold durations (seconds).
    pub phase1_duration_s: u32,
    pub phase2_duration_s: u32,
    /// Ramp-to-temperature abort window per phase (seconds).
    pub ramp_timeout_s: u32,
    /// Wait between the end of phase 2 and the sample-valid window.
    pub complete_delay_s: u32,
    /// How long a finished sample may stay in the instrument before it
    /// is declared invalid (seconds).
    pub valid_hold_timeout_s: u32,
    /// Whether each phase waits for the heater to reach its setpoint
    /// before the hold timer starts.
    pub ramp_phase1: bool,
    pub ramp_phase2: bool,
    /// Battery percentage below which a run is refused.
    pub low_power_percent: u8,
    /// Battery percentage below which a run is refused after a charge
    /// cycle (kept above `low_power_percent` so the instrument does not
    /// immediately re-refuse on a marginal pack).
    pub recovery_percent: u8,
}

/// One-shot request to set the real-time clock at the next Standby entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ClockSetRequest {
    pub unix_seconds: u64,
}

/// Complete run configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub variant: HardwareVariant,
    pub cycle: CycleConfig,
    pub multi: MultiZoneConfig,
    pub single: SingleHeaterConfig,

    // --- Pre-run interlock ---
    /// Refuse to start a run while any zone is above this temperature.
    pub min_run_zone_temp_c: f32,
    /// Whether the pre-run temperature check is performed at all.
    pub min_run_zone_check: bool,

    // --- Supervisor ---
    /// How long the Alert state is held before auto-clearing (seconds).
    pub alert_timeout_s: u32,

    // --- Sampling / logging ---
    /// Temperature sample period (milliseconds).
    pub sensor_sample_ms: u32,
    /// Run-log record period (milliseconds).
    pub log_period_ms: u32,

    /// Pending clock-set request, cleared once applied.
    pub set_clock: Option<ClockSetRequest>,
}

/// Hardware shutoff ceiling for the four-zone variant (degrees C).
pub const MULTI_ZONE_HW_MAX_C: f32 = 110.0;
/// Hardware shutoff ceiling for the single-heater variant (degrees C).
pub const SINGLE_HEATER_HW_MAX_C: f32 = 120.0;

impl RunConfig {
    /// Defaults for the four-zone unit.
    pub fn multi_zone_defaults() -> Self {
        let valve = PidGains {
            kp: 12.0,
            ki: 0.4,
            kd: 2.0,
            setpoint: 95.0,
            max_output: 70.0,
        };
        let amp = PidGains {
            kp: 10.0,
            ki: 0.5,
            kd: 1.5,
            setpoint: 65.0,
            max_output: 70.0,
        };
        let idle = PidGains {
            kp: 0.0,
            ki: 0.0,
            kd: 0.0,
            setpoint: 0.0,
            max_output: 0.0,
        };
        Self {
            variant: HardwareVariant::MultiZone,
            cycle: CycleConfig {
                phase1_duration_s: 1200,
                phase2_duration_s: 1800,
                ramp_timeout_s: 600,
                complete_delay_s: 10,
                valid_hold_timeout_s: 3600,
                ramp_phase1: false,
                ramp_phase2: false,
                low_power_percent: 20,
                recovery_percent: 40,
            },
            multi: MultiZoneConfig {
                // Phase 1 drives the valve heater; amp zones idle.
                phase1: [valve, idle, idle, idle],
                // Phase 2 drives the amplification zones.
                phase2: [idle, amp, amp, amp],
                max_temp_c: [105.0, 75.0, 75.0, 75.0],
            },
            single: SingleHeaterConfig::disabled(),
            min_run_zone_temp_c: 45.0,
            min_run_zone_check: true,
            alert_timeout_s: 10,
            sensor_sample_ms: 250,
            log_period_ms: 1000,
            set_clock: None,
        }
    }

    /// Defaults for the single-heater + motor unit.
    pub fn single_heater_defaults() -> Self {
        let heater = PidGains {
            kp: 15.0,
            ki: 0.6,
            kd: 2.5,
            setpoint: 95.0,
            max_output: 70.0,
        };
        let motor = PidGains {
            kp: 0.05,
            ki: 0.01,
            kd: 0.0,
            setpoint: 3900.0,
            max_output: 150.0,
        };
        Self {
            variant: HardwareVariant::SingleHeater,
            cycle: CycleConfig {
                phase1_duration_s: 600,
                phase2_duration_s: 2400,
                ramp_timeout_s: 600,
                complete_delay_s: 10,
                valid_hold_timeout_s: 3600,
                ramp_phase1: true,
                ramp_phase2: true,
                low_power_percent: 20,
                recovery_percent: 20,
            },
            multi: MultiZoneConfig {
                phase1: [PidGains {
                    kp: 0.0,
                    ki: 0.0,
                    kd: 0.0,
                    setpoint: 0.0,
                    max_output: 0.0,
                }; 4],
                phase2: [PidGains {
                    kp: 0.0,
                    ki: 0.0,
                    kd: 0.0,
                    setpoint: 0.0,
                    max_output: 0.0,
                }; 4],
                max_temp_c: [MULTI_ZONE_HW_MAX_C; 4],
            },
            single: SingleHeaterConfig {
                heater: [heater, heater],
                motor: [motor, motor],
                run_heater: [true, true],
                run_motor: [true, false],
                max_temp_c: 105.0,
            },
            min_run_zone_temp_c: 45.0,
            min_run_zone_check: true,
            alert_timeout_s: 3,
            sensor_sample_ms: 250,
            log_period_ms: 1000,
            set_clock: None,
        }
    }

    /// Whether the heater actually runs during the given phase (0 or 1).
    /// The four-zone variant always heats; the single-heater variant can
    /// disable the heater per phase.
    pub fn phase_heater_enabled(&self, phase: usize) -> bool {
        match self.variant {
            HardwareVariant::MultiZone => true,
            HardwareVariant::SingleHeater => self.single.run_heater[phase],
        }
    }

    /// Heater setpoint for the given phase on the single-heater variant.
    pub fn single_heater_setpoint(&self, phase: usize) -> f32 {
        self.single.heater[phase].setpoint
    }
}

impl SingleHeaterConfig {
    fn disabled() -> Self {
        let off = PidGains {
            kp: 0.0,
            ki: 0.0,
            kd: 0.0,
            setpoint: 0.0,
            max_output: 0.0,
        };
        Self {
            heater: [off; 2],
            motor: [off; 2],
            run_heater: [false; 2],
            run_motor: [false; 2],
            max_temp_c: SINGLE_HEATER_HW_MAX_C,
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self::multi_zone_defaults()
    }
}
