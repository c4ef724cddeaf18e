//! Channel payload types exchanged between the workers.
//!
//! Everything here is small and `Copy` (except `HeaterMsg`, which can carry
//! a fresh configuration) so messages move through the bounded channels
//! without allocation.

use crate::config::RunConfig;

/// One reading of the sample-door interlock switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SwitchSample {
    /// Mechanical hall switch under the sample carrier.
    pub hall_engaged: bool,
    /// Optical presence sensor (fitted on four-zone units only).
    pub optical_engaged: bool,
}

/// Debounced front-button event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonEvent {
    /// Short press ("on" gesture).
    On,
    /// Long press ("off" gesture).
    Off,
    /// Service gesture requesting the bootloader.
    Bootloader,
}

/// Which cycle phase a heater command targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseZone {
    Phase1,
    Phase2,
}

impl PhaseZone {
    /// Index into per-phase configuration arrays.
    pub const fn index(self) -> usize {
        match self {
            Self::Phase1 => 0,
            Self::Phase2 => 1,
        }
    }
}

/// One temperature sample covering every zone.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TempSample {
    /// Zone order: valve, amp0, amp1, amp2. The single-heater variant
    /// reports its heater temperature in slot 0.
    pub zones_c: [f32; 4],
    /// Set when the sensor read itself failed; the values are garbage.
    pub read_failed: bool,
}

/// One motor speed sample (single-heater variant).
#[derive(Debug, Clone, Copy, Default)]
pub struct MotorSample {
    pub speed_rpm: f32,
}

/// PWM duty outputs for every actuator.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DutyVector {
    /// Zone order matches [`TempSample::zones_c`].
    pub zones: [f32; 4],
    pub motor: f32,
}

/// Command to the PWM output stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DutyCommand {
    /// Power up the output stage.
    Enable,
    /// Power down the output stage; all outputs forced to zero.
    Disable,
    /// New duty values.
    Update(DutyVector),
}

/// Everything the heater worker can be told.
#[derive(Debug, Clone)]
pub enum HeaterMsg {
    /// Enable or disable a phase's control loops. Answered with exactly
    /// one confirmation on the run-confirm lane.
    ZoneState { zone: PhaseZone, enable: bool },
    /// Periodic temperature sample from the sensor worker.
    Temperature(TempSample),
    /// Periodic motor speed sample from the sensor worker.
    Motor(MotorSample),
    /// Ask whether any loop is active; answered on the run-confirm lane.
    QueryRunning,
    /// Fresh configuration loaded at Standby entry.
    ConfigUpdated(RunConfig),
    /// Stop heating and ignore samples until `Wake`.
    Sleep,
    Wake,
}

/// Workers whose liveness the watchdog can track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerId {
    Main,
    Heater,
    Battery,
    Sensor,
    Button,
    Usb,
    Logger,
}

/// Liveness report from a worker to the watchdog.
#[derive(Debug, Clone, Copy)]
pub struct WatchdogReport {
    pub worker: WorkerId,
    /// `false` parks the worker's counter (expected-idle, not a fault).
    pub alive: bool,
}

/// Front-panel LED patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedPattern {
    Standby,
    Run,
    Complete,
    Wakeup,
    Abort,
    Decline,
    UsbStarting,
    ClearAll,
}

/// Turn a pattern on or off.
#[derive(Debug, Clone, Copy)]
pub struct LedCommand {
    pub pattern: LedPattern,
    pub active: bool,
}

/// USB composite-device configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsbMode {
    Disabled,
    SerialOnly,
    MassStorage,
    MassStorageSerial,
}

/// Power-state control sent to the peripheral workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerCtl {
    Sleep,
    Wake,
    /// Configuration was reloaded; pick up new sample rates.
    ConfigUpdated,
}

/// What woke the instrument out of Sleep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeSource {
    Button,
    Usb,
}

/// Events consumed by the run logger.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LogEvent {
    RunStarted { battery_percent: u8 },
    RunComplete,
    RunInterrupted,
    Phase1HeatingStarted,
    Phase1HeatingStopped,
    Phase2HeatingStarted,
    Phase2HeatingStopped,
    RampComplete,
    RampTimeout,
    OverTemperature,
    PowerLow { battery_percent: u8 },
    RecoveryPowerLow { battery_percent: u8 },
    TempsNotStable,
    SampleInvalidated,
    BatteryLevel { percent: u8 },
    /// Periodic run record: zone temperatures, duties and motor speed.
    Sample {
        temps: TempSample,
        duties: DutyVector,
        motor_rpm: f32,
    },
}

impl LogEvent {
    /// Short event text written to the run log. `Sample` and
    /// `BatteryLevel` records are formatted field-wise instead.
    pub fn text(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "run started",
            Self::RunComplete => "run complete",
            Self::RunInterrupted => "run interrupted",
            Self::Phase1HeatingStarted => "phase 1 heating started",
            Self::Phase1HeatingStopped => "phase 1 heating stopped",
            Self::Phase2HeatingStarted => "phase 2 heating started",
            Self::Phase2HeatingStopped => "phase 2 heating stopped",
            Self::RampComplete => "ramp to temperature complete",
            Self::RampTimeout => "ramp to temperature timed out",
            Self::OverTemperature => "over temperature",
            Self::PowerLow { .. } => "battery too low to start",
            Self::RecoveryPowerLow { .. } => "battery below recovery threshold",
            Self::TempsNotStable => "zone temperatures too high to start",
            Self::SampleInvalidated => "sample hold window expired",
            Self::BatteryLevel { .. } => "battery level",
            Self::Sample { .. } => "sample",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Log events are compared structurally all over the test suite, so
    // every payload embedded in a variant has to compare field-wise too.
    #[test]
    fn sample_events_compare_field_wise() {
        let a = LogEvent::Sample {
            temps: TempSample {
                zones_c: [95.0, 64.5, 64.5, 64.5],
                read_failed: false,
            },
            duties: DutyVector {
                zones: [30.0, 12.5, 12.5, 12.5],
                motor: 0.0,
            },
            motor_rpm: 0.0,
        };
        let mut b = a;
        assert_eq!(a, b);

        if let LogEvent::Sample { temps, .. } = &mut b {
            temps.zones_c[0] += 1.0;
        }
        assert_ne!(a, b);
    }
}
