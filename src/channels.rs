//! Inter-worker communication channels.
//!
//! Bounded `embassy-sync` MPMC channels connecting the supervisor, cycle
//! sequencer, heater worker and peripheral workers. No heap allocation;
//! every lane has a fixed depth chosen to match its traffic.
//!
//! ```text
//!               switch / button              HeaterMsg
//! sensors ────────────────────▶ supervisor ────────────▶ heater worker
//!                               & sequencer ◀────────────
//!                                   │        confirmations, run-allowed,
//!                                   │        over-temp, setpoint-reached
//!                                   ▼
//!                        watchdog / LEDs / logger
//! ```

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;

use crate::messages::{
    ButtonEvent, DutyCommand, HeaterMsg, LedCommand, LogEvent, SwitchSample, UsbMode, WakeSource,
    WatchdogReport, WorkerCtl,
};

type Ch<T, const N: usize> = Channel<CriticalSectionRawMutex, T, N>;

/// Every channel in the system, grouped so a worker borrows one struct.
pub struct CoreChannels {
    /// Interlock samples, produced periodically by the sensor worker.
    /// Receiving from this lane is the dominant pacing point of both the
    /// supervisor and the sequencer.
    pub switch_samples: Ch<SwitchSample, 4>,
    /// Debounced button gestures.
    pub buttons: Ch<ButtonEvent, 4>,

    /// Everything inbound to the heater worker.
    pub heater: Ch<HeaterMsg, 8>,
    /// Heater's answer to a `ZoneState` change or `QueryRunning`:
    /// whether any loop is active.
    pub run_confirm: Ch<bool, 2>,
    /// Pre-run interlock verdict: may the cycle start.
    pub run_allowed: Ch<bool, 2>,
    /// Over-temperature (or failed-read) alarm toward the sequencer.
    pub run_error: Ch<bool, 2>,
    /// One-shot notification that the heater reached its setpoint.
    pub setpoint_reached: Ch<(), 1>,
    /// Duty commands toward the PWM output stage.
    pub duty: Ch<DutyCommand, 8>,

    /// Battery level request (unit) and response (percent).
    pub battery_requests: Ch<(), 2>,
    pub battery_levels: Ch<u8, 2>,

    /// Worker liveness reports toward the watchdog.
    pub watchdog_reports: Ch<WatchdogReport, 8>,

    /// Front-panel LED commands.
    pub leds: Ch<LedCommand, 8>,
    /// Run-log events toward the logger worker.
    pub log_events: Ch<LogEvent, 16>,

    /// USB composite reconfiguration: command, completion, and the
    /// connection-status request/response pair.
    pub usb_commands: Ch<UsbMode, 1>,
    pub usb_confirm: Ch<(), 1>,
    pub usb_status_requests: Ch<(), 1>,
    pub usb_status: Ch<bool, 1>,

    /// Wake events out of Sleep.
    pub wake_events: Ch<WakeSource, 2>,

    /// Power-state control per peripheral worker.
    pub sensor_ctl: Ch<WorkerCtl, 2>,
    pub battery_ctl: Ch<WorkerCtl, 2>,
    pub button_ctl: Ch<WorkerCtl, 2>,
    pub usb_ctl: Ch<WorkerCtl, 2>,
    pub composite_ctl: Ch<WorkerCtl, 2>,
}

impl CoreChannels {
    pub const fn new() -> Self {
        Self {
            switch_samples: Channel::new(),
            buttons: Channel::new(),
            heater: Channel::new(),
            run_confirm: Channel::new(),
            run_allowed: Channel::new(),
            run_error: Channel::new(),
            setpoint_reached: Channel::new(),
            duty: Channel::new(),
            battery_requests: Channel::new(),
            battery_levels: Channel::new(),
            watchdog_reports: Channel::new(),
            leds: Channel::new(),
            log_events: Channel::new(),
            usb_commands: Channel::new(),
            usb_confirm: Channel::new(),
            usb_status_requests: Channel::new(),
            usb_status: Channel::new(),
            wake_events: Channel::new(),
            sensor_ctl: Channel::new(),
            battery_ctl: Channel::new(),
            button_ctl: Channel::new(),
            usb_ctl: Channel::new(),
            composite_ctl: Channel::new(),
        }
    }
}

impl Default for CoreChannels {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide channel set for firmware integration. Tests build their
/// own `CoreChannels` locals instead.
pub static CHANNELS: CoreChannels = CoreChannels::new();
