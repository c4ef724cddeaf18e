//! Heater zone control.
//!
//! Two hardware variants sit behind one capability interface:
//!
//! - [`MultiZoneController`]: four independently heated zones (valve plus
//!   three amplification zones) with one full PID bank per cycle phase.
//! - [`SingleHeaterController`]: one heater and a mixing motor, per-phase
//!   heater/motor loops and a one-shot ramp-to-setpoint gate.
//!
//! The [`heater_worker`] owns the active controller and serialises every
//! command and sample through the heater channel. Each `ZoneState` change
//! and `QueryRunning` is answered with exactly one message on the
//! run-confirm lane; the pre-run temperature interlock answers exactly
//! once on the run-allowed lane.

pub mod multi_zone;
pub mod single_heater;

pub use multi_zone::MultiZoneController;
pub use single_heater::SingleHeaterController;

use log::warn;

use crate::channels::CoreChannels;
use crate::config::{HardwareVariant, RunConfig};
use crate::messages::{HeaterMsg, MotorSample, PhaseZone, TempSample, WatchdogReport, WorkerId};

/// Operations every heater variant provides.
pub trait ZoneController {
    /// Pick up a freshly loaded configuration. Only called while no
    /// zone is enabled.
    fn apply_config(&mut self, cfg: &RunConfig);
    /// Enable or disable one phase's loops. Sends exactly one
    /// confirmation on the run-confirm lane.
    fn set_zone_enabled(&mut self, zone: PhaseZone, enable: bool, ch: &CoreChannels);
    /// Process one temperature sample: run the loops, publish duties,
    /// evaluate the over-temperature predicate and any pending pre-run
    /// interlock check.
    fn handle_temperature(&mut self, sample: TempSample, ch: &CoreChannels);
    /// Process one motor speed sample.
    fn handle_motor(&mut self, sample: MotorSample, ch: &CoreChannels);
    /// Whether any loop is currently active.
    fn is_running(&self) -> bool;
    /// Result of the over-temperature predicate for the latest sample.
    fn is_over_temperature(&self) -> bool;
    /// Disable everything and zero the outputs.
    fn shutdown(&mut self, ch: &CoreChannels);
}

/// Tagged dispatch over the two variants.
pub enum HeaterController {
    MultiZone(MultiZoneController),
    SingleHeater(SingleHeaterController),
}

impl HeaterController {
    pub fn from_config(cfg: &RunConfig) -> Self {
        match cfg.variant {
            HardwareVariant::MultiZone => Self::MultiZone(MultiZoneController::new(cfg)),
            HardwareVariant::SingleHeater => Self::SingleHeater(SingleHeaterController::new(cfg)),
        }
    }

    fn inner(&mut self) -> &mut dyn ZoneController {
        match self {
            Self::MultiZone(c) => c,
            Self::SingleHeater(c) => c,
        }
    }

    fn inner_ref(&self) -> &dyn ZoneController {
        match self {
            Self::MultiZone(c) => c,
            Self::SingleHeater(c) => c,
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner_ref().is_running()
    }

    pub fn is_over_temperature(&self) -> bool {
        self.inner_ref().is_over_temperature()
    }
}

/// Heater worker state: the active controller plus message-loop
/// bookkeeping. Kept separate from the loop itself so tests can drive
/// [`HeaterService::handle`] synchronously.
pub struct HeaterService {
    controller: HeaterController,
    asleep: bool,
    samples_since_kick: u32,
    /// Samples per liveness report, derived from the sample period so the
    /// watchdog sees roughly one report per second.
    kick_every: u32,
}

impl HeaterService {
    pub fn new(cfg: &RunConfig) -> Self {
        Self {
            controller: HeaterController::from_config(cfg),
            asleep: false,
            samples_since_kick: 0,
            kick_every: (1000 / cfg.sensor_sample_ms.max(1)).max(1),
        }
    }

    pub fn controller(&self) -> &HeaterController {
        &self.controller
    }

    /// Process one inbound message.
    pub fn handle(&mut self, msg: HeaterMsg, ch: &CoreChannels) {
        if self.asleep {
            if matches!(msg, HeaterMsg::Wake) {
                self.asleep = false;
            }
            return;
        }
        match msg {
            HeaterMsg::ZoneState { zone, enable } => {
                self.controller.inner().set_zone_enabled(zone, enable, ch);
            }
            HeaterMsg::Temperature(sample) => {
                if sample.read_failed {
                    // A blind controller must not keep heating. Report it
                    // on the alarm lane as a thermal fault.
                    warn!("HEATER: temperature read failed, raising alarm");
                    let _ = ch.run_error.try_send(true);
                } else {
                    self.controller.inner().handle_temperature(sample, ch);
                }
                self.samples_since_kick += 1;
                if self.samples_since_kick >= self.kick_every {
                    self.samples_since_kick = 0;
                    let _ = ch.watchdog_reports.try_send(WatchdogReport {
                        worker: WorkerId::Heater,
                        alive: self.controller.is_running(),
                    });
                }
            }
            HeaterMsg::Motor(sample) => self.controller.inner().handle_motor(sample, ch),
            HeaterMsg::QueryRunning => {
                let _ = ch.run_confirm.try_send(self.controller.is_running());
            }
            HeaterMsg::ConfigUpdated(cfg) => {
                if self.controller.is_running() {
                    warn!("HEATER: ignoring config update while loops are active");
                } else {
                    self.controller = HeaterController::from_config(&cfg);
                    self.kick_every = (1000 / cfg.sensor_sample_ms.max(1)).max(1);
                }
            }
            HeaterMsg::Sleep => {
                self.controller.inner().shutdown(ch);
                self.asleep = true;
            }
            HeaterMsg::Wake => {}
        }
    }
}

/// Heater worker loop. Never returns; blocks on the heater channel.
pub async fn heater_worker(ch: &CoreChannels, cfg: &RunConfig) -> ! {
    let mut service = HeaterService::new(cfg);
    loop {
        let msg = ch.heater.receive().await;
        service.handle(msg, ch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunConfig;
    use crate::messages::DutyCommand;

    fn drain_duty(ch: &CoreChannels) {
        while ch.duty.try_receive().is_ok() {}
    }

    #[test]
    fn failed_sample_raises_alarm_without_running_loops() {
        let ch = CoreChannels::new();
        let cfg = RunConfig::multi_zone_defaults();
        let mut svc = HeaterService::new(&cfg);
        svc.handle(
            HeaterMsg::ZoneState {
                zone: PhaseZone::Phase1,
                enable: true,
            },
            &ch,
        );
        let _ = ch.run_confirm.try_receive();
        drain_duty(&ch);

        svc.handle(
            HeaterMsg::Temperature(TempSample {
                zones_c: [0.0; 4],
                read_failed: true,
            }),
            &ch,
        );
        assert_eq!(ch.run_error.try_receive(), Ok(true));
        assert!(ch.duty.try_receive().is_err(), "no duty update expected");
    }

    #[test]
    fn query_running_answers_on_confirm_lane() {
        let ch = CoreChannels::new();
        let cfg = RunConfig::multi_zone_defaults();
        let mut svc = HeaterService::new(&cfg);
        svc.handle(HeaterMsg::QueryRunning, &ch);
        assert_eq!(ch.run_confirm.try_receive(), Ok(false));
    }

    #[test]
    fn sleep_shuts_down_and_ignores_samples_until_wake() {
        let ch = CoreChannels::new();
        let cfg = RunConfig::multi_zone_defaults();
        let mut svc = HeaterService::new(&cfg);
        svc.handle(
            HeaterMsg::ZoneState {
                zone: PhaseZone::Phase1,
                enable: true,
            },
            &ch,
        );
        let _ = ch.run_confirm.try_receive();
        drain_duty(&ch);

        svc.handle(HeaterMsg::Sleep, &ch);
        assert!(!svc.controller().is_running());
        assert!(matches!(ch.duty.try_receive(), Ok(DutyCommand::Update(_))));
        assert_eq!(ch.duty.try_receive(), Ok(DutyCommand::Disable));

        svc.handle(
            HeaterMsg::Temperature(TempSample::default()),
            &ch,
        );
        assert!(ch.duty.try_receive().is_err(), "asleep: samples ignored");

        svc.handle(HeaterMsg::Wake, &ch);
        svc.handle(
            HeaterMsg::Temperature(TempSample::default()),
            &ch,
        );
        // Awake again, but nothing enabled, so still no duty traffic.
        assert!(ch.duty.try_receive().is_err());
    }

    #[test]
    fn liveness_report_cadence_tracks_sample_rate() {
        let ch = CoreChannels::new();
        let cfg = RunConfig::multi_zone_defaults(); // 250 ms samples
        let mut svc = HeaterService::new(&cfg);
        for _ in 0..3 {
            svc.handle(HeaterMsg::Temperature(TempSample::default()), &ch);
        }
        assert!(ch.watchdog_reports.try_receive().is_err());
        svc.handle(HeaterMsg::Temperature(TempSample::default()), &ch);
        let report = ch.watchdog_reports.try_receive().unwrap();
        assert_eq!(report.worker, WorkerId::Heater);
        assert!(!report.alive, "idle heater reports itself parked");
    }
}
