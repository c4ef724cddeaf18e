//! Four-zone heater controller (valve + three amplification zones).

use log::{info, warn};

use crate::channels::CoreChannels;
use crate::config::{MULTI_ZONE_HW_MAX_C, PidGains, RunConfig};
use crate::control::Pid;
use crate::messages::{
    DutyCommand, DutyVector, MotorSample, PhaseZone, TempSample, WatchdogReport, WorkerId,
};

use super::ZoneController;

const ZONES: usize = 4;
const PHASES: usize = 2;

pub struct MultiZoneController {
    gains: [[PidGains; ZONES]; PHASES],
    loops: [[Pid; ZONES]; PHASES],
    enabled: [bool; PHASES],
    max_temp_c: [f32; ZONES],
    min_run_temp_c: f32,
    min_run_check: bool,
    /// A pre-run interlock verdict is owed on the next sample.
    start_pending: bool,
    over_temp: bool,
    alarm_sent: bool,
}

impl MultiZoneController {
    pub fn new(cfg: &RunConfig) -> Self {
        let gains = [cfg.multi.phase1, cfg.multi.phase2];
        Self {
            gains,
            loops: gains.map(|bank| bank.map(|g| Pid::new(&g))),
            enabled: [false; PHASES],
            max_temp_c: cfg.multi.max_temp_c,
            min_run_temp_c: cfg.min_run_zone_temp_c,
            min_run_check: cfg.min_run_zone_check,
            start_pending: false,
            over_temp: false,
            alarm_sent: false,
        }
    }

    fn any_enabled(&self) -> bool {
        self.enabled.iter().any(|&e| e)
    }

    fn all_off(&mut self, ch: &CoreChannels) {
        let _ = ch.duty.try_send(DutyCommand::Update(DutyVector::default()));
        let _ = ch.duty.try_send(DutyCommand::Disable);
        let _ = ch.watchdog_reports.try_send(WatchdogReport {
            worker: WorkerId::Heater,
            alive: false,
        });
        self.start_pending = false;
    }
}

impl ZoneController for MultiZoneController {
    fn apply_config(&mut self, cfg: &RunConfig) {
        self.gains = [cfg.multi.phase1, cfg.multi.phase2];
        self.max_temp_c = cfg.multi.max_temp_c;
        self.min_run_temp_c = cfg.min_run_zone_temp_c;
        self.min_run_check = cfg.min_run_zone_check;
    }

    fn set_zone_enabled(&mut self, zone: PhaseZone, enable: bool, ch: &CoreChannels) {
        let phase = zone.index();
        if enable {
            for (pid, g) in self.loops[phase].iter_mut().zip(self.gains[phase].iter()) {
                *pid = Pid::new(g);
            }
            self.enabled[phase] = true;
            let _ = ch.duty.try_send(DutyCommand::Enable);
            let _ = ch.watchdog_reports.try_send(WatchdogReport {
                worker: WorkerId::Heater,
                alive: true,
            });
            // The pre-run check gates the start of a run, so only a
            // phase 1 enable owes a verdict.
            if zone == PhaseZone::Phase1 {
                if self.min_run_check {
                    self.start_pending = true;
                } else {
                    let _ = ch.run_allowed.try_send(true);
                }
            }
            info!("HEATER: {zone:?} bank enabled");
        } else {
            self.enabled[phase] = false;
            for pid in &mut self.loops[phase] {
                pid.reset();
            }
            if !self.any_enabled() {
                self.all_off(ch);
            }
            info!("HEATER: {zone:?} bank disabled");
        }
        let _ = ch.run_confirm.try_send(self.is_running());
    }

    fn handle_temperature(&mut self, sample: TempSample, ch: &CoreChannels) {
        if self.start_pending {
            let too_hot = sample
                .zones_c
                .iter()
                .any(|&t| t > self.min_run_temp_c);
            if too_hot {
                warn!("HEATER: pre-run check refused, a zone is still hot");
            }
            let _ = ch.run_allowed.try_send(!too_hot);
            self.start_pending = false;
        }

        let mut duties = DutyVector::default();
        for phase in 0..PHASES {
            if !self.enabled[phase] {
                continue;
            }
            for zone in 0..ZONES {
                let out = self.loops[phase][zone].compute(sample.zones_c[zone]);
                duties.zones[zone] = duties.zones[zone].max(out);
            }
        }

        self.over_temp = sample.zones_c.iter().enumerate().any(|(zone, &t)| {
            t > self.max_temp_c[zone] || t < 0.0 || t > MULTI_ZONE_HW_MAX_C
        });
        if self.over_temp {
            if !self.alarm_sent {
                warn!("HEATER: over temperature");
                let _ = ch.run_error.try_send(true);
                self.alarm_sent = true;
            }
        } else {
            self.alarm_sent = false;
        }

        if self.any_enabled() {
            let _ = ch.duty.try_send(DutyCommand::Update(duties));
        }
    }

    fn handle_motor(&mut self, _sample: MotorSample, _ch: &CoreChannels) {
        // No motor on this hardware.
    }

    fn is_running(&self) -> bool {
        self.any_enabled()
    }

    fn is_over_temperature(&self) -> bool {
        self.over_temp
    }

    fn shutdown(&mut self, ch: &CoreChannels) {
        self.enabled = [false; PHASES];
        for bank in &mut self.loops {
            for pid in bank {
                pid.reset();
            }
        }
        self.all_off(ch);
    }
}


#[cfg(all(test, not(target_os = "espidf")))]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// The predicate holds iff some zone is above its configured max
        /// or outside the hardware range.
        #[test]
        fn over_temp_predicate_is_exact(
            temps in proptest::array::uniform4(-10.0f32..130.0),
        ) {
            let cfg = RunConfig::multi_zone_defaults();
            let mut c = MultiZoneController::new(&cfg);
            let ch = CoreChannels::new();
            c.handle_temperature(
                TempSample { zones_c: temps, read_failed: false },
                &ch,
            );
            let expected = temps.iter().enumerate().any(|(i, &t)| {
                t > cfg.multi.max_temp_c[i] || t < 0.0 || t > MULTI_ZONE_HW_MAX_C
            });
            prop_assert_eq!(c.is_over_temperature(), expected);
        }
    }
}
