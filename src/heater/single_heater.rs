//! Single-heater + mixing-motor controller.
//!
//! One physical heater and one motor, each with a loop per cycle phase;
//! the active phase selects which pair runs. The heater reports a one-shot
//! setpoint-reached notification the first time the temperature ramps up
//! to the active setpoint after an enable.

use log::{info, warn};

use crate::channels::CoreChannels;
use crate::config::{RunConfig, SINGLE_HEATER_HW_MAX_C, SingleHeaterConfig};
use crate::control::Pid;
use crate::messages::{
    DutyCommand, DutyVector, MotorSample, PhaseZone, TempSample, WatchdogReport, WorkerId,
};

use super::ZoneController;

const PHASES: usize = 2;

pub struct SingleHeaterController {
    cfg: SingleHeaterConfig,
    heater_loops: [Pid; PHASES],
    motor_loops: [Pid; PHASES],
    enabled: [bool; PHASES],
    /// Per-phase ramp gating, taken from the cycle configuration.
    ramp_phase: [bool; PHASES],
    /// Set on enable when the active phase ramps; cleared after the
    /// one-shot setpoint-reached send.
    ramp_pending: bool,
    min_run_temp_c: f32,
    min_run_check: bool,
    start_pending: bool,
    over_temp: bool,
    alarm_sent: bool,
    heater_duty: f32,
    motor_duty: f32,
}

impl SingleHeaterController {
    pub fn new(cfg: &RunConfig) -> Self {
        Self {
            cfg: cfg.single,
            heater_loops: cfg.single.heater.map(|g| Pid::new(&g)),
            motor_loops: cfg.single.motor.map(|g| Pid::new(&g)),
            enabled: [false; PHASES],
            ramp_phase: [cfg.cycle.ramp_phase1, cfg.cycle.ramp_phase2],
            ramp_pending: false,
            min_run_temp_c: cfg.min_run_zone_temp_c,
            min_run_check: cfg.min_run_zone_check,
            start_pending: false,
            over_temp: false,
            alarm_sent: false,
            heater_duty: 0.0,
            motor_duty: 0.0,
        }
    }

    fn any_enabled(&self) -> bool {
        self.enabled.iter().any(|&e| e)
    }

    fn publish_duties(&self, ch: &CoreChannels) {
        let _ = ch.duty.try_send(DutyCommand::Update(DutyVector {
            zones: [self.heater_duty, 0.0, 0.0, 0.0],
            motor: self.motor_duty,
        }));
    }

    fn all_off(&mut self, ch: &CoreChannels) {
        self.heater_duty = 0.0;
        self.motor_duty = 0.0;
        self.publish_duties(ch);
        let _ = ch.duty.try_send(DutyCommand::Disable);
        let _ = ch.watchdog_reports.try_send(WatchdogReport {
            worker: WorkerId::Heater,
            alive: false,
        });
        self.start_pending = false;
        self.ramp_pending = false;
    }
}

impl ZoneController for SingleHeaterController {
    fn apply_config(&mut self, cfg: &RunConfig) {
        self.cfg = cfg.single;
        self.ramp_phase = [cfg.cycle.ramp_phase1, cfg.cycle.ramp_phase2];
        self.min_run_temp_c = cfg.min_run_zone_temp_c;
        self.min_run_check = cfg.min_run_zone_check;
    }

    fn set_zone_enabled(&mut self, zone: PhaseZone, enable: bool, ch: &CoreChannels) {
        let phase = zone.index();
        if enable {
            self.heater_loops[phase] = Pid::new(&self.cfg.heater[phase]);
            self.motor_loops[phase] = Pid::new(&self.cfg.motor[phase]);
            self.enabled[phase] = true;
            self.ramp_pending = self.ramp_phase[phase] && self.cfg.run_heater[phase];
            let _ = ch.duty.try_send(DutyCommand::Enable);
            let _ = ch.watchdog_reports.try_send(WatchdogReport {
                worker: WorkerId::Heater,
                alive: true,
            });
            // Only a phase 1 enable owes a pre-run verdict; phase 2 start
            // is a plain handover confirmed on the run-confirm lane.
            if zone == PhaseZone::Phase1 {
                if self.min_run_check {
                    self.start_pending = true;
                } else {
                    let _ = ch.run_allowed.try_send(true);
                }
            }
            info!("HEATER: {zone:?} loops enabled");
        } else {
            self.enabled[phase] = false;
            self.heater_loops[phase].reset();
            self.motor_loops[phase].reset();
            if self.any_enabled() {
                // Phase handover: the other phase keeps the stage powered,
                // but this phase's contribution stops now.
                self.heater_duty = 0.0;
                self.motor_duty = 0.0;
                self.publish_duties(ch);
            } else {
                self.all_off(ch);
            }
            info!("HEATER: {zone:?} loops disabled");
        }
        let _ = ch.run_confirm.try_send(self.is_running());
    }

    fn handle_temperature(&mut self, sample: TempSample, ch: &CoreChannels) {
        let temp = sample.zones_c[0];

        if self.start_pending {
            let too_hot = temp > self.min_run_temp_c;
            if too_hot {
                warn!("HEATER: pre-run check refused, heater block still hot");
            }
            let _ = ch.run_allowed.try_send(!too_hot);
            self.start_pending = false;
        }

        for phase in 0..PHASES {
            if self.enabled[phase] && self.cfg.run_heater[phase] {
                self.heater_duty = self.heater_loops[phase].compute(temp);
                if self.ramp_pending && temp >= self.heater_loops[phase].setpoint() {
                    info!("HEATER: setpoint reached");
                    let _ = ch.setpoint_reached.try_send(());
                    self.ramp_pending = false;
                }
            }
        }

        self.over_temp =
            temp > self.cfg.max_temp_c || temp < 0.0 || temp > SINGLE_HEATER_HW_MAX_C;
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
            self.publish_duties(ch);
        }
    }

    fn handle_motor(&mut self, sample: MotorSample, ch: &CoreChannels) {
        for phase in 0..PHASES {
            if self.enabled[phase] && self.cfg.run_motor[phase] {
                self.motor_duty = self.motor_loops[phase].compute(sample.speed_rpm);
            }
        }
        if self.any_enabled() {
            self.publish_duties(ch);
        }
    }

    fn is_running(&self) -> bool {
        self.any_enabled()
    }

    fn is_over_temperature(&self) -> bool {
        self.over_temp
    }

    fn shutdown(&mut self, ch: &CoreChannels) {
        self.enabled = [false; PHASES];
        for pid in &mut self.heater_loops {
            pid.reset();
        }
        for pid in &mut self.motor_loops {
            pid.reset();
        }
        self.all_off(ch);
    }
}
