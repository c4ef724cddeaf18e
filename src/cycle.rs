//! Thermal-cycle sequencer.
//!
//! Nested state machine driven by the supervisor while the device is in
//! Running: one transition per [`CycleSequencer::step`] call. Most states
//! end their step with a blocking receive on the interlock-switch channel,
//! which is the dominant pacing point of a run; the sensor worker's sample
//! period therefore sets the sequencer's cadence.
//!
//! ```text
//! ValidateInit ──▶ StartPhase1 ──▶ Phase1RampToTemp ──▶ Phase1Timer
//!       │                │  (ramp configured)               │
//!       │                └──────────────────────────────────┤
//!       ▼                                                   ▼
//!  ExitCycle ◀── aborts from any state                 StartPhase2
//!       ▲                                                   │
//!       │                                                  ...
//!  SampleValidHold ◀── CompleteDelay ◀───────────── Phase2Timer
//! ```
//!
//! Every terminal exit produces exactly one [`CycleExit`]; the sequencer
//! then rewinds itself to `ValidateInit` for the next run.

use log::{info, warn};

use crate::channels::CoreChannels;
use crate::config::{HardwareVariant, RunConfig};
use crate::messages::{
    ButtonEvent, HeaterMsg, LedCommand, LedPattern, LogEvent, PhaseZone, SwitchSample,
};
use crate::ports::Clock;

/// Sequencer states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    ValidateInit,
    StartPhase1,
    Phase1RampToTemp,
    Phase1Timer,
    StartPhase2,
    Phase2RampToTemp,
    Phase2Timer,
    CompleteDelay,
    SampleValidHold,
    ExitCycle,
}

/// Why a run ended. `Running` means it has not ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleExit {
    Running,
    Complete,
    PowerLow,
    SensorBreak,
    ButtonExit,
    OverTemp,
    StartTempTooHigh,
    TimeoutDuringRamp,
    SampleInvalidated,
    Unknown,
}

/// How long ValidateInit waits for the battery worker before falling back
/// to the last known level.
const BATTERY_WAIT_MS: u64 = 1000;
const BATTERY_POLL_MS: u64 = 20;

/// Whether the sample has been removed, per hardware variant. Four-zone
/// units carry a second optical sensor; either one releasing counts.
fn sample_removed(cfg: &RunConfig, s: SwitchSample) -> bool {
    match cfg.variant {
        HardwareVariant::MultiZone => !s.hall_engaged || !s.optical_engaged,
        HardwareVariant::SingleHeater => !s.hall_engaged,
    }
}

pub struct CycleSequencer {
    current: CycleState,
    last: CycleState,
    /// Pending terminal reason, consumed when ExitCycle runs.
    exit: CycleExit,
    /// Whether the state running this step was entered this step.
    entering: bool,
    /// Timestamp of the most recent state entry.
    entered_at_ms: u64,
    ramp_deadline_ms: u64,
    /// Setpoint the phase-1 ramp completed at, if it completed.
    ramped_setpoint: Option<f32>,
    /// Last battery level heard from the battery worker. Starts at zero
    /// so a silent worker reads as an empty pack and the run is refused.
    last_battery_percent: u8,
}

impl CycleSequencer {
    pub fn new() -> Self {
        Self {
            current: CycleState::ValidateInit,
            last: CycleState::ExitCycle,
            exit: CycleExit::Running,
            entering: true,
            entered_at_ms: 0,
            ramp_deadline_ms: 0,
            ramped_setpoint: None,
            last_battery_percent: 0,
        }
    }

    pub fn state(&self) -> CycleState {
        self.current
    }

    /// Rewind to ValidateInit. Called by the supervisor on Running entry.
    pub fn reset(&mut self) {
        self.current = CycleState::ValidateInit;
        self.last = CycleState::ExitCycle;
        self.exit = CycleExit::Running;
        self.ramped_setpoint = None;
    }

    /// Execute one transition. Returns [`CycleExit::Running`] until the
    /// step that runs ExitCycle, which yields the terminal reason.
    ///
    /// Suspension points: the interlock-switch receive in the ramp, timer,
    /// delay and hold states; the confirmation receives around zone state
    /// changes; and the bounded battery wait in ValidateInit.
    pub async fn step(
        &mut self,
        ch: &CoreChannels,
        clock: &impl Clock,
        cfg: &RunConfig,
    ) -> CycleExit {
        self.entering = self.last != self.current;
        if self.entering {
            self.entered_at_ms = clock.now_ms();
        }
        self.last = self.current;
        self.current = match self.current {
            CycleState::ValidateInit => self.validate_init(ch, clock, cfg).await,
            CycleState::StartPhase1 => self.start_phase1(ch, clock, cfg).await,
            CycleState::Phase1RampToTemp => {
                self.ramp_to_temp(PhaseZone::Phase1, ch, clock, cfg).await
            }
            CycleState::Phase1Timer => self.phase_timer(PhaseZone::Phase1, ch, clock, cfg).await,
            CycleState::StartPhase2 => self.start_phase2(ch, clock, cfg).await,
            CycleState::Phase2RampToTemp => {
                self.ramp_to_temp(PhaseZone::Phase2, ch, clock, cfg).await
            }
            CycleState::Phase2Timer => self.phase_timer(PhaseZone::Phase2, ch, clock, cfg).await,
            CycleState::CompleteDelay => self.complete_delay(ch, clock, cfg).await,
            CycleState::SampleValidHold => self.sample_valid_hold(ch, clock, cfg).await,
            CycleState::ExitCycle => self.exit_cycle(ch),
        };
        if self.last == CycleState::ExitCycle {
            core::mem::replace(&mut self.exit, CycleExit::Running)
        } else {
            CycleExit::Running
        }
    }

    /// Record a terminal reason and head for ExitCycle.
    fn abort(&mut self, reason: CycleExit) -> CycleState {
        self.exit = reason;
        CycleState::ExitCycle
    }

    /// Change a phase's zone state and consume the heater's confirmation.
    async fn set_zone(&self, ch: &CoreChannels, zone: PhaseZone, enable: bool) {
        ch.heater.send(HeaterMsg::ZoneState { zone, enable }).await;
        let _ = ch.run_confirm.receive().await;
    }

    // ── ValidateInit ──────────────────────────────────────────────

    async fn validate_init(
        &mut self,
        ch: &CoreChannels,
        clock: &impl Clock,
        cfg: &RunConfig,
    ) -> CycleState {
        let _ = ch.battery_requests.try_send(());
        let deadline = clock.now_ms() + BATTERY_WAIT_MS;
        loop {
            if let Ok(percent) = ch.battery_levels.try_receive() {
                self.last_battery_percent = percent;
                break;
            }
            if clock.now_ms() >= deadline {
                warn!("CYCLE: no battery response, using last known level");
                break;
            }
            clock.sleep_ms(BATTERY_POLL_MS).await;
        }

        let percent = self.last_battery_percent;
        if percent < cfg.cycle.low_power_percent {
            warn!("CYCLE: battery at {percent}%, refusing to start");
            let _ = ch.log_events.try_send(LogEvent::PowerLow {
                battery_percent: percent,
            });
            return self.abort(CycleExit::PowerLow);
        }
        if percent < cfg.cycle.recovery_percent {
            warn!("CYCLE: battery at {percent}%, below recovery threshold");
            let _ = ch.log_events.try_send(LogEvent::RecoveryPowerLow {
                battery_percent: percent,
            });
            return self.abort(CycleExit::PowerLow);
        }

        info!("CYCLE: starting run at {percent}% battery");
        let _ = ch.log_events.try_send(LogEvent::RunStarted {
            battery_percent: percent,
        });
        CycleState::StartPhase1
    }

    // ── Phase starts ──────────────────────────────────────────────

    async fn start_phase1(
        &mut self,
        ch: &CoreChannels,
        clock: &impl Clock,
        cfg: &RunConfig,
    ) -> CycleState {
        self.set_zone(ch, PhaseZone::Phase1, true).await;
        let _ = ch.log_events.try_send(LogEvent::Phase1HeatingStarted);

        // Pre-run temperature interlock verdict.
        let allowed = ch.run_allowed.receive().await;
        if !allowed {
            warn!("CYCLE: start refused, zones too hot");
            self.set_zone(ch, PhaseZone::Phase1, false).await;
            let _ = ch.log_events.try_send(LogEvent::TempsNotStable);
            return self.abort(CycleExit::StartTempTooHigh);
        }

        if cfg.cycle.ramp_phase1 && cfg.phase_heater_enabled(0) {
            self.ramp_deadline_ms = clock.now_ms() + u64::from(cfg.cycle.ramp_timeout_s) * 1000;
            CycleState::Phase1RampToTemp
        } else {
            CycleState::Phase1Timer
        }
    }

    async fn start_phase2(
        &mut self,
        ch: &CoreChannels,
        clock: &impl Clock,
        cfg: &RunConfig,
    ) -> CycleState {
        // Single confirmation only: phase 2 is a handover inside an
        // already-validated run, so there is no second verdict to wait for.
        self.set_zone(ch, PhaseZone::Phase2, true).await;
        let _ = ch.log_events.try_send(LogEvent::Phase2HeatingStarted);

        if cfg.cycle.ramp_phase2 && cfg.phase_heater_enabled(1) {
            // Skip the ramp when phase 1 already ramped to this exact
            // setpoint; waiting again would never see a new notification.
            let sp2 = cfg.single_heater_setpoint(1);
            if self
                .ramped_setpoint
                .is_some_and(|sp1| (sp1 - sp2).abs() < 0.01)
            {
                info!("CYCLE: already at phase 2 setpoint, skipping ramp");
                return CycleState::Phase2Timer;
            }
            self.ramp_deadline_ms = clock.now_ms() + u64::from(cfg.cycle.ramp_timeout_s) * 1000;
            return CycleState::Phase2RampToTemp;
        }
        CycleState::Phase2Timer
    }

    // ── Ramp and hold ─────────────────────────────────────────────

    async fn ramp_to_temp(
        &mut self,
        phase: PhaseZone,
        ch: &CoreChannels,
        clock: &impl Clock,
        cfg: &RunConfig,
    ) -> CycleState {
        if ch.setpoint_reached.try_receive().is_ok() {
            info!("CYCLE: {phase:?} ramp complete");
            let _ = ch.log_events.try_send(LogEvent::RampComplete);
            if phase == PhaseZone::Phase1 {
                self.ramped_setpoint = Some(cfg.single_heater_setpoint(0));
            }
            return match phase {
                PhaseZone::Phase1 => CycleState::Phase1Timer,
                PhaseZone::Phase2 => CycleState::Phase2Timer,
            };
        }

        if clock.now_ms() >= self.ramp_deadline_ms {
            warn!("CYCLE: {phase:?} ramp timed out");
            self.set_zone(ch, phase, false).await;
            let _ = ch.log_events.try_send(LogEvent::RampTimeout);
            return self.abort(CycleExit::TimeoutDuringRamp);
        }

        if ch.run_error.try_receive().is_ok() {
            self.set_zone(ch, phase, false).await;
            let _ = ch.log_events.try_send(LogEvent::OverTemperature);
            return self.abort(CycleExit::OverTemp);
        }

        let sample = ch.switch_samples.receive().await;
        if sample_removed(cfg, sample) {
            self.set_zone(ch, phase, false).await;
            return self.abort(CycleExit::SensorBreak);
        }

        if let Ok(ButtonEvent::On) = ch.buttons.try_receive() {
            self.set_zone(ch, phase, false).await;
            return self.abort(CycleExit::ButtonExit);
        }

        self.current
    }

    async fn phase_timer(
        &mut self,
        phase: PhaseZone,
        ch: &CoreChannels,
        clock: &impl Clock,
        cfg: &RunConfig,
    ) -> CycleState {
        let duration_ms = u64::from(match phase {
            PhaseZone::Phase1 => cfg.cycle.phase1_duration_s,
            PhaseZone::Phase2 => cfg.cycle.phase2_duration_s,
        }) * 1000;

        if clock.now_ms().saturating_sub(self.entered_at_ms) >= duration_ms {
            self.set_zone(ch, phase, false).await;
            return match phase {
                PhaseZone::Phase1 => {
                    let _ = ch.log_events.try_send(LogEvent::Phase1HeatingStopped);
                    CycleState::StartPhase2
                }
                PhaseZone::Phase2 => {
                    let _ = ch.log_events.try_send(LogEvent::Phase2HeatingStopped);
                    CycleState::CompleteDelay
                }
            };
        }

        if ch.run_error.try_receive().is_ok() {
            self.set_zone(ch, phase, false).await;
            let _ = ch.log_events.try_send(LogEvent::OverTemperature);
            return self.abort(CycleExit::OverTemp);
        }

        let sample = ch.switch_samples.receive().await;
        if sample_removed(cfg, sample) {
            self.set_zone(ch, phase, false).await;
            return self.abort(CycleExit::SensorBreak);
        }

        if let Ok(ButtonEvent::On) = ch.buttons.try_receive() {
            self.set_zone(ch, phase, false).await;
            return self.abort(CycleExit::ButtonExit);
        }

        self.current
    }

    // ── Wind-down ─────────────────────────────────────────────────

    async fn complete_delay(
        &mut self,
        ch: &CoreChannels,
        clock: &impl Clock,
        cfg: &RunConfig,
    ) -> CycleState {
        let mut next = self.current;
        let delay_ms = u64::from(cfg.cycle.complete_delay_s) * 1000;
        if clock.now_ms().saturating_sub(self.entered_at_ms) >= delay_ms {
            next = CycleState::SampleValidHold;
        }

        // The switch read happens even on the expiring step, and a removed
        // sample still counts as an interrupted run.
        let sample = ch.switch_samples.receive().await;
        if sample_removed(cfg, sample) {
            return self.abort(CycleExit::SensorBreak);
        }
        if let Ok(ButtonEvent::On) = ch.buttons.try_receive() {
            return self.abort(CycleExit::ButtonExit);
        }
        next
    }

    async fn sample_valid_hold(
        &mut self,
        ch: &CoreChannels,
        clock: &impl Clock,
        cfg: &RunConfig,
    ) -> CycleState {
        if self.entering {
            let _ = ch.leds.try_send(LedCommand {
                pattern: LedPattern::Complete,
                active: true,
            });
        }

        let sample = ch.switch_samples.receive().await;
        if sample_removed(cfg, sample) {
            info!("CYCLE: sample taken, run complete");
            let _ = ch.log_events.try_send(LogEvent::RunComplete);
            return self.abort(CycleExit::Complete);
        }

        let hold_ms = u64::from(cfg.cycle.valid_hold_timeout_s) * 1000;
        if clock.now_ms().saturating_sub(self.entered_at_ms) >= hold_ms {
            warn!("CYCLE: sample left too long, invalidated");
            let _ = ch.log_events.try_send(LogEvent::SampleInvalidated);
            return self.abort(CycleExit::SampleInvalidated);
        }

        self.current
    }

    fn exit_cycle(&mut self, ch: &CoreChannels) -> CycleState {
        if self.exit == CycleExit::Running {
            self.exit = CycleExit::Unknown;
        }
        match self.exit {
            CycleExit::Complete => {}
            CycleExit::StartTempTooHigh => {
                let _ = ch.leds.try_send(LedCommand {
                    pattern: LedPattern::Decline,
                    active: true,
                });
                let _ = ch.log_events.try_send(LogEvent::RunInterrupted);
            }
            _ => {
                let _ = ch.leds.try_send(LedCommand {
                    pattern: LedPattern::Abort,
                    active: true,
                });
                let _ = ch.log_events.try_send(LogEvent::RunInterrupted);
            }
        }
        info!("CYCLE: run ended: {:?}", self.exit);
        self.ramped_setpoint = None;
        CycleState::ValidateInit
    }
}

impl Default for CycleSequencer {
    fn default() -> Self {
        Self::new()
    }
}
