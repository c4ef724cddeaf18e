//! Device supervisor.
//!
//! Top-level state machine owning the instrument's mode: Standby, Running
//! (which drives the [`CycleSequencer`]), FileMode (mass storage exported
//! over USB), Sleep, Alert and Bootloader. One transition per
//! [`DeviceSupervisor::step`]; like the sequencer, Standby and Alert pace
//! themselves on the interlock-switch channel.

use log::{debug, info, warn};

use crate::channels::CoreChannels;
use crate::config::{HardwareVariant, RunConfig};
use crate::cycle::{CycleExit, CycleSequencer};
use crate::messages::{
    ButtonEvent, HeaterMsg, LedCommand, LedPattern, LogEvent, UsbMode, WatchdogReport, WorkerCtl,
    WorkerId,
};
use crate::ports::{BoardPort, Clock, ConfigSource, StorageControl};

/// Instrument modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Standby,
    Running,
    FileMode,
    Sleep,
    Bootloader,
    Alert,
}

/// How long Standby waits for a battery reading each iteration.
const BATTERY_WAIT_MS: u64 = 100;
const BATTERY_POLL_MS: u64 = 10;
/// Liveness report cadence in Standby and Running.
const KICK_PERIOD_MS: u64 = 1000;
/// FileMode iterations between liveness reports.
const FILE_MODE_KICK_EVERY: u32 = 10;
/// FileMode pacing delay.
const FILE_MODE_DELAY_MS: u64 = 100;

pub struct DeviceSupervisor {
    state: DeviceState,
    last: DeviceState,
    cfg: RunConfig,
    sequencer: CycleSequencer,
    /// Latched when a run ends in Alert; blocks new runs until the alert
    /// clears.
    error_during_run: bool,
    alert_entered_ms: u64,
    last_kick_ms: u64,
    file_mode_iters: u32,
    last_battery_percent: u8,
}

impl DeviceSupervisor {
    pub fn new(cfg: RunConfig) -> Self {
        Self {
            state: DeviceState::Standby,
            // Sentinel so the first step runs the Standby entry actions.
            last: DeviceState::Sleep,
            cfg,
            sequencer: CycleSequencer::new(),
            error_during_run: false,
            alert_entered_ms: 0,
            last_kick_ms: 0,
            file_mode_iters: 0,
            last_battery_percent: 0,
        }
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn config(&self) -> &RunConfig {
        &self.cfg
    }

    /// Jump straight to a mode. Diagnostic/service use only; entry actions
    /// still run on the next step.
    pub fn force_state(&mut self, state: DeviceState) {
        self.state = state;
        self.last = if state == DeviceState::Standby {
            DeviceState::Sleep
        } else {
            DeviceState::Standby
        };
    }

    /// Run until the bootloader is requested.
    pub async fn run(
        &mut self,
        ch: &CoreChannels,
        clock: &impl Clock,
        board: &mut impl BoardPort,
        config: &mut impl ConfigSource,
        storage: &mut impl StorageControl,
    ) {
        while self.step(ch, clock, board, config, storage).await {}
    }

    /// Execute one supervisor iteration. Returns `false` once the
    /// bootloader has been entered.
    pub async fn step(
        &mut self,
        ch: &CoreChannels,
        clock: &impl Clock,
        board: &mut impl BoardPort,
        config: &mut impl ConfigSource,
        storage: &mut impl StorageControl,
    ) -> bool {
        let entering = self.last != self.state;
        self.last = self.state;
        match self.state {
            DeviceState::Standby => self.standby(entering, ch, clock, board, config, storage).await,
            DeviceState::Running => self.running(entering, ch, clock).await,
            DeviceState::Alert => self.alert(entering, ch, clock).await,
            DeviceState::FileMode => self.file_mode(entering, ch, clock, storage).await,
            DeviceState::Sleep => self.sleep(ch, board).await,
            DeviceState::Bootloader => {
                info!("STATE: entering bootloader");
                board.enter_bootloader();
                return false;
            }
        }
        true
    }

    fn kick_main(&mut self, ch: &CoreChannels, now_ms: u64) {
        let _ = ch.watchdog_reports.try_send(WatchdogReport {
            worker: WorkerId::Main,
            alive: true,
        });
        self.last_kick_ms = now_ms;
    }

    fn led(&self, ch: &CoreChannels, pattern: LedPattern, active: bool) {
        let _ = ch.leds.try_send(LedCommand { pattern, active });
    }

    /// Reconfigure the USB composite device: release the storage medium,
    /// command the mode, wait for completion, and take the medium back
    /// when only the serial function remains. The mode change itself goes
    /// through even when the storage handover fails; the error is the
    /// caller's to report.
    async fn switch_usb(
        &self,
        mode: UsbMode,
        ch: &CoreChannels,
        storage: &mut impl StorageControl,
    ) -> crate::Result<()> {
        let released = storage.deinit();
        ch.usb_commands.send(mode).await;
        ch.usb_confirm.receive().await;
        released?;
        if mode == UsbMode::SerialOnly {
            storage.init()?;
        }
        Ok(())
    }

    /// Ask the USB worker whether a host is connected.
    async fn usb_connected(&self, ch: &CoreChannels) -> bool {
        let _ = ch.usb_status_requests.try_send(());
        ch.usb_status.receive().await
    }

    // ── Standby ───────────────────────────────────────────────────

    async fn standby(
        &mut self,
        entering: bool,
        ch: &CoreChannels,
        clock: &impl Clock,
        board: &mut impl BoardPort,
        config: &mut impl ConfigSource,
        storage: &mut impl StorageControl,
    ) {
        if entering {
            info!("STATE: standby");
            // The heater is expected idle between runs; park its counter.
            let _ = ch.watchdog_reports.try_send(WatchdogReport {
                worker: WorkerId::Heater,
                alive: false,
            });
            let _ = ch.sensor_ctl.try_send(WorkerCtl::Wake);

            let (cfg, used_defaults) = config.load();
            if used_defaults {
                warn!("STATE: stored configuration unusable, running defaults");
            }
            self.cfg = cfg;
            ch.heater
                .send(HeaterMsg::ConfigUpdated(self.cfg.clone()))
                .await;
            let _ = ch.sensor_ctl.try_send(WorkerCtl::ConfigUpdated);

            if let Some(req) = self.cfg.set_clock.take() {
                info!("STATE: applying clock-set request");
                board.set_rtc(req.unix_seconds);
                if let Err(e) = config.clear_clock_request() {
                    warn!("STATE: could not clear clock request: {e}");
                }
            }

            self.led(ch, LedPattern::Standby, true);
            self.led(ch, LedPattern::Run, false);
            self.led(ch, LedPattern::Complete, false);
            self.kick_main(ch, clock.now_ms());
        }

        // Battery check with a short bounded wait.
        let _ = ch.battery_requests.try_send(());
        let deadline = clock.now_ms() + BATTERY_WAIT_MS;
        loop {
            if let Ok(percent) = ch.battery_levels.try_receive() {
                self.last_battery_percent = percent;
                debug!("STATE: battery at {percent}%");
                break;
            }
            if clock.now_ms() >= deadline {
                break;
            }
            clock.sleep_ms(BATTERY_POLL_MS).await;
        }

        // Button gestures drive the USB / sleep transitions.
        let mut run_button = false;
        match ch.buttons.try_receive() {
            Ok(ButtonEvent::Bootloader) => {
                self.state = DeviceState::Bootloader;
                return;
            }
            Ok(ButtonEvent::On) => run_button = true,
            Ok(ButtonEvent::Off) => {
                if self.usb_connected(ch).await {
                    info!("STATE: host attached, exporting storage");
                    self.led(ch, LedPattern::UsbStarting, true);
                    if let Err(e) = self.switch_usb(UsbMode::MassStorageSerial, ch, storage).await
                    {
                        warn!("STATE: storage handover failed: {e}");
                    }
                    self.state = DeviceState::FileMode;
                } else {
                    if let Err(e) = self.switch_usb(UsbMode::Disabled, ch, storage).await {
                        warn!("STATE: storage handover failed: {e}");
                    }
                    self.state = DeviceState::Sleep;
                }
                return;
            }
            Err(_) => {}
        }

        // Pacing point: wait for the next interlock sample.
        let sample = ch.switch_samples.receive().await;
        let triggered = match self.cfg.variant {
            HardwareVariant::MultiZone => sample.hall_engaged && sample.optical_engaged,
            HardwareVariant::SingleHeater => sample.hall_engaged && run_button,
        };
        if triggered && !self.error_during_run {
            self.state = DeviceState::Running;
            return;
        }
        if triggered && self.error_during_run {
            debug!("STATE: run trigger ignored, alert error still latched");
        }

        let now = clock.now_ms();
        if now.saturating_sub(self.last_kick_ms) >= KICK_PERIOD_MS {
            self.kick_main(ch, now);
        }
    }

    // ── Running ───────────────────────────────────────────────────

    async fn running(&mut self, entering: bool, ch: &CoreChannels, clock: &impl Clock) {
        if entering {
            info!("STATE: running");
            self.sequencer.reset();
            self.led(ch, LedPattern::Run, true);
            self.led(ch, LedPattern::Standby, false);
            self.led(ch, LedPattern::Complete, false);
        }

        let now = clock.now_ms();
        if now.saturating_sub(self.last_kick_ms) >= KICK_PERIOD_MS {
            self.kick_main(ch, now);
            let _ = ch.log_events.try_send(LogEvent::BatteryLevel {
                percent: self.last_battery_percent,
            });
        }

        match self.sequencer.step(ch, clock, &self.cfg).await {
            CycleExit::Running => {}
            CycleExit::Complete => self.state = DeviceState::Standby,
            reason => {
                warn!("STATE: run aborted ({reason:?})");
                self.state = DeviceState::Alert;
            }
        }
    }

    // ── Alert ─────────────────────────────────────────────────────

    async fn alert(&mut self, entering: bool, ch: &CoreChannels, clock: &impl Clock) {
        if entering {
            warn!("STATE: alert");
            self.error_during_run = true;
            self.alert_entered_ms = clock.now_ms();
            self.led(ch, LedPattern::Abort, true);
        }

        let now = clock.now_ms();
        if now.saturating_sub(self.last_kick_ms) >= KICK_PERIOD_MS {
            self.kick_main(ch, now);
        }

        // Keep draining samples so the sensor worker's queue never backs
        // up while the operator reads the fault.
        let _ = ch.switch_samples.receive().await;

        let timeout_ms = u64::from(self.cfg.alert_timeout_s) * 1000;
        if clock.now_ms().saturating_sub(self.alert_entered_ms) >= timeout_ms {
            info!("STATE: alert cleared");
            self.led(ch, LedPattern::ClearAll, true);
            self.error_during_run = false;
            self.state = DeviceState::Standby;
        }
    }

    // ── FileMode ──────────────────────────────────────────────────

    async fn file_mode(
        &mut self,
        entering: bool,
        ch: &CoreChannels,
        clock: &impl Clock,
        storage: &mut impl StorageControl,
    ) {
        if entering {
            info!("STATE: file mode");
            let _ = ch.sensor_ctl.try_send(WorkerCtl::Sleep);
            self.file_mode_iters = 0;
            self.kick_main(ch, clock.now_ms());
        }

        self.file_mode_iters += 1;
        if self.file_mode_iters % FILE_MODE_KICK_EVERY == 0 {
            self.kick_main(ch, clock.now_ms());
        }

        let button = ch.buttons.try_receive().ok();
        if button == Some(ButtonEvent::Bootloader) {
            self.state = DeviceState::Bootloader;
            return;
        }
        let connected = self.usb_connected(ch).await;

        let change = match (button, connected) {
            (Some(ButtonEvent::On), true) => Some((UsbMode::SerialOnly, DeviceState::Standby)),
            (Some(ButtonEvent::On), false) => Some((UsbMode::Disabled, DeviceState::Standby)),
            (Some(ButtonEvent::Off), false) => Some((UsbMode::Disabled, DeviceState::Sleep)),
            // Host went away without a gesture: storage is ours again.
            (None, false) => Some((UsbMode::Disabled, DeviceState::Standby)),
            // Off with a host attached, or no gesture with a host
            // attached: keep serving files.
            _ => None,
        };
        if let Some((mode, next)) = change {
            if let Err(e) = self.switch_usb(mode, ch, storage).await {
                warn!("STATE: storage handover failed: {e}");
            }
            self.state = next;
        }

        clock.sleep_ms(FILE_MODE_DELAY_MS).await;
    }

    // ── Sleep ─────────────────────────────────────────────────────

    async fn sleep(&mut self, ch: &CoreChannels, board: &mut impl BoardPort) {
        info!("STATE: sleeping");
        self.led(ch, LedPattern::ClearAll, true);
        let _ = ch.sensor_ctl.try_send(WorkerCtl::Sleep);
        let _ = ch.battery_ctl.try_send(WorkerCtl::Sleep);
        let _ = ch.button_ctl.try_send(WorkerCtl::Sleep);
        let _ = ch.usb_ctl.try_send(WorkerCtl::Sleep);
        let _ = ch.composite_ctl.try_send(WorkerCtl::Sleep);
        ch.heater.send(HeaterMsg::Sleep).await;
        board.sensor_rail(false);

        let source = ch.wake_events.receive().await;
        info!("STATE: woke up ({source:?})");

        self.led(ch, LedPattern::Wakeup, true);
        board.sensor_rail(true);
        let _ = ch.sensor_ctl.try_send(WorkerCtl::Wake);
        let _ = ch.battery_ctl.try_send(WorkerCtl::Wake);
        let _ = ch.button_ctl.try_send(WorkerCtl::Wake);
        let _ = ch.usb_ctl.try_send(WorkerCtl::Wake);
        let _ = ch.composite_ctl.try_send(WorkerCtl::Wake);
        ch.heater.send(HeaterMsg::Wake).await;
        self.state = DeviceState::Standby;
    }
}
