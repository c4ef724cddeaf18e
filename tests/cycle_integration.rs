//! Integration tests: cycle sequencer driving the real heater worker.
//!
//! The sequencer and the heater worker run as two cooperatively scheduled
//! futures over the shared channel set, the same way the firmware wires
//! them up. A third scripted future plays the sensor worker where the
//! handshake needs a temperature sample mid-step.

use core::cell::Cell;

use futures_lite::future;

use ampcycle::channels::CoreChannels;
use ampcycle::config::RunConfig;
use ampcycle::cycle::{CycleExit, CycleSequencer, CycleState};
use ampcycle::heater::heater_worker;
use ampcycle::messages::{
    ButtonEvent, DutyCommand, HeaterMsg, LogEvent, SwitchSample, TempSample,
};
use ampcycle::ports::Clock;

// ── Test fixtures ─────────────────────────────────────────────

struct TestClock {
    now: Cell<u64>,
}

impl TestClock {
    fn new() -> Self {
        Self { now: Cell::new(0) }
    }
    fn advance(&self, ms: u64) {
        self.now.set(self.now.get() + ms);
    }
}

impl Clock for TestClock {
    fn now_ms(&self) -> u64 {
        self.now.get()
    }
    fn sleep_ms(&self, ms: u64) -> impl Future<Output = ()> {
        self.advance(ms);
        core::future::ready(())
    }
}

fn engaged() -> SwitchSample {
    SwitchSample {
        hall_engaged: true,
        optical_engaged: true,
    }
}

fn removed() -> SwitchSample {
    SwitchSample {
        hall_engaged: false,
        optical_engaged: false,
    }
}

fn cool_sample() -> TempSample {
    TempSample {
        zones_c: [25.0; 4],
        read_failed: false,
    }
}

fn sample(temp: f32) -> TempSample {
    TempSample {
        zones_c: [temp, 25.0, 25.0, 25.0],
        read_failed: false,
    }
}

fn drain_log(ch: &CoreChannels) -> Vec<LogEvent> {
    let mut events = Vec::new();
    while let Ok(e) = ch.log_events.try_receive() {
        events.push(e);
    }
    events
}

/// Scripted sensor worker: once the output stage powers up for phase 1,
/// feed one cool temperature sample so the pre-run interlock can answer.
async fn prerun_sensor<T>(ch: &CoreChannels) -> T {
    loop {
        if let DutyCommand::Enable = ch.duty.receive().await {
            break;
        }
    }
    ch.heater.send(HeaterMsg::Temperature(cool_sample())).await;
    future::pending().await
}

// ── Full run, four-zone hardware ──────────────────────────────

#[test]
fn full_run_against_real_heater_worker() {
    let ch = CoreChannels::new();
    let clock = TestClock::new();
    let cfg = RunConfig::multi_zone_defaults();

    let drive = async {
        let mut seq = CycleSequencer::new();
        ch.battery_levels.try_send(92).unwrap();
        assert_eq!(seq.step(&ch, &clock, &cfg).await, CycleExit::Running);
        assert_eq!(seq.state(), CycleState::StartPhase1);

        // Enable handshake runs against the real worker; the scripted
        // sensor supplies the interlock sample.
        assert_eq!(seq.step(&ch, &clock, &cfg).await, CycleExit::Running);
        assert_eq!(seq.state(), CycleState::Phase1Timer);

        ch.switch_samples.try_send(engaged()).unwrap();
        let _ = seq.step(&ch, &clock, &cfg).await; // timer entry
        clock.advance(u64::from(cfg.cycle.phase1_duration_s) * 1000);
        let _ = seq.step(&ch, &clock, &cfg).await; // disable handshake
        assert_eq!(seq.state(), CycleState::StartPhase2);

        let _ = seq.step(&ch, &clock, &cfg).await; // enable handshake
        assert_eq!(seq.state(), CycleState::Phase2Timer);

        ch.switch_samples.try_send(engaged()).unwrap();
        let _ = seq.step(&ch, &clock, &cfg).await;
        clock.advance(u64::from(cfg.cycle.phase2_duration_s) * 1000);
        let _ = seq.step(&ch, &clock, &cfg).await;
        assert_eq!(seq.state(), CycleState::CompleteDelay);

        ch.switch_samples.try_send(engaged()).unwrap();
        let _ = seq.step(&ch, &clock, &cfg).await;
        clock.advance(u64::from(cfg.cycle.complete_delay_s) * 1000);
        ch.switch_samples.try_send(engaged()).unwrap();
        let _ = seq.step(&ch, &clock, &cfg).await;
        assert_eq!(seq.state(), CycleState::SampleValidHold);

        ch.switch_samples.try_send(removed()).unwrap();
        let _ = seq.step(&ch, &clock, &cfg).await;
        seq.step(&ch, &clock, &cfg).await
    };

    let exit = future::block_on(future::or(
        drive,
        future::or(prerun_sensor(&ch), async { heater_worker(&ch, &cfg).await }),
    ));
    assert_eq!(exit, CycleExit::Complete);

    let events = drain_log(&ch);
    let expect = [
        LogEvent::RunStarted { battery_percent: 92 },
        LogEvent::Phase1HeatingStarted,
        LogEvent::Phase1HeatingStopped,
        LogEvent::Phase2HeatingStarted,
        LogEvent::Phase2HeatingStopped,
        LogEvent::RunComplete,
    ];
    for e in expect {
        assert!(events.contains(&e), "missing {e:?} in {events:?}");
    }
}

// ── Ramp handshake, single-heater hardware ────────────────────

#[test]
fn single_heater_ramp_completes_through_worker_notification() {
    let ch = CoreChannels::new();
    let clock = TestClock::new();
    let cfg = RunConfig::single_heater_defaults();
    let setpoint = cfg.single.heater[0].setpoint;

    let drive = async {
        let mut seq = CycleSequencer::new();
        ch.battery_levels.try_send(92).unwrap();
        let _ = seq.step(&ch, &clock, &cfg).await;
        let _ = seq.step(&ch, &clock, &cfg).await;
        assert_eq!(seq.state(), CycleState::Phase1RampToTemp);

        // Still below setpoint: stays in the ramp.
        ch.switch_samples.try_send(engaged()).unwrap();
        let _ = seq.step(&ch, &clock, &cfg).await;
        assert_eq!(seq.state(), CycleState::Phase1RampToTemp);

        // The worker sees the setpoint crossed and fires the one-shot
        // notification; the next step picks it up.
        ch.heater
            .send(HeaterMsg::Temperature(sample(setpoint + 1.0)))
            .await;
        future::yield_now().await;
        ch.switch_samples.try_send(engaged()).unwrap();
        let _ = seq.step(&ch, &clock, &cfg).await;
        assert_eq!(seq.state(), CycleState::Phase1Timer);

        // Operator ends the run from the front button.
        ch.switch_samples.try_send(engaged()).unwrap();
        ch.buttons.try_send(ButtonEvent::On).unwrap();
        let _ = seq.step(&ch, &clock, &cfg).await;
        seq.step(&ch, &clock, &cfg).await
    };

    let exit = future::block_on(future::or(
        drive,
        future::or(prerun_sensor(&ch), async { heater_worker(&ch, &cfg).await }),
    ));
    assert_eq!(exit, CycleExit::ButtonExit);
    assert!(drain_log(&ch).contains(&LogEvent::RampComplete));
}

// ── Over-temperature abort ────────────────────────────────────

#[test]
fn worker_over_temp_alarm_aborts_the_run() {
    let ch = CoreChannels::new();
    let clock = TestClock::new();
    let cfg = RunConfig::multi_zone_defaults();

    let drive = async {
        let mut seq = CycleSequencer::new();
        ch.battery_levels.try_send(92).unwrap();
        let _ = seq.step(&ch, &clock, &cfg).await;
        let _ = seq.step(&ch, &clock, &cfg).await;
        assert_eq!(seq.state(), CycleState::Phase1Timer);

        ch.switch_samples.try_send(engaged()).unwrap();
        let _ = seq.step(&ch, &clock, &cfg).await; // timer entry

        // Valve zone runs away past its configured limit.
        ch.heater
            .send(HeaterMsg::Temperature(sample(cfg.multi.max_temp_c[0] + 5.0)))
            .await;
        future::yield_now().await;
        let _ = seq.step(&ch, &clock, &cfg).await;
        seq.step(&ch, &clock, &cfg).await
    };

    let exit = future::block_on(future::or(
        drive,
        future::or(prerun_sensor(&ch), async { heater_worker(&ch, &cfg).await }),
    ));
    assert_eq!(exit, CycleExit::OverTemp);
    assert!(drain_log(&ch).contains(&LogEvent::OverTemperature));
}
