//! Watchdog liveness monitor.
//!
//! Workers report liveness over the watchdog channel; the monitor keeps a
//! valid flag and an elapsed-tick counter per tracked worker. Every tick
//! period it increments the counters of valid workers and feeds the
//! hardware dead-man timer only while every tracked counter is under the
//! limit. A worker that reports `alive: false` parks its counter, so an
//! intentionally idle worker (the heater between runs) never blocks the
//! feed.
//!
//! Only the main, heater and battery workers are tracked; reports from
//! anything else are ignored.

use log::warn;

use crate::channels::CoreChannels;
use crate::messages::{WatchdogReport, WorkerId};
use crate::ports::{Clock, WatchdogHardware};

/// Monitor tick period.
pub const TICK_PERIOD_MS: u64 = 500;
/// Ticks without a report before the feed is withheld (3 s).
pub const MAX_TIMEOUT_TICKS: u32 = 6;

const TRACKED: usize = 3;

#[derive(Debug, Clone, Copy, Default)]
struct WorkerEntry {
    valid: bool,
    ticks: u32,
}

/// Pure liveness bookkeeping, separated from the worker loop for tests.
#[derive(Debug, Default)]
pub struct LivenessMonitor {
    entries: [WorkerEntry; TRACKED],
}

fn slot(worker: WorkerId) -> Option<usize> {
    match worker {
        WorkerId::Main => Some(0),
        WorkerId::Heater => Some(1),
        WorkerId::Battery => Some(2),
        _ => None,
    }
}

impl LivenessMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a report: the counter restarts and the valid flag follows
    /// the report.
    pub fn on_report(&mut self, report: WatchdogReport) {
        if let Some(i) = slot(report.worker) {
            self.entries[i].valid = report.alive;
            self.entries[i].ticks = 0;
        }
    }

    /// Advance one tick period. Returns whether the hardware timer may be
    /// fed: every tracked counter must still be under the limit.
    pub fn tick(&mut self) -> bool {
        for entry in &mut self.entries {
            if entry.valid {
                entry.ticks += 1;
            }
        }
        self.entries.iter().all(|e| e.ticks < MAX_TIMEOUT_TICKS)
    }
}

/// Watchdog worker loop: drain reports, tick, feed.
pub async fn watchdog_worker(
    ch: &CoreChannels,
    clock: &impl Clock,
    hw: &mut impl WatchdogHardware,
) -> ! {
    let mut monitor = LivenessMonitor::new();
    loop {
        while let Ok(report) = ch.watchdog_reports.try_receive() {
            monitor.on_report(report);
        }
        if monitor.tick() {
            hw.feed();
        } else {
            warn!("WDT: a worker stopped reporting, withholding feed");
        }
        clock.sleep_ms(TICK_PERIOD_MS).await;
    }
}


#[cfg(all(test, not(target_os = "espidf")))]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn any_worker() -> impl Strategy<Value = WorkerId> {
        prop_oneof![
            Just(WorkerId::Main),
            Just(WorkerId::Heater),
            Just(WorkerId::Battery),
            Just(WorkerId::Sensor),
            Just(WorkerId::Logger),
        ]
    }

    proptest! {
        /// Feeding is exactly the AND over tracked workers of
        /// "not (valid and silent for the limit)".
        #[test]
        fn feed_gate_matches_reference_model(
            steps in proptest::collection::vec(
                prop_oneof![
                    (any_worker(), any::<bool>()).prop_map(Some),
                    Just(None), // a tick with no report
                ],
                1..200,
            ),
        ) {
            let mut m = LivenessMonitor::new();
            // Reference model: (valid, ticks) per tracked worker.
            let mut model = [(false, 0u32); 3];
            for step in steps {
                if let Some((worker, alive)) = step {
                    m.on_report(WatchdogReport { worker, alive });
                    if let Some(i) = super::slot(worker) {
                        model[i] = (alive, 0);
                    }
                } else {
                    for e in &mut model {
                        if e.0 {
                            e.1 += 1;
                        }
                    }
                    let expected = model.iter().all(|e| e.1 < MAX_TIMEOUT_TICKS);
                    prop_assert_eq!(m.tick(), expected);
                }
            }
        }
    }
}
