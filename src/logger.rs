//! Run logger.
//!
//! Consumes [`LogEvent`]s and writes one comma-separated record per event
//! through the [`LogSink`] port. Storage trouble is logged and counted but
//! never stops a run; the instrument keeps cycling with a dead log file.

use core::fmt::Write as _;

use heapless::String;
use log::{info, warn};

use crate::channels::CoreChannels;
use crate::messages::LogEvent;
use crate::ports::{Clock, LogSink};

/// Maximum formatted record length. Sample records carry four
/// temperatures, five duties and a motor speed.
const LINE_CAP: usize = 192;

/// Logger worker state, kept separate from the loop for tests.
#[derive(Debug, Default)]
pub struct Logger {
    storage_errors: u32,
}

impl Logger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consecutive-or-not count of failed sink writes so far.
    pub fn storage_errors(&self) -> u32 {
        self.storage_errors
    }

    fn format(event: &LogEvent, now_ms: u64) -> String<LINE_CAP> {
        let mut line: String<LINE_CAP> = String::new();
        // A full record always fits in LINE_CAP; a formatting error would
        // only truncate the line, never corrupt earlier records.
        let _ = match event {
            LogEvent::Sample {
                temps,
                duties,
                motor_rpm,
            } => {
                let t = &temps.zones_c;
                let d = &duties.zones;
                write!(
                    line,
                    "{now_ms},DATA,{:.2},{:.2},{:.2},{:.2},{:.1},{:.1},{:.1},{:.1},{:.1},{:.0}",
                    t[0], t[1], t[2], t[3], d[0], d[1], d[2], d[3], duties.motor, motor_rpm,
                )
            }
            LogEvent::BatteryLevel { percent } => {
                write!(line, "{now_ms},BATT,{percent}")
            }
            LogEvent::RunStarted { battery_percent } => {
                write!(line, "{now_ms},EVENT,{} ({battery_percent}%)", event.text())
            }
            LogEvent::PowerLow { battery_percent }
            | LogEvent::RecoveryPowerLow { battery_percent } => {
                write!(line, "{now_ms},EVENT,{} ({battery_percent}%)", event.text())
            }
            other => write!(line, "{now_ms},EVENT,{}", other.text()),
        };
        line
    }

    /// Handle one event: open a fresh file on run start, then append.
    pub fn handle(&mut self, event: &LogEvent, now_ms: u64, sink: &mut impl LogSink) {
        if matches!(event, LogEvent::RunStarted { .. }) {
            if let Err(e) = sink.start_log_file(now_ms) {
                warn!("LOGGER: could not open log file: {e}");
                self.storage_errors += 1;
            }
        }
        let line = Self::format(event, now_ms);
        match sink.append_line(&line) {
            Ok(()) => {
                if !matches!(event, LogEvent::Sample { .. }) {
                    info!("LOGGER: {line}");
                }
            }
            Err(e) => {
                warn!("LOGGER: write failed: {e}");
                self.storage_errors += 1;
            }
        }
    }
}

/// Logger worker loop.
pub async fn logger_worker(ch: &CoreChannels, clock: &impl Clock, sink: &mut impl LogSink) -> ! {
    let mut logger = Logger::new();
    loop {
        let event = ch.log_events.receive().await;
        logger.handle(&event, clock.now_ms(), sink);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{DutyVector, TempSample};
    use crate::ports::StorageError;

    #[derive(Default)]
    struct MemSink {
        lines: Vec<std::string::String>,
        files_started: u32,
        fail_writes: bool,
    }

    impl LogSink for MemSink {
        fn start_log_file(&mut self, _now_ms: u64) -> Result<(), StorageError> {
            self.files_started += 1;
            Ok(())
        }
        fn append_line(&mut self, line: &str) -> Result<(), StorageError> {
            if self.fail_writes {
                return Err(StorageError::WriteFailed);
            }
            self.lines.push(line.into());
            Ok(())
        }
    }

    #[test]
    fn run_start_opens_a_fresh_file() {
        let mut logger = Logger::new();
        let mut sink = MemSink::default();
        logger.handle(
            &LogEvent::RunStarted { battery_percent: 80 },
            1000,
            &mut sink,
        );
        assert_eq!(sink.files_started, 1);
        assert_eq!(sink.lines.len(), 1);
        assert!(sink.lines[0].starts_with("1000,EVENT,run started"));
        assert!(sink.lines[0].contains("80%"));
    }

    #[test]
    fn sample_record_is_machine_readable() {
        let mut logger = Logger::new();
        let mut sink = MemSink::default();
        logger.handle(
            &LogEvent::Sample {
                temps: TempSample {
                    zones_c: [95.0, 64.5, 64.5, 64.5],
                    read_failed: false,
                },
                duties: DutyVector {
                    zones: [30.0, 12.5, 12.5, 12.5],
                    motor: 0.0,
                },
                motor_rpm: 0.0,
            },
            2500,
            &mut sink,
        );
        let fields: Vec<&str> = sink.lines[0].split(',').collect();
        assert_eq!(fields[0], "2500");
        assert_eq!(fields[1], "DATA");
        assert_eq!(fields.len(), 12);
    }

    #[test]
    fn storage_failure_is_counted_not_fatal() {
        let mut logger = Logger::new();
        let mut sink = MemSink {
            fail_writes: true,
            ..Default::default()
        };
        logger.handle(&LogEvent::RunComplete, 10, &mut sink);
        logger.handle(&LogEvent::OverTemperature, 20, &mut sink);
        assert_eq!(logger.storage_errors(), 2);
        // Recovery: once the sink works again, records flow.
        sink.fail_writes = false;
        logger.handle(&LogEvent::RunComplete, 30, &mut sink);
        assert_eq!(sink.lines.len(), 1);
        assert_eq!(logger.storage_errors(), 2);
    }
}
