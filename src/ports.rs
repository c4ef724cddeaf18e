//! Hardware and platform ports.
//!
//! The control core is pure logic; everything the platform provides comes
//! through these traits. Production adapters wrap the board support
//! package, tests substitute mocks.

use core::fmt;

use crate::config::RunConfig;

/// Monotonic time source plus the only way the core ever sleeps.
pub trait Clock {
    /// Milliseconds since boot.
    fn now_ms(&self) -> u64;
    /// Suspend the calling worker for at least `ms` milliseconds.
    fn sleep_ms(&self, ms: u64) -> impl Future<Output = ()>;
}

/// Configuration loading.
pub trait ConfigSource {
    /// Load the run configuration. Returns the configuration and whether
    /// defaults were substituted because the stored copy was missing or
    /// unreadable.
    fn load(&mut self) -> (RunConfig, bool);
    /// Clear a pending clock-set request after it has been applied.
    fn clear_clock_request(&mut self) -> Result<(), ConfigError>;
}

/// Removable-storage lifecycle, used when handing the medium to the USB
/// host and taking it back.
pub trait StorageControl {
    fn deinit(&mut self) -> Result<(), StorageError>;
    fn init(&mut self) -> Result<(), StorageError>;
}

/// Miscellaneous board controls owned by the supervisor.
pub trait BoardPort {
    /// Switch the sensor power rail.
    fn sensor_rail(&mut self, on: bool);
    /// Set the real-time clock.
    fn set_rtc(&mut self, unix_seconds: u64);
    /// Write the bootloader magic and reset. Does not return on hardware;
    /// mocks record the call.
    fn enter_bootloader(&mut self);
}

/// The hardware dead-man timer.
pub trait WatchdogHardware {
    /// Pet the timer. Missing this long enough resets the board.
    fn feed(&mut self);
}

/// Run-log output on removable storage.
pub trait LogSink {
    /// Open a fresh log file for a new run.
    fn start_log_file(&mut self, now_ms: u64) -> Result<(), StorageError>;
    /// Append one formatted record.
    fn append_line(&mut self, line: &str) -> Result<(), StorageError>;
}

/// Errors from [`ConfigSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    NotFound,
    Corrupt,
    Io,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "configuration not found"),
            Self::Corrupt => write!(f, "configuration corrupt"),
            Self::Io => write!(f, "configuration I/O error"),
        }
    }
}

/// Errors from [`StorageControl`] and [`LogSink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    NotReady,
    WriteFailed,
    InitFailed,
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotReady => write!(f, "storage not ready"),
            Self::WriteFailed => write!(f, "storage write failed"),
            Self::InitFailed => write!(f, "storage init failed"),
        }
    }
}
