//! Logging host function implementation.
//!
//! Guests call `env.log(level: i32, ptr: i32, len: i32)` to emit a message.
//! The message is read out of the caller's own memory, emitted via `tracing`
//! and recorded for later retrieval. The record is a ring: once it holds
//! [`DEFAULT_LOG_CAPACITY`] entries (or the capacity given to
//! [`LoggingHost::with_capacity`]), the oldest entry is dropped.
//!
//! # Memory Protocol
//!
//! - `level`: Log level (0=debug, 1=info, 2=warn, 3=error)
//! - `ptr`: Pointer to the message in guest memory
//! - `len`: Length of the message in bytes (UTF-8)

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use guestbox_common::HostFunctionError;
use guestbox_core::{HostCaller, HostFunctionSpec, InstanceId, MemoryRegion, ResultArity};

/// Import name of the logging function.
pub const LOG_FUNCTION: &str = "log";

/// Entries kept by [`LoggingHost::new`].
pub const DEFAULT_LOG_CAPACITY: usize = 1024;

/// Severity of a guest log message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug.
    Debug,
    /// Info.
    Info,
    /// Warn.
    Warn,
    /// Error.
    Error,
}

/// One message logged by a guest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// The instance that logged the message.
    pub instance_id: InstanceId,
    /// Severity.
    pub level: LogLevel,
    /// Message text, lossily decoded as UTF-8.
    pub message: String,
}

/// Host implementation for the logging import.
///
/// Cloning shares the recorded entries, so one `LoggingHost` can serve any
/// number of instances and still be inspected afterwards.
#[derive(Debug, Clone)]
pub struct LoggingHost {
    entries: Arc<Mutex<VecDeque<LogEntry>>>,
    capacity: usize,
}

impl Default for LoggingHost {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_LOG_CAPACITY)
    }
}

impl LoggingHost {
    /// Create a host keeping the last [`DEFAULT_LOG_CAPACITY`] entries.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a host keeping at most `capacity` entries (at least one).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    /// Maximum number of retained entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The `env.log` import backed by this host.
    pub fn spec(&self) -> HostFunctionSpec {
        let host = self.clone();
        HostFunctionSpec::new(LOG_FUNCTION, 3, ResultArity::None, move |caller, args| {
            host.handle(caller, args)
        })
    }

    /// Record and emit a message.
    pub fn log(&self, instance_id: InstanceId, level: LogLevel, message: &str) {
        match level {
            LogLevel::Debug => debug!(%instance_id, guest_log = true, "{}", message),
            LogLevel::Info => info!(%instance_id, guest_log = true, "{}", message),
            LogLevel::Warn => warn!(%instance_id, guest_log = true, "{}", message),
            LogLevel::Error => error!(%instance_id, guest_log = true, "{}", message),
        }

        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(LogEntry {
            instance_id,
            level,
            message: message.to_string(),
        });
    }

    /// Retained entries, oldest first.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Entries logged by one instance.
    pub fn entries_for(&self, instance_id: InstanceId) -> Vec<LogEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.instance_id == instance_id)
            .cloned()
            .collect()
    }

    /// Remove and return the entries logged by one instance.
    pub fn take_for(&self, instance_id: InstanceId) -> Vec<LogEntry> {
        let mut entries = self.entries.lock();
        let mut taken = Vec::new();
        entries.retain(|e| {
            if e.instance_id == instance_id {
                taken.push(e.clone());
                false
            } else {
                true
            }
        });
        taken
    }

    /// Drop every retained entry.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    fn handle(
        &self,
        caller: &mut HostCaller<'_>,
        args: &[i32],
    ) -> Result<Option<i32>, HostFunctionError> {
        let &[level, ptr, len] = args else {
            return Err(HostFunctionError::InvalidArgument {
                reason: format!("log expects 3 arguments, got {}", args.len()),
            });
        };

        let bytes = caller.read(MemoryRegion::from_wire(ptr, len)?)?;
        let message = String::from_utf8_lossy(&bytes);

        self.log(caller.instance_id(), level_from_i32(level), &message);
        Ok(None)
    }
}

/// Convert a numeric log level to [`LogLevel`].
///
/// Unknown values map to [`LogLevel::Info`].
pub fn level_from_i32(level: i32) -> LogLevel {
    match level {
        0 => LogLevel::Debug,
        2 => LogLevel::Warn,
        3 => LogLevel::Error,
        _ => LogLevel::Info,
    }
}

/// Convert a [`LogLevel`] to its numeric value.
pub fn level_to_i32(level: LogLevel) -> i32 {
    match level {
        LogLevel::Debug => 0,
        LogLevel::Info => 1,
        LogLevel::Warn => 2,
        LogLevel::Error => 3,
    }
}
