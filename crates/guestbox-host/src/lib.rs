//! Reference host functions for guestbox.
//!
//! Guests import these from the `env` namespace. They are ordinary
//! [`guestbox_core::HostFunctionSpec`]s and carry no special status in the runtime.
//!
//! # Functions
//!
//! - [`logging`]: `env.log(level, ptr, len)`, structured logging from guest code

pub mod logging;

pub use logging::{DEFAULT_LOG_CAPACITY, LogEntry, LogLevel, LoggingHost};

use guestbox_core::HostImports;

/// The standard host import set.
///
/// Returns the imports together with the [`LoggingHost`] that records what
/// guests log through them.
pub fn standard_imports() -> (HostImports, LoggingHost) {
    let logging = LoggingHost::new();
    let imports = HostImports::new().function(logging.spec());
    (imports, logging)
}

