//! Reserved symbol names of the guest application binary interface.
//!
//! See <https://github.com/WebAssembly/WASI/blob/main/legacy/application-abi.md>.

/// Namespace host imports are installed under.
pub const HOST_NAMESPACE: &str = "env";

/// Namespace WASI preview1 claims for its own imports.
pub const WASI_NAMESPACE: &str = "wasi_snapshot_preview1";

/// Default export the engine treats as a command entrypoint.
pub const DEFAULT_EXPORT: &str = "";

/// Command entrypoint, run once during instantiation.
pub const START_FUNCTION: &str = "_start";

/// Reactor entrypoint, run once after any command entrypoint.
pub const INITIALIZE_FUNCTION: &str = "_initialize";

/// The guest's exported linear memory.
pub const MEMORY_EXPORT: &str = "memory";

/// Command entrypoint probes, highest priority first.
pub const START_PROBES: [&str; 2] = [DEFAULT_EXPORT, START_FUNCTION];
