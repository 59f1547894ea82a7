//! Error types for guestbox.
//!
//! This module defines a hierarchy of error types using `thiserror`:
//! - [`RuntimeError`]: Top-level errors for the runtime
//! - [`HostFunctionError`]: Errors from host function implementations
//! - [`WasiError`]: WASI environment construction errors

use std::io;

use thiserror::Error;

/// Top-level runtime errors.
///
/// Every failure between compiling a guest and the last call into it is
/// reported as one of these variants. Nothing is retried.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// WebAssembly compilation failed.
    #[error("Compilation failed: {reason}")]
    CompilationFailed {
        /// Description of the compilation failure.
        reason: String,
    },

    /// The WASI environment could not be constructed.
    #[error("WASI error: {0}")]
    Wasi(#[from] WasiError),

    /// Host imports could not be registered with the engine.
    #[error("Import binding failed for '{namespace}::{name}': {reason}")]
    ImportBinding {
        /// Import namespace.
        namespace: String,
        /// Import name.
        name: String,
        /// Description of the failure.
        reason: String,
    },

    /// The engine rejected the module and import combination.
    #[error("Instantiation failed: {reason}")]
    InstantiationFailed {
        /// Description of the failure.
        reason: String,
    },

    /// A start or initialize entrypoint exists but failed.
    #[error("Entrypoint '{symbol}' failed: {reason}")]
    EntrypointFailed {
        /// The entrypoint symbol.
        symbol: String,
        /// Description of the failure.
        reason: String,
    },

    /// A named export is missing or has an unsupported shape.
    #[error("Export '{name}' unavailable: {reason}")]
    ExportNotFound {
        /// Export name.
        name: String,
        /// Why the export could not be used.
        reason: String,
    },

    /// A memory access fell outside the current linear memory.
    #[error(
        "Memory access out of bounds: {length} bytes at {address} (memory size {memory_size})"
    )]
    MemoryOutOfBounds {
        /// Start address of the access.
        address: u64,
        /// Length of the access in bytes.
        length: u64,
        /// Memory size at the time of the access.
        memory_size: usize,
    },

    /// A copy moved fewer bytes than requested.
    #[error("Short memory copy: expected {expected} bytes, moved {actual}")]
    ShortCopy {
        /// Bytes requested.
        expected: usize,
        /// Bytes actually moved.
        actual: usize,
    },

    /// No instance is registered under the identifier.
    #[error("Instance not found: {instance_id}")]
    InstanceNotFound {
        /// The identifier that was looked up.
        instance_id: String,
    },

    /// An instance is already registered under the identifier.
    #[error("Instance already registered: {instance_id}")]
    InstanceExists {
        /// The conflicting identifier.
        instance_id: String,
    },

    /// The instance was closed and rejects further operations.
    #[error("Instance closed: {instance_id}")]
    InstanceClosed {
        /// The closed instance.
        instance_id: String,
    },

    /// Execution exhausted the configured fuel limit.
    #[error("Fuel exhausted: CPU limit exceeded")]
    FuelExhausted,

    /// A host function returned an error.
    #[error("Host function error: {0}")]
    HostFunction(#[from] HostFunctionError),

    /// A WebAssembly trap occurred during an exported call.
    #[error("Wasm trap: {message}")]
    Trap {
        /// Description of the trap.
        message: String,
    },

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Invalid configuration was provided.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the configuration error.
        reason: String,
    },
}

/// Errors raised by host callables.
///
/// A host function returning one of these aborts the guest call that
/// invoked it; no partial result crosses the boundary.
#[derive(Error, Debug)]
pub enum HostFunctionError {
    /// Invalid argument was passed to a host function.
    #[error("Invalid argument: {reason}")]
    InvalidArgument {
        /// Description of why the argument was invalid.
        reason: String,
    },

    /// The host function returned a value count that does not match its signature.
    #[error("Function '{function}' declared {declared} result(s) but returned {returned}")]
    ResultArity {
        /// The host function name.
        function: String,
        /// Declared result count.
        declared: usize,
        /// Result count actually produced.
        returned: usize,
    },

    /// A wire value was not a 32-bit integer.
    #[error("Function '{function}' argument {index} is not an i32")]
    UnsupportedValue {
        /// The host function name.
        function: String,
        /// Position of the offending argument.
        index: usize,
    },

    /// Access to the caller's memory failed.
    #[error("Guest memory access failed: {reason}")]
    Memory {
        /// Description of the memory failure.
        reason: String,
    },

    /// Failure inside the host function's own logic.
    #[error("{0}")]
    Failed(String),
}

/// WASI-related errors.
///
/// These occur while building the sandbox a guest runs in.
#[derive(Error, Debug)]
pub enum WasiError {
    /// A directory could not be pre-opened.
    #[error("Failed to map directory '{guest}' -> '{host}': {reason}")]
    DirectoryMapping {
        /// Guest-visible name.
        guest: String,
        /// Host path.
        host: String,
        /// Description of the failure.
        reason: String,
    },

    /// WASI environment configuration error.
    #[error("WASI environment error: {reason}")]
    EnvironmentError {
        /// Description of the environment error.
        reason: String,
    },
}

impl RuntimeError {
    /// Create a new `CompilationFailed` error.
    pub fn compilation_failed(reason: impl Into<String>) -> Self {
        Self::CompilationFailed {
            reason: reason.into(),
        }
    }

    /// Create a new `ImportBinding` error.
    pub fn import_binding(
        namespace: impl Into<String>,
        name: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::ImportBinding {
            namespace: namespace.into(),
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a new `InstantiationFailed` error.
    pub fn instantiation_failed(reason: impl Into<String>) -> Self {
        Self::InstantiationFailed {
            reason: reason.into(),
        }
    }

    /// Create a new `EntrypointFailed` error.
    pub fn entrypoint_failed(symbol: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::EntrypointFailed {
            symbol: symbol.into(),
            reason: reason.into(),
        }
    }

    /// Create a new `ExportNotFound` error.
    pub fn export_not_found(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ExportNotFound {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a new `InstanceNotFound` error.
    pub fn instance_not_found(instance_id: impl ToString) -> Self {
        Self::InstanceNotFound {
            instance_id: instance_id.to_string(),
        }
    }

    /// Create a new `InstanceClosed` error.
    pub fn instance_closed(instance_id: impl ToString) -> Self {
        Self::InstanceClosed {
            instance_id: instance_id.to_string(),
        }
    }

    /// Create a new `Trap` error.
    pub fn trap(message: impl Into<String>) -> Self {
        Self::Trap {
            message: message.into(),
        }
    }

    /// Create a new `InvalidConfig` error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Returns `true` if this error indicates an instance lookup miss.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::InstanceNotFound { .. })
    }

    /// Returns `true` if this error came from a linear memory access.
    pub fn is_memory_error(&self) -> bool {
        matches!(
            self,
            Self::MemoryOutOfBounds { .. } | Self::ShortCopy { .. }
        ) || matches!(self, Self::ExportNotFound { name, .. } if name == "memory")
    }

    /// Returns `true` if this error is fatal to instance creation.
    pub fn is_instantiation_error(&self) -> bool {
        matches!(
            self,
            Self::ImportBinding { .. }
                | Self::InstantiationFailed { .. }
                | Self::EntrypointFailed { .. }
                | Self::Wasi(_)
        )
    }
}

impl HostFunctionError {
    /// Create a new `Failed` error.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}
