//! Common types and errors for guestbox.
//!
//! This crate provides shared functionality used across the guestbox workspace:
//! - Error types using `thiserror` for type-safe error handling
//! - Configuration structures for the engine, execution limits and the WASI sandbox
//! - TOML configuration file loading

pub mod config;
pub mod config_file;
pub mod error;

pub use config::{EngineConfig, ExecutionConfig, RuntimeConfig, WasiConfig};
pub use config_file::{ConfigFile, ConfigFileError};
pub use error::{HostFunctionError, RuntimeError, WasiError};
