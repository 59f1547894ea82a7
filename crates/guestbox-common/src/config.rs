//! Configuration structures for guestbox.
//!
//! This module defines configuration options for the various components:
//! - [`RuntimeConfig`]: Top-level configuration containing all settings
//! - [`EngineConfig`]: Wasmtime engine settings (pooling, fuel, caching)
//! - [`ExecutionConfig`]: Per-instance limits (fuel, memory)
//! - [`WasiConfig`]: The WASI capability surface handed to every guest

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level runtime configuration.
///
/// One `RuntimeConfig` is consumed by each runtime. It can be loaded from
/// TOML or JSON, or assembled in code.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RuntimeConfig {
    /// Wasmtime engine configuration.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Per-instance execution limits.
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// WASI sandbox configuration.
    #[serde(default)]
    pub wasi: WasiConfig,
}

/// Wasmtime engine configuration.
///
/// These settings affect the process-wide engine, including memory
/// allocation strategy and compilation caching.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Enable pooling allocator for fast instance creation.
    ///
    /// When enabled, memory is pre-reserved for a pool of instances. This
    /// trades virtual address space for instantiation latency.
    #[serde(default = "defaults::pooling_allocator")]
    pub pooling_allocator: bool,

    /// Maximum concurrent instances in the pool.
    ///
    /// Only effective when `pooling_allocator` is enabled.
    #[serde(default = "defaults::max_instances")]
    pub max_instances: u32,

    /// Memory per instance slot in megabytes.
    ///
    /// Only effective when `pooling_allocator` is enabled.
    #[serde(default = "defaults::instance_memory_mb")]
    pub instance_memory_mb: u32,

    /// Enable fuel metering.
    ///
    /// When enabled, every instance store is charged fuel and traps once
    /// `ExecutionConfig::max_fuel` is spent.
    #[serde(default = "defaults::fuel_metering")]
    pub fuel_metering: bool,

    /// Path to a Wasmtime cache configuration file.
    ///
    /// When set, compiled code is cached on disk across processes.
    #[serde(default)]
    pub cache_config: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pooling_allocator: defaults::pooling_allocator(),
            max_instances: defaults::max_instances(),
            instance_memory_mb: defaults::instance_memory_mb(),
            fuel_metering: defaults::fuel_metering(),
            cache_config: None,
        }
    }
}

/// Per-instance execution limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecutionConfig {
    /// Fuel granted to each instance when metering is enabled.
    ///
    /// The budget covers the whole life of the instance, start-up included.
    #[serde(default = "defaults::max_fuel")]
    pub max_fuel: u64,

    /// Maximum linear memory in megabytes.
    ///
    /// `memory.grow` beyond this limit fails inside the guest.
    #[serde(default = "defaults::max_memory_mb")]
    pub max_memory_mb: u32,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_fuel: defaults::max_fuel(),
            max_memory_mb: defaults::max_memory_mb(),
        }
    }
}

impl ExecutionConfig {
    /// Get the memory limit in bytes.
    pub fn max_memory_bytes(&self) -> usize {
        (self.max_memory_mb as usize) * 1024 * 1024
    }
}

/// WASI sandbox configuration.
///
/// Immutable once handed to a runtime. Maps keep their keys unique and give
/// a stable iteration order.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct WasiConfig {
    /// Program name exposed as `argv[0]`.
    ///
    /// Defaults to the module name when unset.
    #[serde(default)]
    pub program_name: Option<String>,

    /// Arguments following the program name.
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment variables.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Directory mappings, guest-visible name to host path.
    #[serde(default)]
    pub directories: BTreeMap<String, PathBuf>,

    /// Capture guest stdout instead of inheriting the host's.
    #[serde(default)]
    pub capture_stdout: bool,

    /// Capture guest stderr instead of inheriting the host's.
    #[serde(default)]
    pub capture_stderr: bool,

    /// Maximum bytes kept per captured stream.
    #[serde(default = "defaults::capture_limit_bytes")]
    pub capture_limit_bytes: usize,

    /// Host directory pre-opened as the guest's `.`.
    #[serde(default)]
    pub workdir: Option<PathBuf>,
}

impl Default for WasiConfig {
    fn default() -> Self {
        Self {
            program_name: None,
            args: Vec::new(),
            env: BTreeMap::new(),
            directories: BTreeMap::new(),
            capture_stdout: false,
            capture_stderr: false,
            capture_limit_bytes: defaults::capture_limit_bytes(),
            workdir: None,
        }
    }
}

impl WasiConfig {
    /// Create an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Set an environment variable, replacing any previous value.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Map a host directory under a guest-visible name.
    #[must_use]
    pub fn map_directory(mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.directories.insert(name.into(), path.into());
        self
    }

    /// Capture both stdout and stderr.
    #[must_use]
    pub fn capture_stdio(mut self) -> Self {
        self.capture_stdout = true;
        self.capture_stderr = true;
        self
    }

    /// Pre-open a working directory.
    #[must_use]
    pub fn workdir(mut self, path: impl Into<PathBuf>) -> Self {
        self.workdir = Some(path.into());
        self
    }
}

/// Default value functions for serde.
mod defaults {
    pub const fn pooling_allocator() -> bool {
        false
    }

    pub const fn max_instances() -> u32 {
        1000
    }

    pub const fn instance_memory_mb() -> u32 {
        64
    }

    pub const fn fuel_metering() -> bool {
        false
    }

    pub const fn max_fuel() -> u64 {
        10_000_000
    }

    pub const fn max_memory_mb() -> u32 {
        128
    }

    pub const fn capture_limit_bytes() -> usize {
        1024 * 1024
    }
}
