//! Per-instance execution context and store management.
//!
//! This module provides:
//! - [`GuestContext`]: Per-instance state accessible from host functions
//! - [`create_store`]: Store construction with memory limits and fuel

use wasmtime::{Store, StoreLimits, StoreLimitsBuilder};
use wasmtime_wasi::pipe::MemoryOutputPipe;
use wasmtime_wasi::preview1::WasiP1Ctx;

use crate::WasmEngine;
use crate::pool::InstanceId;
use crate::wasi::WasiContext;
use guestbox_common::{ExecutionConfig, RuntimeError};

/// Per-instance execution context.
///
/// Lives inside the instance's [`Store`] for as long as the instance does.
/// Host functions reach it through [`wasmtime::Caller`].
pub struct GuestContext {
    /// WASI preview1 context.
    wasi: WasiP1Ctx,

    /// Identifier of the owning instance.
    instance_id: InstanceId,

    /// Resource limits enforced by the store.
    limits: StoreLimits,

    /// Captured stdout.
    stdout: Option<MemoryOutputPipe>,

    /// Captured stderr.
    stderr: Option<MemoryOutputPipe>,
}

impl GuestContext {
    /// Create a new context for `instance_id`.
    pub fn new(instance_id: InstanceId, wasi: WasiContext, execution: &ExecutionConfig) -> Self {
        let limits = StoreLimitsBuilder::new()
            .memory_size(execution.max_memory_bytes())
            .build();

        Self {
            wasi: wasi.ctx,
            instance_id,
            limits,
            stdout: wasi.stdout,
            stderr: wasi.stderr,
        }
    }

    /// Identifier of the owning instance.
    pub fn instance_id(&self) -> InstanceId {
        self.instance_id
    }

    /// The WASI context.
    pub fn wasi_mut(&mut self) -> &mut WasiP1Ctx {
        &mut self.wasi
    }

    /// Captured stdout so far, empty when capture is off.
    pub fn stdout(&self) -> String {
        captured(self.stdout.as_ref())
    }

    /// Captured stderr so far, empty when capture is off.
    pub fn stderr(&self) -> String {
        captured(self.stderr.as_ref())
    }
}

fn captured(pipe: Option<&MemoryOutputPipe>) -> String {
    pipe.map(|p| String::from_utf8_lossy(&p.contents()).into_owned())
        .unwrap_or_default()
}

/// Create a new Wasmtime store for one instance.
///
/// # Errors
///
/// Returns an error if fuel cannot be set on the store.
pub fn create_store(
    engine: &WasmEngine,
    execution: &ExecutionConfig,
    context: GuestContext,
) -> Result<Store<GuestContext>, RuntimeError> {
    let mut store = Store::new(engine.inner(), context);
    store.limiter(|ctx| &mut ctx.limits);

    if engine.is_fuel_enabled() {
        store
            .set_fuel(execution.max_fuel)
            .map_err(|e| RuntimeError::invalid_config(format!("Failed to set fuel: {e}")))?;
    }

    Ok(store)
}

/// Get remaining fuel from a store.
pub fn get_remaining_fuel(store: &Store<GuestContext>) -> Option<u64> {
    store.get_fuel().ok()
}
