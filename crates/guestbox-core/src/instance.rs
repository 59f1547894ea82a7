//! Running guest instances.
//!
//! A [`GuestInstance`] is what the lifecycle hands back once startup is done.
//! It owns its store exclusively; closing it drops the store and every later
//! operation fails with [`RuntimeError::InstanceClosed`].

use std::fmt;
use std::time::Instant;

use tracing::{debug, info, warn};
use wasmtime::{Memory, Store, Trap, Val};
use wasmtime_wasi::I32Exit;

use crate::abi::MEMORY_EXPORT;
use crate::lifecycle::{EntrypointKind, InstanceState, advance};
use crate::marshal;
use crate::memory::{MemoryRegion, read_memory, write_memory};
use crate::pool::InstanceId;
use crate::store::{GuestContext, get_remaining_fuel};
use guestbox_common::{HostFunctionError, RuntimeError};

/// Engine resources of a live instance.
struct Live {
    store: Store<GuestContext>,
    instance: wasmtime::Instance,
}

impl Live {
    fn memory(&mut self) -> Result<Memory, RuntimeError> {
        self.instance
            .get_memory(&mut self.store, MEMORY_EXPORT)
            .ok_or_else(|| {
                RuntimeError::export_not_found(MEMORY_EXPORT, "module exports no linear memory")
            })
    }
}

/// A guest that finished startup.
pub struct GuestInstance {
    id: InstanceId,
    module_name: String,
    state: InstanceState,
    entrypoints: Vec<EntrypointKind>,
    live: Option<Live>,
}

impl GuestInstance {
    pub(crate) fn new(
        id: InstanceId,
        module_name: String,
        store: Store<GuestContext>,
        instance: wasmtime::Instance,
        entrypoints: Vec<EntrypointKind>,
    ) -> Self {
        Self {
            id,
            module_name,
            state: InstanceState::Ready,
            entrypoints,
            live: Some(Live { store, instance }),
        }
    }

    /// Identifier of this instance.
    pub fn id(&self) -> InstanceId {
        self.id
    }

    /// Name of the module this instance runs.
    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    /// Current lifecycle state.
    pub fn state(&self) -> InstanceState {
        self.state
    }

    /// Entrypoints that ran during startup, in order.
    pub fn entrypoints(&self) -> &[EntrypointKind] {
        &self.entrypoints
    }

    /// Whether [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.state == InstanceState::Closed
    }

    /// Call an exported function with integer arguments.
    ///
    /// # Errors
    ///
    /// - [`RuntimeError::ExportNotFound`] if the export is missing, is not a
    ///   function, or does not use the scalar convention
    /// - [`RuntimeError::FuelExhausted`] if the fuel budget runs out
    /// - [`RuntimeError::HostFunction`] if a host import called by the guest fails
    /// - [`RuntimeError::Trap`] for any other trap
    pub fn call(&mut self, name: &str, args: &[i32]) -> Result<Option<i32>, RuntimeError> {
        let id = self.id;
        let live = self.live()?;

        let func = live
            .instance
            .get_func(&mut live.store, name)
            .ok_or_else(|| RuntimeError::export_not_found(name, "no function export"))?;

        let ty = func.ty(&live.store);
        let arity = marshal::check_scalar_signature(name, &ty)?;
        if ty.params().len() != args.len() {
            return Err(RuntimeError::export_not_found(
                name,
                format!("expects {} arguments, got {}", ty.params().len(), args.len()),
            ));
        }

        let start = Instant::now();
        let mut results = vec![Val::I32(0); arity.count()];
        func.call(&mut live.store, &marshal::encode_args(args), &mut results)
            .map_err(|e| {
                let error = map_call_error(e);
                warn!(instance_id = %id, export = name, error = %error, "Guest call failed");
                error
            })?;

        debug!(
            instance_id = %id,
            export = name,
            duration_us = start.elapsed().as_micros(),
            "Guest call completed"
        );

        marshal::decode_results(name, &results)
    }

    /// Copy `length` bytes at `address` out of the exported memory.
    ///
    /// # Errors
    ///
    /// Fails if the instance exports no memory or the range exceeds its
    /// current size.
    pub fn read(&mut self, address: u32, length: u32) -> Result<Vec<u8>, RuntimeError> {
        let live = self.live()?;
        let memory = live.memory()?;
        read_memory(memory.data(&live.store), MemoryRegion::new(address, length))
    }

    /// Copy `bytes` into the exported memory at `address`.
    ///
    /// Nothing is written unless the whole range fits.
    ///
    /// # Errors
    ///
    /// Fails if the instance exports no memory or the range exceeds its
    /// current size.
    pub fn write(&mut self, address: u32, bytes: &[u8]) -> Result<usize, RuntimeError> {
        let live = self.live()?;
        let memory = live.memory()?;
        write_memory(memory.data_mut(&mut live.store), address, bytes)
    }

    /// Current size of the exported memory in bytes.
    pub fn memory_size(&mut self) -> Result<usize, RuntimeError> {
        let live = self.live()?;
        let memory = live.memory()?;
        Ok(memory.data_size(&live.store))
    }

    /// Captured stdout so far.
    pub fn stdout(&mut self) -> Result<String, RuntimeError> {
        Ok(self.live()?.store.data().stdout())
    }

    /// Captured stderr so far.
    pub fn stderr(&mut self) -> Result<String, RuntimeError> {
        Ok(self.live()?.store.data().stderr())
    }

    /// Fuel left, if metering is on.
    pub fn remaining_fuel(&mut self) -> Result<Option<u64>, RuntimeError> {
        Ok(get_remaining_fuel(&self.live()?.store))
    }

    /// Release engine resources and move to [`InstanceState::Closed`].
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::InstanceClosed`] if already closed.
    pub fn close(&mut self) -> Result<(), RuntimeError> {
        let live = self
            .live
            .take()
            .ok_or_else(|| RuntimeError::instance_closed(self.id))?;
        drop(live);

        advance(self.id, &mut self.state, InstanceState::Closed);
        info!(instance_id = %self.id, module = %self.module_name, "Instance closed");
        Ok(())
    }

    fn live(&mut self) -> Result<&mut Live, RuntimeError> {
        let id = self.id;
        if !self.state.is_accessible() {
            return Err(RuntimeError::instance_closed(id));
        }
        self.live
            .as_mut()
            .ok_or_else(|| RuntimeError::instance_closed(id))
    }
}

impl fmt::Debug for GuestInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuestInstance")
            .field("id", &self.id)
            .field("module", &self.module_name)
            .field("state", &self.state)
            .field("entrypoints", &self.entrypoints)
            .finish_non_exhaustive()
    }
}

/// Render an engine error with its full context chain.
pub(crate) fn describe_error(error: &wasmtime::Error) -> String {
    format!("{error:#}")
}

/// Classify an error raised by a guest call.
pub(crate) fn map_call_error(error: wasmtime::Error) -> RuntimeError {
    if is_out_of_fuel(&error) {
        return RuntimeError::FuelExhausted;
    }
    if let Some(I32Exit(code)) = error.downcast_ref::<I32Exit>() {
        return RuntimeError::trap(format!("guest exited with status {code}"));
    }
    match error.downcast::<HostFunctionError>() {
        Ok(host) => RuntimeError::HostFunction(host),
        Err(error) => RuntimeError::trap(describe_error(&error)),
    }
}

fn is_out_of_fuel(error: &wasmtime::Error) -> bool {
    error
        .downcast_ref::<Trap>()
        .is_some_and(|trap| *trap == Trap::OutOfFuel)
}
