//! Instance lifecycle: linking, instantiation and ABI startup.
//!
//! ```text
//! Uninstantiated ──link──▶ Instantiated ──_start──▶ Started ──_initialize──▶ Ready ──close──▶ Closed
//!                               │                                            ▲
//!                               └──────────── (no _start) ───────────────────┘
//! ```
//!
//! The command entrypoint is probed first, then the reactor entrypoint. Each
//! runs at most once, with no arguments. A missing entrypoint is not an error;
//! a failing one discards the whole instance.

use std::fmt;
use std::time::Instant;

use tracing::{debug, info, instrument};
use wasmtime::{Linker, Store};
use wasmtime_wasi::I32Exit;
use wasmtime_wasi::preview1;

use crate::WasmEngine;
use crate::abi::{INITIALIZE_FUNCTION, START_PROBES, WASI_NAMESPACE};
use crate::imports::HostImportTable;
use crate::instance::{GuestInstance, describe_error};
use crate::module::GuestModule;
use crate::pool::InstanceId;
use crate::store::{GuestContext, create_store};
use crate::wasi::WasiEnvironment;
use guestbox_common::{ExecutionConfig, RuntimeError};

/// Lifecycle state of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    /// Nothing is linked yet.
    Uninstantiated,
    /// Linked into a live engine instance; no entrypoint has run.
    Instantiated,
    /// The command entrypoint ran.
    Started,
    /// Startup finished; exports may be called.
    Ready,
    /// Released. Terminal.
    Closed,
}

impl InstanceState {
    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: InstanceState) -> bool {
        use InstanceState::{Closed, Instantiated, Ready, Started, Uninstantiated};

        matches!(
            (self, next),
            (Uninstantiated, Instantiated)
                | (Instantiated, Started | Ready)
                | (Started, Ready)
                | (Ready, Closed)
        )
    }

    /// Whether exports and memory may be used in this state.
    pub fn is_accessible(self) -> bool {
        matches!(self, InstanceState::Started | InstanceState::Ready)
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InstanceState::Uninstantiated => "uninstantiated",
            InstanceState::Instantiated => "instantiated",
            InstanceState::Started => "started",
            InstanceState::Ready => "ready",
            InstanceState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// An ABI entrypoint that ran during startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntrypointKind {
    /// The command entrypoint (`_start` or the default export).
    Command,
    /// The reactor entrypoint (`_initialize`).
    Reactor,
}

pub(crate) fn advance(id: InstanceId, state: &mut InstanceState, next: InstanceState) {
    debug_assert!(
        state.can_transition_to(next),
        "illegal transition {state} -> {next}"
    );
    debug!(instance_id = %id, from = %state, to = %next, "Instance state changed");
    *state = next;
}

/// Everything needed to bring one instance to [`InstanceState::Ready`].
pub(crate) struct Instantiation<'a> {
    pub engine: &'a WasmEngine,
    pub module: &'a GuestModule,
    pub wasi: &'a WasiEnvironment,
    pub imports: &'a HostImportTable,
    pub execution: &'a ExecutionConfig,
}

impl Instantiation<'_> {
    /// Run the whole lifecycle up to `Ready`.
    ///
    /// # Errors
    ///
    /// Any failure discards the store; nothing partially started escapes.
    #[instrument(skip_all, fields(instance_id = %id, module = %self.module.name()))]
    pub(crate) fn run(&self, id: InstanceId) -> Result<GuestInstance, RuntimeError> {
        let start = Instant::now();
        let mut state = InstanceState::Uninstantiated;

        let context = GuestContext::new(id, self.wasi.build()?, self.execution);
        let mut store = create_store(self.engine, self.execution, context)?;
        let linker = self.link(&mut store)?;

        let instance = linker
            .instantiate(&mut store, self.module.inner())
            .map_err(|e| RuntimeError::instantiation_failed(describe_error(&e)))?;
        advance(id, &mut state, InstanceState::Instantiated);

        let mut entrypoints = Vec::with_capacity(2);

        if let Some(symbol) = START_PROBES
            .into_iter()
            .find(|symbol| instance.get_func(&mut store, symbol).is_some())
        {
            run_entrypoint(&mut store, &instance, symbol)?;
            entrypoints.push(EntrypointKind::Command);
            advance(id, &mut state, InstanceState::Started);
        }

        if instance.get_func(&mut store, INITIALIZE_FUNCTION).is_some() {
            run_entrypoint(&mut store, &instance, INITIALIZE_FUNCTION)?;
            entrypoints.push(EntrypointKind::Reactor);
        }
        advance(id, &mut state, InstanceState::Ready);

        info!(
            entrypoints = ?entrypoints,
            duration_ms = start.elapsed().as_millis(),
            "Instance ready"
        );

        Ok(GuestInstance::new(
            id,
            self.module.name().to_string(),
            store,
            instance,
            entrypoints,
        ))
    }

    /// Seed a linker with WASI, then layer the host imports on top.
    fn link(&self, store: &mut Store<GuestContext>) -> Result<Linker<GuestContext>, RuntimeError> {
        let mut linker = Linker::new(self.engine.inner());

        preview1::add_to_linker_sync(&mut linker, GuestContext::wasi_mut)
            .map_err(|e| RuntimeError::import_binding(WASI_NAMESPACE, "*", e.to_string()))?;
        self.imports.install(&mut linker, store)?;

        debug!(
            host_imports = self.imports.len(),
            namespace = %self.imports.namespace(),
            "Linker prepared"
        );

        Ok(linker)
    }
}

/// Call a zero-argument entrypoint.
///
/// `proc_exit(0)` from inside the entrypoint counts as success.
fn run_entrypoint(
    store: &mut Store<GuestContext>,
    instance: &wasmtime::Instance,
    symbol: &str,
) -> Result<(), RuntimeError> {
    let label = if symbol.is_empty() { "<default>" } else { symbol };

    let func = instance
        .get_typed_func::<(), ()>(&mut *store, symbol)
        .map_err(|e| RuntimeError::entrypoint_failed(label, e.to_string()))?;

    debug!(symbol = label, "Running entrypoint");

    match func.call(&mut *store, ()) {
        Ok(()) => Ok(()),
        Err(e) => match e.downcast_ref::<I32Exit>() {
            Some(I32Exit(0)) => {
                debug!(symbol = label, "Entrypoint exited with status 0");
                Ok(())
            }
            Some(I32Exit(code)) => Err(RuntimeError::entrypoint_failed(
                label,
                format!("exited with status {code}"),
            )),
            None => Err(RuntimeError::entrypoint_failed(label, describe_error(&e))),
        },
    }
}
