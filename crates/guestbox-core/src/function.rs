//! Host functions exposed to guests.
//!
//! A [`HostFunctionSpec`] describes a host callable by shape only: a name,
//! an input arity and a result arity. [`HostFunctionBinding`] turns a spec
//! into a typed symbol the engine can link, marshalling every call through
//! [`crate::marshal`].

use std::fmt;
use std::sync::Arc;

use tracing::{trace, warn};
use wasmtime::{Caller, Extern, FuncType, Linker, Memory};

use crate::abi::MEMORY_EXPORT;
use crate::marshal::{self, ResultArity};
use crate::memory::{MemoryRegion, read_memory, write_memory};
use crate::pool::InstanceId;
use crate::store::GuestContext;
use guestbox_common::{HostFunctionError, RuntimeError};

/// The host side of an imported function.
pub type HostCallable = Arc<
    dyn Fn(&mut HostCaller<'_>, &[i32]) -> Result<Option<i32>, HostFunctionError> + Send + Sync,
>;

/// Declaration of one host function.
#[derive(Clone)]
pub struct HostFunctionSpec {
    name: String,
    params: usize,
    results: ResultArity,
    callable: HostCallable,
}

impl HostFunctionSpec {
    /// Declare a host function taking `params` integers.
    pub fn new<F>(name: impl Into<String>, params: usize, results: ResultArity, callable: F) -> Self
    where
        F: Fn(&mut HostCaller<'_>, &[i32]) -> Result<Option<i32>, HostFunctionError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.into(),
            params,
            results,
            callable: Arc::new(callable),
        }
    }

    /// Symbol name inside the host namespace.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of integer inputs.
    pub fn params(&self) -> usize {
        self.params
    }

    /// Number of integer outputs.
    pub fn results(&self) -> ResultArity {
        self.results
    }
}

impl fmt::Debug for HostFunctionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostFunctionSpec")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("results", &self.results)
            .finish_non_exhaustive()
    }
}

/// The calling guest, as seen from inside a host function.
///
/// Memory access goes to the caller's own exported `memory` and is bounds
/// checked against its size at the moment of the access.
pub struct HostCaller<'a> {
    caller: Caller<'a, GuestContext>,
}

impl<'a> HostCaller<'a> {
    fn new(caller: Caller<'a, GuestContext>) -> Self {
        Self { caller }
    }

    /// Identifier of the calling instance.
    pub fn instance_id(&self) -> InstanceId {
        self.caller.data().instance_id()
    }

    /// Current size of the caller's memory in bytes.
    pub fn memory_size(&mut self) -> Result<usize, HostFunctionError> {
        let memory = self.memory()?;
        Ok(memory.data_size(&self.caller))
    }

    /// Copy a region of the caller's memory.
    pub fn read(&mut self, region: MemoryRegion) -> Result<Vec<u8>, HostFunctionError> {
        let memory = self.memory()?;
        read_memory(memory.data(&self.caller), region).map_err(memory_error)
    }

    /// Copy `bytes` into the caller's memory at `address`.
    pub fn write(&mut self, address: u32, bytes: &[u8]) -> Result<usize, HostFunctionError> {
        let memory = self.memory()?;
        write_memory(memory.data_mut(&mut self.caller), address, bytes).map_err(memory_error)
    }

    fn memory(&mut self) -> Result<Memory, HostFunctionError> {
        self.caller
            .get_export(MEMORY_EXPORT)
            .and_then(Extern::into_memory)
            .ok_or_else(|| HostFunctionError::Memory {
                reason: format!("caller does not export '{MEMORY_EXPORT}'"),
            })
    }
}

fn memory_error(e: RuntimeError) -> HostFunctionError {
    HostFunctionError::Memory {
        reason: e.to_string(),
    }
}

/// A host function bound to a concrete engine signature.
#[derive(Clone, Debug)]
pub struct HostFunctionBinding {
    spec: HostFunctionSpec,
    ty: FuncType,
}

impl HostFunctionBinding {
    /// Derive the signature of `spec` for `engine`.
    pub fn new(engine: &wasmtime::Engine, spec: HostFunctionSpec) -> Self {
        let ty = marshal::signature(engine, spec.params, spec.results);
        Self { spec, ty }
    }

    /// Symbol name.
    pub fn name(&self) -> &str {
        self.spec.name()
    }

    /// Engine signature of the symbol.
    pub fn func_type(&self) -> &FuncType {
        &self.ty
    }

    /// The spec this binding was derived from.
    pub fn spec(&self) -> &HostFunctionSpec {
        &self.spec
    }

    /// Define the symbol in `namespace` on `linker`.
    ///
    /// A failing callable aborts the guest call with a trap carrying the
    /// [`HostFunctionError`].
    pub fn define(
        &self,
        linker: &mut Linker<GuestContext>,
        namespace: &str,
    ) -> Result<(), RuntimeError> {
        let spec = self.spec.clone();

        linker
            .func_new(
                namespace,
                &self.spec.name,
                self.ty.clone(),
                move |caller, params, results| {
                    invoke(&spec, caller, params, results).map_err(|e| {
                        warn!(function = %spec.name, error = %e, "Host function failed");
                        wasmtime::Error::new(e)
                    })
                },
            )
            .map_err(|e| RuntimeError::import_binding(namespace, self.name(), e.to_string()))?;

        Ok(())
    }
}

fn invoke(
    spec: &HostFunctionSpec,
    caller: Caller<'_, GuestContext>,
    params: &[wasmtime::Val],
    results: &mut [wasmtime::Val],
) -> Result<(), HostFunctionError> {
    let args = marshal::decode_args(&spec.name, params)?;
    let mut host_caller = HostCaller::new(caller);

    trace!(
        function = %spec.name,
        instance_id = %host_caller.instance_id(),
        args = ?args,
        "Host function invoked"
    );

    let result = (spec.callable)(&mut host_caller, &args)?;
    marshal::encode_result(&spec.name, spec.results, result, results)
}
