//! The runtime façade: one compiled module, many instances.

use std::path::Path;

use tracing::{info, instrument};

use crate::WasmEngine;
use crate::imports::{HostImportTable, HostImports};
use crate::instance::GuestInstance;
use crate::lifecycle::Instantiation;
use crate::module::GuestModule;
use crate::pool::{InstanceHandle, InstanceId, InstancePool};
use crate::wasi::WasiEnvironment;
use guestbox_common::{ExecutionConfig, RuntimeConfig, RuntimeError};

/// A compiled guest module plus the environment its instances share.
///
/// The module is compiled exactly once, at construction. Instances are
/// registered in the runtime's own [`InstancePool`] and live until
/// [`release`](Runtime::release) or until the runtime is dropped.
///
/// # Example
///
/// ```ignore
/// let engine = WasmEngine::new(&config.engine)?;
/// let runtime = Runtime::new(&engine, "app", &bytes, &config, HostImports::new())?;
/// let handle = runtime.new_instance()?;
/// let sum = handle.lock().call("add", &[1, 2])?;
/// ```
pub struct Runtime {
    engine: WasmEngine,
    module: GuestModule,
    wasi: WasiEnvironment,
    imports: HostImports,
    execution: ExecutionConfig,
    pool: InstancePool,
}

impl Runtime {
    /// Compile `bytes` and prepare the WASI environment.
    ///
    /// `bytes` may be a binary module or WAT text.
    ///
    /// # Errors
    ///
    /// Fails on compilation errors and invalid WASI configuration.
    #[instrument(skip_all, fields(module = %name))]
    pub fn new(
        engine: &WasmEngine,
        name: &str,
        bytes: &[u8],
        config: &RuntimeConfig,
        imports: HostImports,
    ) -> Result<Self, RuntimeError> {
        let module = GuestModule::from_source(engine.inner(), name, bytes)?;
        Self::from_module(engine, module, config, imports)
    }

    /// Load a module from disk: `.cwasm` is treated as a precompiled
    /// artifact, anything else as Wasm or WAT.
    ///
    /// The module is named after the file stem.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or compiled.
    pub fn from_file(
        engine: &WasmEngine,
        path: impl AsRef<Path>,
        config: &RuntimeConfig,
        imports: HostImports,
    ) -> Result<Self, RuntimeError> {
        let path = path.as_ref();
        let name = path
            .file_stem()
            .map_or_else(|| "guest".to_string(), |s| s.to_string_lossy().into_owned());

        Self::from_file_named(engine, path, &name, config, imports)
    }

    /// As [`from_file`](Self::from_file), with an explicit module name.
    ///
    /// The name is also the WASI program name unless the configuration sets
    /// one.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or compiled.
    pub fn from_file_named(
        engine: &WasmEngine,
        path: impl AsRef<Path>,
        name: &str,
        config: &RuntimeConfig,
        imports: HostImports,
    ) -> Result<Self, RuntimeError> {
        let path = path.as_ref();

        if path.extension().is_some_and(|ext| ext == "cwasm") {
            let module = GuestModule::from_precompiled(engine.inner(), name, path)?;
            return Self::from_module(engine, module, config, imports);
        }

        let bytes = std::fs::read(path)?;
        Self::new(engine, name, &bytes, config, imports)
    }

    /// Build a runtime around an already compiled module.
    ///
    /// # Errors
    ///
    /// Fails on invalid WASI configuration.
    pub fn from_module(
        engine: &WasmEngine,
        module: GuestModule,
        config: &RuntimeConfig,
        imports: HostImports,
    ) -> Result<Self, RuntimeError> {
        let wasi = WasiEnvironment::new(module.name(), config.wasi.clone())?;

        info!(
            module = %module.name(),
            content_hash = %module.content_hash(),
            host_functions = imports.functions().len(),
            host_globals = imports.globals().len(),
            "Runtime created"
        );

        Ok(Self {
            engine: engine.clone(),
            module,
            wasi,
            imports,
            execution: config.execution.clone(),
            pool: InstancePool::new(),
        })
    }

    /// Create an instance with the runtime's configured imports.
    ///
    /// # Errors
    ///
    /// Fails on import binding, instantiation or entrypoint errors. A failed
    /// instance is never registered.
    pub fn new_instance(&self) -> Result<InstanceHandle, RuntimeError> {
        self.spawn(&self.imports)
    }

    /// Create an instance with a caller-supplied import set.
    ///
    /// # Errors
    ///
    /// As [`new_instance`](Self::new_instance).
    pub fn new_instance_with(&self, imports: &HostImports) -> Result<InstanceHandle, RuntimeError> {
        self.spawn(imports)
    }

    fn spawn(&self, imports: &HostImports) -> Result<InstanceHandle, RuntimeError> {
        let table = HostImportTable::build(self.engine.inner(), imports);
        let instance = self.instantiate(&table)?;

        let handle = InstanceHandle::new(instance);
        self.pool.insert(handle.clone())?;
        Ok(handle)
    }

    fn instantiate(&self, table: &HostImportTable) -> Result<GuestInstance, RuntimeError> {
        Instantiation {
            engine: &self.engine,
            module: &self.module,
            wasi: &self.wasi,
            imports: table,
            execution: &self.execution,
        }
        .run(InstanceId::new())
    }

    /// Look up a registered instance.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::InstanceNotFound`] for unknown identifiers.
    pub fn get(&self, id: InstanceId) -> Result<InstanceHandle, RuntimeError> {
        self.pool.get(id)
    }

    /// Unregister an instance and close it.
    ///
    /// Outstanding handles observe the instance as closed.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::InstanceNotFound`] for unknown identifiers.
    pub fn release(&self, id: InstanceId) -> Result<(), RuntimeError> {
        let handle = self.pool.remove(id)?;
        handle.lock().close()
    }

    /// Identifiers of all registered instances.
    pub fn instances(&self) -> Vec<InstanceId> {
        self.pool.ids()
    }

    /// Number of registered instances.
    pub fn len(&self) -> usize {
        self.pool.len()
    }

    /// Whether no instance is registered.
    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    /// The compiled module.
    pub fn module(&self) -> &GuestModule {
        &self.module
    }

    /// The WASI environment shared by all instances.
    pub fn wasi(&self) -> &WasiEnvironment {
        &self.wasi
    }

    /// The engine.
    pub fn engine(&self) -> &WasmEngine {
        &self.engine
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("module", &self.module)
            .field("instances", &self.pool.len())
            .finish_non_exhaustive()
    }
}
