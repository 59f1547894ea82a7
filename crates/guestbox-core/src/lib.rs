//! Core runtime for guestbox.
//!
//! This crate compiles guest modules, builds their WASI sandbox, binds host
//! imports and drives every instance through its ABI startup protocol:
//! - [`WasmEngine`]: Configured Wasmtime engine
//! - [`GuestModule`]: Compiled module, instantiated many times
//! - [`HostFunctionSpec`] / [`HostImports`]: Host functions and globals offered to guests
//! - [`WasiEnvironment`]: Validated WASI recipe, materialized per instance
//! - [`GuestInstance`]: A running guest with bounds-checked memory access
//! - [`Runtime`]: One module, many pooled instances
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     WasmEngine                          │
//! │  (Shared, thread-safe)                                  │
//! │  - Compilation settings, fuel, pooling allocator        │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                       Runtime                           │
//! │  - GuestModule (compiled once)                          │
//! │  - WasiEnvironment (validated once)                     │
//! │  - HostImports                                          │
//! │  - InstancePool                                         │
//! └─────────────────────────────────────────────────────────┘
//!                            │  new_instance()
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │         Store<GuestContext> + Linker + Instance         │
//! │  (Per instance, isolated)                               │
//! │  - wasi_snapshot_preview1 imports                       │
//! │  - env imports from HostImportTable                     │
//! │  - _start, then _initialize                             │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod abi;
pub mod engine;
pub mod function;
pub mod imports;
pub mod instance;
pub mod lifecycle;
pub mod marshal;
pub mod memory;
pub mod module;
pub mod pool;
pub mod runtime;
pub mod store;
pub mod wasi;

pub use engine::WasmEngine;
pub use function::{HostCallable, HostCaller, HostFunctionBinding, HostFunctionSpec};
pub use imports::{HostGlobalSpec, HostImportTable, HostImports, ImportBinding};
pub use instance::GuestInstance;
pub use lifecycle::{EntrypointKind, InstanceState};
pub use marshal::ResultArity;
pub use memory::MemoryRegion;
pub use module::GuestModule;
pub use pool::{InstanceHandle, InstanceId, InstancePool};
pub use runtime::Runtime;
pub use store::GuestContext;
pub use wasi::{WasiContext, WasiEnvironment};
