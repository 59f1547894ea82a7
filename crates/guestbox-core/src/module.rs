//! Guest module compilation.
//!
//! This module provides [`GuestModule`], a wrapper around Wasmtime's [`Module`]
//! that keeps the resource name and original bytes next to the compiled code.
//!
//! # Compilation Strategies
//!
//! - **JIT**: Compile from Wasm bytes at runtime (slower cold start)
//! - **AOT**: Load a serialized artifact produced by [`GuestModule::serialize`]
//!
//! A module is compiled exactly once and instantiated many times.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, instrument};
use wasmtime::{Engine, Module};

use guestbox_common::RuntimeError;

/// The `\0asm` magic number every binary module starts with.
const WASM_MAGIC: &[u8] = b"\0asm";

/// A compiled guest module.
///
/// # Thread Safety
///
/// `GuestModule` is cheap to clone and can be instantiated from any thread.
#[derive(Clone)]
pub struct GuestModule {
    /// The compiled Wasmtime module.
    inner: Module,

    /// Resource name of the module.
    name: String,

    /// The bytes the module was compiled from.
    bytes: Arc<[u8]>,

    /// 64-bit hash of the original bytes.
    content_hash: String,
}

impl GuestModule {
    /// Compile a module from WebAssembly bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the header is invalid or compilation fails.
    #[instrument(skip_all, fields(bytes_len = bytes.len()))]
    pub fn from_bytes(
        engine: &Engine,
        name: impl Into<String>,
        bytes: &[u8],
    ) -> Result<Self, RuntimeError> {
        let start = Instant::now();

        Self::validate_wasm_header(bytes)?;

        let module = Module::new(engine, bytes).map_err(|e| {
            RuntimeError::compilation_failed(format!("Module compilation failed: {e}"))
        })?;

        let guest = Self::assemble(module, name.into(), bytes);

        info!(
            module = %guest.name,
            content_hash = %guest.content_hash,
            duration_ms = start.elapsed().as_millis(),
            "Module compiled"
        );

        Ok(guest)
    }

    /// Compile a module from WAT (WebAssembly Text Format).
    ///
    /// # Errors
    ///
    /// Returns an error if parsing or compilation fails.
    #[instrument(skip_all)]
    pub fn from_wat(
        engine: &Engine,
        name: impl Into<String>,
        wat: &str,
    ) -> Result<Self, RuntimeError> {
        let start = Instant::now();

        let module = Module::new(engine, wat).map_err(|e| {
            RuntimeError::compilation_failed(format!("WAT compilation failed: {e}"))
        })?;

        let guest = Self::assemble(module, name.into(), wat.as_bytes());

        info!(
            module = %guest.name,
            content_hash = %guest.content_hash,
            duration_ms = start.elapsed().as_millis(),
            "WAT module compiled"
        );

        Ok(guest)
    }

    /// Compile either a binary module or WAT text, told apart by the header.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is neither, or compilation fails.
    pub fn from_source(
        engine: &Engine,
        name: impl Into<String>,
        source: &[u8],
    ) -> Result<Self, RuntimeError> {
        if source.starts_with(WASM_MAGIC) {
            return Self::from_bytes(engine, name, source);
        }
        let text = std::str::from_utf8(source).map_err(|_| {
            RuntimeError::compilation_failed("Input is neither Wasm nor UTF-8 WAT")
        })?;
        Self::from_wat(engine, name, text)
    }

    /// Load a pre-compiled module from disk.
    ///
    /// # Safety
    ///
    /// This deserializes machine code. Only load artifacts produced by
    /// [`GuestModule::serialize`] with the same Wasmtime version and settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the artifact cannot be loaded or is incompatible.
    #[allow(unsafe_code)]
    #[instrument(skip_all)]
    pub fn from_precompiled(
        engine: &Engine,
        name: impl Into<String>,
        path: impl AsRef<Path>,
    ) -> Result<Self, RuntimeError> {
        let path = path.as_ref();
        let start = Instant::now();

        let bytes = std::fs::read(path)?;

        // SAFETY: artifacts are produced by our own `serialize`
        let module = unsafe { Module::deserialize(engine, &bytes) }.map_err(|e| {
            RuntimeError::compilation_failed(format!(
                "Failed to load precompiled module from {}: {e}",
                path.display()
            ))
        })?;

        let guest = Self::assemble(module, name.into(), &bytes);

        debug!(
            path = %path.display(),
            module = %guest.name,
            duration_us = start.elapsed().as_micros(),
            "Precompiled module loaded"
        );

        Ok(guest)
    }

    /// Serialize the compiled module for AOT caching.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn serialize(&self) -> Result<Vec<u8>, RuntimeError> {
        self.inner.serialize().map_err(|e| {
            RuntimeError::compilation_failed(format!("Module serialization failed: {e}"))
        })
    }

    /// Get the resource name of the module.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the bytes the module was compiled from.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Get the content hash of the original bytes.
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    /// Names of the module's exports.
    pub fn export_names(&self) -> Vec<String> {
        self.inner.exports().map(|e| e.name().to_string()).collect()
    }

    /// Module and field names of the module's imports.
    pub fn import_names(&self) -> Vec<(String, String)> {
        self.inner
            .imports()
            .map(|i| (i.module().to_string(), i.name().to_string()))
            .collect()
    }

    /// Get the inner Wasmtime module.
    pub fn inner(&self) -> &Module {
        &self.inner
    }

    fn assemble(inner: Module, name: String, bytes: &[u8]) -> Self {
        Self {
            inner,
            name,
            bytes: Arc::from(bytes),
            content_hash: compute_hash(bytes),
        }
    }

    /// Validate WebAssembly header (magic number).
    fn validate_wasm_header(bytes: &[u8]) -> Result<(), RuntimeError> {
        if bytes.len() < 8 {
            return Err(RuntimeError::compilation_failed(
                "Invalid Wasm: file too small",
            ));
        }

        if &bytes[0..4] != WASM_MAGIC {
            return Err(RuntimeError::compilation_failed(
                "Invalid Wasm: bad magic number",
            ));
        }

        Ok(())
    }
}

impl std::fmt::Debug for GuestModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuestModule")
            .field("name", &self.name)
            .field("content_hash", &self.content_hash)
            .finish_non_exhaustive()
    }
}

/// Compute a hash of the given bytes.
fn compute_hash(bytes: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::WasmEngine;
    use guestbox_common::EngineConfig;

    // Minimal valid Wasm module (empty module)
    const MINIMAL_WASM: &[u8] = &[
        0x00, 0x61, 0x73, 0x6d, // magic: \0asm
        0x01, 0x00, 0x00, 0x00, // version: 1
    ];

    fn engine() -> WasmEngine {
        WasmEngine::new(&EngineConfig::default()).unwrap()
    }

    #[test]
    fn test_validate_wasm_header_valid() {
        assert!(GuestModule::validate_wasm_header(MINIMAL_WASM).is_ok());
    }

    #[test]
    fn test_validate_wasm_header_too_small() {
        let result = GuestModule::validate_wasm_header(&[0x00, 0x61]);
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_wasm_header_bad_magic() {
        let bad_wasm = &[0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00];
        let result = GuestModule::validate_wasm_header(bad_wasm);
        assert!(result.is_err());
    }

    #[test]
    fn test_compute_hash() {
        let hash1 = compute_hash(b"hello");
        let hash2 = compute_hash(b"hello");
        let hash3 = compute_hash(b"world");

        assert_eq!(hash1, hash2);
        assert_ne!(hash1, hash3);
        assert_eq!(hash1.len(), 16);
    }

    #[test]
    fn test_module_compilation() {
        let engine = engine();
        let module = GuestModule::from_bytes(engine.inner(), "empty", MINIMAL_WASM).unwrap();

        assert_eq!(module.name(), "empty");
        assert_eq!(module.bytes(), MINIMAL_WASM);
        assert!(!module.content_hash().is_empty());
        assert!(module.export_names().is_empty());
    }

    #[test]
    fn test_truncated_module_fails() {
        let engine = engine();
        let mut bytes = MINIMAL_WASM.to_vec();
        bytes.extend_from_slice(&[0x01, 0xff]);

        let result = GuestModule::from_bytes(engine.inner(), "broken", &bytes);
        assert!(matches!(
            result,
            Err(RuntimeError::CompilationFailed { .. })
        ));
    }

    #[test]
    fn test_module_imports_and_exports() {
        let engine = engine();
        let wat = r#"
            (module
                (import "env" "double" (func (param i32) (result i32)))
                (memory (export "memory") 1)
                (func (export "_start")))
        "#;
        let module = GuestModule::from_wat(engine.inner(), "io", wat).unwrap();

        assert_eq!(
            module.import_names(),
            vec![("env".to_string(), "double".to_string())]
        );
        assert_eq!(module.export_names(), vec!["memory", "_start"]);
    }

    #[test]
    fn test_serialize_and_reload() {
        let engine = engine();
        let module = GuestModule::from_wat(
            engine.inner(),
            "aot",
            r#"(module (func (export "run") (result i32) i32.const 7))"#,
        )
        .unwrap();

        let artifact = module.serialize().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aot.cwasm");
        std::fs::write(&path, &artifact).unwrap();

        let reloaded = GuestModule::from_precompiled(engine.inner(), "aot", &path).unwrap();
        assert_eq!(reloaded.name(), "aot");
        assert_eq!(reloaded.export_names(), vec!["run"]);
    }

    #[test]
    fn test_from_source_detects_format() {
        let engine = engine();

        let binary = GuestModule::from_source(engine.inner(), "bin", MINIMAL_WASM).unwrap();
        assert_eq!(binary.bytes(), MINIMAL_WASM);

        let text = GuestModule::from_source(engine.inner(), "text", b"(module)").unwrap();
        assert_eq!(text.bytes(), b"(module)");

        let result = GuestModule::from_source(engine.inner(), "junk", &[0xff, 0xfe, 0xfd]);
        assert!(matches!(
            result,
            Err(RuntimeError::CompilationFailed { .. })
        ));
    }

    #[test]
    fn test_module_debug() {
        let engine = engine();
        let module = GuestModule::from_bytes(engine.inner(), "empty", MINIMAL_WASM).unwrap();

        let debug_str = format!("{module:?}");
        assert!(debug_str.contains("GuestModule"));
        assert!(debug_str.contains("content_hash"));
    }
}
