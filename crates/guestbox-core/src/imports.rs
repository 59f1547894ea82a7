//! The host import table.
//!
//! [`HostImports`] is what a caller hands to a runtime: an ordered list of
//! function specs and global specs. [`HostImportTable`] binds that list to an
//! engine under the reserved host namespace and installs it into a linker
//! that already carries the engine's own WASI imports.

use tracing::{debug, warn};
use wasmtime::{Engine, Global, GlobalType, Linker, Mutability, Store, Val, ValType};

use crate::abi::HOST_NAMESPACE;
use crate::function::{HostFunctionBinding, HostFunctionSpec};
use crate::store::GuestContext;
use guestbox_common::RuntimeError;

/// An immutable `i32` global exported to guests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostGlobalSpec {
    /// Symbol name inside the host namespace.
    pub name: String,
    /// Constant value.
    pub value: i32,
}

impl HostGlobalSpec {
    /// Declare a constant global.
    pub fn new(name: impl Into<String>, value: i32) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Caller-supplied host functions and globals, in registration order.
#[derive(Debug, Clone, Default)]
pub struct HostImports {
    functions: Vec<HostFunctionSpec>,
    globals: Vec<HostGlobalSpec>,
}

impl HostImports {
    /// An empty import set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a function.
    #[must_use]
    pub fn function(mut self, spec: HostFunctionSpec) -> Self {
        self.functions.push(spec);
        self
    }

    /// Add a global.
    #[must_use]
    pub fn global(mut self, spec: HostGlobalSpec) -> Self {
        self.globals.push(spec);
        self
    }

    /// Append everything from `other`, after the current entries.
    #[must_use]
    pub fn merge(mut self, other: HostImports) -> Self {
        self.functions.extend(other.functions);
        self.globals.extend(other.globals);
        self
    }

    /// Function specs in registration order.
    pub fn functions(&self) -> &[HostFunctionSpec] {
        &self.functions
    }

    /// Global specs in registration order.
    pub fn globals(&self) -> &[HostGlobalSpec] {
        &self.globals
    }

    /// Whether there is nothing to import.
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty() && self.globals.is_empty()
    }
}

/// One entry of a [`HostImportTable`].
#[derive(Debug, Clone)]
pub enum ImportBinding {
    /// A host function.
    Function(HostFunctionBinding),
    /// A constant global.
    Global(HostGlobalSpec),
}

/// Namespace-scoped import set, ready to install.
///
/// Names are unique. When two specs share a name the later one replaces the
/// earlier one in place.
#[derive(Debug, Clone)]
pub struct HostImportTable {
    namespace: String,
    entries: Vec<(String, ImportBinding)>,
}

impl HostImportTable {
    /// Bind `imports` for `engine` under [`HOST_NAMESPACE`].
    ///
    /// Functions are bound first, then globals, each in the order given.
    pub fn build(engine: &Engine, imports: &HostImports) -> Self {
        let mut table = Self {
            namespace: HOST_NAMESPACE.to_string(),
            entries: Vec::with_capacity(imports.functions.len() + imports.globals.len()),
        };

        for spec in &imports.functions {
            let binding = HostFunctionBinding::new(engine, spec.clone());
            table.insert(spec.name().to_string(), ImportBinding::Function(binding));
        }
        for global in &imports.globals {
            table.insert(global.name.clone(), ImportBinding::Global(global.clone()));
        }

        debug!(
            namespace = %table.namespace,
            entries = table.entries.len(),
            "Host import table built"
        );

        table
    }

    /// Insert `binding` under `name`, replacing any previous entry.
    pub fn insert(&mut self, name: String, binding: ImportBinding) {
        if let Some(slot) = self.entries.iter_mut().find(|(n, _)| *n == name) {
            warn!(
                namespace = %self.namespace,
                name = %name,
                "Duplicate host import; later registration wins"
            );
            slot.1 = binding;
        } else {
            self.entries.push((name, binding));
        }
    }

    /// Look up an entry by name.
    pub fn get(&self, name: &str) -> Option<&ImportBinding> {
        self.entries
            .iter()
            .find_map(|(n, binding)| (n == name).then_some(binding))
    }

    /// The namespace entries are installed under.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Entry names in installation order.
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Install every entry into `linker`.
    ///
    /// The linker refuses to shadow a name it already holds, so an entry
    /// that collides with an engine-provided import fails here.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::ImportBinding`] naming the first entry that
    /// could not be installed.
    pub fn install(
        &self,
        linker: &mut Linker<GuestContext>,
        store: &mut Store<GuestContext>,
    ) -> Result<(), RuntimeError> {
        for (name, binding) in &self.entries {
            match binding {
                ImportBinding::Function(function) => function.define(linker, &self.namespace)?,
                ImportBinding::Global(global) => {
                    let ty = GlobalType::new(ValType::I32, Mutability::Const);
                    let value = Global::new(&mut *store, ty, Val::I32(global.value)).map_err(
                        |e| RuntimeError::import_binding(&self.namespace, name, e.to_string()),
                    )?;
                    linker
                        .define(&*store, &self.namespace, name, value)
                        .map_err(|e| {
                            RuntimeError::import_binding(&self.namespace, name, e.to_string())
                        })?;
                }
            }
        }
        Ok(())
    }
}
