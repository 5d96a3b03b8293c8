//! Guest module loading and instantiation.
//!
//! This module provides:
//! - [`GuestRuntime`]: Wasmtime engine plus the linker carrying host imports
//! - [`GuestInstance`]: The loaded, instantiated guest with its resolved
//!   exports, owned for the whole process lifetime
//!
//! Loading fails fast: a missing module file, an unsatisfiable import, or an
//! absent required export all abort startup before any operation is served.
//! The bridge never partially initializes.

use std::path::Path;

use tracing::{debug, info, instrument};
use wasmtime::{Engine, Linker, Memory, MemoryType, Module, Store, TypedFunc};

use crate::arena::{GuestRealloc, MemoryArena};
use crate::state::{GuestLogEntry, HostState};
use stego_bridge_common::StartupError;

/// Export name of the guest's linear memory.
pub const EXPORT_MEMORY: &str = "memory";
/// Export name of the guest's realloc-style allocator.
pub const EXPORT_REALLOC: &str = "cabi_realloc";
/// Export names of the four steganographic operations.
pub const EXPORT_ENCODE_BMP: &str = "encode-secret-into-bmp";
pub const EXPORT_DECODE_BMP: &str = "decode-secret-from-bmp";
pub const EXPORT_ENCODE_JPEG: &str = "encode-secret-into-jpeg";
pub const EXPORT_DECODE_JPEG: &str = "decode-secret-from-jpeg";

/// Engine and linker used to load the guest module.
///
/// Host imports (the diagnostic log channel and the WASI preview1 stubs) are
/// registered on the linker before [`GuestRuntime::load`] is called; a guest
/// declaring an import the linker does not carry fails at instantiation, which
/// is a capability mismatch at startup rather than a mid-request abort.
pub struct GuestRuntime {
    engine: Engine,
    linker: Linker<HostState>,
}

impl GuestRuntime {
    /// Create a runtime with an empty linker.
    pub fn new() -> Self {
        let engine = Engine::default();
        let linker = Linker::new(&engine);

        Self { engine, linker }
    }

    /// Get a reference to the Wasmtime engine.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Get a mutable reference to the linker.
    ///
    /// Use this to register host imports before loading the guest.
    pub fn linker_mut(&mut self) -> &mut Linker<HostState> {
        &mut self.linker
    }

    /// Load and instantiate the guest module from a file.
    ///
    /// # Errors
    ///
    /// - [`StartupError::ModuleNotFound`] if the path is not readable
    /// - [`StartupError::InvalidModule`] if compilation fails
    /// - [`StartupError::Instantiation`] if an import cannot be satisfied
    /// - [`StartupError::MissingExport`] for each required export that is
    ///   absent after instantiation
    #[instrument(skip(self), fields(path = %path.as_ref().display()))]
    pub fn load(&self, path: impl AsRef<Path>) -> Result<GuestInstance, StartupError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .map_err(|e| StartupError::module_not_found(path.display().to_string(), e))?;

        debug!(bytes_len = bytes.len(), "Guest module read");
        self.instantiate(&bytes)
    }

    /// Instantiate a guest from WAT source.
    ///
    /// This is primarily for testing purposes.
    pub fn load_wat(&self, wat: &str) -> Result<GuestInstance, StartupError> {
        self.instantiate(wat.as_bytes())
    }

    fn instantiate(&self, bytes: &[u8]) -> Result<GuestInstance, StartupError> {
        let module = Module::new(&self.engine, bytes)
            .map_err(|e| StartupError::invalid_module(e.to_string()))?;

        let mut store = Store::new(&self.engine, HostState::new());

        // Host-owned linear memory under env::memory, for guests that import
        // their memory rather than exporting one of their own.
        let import_memory = Memory::new(&mut store, MemoryType::new(1, None))
            .map_err(|e| StartupError::host_import(format!("host memory: {e}")))?;

        let mut linker = self.linker.clone();
        linker
            .define(&store, "env", "memory", import_memory)
            .map_err(|e| StartupError::host_import(format!("env::memory: {e}")))?;

        let instance = linker
            .instantiate(&mut store, &module)
            .map_err(|e| StartupError::instantiation(e.to_string()))?;

        let memory = instance
            .get_memory(&mut store, EXPORT_MEMORY)
            .ok_or_else(|| StartupError::missing_export(EXPORT_MEMORY))?;

        let realloc: GuestRealloc = typed_export(&instance, &mut store, EXPORT_REALLOC)?;
        let ops = OperationExports {
            encode_bmp: typed_export(&instance, &mut store, EXPORT_ENCODE_BMP)?,
            decode_bmp: typed_export(&instance, &mut store, EXPORT_DECODE_BMP)?,
            encode_jpeg: typed_export(&instance, &mut store, EXPORT_ENCODE_JPEG)?,
            decode_jpeg: typed_export(&instance, &mut store, EXPORT_DECODE_JPEG)?,
        };

        let committed = memory.data_size(&store) as u64;
        info!(
            pages = memory.size(&store),
            "Guest module instantiated, all required exports resolved"
        );

        Ok(GuestInstance {
            store,
            arena: MemoryArena::new(memory, realloc, committed),
            ops,
        })
    }
}

impl Default for GuestRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for GuestRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuestRuntime").finish_non_exhaustive()
    }
}

/// Resolve a required typed export, mapping failure to `MissingExport`.
fn typed_export<Params, Results>(
    instance: &wasmtime::Instance,
    store: &mut Store<HostState>,
    name: &str,
) -> Result<TypedFunc<Params, Results>, StartupError>
where
    Params: wasmtime::WasmParams,
    Results: wasmtime::WasmResults,
{
    instance
        .get_typed_func::<Params, Results>(&mut *store, name)
        .map_err(|_| StartupError::missing_export(name))
}

/// The loaded, instantiated guest module.
///
/// Owns the store, the arena over the guest's linear memory, and the resolved
/// operation exports for its process lifetime. All addresses inside are
/// bridge-internal and never escape the call that produced them.
pub struct GuestInstance {
    store: Store<HostState>,
    arena: MemoryArena,
    ops: OperationExports,
}

/// The four resolved steganographic operation exports.
pub(crate) struct OperationExports {
    pub(crate) encode_bmp: TypedFunc<(i32, i32, i32, i32), i32>,
    pub(crate) decode_bmp: TypedFunc<(i32, i32), i32>,
    pub(crate) encode_jpeg: TypedFunc<(i32, i32, i32, i32), i32>,
    pub(crate) decode_jpeg: TypedFunc<(i32, i32), i32>,
}

impl GuestInstance {
    /// Split into the parts a call needs: store, arena, and operations.
    pub(crate) fn parts(
        &mut self,
    ) -> (&mut Store<HostState>, &mut MemoryArena, &OperationExports) {
        (&mut self.store, &mut self.arena, &self.ops)
    }

    /// Drain the diagnostic messages the guest has emitted so far.
    pub fn take_guest_logs(&mut self) -> Vec<GuestLogEntry> {
        std::mem::take(&mut self.store.data_mut().logs)
    }

    /// Current linear memory size in pages.
    pub fn memory_pages(&mut self) -> u64 {
        self.arena.pages(&mut self.store)
    }
}

impl std::fmt::Debug for GuestInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuestInstance")
            .field("arena", &self.arena)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Valid export surface with stubbed-out operations.
    const STUB_GUEST_WAT: &str = r#"
        (module
            (memory (export "memory") 1)
            (func (export "cabi_realloc") (param i32 i32 i32 i32) (result i32)
                i32.const 8)
            (func (export "encode-secret-into-bmp") (param i32 i32 i32 i32) (result i32)
                unreachable)
            (func (export "decode-secret-from-bmp") (param i32 i32) (result i32)
                unreachable)
            (func (export "encode-secret-into-jpeg") (param i32 i32 i32 i32) (result i32)
                unreachable)
            (func (export "decode-secret-from-jpeg") (param i32 i32) (result i32)
                unreachable)
        )
    "#;

    #[test]
    fn test_load_missing_file_is_fatal() {
        let runtime = GuestRuntime::new();
        let result = runtime.load("/nonexistent/guest.wasm");

        assert!(matches!(
            result,
            Err(StartupError::ModuleNotFound { .. })
        ));
    }

    #[test]
    fn test_load_invalid_module() {
        let runtime = GuestRuntime::new();
        let result = runtime.load_wat("(this is not wat");

        assert!(matches!(result, Err(StartupError::InvalidModule { .. })));
    }

    #[test]
    fn test_missing_memory_export() {
        let runtime = GuestRuntime::new();
        let result = runtime.load_wat("(module)");

        match result {
            Err(StartupError::MissingExport { name }) => assert_eq!(name, "memory"),
            other => panic!("expected MissingExport(memory), got {other:?}"),
        }
    }

    #[test]
    fn test_missing_allocator_export() {
        let wat = r#"(module (memory (export "memory") 1))"#;
        let runtime = GuestRuntime::new();
        let result = runtime.load_wat(wat);

        match result {
            Err(StartupError::MissingExport { name }) => assert_eq!(name, "cabi_realloc"),
            other => panic!("expected MissingExport(cabi_realloc), got {other:?}"),
        }
    }

    #[test]
    fn test_missing_operation_export() {
        // Everything except decode-secret-from-jpeg
        let wat = r#"
            (module
                (memory (export "memory") 1)
                (func (export "cabi_realloc") (param i32 i32 i32 i32) (result i32)
                    i32.const 8)
                (func (export "encode-secret-into-bmp") (param i32 i32 i32 i32) (result i32)
                    unreachable)
                (func (export "decode-secret-from-bmp") (param i32 i32) (result i32)
                    unreachable)
                (func (export "encode-secret-into-jpeg") (param i32 i32 i32 i32) (result i32)
                    unreachable)
            )
        "#;
        let runtime = GuestRuntime::new();
        let result = runtime.load_wat(wat);

        match result {
            Err(StartupError::MissingExport { name }) => {
                assert_eq!(name, "decode-secret-from-jpeg");
            }
            other => panic!("expected MissingExport, got {other:?}"),
        }
    }

    #[test]
    fn test_full_export_surface_loads() {
        let runtime = GuestRuntime::new();
        let mut instance = runtime.load_wat(STUB_GUEST_WAT).unwrap();

        assert_eq!(instance.memory_pages(), 1);
        assert!(instance.take_guest_logs().is_empty());
    }

    #[test]
    fn test_unsatisfied_import_fails_at_startup() {
        // A guest declaring an import the host does not provide must fail
        // instantiation, never abort mid-request.
        let wat = r#"
            (module
                (import "nonexistent" "capability" (func))
                (memory (export "memory") 1)
            )
        "#;
        let runtime = GuestRuntime::new();
        let result = runtime.load_wat(wat);

        assert!(matches!(result, Err(StartupError::Instantiation { .. })));
    }
}
