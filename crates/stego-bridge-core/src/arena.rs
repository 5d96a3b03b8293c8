//! Guest linear memory management.
//!
//! This module provides [`MemoryArena`], which wraps the guest's exported
//! linear memory together with its exported bump allocator. The host reserves
//! regions through the guest's own allocator so both sides agree on the memory
//! layout; the arena only pre-grows memory so the allocator always finds room.
//!
//! # Allocation protocol
//!
//! The guest exports a realloc-style allocator
//! `cabi_realloc(old_ptr, old_size, align, new_size) -> new_ptr`. Fresh
//! buffers are requested as `(0, 0, 1, size)`. Allocator state is
//! guest-internal: nothing is ever freed by the host, buffers are write-once,
//! and memory grows monotonically in 64 KiB pages.

use tracing::{debug, trace};
use wasmtime::{Memory, Store, TypedFunc};

use crate::state::HostState;
use stego_bridge_common::InvocationError;

/// Size of one WebAssembly linear memory page in bytes.
pub const WASM_PAGE_SIZE: u64 = 65536;

/// Signature of the guest's realloc-style allocator export.
pub(crate) type GuestRealloc = TypedFunc<(i32, i32, i32, i32), i32>;

/// Wrapper over the guest's linear memory and allocator.
///
/// `committed` tracks the high-water mark of every buffer the arena has
/// issued. When a new allocation would push past the current page capacity,
/// the arena grows the memory by the minimal number of additional pages
/// before asking the guest allocator for an address. Growth is irreversible.
pub struct MemoryArena {
    memory: Memory,
    realloc: GuestRealloc,
    committed: u64,
}

impl MemoryArena {
    pub(crate) fn new(memory: Memory, realloc: GuestRealloc, committed: u64) -> Self {
        Self {
            memory,
            realloc,
            committed,
        }
    }

    /// Reserve `size` bytes inside guest memory and return the address.
    ///
    /// Grows linear memory first when the committed high-water mark plus the
    /// requested size exceeds the current page capacity, by exactly
    /// `ceil(deficit / page_size)` pages.
    ///
    /// # Errors
    ///
    /// Returns [`InvocationError::Allocation`] if growth or the guest
    /// allocator call fails.
    #[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
    pub fn allocate(
        &mut self,
        store: &mut Store<HostState>,
        size: u32,
    ) -> Result<u32, InvocationError> {
        let capacity = self.memory.size(&mut *store) * WASM_PAGE_SIZE;
        let needed = self.committed + u64::from(size);

        if needed > capacity {
            let pages = (needed - capacity).div_ceil(WASM_PAGE_SIZE);
            self.memory.grow(&mut *store, pages).map_err(|e| {
                InvocationError::allocation(format!("failed to grow memory by {pages} pages: {e}"))
            })?;
            debug!(pages, total_pages = self.memory.size(&mut *store), "Grew guest memory");
        }

        let address = self
            .realloc
            .call(&mut *store, (0, 0, 1, size as i32))
            .map_err(|e| InvocationError::allocation(format!("guest allocator failed: {e}")))?;

        if address < 0 {
            return Err(InvocationError::allocation(format!(
                "guest allocator returned invalid address {address}"
            )));
        }
        let address = address as u32;

        self.committed = self.committed.max(u64::from(address) + u64::from(size));
        trace!(address, size, committed = self.committed, "Allocated guest buffer");

        Ok(address)
    }

    /// Copy host bytes into guest memory at `address`.
    ///
    /// The caller must have allocated at least `bytes.len()` bytes there.
    pub fn write_bytes(
        &self,
        store: &mut Store<HostState>,
        address: u32,
        bytes: &[u8],
    ) -> Result<(), InvocationError> {
        self.check_bounds(&mut *store, address, bytes.len() as u64)?;
        self.memory
            .write(&mut *store, address as usize, bytes)
            .map_err(|_| self.out_of_bounds(&mut *store, address, bytes.len() as u64))
    }

    /// Encode `text` as UTF-8 and write it at `address`.
    ///
    /// Returns the number of bytes written. This is the encoded byte length,
    /// not the character count; the allocation for a secret must be sized the
    /// same way or multi-byte characters would be truncated.
    pub fn write_utf8(
        &self,
        store: &mut Store<HostState>,
        address: u32,
        text: &str,
    ) -> Result<u32, InvocationError> {
        let bytes = text.as_bytes();
        self.write_bytes(store, address, bytes)?;
        Ok(bytes.len() as u32)
    }

    /// Copy `length` bytes of guest memory at `address` into host storage.
    pub fn read_bytes(
        &self,
        store: &mut Store<HostState>,
        address: u32,
        length: u32,
    ) -> Result<Vec<u8>, InvocationError> {
        self.check_bounds(&mut *store, address, u64::from(length))?;

        let mut buffer = vec![0u8; length as usize];
        self.memory
            .read(&mut *store, address as usize, &mut buffer)
            .map_err(|_| self.out_of_bounds(&mut *store, address, u64::from(length)))?;

        Ok(buffer)
    }

    /// Read `length` bytes at `address` and decode them as UTF-8 text.
    pub fn read_utf8(
        &self,
        store: &mut Store<HostState>,
        address: u32,
        length: u32,
    ) -> Result<String, InvocationError> {
        let bytes = self.read_bytes(store, address, length)?;
        String::from_utf8(bytes).map_err(|e| InvocationError::invalid_utf8(e.to_string()))
    }

    /// Current linear memory size in pages.
    pub fn pages(&self, store: &mut Store<HostState>) -> u64 {
        self.memory.size(store)
    }

    /// High-water mark of buffers issued by this arena, in bytes.
    pub fn committed(&self) -> u64 {
        self.committed
    }

    fn check_bounds(
        &self,
        store: &mut Store<HostState>,
        address: u32,
        length: u64,
    ) -> Result<(), InvocationError> {
        let memory_len = self.memory.data_size(&mut *store) as u64;
        let end = u64::from(address) + length;
        if end > memory_len {
            return Err(InvocationError::OutOfBounds {
                address: u64::from(address),
                length,
                memory_len,
            });
        }
        Ok(())
    }

    fn out_of_bounds(
        &self,
        store: &mut Store<HostState>,
        address: u32,
        length: u64,
    ) -> InvocationError {
        InvocationError::OutOfBounds {
            address: u64::from(address),
            length,
            memory_len: self.memory.data_size(store) as u64,
        }
    }
}

impl std::fmt::Debug for MemoryArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryArena")
            .field("committed", &self.committed)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasmtime::{Engine, Linker, Module};

    // Minimal guest: exported memory plus a bump allocator that never frees.
    const BUMP_GUEST_WAT: &str = r#"
        (module
            (memory (export "memory") 1)
            (global $bump (mut i32) (i32.const 16))
            (func (export "cabi_realloc") (param i32 i32 i32 i32) (result i32)
                (local $ptr i32)
                global.get $bump
                local.set $ptr
                (global.set $bump (i32.add (global.get $bump) (local.get 3)))
                local.get $ptr
            )
        )
    "#;

    fn setup() -> (Store<HostState>, MemoryArena) {
        let engine = Engine::default();
        let module = Module::new(&engine, BUMP_GUEST_WAT).unwrap();
        let mut store = Store::new(&engine, HostState::new());
        let linker = Linker::new(&engine);
        let instance = linker.instantiate(&mut store, &module).unwrap();

        let memory = instance.get_memory(&mut store, "memory").unwrap();
        let realloc = instance
            .get_typed_func::<(i32, i32, i32, i32), i32>(&mut store, "cabi_realloc")
            .unwrap();
        let committed = memory.data_size(&store) as u64;

        (store, MemoryArena::new(memory, realloc, committed))
    }

    #[test]
    fn test_allocate_returns_distinct_regions() {
        let (mut store, mut arena) = setup();

        let a = arena.allocate(&mut store, 100).unwrap();
        let b = arena.allocate(&mut store, 100).unwrap();

        assert!(b >= a + 100, "regions must not overlap: a={a} b={b}");
    }

    #[test]
    fn test_write_read_round_trip() {
        let (mut store, mut arena) = setup();

        let data = b"carrier image bytes";
        let addr = arena.allocate(&mut store, data.len() as u32).unwrap();
        arena.write_bytes(&mut store, addr, data).unwrap();

        let back = arena.read_bytes(&mut store, addr, data.len() as u32).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn test_write_utf8_returns_byte_length() {
        let (mut store, mut arena) = setup();

        // 5 characters, 6 bytes
        let text = "héllo";
        assert_eq!(text.chars().count(), 5);
        assert_eq!(text.len(), 6);

        let addr = arena.allocate(&mut store, text.len() as u32).unwrap();
        let written = arena.write_utf8(&mut store, addr, text).unwrap();

        assert_eq!(written, 6);
        let back = arena.read_utf8(&mut store, addr, written).unwrap();
        assert_eq!(back, text);
    }

    #[test]
    fn test_growth_is_minimal() {
        let (mut store, mut arena) = setup();
        assert_eq!(arena.pages(&mut store), 1);

        // 65536 committed + 100_000 requested needs 3 pages total
        let addr = arena.allocate(&mut store, 100_000).unwrap();
        assert_eq!(arena.pages(&mut store), 3);

        // The whole region is writable and readable after growth
        let data = vec![0xA5u8; 100_000];
        arena.write_bytes(&mut store, addr, &data).unwrap();
        let back = arena.read_bytes(&mut store, addr, 100_000).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn test_small_allocations_reuse_grown_capacity() {
        let (mut store, mut arena) = setup();

        arena.allocate(&mut store, 1000).unwrap();
        let pages_after_first = arena.pages(&mut store);

        arena.allocate(&mut store, 1000).unwrap();
        assert_eq!(arena.pages(&mut store), pages_after_first);
    }

    #[test]
    fn test_out_of_bounds_read_fails() {
        let (mut store, arena) = setup();

        let result = arena.read_bytes(&mut store, u32::MAX - 16, 8);
        assert!(matches!(
            result,
            Err(InvocationError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_invalid_utf8_is_reported() {
        let (mut store, mut arena) = setup();

        let addr = arena.allocate(&mut store, 2).unwrap();
        arena.write_bytes(&mut store, addr, &[0xFF, 0xFE]).unwrap();

        let result = arena.read_utf8(&mut store, addr, 2);
        assert!(matches!(result, Err(InvocationError::InvalidUtf8 { .. })));
    }
}
