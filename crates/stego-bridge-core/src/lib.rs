//! Wasmtime bridge to the steganography guest module.
//!
//! This crate is the host-side core: it loads the sandboxed guest that
//! implements the steganographic algorithm, manages its linear memory, and
//! marshals every encode/decode call across the host/guest boundary.
//!
//! - [`GuestRuntime`]: Engine + linker; loads and instantiates the guest,
//!   failing fast on missing files, unsatisfiable imports, or absent exports
//! - [`MemoryArena`]: Page-granular growth of guest memory plus buffer
//!   reservation through the guest's own bump allocator
//! - [`StegoBridge`]: The caller-facing encode/decode operations, serialized
//!   by a single lock around the one guest instance
//! - [`HostState`]: Store data (WASI stubs, captured guest diagnostics)
//!
//! # Architecture
//!
//! ```text
//! caller ──► StegoBridge::encode / decode
//!                 │  lock (single guest instance)
//!                 ▼
//!            MemoryArena ── allocate + write inputs
//!                 │
//!                 ▼
//!            guest export ── encode-secret-into-* / decode-secret-from-*
//!                 │
//!                 ▼
//!            ResultRecord ── (address, length) ── read output
//!                 │  unlock
//!                 ▼
//!              caller
//! ```

pub mod arena;
pub mod bridge;
pub mod runtime;
pub mod state;

pub use arena::{MemoryArena, WASM_PAGE_SIZE};
pub use bridge::{ContainerKind, StegoBridge};
pub use runtime::{GuestInstance, GuestRuntime};
pub use state::{GuestLogEntry, HostState};
