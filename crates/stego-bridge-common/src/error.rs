//! Error types for the stego-bridge.
//!
//! This module defines a hierarchy of error types using `thiserror`:
//! - [`StartupError`]: Fatal errors while loading and wiring the guest module
//! - [`InvocationError`]: Per-call failures that leave the instance usable
//!
//! Startup errors abort process boot; no request is ever served after one.
//! Invocation errors are recovered at the call boundary: the lock is released,
//! already-allocated guest regions are abandoned, and the next call proceeds
//! against uncorrupted state.

use std::io;

use thiserror::Error;

/// Fatal errors raised while loading the guest module at startup.
///
/// The bridge never partially initializes: any of these variants means no
/// encode/decode capability exists.
#[derive(Error, Debug)]
pub enum StartupError {
    /// The guest module file does not resolve to a readable module.
    #[error("Guest module not found at '{path}': {source}")]
    ModuleNotFound {
        /// The path that was configured.
        path: String,
        /// The underlying I/O failure.
        #[source]
        source: io::Error,
    },

    /// The module bytes failed to compile.
    #[error("Guest module is invalid: {reason}")]
    InvalidModule {
        /// Description of the compilation failure.
        reason: String,
    },

    /// Instantiation failed, typically because the guest declares an import
    /// the host does not provide.
    #[error("Failed to instantiate guest module: {reason}")]
    Instantiation {
        /// Description of the instantiation failure.
        reason: String,
    },

    /// A required export is absent from the instantiated guest.
    #[error("Required guest export missing: {name}")]
    MissingExport {
        /// The exact export name that could not be resolved.
        name: String,
    },

    /// Registering host-provided imports on the linker failed.
    #[error("Failed to register host import: {reason}")]
    HostImport {
        /// Description of the registration failure.
        reason: String,
    },
}

/// Per-call failures during an encode or decode invocation.
///
/// All variants are request-level: the guest instance and its memory remain
/// usable for subsequent calls. Allocation failures are a subtype of
/// invocation failure from the caller's perspective.
#[derive(Error, Debug)]
pub enum InvocationError {
    /// The guest trapped during the call (carrier too small, corrupted
    /// container, no hidden secret present). Guest behavior is deterministic,
    /// so the call is never retried.
    #[error("Guest trap: {message}")]
    Trap {
        /// Description of the trap.
        message: String,
        /// Trap code if available.
        code: Option<String>,
    },

    /// Memory growth or the guest allocator call failed.
    #[error("Guest allocation failed: {reason}")]
    Allocation {
        /// Description of the allocation failure.
        reason: String,
    },

    /// A read or write fell outside the guest's committed linear memory.
    #[error(
        "Guest memory access out of bounds: address {address} length {length} (memory is {memory_len} bytes)"
    )]
    OutOfBounds {
        /// Start address of the attempted access.
        address: u64,
        /// Length of the attempted access.
        length: u64,
        /// Committed memory length at the time of the access.
        memory_len: u64,
    },

    /// The guest returned text output that is not valid UTF-8.
    #[error("Guest returned invalid UTF-8: {reason}")]
    InvalidUtf8 {
        /// Description of the decoding failure.
        reason: String,
    },
}

impl StartupError {
    /// Create a new `ModuleNotFound` error.
    pub fn module_not_found(path: impl Into<String>, source: io::Error) -> Self {
        Self::ModuleNotFound {
            path: path.into(),
            source,
        }
    }

    /// Create a new `InvalidModule` error.
    pub fn invalid_module(reason: impl Into<String>) -> Self {
        Self::InvalidModule {
            reason: reason.into(),
        }
    }

    /// Create a new `Instantiation` error.
    pub fn instantiation(reason: impl Into<String>) -> Self {
        Self::Instantiation {
            reason: reason.into(),
        }
    }

    /// Create a new `MissingExport` error.
    pub fn missing_export(name: impl Into<String>) -> Self {
        Self::MissingExport { name: name.into() }
    }

    /// Create a new `HostImport` error.
    pub fn host_import(reason: impl Into<String>) -> Self {
        Self::HostImport {
            reason: reason.into(),
        }
    }

    /// Returns `true` if this error indicates the module file was not found.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ModuleNotFound { .. })
    }

    /// Returns `true` if this error names a missing export.
    pub fn is_missing_export(&self) -> bool {
        matches!(self, Self::MissingExport { .. })
    }
}

impl InvocationError {
    /// Create a new `Trap` error.
    pub fn trap(message: impl Into<String>, code: Option<String>) -> Self {
        Self::Trap {
            message: message.into(),
            code,
        }
    }

    /// Create a new `Allocation` error.
    pub fn allocation(reason: impl Into<String>) -> Self {
        Self::Allocation {
            reason: reason.into(),
        }
    }

    /// Create a new `InvalidUtf8` error.
    pub fn invalid_utf8(reason: impl Into<String>) -> Self {
        Self::InvalidUtf8 {
            reason: reason.into(),
        }
    }

    /// Returns `true` if this error came from a guest trap.
    pub fn is_trap(&self) -> bool {
        matches!(self, Self::Trap { .. })
    }

    /// Returns `true` if this error came from allocation or memory growth.
    pub fn is_allocation(&self) -> bool {
        matches!(self, Self::Allocation { .. })
    }
}
