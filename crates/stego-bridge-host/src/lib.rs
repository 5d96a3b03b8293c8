//! Host import implementations for the steganography guest.
//!
//! This crate provides everything the guest module imports from the host:
//!
//! - [`linker`]: Registration of all host imports on the guest linker
//! - [`logging`]: The one-way diagnostic channel guest code logs through
//!
//! The diagnostic channel never raises back into the guest. A guest that
//! declares an import this crate does not register fails at instantiation,
//! which surfaces as a startup error rather than a mid-request abort.

pub mod linker;
pub mod logging;

pub use linker::register_all;
pub use logging::GuestLogSink;
