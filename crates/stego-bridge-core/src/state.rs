//! Store data for the guest instance.
//!
//! This module provides:
//! - [`HostState`]: State owned by the instance's [`wasmtime::Store`],
//!   accessible from host functions
//! - [`GuestLogEntry`]: A diagnostic message the guest emitted through the
//!   one-way log import

use std::time::Instant;

use wasmtime_wasi::WasiCtxBuilder;
use wasmtime_wasi::preview1::WasiP1Ctx;

/// State attached to the guest instance's store.
///
/// The guest runs for the whole process lifetime, so unlike a per-request
/// context this state lives as long as the instance. Host functions reach it
/// through the [`wasmtime::Caller`] API.
///
/// # Contents
///
/// - `wasi`: WASI preview1 context satisfying the guest's declared
///   system-interface imports (clock/random/file placeholders); the
///   steganography algorithm itself never exercises them
/// - `logs`: diagnostic messages captured from the guest's log import
pub struct HostState {
    /// WASI preview1 context for system-interface stubs.
    wasi: WasiP1Ctx,

    /// Diagnostic messages collected from the guest.
    pub logs: Vec<GuestLogEntry>,
}

/// A single diagnostic message from guest code.
#[derive(Debug, Clone)]
pub struct GuestLogEntry {
    /// Message content.
    pub message: String,

    /// When the message was recorded.
    pub timestamp: Instant,
}

impl HostState {
    /// Create the store state with minimal WASI permissions.
    pub fn new() -> Self {
        let wasi = WasiCtxBuilder::new()
            .inherit_stdout()
            .inherit_stderr()
            .build_p1();

        Self {
            wasi,
            logs: Vec::new(),
        }
    }

    /// Record a diagnostic message from the guest.
    pub fn record_log(&mut self, message: String) {
        self.logs.push(GuestLogEntry {
            message,
            timestamp: Instant::now(),
        });
    }

    /// Get a mutable reference to the WASI context.
    pub fn wasi_mut(&mut self) -> &mut WasiP1Ctx {
        &mut self.wasi
    }
}

impl Default for HostState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_starts_empty() {
        let state = HostState::new();
        assert!(state.logs.is_empty());
    }

    #[test]
    fn test_record_log() {
        let mut state = HostState::new();

        state.record_log("first".into());
        state.record_log("second".into());

        assert_eq!(state.logs.len(), 2);
        assert_eq!(state.logs[0].message, "first");
        assert_eq!(state.logs[1].message, "second");
        // Timestamps follow recording order
        assert!(state.logs[0].timestamp <= state.logs[1].timestamp);
    }
}
