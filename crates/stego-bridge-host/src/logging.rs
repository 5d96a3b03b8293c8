//! Diagnostic log sink for guest messages.
//!
//! The guest gets a one-way channel to the host: messages are captured into
//! [`HostState`] and re-emitted via `tracing`. The channel never raises back
//! into the guest, whatever the message contains.

use stego_bridge_core::HostState;
use tracing::info;

/// Host implementation of the guest's diagnostic log import.
///
/// Messages are both:
/// 1. Stored in the [`HostState`] for later retrieval
/// 2. Emitted via the `tracing` crate for observability
pub struct GuestLogSink;

impl GuestLogSink {
    /// Record a message from the guest.
    pub fn record(state: &mut HostState, message: &str) {
        info!(guest_log = true, "{}", message);
        state.record_log(message.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_stored_in_state() {
        let mut state = HostState::new();

        GuestLogSink::record(&mut state, "embedding secret");
        GuestLogSink::record(&mut state, "done");

        assert_eq!(state.logs.len(), 2);
        assert_eq!(state.logs[0].message, "embedding secret");
        assert_eq!(state.logs[1].message, "done");
    }
}
