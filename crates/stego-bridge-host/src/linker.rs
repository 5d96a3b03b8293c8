//! Host import registration for the guest linker.
//!
//! This module wires everything the guest module may declare as an import:
//! the diagnostic log channel and the WASI preview1 system-interface stubs
//! (clock/random/file placeholders). Registration happens once, before the
//! guest is loaded; an import the linker does not carry fails at
//! instantiation, never mid-request.

use stego_bridge_common::StartupError;
use stego_bridge_core::HostState;
use tracing::warn;
use wasmtime::{Caller, Linker};

use crate::logging::GuestLogSink;

/// Register all host imports on the guest linker.
///
/// This registers:
/// - `env::log` - one-way diagnostic channel for guest code
/// - WASI preview1 - system-interface stubs the guest declares even though
///   the algorithm never uses them
///
/// # Errors
///
/// Returns an error if function registration fails.
pub fn register_all(linker: &mut Linker<HostState>) -> Result<(), StartupError> {
    register_logging(linker)?;
    register_wasi(linker)?;
    Ok(())
}

/// Register the diagnostic log import.
///
/// Registers `env::log(ptr: i32, len: i32)`. The message is read from the
/// guest's exported memory as UTF-8. The import never raises into the guest:
/// bad pointers or lengths are logged on the host side and otherwise ignored.
pub fn register_logging(linker: &mut Linker<HostState>) -> Result<(), StartupError> {
    linker
        .func_wrap(
            "env",
            "log",
            |mut caller: Caller<'_, HostState>, ptr: i32, len: i32| {
                // Validate pointer and length are non-negative
                if ptr < 0 || len < 0 {
                    warn!(ptr, len, "Guest log call with negative pointer or length");
                    return;
                }

                let Some(memory) = caller
                    .get_export("memory")
                    .and_then(wasmtime::Extern::into_memory)
                else {
                    warn!("Guest log call but no memory export to read from");
                    return;
                };

                // Read the message out of guest memory before touching
                // caller.data_mut(); the borrows cannot overlap.
                #[allow(clippy::cast_sign_loss)]
                let message = {
                    let data = memory.data(&caller);
                    let start = ptr as usize;
                    let Some(end) = start.checked_add(len as usize) else {
                        warn!(ptr, len, "Guest log pointer + length overflow");
                        return;
                    };

                    if end > data.len() {
                        warn!(
                            start,
                            end,
                            memory_size = data.len(),
                            "Guest log message out of bounds"
                        );
                        return;
                    }

                    std::str::from_utf8(&data[start..end])
                        .unwrap_or("<invalid utf8>")
                        .to_string()
                };

                GuestLogSink::record(caller.data_mut(), &message);
            },
        )
        .map_err(|e| StartupError::host_import(format!("env::log: {e}")))?;

    Ok(())
}

/// Register the WASI preview1 system-interface stubs.
pub fn register_wasi(linker: &mut Linker<HostState>) -> Result<(), StartupError> {
    wasmtime_wasi::preview1::add_to_linker_sync(linker, HostState::wasi_mut)
        .map_err(|e| StartupError::host_import(format!("wasi preview1: {e}")))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use stego_bridge_core::GuestRuntime;

    #[test]
    fn test_register_all() {
        let mut runtime = GuestRuntime::new();
        let result = register_all(runtime.linker_mut());
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_guest_log_captured() {
        let wat = r#"
            (module
                (import "env" "log" (func $log (param i32 i32)))
                (memory (export "memory") 1)
                (data (i32.const 0) "secret embedded")
                (func (export "cabi_realloc") (param i32 i32 i32 i32) (result i32)
                    i32.const 64)
                (func (export "encode-secret-into-bmp") (param i32 i32 i32 i32) (result i32)
                    (call $log (i32.const 0) (i32.const 15))
                    i32.const 64)
                (func (export "decode-secret-from-bmp") (param i32 i32) (result i32)
                    unreachable)
                (func (export "encode-secret-into-jpeg") (param i32 i32 i32 i32) (result i32)
                    unreachable)
                (func (export "decode-secret-from-jpeg") (param i32 i32) (result i32)
                    unreachable)
            )
        "#;

        let mut runtime = GuestRuntime::new();
        register_all(runtime.linker_mut()).unwrap();
        let instance = runtime.load_wat(wat).unwrap();

        // The stub encode calls log once; drive it through the bridge so the
        // import fires inside a real invocation. The stub returns a bogus
        // record pointer; only the log capture matters here, the call result
        // is ignored.
        let bridge = stego_bridge_core::StegoBridge::new(instance);
        let _ = bridge
            .encode("s", b"BMdata", stego_bridge_core::ContainerKind::Bitmap)
            .await;

        let logs = bridge.take_guest_logs().await;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].message, "secret embedded");
    }
}
