//! Encode/decode call protocol over the guest instance.
//!
//! This module provides [`StegoBridge`], the caller-facing surface of the
//! core. Each operation runs the same sequence: acquire the instance lock,
//! allocate and write inputs into guest memory, invoke the selected export,
//! decode the returned [`ResultRecord`], and copy the output into host-owned
//! storage. The only variation between bitmap and JPEG is which export pair
//! is invoked.
//!
//! # Concurrency
//!
//! A single `tokio::sync::Mutex` around the [`GuestInstance`] scopes the full
//! marshal-invoke-unmarshal sequence as one atomic unit; one guest instance's
//! memory is not safe for concurrent mutation. Callers suspend only while
//! awaiting the lock. Guest execution itself is synchronous and runs to
//! completion or traps; the guard is released on every exit path by drop.

use std::str::FromStr;
use std::time::Instant;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;
use wasmtime::{Store, Trap};

use crate::arena::MemoryArena;
use crate::runtime::GuestInstance;
use crate::state::{GuestLogEntry, HostState};
use stego_bridge_common::InvocationError;

/// Carrier image format, selecting which exported function pair is invoked.
///
/// The marshaling protocol is otherwise identical for both kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    /// 24-bit bitmap carrier.
    Bitmap,
    /// JPEG carrier.
    Jpeg,
}

impl ContainerKind {
    /// Infer the kind from a file extension.
    pub fn from_extension(path: &std::path::Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?;
        match ext.to_ascii_lowercase().as_str() {
            "bmp" => Some(Self::Bitmap),
            "jpg" | "jpeg" => Some(Self::Jpeg),
            _ => None,
        }
    }
}

impl FromStr for ContainerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bmp" | "bitmap" => Ok(Self::Bitmap),
            "jpg" | "jpeg" => Ok(Self::Jpeg),
            other => Err(format!(
                "unknown carrier format '{other}' (expected 'bmp' or 'jpeg')"
            )),
        }
    }
}

impl std::fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bitmap => write!(f, "bmp"),
            Self::Jpeg => write!(f, "jpeg"),
        }
    }
}

/// The 8-byte record a guest invocation writes to describe its output.
///
/// Bytes [0..4) are the little-endian address of the output data, bytes
/// [4..8) the little-endian length. Produced exactly once per call, consumed
/// immediately and discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ResultRecord {
    pub(crate) address: u32,
    pub(crate) length: u32,
}

impl ResultRecord {
    pub(crate) const SIZE: u32 = 8;

    pub(crate) fn decode(bytes: &[u8; 8]) -> Self {
        Self {
            address: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            length: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        }
    }
}

/// Caller-facing bridge over the single guest instance.
///
/// Thread-safe; clone an `Arc<StegoBridge>` to share it across tasks. All
/// operations observe and mutate guest memory strictly in lock-grant order,
/// and results are never interleaved.
pub struct StegoBridge {
    instance: Mutex<GuestInstance>,
}

impl StegoBridge {
    /// Wrap a loaded guest instance.
    pub fn new(instance: GuestInstance) -> Self {
        Self {
            instance: Mutex::new(instance),
        }
    }

    /// Hide `secret` inside `image`, returning the encoded carrier bytes.
    ///
    /// # Errors
    ///
    /// Returns [`InvocationError`] on guest trap (carrier too small,
    /// corrupted container), allocation failure, or a malformed result
    /// record. No retry is performed: guest behavior is deterministic, so an
    /// identical input would reproduce the identical failure.
    pub async fn encode(
        &self,
        secret: &str,
        image: &[u8],
        kind: ContainerKind,
    ) -> Result<Vec<u8>, InvocationError> {
        let call_id = Uuid::new_v4();
        debug!(%call_id, %kind, image_len = image.len(), "Encode requested");

        let mut guard = self.instance.lock().await;
        let start = Instant::now();
        let result = encode_locked(&mut guard, kind, secret, image);
        drop(guard);

        match &result {
            Ok(bytes) => info!(
                %call_id,
                %kind,
                duration_ms = start.elapsed().as_millis(),
                output_len = bytes.len(),
                "Encode completed"
            ),
            Err(e) => warn!(%call_id, %kind, error = %e, "Encode failed"),
        }

        result
    }

    /// Recover the secret hidden in `image`.
    ///
    /// # Errors
    ///
    /// Returns [`InvocationError`] on guest trap, including the case where no
    /// hidden secret is present; corrupted text is never returned.
    pub async fn decode(
        &self,
        image: &[u8],
        kind: ContainerKind,
    ) -> Result<String, InvocationError> {
        let call_id = Uuid::new_v4();
        debug!(%call_id, %kind, image_len = image.len(), "Decode requested");

        let mut guard = self.instance.lock().await;
        let start = Instant::now();
        let result = decode_locked(&mut guard, kind, image);
        drop(guard);

        match &result {
            Ok(secret) => info!(
                %call_id,
                %kind,
                duration_ms = start.elapsed().as_millis(),
                secret_len = secret.len(),
                "Decode completed"
            ),
            Err(e) => warn!(%call_id, %kind, error = %e, "Decode failed"),
        }

        result
    }

    /// Drain the diagnostic messages the guest has emitted so far.
    pub async fn take_guest_logs(&self) -> Vec<GuestLogEntry> {
        self.instance.lock().await.take_guest_logs()
    }

    /// Current guest linear memory size in pages.
    ///
    /// Pages are never reclaimed, so this only grows over the instance's
    /// lifetime; long-running deployments can watch it for capacity planning.
    pub async fn memory_pages(&self) -> u64 {
        self.instance.lock().await.memory_pages()
    }
}

impl std::fmt::Debug for StegoBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StegoBridge").finish_non_exhaustive()
    }
}

#[allow(clippy::cast_possible_wrap)]
fn encode_locked(
    instance: &mut GuestInstance,
    kind: ContainerKind,
    secret: &str,
    image: &[u8],
) -> Result<Vec<u8>, InvocationError> {
    let (store, arena, ops) = instance.parts();

    // str::len is the encoded byte length, which is what the allocation
    // and the guest both need; character count would truncate multi-byte
    // secrets.
    let secret_len = secret.len() as u32;
    let secret_addr = arena.allocate(store, secret_len)?;
    arena.write_utf8(store, secret_addr, secret)?;

    let image_len = image.len() as u32;
    let image_addr = arena.allocate(store, image_len)?;
    arena.write_bytes(store, image_addr, image)?;

    let func = match kind {
        ContainerKind::Bitmap => &ops.encode_bmp,
        ContainerKind::Jpeg => &ops.encode_jpeg,
    };

    let record_ptr = func
        .call(
            &mut *store,
            (
                secret_addr as i32,
                secret_len as i32,
                image_addr as i32,
                image_len as i32,
            ),
        )
        .map_err(|e| trap_error(&e))?;

    let record = read_result_record(store, arena, record_ptr)?;
    arena.read_bytes(store, record.address, record.length)
}

#[allow(clippy::cast_possible_wrap)]
fn decode_locked(
    instance: &mut GuestInstance,
    kind: ContainerKind,
    image: &[u8],
) -> Result<String, InvocationError> {
    let (store, arena, ops) = instance.parts();

    let image_len = image.len() as u32;
    let image_addr = arena.allocate(store, image_len)?;
    arena.write_bytes(store, image_addr, image)?;

    let func = match kind {
        ContainerKind::Bitmap => &ops.decode_bmp,
        ContainerKind::Jpeg => &ops.decode_jpeg,
    };

    let record_ptr = func
        .call(&mut *store, (image_addr as i32, image_len as i32))
        .map_err(|e| trap_error(&e))?;

    let record = read_result_record(store, arena, record_ptr)?;
    arena.read_utf8(store, record.address, record.length)
}

/// Read and decode the result record the guest wrote at `record_ptr`.
///
/// Both the record itself and the output region it describes are bounds
/// validated against the current memory length before any byte is read.
#[allow(clippy::cast_sign_loss)]
fn read_result_record(
    store: &mut Store<HostState>,
    arena: &MemoryArena,
    record_ptr: i32,
) -> Result<ResultRecord, InvocationError> {
    if record_ptr < 0 {
        return Err(InvocationError::trap(
            format!("guest returned invalid result pointer {record_ptr}"),
            None,
        ));
    }

    let bytes = arena.read_bytes(store, record_ptr as u32, ResultRecord::SIZE)?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes);

    Ok(ResultRecord::decode(&raw))
}

/// Extract human-readable trap information from a failed guest call.
fn trap_error(error: &wasmtime::Error) -> InvocationError {
    let code = error.downcast_ref::<Trap>().map(|trap| format!("{trap:?}"));
    InvocationError::trap(error.to_string(), code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_container_kind_from_str() {
        assert_eq!("bmp".parse::<ContainerKind>(), Ok(ContainerKind::Bitmap));
        assert_eq!("bitmap".parse::<ContainerKind>(), Ok(ContainerKind::Bitmap));
        assert_eq!("jpeg".parse::<ContainerKind>(), Ok(ContainerKind::Jpeg));
        assert_eq!("JPG".parse::<ContainerKind>(), Ok(ContainerKind::Jpeg));
        assert!("png".parse::<ContainerKind>().is_err());
    }

    #[test]
    fn test_container_kind_display() {
        assert_eq!(ContainerKind::Bitmap.to_string(), "bmp");
        assert_eq!(ContainerKind::Jpeg.to_string(), "jpeg");
    }

    #[test]
    fn test_container_kind_from_extension() {
        assert_eq!(
            ContainerKind::from_extension(Path::new("carrier.bmp")),
            Some(ContainerKind::Bitmap)
        );
        assert_eq!(
            ContainerKind::from_extension(Path::new("photo.JPG")),
            Some(ContainerKind::Jpeg)
        );
        assert_eq!(
            ContainerKind::from_extension(Path::new("photo.jpeg")),
            Some(ContainerKind::Jpeg)
        );
        assert_eq!(ContainerKind::from_extension(Path::new("doc.png")), None);
        assert_eq!(ContainerKind::from_extension(Path::new("noext")), None);
    }

    #[test]
    fn test_result_record_decode() {
        let record = ResultRecord::decode(&[0x10, 0x20, 0x00, 0x00, 0x2A, 0x00, 0x00, 0x00]);
        assert_eq!(record.address, 0x2010);
        assert_eq!(record.length, 42);
    }
}
