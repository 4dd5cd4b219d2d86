//! Device-access abstraction.
//!
//! The engine is backend-agnostic: everything above this module talks to a
//! [`DeviceAccess`] capability and never cares whether the bytes land on a
//! raw block device, go through an OS disk-clearing utility, or stay in a
//! simulated in-memory device.

pub mod fallback;
pub mod memory;
pub mod raw;


pub use fallback::{ClearUtility, UtilityFallbackAccess};
pub use memory::{MemoryAccessProvider, MemoryDeviceAccess};
pub use raw::RawDeviceAccess;

use crate::session::Device;
use crate::{WipeError, WipeResult};
use serde::{Deserialize, Serialize};

/// Access mode actually used for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessMode {
    /// Direct raw block I/O with an exclusive write lock.
    Raw,
    /// Reduced-fidelity path via an external disk-clearing utility: a single
    /// whole-device zero fill with no addressable granularity.
    UtilityFallback,
}

/// Capability over raw block I/O.
///
/// Contract: `offset + buf.len()` must lie within the device capacity, else
/// `OutOfRange`. I/O failures surface as `DeviceIo`.
pub trait DeviceAccess: Send {
    fn mode(&self) -> AccessMode;

    fn capacity(&self) -> u64;

    fn write_chunk(&mut self, offset: u64, buf: &[u8]) -> WipeResult<()>;

    fn read_chunk(&mut self, offset: u64, len: usize) -> WipeResult<Vec<u8>>;

    fn flush(&mut self) -> WipeResult<()>;

    /// Whether the backend supports addressable reads/writes at chunk
    /// granularity. Utility fallback does not.
    fn is_addressable(&self) -> bool {
        true
    }

    /// Whole-device zero fill for non-addressable backends. Returns the
    /// number of bytes cleared.
    fn clear_device(&mut self) -> WipeResult<u64> {
        Err(WipeError::DeviceIo(
            "whole-device clear not supported by this backend".to_string(),
        ))
    }
}

/// Opens access handles for a device.
///
/// The orchestrator first asks for raw access; an `AccessDenied` answer is
/// the signal to switch to the utility fallback (logged, never silent).
pub trait AccessProvider: Send + Sync {
    /// Acquires an exclusive raw handle for writing. Sharing violations
    /// typical of RAID/encrypted controllers surface as `AccessDenied`.
    fn open_raw(&self, device: &Device) -> WipeResult<Box<dyn DeviceAccess>>;

    /// Opens the reduced-fidelity fallback path.
    fn open_fallback(&self, device: &Device) -> WipeResult<Box<dyn DeviceAccess>>;

    /// Probes whether raw access is usable without keeping the handle.
    fn detect_capability(&self, device: &Device) -> bool {
        self.open_raw(device).is_ok()
    }
}

/// Bounds check shared by every backend.
pub(crate) fn check_bounds(offset: u64, len: usize, capacity: u64) -> WipeResult<()> {
    let end = offset.checked_add(len as u64);
    match end {
        Some(end) if end <= capacity => Ok(()),
        _ => Err(WipeError::OutOfRange {
            offset,
            len: len as u64,
            capacity,
        }),
    }
}

/// Opens real devices: raw block I/O, falling back to an external utility.
pub struct SystemAccessProvider {
    utility: ClearUtility,
}

impl SystemAccessProvider {
    pub fn new(utility: ClearUtility) -> Self {
        Self { utility }
    }
}

impl Default for SystemAccessProvider {
    fn default() -> Self {
        Self::new(ClearUtility::default())
    }
}

impl AccessProvider for SystemAccessProvider {
    fn open_raw(&self, device: &Device) -> WipeResult<Box<dyn DeviceAccess>> {
        let access = RawDeviceAccess::open(&device.id, Some(device.capacity))?;
        Ok(Box::new(access))
    }

    fn open_fallback(&self, device: &Device) -> WipeResult<Box<dyn DeviceAccess>> {
        let access =
            UtilityFallbackAccess::new(&device.id, device.capacity, self.utility.clone());
        Ok(Box::new(access))
    }
}
