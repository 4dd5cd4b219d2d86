//! In-memory simulated device.
//!
//! Backs simulation runs (a full session, report and audit without touching
//! hardware) and the whole test suite. Supports injection of transient write
//! failures, post-flush corruption and cancellation triggers so the failure
//! paths of the engine are exercisable deterministically.

use super::{check_bounds, AccessMode, AccessProvider, DeviceAccess};
use crate::session::Device;
use crate::{CancelToken, WipeError, WipeResult};
use std::sync::{Arc, Mutex};

/// Deterministic fault injection plan for a simulated device.
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    /// Writes covering this offset fail with a transient error, n times.
    pub transient_write: Option<(u64, u32)>,
    /// XOR this byte into the backing store at the given offset on the next
    /// flush, simulating silent corruption between write and verification.
    pub corrupt_on_flush: Option<(u64, u8)>,
    /// Cancel the token once cumulative writes reach the given offset.
    pub cancel_at: Option<(u64, CancelToken)>,
}

pub struct MemoryDeviceAccess {
    buffer: Arc<Mutex<Vec<u8>>>,
    mode: AccessMode,
    faults: FaultPlan,
    remaining_transient: u32,
    written_total: u64,
}

impl MemoryDeviceAccess {
    pub fn new(buffer: Arc<Mutex<Vec<u8>>>, mode: AccessMode, faults: FaultPlan) -> Self {
        let remaining_transient = faults.transient_write.map(|(_, n)| n).unwrap_or(0);
        Self {
            buffer,
            mode,
            faults,
            remaining_transient,
            written_total: 0,
        }
    }

    fn capacity_inner(&self) -> u64 {
        self.buffer.lock().expect("device buffer poisoned").len() as u64
    }
}

impl DeviceAccess for MemoryDeviceAccess {
    fn mode(&self) -> AccessMode {
        self.mode
    }

    fn capacity(&self) -> u64 {
        self.capacity_inner()
    }

    fn write_chunk(&mut self, offset: u64, buf: &[u8]) -> WipeResult<()> {
        let capacity = self.capacity_inner();
        check_bounds(offset, buf.len(), capacity)?;

        if let Some((fault_offset, _)) = self.faults.transient_write {
            let end = offset + buf.len() as u64;
            if self.remaining_transient > 0 && offset <= fault_offset && fault_offset < end {
                self.remaining_transient -= 1;
                return Err(WipeError::DeviceIo(format!(
                    "injected transient write failure at offset {fault_offset}"
                )));
            }
        }

        {
            let mut data = self.buffer.lock().expect("device buffer poisoned");
            data[offset as usize..offset as usize + buf.len()].copy_from_slice(buf);
        }
        self.written_total += buf.len() as u64;

        if let Some((trigger, token)) = &self.faults.cancel_at {
            if self.written_total >= *trigger {
                token.cancel();
            }
        }
        Ok(())
    }

    fn read_chunk(&mut self, offset: u64, len: usize) -> WipeResult<Vec<u8>> {
        let capacity = self.capacity_inner();
        check_bounds(offset, len, capacity)?;
        let data = self.buffer.lock().expect("device buffer poisoned");
        Ok(data[offset as usize..offset as usize + len].to_vec())
    }

    fn flush(&mut self) -> WipeResult<()> {
        if let Some((offset, xor)) = self.faults.corrupt_on_flush.take() {
            let mut data = self.buffer.lock().expect("device buffer poisoned");
            if (offset as usize) < data.len() {
                data[offset as usize] ^= xor;
            }
        }
        Ok(())
    }

    fn is_addressable(&self) -> bool {
        self.mode == AccessMode::Raw
    }

    fn clear_device(&mut self) -> WipeResult<u64> {
        if self.mode != AccessMode::UtilityFallback {
            return Err(WipeError::DeviceIo(
                "whole-device clear is a fallback-only operation".to_string(),
            ));
        }
        let mut data = self.buffer.lock().expect("device buffer poisoned");
        data.fill(0x00);
        Ok(data.len() as u64)
    }
}

/// Provider over a single shared in-memory device.
pub struct MemoryAccessProvider {
    buffer: Arc<Mutex<Vec<u8>>>,
    deny_raw: bool,
    faults: FaultPlan,
}

impl MemoryAccessProvider {
    /// Creates a simulated device pre-filled with 0xAB, standing in for a
    /// used drive.
    pub fn new(capacity: u64) -> Self {
        Self {
            buffer: Arc::new(Mutex::new(vec![0xAB; capacity as usize])),
            deny_raw: false,
            faults: FaultPlan::default(),
        }
    }

    /// Raw opens answer `AccessDenied`, forcing the orchestrator onto the
    /// utility fallback.
    pub fn deny_raw(mut self) -> Self {
        self.deny_raw = true;
        self
    }

    pub fn with_transient_write_failures(mut self, offset: u64, count: u32) -> Self {
        self.faults.transient_write = Some((offset, count));
        self
    }

    pub fn with_corruption_on_flush(mut self, offset: u64, xor: u8) -> Self {
        self.faults.corrupt_on_flush = Some((offset, xor));
        self
    }

    pub fn with_cancel_at(mut self, offset: u64, token: CancelToken) -> Self {
        self.faults.cancel_at = Some((offset, token));
        self
    }

    /// Copy of the backing bytes, for assertions after a run.
    pub fn snapshot(&self) -> Vec<u8> {
        self.buffer.lock().expect("device buffer poisoned").clone()
    }
}

impl AccessProvider for MemoryAccessProvider {
    fn open_raw(&self, device: &Device) -> WipeResult<Box<dyn DeviceAccess>> {
        if self.deny_raw {
            return Err(WipeError::AccessDenied(format!(
                "raw access to {} denied by simulation",
                device.id
            )));
        }
        Ok(Box::new(MemoryDeviceAccess::new(
            Arc::clone(&self.buffer),
            AccessMode::Raw,
            self.faults.clone(),
        )))
    }

    fn open_fallback(&self, _device: &Device) -> WipeResult<Box<dyn DeviceAccess>> {
        Ok(Box::new(MemoryDeviceAccess::new(
            Arc::clone(&self.buffer),
            AccessMode::UtilityFallback,
            self.faults.clone(),
        )))
    }
}
