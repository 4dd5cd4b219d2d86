//! OS-utility fallback: wraps an external disk-clearing tool behind the
//! `DeviceAccess` contract.
//!
//! The utility performs a single whole-device zero fill with no addressable
//! granularity, so addressable reads and writes are refused. The reduced
//! fidelity is recorded in the session by the orchestrator and shows up as
//! deviations in the audit; it is never presented as "standard satisfied".

use super::{AccessMode, DeviceAccess};
use crate::{WipeError, WipeResult};
use std::path::PathBuf;
use std::process::Command;

/// External disk-clearing command, e.g. `blkdiscard -z <device>`.
#[derive(Debug, Clone)]
pub struct ClearUtility {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for ClearUtility {
    fn default() -> Self {
        Self {
            program: "blkdiscard".to_string(),
            args: vec!["-z".to_string()],
        }
    }
}

pub struct UtilityFallbackAccess {
    device_path: PathBuf,
    capacity: u64,
    utility: ClearUtility,
}

impl UtilityFallbackAccess {
    pub fn new(device_path: impl Into<PathBuf>, capacity: u64, utility: ClearUtility) -> Self {
        Self {
            device_path: device_path.into(),
            capacity,
            utility,
        }
    }

    fn unsupported(&self, what: &str) -> WipeError {
        WipeError::DeviceIo(format!(
            "{what} not available via utility fallback ({})",
            self.utility.program
        ))
    }
}

impl DeviceAccess for UtilityFallbackAccess {
    fn mode(&self) -> AccessMode {
        AccessMode::UtilityFallback
    }

    fn capacity(&self) -> u64 {
        self.capacity
    }

    fn write_chunk(&mut self, _offset: u64, _buf: &[u8]) -> WipeResult<()> {
        Err(self.unsupported("addressable write"))
    }

    fn read_chunk(&mut self, _offset: u64, _len: usize) -> WipeResult<Vec<u8>> {
        Err(self.unsupported("addressable read"))
    }

    fn flush(&mut self) -> WipeResult<()> {
        Ok(())
    }

    fn is_addressable(&self) -> bool {
        false
    }

    fn clear_device(&mut self) -> WipeResult<u64> {
        let output = Command::new(&self.utility.program)
            .args(&self.utility.args)
            .arg(&self.device_path)
            .output()
            .map_err(|e| {
                WipeError::DeviceIo(format!(
                    "failed to launch {}: {e}",
                    self.utility.program
                ))
            })?;

        if !output.status.success() {
            return Err(WipeError::DeviceIo(format!(
                "{} exited with {}: {}",
                self.utility.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        tracing::info!(
            device = %self.device_path.display(),
            utility = %self.utility.program,
            "utility fallback completed whole-device zero fill"
        );
        Ok(self.capacity)
    }
}
