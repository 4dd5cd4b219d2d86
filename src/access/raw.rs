//! Direct raw block I/O with an exclusive advisory lock.

use super::{check_bounds, AccessMode, DeviceAccess};
use crate::{WipeError, WipeResult};
use nix::fcntl::{flock, FlockArg};
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom};
use std::os::unix::fs::FileExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;

#[derive(Debug)]
pub struct RawDeviceAccess {
    file: File,
    capacity: u64,
}

impl RawDeviceAccess {
    /// Opens the device for exclusive writing.
    ///
    /// An unavailable lock is the sharing violation typical of RAID or
    /// encryption controllers holding the device; it surfaces as
    /// `AccessDenied` so the orchestrator can switch to the fallback.
    pub fn open(path: impl AsRef<Path>, capacity_hint: Option<u64>) -> WipeResult<Self> {
        let path = path.as_ref();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::PermissionDenied => WipeError::AccessDenied(format!(
                    "cannot open {} for writing: {e}",
                    path.display()
                )),
                _ => WipeError::DeviceIo(format!("cannot open {}: {e}", path.display())),
            })?;

        flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock).map_err(|_| {
            WipeError::AccessDenied(format!(
                "exclusive lock unavailable for {} (device in use)",
                path.display()
            ))
        })?;

        // Block devices report a zero metadata length; seeking to the end is
        // the reliable way to learn the addressable size.
        let probed = file
            .seek(SeekFrom::End(0))
            .map_err(|e| WipeError::DeviceIo(format!("cannot size {}: {e}", path.display())))?;
        file.seek(SeekFrom::Start(0))
            .map_err(|e| WipeError::DeviceIo(e.to_string()))?;

        let capacity = match capacity_hint {
            Some(hint) if hint > 0 => hint,
            _ => probed,
        };

        Ok(Self { file, capacity })
    }
}

impl DeviceAccess for RawDeviceAccess {
    fn mode(&self) -> AccessMode {
        AccessMode::Raw
    }

    fn capacity(&self) -> u64 {
        self.capacity
    }

    fn write_chunk(&mut self, offset: u64, buf: &[u8]) -> WipeResult<()> {
        check_bounds(offset, buf.len(), self.capacity)?;
        self.file
            .write_all_at(buf, offset)
            .map_err(|e| WipeError::DeviceIo(format!("write at offset {offset}: {e}")))
    }

    fn read_chunk(&mut self, offset: u64, len: usize) -> WipeResult<Vec<u8>> {
        check_bounds(offset, len, self.capacity)?;
        let mut buf = vec![0u8; len];
        self.file
            .read_exact_at(&mut buf, offset)
            .map_err(|e| WipeError::DeviceIo(format!("read at offset {offset}: {e}")))?;
        Ok(buf)
    }

    fn flush(&mut self) -> WipeResult<()> {
        self.file
            .sync_all()
            .map_err(|e| WipeError::DeviceIo(format!("sync failed: {e}")))
    }
}
