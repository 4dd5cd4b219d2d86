// Allow uppercase acronyms for industry-standard terms like DoD, NIST, BSI
#![allow(clippy::upper_case_acronyms)]

pub mod access;
pub mod audit;
pub mod crypto;
pub mod executor;
pub mod orchestrator;
pub mod retry;
pub mod session;
pub mod standards;
pub mod verify;

// Re-export the main engine surface for convenience
pub use audit::{audit, AuditVerdict, Deviation, DeviationKind, Severity};
pub use executor::{ProgressEvent, ProgressSender};
pub use orchestrator::{
    wipe_device, wipe_devices, OrchestratorConfig, WipeOrchestrator, WipeRequest,
};
pub use session::{Device, PassResult, SessionStatus, WipeSession};
pub use standards::{PassSpec, PatternKind, Standard, StandardId, VerificationMode};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Engine error taxonomy.
///
/// `Configuration` and `SafetyViolation` are fatal and pre-destructive: the
/// orchestrator raises them before any write is attempted. `AccessDenied`
/// triggers the logged utility fallback instead of aborting. `DeviceIo` is
/// retried with bounded backoff; exhaustion fails only the affected session.
#[derive(Error, Debug)]
pub enum WipeError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("safety violation: {0}")]
    SafetyViolation(String),

    #[error("raw device access denied: {0}")]
    AccessDenied(String),

    #[error("device I/O error: {0}")]
    DeviceIo(String),

    #[error("offset {offset} + length {len} exceeds device capacity {capacity}")]
    OutOfRange { offset: u64, len: u64, capacity: u64 },

    #[error("verification failed at offset {offset}")]
    VerificationFailed { offset: u64 },

    #[error("cancellation requested")]
    Cancelled,
}

impl WipeError {
    /// Transient errors re-enter the retry policy; everything else is final.
    pub fn is_transient(&self) -> bool {
        matches!(self, WipeError::DeviceIo(_))
    }
}

impl From<std::io::Error> for WipeError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => WipeError::AccessDenied(err.to_string()),
            _ => WipeError::DeviceIo(err.to_string()),
        }
    }
}

pub type WipeResult<T> = Result<T, WipeError>;

/// Cooperative cancellation handle.
///
/// Polled at chunk boundaries only, never mid-write, so no chunk is left in a
/// partially-written ambiguous state. One token per session; there is no
/// process-global interrupt state.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod lib_tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(WipeError::DeviceIo("timeout".into()).is_transient());
        assert!(!WipeError::AccessDenied("locked".into()).is_transient());
        assert!(!WipeError::SafetyViolation("system disk".into()).is_transient());
        assert!(!WipeError::VerificationFailed { offset: 42 }.is_transient());
        assert!(!WipeError::Cancelled.is_transient());
    }

    #[test]
    fn io_error_mapping() {
        let denied = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "no");
        assert!(matches!(WipeError::from(denied), WipeError::AccessDenied(_)));

        let other = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow");
        assert!(matches!(WipeError::from(other), WipeError::DeviceIo(_)));
    }

    #[test]
    fn cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
