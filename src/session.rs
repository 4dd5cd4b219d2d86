//! Session record: the auditable evidence of what was actually done.
//!
//! A [`WipeSession`] is created when the orchestrator begins a device and is
//! mutated only by the orchestrator and its executor/verifier. Once a
//! terminal status is set the record is finalized and never mutated again;
//! the serialized form is versioned so an audit can be independently re-run
//! later against the same standard definition.

use crate::access::AccessMode;
use crate::standards::{PatternKind, StandardId, VerificationMode};
use crate::{WipeError, WipeResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Bump when the serialized session layout changes incompatibly.
pub const SESSION_SCHEMA_VERSION: u32 = 1;

/// A storage device as reported by the external detection collaborator.
///
/// The `system_disk` flag is authoritative and treated as a hard gate: a
/// flagged device is never opened for writing under any code path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Stable identifier; for raw access this is the device path.
    pub id: String,
    /// Capacity in bytes.
    pub capacity: u64,
    /// Logical sector size in bytes.
    pub sector_size: u32,
    pub model: String,
    pub serial: String,
    /// Boot/system-disk flag supplied by the external detection layer.
    pub system_disk: bool,
}

impl Device {
    pub fn new(id: impl Into<String>, capacity: u64) -> Self {
        Self {
            id: id.into(),
            capacity,
            sector_size: 512,
            model: "Unknown".to_string(),
            serial: "N/A".to_string(),
            system_disk: false,
        }
    }

    pub fn with_identity(mut self, model: impl Into<String>, serial: impl Into<String>) -> Self {
        self.model = model.into();
        self.serial = serial.into();
        self
    }

    pub fn with_system_disk(mut self, system_disk: bool) -> Self {
        self.system_disk = system_disk;
        self
    }
}

/// Overall status of a session. Every variant except `InProgress` is
/// terminal and makes the record eligible for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    InProgress,
    Completed,
    Aborted,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PassStatus {
    Succeeded,
    Failed,
    Skipped,
}

/// Outcome of the verification attached to a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerificationOutcome {
    Passed {
        mode: VerificationMode,
    },
    /// First mismatch location is always recorded; a mismatch never
    /// silently downgrades to success.
    Failed {
        mode: VerificationMode,
        offset: u64,
    },
    NotPerformed,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThroughputSample {
    pub elapsed_secs: f64,
    pub bytes_per_sec: u64,
}

/// Record of one executed pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassResult {
    pub index: usize,
    pub pattern: PatternKind,
    pub bytes_written: u64,
    pub throughput: Vec<ThroughputSample>,
    pub verification: VerificationOutcome,
    pub status: PassStatus,
    pub error: Option<String>,
}

/// Timestamped entry in the session event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    pub at: DateTime<Utc>,
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WipeSession {
    pub schema_version: u32,
    pub session_id: Uuid,
    pub device: Device,
    pub standard_id: StandardId,
    /// Access mode actually used; a utility-fallback run is recorded here,
    /// never silently upgraded to "standard satisfied".
    pub access_mode: AccessMode,
    pub passes: Vec<PassResult>,
    pub status: SessionStatus,
    pub events: Vec<SessionEvent>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl WipeSession {
    pub(crate) fn begin(device: Device, standard_id: StandardId) -> Self {
        Self {
            schema_version: SESSION_SCHEMA_VERSION,
            session_id: Uuid::new_v4(),
            device,
            standard_id,
            access_mode: AccessMode::Raw,
            passes: Vec::new(),
            status: SessionStatus::InProgress,
            events: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub(crate) fn log(&mut self, kind: &str, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(session = %self.session_id, kind, "{message}");
        self.events.push(SessionEvent {
            at: Utc::now(),
            kind: kind.to_string(),
            message,
        });
    }

    /// Sets a terminal status exactly once.
    pub(crate) fn finalize(&mut self, status: SessionStatus) {
        debug_assert!(!self.is_finalized(), "session finalized twice");
        debug_assert_ne!(status, SessionStatus::InProgress);
        self.status = status;
        self.finished_at = Some(Utc::now());
    }

    pub fn is_finalized(&self) -> bool {
        self.status != SessionStatus::InProgress
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        self.finished_at.map(|end| end - self.started_at)
    }

    pub fn total_bytes_written(&self) -> u64 {
        self.passes.iter().map(|p| p.bytes_written).sum()
    }

    pub fn to_json(&self) -> WipeResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| WipeError::Configuration(format!("session serialization failed: {e}")))
    }

    /// Restores a persisted session record, rejecting unknown schema versions.
    pub fn from_json(raw: &str) -> WipeResult<Self> {
        let session: WipeSession = serde_json::from_str(raw)
            .map_err(|e| WipeError::Configuration(format!("malformed session record: {e}")))?;
        if session.schema_version != SESSION_SCHEMA_VERSION {
            return Err(WipeError::Configuration(format!(
                "unsupported session schema version {} (expected {})",
                session.schema_version, SESSION_SCHEMA_VERSION
            )));
        }
        Ok(session)
    }

    /// SHA-256 over the canonical serialized record, for tamper evidence in
    /// emitted reports.
    pub fn record_digest(&self) -> WipeResult<String> {
        let canonical = serde_json::to_vec(self)
            .map_err(|e| WipeError::Configuration(format!("session serialization failed: {e}")))?;
        let digest = Sha256::digest(&canonical);
        Ok(digest.iter().map(|b| format!("{b:02x}")).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_session() -> WipeSession {
        let device = Device::new("/dev/sdx", 1024 * 1024).with_identity("TestDisk", "SN-1");
        let mut session = WipeSession::begin(device, StandardId::Nist80088Clear);
        session.log("start", "session started");
        session.passes.push(PassResult {
            index: 0,
            pattern: PatternKind::Zero,
            bytes_written: 1024 * 1024,
            throughput: vec![ThroughputSample {
                elapsed_secs: 0.5,
                bytes_per_sec: 2 * 1024 * 1024,
            }],
            verification: VerificationOutcome::Passed {
                mode: VerificationMode::FullScan,
            },
            status: PassStatus::Succeeded,
            error: None,
        });
        session.finalize(SessionStatus::Completed);
        session
    }

    #[test]
    fn finalize_sets_terminal_state_and_timestamp() {
        let session = sample_session();
        assert!(session.is_finalized());
        assert!(session.finished_at.is_some());
        assert!(session.duration().unwrap() >= chrono::Duration::zero());
    }

    #[test]
    fn record_round_trips_through_json() {
        let session = sample_session();
        let json = session.to_json().unwrap();
        let restored = WipeSession::from_json(&json).unwrap();
        assert_eq!(restored, session);
    }

    #[test]
    fn unknown_schema_version_is_rejected() {
        let mut session = sample_session();
        session.schema_version = 99;
        let json = serde_json::to_string(&session).unwrap();
        let err = WipeSession::from_json(&json).unwrap_err();
        assert!(matches!(err, WipeError::Configuration(_)));
    }

    #[test]
    fn digest_tracks_record_content() {
        let session = sample_session();
        let digest = session.record_digest().unwrap();
        assert_eq!(digest.len(), 64);

        let mut tampered = session.clone();
        tampered.passes[0].bytes_written -= 1;
        assert_ne!(tampered.record_digest().unwrap(), digest);
    }
}
