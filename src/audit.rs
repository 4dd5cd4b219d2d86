//! Compliance audit: required pass specification versus the session record.
//!
//! The audit is a pure function over the expanded standard and the finalized
//! session. It never inspects the device; the record is the evidence. Every
//! discrepancy becomes a typed deviation and the verdict is compliant only
//! when the deviation list is empty.

use crate::session::{PassStatus, SessionStatus, VerificationOutcome, WipeSession};
use crate::standards::{Standard, StandardId, VerificationMode};
use crate::access::AccessMode;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    /// The sanitization claim does not hold.
    Critical,
    /// The claim holds with reduced assurance.
    Major,
    Minor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviationKind {
    StandardMismatch,
    SessionNotCompleted,
    AccessModeDowngrade,
    MissingPass,
    PatternMismatch,
    PassNotSucceeded,
    VerificationMissing,
    VerificationDowngraded,
    VerificationFailed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deviation {
    pub kind: DeviationKind,
    pub severity: Severity,
    /// Pass index the deviation refers to, where one applies.
    pub pass_index: Option<usize>,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditVerdict {
    pub standard_id: StandardId,
    pub session_id: Uuid,
    pub compliant: bool,
    pub deviations: Vec<Deviation>,
}

/// Audits a finalized session against the standard it claims to satisfy.
pub fn audit(standard: &Standard, session: &WipeSession) -> AuditVerdict {
    let mut deviations = Vec::new();

    if session.standard_id != standard.id {
        deviations.push(Deviation {
            kind: DeviationKind::StandardMismatch,
            severity: Severity::Critical,
            pass_index: None,
            description: format!(
                "session records standard {} but was audited against {}",
                session.standard_id, standard.id
            ),
        });
    }

    if session.status != SessionStatus::Completed {
        deviations.push(Deviation {
            kind: DeviationKind::SessionNotCompleted,
            severity: Severity::Critical,
            pass_index: None,
            description: format!("session ended {:?}, not Completed", session.status),
        });
    }

    if session.access_mode == AccessMode::UtilityFallback {
        deviations.push(Deviation {
            kind: DeviationKind::AccessModeDowngrade,
            severity: Severity::Major,
            pass_index: None,
            description:
                "utility fallback was used; the standard's pass set was not executed as specified"
                    .to_string(),
        });
    }

    for (index, spec) in standard.passes.iter().enumerate() {
        let Some(pass) = session.passes.get(index) else {
            deviations.push(Deviation {
                kind: DeviationKind::MissingPass,
                severity: Severity::Critical,
                pass_index: Some(index),
                description: format!(
                    "required pass {} ({}) has no record",
                    index + 1,
                    spec.pattern
                ),
            });
            continue;
        };

        // Fill-byte comparison: equivalent spellings of the same pattern
        // (e.g. the complement of 0x00 and constant 0xFF) are not deviations.
        if pass.pattern.fill_byte() != spec.pattern.fill_byte() {
            deviations.push(Deviation {
                kind: DeviationKind::PatternMismatch,
                severity: Severity::Critical,
                pass_index: Some(index),
                description: format!(
                    "pass {} wrote {} where the standard requires {}",
                    index + 1,
                    pass.pattern,
                    spec.pattern
                ),
            });
        }

        if pass.status != PassStatus::Succeeded {
            deviations.push(Deviation {
                kind: DeviationKind::PassNotSucceeded,
                severity: Severity::Critical,
                pass_index: Some(index),
                description: format!(
                    "pass {} ended {:?} after {} bytes",
                    index + 1,
                    pass.status,
                    pass.bytes_written
                ),
            });
        }

        if spec.verification != VerificationMode::None {
            match pass.verification {
                VerificationOutcome::Passed { mode } if mode == spec.verification => {}
                VerificationOutcome::Passed { mode } => {
                    deviations.push(Deviation {
                        kind: DeviationKind::VerificationDowngraded,
                        severity: Severity::Major,
                        pass_index: Some(index),
                        description: format!(
                            "pass {} verified {:?} where the standard requires {:?}",
                            index + 1,
                            mode,
                            spec.verification
                        ),
                    });
                }
                VerificationOutcome::Failed { offset, .. } => {
                    deviations.push(Deviation {
                        kind: DeviationKind::VerificationFailed,
                        severity: Severity::Critical,
                        pass_index: Some(index),
                        description: format!(
                            "pass {} verification failed at offset {offset}",
                            index + 1
                        ),
                    });
                }
                VerificationOutcome::NotPerformed => {
                    deviations.push(Deviation {
                        kind: DeviationKind::VerificationMissing,
                        severity: Severity::Major,
                        pass_index: Some(index),
                        description: format!(
                            "pass {} requires {:?} verification but none was performed",
                            index + 1,
                            spec.verification
                        ),
                    });
                }
            }
        }
    }

    AuditVerdict {
        standard_id: standard.id,
        session_id: session.session_id,
        compliant: deviations.is_empty(),
        deviations,
    }
}
