//! Wipe orchestrator: drives one device through its full standard-defined
//! pass/verify sequence.
//!
//! State machine: Idle -> Validating -> SelectingAccessMode ->
//! Executing(i)/Verifying(i) -> Finalizing -> {Completed | Aborted | Failed}.
//! Validation failures are pre-destructive: no handle is opened and no write
//! occurs. Every terminal state finalizes the session and makes it eligible
//! for reporting; failure never suppresses the record.

use crate::access::{AccessMode, AccessProvider, DeviceAccess};
use crate::executor::{PassExecutor, PassFailure, ProgressSender, DEFAULT_CHUNK_SIZE};
use crate::retry::RetryPolicy;
use crate::session::{
    Device, PassResult, PassStatus, SessionStatus, VerificationOutcome, WipeSession,
};
use crate::standards::{self, PassSpec, PatternKind, VerificationMode};
use crate::verify::Verifier;
use crate::{CancelToken, WipeError, WipeResult};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;


/// Explicit configuration, constructed once and passed in; the engine keeps
/// no process-wide mutable state.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub chunk_size: usize,
    pub retry: RetryPolicy,
    pub progress_interval: Duration,
    pub write_timeout: Duration,
    /// Allow one re-execution of a pass whose required verification failed.
    pub reexecute_failed_verification: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            retry: RetryPolicy::transient(),
            progress_interval: Duration::from_millis(250),
            write_timeout: Duration::from_secs(30),
            reexecute_failed_verification: true,
        }
    }
}

/// Structured request gating the irreversible action. Supplied once by the
/// external interaction layer, not as a conversational loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WipeRequest {
    pub device_id: String,
    pub standard_id: String,
    pub confirmation_token: String,
}

impl WipeRequest {
    pub fn new(
        device_id: impl Into<String>,
        standard_id: impl Into<String>,
        confirmation_token: impl Into<String>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            standard_id: standard_id.into(),
            confirmation_token: confirmation_token.into(),
        }
    }

    /// The token the caller must supply to confirm destruction of a device.
    pub fn expected_token(device_id: &str) -> String {
        format!("ERASE {device_id}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Validating,
    SelectingAccessMode,
    Executing(usize),
    Verifying(usize),
    Finalizing,
    Completed,
    Aborted,
    Failed,
}

pub struct WipeOrchestrator {
    config: OrchestratorConfig,
    provider: Arc<dyn AccessProvider>,
    cancel: CancelToken,
    progress: Option<ProgressSender>,
    state: SessionState,
    finished_devices: HashSet<String>,
}

impl WipeOrchestrator {
    pub fn new(config: OrchestratorConfig, provider: Arc<dyn AccessProvider>) -> Self {
        Self {
            config,
            provider,
            cancel: CancelToken::new(),
            progress: None,
            state: SessionState::Idle,
            finished_devices: HashSet::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, progress: ProgressSender) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Runs one device through the full pass/verify sequence.
    ///
    /// `Err` is returned only for pre-destructive fatal conditions
    /// (`Configuration`, `SafetyViolation`) where nothing was written.
    /// Everything that happens after the first write ends in `Ok` with a
    /// finalized session, whatever its terminal status.
    pub fn run(&mut self, device: &Device, request: &WipeRequest) -> WipeResult<WipeSession> {
        self.transition(SessionState::Validating);
        let standard = standards::generate_by_name(&request.standard_id)?;
        self.validate(device, request)?;

        let mut session = WipeSession::begin(device.clone(), standard.id);
        session.log(
            "start",
            format!(
                "sanitizing {} ({} bytes) to {}",
                device.id, device.capacity, standard.name
            ),
        );

        self.transition(SessionState::SelectingAccessMode);
        let mut access = match self.provider.open_raw(device) {
            Ok(access) => {
                session.access_mode = AccessMode::Raw;
                access
            }
            Err(WipeError::AccessDenied(reason)) => {
                tracing::warn!(device = %device.id, %reason, "raw access denied, using utility fallback");
                session.log(
                    "access_downgrade",
                    format!("raw access denied ({reason}); continuing via utility fallback"),
                );
                match self.provider.open_fallback(device) {
                    Ok(access) => {
                        session.access_mode = AccessMode::UtilityFallback;
                        access
                    }
                    Err(e) => {
                        session.log("error", format!("fallback open failed: {e}"));
                        return Ok(self.finish(session, SessionStatus::Failed));
                    }
                }
            }
            Err(e) => {
                session.log("error", format!("device open failed: {e}"));
                return Ok(self.finish(session, SessionStatus::Failed));
            }
        };

        let plan = self.plan(&standard.passes, &mut session);

        let mut executor = PassExecutor::new(
            self.config.chunk_size,
            self.config.progress_interval,
            self.config.write_timeout,
            self.config.retry.clone(),
            self.cancel.clone(),
            self.progress.clone(),
        );
        let verifier = Verifier::new(self.config.chunk_size, self.cancel.clone());

        for (index, spec) in plan.iter().enumerate() {
            self.transition(SessionState::Executing(index));
            session.log(
                "pass_start",
                format!("pass {}/{} pattern {}", index + 1, plan.len(), spec.pattern),
            );

            let executed = if access.is_addressable() {
                executor.execute_pass(access.as_mut(), &device.id, index, spec)
            } else {
                executor.execute_clear(access.as_mut(), &device.id, index)
            };

            let mut pass = match executed {
                Ok(pass) => pass,
                Err(PassFailure { result, error }) => {
                    session.log(
                        "pass_error",
                        format!(
                            "pass {} stopped after {} bytes: {error}",
                            index + 1,
                            result.bytes_written
                        ),
                    );
                    session.passes.push(result);
                    let status = match error {
                        WipeError::Cancelled => SessionStatus::Aborted,
                        _ => SessionStatus::Failed,
                    };
                    return Ok(self.finish(session, status));
                }
            };
            session.log(
                "pass_end",
                format!(
                    "pass {}/{} wrote {} bytes",
                    index + 1,
                    plan.len(),
                    pass.bytes_written
                ),
            );

            if spec.verification != VerificationMode::None && access.is_addressable() {
                self.transition(SessionState::Verifying(index));
                session.log(
                    "verify_start",
                    format!("verifying pass {} ({:?})", index + 1, spec.verification),
                );

                match verifier.verify(access.as_mut(), spec, spec.verification) {
                    Ok(()) => {
                        pass.verification = VerificationOutcome::Passed {
                            mode: spec.verification,
                        };
                        session.log("verify_ok", format!("pass {} verified", index + 1));
                    }
                    Err(WipeError::VerificationFailed { offset })
                        if self.config.reexecute_failed_verification =>
                    {
                        session.log(
                            "verify_retry",
                            format!(
                                "verification failed at offset {offset}; re-executing pass {}",
                                index + 1
                            ),
                        );
                        match self.reexecute_and_verify(
                            &mut executor,
                            &verifier,
                            access.as_mut(),
                            &device.id,
                            index,
                            spec,
                        ) {
                            Ok(reexecuted) => {
                                pass = reexecuted;
                                session.log(
                                    "verify_ok",
                                    format!("pass {} verified after re-execution", index + 1),
                                );
                            }
                            Err((failed_pass, status, reason)) => {
                                session.log("verify_failed", reason);
                                session.passes.push(failed_pass);
                                return Ok(self.finish(session, status));
                            }
                        }
                    }
                    Err(WipeError::VerificationFailed { offset }) => {
                        self.mark_verification_failed(&mut pass, spec.verification, offset);
                        session.log(
                            "verify_failed",
                            format!("pass {} mismatch at offset {offset}", index + 1),
                        );
                        session.passes.push(pass);
                        return Ok(self.finish(session, SessionStatus::Failed));
                    }
                    Err(WipeError::Cancelled) => {
                        session.log("verify_cancelled", "cancelled during verification");
                        session.passes.push(pass);
                        return Ok(self.finish(session, SessionStatus::Aborted));
                    }
                    Err(e) => {
                        session.log("verify_error", format!("verification I/O failure: {e}"));
                        session.passes.push(pass);
                        return Ok(self.finish(session, SessionStatus::Failed));
                    }
                }
            }

            session.passes.push(pass);
        }

        session.log(
            "complete",
            format!(
                "all {} passes completed, {} bytes written in total",
                plan.len(),
                session.total_bytes_written()
            ),
        );
        Ok(self.finish(session, SessionStatus::Completed))
    }

    /// Pre-destructive gate. Rejections here guarantee no write occurred.
    fn validate(&self, device: &Device, request: &WipeRequest) -> WipeResult<()> {
        if device.id != request.device_id {
            return Err(WipeError::SafetyViolation(format!(
                "request targets {} but device is {}",
                request.device_id, device.id
            )));
        }
        if request.confirmation_token != WipeRequest::expected_token(&device.id) {
            return Err(WipeError::SafetyViolation(format!(
                "confirmation token mismatch for {}",
                device.id
            )));
        }
        if device.system_disk {
            return Err(WipeError::SafetyViolation(format!(
                "{} is flagged as the boot/system disk",
                device.id
            )));
        }
        if device.capacity == 0 {
            return Err(WipeError::SafetyViolation(format!(
                "{} reports zero capacity",
                device.id
            )));
        }
        if self.finished_devices.contains(&device.id) {
            return Err(WipeError::SafetyViolation(format!(
                "{} already has a finalized session in this run",
                device.id
            )));
        }
        Ok(())
    }

    /// The pass plan actually executable with the selected access mode. The
    /// utility fallback is capped to a single zero fill; the reduction is
    /// recorded, never presented as the standard's pass set.
    fn plan(&self, required: &[PassSpec], session: &mut WipeSession) -> Vec<PassSpec> {
        if session.access_mode == AccessMode::UtilityFallback {
            session.log(
                "plan_reduced",
                "utility fallback supports a single zero-fill pass without addressable verification",
            );
            vec![PassSpec::new(PatternKind::Zero, VerificationMode::None)]
        } else {
            required.to_vec()
        }
    }

    /// One bounded re-execution of a pass whose verification failed.
    #[allow(clippy::type_complexity)]
    fn reexecute_and_verify(
        &self,
        executor: &mut PassExecutor,
        verifier: &Verifier,
        access: &mut dyn DeviceAccess,
        device_id: &str,
        index: usize,
        spec: &PassSpec,
    ) -> Result<PassResult, (PassResult, SessionStatus, String)> {
        match executor.execute_pass(access, device_id, index, spec) {
            Ok(mut pass) => match verifier.verify(access, spec, spec.verification) {
                Ok(()) => {
                    pass.verification = VerificationOutcome::Passed {
                        mode: spec.verification,
                    };
                    Ok(pass)
                }
                Err(WipeError::VerificationFailed { offset }) => {
                    self.mark_verification_failed(&mut pass, spec.verification, offset);
                    Err((
                        pass,
                        SessionStatus::Failed,
                        format!(
                            "pass {} failed verification again at offset {offset}",
                            index + 1
                        ),
                    ))
                }
                Err(WipeError::Cancelled) => Err((
                    pass,
                    SessionStatus::Aborted,
                    "cancelled during re-verification".to_string(),
                )),
                Err(e) => Err((
                    pass,
                    SessionStatus::Failed,
                    format!("re-verification I/O failure: {e}"),
                )),
            },
            Err(PassFailure { result, error }) => {
                let status = match error {
                    WipeError::Cancelled => SessionStatus::Aborted,
                    _ => SessionStatus::Failed,
                };
                Err((result, status, format!("pass re-execution failed: {error}")))
            }
        }
    }

    fn mark_verification_failed(
        &self,
        pass: &mut PassResult,
        mode: VerificationMode,
        offset: u64,
    ) {
        pass.verification = VerificationOutcome::Failed { mode, offset };
        pass.status = PassStatus::Failed;
        pass.error = Some(format!("verification failed at offset {offset}"));
    }

    fn finish(&mut self, mut session: WipeSession, status: SessionStatus) -> WipeSession {
        self.transition(SessionState::Finalizing);
        session.log("finalized", format!("session terminal status {status:?}"));
        session.finalize(status);
        self.finished_devices.insert(session.device.id.clone());
        self.transition(match status {
            SessionStatus::Completed => SessionState::Completed,
            SessionStatus::Aborted => SessionState::Aborted,
            _ => SessionState::Failed,
        });
        session
    }

    fn transition(&mut self, next: SessionState) {
        tracing::debug!(from = ?self.state, to = ?next, "orchestrator state transition");
        self.state = next;
    }
}

/// Convenience wrapper: one device, one session.
pub fn wipe_device(
    device: &Device,
    request: &WipeRequest,
    config: OrchestratorConfig,
    provider: Arc<dyn AccessProvider>,
    cancel: CancelToken,
    progress: Option<ProgressSender>,
) -> WipeResult<WipeSession> {
    let mut orchestrator = WipeOrchestrator::new(config, provider).with_cancel(cancel);
    if let Some(progress) = progress {
        orchestrator = orchestrator.with_progress(progress);
    }
    orchestrator.run(device, request)
}

/// Processes devices as independent concurrent sessions. Each session owns
/// its exclusive device handle; one device failing or aborting leaves the
/// others untouched.
pub async fn wipe_devices(
    targets: Vec<(Device, WipeRequest)>,
    config: OrchestratorConfig,
    provider: Arc<dyn AccessProvider>,
    cancel: CancelToken,
    progress: Option<ProgressSender>,
) -> Vec<WipeResult<WipeSession>> {
    let mut handles = Vec::with_capacity(targets.len());
    for (device, request) in targets {
        let config = config.clone();
        let provider = Arc::clone(&provider);
        let cancel = cancel.clone();
        let progress = progress.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            wipe_device(&device, &request, config, provider, cancel, progress)
        }));
    }

    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        results.push(handle.await.unwrap_or_else(|e| {
            Err(WipeError::DeviceIo(format!("session task failed: {e}")))
        }));
    }
    results
}
