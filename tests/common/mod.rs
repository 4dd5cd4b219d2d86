/// Shared helpers for the integration suite: simulated devices, canned
/// requests and one-call session runs.
use std::sync::Arc;
use std::time::Duration;
use zerotrace::access::{AccessProvider, MemoryAccessProvider};
use zerotrace::retry::RetryPolicy;
use zerotrace::{
    CancelToken, Device, OrchestratorConfig, WipeOrchestrator, WipeRequest, WipeResult,
    WipeSession,
};

pub const TEST_CAPACITY: u64 = 10 * 1024 * 1024;

/// Fast retry settings so fault-injection tests do not sleep for real.
pub fn test_config() -> OrchestratorConfig {
    OrchestratorConfig {
        chunk_size: 1024 * 1024,
        retry: RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            jitter: 0.0,
        },
        progress_interval: Duration::ZERO,
        write_timeout: Duration::from_secs(30),
        reexecute_failed_verification: false,
    }
}

pub fn confirmed_request(device_id: &str, standard: &str) -> WipeRequest {
    WipeRequest::new(device_id, standard, WipeRequest::expected_token(device_id))
}

/// Runs one session against the given simulated provider and returns the
/// orchestrator result; the provider stays available for snapshots.
pub fn run_session(
    provider: Arc<MemoryAccessProvider>,
    device: &Device,
    request: &WipeRequest,
    cancel: CancelToken,
) -> WipeResult<WipeSession> {
    let mut orchestrator =
        WipeOrchestrator::new(test_config(), provider as Arc<dyn AccessProvider>)
            .with_cancel(cancel);
    orchestrator.run(device, request)
}

pub fn run_standard(standard: &str) -> (Arc<MemoryAccessProvider>, WipeSession) {
    let provider = Arc::new(MemoryAccessProvider::new(TEST_CAPACITY));
    let device = Device::new("simdev", TEST_CAPACITY);
    let session = run_session(
        provider.clone(),
        &device,
        &confirmed_request("simdev", standard),
        CancelToken::new(),
    )
    .expect("validation should pass");
    (provider, session)
}
