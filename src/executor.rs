//! Pass execution: streams one pattern across a device in fixed-size chunks.
//!
//! Progress is emitted on a bounded, non-blocking channel so a slow consumer
//! (a visualization, a status file writer) can never stall the write path.
//! Cancellation is polled at chunk boundaries only; a chunk write failure
//! aborts the pass with the exact byte count retained, never a partial
//! silent success.

use crate::access::DeviceAccess;
use crate::crypto::SecureRng;
use crate::retry::{retry_io, RetryPolicy};
use crate::session::{PassResult, PassStatus, ThroughputSample, VerificationOutcome};
use crate::standards::{PassSpec, PatternKind};
use crate::{CancelToken, WipeError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::{Duration, Instant};

/// Default streaming chunk size: bounds memory regardless of device size.
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

const MAX_THROUGHPUT_SAMPLES: usize = 4096;

/// Live progress event for any real-time consumer.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub device_id: String,
    pub pass_index: usize,
    pub bytes_written: u64,
    pub total_bytes: u64,
    pub throughput_bps: u64,
    pub timestamp: DateTime<Utc>,
}

pub type ProgressSender = tokio::sync::mpsc::Sender<ProgressEvent>;

/// A pass that did not run to completion: the partial record is kept for the
/// session (exact byte count included) and the typed error tells the
/// orchestrator which terminal state applies.
#[derive(Debug)]
pub struct PassFailure {
    pub result: PassResult,
    pub error: WipeError,
}

pub struct PassExecutor {
    chunk_size: usize,
    progress_interval: Duration,
    write_timeout: Duration,
    retry: RetryPolicy,
    cancel: CancelToken,
    progress: Option<ProgressSender>,
    rng: SecureRng,
}

impl PassExecutor {
    pub fn new(
        chunk_size: usize,
        progress_interval: Duration,
        write_timeout: Duration,
        retry: RetryPolicy,
        cancel: CancelToken,
        progress: Option<ProgressSender>,
    ) -> Self {
        Self {
            chunk_size: chunk_size.max(4096),
            progress_interval,
            write_timeout,
            retry,
            cancel,
            progress,
            rng: SecureRng::new(),
        }
    }

    /// Streams `spec.pattern` across the full addressable capacity.
    pub fn execute_pass(
        &mut self,
        access: &mut dyn DeviceAccess,
        device_id: &str,
        index: usize,
        spec: &PassSpec,
    ) -> Result<PassResult, PassFailure> {
        let total = access.capacity();
        let mut result = PassResult {
            index,
            pattern: spec.pattern,
            bytes_written: 0,
            throughput: Vec::new(),
            verification: VerificationOutcome::NotPerformed,
            status: PassStatus::Failed,
            error: None,
        };

        let mut buf = vec![0u8; self.chunk_size];
        if let Some(byte) = spec.pattern.fill_byte() {
            buf.fill(byte);
        }

        let start = Instant::now();
        let mut last_emit: Option<Instant> = None;

        while result.bytes_written < total {
            if self.cancel.is_cancelled() {
                return Err(self.fail(result, WipeError::Cancelled));
            }

            let len = ((total - result.bytes_written) as usize).min(self.chunk_size);
            if spec.pattern.is_random() {
                // Fresh cryptographic bytes for every chunk of every pass
                if let Err(e) = self.rng.fill(&mut buf[..len]) {
                    return Err(self.fail(result, e));
                }
            }

            let offset = result.bytes_written;
            let chunk = &buf[..len];
            let timeout = self.write_timeout;
            let write = retry_io(&self.retry, || {
                let begin = Instant::now();
                access.write_chunk(offset, chunk)?;
                // An overlong write is treated as a transient device error;
                // rewriting the same chunk is idempotent for every pattern.
                if begin.elapsed() > timeout {
                    return Err(WipeError::DeviceIo(format!(
                        "chunk write at offset {offset} exceeded {}ms timeout",
                        timeout.as_millis()
                    )));
                }
                Ok(())
            });
            if let Err(e) = write {
                return Err(self.fail(result, e));
            }

            result.bytes_written += len as u64;

            let due = last_emit.map_or(true, |t| t.elapsed() >= self.progress_interval);
            if due || result.bytes_written == total {
                self.emit_progress(&mut result, device_id, index, total, start);
                last_emit = Some(Instant::now());
            }
        }

        if let Err(e) = retry_io(&self.retry, || access.flush()) {
            return Err(self.fail(result, e));
        }

        result.status = PassStatus::Succeeded;
        Ok(result)
    }

    /// Whole-device zero fill for non-addressable backends (utility
    /// fallback). Progress granularity is the whole device.
    pub fn execute_clear(
        &mut self,
        access: &mut dyn DeviceAccess,
        device_id: &str,
        index: usize,
    ) -> Result<PassResult, PassFailure> {
        let total = access.capacity();
        let mut result = PassResult {
            index,
            pattern: PatternKind::Zero,
            bytes_written: 0,
            throughput: Vec::new(),
            verification: VerificationOutcome::NotPerformed,
            status: PassStatus::Failed,
            error: None,
        };

        if self.cancel.is_cancelled() {
            return Err(self.fail(result, WipeError::Cancelled));
        }

        let start = Instant::now();
        self.emit_progress(&mut result, device_id, index, total, start);

        match retry_io(&self.retry, || access.clear_device()) {
            Ok(bytes) => {
                result.bytes_written = bytes;
                self.emit_progress(&mut result, device_id, index, total, start);
                result.status = PassStatus::Succeeded;
                Ok(result)
            }
            Err(e) => Err(self.fail(result, e)),
        }
    }

    fn fail(&self, mut result: PassResult, error: WipeError) -> PassFailure {
        result.status = PassStatus::Failed;
        result.error = Some(error.to_string());
        PassFailure { result, error }
    }

    fn emit_progress(
        &self,
        result: &mut PassResult,
        device_id: &str,
        pass_index: usize,
        total_bytes: u64,
        start: Instant,
    ) {
        let elapsed = start.elapsed().as_secs_f64().max(1e-6);
        let throughput_bps = (result.bytes_written as f64 / elapsed) as u64;

        if result.throughput.len() < MAX_THROUGHPUT_SAMPLES {
            result.throughput.push(ThroughputSample {
                elapsed_secs: elapsed,
                bytes_per_sec: throughput_bps,
            });
        }

        if let Some(tx) = &self.progress {
            // try_send by design: a stalled consumer drops events, the
            // writer never blocks
            let _ = tx.try_send(ProgressEvent {
                device_id: device_id.to_string(),
                pass_index,
                bytes_written: result.bytes_written,
                total_bytes,
                throughput_bps,
                timestamp: Utc::now(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{AccessProvider, MemoryAccessProvider};
    use crate::session::Device;
    use crate::standards::VerificationMode;
    use proptest::prelude::*;

    fn executor(cancel: CancelToken, progress: Option<ProgressSender>) -> PassExecutor {
        PassExecutor::new(
            64 * 1024,
            Duration::ZERO,
            Duration::from_secs(30),
            RetryPolicy {
                max_attempts: 2,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
                jitter: 0.0,
            },
            cancel,
            progress,
        )
    }

    fn run_pass(provider: &MemoryAccessProvider, capacity: u64, spec: PassSpec) -> PassResult {
        let device = Device::new("mem0", capacity);
        let mut access = provider.open_raw(&device).unwrap();
        executor(CancelToken::new(), None)
            .execute_pass(access.as_mut(), &device.id, 0, &spec)
            .unwrap()
    }

    #[test]
    fn zero_pass_covers_every_byte() {
        let capacity = 256 * 1024 + 123; // deliberately not chunk aligned
        let provider = MemoryAccessProvider::new(capacity);
        let result = run_pass(
            &provider,
            capacity,
            PassSpec::new(PatternKind::Zero, VerificationMode::None),
        );

        assert_eq!(result.status, PassStatus::Succeeded);
        assert_eq!(result.bytes_written, capacity);
        assert!(provider.snapshot().iter().all(|&b| b == 0x00));
        assert!(!result.throughput.is_empty());
    }

    #[test]
    fn fixed_byte_pass_writes_the_pattern() {
        let provider = MemoryAccessProvider::new(128 * 1024);
        run_pass(
            &provider,
            128 * 1024,
            PassSpec::new(PatternKind::FixedByte(0x55), VerificationMode::None),
        );
        assert!(provider.snapshot().iter().all(|&b| b == 0x55));
    }

    #[test]
    fn random_pass_produces_high_entropy_output() {
        let provider = MemoryAccessProvider::new(256 * 1024);
        run_pass(
            &provider,
            256 * 1024,
            PassSpec::new(PatternKind::Random, VerificationMode::None),
        );
        let data = provider.snapshot();
        let mut counts = [0u64; 256];
        for &b in &data {
            counts[b as usize] += 1;
        }
        // all 256 byte values show up in 256 KiB of CSPRNG output
        assert!(counts.iter().all(|&c| c > 0));
    }

    #[test]
    fn transient_write_failure_is_retried_to_success() {
        let capacity = 128 * 1024;
        let provider = MemoryAccessProvider::new(capacity).with_transient_write_failures(70_000, 2);
        let result = run_pass(
            &provider,
            capacity,
            PassSpec::new(PatternKind::Zero, VerificationMode::None),
        );
        assert_eq!(result.status, PassStatus::Succeeded);
        assert_eq!(result.bytes_written, capacity);
    }

    #[test]
    fn retry_exhaustion_keeps_partial_byte_count() {
        let capacity = 128 * 1024;
        let provider = MemoryAccessProvider::new(capacity).with_transient_write_failures(70_000, 10);
        let device = Device::new("mem0", capacity);
        let mut access = provider.open_raw(&device).unwrap();

        let failure = executor(CancelToken::new(), None)
            .execute_pass(
                access.as_mut(),
                &device.id,
                0,
                &PassSpec::new(PatternKind::Zero, VerificationMode::None),
            )
            .unwrap_err();

        assert!(failure.error.is_transient());
        assert_eq!(failure.result.status, PassStatus::Failed);
        // everything before the faulty chunk was written
        assert_eq!(failure.result.bytes_written, 64 * 1024);
        assert!(failure.result.error.is_some());
    }

    #[test]
    fn cancellation_stops_at_a_chunk_boundary() {
        let capacity = 512 * 1024;
        let cancel = CancelToken::new();
        let provider =
            MemoryAccessProvider::new(capacity).with_cancel_at(128 * 1024, cancel.clone());
        let device = Device::new("mem0", capacity);
        let mut access = provider.open_raw(&device).unwrap();

        let failure = executor(cancel, None)
            .execute_pass(
                access.as_mut(),
                &device.id,
                0,
                &PassSpec::new(PatternKind::Zero, VerificationMode::None),
            )
            .unwrap_err();

        assert!(matches!(failure.error, WipeError::Cancelled));
        // exact partial count, a whole number of chunks
        assert_eq!(failure.result.bytes_written, 128 * 1024);
        assert_eq!(failure.result.bytes_written % (64 * 1024), 0);
    }

    #[tokio::test]
    async fn progress_events_reach_a_consumer() {
        let capacity = 256 * 1024;
        let provider = MemoryAccessProvider::new(capacity);
        let (tx, mut rx) = tokio::sync::mpsc::channel(64);
        let device = Device::new("mem0", capacity);
        let mut access = provider.open_raw(&device).unwrap();

        let result = tokio::task::spawn_blocking(move || {
            executor(CancelToken::new(), Some(tx)).execute_pass(
                access.as_mut(),
                "mem0",
                3,
                &PassSpec::new(PatternKind::One, VerificationMode::None),
            )
        })
        .await
        .unwrap()
        .unwrap();

        assert_eq!(result.bytes_written, capacity);

        let mut last = None;
        while let Some(event) = rx.recv().await {
            assert_eq!(event.device_id, "mem0");
            assert_eq!(event.pass_index, 3);
            assert_eq!(event.total_bytes, capacity);
            last = Some(event);
        }
        assert_eq!(last.unwrap().bytes_written, capacity);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn deterministic_patterns_cover_arbitrary_capacities(
            capacity in 1u64..512 * 1024,
            byte in any::<u8>(),
        ) {
            let provider = MemoryAccessProvider::new(capacity);
            let result = run_pass(
                &provider,
                capacity,
                PassSpec::new(PatternKind::FixedByte(byte), VerificationMode::None),
            );
            prop_assert_eq!(result.bytes_written, capacity);
            prop_assert!(provider.snapshot().iter().all(|&b| b == byte));
        }
    }
}
