// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Frame bridge: validation, FIFO dispatch to the detector backend, and
// delivery of exactly one outcome per request.
//
// `submit` validates on the caller's thread and never blocks. Validated
// frames go onto an unbounded queue drained by a single dispatcher task.
// Under the serialized policy the dispatcher awaits each request before
// taking the next one, so at most one backend call is in flight and
// completions follow submission order.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tracing::{Instrument, debug, info, info_span, instrument, warn};

use sichtwerk_core::config::{BridgeConfig, ConcurrencyPolicy};
use sichtwerk_core::types::{
    DetectedObject, DetectionReport, DetectorOptions, FrameDescriptor, RequestId, ValidatedFrame,
};
use sichtwerk_core::{DetectionError, SichtwerkError, format_detections, validate};
use sichtwerk_native::DetectorBackend;

use crate::completion::{Completion, Outcome};
use crate::lifecycle::{BridgeStats, Counters, RequestState, RequestTrace};

/// A validated request waiting for the backend.
struct Job {
    trace: RequestTrace,
    frame: ValidatedFrame,
    completion: Completion,
    cancel: Option<Arc<AtomicBool>>,
}

struct Shared {
    backend: Arc<dyn DetectorBackend>,
    options: DetectorOptions,
    serialized: bool,
    timeout: Option<Duration>,
    counters: Counters,
}

/// Handle to a running bridge. Cheap to clone; the dispatcher stops once
/// every handle is dropped and the queue has drained.
#[derive(Clone)]
pub struct FrameBridge {
    shared: Arc<Shared>,
    queue: mpsc::UnboundedSender<Job>,
}

impl FrameBridge {
    /// Spawn the dispatcher on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime, like `tokio::spawn`.
    pub fn start(backend: Arc<dyn DetectorBackend>, config: &BridgeConfig) -> Self {
        let serialized = match config.concurrency {
            ConcurrencyPolicy::Serialized => true,
            ConcurrencyPolicy::Concurrent => false,
            ConcurrencyPolicy::Auto => !backend.supports_concurrent_calls(),
        };
        let shared = Arc::new(Shared {
            options: *backend.options(),
            backend,
            serialized,
            timeout: config.detection_timeout(),
            counters: Counters::default(),
        });

        info!(
            backend = shared.backend.name(),
            serialized,
            timeout_ms = shared.timeout.map(|t| t.as_millis() as u64),
            "frame bridge started"
        );

        let (queue, rx) = mpsc::unbounded_channel();
        tokio::spawn(dispatch(Arc::clone(&shared), rx));
        Self { shared, queue }
    }

    /// Submit a frame. The outcome arrives through `completion`.
    pub fn submit(&self, frame: FrameDescriptor, completion: Completion) -> RequestId {
        self.enqueue(frame, None, completion)
    }

    /// Like [`submit`](Self::submit), but the request completes with
    /// `Cancelled` if `cancel` is set before the backend is called.
    pub fn submit_with_cancel(
        &self,
        frame: FrameDescriptor,
        cancel: Arc<AtomicBool>,
        completion: Completion,
    ) -> RequestId {
        self.enqueue(frame, Some(cancel), completion)
    }

    /// Submit a frame and wait for its outcome.
    pub async fn detect(&self, frame: FrameDescriptor) -> Outcome {
        let (completion, rx) = Completion::channel();
        self.submit(frame, completion);
        match rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(SichtwerkError::Processing(
                "request dropped before completion".into(),
            )),
        }
    }

    pub fn stats(&self) -> BridgeStats {
        self.shared.counters.snapshot()
    }

    pub fn backend_name(&self) -> &str {
        self.shared.backend.name()
    }

    pub fn options(&self) -> &DetectorOptions {
        &self.shared.options
    }

    #[instrument(
        skip_all,
        fields(
            width = frame.width(),
            height = frame.height(),
            rotation = frame.rotation_degrees(),
            bytes = frame.pixel_data().len(),
        )
    )]
    fn enqueue(
        &self,
        frame: FrameDescriptor,
        cancel: Option<Arc<AtomicBool>>,
        completion: Completion,
    ) -> RequestId {
        let counters = &self.shared.counters;
        let mut trace = RequestTrace::new(RequestId::new());
        let id = trace.id();
        counters.submitted();
        debug!(request_id = %id, "processing frame");

        trace.advance(RequestState::Validating);
        if is_cancelled(cancel.as_deref()) {
            trace.advance(RequestState::Failed);
            counters.finished(RequestState::Failed);
            debug!(request_id = %id, "request cancelled before validation");
            completion.complete(Err(SichtwerkError::Cancelled));
            return id;
        }

        let frame = match validate(frame) {
            Ok(frame) => frame,
            Err(e) => {
                trace.advance(RequestState::Rejected);
                counters.finished(RequestState::Rejected);
                warn!(request_id = %id, error = %e, "frame rejected");
                completion.complete(Err(e.into()));
                return id;
            }
        };
        trace.advance(RequestState::Validated);

        let job = Job {
            trace,
            frame,
            completion,
            cancel,
        };
        if let Err(mpsc::error::SendError(job)) = self.queue.send(job) {
            let Job {
                mut trace,
                completion,
                ..
            } = job;
            trace.advance(RequestState::Failed);
            counters.finished(RequestState::Failed);
            warn!(request_id = %id, "dispatcher is gone, request not queued");
            completion.complete(Err(SichtwerkError::Processing(
                "bridge is shut down".into(),
            )));
        }
        id
    }
}

impl std::fmt::Debug for FrameBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameBridge")
            .field("backend", &self.shared.backend.name())
            .field("serialized", &self.shared.serialized)
            .field("timeout", &self.shared.timeout)
            .finish()
    }
}

fn is_cancelled(flag: Option<&AtomicBool>) -> bool {
    flag.is_some_and(|f| f.load(Ordering::Acquire))
}

async fn dispatch(shared: Arc<Shared>, mut rx: mpsc::UnboundedReceiver<Job>) {
    while let Some(job) = rx.recv().await {
        if shared.serialized {
            run_one(Arc::clone(&shared), job).await;
        } else {
            tokio::spawn(run_one(Arc::clone(&shared), job));
        }
    }
    debug!("frame bridge dispatcher stopped");
}

async fn run_one(shared: Arc<Shared>, job: Job) {
    let Job {
        mut trace,
        frame,
        completion,
        cancel,
    } = job;
    let span = info_span!("detect", request_id = %trace.id());

    async move {
        let counters = &shared.counters;
        if is_cancelled(cancel.as_deref()) {
            trace.advance(RequestState::Failed);
            counters.finished(RequestState::Failed);
            debug!("request cancelled before dispatch");
            completion.complete(Err(SichtwerkError::Cancelled));
            return;
        }

        trace.advance(RequestState::Detecting);
        counters.dispatched();

        let (result, overrun) = call_backend(&shared, frame).await;
        let outcome = match result {
            Ok(objects) => {
                let objects = shared.options.normalize(objects);
                log_objects(&objects);
                trace.advance(RequestState::Completed);
                Ok(DetectionReport {
                    request_id: trace.id(),
                    text: format_detections(&objects),
                    objects,
                })
            }
            Err(e) => {
                warn!(error = %e, "detection error");
                trace.advance(RequestState::Failed);
                Err(e)
            }
        };
        counters.finished(trace.state());
        completion.complete(outcome);

        // A timed-out call still owns the backend until it returns. Holding
        // this task until then keeps the serialized dispatcher from starting
        // the next call on top of it.
        if let Some(task) = overrun {
            match task.await {
                Ok(_) => debug!("late backend result discarded"),
                Err(e) => warn!(error = %join_failure(e), "timed-out backend call failed"),
            }
        }
        counters.settled();
    }
    .instrument(span)
    .await
}

type DetectTask = JoinHandle<Result<Vec<DetectedObject>, DetectionError>>;

/// Run the backend in its own task so a panic surfaces as an error.
///
/// On timeout the task is handed back still running. It is not aborted:
/// native backends block a pool thread that an abort cannot stop.
async fn call_backend(
    shared: &Shared,
    frame: ValidatedFrame,
) -> (Result<Vec<DetectedObject>, SichtwerkError>, Option<DetectTask>) {
    let backend = Arc::clone(&shared.backend);
    let mut handle: DetectTask = tokio::spawn(async move { backend.detect(&frame).await });

    let joined = match shared.timeout {
        None => (&mut handle).await,
        Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
            Ok(joined) => joined,
            Err(_) => {
                let err = DetectionError::new(format!(
                    "detection timed out after {} ms",
                    limit.as_millis()
                ));
                return (Err(err.into()), Some(handle));
            }
        },
    };

    let result = match joined {
        Ok(Ok(objects)) => Ok(objects),
        Ok(Err(e)) => Err(e.into()),
        Err(e) => Err(join_failure(e)),
    };
    (result, None)
}

fn join_failure(e: JoinError) -> SichtwerkError {
    if e.is_panic() {
        SichtwerkError::Processing("detector backend panicked".into())
    } else {
        SichtwerkError::Processing("detection task was aborted".into())
    }
}

fn log_objects(objects: &[DetectedObject]) {
    if objects.is_empty() {
        debug!("no objects detected");
        return;
    }
    for object in objects {
        debug!(
            label = %object.label,
            confidence = object.confidence,
            tracking_id = object.tracking_id,
            "detected object"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use sichtwerk_core::ErrorKind;
    use sichtwerk_core::types::{DetectorMode, UNKNOWN_LABEL};
    use tokio::sync::oneshot;

    use super::*;
    use crate::testing::{ScriptedBackend, Step};

    fn frame(width: i32) -> FrameDescriptor {
        FrameDescriptor::new(vec![0u8; 64], width, 8, 0)
    }

    fn start(backend: ScriptedBackend) -> (FrameBridge, Arc<ScriptedBackend>) {
        start_with(backend, BridgeConfig::default())
    }

    fn start_with(
        backend: ScriptedBackend,
        config: BridgeConfig,
    ) -> (FrameBridge, Arc<ScriptedBackend>) {
        let backend = Arc::new(backend);
        let bridge = FrameBridge::start(backend.clone(), &config);
        (bridge, backend)
    }

    #[tokio::test]
    async fn formats_detected_labels_in_order() {
        let (bridge, _) = start(ScriptedBackend::labels(&["Dog", "Cat"]));
        let report = bridge.detect(frame(8)).await.expect("detect");
        assert_eq!(report.text, "Detected: Dog\nDetected: Cat\n");
        assert_eq!(report.objects.len(), 2);
    }

    #[tokio::test]
    async fn empty_result_is_empty_text() {
        let (bridge, _) = start(ScriptedBackend::new(vec![Step::Objects(Vec::new())]));
        let report = bridge.detect(frame(8)).await.expect("detect");
        assert_eq!(report.text, "");
        assert!(report.objects.is_empty());
        assert_eq!(bridge.stats().completed, 1);
    }

    #[tokio::test]
    async fn luma_only_single_image_frame() {
        let options = DetectorOptions {
            mode: DetectorMode::SingleImage,
            multiple_objects: false,
            classification: true,
        };
        let backend = ScriptedBackend::new(vec![Step::Objects(vec![DetectedObject::unknown()])])
            .with_options(options);
        let (bridge, _) = start(backend);

        let report = bridge
            .detect(FrameDescriptor::new(vec![0u8; 64], 8, 8, 90))
            .await
            .expect("detect");
        assert_eq!(report.text, "Detected: Unknown\n");
    }

    #[tokio::test]
    async fn classification_off_reports_unknown() {
        let options = DetectorOptions {
            classification: false,
            ..Default::default()
        };
        let backend = ScriptedBackend::labels(&["Dog", "Cat"]).with_options(options);
        let (bridge, _) = start(backend);

        let report = bridge.detect(frame(8)).await.expect("detect");
        assert!(report.objects.iter().all(|o| o.label == UNKNOWN_LABEL));
        assert_eq!(report.text, "Detected: Unknown\nDetected: Unknown\n");
    }

    #[tokio::test]
    async fn hand_built_objects_are_repaired() {
        let raw = DetectedObject {
            label: " ".into(),
            confidence: Some(1.7),
            bounding_box: None,
            tracking_id: None,
        };
        let (bridge, _) = start(ScriptedBackend::new(vec![Step::Objects(vec![raw])]));

        let report = bridge.detect(frame(8)).await.expect("detect");
        assert_eq!(report.text, "Detected: Unknown\n");
        assert_eq!(report.objects[0].confidence, Some(1.0));
    }

    #[tokio::test]
    async fn invalid_frames_never_reach_backend() {
        let (bridge, backend) = start(ScriptedBackend::labels(&["Dog"]));

        for bad in [
            FrameDescriptor::new(vec![0u8; 64], 0, 8, 0),
            FrameDescriptor::new(vec![0u8; 64], 8, -1, 0),
            FrameDescriptor::new(vec![0u8; 64], 8, 8, 45),
            FrameDescriptor::new(Vec::new(), 8, 8, 0),
            FrameDescriptor::new(vec![0u8; 10], 8, 8, 0),
        ] {
            let err = bridge.detect(bad).await.expect_err("rejected");
            assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        }
        assert_eq!(backend.calls(), 0);
        assert_eq!(bridge.stats().rejected, 5);
    }

    #[tokio::test]
    async fn rejection_completes_synchronously() {
        let (bridge, _) = start(ScriptedBackend::labels(&["Dog"]));
        let (completion, mut rx) = Completion::channel();
        bridge.submit(FrameDescriptor::new(vec![0u8; 64], 8, 8, 30), completion);
        let outcome = rx.try_recv().expect("already delivered");
        assert!(matches!(outcome, Err(SichtwerkError::Validation(_))));
    }

    #[tokio::test]
    async fn backend_error_message_is_verbatim() {
        let (bridge, _) = start(ScriptedBackend::new(vec![Step::Fail("model not loaded")]));
        let err = bridge.detect(frame(8)).await.expect_err("fails");
        let resp = err.to_response();
        assert_eq!(resp.kind, ErrorKind::DetectionError);
        assert_eq!(resp.message, "model not loaded");
        assert_eq!(bridge.stats().failed, 1);
    }

    #[tokio::test]
    async fn backend_panic_becomes_processing_error() {
        let (bridge, _) = start(ScriptedBackend::new(vec![
            Step::Panic,
            Step::Objects(vec![DetectedObject::new(Some("Dog"))]),
        ]));
        let err = bridge.detect(frame(8)).await.expect_err("panicked");
        assert_eq!(err.kind(), ErrorKind::ProcessingError);

        // The dispatcher survives and serves the next request.
        let report = bridge.detect(frame(8)).await.expect("detect");
        assert_eq!(report.text, "Detected: Dog\n");
    }

    #[tokio::test]
    async fn slow_backend_times_out_once() {
        let config = BridgeConfig {
            detection_timeout_ms: Some(20),
            ..Default::default()
        };
        let backend = ScriptedBackend::labels(&["Dog"]).with_delay(Duration::from_millis(200));
        let (bridge, _) = start_with(backend, config);

        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&calls);
        let (done_tx, done_rx) = oneshot::channel();
        bridge.submit(
            frame(8),
            Completion::callback(move |outcome| {
                sink.lock().expect("lock").push(outcome.map(|r| r.text));
                let _ = done_tx.send(());
            }),
        );
        done_rx.await.expect("completed");

        let calls = calls.lock().expect("lock");
        assert_eq!(calls.len(), 1);
        match &calls[0] {
            Err(SichtwerkError::Detection(e)) => assert!(e.message.contains("timed out")),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(bridge.stats().failed, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn timed_out_blocking_call_keeps_backend_exclusive() {
        let config = BridgeConfig {
            concurrency: ConcurrencyPolicy::Serialized,
            detection_timeout_ms: Some(20),
            ..Default::default()
        };
        let backend = ScriptedBackend::new(Vec::new())
            .with_delay(Duration::from_millis(150))
            .blocking();
        let (bridge, backend) = start_with(backend, config);

        let mut receivers = Vec::new();
        for _ in 0..4 {
            let (completion, rx) = Completion::channel();
            bridge.submit(frame(8), completion);
            receivers.push(rx);
        }
        for rx in receivers {
            let outcome = rx.await.expect("delivered");
            match outcome {
                Err(SichtwerkError::Detection(e)) => assert!(e.message.contains("timed out")),
                other => panic!("unexpected outcome {other:?}"),
            }
        }

        // The last call timed out but its blocking work is still running.
        assert_eq!(bridge.stats().in_flight, 1);
        tokio::time::sleep(Duration::from_millis(400)).await;

        let stats = bridge.stats();
        assert_eq!(stats.in_flight, 0);
        assert_eq!(stats.failed, 4);
        assert_eq!(backend.calls(), 4);
        assert_eq!(backend.max_active(), 1);
    }

    #[tokio::test]
    async fn blocking_backend_panic_is_processing_error() {
        let backend = ScriptedBackend::new(vec![Step::Panic]).blocking();
        let (bridge, _) = start(backend);
        let err = bridge.detect(frame(8)).await.expect_err("panicked");
        assert_eq!(err.kind(), ErrorKind::ProcessingError);
    }

    #[tokio::test]
    async fn cancelled_before_submit() {
        let (bridge, backend) = start(ScriptedBackend::labels(&["Dog"]));
        let (completion, rx) = Completion::channel();
        bridge.submit_with_cancel(frame(8), Arc::new(AtomicBool::new(true)), completion);
        let outcome = rx.await.expect("delivered");
        assert!(matches!(outcome, Err(SichtwerkError::Cancelled)));
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn cancelled_while_queued() {
        let backend =
            ScriptedBackend::labels(&["Dog"]).with_delay(Duration::from_millis(50));
        let (bridge, backend) = start_with(
            backend,
            BridgeConfig {
                concurrency: ConcurrencyPolicy::Serialized,
                ..Default::default()
            },
        );

        let (first, first_rx) = Completion::channel();
        bridge.submit(frame(8), first);
        let cancel = Arc::new(AtomicBool::new(false));
        let (completion, rx) = Completion::channel();
        bridge.submit_with_cancel(frame(8), Arc::clone(&cancel), completion);
        cancel.store(true, Ordering::Release);

        assert!(first_rx.await.expect("delivered").is_ok());
        let outcome = rx.await.expect("delivered");
        assert!(matches!(outcome, Err(SichtwerkError::Cancelled)));
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn serialized_keeps_submission_order() {
        let backend = ScriptedBackend::new(Vec::new()).with_delay(Duration::from_millis(5));
        let (bridge, backend) = start(backend);

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut receivers = Vec::new();
        for width in 1..=6 {
            let order = Arc::clone(&order);
            let (done_tx, done_rx) = oneshot::channel();
            let frame = FrameDescriptor::new(vec![0u8; width as usize * 8], width, 8, 0);
            bridge.submit(
                frame,
                Completion::callback(move |outcome| {
                    assert!(outcome.is_ok());
                    order.lock().expect("lock").push(width as u32);
                    let _ = done_tx.send(());
                }),
            );
            receivers.push(done_rx);
        }
        for rx in receivers {
            rx.await.expect("completed");
        }

        let expected: Vec<u32> = (1..=6).collect();
        assert_eq!(*order.lock().expect("lock"), expected);
        assert_eq!(backend.seen_widths(), expected);
        assert_eq!(backend.max_active(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_backend_overlaps_calls() {
        let backend = ScriptedBackend::new(Vec::new())
            .with_delay(Duration::from_millis(50))
            .concurrent();
        let (bridge, backend) = start(backend);

        let (a, b) = tokio::join!(bridge.detect(frame(8)), bridge.detect(frame(8)));
        a.expect("a");
        b.expect("b");
        assert_eq!(backend.max_active(), 2);
    }

    #[test]
    fn submit_after_runtime_shutdown() {
        let runtime = tokio::runtime::Runtime::new().expect("runtime");
        let bridge = {
            let _guard = runtime.enter();
            FrameBridge::start(
                Arc::new(ScriptedBackend::labels(&["Dog"])),
                &BridgeConfig::default(),
            )
        };
        drop(runtime);

        let (completion, mut rx) = Completion::channel();
        bridge.submit(frame(8), completion);
        let outcome = rx.try_recv().expect("delivered immediately");
        match outcome {
            Err(SichtwerkError::Processing(message)) => assert_eq!(message, "bridge is shut down"),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn queued_requests_drain_after_last_handle_drops() {
        let backend = ScriptedBackend::new(Vec::new()).with_delay(Duration::from_millis(5));
        let (bridge, backend) = start(backend);

        let mut receivers = Vec::new();
        for _ in 0..3 {
            let (completion, rx) = Completion::channel();
            bridge.submit(frame(8), completion);
            receivers.push(rx);
        }
        drop(bridge);

        for rx in receivers {
            assert!(rx.await.expect("delivered").is_ok());
        }
        assert_eq!(backend.calls(), 3);
    }
}
