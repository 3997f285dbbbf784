// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scripted detector backend for tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use sichtwerk_core::DetectionError;
use sichtwerk_core::types::{DetectedObject, DetectorOptions, ValidatedFrame};
use sichtwerk_native::{DetectorBackend, run_blocking};

pub(crate) enum Step {
    Objects(Vec<DetectedObject>),
    Fail(&'static str),
    Panic,
}

impl Step {
    fn play(self) -> Result<Vec<DetectedObject>, DetectionError> {
        match self {
            Step::Objects(objects) => Ok(objects),
            Step::Fail(message) => Err(DetectionError::new(message)),
            Step::Panic => panic!("scripted backend panic"),
        }
    }
}

/// Counts overlapping calls, including work left running on a pool thread.
#[derive(Default)]
struct Gauge {
    active: AtomicUsize,
    max: AtomicUsize,
}

impl Gauge {
    fn enter(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

pub(crate) struct ScriptedBackend {
    options: DetectorOptions,
    script: Mutex<VecDeque<Step>>,
    delay: Option<Duration>,
    concurrent: bool,
    blocking: bool,
    calls: AtomicUsize,
    gauge: Arc<Gauge>,
    seen_widths: Mutex<Vec<u32>>,
}

impl ScriptedBackend {
    pub(crate) fn new(steps: Vec<Step>) -> Self {
        Self {
            options: DetectorOptions::default(),
            script: Mutex::new(steps.into()),
            delay: None,
            concurrent: false,
            blocking: false,
            calls: AtomicUsize::new(0),
            gauge: Arc::new(Gauge::default()),
            seen_widths: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn labels(labels: &[&str]) -> Self {
        Self::new(vec![Step::Objects(
            labels.iter().map(|l| DetectedObject::new(Some(l))).collect(),
        )])
    }

    pub(crate) fn with_options(mut self, options: DetectorOptions) -> Self {
        self.options = options;
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn concurrent(mut self) -> Self {
        self.concurrent = true;
        self
    }

    /// Run each call on the blocking pool with `std::thread::sleep`, the way
    /// the native adapters block on the SDK. Aborting the caller does not
    /// stop it.
    pub(crate) fn blocking(mut self) -> Self {
        self.blocking = true;
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn max_active(&self) -> usize {
        self.gauge.max.load(Ordering::SeqCst)
    }

    /// Frame widths in the order the backend saw them.
    pub(crate) fn seen_widths(&self) -> Vec<u32> {
        self.seen_widths.lock().expect("lock").clone()
    }
}

#[async_trait]
impl DetectorBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    fn options(&self) -> &DetectorOptions {
        &self.options
    }

    fn supports_concurrent_calls(&self) -> bool {
        self.concurrent
    }

    async fn detect(&self, frame: &ValidatedFrame) -> Result<Vec<DetectedObject>, DetectionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen_widths.lock().expect("lock").push(frame.width());

        // An exhausted script keeps returning nothing.
        let step = self
            .script
            .lock()
            .expect("lock")
            .pop_front()
            .unwrap_or(Step::Objects(Vec::new()));

        let gauge = Arc::clone(&self.gauge);
        let delay = self.delay;
        if self.blocking {
            return run_blocking(move || {
                gauge.enter();
                if let Some(delay) = delay {
                    std::thread::sleep(delay);
                }
                gauge.leave();
                step.play()
            })
            .await;
        }

        gauge.enter();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        gauge.leave();
        step.play()
    }
}
