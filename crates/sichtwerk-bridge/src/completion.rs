// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Single-shot completion contract.
//
// `Completion::complete` consumes the handle, so delivering twice does not
// compile. A handle that is dropped without being completed (dispatcher
// gone, runtime shutting down) delivers a processing error from `Drop`, so a
// caller is never left waiting.

use std::panic::{AssertUnwindSafe, catch_unwind};

use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use sichtwerk_core::SichtwerkError;
use sichtwerk_core::types::DetectionReport;

/// What a request resolves to.
pub type Outcome = Result<DetectionReport, SichtwerkError>;

enum Sink {
    Callback(Box<dyn FnOnce(Outcome) + Send + 'static>),
    Channel(oneshot::Sender<Outcome>),
}

/// Where a request's outcome is delivered. Fires exactly once.
pub struct Completion {
    sink: Option<Sink>,
}

impl Completion {
    /// Deliver the outcome to a callback.
    pub fn callback(f: impl FnOnce(Outcome) + Send + 'static) -> Self {
        Self {
            sink: Some(Sink::Callback(Box::new(f))),
        }
    }

    /// Deliver the outcome over a oneshot channel.
    pub fn channel() -> (Self, oneshot::Receiver<Outcome>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                sink: Some(Sink::Channel(tx)),
            },
            rx,
        )
    }

    /// Deliver `outcome`, consuming the handle.
    pub fn complete(mut self, outcome: Outcome) {
        if let Some(sink) = self.sink.take() {
            deliver(sink, outcome);
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if let Some(sink) = self.sink.take() {
            warn!("completion dropped without an outcome, reporting processing error");
            deliver(
                sink,
                Err(SichtwerkError::Processing(
                    "request dropped before completion".into(),
                )),
            );
        }
    }
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.sink {
            Some(Sink::Callback(_)) => "callback",
            Some(Sink::Channel(_)) => "channel",
            None => "spent",
        };
        f.debug_struct("Completion").field("sink", &kind).finish()
    }
}

fn deliver(sink: Sink, outcome: Outcome) {
    match sink {
        Sink::Callback(f) => {
            // A panicking host callback must not take the dispatcher down.
            if catch_unwind(AssertUnwindSafe(move || f(outcome))).is_err() {
                error!("completion callback panicked");
            }
        }
        Sink::Channel(tx) => {
            if tx.send(outcome).is_err() {
                debug!("completion receiver gone, outcome discarded");
            }
        }
    }
}
