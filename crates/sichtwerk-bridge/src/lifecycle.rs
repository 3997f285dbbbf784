// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Request state machine and bridge counters.
//
//   Created -> Validating -> Rejected
//                         -> Validated -> Detecting -> Completed
//                                                   -> Failed
//
// Cancellation before dispatch goes straight to Failed from Validating or
// Validated.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tracing::debug;

use sichtwerk_core::types::RequestId;

/// Lifecycle states of a detection request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RequestState {
    /// Frame received from the caller.
    Created,
    /// Running frame checks.
    Validating,
    /// Checks passed, waiting for the backend.
    Validated,
    /// Checks failed. Terminal.
    Rejected,
    /// Backend call in flight.
    Detecting,
    /// Backend returned objects (possibly none). Terminal.
    Completed,
    /// Backend failed, or the request was cancelled. Terminal.
    Failed,
}

impl RequestState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected | Self::Completed | Self::Failed)
    }

    pub fn can_transition_to(&self, next: RequestState) -> bool {
        use RequestState::*;
        matches!(
            (self, next),
            (Created, Validating)
                | (Validating, Validated)
                | (Validating, Rejected)
                | (Validating, Failed)
                | (Validated, Detecting)
                | (Validated, Failed)
                | (Detecting, Completed)
                | (Detecting, Failed)
        )
    }
}

/// Current state of one request, with transition checking.
#[derive(Debug)]
pub(crate) struct RequestTrace {
    id: RequestId,
    state: RequestState,
}

impl RequestTrace {
    pub(crate) fn new(id: RequestId) -> Self {
        Self {
            id,
            state: RequestState::Created,
        }
    }

    pub(crate) fn id(&self) -> RequestId {
        self.id
    }

    pub(crate) fn state(&self) -> RequestState {
        self.state
    }

    pub(crate) fn advance(&mut self, next: RequestState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal request transition {:?} -> {:?}",
            self.state,
            next
        );
        debug!(request_id = %self.id, from = ?self.state, to = ?next, "request state");
        self.state = next;
    }
}

/// Point-in-time snapshot of the bridge counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BridgeStats {
    pub submitted: u64,
    pub rejected: u64,
    pub completed: u64,
    pub failed: u64,
    pub in_flight: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    submitted: AtomicU64,
    rejected: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    in_flight: AtomicU64,
}

impl Counters {
    pub(crate) fn submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn dispatched(&self) {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
    }

    /// The backend call behind a request has returned.
    pub(crate) fn settled(&self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record a terminal state. In-flight calls are released by `settled`.
    pub(crate) fn finished(&self, state: RequestState) {
        let counter = match state {
            RequestState::Rejected => &self.rejected,
            RequestState::Completed => &self.completed,
            RequestState::Failed => &self.failed,
            _ => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> BridgeStats {
        BridgeStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
        }
    }
}
