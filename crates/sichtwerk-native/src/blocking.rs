// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Blocking SDK calls off the async runtime.
//
// A panic on the blocking thread is resumed on the caller's task rather than
// turned into a `DetectionError`: it is an adapter fault, not an SDK
// message, and the bridge reports it as a processing error.

use sichtwerk_core::DetectionError;

/// Run `f` on tokio's blocking pool and return its result.
pub async fn run_blocking<F, T>(f: F) -> Result<T, DetectionError>
where
    F: FnOnce() -> Result<T, DetectionError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result,
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        // Only reachable while the runtime shuts down, when the caller's own
        // task is being dropped as well.
        Err(e) => Err(DetectionError::new(format!("detection thread cancelled: {e}"))),
    }
}
