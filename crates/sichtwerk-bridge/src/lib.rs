// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Sichtwerk Bridge — accepts frames from the host UI, validates them, hands
// them to the detector backend and delivers exactly one outcome per request.
// The `object_detection` method channel sits on top for hosts that speak in
// method calls rather than Rust types.

pub mod bridge;
pub mod channel;
pub mod completion;
pub mod image_file;
pub mod lifecycle;

#[cfg(test)]
pub(crate) mod testing;

pub use bridge::FrameBridge;
pub use channel::{MethodCall, MethodChannel, MethodResponse};
pub use completion::{Completion, Outcome};
pub use lifecycle::{BridgeStats, RequestState};
