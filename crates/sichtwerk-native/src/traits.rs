// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Platform-agnostic detector capability.

use async_trait::async_trait;

use sichtwerk_core::DetectionError;
use sichtwerk_core::types::{DetectedObject, DetectorOptions, ValidatedFrame};

/// Detect objects in one frame, asynchronously.
///
/// Implementations wrap a vendor vision SDK. They are built once from a
/// [`DetectorOptions`] and reused across frames; the options never change
/// afterwards.
#[async_trait]
pub trait DetectorBackend: Send + Sync {
    /// Short name for logs (e.g. "ML Kit (Android)").
    fn name(&self) -> &str;

    /// Options this backend was built with.
    fn options(&self) -> &DetectorOptions;

    /// Whether overlapping `detect` calls on this instance are safe.
    ///
    /// Most stream-mode SDKs keep tracking state and are not, hence the
    /// default.
    fn supports_concurrent_calls(&self) -> bool {
        false
    }

    /// Run detection. Objects come back in the SDK's order.
    ///
    /// Any SDK failure (model load, bad image, internal timeout) is reported
    /// as a [`DetectionError`] carrying the SDK's own message.
    async fn detect(&self, frame: &ValidatedFrame) -> Result<Vec<DetectedObject>, DetectionError>;
}
