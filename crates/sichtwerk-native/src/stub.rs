// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Stub backend for desktop/CI builds where no vision SDK is available.
//
// Every detect call fails with a `DetectionError`. Real implementations
// live in the `ios` and `android` modules.

use async_trait::async_trait;

use sichtwerk_core::DetectionError;
use sichtwerk_core::types::{DetectedObject, DetectorOptions, ValidatedFrame};

use crate::traits::DetectorBackend;

pub const UNAVAILABLE_MESSAGE: &str = "object detection is not available on this platform";

/// No-op backend returned on non-mobile platforms.
pub struct StubBackend {
    options: DetectorOptions,
}

impl StubBackend {
    pub fn new(options: DetectorOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl DetectorBackend for StubBackend {
    fn name(&self) -> &str {
        "Desktop (stub)"
    }

    fn options(&self) -> &DetectorOptions {
        &self.options
    }

    fn supports_concurrent_calls(&self) -> bool {
        true
    }

    async fn detect(&self, frame: &ValidatedFrame) -> Result<Vec<DetectedObject>, DetectionError> {
        tracing::warn!(
            width = frame.width(),
            height = frame.height(),
            "DetectorBackend::detect called on stub backend"
        );
        Err(DetectionError::new(UNAVAILABLE_MESSAGE))
    }
}
