// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>

//! Sichtwerk — Native detector backends.
//!
//! Defines the detector capability the bridge calls into and picks the
//! implementation for the target operating system: ML Kit through JNI on
//! Android, ML Kit through objc2 on iOS, and a stub everywhere else.

pub mod blocking;
pub mod traits;

#[cfg(target_os = "ios")]
pub mod ios;

#[cfg(target_os = "android")]
pub mod android;

#[cfg(not(any(target_os = "ios", target_os = "android")))]
pub mod stub;

use std::sync::Arc;

use sichtwerk_core::DetectionError;
use sichtwerk_core::types::DetectorOptions;

pub use blocking::run_blocking;
pub use traits::DetectorBackend;

/// Build the detector backend for the target operating system.
///
/// Called once per configuration; the returned backend is meant to be reused
/// for every frame (stream mode keeps tracking state between calls).
pub fn platform_backend(
    options: DetectorOptions,
) -> Result<Arc<dyn DetectorBackend>, DetectionError> {
    #[cfg(target_os = "ios")]
    {
        Ok(Arc::new(ios::MlKitBackend::new(options)?))
    }
    #[cfg(target_os = "android")]
    {
        Ok(Arc::new(android::MlKitBackend::new(options)?))
    }
    #[cfg(not(any(target_os = "ios", target_os = "android")))]
    {
        // DESKTOP/CI: no vision SDK, every call reports that.
        Ok(Arc::new(stub::StubBackend::new(options)))
    }
}
