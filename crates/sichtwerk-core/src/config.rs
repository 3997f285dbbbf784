// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Bridge configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SichtwerkError};
use crate::types::DetectorOptions;

/// Channel name the host registers the bridge under.
pub const DEFAULT_CHANNEL_NAME: &str = "object_detection";

/// Whether detect calls on one backend instance may overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrencyPolicy {
    /// One call in flight; the rest wait in submission order.
    Serialized,
    /// Calls overlap; completions fire in finish order.
    Concurrent,
    /// Serialized unless the backend says it copes with concurrent calls.
    #[default]
    Auto,
}

/// Persistent bridge settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Method channel name.
    pub channel_name: String,
    /// Options the detector backend is built with.
    pub detector: DetectorOptions,
    /// Call overlap policy for the backend.
    pub concurrency: ConcurrencyPolicy,
    /// Give up on a backend call after this many milliseconds. `None` trusts
    /// the backend to finish on its own.
    pub detection_timeout_ms: Option<u64>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            channel_name: DEFAULT_CHANNEL_NAME.to_string(),
            detector: DetectorOptions::default(),
            concurrency: ConcurrencyPolicy::Auto,
            detection_timeout_ms: None,
        }
    }
}

impl BridgeConfig {
    /// Load a JSON config file. Missing keys take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&data)?;
        config.check()?;
        Ok(config)
    }

    /// Write the config as pretty JSON.
    pub fn persist(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), json)?;
        Ok(())
    }

    pub fn detection_timeout(&self) -> Option<Duration> {
        self.detection_timeout_ms.map(Duration::from_millis)
    }

    fn check(&self) -> Result<()> {
        if self.channel_name.trim().is_empty() {
            return Err(SichtwerkError::Config("channel_name must not be empty".into()));
        }
        if self.detection_timeout_ms == Some(0) {
            return Err(SichtwerkError::Config(
                "detection_timeout_ms must be positive (omit it to disable)".into(),
            ));
        }
        Ok(())
    }
}
