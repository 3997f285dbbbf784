// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Data directory and config file resolution.

use std::path::{Path, PathBuf};

use sichtwerk_core::BridgeConfig;
use sichtwerk_core::error::Result;
use tracing::{debug, info};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "SICHTWERK_CONFIG";

const CONFIG_FILE: &str = "config.json";

/// Application data directory. Not created here; the host only reads it.
pub fn data_dir() -> PathBuf {
    base_dir(
        std::env::var_os("XDG_DATA_HOME").map(PathBuf::from),
        std::env::var_os("HOME").map(PathBuf::from),
    )
    .join("sichtwerk")
}

fn base_dir(xdg_data_home: Option<PathBuf>, home: Option<PathBuf>) -> PathBuf {
    if let Some(xdg) = xdg_data_home {
        return xdg;
    }
    if let Some(home) = home {
        return home.join(".local").join("share");
    }
    // Last resort
    PathBuf::from("/tmp")
}

/// `$SICHTWERK_CONFIG` if set, else `config.json` in the data directory.
pub fn config_path() -> PathBuf {
    match std::env::var_os(CONFIG_ENV) {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => data_dir().join(CONFIG_FILE),
    }
}

/// Load the config at `path`, or defaults when there is no file.
///
/// A file that exists but does not parse is an error.
pub fn load_config(path: &Path) -> Result<BridgeConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "no config file, using defaults");
        return Ok(BridgeConfig::default());
    }
    let config = BridgeConfig::load(path)?;
    info!(path = %path.display(), "loaded config");
    Ok(config)
}
