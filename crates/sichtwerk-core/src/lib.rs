// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Sichtwerk — Frame model, validation, result formatting, error taxonomy and
// configuration shared across all crates.

pub mod config;
pub mod error;
pub mod format;
pub mod types;
pub mod validate;

pub use config::{BridgeConfig, ConcurrencyPolicy};
pub use error::{DetectionError, ErrorKind, ErrorResponse, SichtwerkError, ValidationError};
pub use format::format_detections;
pub use types::*;
pub use validate::{check, validate};
