// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Sichtwerk.
//
// Every failure a request can hit maps to exactly one boundary `ErrorKind`,
// which is what the host UI sees next to the message.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::PixelFormat;

/// The caller handed us a frame (or call arguments) we refuse to pass on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("missing frame data")]
    MissingData,

    #[error("invalid frame dimensions {width}x{height}")]
    InvalidDimensions { width: i32, height: i32 },

    #[error("invalid rotation {0} (expected 0, 90, 180 or 270)")]
    InvalidRotation(i32),

    #[error("{format} buffer of {actual} bytes does not match the frame size (expected {expected})")]
    SizeMismatch {
        format: PixelFormat,
        expected: String,
        actual: usize,
    },

    #[error("{0} is required")]
    MissingArgument(String),

    #[error("malformed arguments: {0}")]
    MalformedArguments(String),
}

/// The detector backend failed. The message is forwarded untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct DetectionError {
    pub message: String,
}

impl DetectionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Top-level error type for all Sichtwerk operations.
#[derive(Debug, Error)]
pub enum SichtwerkError {
    // -- Request errors --
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Detection(#[from] DetectionError),

    #[error("processing error: {0}")]
    Processing(String),

    #[error("request cancelled")]
    Cancelled,

    // -- Image file route --
    #[error("image file not found: {0}")]
    FileNotFound(String),

    // -- Storage / configuration --
    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, SichtwerkError>;

/// Error code surfaced to the host across the channel boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    InvalidArgument,
    DetectionError,
    ProcessingError,
    FileNotFound,
    Cancelled,
}

impl ErrorKind {
    /// Wire code, e.g. `INVALID_ARGUMENT`.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::DetectionError => "DETECTION_ERROR",
            Self::ProcessingError => "PROCESSING_ERROR",
            Self::FileNotFound => "FILE_NOT_FOUND",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

impl SichtwerkError {
    /// Boundary kind for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::InvalidArgument,
            Self::Detection(_) => ErrorKind::DetectionError,
            Self::FileNotFound(_) => ErrorKind::FileNotFound,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Processing(_) | Self::Io(_) | Self::Serialization(_) | Self::Config(_) => {
                ErrorKind::ProcessingError
            }
        }
    }

    /// Convert into the serializable `{ kind, message }` form.
    ///
    /// Detection messages pass through verbatim; everything else uses the
    /// `Display` text.
    pub fn to_response(&self) -> ErrorResponse {
        let message = match self {
            Self::Detection(e) => e.message.clone(),
            other => other.to_string(),
        };
        ErrorResponse {
            kind: self.kind(),
            message,
        }
    }
}

/// Error payload crossing the channel boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub kind: ErrorKind,
    pub message: String,
}
