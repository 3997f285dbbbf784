// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The `object_detection` method channel.
//
// Hosts that talk in named method calls with loosely typed arguments go
// through here. Arguments are decoded into frame descriptors, run through
// the bridge, and every outcome (including argument errors) comes back as a
// `MethodResponse`; nothing is raised past this point.

use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use sichtwerk_core::types::{FrameDescriptor, PixelFormat};
use sichtwerk_core::{ErrorKind, SichtwerkError, ValidationError};

use crate::bridge::FrameBridge;
use crate::image_file;

/// Camera-frame detection.
pub const DETECT_FROM_STREAM: &str = "detectObjectsFromStream";
/// Still-image detection from a file path.
pub const DETECT_FROM_FILE: &str = "detectObjects";

/// One call on the channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodCall {
    pub method: String,
    #[serde(default)]
    pub arguments: Value,
}

impl MethodCall {
    pub fn new(method: impl Into<String>, arguments: Value) -> Self {
        Self {
            method: method.into(),
            arguments,
        }
    }
}

/// Reply to a [`MethodCall`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MethodResponse {
    Success { result: String },
    Error { kind: ErrorKind, message: String },
    NotImplemented,
}

impl MethodResponse {
    fn failure(err: &SichtwerkError) -> Self {
        let resp = err.to_response();
        Self::Error {
            kind: resp.kind,
            message: resp.message,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct StreamArgs {
    #[serde(alias = "bytes")]
    pixel_data: Vec<u8>,
    width: i32,
    height: i32,
    #[serde(alias = "rotation")]
    rotation_degrees: i32,
    format: PixelFormat,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct FileArgs {
    image_path: Option<String>,
}

/// Parse call arguments; `null` counts as "no arguments".
fn parse_args<T: Default + DeserializeOwned>(arguments: &Value) -> Result<T, SichtwerkError> {
    if arguments.is_null() {
        return Ok(T::default());
    }
    T::deserialize(arguments)
        .map_err(|e| ValidationError::MalformedArguments(e.to_string()).into())
}

/// Method channel bound to a bridge.
#[derive(Debug, Clone)]
pub struct MethodChannel {
    name: String,
    bridge: FrameBridge,
}

impl MethodChannel {
    pub fn new(name: impl Into<String>, bridge: FrameBridge) -> Self {
        Self {
            name: name.into(),
            bridge,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bridge(&self) -> &FrameBridge {
        &self.bridge
    }

    /// Handle one call. Always answers.
    #[instrument(skip_all, fields(channel = %self.name, method = %call.method))]
    pub async fn handle(&self, call: MethodCall) -> MethodResponse {
        let outcome = match call.method.as_str() {
            DETECT_FROM_STREAM => self.detect_from_stream(&call.arguments).await,
            DETECT_FROM_FILE => self.detect_from_file(&call.arguments).await,
            other => {
                debug!(method = other, "method not implemented");
                return MethodResponse::NotImplemented;
            }
        };

        match outcome {
            Ok(result) => MethodResponse::Success { result },
            Err(e) => {
                warn!(kind = %e.kind(), error = %e, "call failed");
                MethodResponse::failure(&e)
            }
        }
    }

    async fn detect_from_stream(&self, arguments: &Value) -> Result<String, SichtwerkError> {
        let args: StreamArgs = parse_args(arguments)?;
        let frame =
            FrameDescriptor::new(args.pixel_data, args.width, args.height, args.rotation_degrees)
                .with_format(args.format);
        let report = self.bridge.detect(frame).await?;
        Ok(report.text)
    }

    async fn detect_from_file(&self, arguments: &Value) -> Result<String, SichtwerkError> {
        let args: FileArgs = parse_args(arguments)?;
        let path = match args.image_path {
            Some(path) if !path.trim().is_empty() => PathBuf::from(path),
            _ => {
                return Err(ValidationError::MissingArgument("Image path".into()).into());
            }
        };

        let frame = tokio::task::spawn_blocking(move || image_file::load_frame(path))
            .await
            .map_err(|e| SichtwerkError::Processing(format!("image loader failed: {e}")))??;
        let report = self.bridge.detect(frame).await?;
        Ok(report.text)
    }
}
