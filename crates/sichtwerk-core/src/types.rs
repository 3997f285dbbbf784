// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Sichtwerk detection bridge.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Label reported when the backend supplies no classification.
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Chroma value used to pad luma-only NV21 frames (neutral grey).
const NEUTRAL_CHROMA: u8 = 128;

/// Unique identifier for a detection request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Pixel encodings a frame may arrive in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// YUV 4:2:0 with a full luma plane followed by interleaved V/U samples.
    /// Android camera preview default.
    #[default]
    Nv21,
    /// 32-bit BGRA, iOS `kCVPixelFormatType_32BGRA`.
    Bgra8888,
    /// 32-bit RGBA, produced when decoding image files.
    Rgba8888,
}

impl PixelFormat {
    /// Length of a complete buffer for a `width` x `height` frame.
    ///
    /// `None` if the size overflows `usize`.
    pub fn full_len(&self, width: u32, height: u32) -> Option<usize> {
        let w = width as usize;
        let h = height as usize;
        match self {
            Self::Nv21 => {
                let luma = w.checked_mul(h)?;
                let chroma = w.div_ceil(2).checked_mul(h.div_ceil(2))?.checked_mul(2)?;
                luma.checked_add(chroma)
            }
            Self::Bgra8888 | Self::Rgba8888 => w.checked_mul(h)?.checked_mul(4),
        }
    }

    /// Every buffer length that is consistent with the frame size.
    ///
    /// NV21 also accepts a bare luma plane; the chroma plane is then
    /// synthesised as neutral grey where an adapter needs it.
    pub fn accepted_lengths(&self, width: u32, height: u32) -> Vec<usize> {
        let mut lengths = Vec::with_capacity(2);
        if let Self::Nv21 = self {
            if let Some(luma) = (width as usize).checked_mul(height as usize) {
                lengths.push(luma);
            }
        }
        if let Some(full) = self.full_len(width, height) {
            lengths.push(full);
        }
        lengths
    }

    /// Bytes per pixel for packed formats; `None` for planar ones.
    pub fn bytes_per_pixel(&self) -> Option<usize> {
        match self {
            Self::Nv21 => None,
            Self::Bgra8888 | Self::Rgba8888 => Some(4),
        }
    }
}

impl std::fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Nv21 => "NV21",
            Self::Bgra8888 => "BGRA8888",
            Self::Rgba8888 => "RGBA8888",
        };
        f.write_str(name)
    }
}

/// Clockwise rotation needed to bring the frame upright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Rotation {
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub fn from_degrees(degrees: i32) -> Option<Self> {
        match degrees {
            0 => Some(Self::Deg0),
            90 => Some(Self::Deg90),
            180 => Some(Self::Deg180),
            270 => Some(Self::Deg270),
            _ => None,
        }
    }

    pub fn degrees(&self) -> i32 {
        match self {
            Self::Deg0 => 0,
            Self::Deg90 => 90,
            Self::Deg180 => 180,
            Self::Deg270 => 270,
        }
    }
}

/// One camera frame as received from the capture source.
///
/// Fields are kept exactly as they crossed the boundary (signed sizes,
/// unchecked rotation) so that validation can report what was wrong.
/// Immutable once built; [`crate::validate`] turns it into a [`ValidatedFrame`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameDescriptor {
    pixel_data: Vec<u8>,
    width: i32,
    height: i32,
    rotation_degrees: i32,
    format: PixelFormat,
}

impl FrameDescriptor {
    /// Create an NV21 frame descriptor.
    pub fn new(pixel_data: Vec<u8>, width: i32, height: i32, rotation_degrees: i32) -> Self {
        Self {
            pixel_data,
            width,
            height,
            rotation_degrees,
            format: PixelFormat::Nv21,
        }
    }

    /// Same frame, declared in another pixel encoding.
    pub fn with_format(mut self, format: PixelFormat) -> Self {
        self.format = format;
        self
    }

    pub fn pixel_data(&self) -> &[u8] {
        &self.pixel_data
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn rotation_degrees(&self) -> i32 {
        self.rotation_degrees
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }
}

/// A frame that passed validation. Only these reach a detector backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedFrame {
    descriptor: FrameDescriptor,
    width: u32,
    height: u32,
    rotation: Rotation,
}

impl ValidatedFrame {
    pub(crate) fn new(
        descriptor: FrameDescriptor,
        width: u32,
        height: u32,
        rotation: Rotation,
    ) -> Self {
        Self {
            descriptor,
            width,
            height,
            rotation,
        }
    }

    pub fn pixel_data(&self) -> &[u8] {
        self.descriptor.pixel_data()
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn rotation(&self) -> Rotation {
        self.rotation
    }

    pub fn format(&self) -> PixelFormat {
        self.descriptor.format()
    }

    /// True for an NV21 frame that carries only its luma plane.
    pub fn is_luma_only(&self) -> bool {
        self.format() == PixelFormat::Nv21
            && self.pixel_data().len() == self.width as usize * self.height as usize
    }

    /// NV21 bytes with a complete chroma plane.
    ///
    /// Borrowed when the frame is already complete; luma-only frames are
    /// padded with neutral chroma. Non-NV21 frames are returned as-is.
    pub fn to_full_nv21(&self) -> Cow<'_, [u8]> {
        if !self.is_luma_only() {
            return Cow::Borrowed(self.pixel_data());
        }
        let full = self
            .format()
            .full_len(self.width, self.height)
            .unwrap_or(self.pixel_data().len());
        let mut buf = Vec::with_capacity(full);
        buf.extend_from_slice(self.pixel_data());
        buf.resize(full, NEUTRAL_CHROMA);
        Cow::Owned(buf)
    }

    /// Give the descriptor back, e.g. to drop its buffer early.
    pub fn into_descriptor(self) -> FrameDescriptor {
        self.descriptor
    }
}

/// Axis-aligned box in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

/// One detected object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedObject {
    /// Best-guess classification, or [`UNKNOWN_LABEL`].
    pub label: String,
    /// Score in `[0, 1]` when the backend reports one.
    pub confidence: Option<f32>,
    pub bounding_box: Option<BoundingBox>,
    /// Stable id across frames in stream mode.
    pub tracking_id: Option<i32>,
}

impl DetectedObject {
    /// Build from the backend's top label. Missing or blank labels become
    /// [`UNKNOWN_LABEL`].
    pub fn new(label: Option<&str>) -> Self {
        Self {
            label: clean_label(label),
            confidence: None,
            bounding_box: None,
            tracking_id: None,
        }
    }

    /// An object with no classification.
    pub fn unknown() -> Self {
        Self::new(None)
    }

    /// Attach a confidence score, clamped to `[0, 1]`. NaN is dropped.
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = clean_confidence(Some(confidence));
        self
    }

    pub fn with_bounding_box(mut self, bounding_box: BoundingBox) -> Self {
        self.bounding_box = Some(bounding_box);
        self
    }

    pub fn with_tracking_id(mut self, tracking_id: i32) -> Self {
        self.tracking_id = Some(tracking_id);
        self
    }

    pub fn is_unknown(&self) -> bool {
        self.label == UNKNOWN_LABEL
    }

    /// Re-apply the label and confidence rules to an object built by hand.
    fn repair(&mut self) {
        self.label = clean_label(Some(&self.label));
        self.confidence = clean_confidence(self.confidence);
    }
}

fn clean_label(label: Option<&str>) -> String {
    match label.map(str::trim) {
        Some(text) if !text.is_empty() => text.to_string(),
        _ => UNKNOWN_LABEL.to_string(),
    }
}

fn clean_confidence(confidence: Option<f32>) -> Option<f32> {
    confidence
        .filter(|c| !c.is_nan())
        .map(|c| c.clamp(0.0, 1.0))
}

/// How the backend treats consecutive frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorMode {
    /// Stateless per call.
    SingleImage,
    /// Frames arrive at a steady cadence; the backend may track between them.
    Stream,
}

/// Options a detector backend is built with. Fixed for the backend's life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectorOptions {
    pub mode: DetectorMode,
    /// When false, at most one object is reported.
    pub multiple_objects: bool,
    /// When false, every label is [`UNKNOWN_LABEL`].
    pub classification: bool,
}

impl Default for DetectorOptions {
    fn default() -> Self {
        Self {
            mode: DetectorMode::Stream,
            multiple_objects: true,
            classification: true,
        }
    }
}

impl DetectorOptions {
    /// Enforce the options on whatever a backend returned.
    ///
    /// Backends are expected to honour their options already; this makes the
    /// guarantee hold for backends that do not. Objects built from a struct
    /// literal also get blank labels replaced and confidence clamped.
    pub fn normalize(&self, mut objects: Vec<DetectedObject>) -> Vec<DetectedObject> {
        if !self.multiple_objects {
            objects.truncate(1);
        }
        for object in &mut objects {
            if self.classification {
                object.repair();
            } else {
                object.label = UNKNOWN_LABEL.to_string();
                object.confidence = None;
            }
        }
        objects
    }
}

/// Successful outcome of one detection request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionReport {
    pub request_id: RequestId,
    pub objects: Vec<DetectedObject>,
    /// `Detected: <label>` lines, see [`crate::format_detections`].
    pub text: String,
}
