// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Still-image route: decode an image file into an RGBA frame.
//
// Pure EXIF rotations are passed on as the frame rotation so the detector
// sees the same upright image the camera route would give it. Orientations
// that include a mirror are baked into the pixels and the frame is sent
// with rotation 0.

use std::path::Path;

use image::metadata::Orientation;
use image::{DynamicImage, ImageDecoder, ImageReader};
use tracing::{debug, instrument};

use sichtwerk_core::SichtwerkError;
use sichtwerk_core::types::{FrameDescriptor, PixelFormat};

/// Load `path` as an RGBA frame.
#[instrument(skip_all, fields(path = %path.as_ref().display()))]
pub fn load_frame(path: impl AsRef<Path>) -> Result<FrameDescriptor, SichtwerkError> {
    let path = path.as_ref();
    let unreadable = |e: std::io::Error| {
        SichtwerkError::FileNotFound(format!("{}: {e}", path.display()))
    };

    let reader = ImageReader::open(path)
        .map_err(unreadable)?
        .with_guessed_format()
        .map_err(unreadable)?;
    let mut decoder = reader.into_decoder().map_err(decode_failed)?;
    let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);
    let mut image = DynamicImage::from_decoder(decoder).map_err(decode_failed)?;

    let rotation = match rotation_for(orientation) {
        Some(degrees) => degrees,
        None => {
            image.apply_orientation(orientation);
            0
        }
    };

    let width = dimension(image.width())?;
    let height = dimension(image.height())?;
    debug!(width, height, rotation, ?orientation, "decoded image file");

    let pixels = image.into_rgba8().into_raw();
    Ok(FrameDescriptor::new(pixels, width, height, rotation).with_format(PixelFormat::Rgba8888))
}

/// Clockwise rotation for orientations without a mirror component.
fn rotation_for(orientation: Orientation) -> Option<i32> {
    match orientation {
        Orientation::NoTransforms => Some(0),
        Orientation::Rotate90 => Some(90),
        Orientation::Rotate180 => Some(180),
        Orientation::Rotate270 => Some(270),
        _ => None,
    }
}

fn dimension(value: u32) -> Result<i32, SichtwerkError> {
    i32::try_from(value)
        .map_err(|_| SichtwerkError::Processing(format!("image dimension {value} is too large")))
}

fn decode_failed(e: image::ImageError) -> SichtwerkError {
    SichtwerkError::Processing(format!("failed to decode image: {e}"))
}
