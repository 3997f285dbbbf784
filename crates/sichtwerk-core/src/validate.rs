// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Frame validation. Pure checks, run before anything touches native code.

use crate::error::ValidationError;
use crate::types::{FrameDescriptor, Rotation, ValidatedFrame};

/// Check a descriptor without consuming it.
///
/// Checks run in a fixed order: dimensions, rotation, data presence, size.
pub fn check(descriptor: &FrameDescriptor) -> Result<(), ValidationError> {
    checked_parts(descriptor).map(|_| ())
}

/// Validate a descriptor and take ownership of it as a [`ValidatedFrame`].
pub fn validate(descriptor: FrameDescriptor) -> Result<ValidatedFrame, ValidationError> {
    let (width, height, rotation) = checked_parts(&descriptor)?;
    Ok(ValidatedFrame::new(descriptor, width, height, rotation))
}

fn checked_parts(descriptor: &FrameDescriptor) -> Result<(u32, u32, Rotation), ValidationError> {
    let (raw_w, raw_h) = (descriptor.width(), descriptor.height());
    if raw_w <= 0 || raw_h <= 0 {
        return Err(ValidationError::InvalidDimensions {
            width: raw_w,
            height: raw_h,
        });
    }
    let (width, height) = (raw_w as u32, raw_h as u32);

    let rotation = Rotation::from_degrees(descriptor.rotation_degrees())
        .ok_or(ValidationError::InvalidRotation(descriptor.rotation_degrees()))?;

    let actual = descriptor.pixel_data().len();
    if actual == 0 {
        return Err(ValidationError::MissingData);
    }

    let format = descriptor.format();
    let accepted = format.accepted_lengths(width, height);
    if !accepted.contains(&actual) {
        let expected = accepted
            .iter()
            .map(usize::to_string)
            .collect::<Vec<_>>()
            .join(" or ");
        return Err(ValidationError::SizeMismatch {
            format,
            expected,
            actual,
        });
    }

    Ok((width, height, rotation))
}
