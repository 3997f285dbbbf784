// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Text summary handed back to the host UI.

use crate::types::DetectedObject;

const LINE_PREFIX: &str = "Detected: ";

/// One `Detected: <label>\n` line per object, in backend order.
///
/// An empty slice yields an empty string; how to show "nothing found" is up
/// to the UI.
pub fn format_detections(objects: &[DetectedObject]) -> String {
    let capacity = objects
        .iter()
        .map(|o| LINE_PREFIX.len() + o.label.len() + 1)
        .sum();
    let mut out = String::with_capacity(capacity);
    for object in objects {
        out.push_str(LINE_PREFIX);
        out.push_str(&object.label);
        out.push('\n');
    }
    out
}
