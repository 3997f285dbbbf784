// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// iOS detector backend: Google ML Kit object detection via objc2.
//
// Requires the `GoogleMLKit/ObjectDetection` pod linked into the host app.
// ML Kit classes are looked up at runtime, so a build without the pod fails
// at backend construction with a `DetectionError` instead of at link time.
//
// Frames must be 32-bit (BGRA from `AVCaptureVideoDataOutput`, or RGBA from
// the image-file route). They are wrapped as CIImage -> UIImage ->
// MLKVisionImage without copying pixels more than once, and detection uses
// the synchronous `resultsInImage:error:` on a blocking thread, as ML Kit
// requires for that API.
//
// ## Unsafe code
//
// 1. **ObjC message sends** (msg_send!): selectors and argument types follow
//    the ML Kit and Core Image headers. Struct arguments (`CGSize`, `CGRect`)
//    carry their exact Objective-C encodings so objc2 can verify them.
// 2. **Send wrapper** (`SharedObject`): the ML Kit detector is reference
//    counted and has no thread affinity. The backend does not report
//    concurrent-call support, so the bridge keeps one call in flight and
//    waits out a timed-out call before starting the next one.

#![cfg(target_os = "ios")]

use std::ffi::CStr;

use async_trait::async_trait;
use objc2::encode::{Encode, Encoding, RefEncode};
use objc2::rc::Retained;
use objc2::runtime::{AnyClass, AnyObject};
use objc2::{ClassType, msg_send};
use objc2_foundation::{NSData, NSError, NSString};
use objc2_ui_kit::{UIImage, UIImageOrientation};

use sichtwerk_core::DetectionError;
use sichtwerk_core::types::{
    BoundingBox, DetectedObject, DetectorMode, DetectorOptions, PixelFormat, Rotation,
    ValidatedFrame,
};

use crate::blocking::run_blocking;
use crate::traits::DetectorBackend;

// ---------------------------------------------------------------------------
// Core Graphics / Core Image FFI
// ---------------------------------------------------------------------------

#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct CGPoint {
    x: f64,
    y: f64,
}

unsafe impl Encode for CGPoint {
    const ENCODING: Encoding = Encoding::Struct("CGPoint", &[f64::ENCODING, f64::ENCODING]);
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct CGSize {
    width: f64,
    height: f64,
}

unsafe impl Encode for CGSize {
    const ENCODING: Encoding = Encoding::Struct("CGSize", &[f64::ENCODING, f64::ENCODING]);
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct CGRect {
    origin: CGPoint,
    size: CGSize,
}

unsafe impl Encode for CGRect {
    const ENCODING: Encoding = Encoding::Struct("CGRect", &[CGPoint::ENCODING, CGSize::ENCODING]);
}

/// Opaque `CGColorSpaceRef` target, only ever passed as null.
#[repr(C)]
struct CGColorSpace {
    _private: [u8; 0],
}

unsafe impl RefEncode for CGColorSpace {
    const ENCODING_REF: Encoding = Encoding::Pointer(&Encoding::Struct("CGColorSpace", &[]));
}

#[link(name = "CoreImage", kind = "framework")]
unsafe extern "C" {
    static kCIFormatBGRA8: i32;
    static kCIFormatRGBA8: i32;
}

// ---------------------------------------------------------------------------
// ML Kit constants
// ---------------------------------------------------------------------------

/// `MLKObjectDetectorModeStream`.
const MLK_MODE_STREAM: isize = 0;
/// `MLKObjectDetectorModeSingleImage`.
const MLK_MODE_SINGLE_IMAGE: isize = 1;

const CLS_OPTIONS: &CStr = c"MLKObjectDetectorOptions";
const CLS_DETECTOR: &CStr = c"MLKObjectDetector";
const CLS_VISION_IMAGE: &CStr = c"MLKVisionImage";
const CLS_CIIMAGE: &CStr = c"CIImage";

fn class(name: &CStr) -> Result<&'static AnyClass, DetectionError> {
    AnyClass::get(name).ok_or_else(|| {
        DetectionError::new(format!(
            "{} is not linked into this app",
            name.to_string_lossy()
        ))
    })
}

fn ns_error_message(err: &NSError) -> String {
    err.localizedDescription().to_string()
}

/// Image orientation ML Kit should assume, from the clockwise rotation that
/// brings the frame upright.
fn orientation_for(rotation: Rotation) -> UIImageOrientation {
    match rotation {
        Rotation::Deg0 => UIImageOrientation::Up,
        Rotation::Deg90 => UIImageOrientation::Right,
        Rotation::Deg180 => UIImageOrientation::Down,
        Rotation::Deg270 => UIImageOrientation::Left,
    }
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// Retained ObjC object that may cross to the blocking thread pool.
#[derive(Clone)]
struct SharedObject(Retained<AnyObject>);

// SAFETY: see "Send wrapper" in the module header.
unsafe impl Send for SharedObject {}
unsafe impl Sync for SharedObject {}

/// ML Kit object detector, one instance per configuration.
pub struct MlKitBackend {
    detector: SharedObject,
    options: DetectorOptions,
}

impl MlKitBackend {
    /// Build `[MLKObjectDetector objectDetectorWithOptions:]` for `options`.
    pub fn new(options: DetectorOptions) -> Result<Self, DetectionError> {
        let options_cls = class(CLS_OPTIONS)?;
        let detector_cls = class(CLS_DETECTOR)?;

        let mode = match options.mode {
            DetectorMode::Stream => MLK_MODE_STREAM,
            DetectorMode::SingleImage => MLK_MODE_SINGLE_IMAGE,
        };

        // SAFETY: MLKObjectDetectorOptions exposes these as plain properties.
        let detector: Option<Retained<AnyObject>> = unsafe {
            let mlk_options: Retained<AnyObject> = msg_send![options_cls, new];
            let _: () = msg_send![&mlk_options, setDetectorMode: mode];
            let _: () = msg_send![&mlk_options, setShouldEnableMultipleObjects: options.multiple_objects];
            let _: () = msg_send![&mlk_options, setShouldEnableClassification: options.classification];
            msg_send![detector_cls, objectDetectorWithOptions: &*mlk_options]
        };
        let detector =
            detector.ok_or_else(|| DetectionError::new("ML Kit returned no object detector"))?;

        tracing::info!(mode = ?options.mode, "iOS: ML Kit object detector created");
        Ok(Self {
            detector: SharedObject(detector),
            options,
        })
    }
}

/// Owned copy of what the blocking thread needs from a frame.
struct FrameInput {
    bytes: Vec<u8>,
    width: u32,
    height: u32,
    rotation: Rotation,
    format: PixelFormat,
}

/// CIImage -> UIImage -> MLKVisionImage.
fn vision_image(input: &FrameInput) -> Result<Retained<AnyObject>, DetectionError> {
    let ci_format = match input.format {
        // SAFETY: Core Image exports these as immutable globals.
        PixelFormat::Bgra8888 => unsafe { kCIFormatBGRA8 },
        PixelFormat::Rgba8888 => unsafe { kCIFormatRGBA8 },
        PixelFormat::Nv21 => {
            return Err(DetectionError::new(
                "NV21 frames are not supported by the iOS detector; send BGRA8888",
            ));
        }
    };

    let ci_cls = class(CLS_CIIMAGE)?;
    let vision_cls = class(CLS_VISION_IMAGE)?;

    let data = NSData::with_bytes(&input.bytes);
    let bytes_per_row = input.width as usize * 4;
    let size = CGSize {
        width: f64::from(input.width),
        height: f64::from(input.height),
    };
    let orientation = orientation_for(input.rotation);
    let no_color_space: *const CGColorSpace = std::ptr::null();

    // SAFETY: argument types match the CIImage, UIImage and MLKVisionImage
    // headers; every returned object is checked for nil.
    unsafe {
        let ci: Option<Retained<AnyObject>> = msg_send![
            ci_cls,
            imageWithBitmapData: &*data,
            bytesPerRow: bytes_per_row,
            size: size,
            format: ci_format,
            colorSpace: no_color_space
        ];
        let ci = ci.ok_or_else(|| DetectionError::new("Core Image rejected the frame buffer"))?;

        let ui: Option<Retained<UIImage>> = msg_send![
            UIImage::class(),
            imageWithCIImage: &*ci,
            scale: 1.0f64,
            orientation: orientation
        ];
        let ui = ui.ok_or_else(|| DetectionError::new("UIKit rejected the frame image"))?;

        let alloc: *mut AnyObject = msg_send![vision_cls, alloc];
        let vision: Option<Retained<AnyObject>> = msg_send![alloc, initWithImage: &*ui];
        let vision =
            vision.ok_or_else(|| DetectionError::new("ML Kit rejected the frame image"))?;
        let _: () = msg_send![&vision, setOrientation: orientation];
        Ok(vision)
    }
}

/// Read `NSArray<MLKObject *>` into our model, keeping ML Kit's order.
///
/// # Safety
///
/// `results` must be the array returned by `resultsInImage:error:`.
unsafe fn read_objects(results: &AnyObject) -> Vec<DetectedObject> {
    unsafe {
        let count: usize = msg_send![results, count];
        let mut objects = Vec::with_capacity(count);

        for i in 0..count {
            let item: Retained<AnyObject> = msg_send![results, objectAtIndex: i];

            let labels: Retained<AnyObject> = msg_send![&item, labels];
            let label_count: usize = msg_send![&labels, count];
            let mut object = if label_count > 0 {
                let first: Retained<AnyObject> = msg_send![&labels, objectAtIndex: 0usize];
                let text: Retained<NSString> = msg_send![&first, text];
                let confidence: f32 = msg_send![&first, confidence];
                DetectedObject::new(Some(&text.to_string())).with_confidence(confidence)
            } else {
                DetectedObject::unknown()
            };

            let frame: CGRect = msg_send![&item, frame];
            object = object.with_bounding_box(BoundingBox {
                left: frame.origin.x.round() as i32,
                top: frame.origin.y.round() as i32,
                right: (frame.origin.x + frame.size.width).round() as i32,
                bottom: (frame.origin.y + frame.size.height).round() as i32,
            });

            let tracking: Option<Retained<AnyObject>> = msg_send![&item, trackingID];
            if let Some(tracking) = tracking {
                let id: i32 = msg_send![&tracking, intValue];
                object = object.with_tracking_id(id);
            }

            objects.push(object);
        }
        objects
    }
}

fn detect_blocking(
    detector: &SharedObject,
    input: &FrameInput,
) -> Result<Vec<DetectedObject>, DetectionError> {
    let image = vision_image(input)?;

    // SAFETY: `resultsInImage:error:` returns nil and fills the error on
    // failure; objc2's `error: _` form maps that to `Err`.
    let results: Result<Retained<AnyObject>, Retained<NSError>> =
        unsafe { msg_send![&detector.0, resultsInImage: &*image, error: _] };

    match results {
        Ok(results) => Ok(unsafe { read_objects(&results) }),
        Err(err) => Err(DetectionError::new(ns_error_message(&err))),
    }
}

#[async_trait]
impl DetectorBackend for MlKitBackend {
    fn name(&self) -> &str {
        "ML Kit (iOS)"
    }

    fn options(&self) -> &DetectorOptions {
        &self.options
    }

    async fn detect(&self, frame: &ValidatedFrame) -> Result<Vec<DetectedObject>, DetectionError> {
        let input = FrameInput {
            bytes: frame.pixel_data().to_vec(),
            width: frame.width(),
            height: frame.height(),
            rotation: frame.rotation(),
            format: frame.format(),
        };
        let detector = self.detector.clone();

        tracing::debug!(
            width = input.width,
            height = input.height,
            rotation = input.rotation.degrees(),
            bytes = input.bytes.len(),
            "iOS: running ML Kit object detection"
        );

        run_blocking(move || detect_blocking(&detector, &input)).await
    }
}
