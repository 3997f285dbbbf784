// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Android detector backend: Google ML Kit object detection via JNI.
//
// Requires the Android NDK and the `com.google.mlkit:object-detection`
// artifact on the app's classpath. The ML Kit client is created once, held as
// a JNI global reference, and reused for every frame. Each detect call runs
// on a blocking thread because it waits on the ML Kit `Task` with
// `Tasks.await`, which must never run on the Android main thread.

#![cfg(target_os = "android")]

use std::sync::Arc;

use async_trait::async_trait;
use jni::objects::{GlobalRef, JObject, JValue};
use jni::{JNIEnv, JavaVM};

use sichtwerk_core::DetectionError;
use sichtwerk_core::types::{
    BoundingBox, DetectedObject, DetectorMode, DetectorOptions, PixelFormat, ValidatedFrame,
};

use crate::blocking::run_blocking;
use crate::traits::DetectorBackend;

// ---------------------------------------------------------------------------
// ML Kit constants and class names
// ---------------------------------------------------------------------------

/// `ObjectDetectorOptions.STREAM_MODE`.
const STREAM_MODE: i32 = 1;
/// `ObjectDetectorOptions.SINGLE_IMAGE_MODE`.
const SINGLE_IMAGE_MODE: i32 = 2;
/// `InputImage.IMAGE_FORMAT_NV21`.
const IMAGE_FORMAT_NV21: i32 = 17;

const OPTIONS_BUILDER: &str = "com/google/mlkit/vision/objects/defaults/ObjectDetectorOptions$Builder";
const SIG_BUILDER_SELF: &str = "()Lcom/google/mlkit/vision/objects/defaults/ObjectDetectorOptions$Builder;";
const INPUT_IMAGE: &str = "com/google/mlkit/vision/common/InputImage";

/// Local frames hold every JNI reference created for one frame.
const LOCAL_FRAME_CAPACITY: i32 = 64;

// ---------------------------------------------------------------------------
// JNI plumbing
// ---------------------------------------------------------------------------

/// Failure inside a JNI sequence, before it is turned into a `DetectionError`.
enum JniFailure {
    Jni(jni::errors::Error),
    Java(String),
}

impl From<jni::errors::Error> for JniFailure {
    fn from(e: jni::errors::Error) -> Self {
        Self::Jni(e)
    }
}

type JniResult<T> = Result<T, JniFailure>;

/// Obtain the process `JavaVM` from the NDK context.
fn java_vm() -> Result<JavaVM, DetectionError> {
    let ctx = ndk_context::android_context();
    // SAFETY: `ctx.vm()` returns the `JavaVM*` set by the NDK glue code.
    // The pointer is guaranteed valid for the lifetime of the process.
    unsafe { JavaVM::from_raw(ctx.vm().cast()) }
        .map_err(|e| DetectionError::new(format!("failed to obtain JavaVM: {e}")))
}

/// Turn a JNI failure into a `DetectionError`.
///
/// A pending Java exception is cleared and its localized message used,
/// unwrapping the `ExecutionException` that `Tasks.await` wraps SDK
/// failures in.
fn to_detection_error(env: &mut JNIEnv, context: &str, failure: JniFailure) -> DetectionError {
    match failure {
        JniFailure::Java(message) => DetectionError::new(message),
        JniFailure::Jni(jni::errors::Error::JavaException) => {
            match pending_exception_message(env) {
                Some(message) => DetectionError::new(message),
                None => DetectionError::new(format!("{context}: Java exception")),
            }
        }
        JniFailure::Jni(e) => DetectionError::new(format!("{context}: {e}")),
    }
}

fn pending_exception_message(env: &mut JNIEnv) -> Option<String> {
    let throwable = env.exception_occurred().ok()?;
    env.exception_clear().ok()?;
    if throwable.is_null() {
        return None;
    }

    let cause = env
        .call_method(&throwable, "getCause", "()Ljava/lang/Throwable;", &[])
        .and_then(|v| v.l())
        .ok()
        .filter(|c| !c.is_null());
    let source: JObject = match cause {
        Some(cause) => cause,
        None => throwable.into(),
    };

    let message = env
        .call_method(&source, "getLocalizedMessage", "()Ljava/lang/String;", &[])
        .and_then(|v| v.l())
        .ok()?;
    if message.is_null() {
        return None;
    }
    env.get_string(&message.into()).ok().map(String::from)
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// ML Kit object detector, one client per configuration.
pub struct MlKitBackend {
    vm: Arc<JavaVM>,
    detector: GlobalRef,
    options: DetectorOptions,
}

impl MlKitBackend {
    /// Build the ML Kit client for `options`.
    ///
    /// Equivalent to
    /// `ObjectDetection.getClient(ObjectDetectorOptions.Builder()...build())`.
    pub fn new(options: DetectorOptions) -> Result<Self, DetectionError> {
        let vm = java_vm()?;
        let detector = {
            let mut env = vm
                .attach_current_thread()
                .map_err(|e| DetectionError::new(format!("failed to attach JNI thread: {e}")))?;
            let built = env.with_local_frame(LOCAL_FRAME_CAPACITY, |env| -> JniResult<GlobalRef> {
                let client = build_client(env, &options)?;
                Ok(env.new_global_ref(client)?)
            });
            built.map_err(|f| to_detection_error(&mut env, "ObjectDetection.getClient", f))?
        };

        tracing::info!(mode = ?options.mode, "Android: ML Kit object detector created");
        Ok(Self {
            vm: Arc::new(vm),
            detector,
            options,
        })
    }
}

fn build_client<'local>(
    env: &mut JNIEnv<'local>,
    options: &DetectorOptions,
) -> JniResult<JObject<'local>> {
    let builder = env.new_object(OPTIONS_BUILDER, "()V", &[])?;

    let mode = match options.mode {
        DetectorMode::Stream => STREAM_MODE,
        DetectorMode::SingleImage => SINGLE_IMAGE_MODE,
    };
    env.call_method(
        &builder,
        "setDetectorMode",
        "(I)Lcom/google/mlkit/vision/objects/defaults/ObjectDetectorOptions$Builder;",
        &[JValue::Int(mode)],
    )?;
    if options.multiple_objects {
        env.call_method(&builder, "enableMultipleObjects", SIG_BUILDER_SELF, &[])?;
    }
    if options.classification {
        env.call_method(&builder, "enableClassification", SIG_BUILDER_SELF, &[])?;
    }

    let built = env
        .call_method(
            &builder,
            "build",
            "()Lcom/google/mlkit/vision/objects/defaults/ObjectDetectorOptions;",
            &[],
        )?
        .l()?;

    let client = env
        .call_static_method(
            "com/google/mlkit/vision/objects/ObjectDetection",
            "getClient",
            "(Lcom/google/mlkit/vision/objects/ObjectDetectorOptionsBase;)Lcom/google/mlkit/vision/objects/ObjectDetector;",
            &[JValue::Object(&built)],
        )?
        .l()?;
    Ok(client)
}

/// Owned copy of what the blocking JNI thread needs from a frame.
struct FrameInput {
    bytes: Vec<u8>,
    width: i32,
    height: i32,
    rotation: i32,
    format: PixelFormat,
}

impl FrameInput {
    fn from_frame(frame: &ValidatedFrame) -> Self {
        let bytes = match frame.format() {
            PixelFormat::Nv21 => frame.to_full_nv21().into_owned(),
            // android.graphics.Bitmap ARGB_8888 is laid out R, G, B, A.
            PixelFormat::Rgba8888 => frame.pixel_data().to_vec(),
            PixelFormat::Bgra8888 => {
                let mut swapped = frame.pixel_data().to_vec();
                for px in swapped.chunks_exact_mut(4) {
                    px.swap(0, 2);
                }
                swapped
            }
        };
        Self {
            bytes,
            width: frame.width() as i32,
            height: frame.height() as i32,
            rotation: frame.rotation().degrees(),
            format: frame.format(),
        }
    }
}

fn input_image<'local>(env: &mut JNIEnv<'local>, input: &FrameInput) -> JniResult<JObject<'local>> {
    let array = env.byte_array_from_slice(&input.bytes)?;

    if input.format == PixelFormat::Nv21 {
        let image = env
            .call_static_method(
                INPUT_IMAGE,
                "fromByteArray",
                "([BIIII)Lcom/google/mlkit/vision/common/InputImage;",
                &[
                    JValue::Object(&array),
                    JValue::Int(input.width),
                    JValue::Int(input.height),
                    JValue::Int(input.rotation),
                    JValue::Int(IMAGE_FORMAT_NV21),
                ],
            )?
            .l()?;
        return Ok(image);
    }

    let config = env
        .get_static_field(
            "android/graphics/Bitmap$Config",
            "ARGB_8888",
            "Landroid/graphics/Bitmap$Config;",
        )?
        .l()?;
    let bitmap = env
        .call_static_method(
            "android/graphics/Bitmap",
            "createBitmap",
            "(IILandroid/graphics/Bitmap$Config;)Landroid/graphics/Bitmap;",
            &[
                JValue::Int(input.width),
                JValue::Int(input.height),
                JValue::Object(&config),
            ],
        )?
        .l()?;
    let buffer = env
        .call_static_method(
            "java/nio/ByteBuffer",
            "wrap",
            "([B)Ljava/nio/ByteBuffer;",
            &[JValue::Object(&array)],
        )?
        .l()?;
    env.call_method(
        &bitmap,
        "copyPixelsFromBuffer",
        "(Ljava/nio/Buffer;)V",
        &[JValue::Object(&buffer)],
    )?;

    let image = env
        .call_static_method(
            INPUT_IMAGE,
            "fromBitmap",
            "(Landroid/graphics/Bitmap;I)Lcom/google/mlkit/vision/common/InputImage;",
            &[JValue::Object(&bitmap), JValue::Int(input.rotation)],
        )?
        .l()?;
    Ok(image)
}

/// `detector.process(image)` then `Tasks.await(task)`; returns the result list.
fn process<'local>(
    env: &mut JNIEnv<'local>,
    detector: &GlobalRef,
    image: &JObject<'local>,
) -> JniResult<JObject<'local>> {
    let task = env
        .call_method(
            detector,
            "process",
            "(Lcom/google/mlkit/vision/common/InputImage;)Lcom/google/android/gms/tasks/Task;",
            &[JValue::Object(image)],
        )?
        .l()?;
    let list = env
        .call_static_method(
            "com/google/android/gms/tasks/Tasks",
            "await",
            "(Lcom/google/android/gms/tasks/Task;)Ljava/lang/Object;",
            &[JValue::Object(&task)],
        )?
        .l()?;
    if list.is_null() {
        return Err(JniFailure::Java("ML Kit returned no result list".into()));
    }
    Ok(list)
}

/// Read `List<DetectedObject>` into our model, keeping ML Kit's order.
fn read_objects(env: &mut JNIEnv, list: &JObject) -> JniResult<Vec<DetectedObject>> {
    let count = env.call_method(list, "size", "()I", &[])?.i()?;
    let mut objects = Vec::with_capacity(count.max(0) as usize);

    for i in 0..count {
        let item = env
            .call_method(list, "get", "(I)Ljava/lang/Object;", &[JValue::Int(i)])?
            .l()?;

        let labels = env
            .call_method(&item, "getLabels", "()Ljava/util/List;", &[])?
            .l()?;
        let label_count = env.call_method(&labels, "size", "()I", &[])?.i()?;

        let mut object = if label_count > 0 {
            let first = env
                .call_method(&labels, "get", "(I)Ljava/lang/Object;", &[JValue::Int(0)])?
                .l()?;
            let text = env
                .call_method(&first, "getText", "()Ljava/lang/String;", &[])?
                .l()?;
            let text: String = env.get_string(&text.into())?.into();
            let confidence = env.call_method(&first, "getConfidence", "()F", &[])?.f()?;
            DetectedObject::new(Some(&text)).with_confidence(confidence)
        } else {
            DetectedObject::unknown()
        };

        let rect = env
            .call_method(&item, "getBoundingBox", "()Landroid/graphics/Rect;", &[])?
            .l()?;
        if !rect.is_null() {
            object = object.with_bounding_box(BoundingBox {
                left: env.get_field(&rect, "left", "I")?.i()?,
                top: env.get_field(&rect, "top", "I")?.i()?,
                right: env.get_field(&rect, "right", "I")?.i()?,
                bottom: env.get_field(&rect, "bottom", "I")?.i()?,
            });
        }

        let tracking = env
            .call_method(&item, "getTrackingId", "()Ljava/lang/Integer;", &[])?
            .l()?;
        if !tracking.is_null() {
            let id = env.call_method(&tracking, "intValue", "()I", &[])?.i()?;
            object = object.with_tracking_id(id);
        }

        objects.push(object);
    }
    Ok(objects)
}

fn detect_blocking(
    vm: &JavaVM,
    detector: &GlobalRef,
    input: &FrameInput,
) -> Result<Vec<DetectedObject>, DetectionError> {
    let mut env = vm
        .attach_current_thread()
        .map_err(|e| DetectionError::new(format!("failed to attach JNI thread: {e}")))?;

    let result = env.with_local_frame(LOCAL_FRAME_CAPACITY, |env| -> JniResult<Vec<DetectedObject>> {
        let image = input_image(env, input)?;
        let list = process(env, detector, &image)?;
        read_objects(env, &list)
    });
    result.map_err(|f| to_detection_error(&mut env, "ObjectDetector.process", f))
}

#[async_trait]
impl DetectorBackend for MlKitBackend {
    fn name(&self) -> &str {
        "ML Kit (Android)"
    }

    fn options(&self) -> &DetectorOptions {
        &self.options
    }

    async fn detect(&self, frame: &ValidatedFrame) -> Result<Vec<DetectedObject>, DetectionError> {
        let input = FrameInput::from_frame(frame);
        let vm = Arc::clone(&self.vm);
        let detector = self.detector.clone();

        tracing::debug!(
            width = input.width,
            height = input.height,
            rotation = input.rotation,
            bytes = input.bytes.len(),
            "Android: running ML Kit object detection"
        );

        run_blocking(move || detect_blocking(&vm, &detector, &input)).await
    }
}

impl Drop for MlKitBackend {
    fn drop(&mut self) {
        // Release the native model held by the ML Kit client.
        if let Ok(mut env) = self.vm.attach_current_thread() {
            if env.call_method(&self.detector, "close", "()V", &[]).is_err() {
                let _ = env.exception_clear();
                tracing::warn!("Android: ObjectDetector.close failed");
            }
        }
    }
}
