// ============================================================================
// INFERENCE: hand the current image to the native style-transfer library
// ============================================================================
//
// The library is loaded with `libloading` at runtime so the binary has no
// link-time dependency on it. It must export (name configurable):
//
//   int32_t photostyler_transform(const uint8_t *pixels, size_t pixels_len,
//                                 const char *model_path,
//                                 int32_t height, int32_t width,
//                                 char *out, size_t out_len);
//
// `pixels` is tightly packed RGBA8, row-major, `width * height * 4` bytes.
// Return 0 and write the NUL-terminated result image path into `out` on
// success; return 1 if the model could not be loaded; any other value is an
// inference failure with a message in `out`.

use std::ffi::{c_char, CString};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use image::DynamicImage;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::Instant;

#[allow(unused_imports)]
use log::{debug, info, warn, error};

/// What older builds of the native library return instead of a path when
/// the model cannot be loaded.
pub const LEGACY_LOAD_FAILURE: &str = "Failed to load model";

const STATUS_OK: i32 = 0;
const STATUS_MODEL_LOAD_FAILED: i32 = 1;
const OUTPUT_CAPACITY: usize = 4096;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum InferenceError {
    #[error("Model not found")]
    ModelNotFound(PathBuf),
    #[error("No native inference library configured")]
    NoLibrary,
    #[error("Failed to load inference library: {0}")]
    Library(String),
    #[error("Failed to load model")]
    ModelLoad(String),
    #[error("Inference failed: {0}")]
    Failed(String),
    #[error("Image is too large for the inference library ({0}x{1})")]
    ImageTooLarge(u32, u32),
    #[error("Failed to read transformed image: {0}")]
    Output(String),
    #[error("Transform cancelled")]
    Cancelled,
    #[error("Transform timed out after {0:?}")]
    TimedOut(Duration),
}

/// Contiguous RGBA8 copy of an image, owned on the heap so its address is
/// stable for the whole foreign call.
#[derive(Debug, Clone)]
pub struct PixelBuffer {
    data: Box<[u8]>,
    width: u32,
    height: u32,
}

impl PixelBuffer {
    pub fn from_image(image: &DynamicImage) -> Self {
        let rgba = image.to_rgba8();
        let (width, height) = rgba.dimensions();
        Self {
            data: rgba.into_raw().into_boxed_slice(),
            width,
            height,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

pub struct TransformRequest {
    pub pixels: PixelBuffer,
    pub model_path: PathBuf,
}

/// Anything that can turn a request into a result image on disk.
pub trait InferenceBackend: Send + Sync {
    fn transform(&self, request: &TransformRequest) -> Result<PathBuf, InferenceError>;
}

type TransformFn = unsafe extern "C" fn(
    pixels: *const u8,
    pixels_len: usize,
    model_path: *const c_char,
    height: i32,
    width: i32,
    out: *mut c_char,
    out_len: usize,
) -> i32;

pub struct NativeLibrary {
    library: libloading::Library,
    symbol: CString,
}

impl NativeLibrary {
    /// Loads the library and checks that the entry point exists.
    pub fn load(path: &Path, symbol: &str) -> Result<Self, InferenceError> {
        if !path.exists() {
            return Err(InferenceError::Library(format!("{} does not exist", path.display())));
        }
        let symbol = CString::new(symbol)
            .map_err(|_| InferenceError::Library("entry point name contains a NUL byte".to_string()))?;

        // SAFETY: loading runs the library's initialisers; the library is
        // user-configured and trusted to the same degree as this binary.
        let library = unsafe { libloading::Library::new(path) }
            .map_err(|e| InferenceError::Library(e.to_string()))?;

        // SAFETY: only resolves the address, nothing is called yet
        unsafe { library.get::<TransformFn>(symbol.as_bytes_with_nul()) }
            .map_err(|e| InferenceError::Library(e.to_string()))?;

        info!("Loaded inference library {}", path.display());
        Ok(Self { library, symbol })
    }
}

impl InferenceBackend for NativeLibrary {
    fn transform(&self, request: &TransformRequest) -> Result<PathBuf, InferenceError> {
        let pixels = &request.pixels;
        let too_large = || InferenceError::ImageTooLarge(pixels.width(), pixels.height());
        let height = i32::try_from(pixels.height()).map_err(|_| too_large())?;
        let width = i32::try_from(pixels.width()).map_err(|_| too_large())?;

        let model_path = request
            .model_path
            .to_str()
            .and_then(|p| CString::new(p).ok())
            .ok_or_else(|| InferenceError::Failed(format!(
                "model path {} is not valid UTF-8",
                request.model_path.display()
            )))?;

        // SAFETY: the signature is the documented entry point contract
        let func = unsafe { self.library.get::<TransformFn>(self.symbol.as_bytes_with_nul()) }
            .map_err(|e| InferenceError::Library(e.to_string()))?;

        let mut out = vec![0u8; OUTPUT_CAPACITY];
        let start = Instant::now();
        // SAFETY: every pointer is valid for the lengths passed alongside it
        // and outlives the call; the callee only writes within `out`.
        let status = unsafe {
            func(
                pixels.bytes().as_ptr(),
                pixels.bytes().len(),
                model_path.as_ptr(),
                height,
                width,
                out.as_mut_ptr().cast::<c_char>(),
                out.len(),
            )
        };
        debug!("Native transform returned {} after {:?}", status, start.elapsed());

        interpret_status(status, read_c_buffer(&out))
    }
}

/// Text up to the first NUL (or the whole buffer if the callee forgot it).
fn read_c_buffer(buf: &[u8]) -> String {
    let end = buf.iter().position(|b| *b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

fn interpret_status(status: i32, message: String) -> Result<PathBuf, InferenceError> {
    match status {
        STATUS_OK if message == LEGACY_LOAD_FAILURE => Err(InferenceError::ModelLoad(message)),
        STATUS_OK if message.trim().is_empty() => {
            Err(InferenceError::Failed("library returned no output path".to_string()))
        }
        STATUS_OK => Ok(PathBuf::from(message)),
        STATUS_MODEL_LOAD_FAILED => Err(InferenceError::ModelLoad(message)),
        other if message.is_empty() => Err(InferenceError::Failed(format!("status {}", other))),
        _ => Err(InferenceError::Failed(message)),
    }
}

/// Checks the two preconditions of a transform.
///
/// `Ok(None)` means there is nothing to transform and the request is a
/// no-op; a missing model file is an error and the backend is never touched.
pub fn check_preconditions<'a>(
    image: Option<&'a DynamicImage>,
    model_path: &Path,
) -> Result<Option<&'a DynamicImage>, InferenceError> {
    let Some(image) = image else {
        debug!("Transform requested without an image, ignoring");
        return Ok(None);
    };
    if !model_path.is_file() {
        warn!("Model not found at {}", model_path.display());
        return Err(InferenceError::ModelNotFound(model_path.to_path_buf()));
    }
    Ok(Some(image))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformStage {
    Preparing,
    Running,
    Decoding,
}

#[derive(Debug, Clone)]
pub struct TransformOutput {
    pub path: PathBuf,
    pub image: DynamicImage,
}

#[derive(Debug, Clone)]
pub enum TransformEvent {
    Stage(TransformStage),
    Finished(Result<TransformOutput, InferenceError>),
}

pub type TransformListener = Arc<dyn Fn(TransformEvent) + Send + Sync>;

/// A running transform. Dropping the handle cancels it.
pub struct TransformHandle {
    cancel: Option<oneshot::Sender<()>>,
}

impl TransformHandle {
    /// Returns false if the transform already finished or was cancelled.
    pub fn cancel(&mut self) -> bool {
        match self.cancel.take() {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }
}

/// Runs a transform on the blocking pool and reports through `listener`.
///
/// Exactly one `Finished` event is delivered. After cancellation or timeout
/// the native call keeps running to completion on its thread, but its result
/// is discarded.
pub fn spawn_transform(
    backend: Arc<dyn InferenceBackend>,
    image: DynamicImage,
    model_path: PathBuf,
    timeout: Option<Duration>,
    listener: TransformListener,
) -> TransformHandle {
    let (cancel_tx, cancel_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        listener(TransformEvent::Stage(TransformStage::Preparing));

        let job_listener = Arc::clone(&listener);
        let job = tokio::task::spawn_blocking(move || -> Result<TransformOutput, InferenceError> {
            let request = TransformRequest {
                pixels: PixelBuffer::from_image(&image),
                model_path,
            };
            drop(image);

            job_listener(TransformEvent::Stage(TransformStage::Running));
            let path = backend.transform(&request)?;

            job_listener(TransformEvent::Stage(TransformStage::Decoding));
            let image = image::open(&path).map_err(|e| InferenceError::Output(e.to_string()))?;
            Ok(TransformOutput { path, image })
        });

        let outcome = tokio::select! {
            joined = job => joined.unwrap_or_else(|e| {
                error!("Transform task failed: {}", e);
                Err(InferenceError::Failed(e.to_string()))
            }),
            _ = cancel_rx => {
                info!("Transform cancelled");
                Err(InferenceError::Cancelled)
            }
            elapsed = deadline(timeout) => {
                warn!("Transform timed out after {:?}", elapsed);
                Err(InferenceError::TimedOut(elapsed))
            }
        };

        listener(TransformEvent::Finished(outcome));
    });

    TransformHandle { cancel: Some(cancel_tx) }
}

async fn deadline(timeout: Option<Duration>) -> Duration {
    match timeout {
        Some(duration) => {
            tokio::time::sleep(duration).await;
            duration
        }
        None => std::future::pending().await,
    }
}
