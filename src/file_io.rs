use std::path::{Path, PathBuf};
use std::process::Command;

use image::DynamicImage;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::time::Instant;

#[allow(unused_imports)]
use log::{Level, debug, info, warn, error};

use crate::exif_utils::decode_with_exif_orientation;

pub const SUPPORTED_EXTENSIONS: [&str; 7] = ["jpg", "jpeg", "png", "webp", "bmp", "tif", "tiff"];

#[derive(Debug, Clone, Error, PartialEq)]
pub enum Error {
    #[error("No image selected")]
    DialogClosed,
    #[error("Unsupported image type: {0}")]
    InvalidExtension(String),
}

/// Ways loading a picked image can fail.
#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("Failed to load image: {0}")]
    Read(#[from] std::io::Error),
    #[error("Failed to load image: {0}")]
    Decode(#[from] image::ImageError),
}

/// The image currently on screen, already turned upright.
#[derive(Debug, Clone)]
pub struct CurrentImage {
    pub image: DynamicImage,
    pub source: PathBuf,
}

impl CurrentImage {
    pub fn dimensions(&self) -> (u32, u32) {
        (self.image.width(), self.image.height())
    }
}

pub fn get_filename(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|os_str| os_str.to_str())
        .map(|s| s.to_string())
}

pub fn has_supported_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

pub async fn load_image_bytes(path: &Path) -> Result<Vec<u8>, std::io::Error> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut buffer = Vec::new();
    file.read_to_end(&mut buffer).await?;
    Ok(buffer)
}

/// Reads `path`, decodes it and applies its EXIF orientation.
pub async fn acquire_image(path: PathBuf) -> Result<CurrentImage, AcquireError> {
    let start = Instant::now();
    let bytes = load_image_bytes(&path).await?;

    // Decoding a 12MP JPEG takes long enough to keep it off the async workers
    let image = tokio::task::spawn_blocking(move || decode_with_exif_orientation(&bytes))
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))??;

    debug!(
        "Loaded {} ({}x{}) in {:?}",
        path.display(),
        image.width(),
        image.height(),
        start.elapsed()
    );
    Ok(CurrentImage { image, source: path })
}

pub async fn pick_file() -> Result<PathBuf, Error> {
    let handle = rfd::AsyncFileDialog::new()
        .set_title("Open Photo")
        .add_filter("Images", &SUPPORTED_EXTENSIONS)
        .pick_file()
        .await;

    match handle {
        Some(file_info) => {
            let path = file_info.path().to_path_buf();
            if has_supported_extension(&path) {
                Ok(path)
            } else {
                Err(Error::InvalidExtension(path.display().to_string()))
            }
        }
        None => Err(Error::DialogClosed),
    }
}

/// Opens `path` with the platform's default application.
pub fn open_in_default_viewer(path: &Path) {
    let program = if cfg!(target_os = "windows") {
        "explorer"
    } else if cfg!(target_os = "macos") {
        "open"
    } else if cfg!(target_os = "linux") {
        "xdg-open"
    } else {
        error!("Opening files is not supported on this OS.");
        return;
    };

    if let Err(e) = Command::new(program).arg(path).spawn() {
        warn!("Failed to open {} with {}: {}", path.display(), program, e);
    }
}
