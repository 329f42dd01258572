use std::path::PathBuf;

use crate::download::{DownloadError, DownloadProgress};
use crate::file_io::{self, AcquireError, CurrentImage};
use crate::inference::TransformEvent;

#[derive(Debug)]
pub enum Message {
    /// `None` opens the file dialog.
    OpenFile(Option<PathBuf>),
    FileOpened(Result<PathBuf, file_io::Error>),
    ImageLoaded(Result<CurrentImage, AcquireError>),
    FetchModel,
    DownloadProgress(DownloadProgress),
    ModelDownloaded(Result<PathBuf, DownloadError>),
    Predict,
    CancelTransform,
    Transform(TransformEvent),
    SaveImage(PathBuf),
    ShowStatus,
    ExportDebugLogs,
    Quit,
}
