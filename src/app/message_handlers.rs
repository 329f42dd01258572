// Routes each message category to its handler. Handlers never block on
// network or inference work; they spawn it and the result comes back as
// another message.

use std::path::{Path, PathBuf};
use std::sync::Arc;

#[allow(unused_imports)]
use log::{debug, info, warn, error};

use crate::app::{App, Message};
use crate::download::{DownloadProgress, ModelDownloader};
use crate::file_io::{self, CurrentImage};
use crate::inference::{self, TransformEvent, TransformListener, TransformOutput, TransformStage};
use crate::logging;

/// Main entry point for handling all messages
pub fn handle_message(app: &mut App, message: Message) {
    match message {
        Message::Quit => {
            debug!("Quit requested");
            app.should_exit = true;
        }

        Message::OpenFile(_) | Message::FileOpened(_) | Message::ImageLoaded(_) |
        Message::SaveImage(_) => handle_file_messages(app, message),

        Message::FetchModel | Message::DownloadProgress(_) | Message::ModelDownloaded(_) => {
            handle_download_messages(app, message)
        }

        Message::Predict | Message::CancelTransform | Message::Transform(_) => {
            handle_transform_messages(app, message)
        }

        Message::ShowStatus | Message::ExportDebugLogs => handle_ui_messages(app, message),
    }
}

pub fn handle_file_messages(app: &mut App, message: Message) {
    match message {
        Message::OpenFile(Some(path)) => load_image(app, path),
        Message::OpenFile(None) => {
            let sender = app.sender.clone();
            tokio::spawn(async move {
                let _ = sender.send(Message::FileOpened(file_io::pick_file().await));
            });
        }
        Message::FileOpened(result) => match result {
            Ok(path) => load_image(app, path),
            Err(err) => {
                // Nothing picked: the current image stays as it was
                app.notify_error(err.to_string());
                app.fail();
            }
        },
        Message::ImageLoaded(result) => match result {
            Ok(current) => {
                let (w, h) = current.dimensions();
                let name = file_io::get_filename(&current.source)
                    .unwrap_or_else(|| current.source.display().to_string());
                app.notify(format!("Loaded {} ({}x{})", name, w, h));
                app.current = Some(current);
                app.advance();
            }
            Err(err) => {
                error!("Image load failed: {:?}", err);
                app.notify_error(err.to_string());
                app.fail();
            }
        },
        Message::SaveImage(path) => {
            if save_current(app, &path) {
                app.advance();
            } else {
                app.fail();
            }
        }
        _ => {}
    }
}

fn load_image(app: &mut App, path: PathBuf) {
    if !file_io::has_supported_extension(&path) {
        debug!("{} has an unusual extension, letting the decoder decide", path.display());
    }
    let sender = app.sender.clone();
    tokio::spawn(async move {
        let _ = sender.send(Message::ImageLoaded(file_io::acquire_image(path).await));
    });
}

fn save_current(app: &mut App, path: &Path) -> bool {
    let Some(current) = &app.current else {
        app.notify_error("No image to save");
        return false;
    };
    match current.image.save(path) {
        Ok(()) => {
            app.notify(format!("Saved image to {}", path.display()));
            true
        }
        Err(e) => {
            app.notify_error(format!("Failed to save image: {}", e));
            false
        }
    }
}

pub fn handle_download_messages(app: &mut App, message: Message) {
    match message {
        Message::FetchModel => {
            if app.downloading {
                app.notify_error("A download is already running");
                return;
            }
            app.downloading = true;
            app.notify("Starting model download...");
            spawn_download(app);
        }
        Message::DownloadProgress(progress) => match progress.percent() {
            Some(percent) => app.notify(format!("Downloading model: {}%", percent)),
            None => debug!("Downloaded {} bytes", progress.received),
        },
        Message::ModelDownloaded(result) => {
            app.downloading = false;
            match result {
                Ok(path) => {
                    debug!("Model stored at {}", path.display());
                    app.notify("Model downloaded successfully!");
                    app.advance();
                }
                Err(err) => {
                    error!("Model download failed: {:?}", err);
                    app.notify_error(err.to_string());
                    app.fail();
                }
            }
        }
        _ => {}
    }
}

fn spawn_download(app: &App) {
    let sender = app.sender.clone();
    let config = app.config.clone();

    tokio::spawn(async move {
        let progress_sender = sender.clone();
        let mut on_progress = move |progress: DownloadProgress| {
            let _ = progress_sender.send(Message::DownloadProgress(progress));
        };

        let result = match ModelDownloader::new(&config.api_base_url, &config.api_key, config.http_timeout) {
            Ok(downloader) => {
                downloader
                    .download_model(&config.model_id, &config.model_dir, &config.model_filename, &mut on_progress)
                    .await
            }
            Err(e) => Err(e),
        };
        let _ = sender.send(Message::ModelDownloaded(result));
    });
}

pub fn handle_transform_messages(app: &mut App, message: Message) {
    match message {
        Message::Predict => start_transform(app),
        Message::CancelTransform => match app.transform.as_mut() {
            Some(handle) => {
                if handle.cancel() {
                    debug!("Cancellation requested");
                }
            }
            None => app.notify_error("No transform is running"),
        },
        Message::Transform(TransformEvent::Stage(stage)) => match stage {
            TransformStage::Running => app.notify("Running style transfer..."),
            other => debug!("Transform stage: {:?}", other),
        },
        Message::Transform(TransformEvent::Finished(result)) => {
            app.transform = None;
            match result {
                Ok(output) => {
                    if present(app, output) {
                        app.advance();
                    } else {
                        app.fail();
                    }
                }
                Err(err) => {
                    // The current image is only ever replaced on success
                    app.notify_error(err.to_string());
                    app.fail();
                }
            }
        }
        _ => {}
    }
}

fn start_transform(app: &mut App) {
    if app.is_transforming() {
        app.notify_error("A transform is already running");
        return;
    }

    let model_path = app.config.model_path();
    let image = match inference::check_preconditions(app.current.as_ref().map(|c| &c.image), &model_path) {
        Ok(Some(image)) => image.clone(),
        Ok(None) => {
            app.advance();
            return;
        }
        Err(err) => {
            app.notify_error(err.to_string());
            app.fail();
            return;
        }
    };

    let backend = match app.backend() {
        Ok(backend) => backend,
        Err(err) => {
            error!("Inference backend unavailable: {:?}", err);
            app.notify_error(err.to_string());
            app.fail();
            return;
        }
    };

    let sender = app.sender.clone();
    let listener: TransformListener = Arc::new(move |event: TransformEvent| {
        let _ = sender.send(Message::Transform(event));
    });
    let handle = inference::spawn_transform(
        backend,
        image,
        model_path,
        app.config.inference_timeout,
        listener,
    );
    app.transform = Some(handle);
}

/// Replaces the current image with the transform result, then saves and
/// opens it if asked to.
fn present(app: &mut App, output: TransformOutput) -> bool {
    let TransformOutput { path, image } = output;
    app.notify(format!("Displaying {}x{} image from {}", image.width(), image.height(), path.display()));
    app.current = Some(CurrentImage { image, source: path.clone() });

    let mut shown = path;
    if let Some(target) = app.present.output.clone() {
        if !save_current(app, &target) {
            return false;
        }
        shown = target;
    }
    if app.present.open {
        file_io::open_in_default_viewer(&shown);
    }
    true
}

pub fn handle_ui_messages(app: &mut App, message: Message) {
    match message {
        Message::ShowStatus => {
            for line in app.status_lines() {
                app.notify(line);
            }
        }
        Message::ExportDebugLogs => {
            let Some(buffer) = app.log_buffer.clone() else {
                app.notify_error("Log capture is not active");
                return;
            };
            match logging::export_debug_logs(&buffer) {
                Ok(path) => app.notify(format!("Exported debug log to {}", path.display())),
                Err(e) => app.notify_error(format!("Failed to export debug log: {}", e)),
            }
        }
        _ => {}
    }
}
