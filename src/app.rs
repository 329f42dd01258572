mod message;
mod message_handlers;

pub use message::Message;
pub use message_handlers::handle_message;

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

#[allow(unused_imports)]
use log::{debug, info, warn, error};

use crate::config::Config;
use crate::file_io::CurrentImage;
use crate::inference::{InferenceBackend, InferenceError, NativeLibrary, TransformHandle};
use crate::logging::LogBuffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Info,
    Error,
}

/// A short user-facing message, the terminal stand-in for a toast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub text: String,
    pub kind: NoticeKind,
}

/// What to do with a successfully transformed image besides replacing the
/// current one.
#[derive(Debug, Clone, Default)]
pub struct PresentOptions {
    pub output: Option<PathBuf>,
    pub open: bool,
}

/// Owns all application state. Only `handle_message` mutates it; background
/// work reports back through `sender`.
pub struct App {
    pub(crate) config: Config,
    pub(crate) sender: UnboundedSender<Message>,
    pub(crate) backend: Option<Arc<dyn InferenceBackend>>,
    pub(crate) current: Option<CurrentImage>,
    pub(crate) transform: Option<TransformHandle>,
    pub(crate) downloading: bool,
    pub(crate) log_buffer: Option<LogBuffer>,
    pub(crate) present: PresentOptions,
    notices: VecDeque<Notice>,

    // One-shot mode: each step is dispatched once the previous one succeeded
    steps: VecDeque<Message>,
    batch: bool,
    failed: bool,
    pub(crate) should_exit: bool,
}

impl App {
    pub fn new(config: &Config, sender: UnboundedSender<Message>) -> Self {
        Self {
            config: config.clone(),
            sender,
            backend: None,
            current: None,
            transform: None,
            downloading: false,
            log_buffer: None,
            present: PresentOptions::default(),
            notices: VecDeque::new(),
            steps: VecDeque::new(),
            batch: false,
            failed: false,
            should_exit: false,
        }
    }

    /// Use `backend` instead of loading the configured native library.
    pub fn with_backend(mut self, backend: Arc<dyn InferenceBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_log_buffer(mut self, log_buffer: LogBuffer) -> Self {
        self.log_buffer = Some(log_buffer);
        self
    }

    pub fn with_presentation(mut self, present: PresentOptions) -> Self {
        self.present = present;
        self
    }

    /// Run `steps` in order and exit after the last one, or at the first failure.
    pub fn with_steps(mut self, steps: Vec<Message>) -> Self {
        self.steps = steps.into();
        self.batch = true;
        self
    }

    pub fn current_image(&self) -> Option<&CurrentImage> {
        self.current.as_ref()
    }

    pub fn is_transforming(&self) -> bool {
        self.transform.is_some()
    }

    pub(crate) fn notify(&mut self, text: impl Into<String>) {
        let text = text.into();
        info!("{}", text);
        self.notices.push_back(Notice { text, kind: NoticeKind::Info });
    }

    pub(crate) fn notify_error(&mut self, text: impl Into<String>) {
        let text = text.into();
        warn!("{}", text);
        self.notices.push_back(Notice { text, kind: NoticeKind::Error });
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        self.notices.drain(..).collect()
    }

    /// Dispatches the next one-shot step; exits when none are left.
    pub(crate) fn advance(&mut self) {
        if !self.batch {
            return;
        }
        match self.steps.pop_front() {
            Some(step) => {
                debug!("Next step: {:?}", step);
                let _ = self.sender.send(step);
            }
            None => self.should_exit = true,
        }
    }

    /// A failed action ends one-shot mode; the shell keeps going.
    pub(crate) fn fail(&mut self) {
        if self.batch {
            self.steps.clear();
            self.failed = true;
            self.should_exit = true;
        }
    }

    /// The native backend, loaded on first use.
    pub(crate) fn backend(&mut self) -> Result<Arc<dyn InferenceBackend>, InferenceError> {
        if let Some(backend) = &self.backend {
            return Ok(Arc::clone(backend));
        }
        let path = self.config.native_library.as_deref().ok_or(InferenceError::NoLibrary)?;
        let library: Arc<dyn InferenceBackend> =
            Arc::new(NativeLibrary::load(path, &self.config.native_symbol)?);
        self.backend = Some(Arc::clone(&library));
        Ok(library)
    }

    pub fn status_lines(&self) -> Vec<String> {
        let image = match self.current_image() {
            Some(current) => {
                let (w, h) = current.dimensions();
                format!("Image: {} ({}x{})", current.source.display(), w, h)
            }
            None => "Image: none".to_string(),
        };
        let model_path = self.config.model_path();
        let model = format!(
            "Model: {} ({})",
            model_path.display(),
            if model_path.is_file() { "present" } else { "missing" }
        );
        let library = match &self.config.native_library {
            Some(path) => format!("Inference library: {}", path.display()),
            None => "Inference library: not configured".to_string(),
        };
        vec![
            image,
            model,
            library,
            format!("Download: {}", if self.downloading { "running" } else { "idle" }),
            format!("Transform: {}", if self.is_transforming() { "running" } else { "idle" }),
        ]
    }

    fn flush_notices(&mut self) {
        for notice in self.take_notices() {
            match notice.kind {
                NoticeKind::Info => println!("{}", notice.text),
                NoticeKind::Error => eprintln!("{}", notice.text),
            }
        }
    }

    /// Processes messages until quit. Returns false if a one-shot step failed.
    pub async fn run(mut self, mut receiver: UnboundedReceiver<Message>) -> bool {
        self.advance();
        self.flush_notices();

        while !self.should_exit {
            let Some(message) = receiver.recv().await else {
                break;
            };
            handle_message(&mut self, message);
            self.flush_notices();
        }

        if let Some(mut transform) = self.transform.take() {
            transform.cancel();
        }
        !self.failed
    }
}
