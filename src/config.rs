use std::path::PathBuf;
use std::time::Duration;

use once_cell::sync::OnceCell;

use crate::settings::UserSettings;

// Default values for configuration
// These are the fallbacks for keys missing from settings.yaml
pub const DEFAULT_API_BASE_URL: &str = "https://stage-api.baseweight.ai/api/models";
pub const DEFAULT_MODEL_FILENAME: &str = "downloaded_model.ort";
pub const DEFAULT_NATIVE_SYMBOL: &str = "photostyler_transform";
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_INFERENCE_TIMEOUT_SECS: u64 = 0;

/// Resolved runtime configuration, built once from the user settings.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_base_url: String,
    pub api_key: String,
    pub model_id: String,
    pub model_filename: String,
    pub model_dir: PathBuf,                 // Destination directory for downloads
    pub native_library: Option<PathBuf>,
    pub native_symbol: String,
    pub http_timeout: Duration,             // Applied to both connect and read
    pub inference_timeout: Option<Duration>,
}

impl Config {
    pub fn from_settings(settings: &UserSettings) -> Self {
        Self {
            api_base_url: settings.api_base_url.clone(),
            api_key: settings.api_key.clone(),
            model_id: settings.model_id.clone(),
            model_filename: settings.model_filename.clone(),
            model_dir: settings.model_dir(),
            native_library: settings.native_library_path(),
            native_symbol: settings.native_symbol.clone(),
            http_timeout: Duration::from_secs(settings.http_timeout_secs.max(1)),
            inference_timeout: (settings.inference_timeout_secs > 0)
                .then(|| Duration::from_secs(settings.inference_timeout_secs)),
        }
    }

    pub fn model_path(&self) -> PathBuf {
        self.model_dir.join(&self.model_filename)
    }
}

static CONFIG: OnceCell<Config> = OnceCell::new();

/// Installs the process-wide configuration; the first call wins.
pub fn init(settings: &UserSettings) {
    if CONFIG.set(Config::from_settings(settings)).is_err() {
        log::warn!("Configuration already initialised, keeping the first one");
    }
}

/// The process-wide configuration, or built-in defaults before `init`.
pub fn get() -> &'static Config {
    CONFIG.get_or_init(|| Config::from_settings(&UserSettings::default()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_init_is_what_get_returns() {
        let mut settings = UserSettings::default();
        settings.model_id = "first".to_string();
        init(&settings);
        settings.model_id = "second".to_string();
        init(&settings);

        assert_eq!(get().model_id, "first");
        assert!(std::ptr::eq(get(), get()));
    }

    #[test]
    fn zero_inference_timeout_means_none() {
        let config = Config::from_settings(&UserSettings::default());
        assert!(config.inference_timeout.is_none());
        assert_eq!(config.http_timeout, Duration::from_secs(30));

        let mut settings = UserSettings::default();
        settings.inference_timeout_secs = 5;
        settings.storage_dir = "/data".to_string();
        let config = Config::from_settings(&settings);
        assert_eq!(config.inference_timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.model_path(), PathBuf::from("/data/downloaded_model.ort"));
    }
}
