use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use log::{debug, info, warn, error};

use crate::config::{
    DEFAULT_API_BASE_URL, DEFAULT_HTTP_TIMEOUT_SECS, DEFAULT_INFERENCE_TIMEOUT_SECS,
    DEFAULT_MODEL_FILENAME, DEFAULT_NATIVE_SYMBOL,
};

pub const ENV_API_KEY: &str = "PHOTOSTYLER_API_KEY";
pub const ENV_MODEL_ID: &str = "PHOTOSTYLER_MODEL_ID";

/// User-specific settings that persist across app sessions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSettings {
    /// Model API root; `{api_base_url}/{model_id}/download` hands out the pre-signed URL
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Bearer token for the model API
    #[serde(default)]
    pub api_key: String,

    #[serde(default)]
    pub model_id: String,

    /// File name the downloaded model is stored under
    #[serde(default = "default_model_filename")]
    pub model_filename: String,

    /// Where the model is stored; empty means the platform data directory
    #[serde(default)]
    pub storage_dir: String,

    /// Path to the native inference library (.so/.dylib/.dll)
    #[serde(default)]
    pub native_library: String,

    /// Exported entry point inside `native_library`
    #[serde(default = "default_native_symbol")]
    pub native_symbol: String,

    /// Connect and read timeout for model API requests
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,

    /// Cancel a running transform after this many seconds; 0 disables
    #[serde(default)]
    pub inference_timeout_secs: u64,
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_model_filename() -> String {
    DEFAULT_MODEL_FILENAME.to_string()
}

fn default_native_symbol() -> String {
    DEFAULT_NATIVE_SYMBOL.to_string()
}

fn default_http_timeout_secs() -> u64 {
    DEFAULT_HTTP_TIMEOUT_SECS
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            api_key: String::new(),
            model_id: String::new(),
            model_filename: default_model_filename(),
            storage_dir: String::new(),
            native_library: String::new(),
            native_symbol: default_native_symbol(),
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            inference_timeout_secs: DEFAULT_INFERENCE_TIMEOUT_SECS,
        }
    }
}

impl UserSettings {
    /// Get the path to the settings file
    /// On macOS: ~/Library/Application Support/PhotoStyler/settings.yaml
    /// On Linux: ~/.config/PhotoStyler/settings.yaml
    /// On Windows: C:\Users\<user>\AppData\Roaming\PhotoStyler\settings.yaml
    pub fn settings_path() -> PathBuf {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."));

        config_dir.join("PhotoStyler").join("settings.yaml")
    }

    /// Load settings from the YAML file, then apply environment overrides.
    /// If custom_path is provided, uses that path; otherwise uses the default settings path
    pub fn load(custom_path: Option<&Path>) -> Self {
        let path = match custom_path {
            Some(p) => {
                info!("Using custom settings path: {}", p.display());
                p.to_path_buf()
            }
            None => Self::settings_path(),
        };

        let mut settings = Self::load_file(&path);
        settings.apply_env_overrides(|key| std::env::var(key).ok());
        settings
    }

    /// Load only the file, without environment overrides. Used when the
    /// result is written back.
    pub fn load_file(path: &Path) -> Self {
        if !path.exists() {
            info!("Settings file not found at {:?}, using defaults", path);
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(contents) => Self::from_yaml(&contents).unwrap_or_else(|e| {
                error!("Failed to parse settings file at {:?}: {}", path, e);
                warn!("Using default settings");
                Self::default()
            }),
            Err(e) => {
                error!("Failed to read settings file at {:?}: {}", path, e);
                warn!("Using default settings");
                Self::default()
            }
        }
    }

    pub fn from_yaml(contents: &str) -> Result<Self, serde_yaml::Error> {
        // An empty file deserializes to unit, not to a mapping
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        let settings = serde_yaml::from_str::<UserSettings>(contents)?;
        debug!(
            "Settings: api_base_url={}, model_id={}, model_filename={}, native_library={}",
            settings.api_base_url, settings.model_id, settings.model_filename, settings.native_library
        );
        Ok(settings)
    }

    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup(ENV_API_KEY).filter(|v| !v.is_empty()) {
            debug!("API key taken from {}", ENV_API_KEY);
            self.api_key = key;
        }
        if let Some(id) = lookup(ENV_MODEL_ID).filter(|v| !v.is_empty()) {
            debug!("Model id taken from {}", ENV_MODEL_ID);
            self.model_id = id;
        }
    }

    /// Directory the model file lives in.
    pub fn model_dir(&self) -> PathBuf {
        if self.storage_dir.trim().is_empty() {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(crate::logging::APP_NAME)
                .join("models")
        } else {
            PathBuf::from(&self.storage_dir)
        }
    }

    pub fn native_library_path(&self) -> Option<PathBuf> {
        let trimmed = self.native_library.trim();
        (!trimmed.is_empty()).then(|| PathBuf::from(trimmed))
    }

    /// Set one field from its textual form, as given on the command line.
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<(), String> {
        let parse_secs = |v: &str| {
            v.trim()
                .parse::<u64>()
                .map_err(|_| format!("{} expects a whole number of seconds, got '{}'", key, v))
        };
        match key {
            "api_base_url" => self.api_base_url = value.to_string(),
            "api_key" => self.api_key = value.to_string(),
            "model_id" => self.model_id = value.to_string(),
            "model_filename" if value.trim().is_empty() => {
                return Err("model_filename cannot be empty".to_string())
            }
            "model_filename" => self.model_filename = value.to_string(),
            "storage_dir" => self.storage_dir = value.to_string(),
            "native_library" => self.native_library = value.to_string(),
            "native_symbol" => self.native_symbol = value.to_string(),
            "http_timeout_secs" => self.http_timeout_secs = parse_secs(value)?,
            "inference_timeout_secs" => self.inference_timeout_secs = parse_secs(value)?,
            _ => return Err(format!("Unknown setting: {}", key)),
        }
        Ok(())
    }

    /// Save settings to the given YAML file while preserving comments
    pub fn save(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)
                    .map_err(|e| format!("Failed to create settings directory: {}", e))?;
            }
        }

        // If file exists, try to preserve comments by doing in-place value updates
        if path.exists() {
            match fs::read_to_string(path) {
                Ok(contents) => {
                    let updated = self.update_yaml_values(&contents);
                    fs::write(path, updated)
                        .map_err(|e| format!("Failed to write settings file: {}", e))?;
                    info!("Saved settings to {:?} (comments preserved)", path);
                    return Ok(());
                }
                Err(e) => {
                    warn!("Failed to read existing settings file for comment preservation: {}", e);
                }
            }
        }

        let yaml = self.to_yaml_with_comments();
        fs::write(path, yaml)
            .map_err(|e| format!("Failed to write settings file: {}", e))?;

        info!("Saved settings to {:?}", path);
        Ok(())
    }

    /// Update YAML values while preserving existing comments and structure
    fn update_yaml_values(&self, yaml_content: &str) -> String {
        let mut result = yaml_content.to_string();

        result = Self::replace_yaml_value(&result, "api_base_url", &quoted(&self.api_base_url));
        result = Self::replace_yaml_value(&result, "api_key", &quoted(&self.api_key));
        result = Self::replace_yaml_value(&result, "model_id", &quoted(&self.model_id));
        result = Self::replace_yaml_value(&result, "model_filename", &quoted(&self.model_filename));
        result = Self::replace_yaml_value(&result, "storage_dir", &quoted(&self.storage_dir));
        result = Self::replace_yaml_value(&result, "native_library", &quoted(&self.native_library));
        result = Self::replace_yaml_value(&result, "native_symbol", &quoted(&self.native_symbol));
        result = Self::replace_yaml_value(&result, "http_timeout_secs", &self.http_timeout_secs.to_string());
        result = Self::replace_yaml_value(&result, "inference_timeout_secs", &self.inference_timeout_secs.to_string());

        result
    }

    /// Replace a YAML key's value while preserving the rest of the line
    fn replace_yaml_value(yaml: &str, key: &str, new_value: &str) -> String {
        let pattern = format!(r"(?m)^(\s*{}\s*:\s*).*$", regex::escape(key));

        match regex::Regex::new(&pattern) {
            // Closure replacement so `$` in values is not read as a group reference
            Ok(re) => re
                .replace_all(yaml, |caps: &regex::Captures| format!("{}{}", &caps[1], new_value))
                .to_string(),
            Err(e) => {
                warn!("Failed to create regex for key '{}': {}", key, e);
                yaml.to_string()
            }
        }
    }

    /// Generate YAML content with comments for new files
    fn to_yaml_with_comments(&self) -> String {
        format!(
            r#"# PhotoStyler User Settings
# This file is loaded automatically when the application starts.
# Settings specified here will override the default values.

# Model API root. The download URL is requested from {{api_base_url}}/{{model_id}}/download
api_base_url: {}

# Bearer token for the model API (PHOTOSTYLER_API_KEY overrides this)
api_key: {}

# Identifier of the model to download (PHOTOSTYLER_MODEL_ID overrides this)
model_id: {}

# File name the downloaded model is stored under
model_filename: {}

# Directory for the downloaded model. Leave empty to use the platform data directory.
storage_dir: {}

# Native inference library (.so / .dylib / .dll) and its exported entry point
native_library: {}
native_symbol: {}

# Connect/read timeout for model API requests, in seconds
http_timeout_secs: {}

# Cancel a transform that runs longer than this many seconds (0 = never)
inference_timeout_secs: {}
"#,
            quoted(&self.api_base_url),
            quoted(&self.api_key),
            quoted(&self.model_id),
            quoted(&self.model_filename),
            quoted(&self.storage_dir),
            quoted(&self.native_library),
            quoted(&self.native_symbol),
            self.http_timeout_secs,
            self.inference_timeout_secs,
        )
    }
}

/// Double-quoted YAML scalar; JSON string escaping is valid YAML.
fn quoted(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| format!("\"{}\"", value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let settings = UserSettings::from_yaml("model_id: \"abc\"\n").unwrap();
        assert_eq!(settings.model_id, "abc");
        assert_eq!(settings.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(settings.model_filename, "downloaded_model.ort");
        assert_eq!(settings.http_timeout_secs, 30);
        assert_eq!(settings.inference_timeout_secs, 0);
    }

    #[test]
    fn set_value_parses_and_validates() {
        let mut settings = UserSettings::default();
        settings.set_value("model_id", "style-7").unwrap();
        settings.set_value("inference_timeout_secs", " 45").unwrap();
        assert_eq!(settings.model_id, "style-7");
        assert_eq!(settings.inference_timeout_secs, 45);

        assert!(settings.set_value("http_timeout_secs", "soon").is_err());
        assert!(settings.set_value("model_filename", "").is_err());
        assert_eq!(settings.set_value("colour", "red").unwrap_err(), "Unknown setting: colour");
        assert_eq!(settings.http_timeout_secs, 30);
    }

    #[test]
    fn empty_file_is_defaults() {
        assert_eq!(UserSettings::from_yaml("  \n").unwrap(), UserSettings::default());
    }

    #[test]
    fn commented_file_round_trips() {
        let mut settings = UserSettings::default();
        settings.api_key = "secret$1".to_string();
        settings.storage_dir = r"C:\models".to_string();
        settings.http_timeout_secs = 12;

        let yaml = settings.to_yaml_with_comments();
        assert!(yaml.contains("# PhotoStyler User Settings"));
        assert_eq!(UserSettings::from_yaml(&yaml).unwrap(), settings);
    }

    #[test]
    fn save_preserves_comments_in_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.yaml");
        std::fs::write(&path, "# keep me\nmodel_id: \"old\" # trailing\napi_key: \"k\"\n").unwrap();

        let mut settings = UserSettings::load_file(&path);
        settings.model_id = "new".to_string();
        settings.save(&path).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("# keep me\n"));
        assert!(contents.contains("model_id: \"new\""));
        assert_eq!(UserSettings::load_file(&path).model_id, "new");
    }

    #[test]
    fn unparsable_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.yaml");
        std::fs::write(&path, "http_timeout_secs: [not, a, number]\n").unwrap();
        assert_eq!(UserSettings::load_file(&path), UserSettings::default());
    }

    #[test]
    fn env_overrides_replace_credentials() {
        let mut settings = UserSettings::default();
        settings.api_key = "from-file".to_string();
        settings.apply_env_overrides(|key| match key {
            ENV_API_KEY => Some("from-env".to_string()),
            ENV_MODEL_ID => Some(String::new()),
            _ => None,
        });
        assert_eq!(settings.api_key, "from-env");
        assert_eq!(settings.model_id, "");
    }

    #[test]
    fn model_dir_uses_storage_dir() {
        let mut settings = UserSettings::default();
        settings.storage_dir = "/tmp/models".to_string();
        assert_eq!(settings.model_dir(), PathBuf::from("/tmp/models"));
        assert!(settings.native_library_path().is_none());
    }
}
