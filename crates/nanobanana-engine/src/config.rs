use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use secrecy::SecretString;

use crate::capture::DEFAULT_CAPTURE_SIZE;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-image";
pub const DEFAULT_TIMEOUT_S: f64 = 120.0;
pub const MIN_TIMEOUT_S: f64 = 1.0;
pub const MAX_TIMEOUT_S: f64 = 600.0;
pub const DEFAULT_TEMPERATURE: f64 = 0.8;
pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 8192;
pub const OUTPUT_DIR_NAME: &str = "NanoBanana";

const API_KEY_ENV_VARS: [&str; 2] = ["GEMINI_API_KEY", "GOOGLE_API_KEY"];
const CREDENTIAL_DIR_NAME: &str = "nanobanana";
const CREDENTIAL_FILE_NAME: &str = "api_key";

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub api_base: String,
    pub model: String,
    pub request_timeout: Duration,
    pub temperature: f64,
    pub max_output_tokens: u32,
    pub capture_width: u32,
    pub capture_height: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            model: DEFAULT_MODEL.to_string(),
            request_timeout: Duration::from_secs_f64(DEFAULT_TIMEOUT_S),
            temperature: DEFAULT_TEMPERATURE,
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
            capture_width: DEFAULT_CAPTURE_SIZE,
            capture_height: DEFAULT_CAPTURE_SIZE,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(non_empty_env)
    }

    /// Applies overrides from `lookup`, which returns trimmed non-empty values.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(api_base) = lookup("NANOBANANA_API_BASE") {
            config.api_base = api_base.trim_end_matches('/').to_string();
        }
        if let Some(model) = lookup("NANOBANANA_MODEL") {
            config.model = model;
        }
        let timeout_s = parse_clamped(
            lookup("NANOBANANA_TIMEOUT_S").as_deref(),
            DEFAULT_TIMEOUT_S,
            MIN_TIMEOUT_S,
            MAX_TIMEOUT_S,
        );
        config.request_timeout = Duration::from_secs_f64(timeout_s);
        config.temperature = parse_clamped(
            lookup("NANOBANANA_TEMPERATURE").as_deref(),
            DEFAULT_TEMPERATURE,
            0.0,
            2.0,
        );
        config
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        if !timeout.is_zero() {
            self.request_timeout = timeout;
        }
        self
    }

    /// Clamped to `MIN_TIMEOUT_S..=MAX_TIMEOUT_S`; non-finite values keep the
    /// current timeout.
    pub fn with_timeout_secs(self, seconds: f64) -> Self {
        if !seconds.is_finite() {
            return self;
        }
        let seconds = seconds.clamp(MIN_TIMEOUT_S, MAX_TIMEOUT_S);
        self.with_timeout(Duration::from_secs_f64(seconds))
    }
}

fn parse_clamped(raw: Option<&str>, default: f64, min: f64, max: f64) -> f64 {
    raw.and_then(|text| text.trim().parse::<f64>().ok())
        .filter(|value| value.is_finite())
        .unwrap_or(default)
        .clamp(min, max)
}

pub(crate) fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// API key for the generation endpoint. `Debug` never shows the key.
#[derive(Clone, Debug)]
pub struct Credentials {
    api_key: SecretString,
}

impl Credentials {
    /// Returns `None` for blank keys.
    pub fn new(api_key: impl AsRef<str>) -> Option<Self> {
        let trimmed = api_key.as_ref().trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(Self {
            api_key: SecretString::from(trimmed.to_string()),
        })
    }

    pub fn api_key(&self) -> &SecretString {
        &self.api_key
    }

    /// Explicit key, then environment, then the saved credential file.
    pub fn resolve(explicit: Option<&str>) -> Option<Self> {
        Self::resolve_with(explicit, non_empty_env, credential_file_path().as_deref())
    }

    pub fn resolve_with(
        explicit: Option<&str>,
        lookup: impl Fn(&str) -> Option<String>,
        credential_file: Option<&Path>,
    ) -> Option<Self> {
        if let Some(found) = explicit.and_then(Self::new) {
            return Some(found);
        }
        for name in API_KEY_ENV_VARS {
            if let Some(found) = lookup(name).and_then(Self::new) {
                return Some(found);
            }
        }
        let path = credential_file?;
        match fs::read_to_string(path) {
            Ok(text) => Self::new(text),
            Err(err) => {
                if err.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("could not read {}: {err}", path.display());
                }
                None
            }
        }
    }
}

pub fn credential_file_path() -> Option<PathBuf> {
    let config_home = non_empty_env("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| non_empty_env("HOME").map(|home| PathBuf::from(home).join(".config")))?;
    Some(config_home.join(CREDENTIAL_DIR_NAME).join(CREDENTIAL_FILE_NAME))
}

/// Stores the key verbatim in plain text, readable only by the owner on Unix.
pub fn save_api_key(path: &Path, api_key: &str) -> Result<()> {
    let trimmed = api_key.trim();
    if trimmed.is_empty() {
        anyhow::bail!("refusing to save an empty API key");
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options
        .open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    // `mode` only applies on creation; a pre-existing file keeps its bits.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))
            .with_context(|| format!("failed to restrict permissions on {}", path.display()))?;
    }
    file.write_all(trimmed.as_bytes())
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

/// `<project dir>/NanoBanana`, else `$HOME/NanoBanana`, else `./NanoBanana`.
pub fn default_output_dir(project_file: Option<&Path>) -> PathBuf {
    let project_dir = project_file
        .and_then(Path::parent)
        .filter(|dir| !dir.as_os_str().is_empty());
    if let Some(dir) = project_dir {
        return dir.join(OUTPUT_DIR_NAME);
    }
    match non_empty_env("HOME") {
        Some(home) => PathBuf::from(home).join(OUTPUT_DIR_NAME),
        None => PathBuf::from(".").join(OUTPUT_DIR_NAME),
    }
}
