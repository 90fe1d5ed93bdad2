//! Configuration file parser for ~/.config/feedblock/config.toml.
//!
//! The config file is optional: a missing file yields `AppConfig::default()`.
//! Unknown keys are accepted by serde but logged as potential typos.
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Environment variable that overrides `session_cookie` from the file.
pub const COOKIE_ENV_VAR: &str = "FEEDBLOCK_COOKIE";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Process-level settings for the engine: where the remote API lives, how
/// the blocklist is paged, and the timing knobs of the scan loop.
///
/// These are distinct from the viewer's `FilterSettings`, which live in the
/// store and change at runtime.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Origin of the remote API (HTTPS, loopback excepted).
    pub base_url: String,

    /// Window size for blocklist paging.
    pub page_size: usize,

    /// Quiescence window between the last observed mutation and a rescan.
    pub debounce_ms: u64,

    /// Upper bound for any single remote call.
    pub request_timeout_secs: u64,

    pub user_agent: String,

    /// Raw `Cookie` header of a logged-in session. The anti-forgery token is
    /// read from it. `FEEDBLOCK_COOKIE` takes precedence.
    pub session_cookie: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.zhihu.com".to_string(),
            page_size: 20,
            debounce_ms: 100,
            request_timeout_secs: 15,
            user_agent: concat!("feedblock/", env!("CARGO_PKG_VERSION")).to_string(),
            session_cookie: None,
        }
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("base_url", &self.base_url)
            .field("page_size", &self.page_size)
            .field("debounce_ms", &self.debounce_ms)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("user_agent", &self.user_agent)
            .field(
                "session_cookie",
                &self.session_cookie.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

impl AppConfig {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 6] = [
        "base_url",
        "page_size",
        "debounce_ms",
        "request_timeout_secs",
        "user_agent",
        "session_cookie",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(AppConfig::default())`
    /// - Empty file → `Ok(AppConfig::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)`
    /// - Zero page size or timeout → `Err(ConfigError::Invalid)`
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: AppConfig = toml::from_str(&content)?;
        config.validate()?;
        tracing::info!(path = %path.display(), base_url = %config.base_url, "Loaded configuration");
        Ok(config)
    }

    /// Apply environment overrides on top of the file values.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(cookie) = std::env::var(COOKIE_ENV_VAR) {
            if !cookie.trim().is_empty() {
                tracing::debug!("Session cookie taken from environment");
                self.session_cookie = Some(cookie);
            }
        }
        self
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size == 0 {
            return Err(ConfigError::Invalid {
                key: "page_size",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "request_timeout_secs",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(name: &str, content: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("feedblock_config_test_{}", name));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, content).unwrap();
        path
    }

    fn cleanup(path: &Path) {
        if let Some(dir) = path.parent() {
            std::fs::remove_dir_all(dir).ok();
        }
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.base_url, "https://www.zhihu.com");
        assert_eq!(config.page_size, 20);
        assert_eq!(config.debounce(), Duration::from_millis(100));
        assert_eq!(config.request_timeout(), Duration::from_secs(15));
        assert!(config.session_cookie.is_none());
    }

    #[test]
    fn test_missing_file_returns_default() {
        let path = Path::new("/tmp/feedblock_test_nonexistent_config.toml");
        let config = AppConfig::load(path).unwrap();
        assert_eq!(config.page_size, 20);
    }

    #[test]
    fn test_whitespace_only_file_returns_default() {
        let path = write_config("whitespace", "   \n  \n");
        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.debounce_ms, 100);
        cleanup(&path);
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let path = write_config("partial", "debounce_ms = 250\n");
        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.debounce_ms, 250);
        assert_eq!(config.page_size, 20);
        assert_eq!(config.base_url, "https://www.zhihu.com");
        cleanup(&path);
    }

    #[test]
    fn test_full_config() {
        let content = r#"
base_url = "https://example.com"
page_size = 50
debounce_ms = 30
request_timeout_secs = 5
user_agent = "test-agent"
session_cookie = "z_c0=abc; xsrf-token=tok123"
"#;
        let path = write_config("full", content);
        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.base_url, "https://example.com");
        assert_eq!(config.page_size, 50);
        assert_eq!(config.debounce_ms, 30);
        assert_eq!(config.request_timeout_secs, 5);
        assert_eq!(config.user_agent, "test-agent");
        assert_eq!(
            config.session_cookie.as_deref(),
            Some("z_c0=abc; xsrf-token=tok123")
        );
        cleanup(&path);
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let path = write_config("invalid", "this is not [valid toml");
        let err = AppConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));
        cleanup(&path);
    }

    #[test]
    fn test_wrong_type_returns_error() {
        let path = write_config("wrongtype", "page_size = \"twenty\"\n");
        assert!(AppConfig::load(&path).is_err());
        cleanup(&path);
    }

    #[test]
    fn test_zero_page_size_rejected() {
        let path = write_config("zero_page", "page_size = 0\n");
        let err = AppConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "page_size", .. }));
        cleanup(&path);
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let path = write_config("unknown", "hide_blocked = true\npage_size = 10\n");
        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.page_size, 10);
        cleanup(&path);
    }

    #[test]
    fn test_too_large_file_rejected() {
        let path = write_config("too_large", &"a".repeat(1_048_577));
        let err = AppConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        cleanup(&path);
    }

    #[test]
    fn test_debug_masks_session_cookie() {
        let config = AppConfig {
            session_cookie: Some("z_c0=very-secret".to_string()),
            ..AppConfig::default()
        };
        let debug_output = format!("{:?}", config);
        assert!(!debug_output.contains("very-secret"));
        assert!(debug_output.contains("[REDACTED]"));
    }
}
