//! Pipeline configuration.
//!
//! Loaded from `config.toml` in the platform config directory, with every
//! field defaulted. `SESSIONWARD_BASE_URL` overrides the backend base.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Environment variable overriding [`PipelineConfig::base_url`].
pub const BASE_URL_ENV: &str = "SESSIONWARD_BASE_URL";

/// Upper bound for every `*_secs` duration field (ten years).
pub const MAX_DURATION_SECS: i64 = 10 * 365 * 24 * 60 * 60;

/// Error type for configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config from {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config from {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid base URL {value:?}: {message}")]
    InvalidBaseUrl { value: String, message: String },

    #[error("invalid endpoint {value:?}: {source}")]
    InvalidEndpoint {
        value: String,
        #[source]
        source: url::ParseError,
    },

    #[error("{field} = {value} is outside 0..={max}")]
    InvalidDuration {
        field: &'static str,
        value: i64,
        max: i64,
    },

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Base every relative request target is resolved against.
    pub base_url: String,

    /// Path fragments that must never receive a bearer credential.
    pub public_endpoints: Vec<String>,

    /// Token refresh endpoint, relative to `base_url`.
    pub refresh_endpoint: String,

    /// Login endpoint, relative to `base_url`.
    pub login_endpoint: String,

    /// Where the navigator sends the user when the session ends.
    pub sign_in_path: String,

    /// Seconds before the real expiry at which a token is treated as expired.
    pub leeway_secs: i64,

    /// TTL assumed for a refreshed access token with no readable `exp`.
    pub fallback_ttl_secs: i64,

    /// TTL assumed for a login access token with no readable `exp`.
    pub login_fallback_ttl_secs: i64,

    /// Prefix for every storage key.
    pub storage_namespace: String,

    /// Directory for the bookkeeping file and the token fallback file.
    pub data_dir: PathBuf,

    /// Transport timeout applied to every request, refresh included.
    pub request_timeout_secs: u64,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Path to the configuration file that was loaded.
    #[serde(skip)]
    pub config_path: PathBuf,
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Catalog, review and account endpoints the LMS backend serves anonymously.
pub const DEFAULT_PUBLIC_ENDPOINTS: &[&str] = &[
    "course/categories/",
    "course/get-sub-categories/",
    "course/categories_filters/",
    "course/courses/",
    "course/v2/courses/",
    "course/get-sections/",
    "course/quiz/",
    "course/best-sellers/",
    "enrollments/reviews/",
    "enrollments/course-review-likes/",
    "enrollments/get-reviews-course-student/",
    "course/instructor/",
    "users/login/",
    "users/register/",
    "users/refresh-token/",
    "users/send-verification-email/",
    "users/verify-account/",
    "users/reset_password/",
    "core/webview/",
    "core/dashboard_stats/",
    "core/top_reviews/",
    "core/settings/",
];

impl Default for PipelineConfig {
    fn default() -> Self {
        let data_dir = project_dirs()
            .map(|d| d.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from(".sessionward"));

        Self {
            base_url: "http://localhost:8000/api/".to_string(),
            public_endpoints: DEFAULT_PUBLIC_ENDPOINTS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            refresh_endpoint: "users/refresh-token/".to_string(),
            login_endpoint: "users/login/".to_string(),
            sign_in_path: "/login".to_string(),
            leeway_secs: 30,
            fallback_ttl_secs: 5 * 60,
            login_fallback_ttl_secs: 24 * 60 * 60,
            storage_namespace: "sessionward".to_string(),
            data_dir,
            request_timeout_secs: 30,
            log_level: default_log_level(),
            config_path: PathBuf::new(),
        }
    }
}

impl PipelineConfig {
    /// Config with defaults and the given base URL.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Parsed base URL, normalised to end in `/` so relative joins keep the
    /// last path segment.
    pub fn base(&self) -> Result<Url, ConfigError> {
        let mut raw = self.base_url.trim().to_string();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        let url = Url::parse(&raw).map_err(|e| ConfigError::InvalidBaseUrl {
            value: self.base_url.clone(),
            message: e.to_string(),
        })?;
        if url.cannot_be_a_base() {
            return Err(ConfigError::InvalidBaseUrl {
                value: self.base_url.clone(),
                message: "URL cannot be used as a base".to_string(),
            });
        }
        Ok(url)
    }

    /// Absolute URL of the refresh endpoint.
    pub fn refresh_url(&self) -> Result<Url, ConfigError> {
        self.base()?
            .join(self.refresh_endpoint.trim_start_matches('/'))
            .map_err(|source| ConfigError::InvalidEndpoint {
                value: self.refresh_endpoint.clone(),
                source,
            })
    }

    /// Public fragments with empty entries removed.
    pub fn public_fragments(&self) -> Vec<String> {
        self.public_endpoints
            .iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Reject duration fields that cannot be added to the current time.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            ("leeway_secs", self.leeway_secs),
            ("fallback_ttl_secs", self.fallback_ttl_secs),
            ("login_fallback_ttl_secs", self.login_fallback_ttl_secs),
            (
                "request_timeout_secs",
                i64::try_from(self.request_timeout_secs).unwrap_or(i64::MAX),
            ),
        ];
        for (field, value) in fields {
            if !(0..=MAX_DURATION_SECS).contains(&value) {
                return Err(ConfigError::InvalidDuration {
                    field,
                    value,
                    max: MAX_DURATION_SECS,
                });
            }
        }
        Ok(())
    }

    pub fn leeway(&self) -> chrono::Duration {
        bounded_seconds(self.leeway_secs)
    }

    pub fn fallback_ttl(&self) -> chrono::Duration {
        bounded_seconds(self.fallback_ttl_secs)
    }

    pub fn login_fallback_ttl(&self) -> chrono::Duration {
        bounded_seconds(self.login_fallback_ttl_secs)
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_secs)
    }

    /// Bookkeeping file (expiry, profile).
    pub fn session_file(&self) -> PathBuf {
        self.data_dir.join("session.json")
    }

    /// Token file used when no OS keyring is available.
    pub fn token_file(&self) -> PathBuf {
        self.data_dir.join("tokens.json")
    }

    /// Shared HTTP client with the configured transport timeout.
    pub fn http_client(&self) -> Result<reqwest::Client, ConfigError> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("*/*"),
        );
        Ok(reqwest::Client::builder()
            .timeout(self.request_timeout())
            .default_headers(headers)
            .build()?)
    }
}

fn bounded_seconds(secs: i64) -> chrono::Duration {
    chrono::Duration::try_seconds(secs.clamp(0, MAX_DURATION_SECS)).unwrap_or_default()
}

/// Default configuration file location.
pub fn default_config_path() -> PathBuf {
    project_dirs()
        .map(|d| d.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("sessionward.toml"))
}

/// Load configuration from the default location or fall back to defaults.
pub fn load_config() -> Result<PipelineConfig, ConfigError> {
    load_config_from(&default_config_path())
}

/// Load configuration from `path`; a missing file yields defaults.
pub fn load_config_from(path: &Path) -> Result<PipelineConfig, ConfigError> {
    let mut config = if path.exists() {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?
    } else {
        PipelineConfig::default()
    };

    if let Ok(base) = std::env::var(BASE_URL_ENV) {
        if !base.trim().is_empty() {
            config.base_url = base;
        }
    }

    config.config_path = path.to_path_buf();
    config.base()?;
    config.validate()?;
    Ok(config)
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "raibid-labs", "sessionward")
}
