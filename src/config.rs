use std::env;
use std::path::PathBuf;
use std::time::Duration;

const MIB: u64 = 1 << 20;

/// Storage and preview settings shared by ingestion and lookup.
#[derive(Clone, Debug)]
pub struct Config {
    /// Where originals are stored.
    pub original_root: PathBuf,
    /// Where previews are cached, mirroring `original_root`.
    pub preview_root: PathBuf,
    pub preview_width: u32,
    pub preview_height: u32,
    /// Upper bound on bytes read from a remote image.
    pub download_limit: u64,
    /// Never keep the uploaded filename.
    pub random_name: bool,
    pub fetch_timeout: Duration,
    /// Hosts URL ingestion may fetch from. Empty allows any host.
    pub allowed_hosts: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            original_root: PathBuf::from("data/img"),
            preview_root: PathBuf::from("data/preview"),
            preview_width: 100,
            preview_height: 100,
            download_limit: 8 * MIB,
            random_name: false,
            fetch_timeout: Duration::from_secs(30),
            allowed_hosts: Vec::new(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from `lookup`, falling back to defaults for missing or
    /// unparsable values.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        Self {
            original_root: get("IMG_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.original_root),
            preview_root: get("PREVIEW_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.preview_root),
            preview_width: get("PREVIEW_WIDTH")
                .and_then(|value| value.trim().parse().ok())
                .filter(|value| *value > 0)
                .unwrap_or(defaults.preview_width),
            preview_height: get("PREVIEW_HEIGHT")
                .and_then(|value| value.trim().parse().ok())
                .filter(|value| *value > 0)
                .unwrap_or(defaults.preview_height),
            download_limit: get("DOWNLOAD_LIMIT")
                .and_then(|value| value.trim().parse::<u64>().ok())
                .map(|mib| mib.saturating_mul(MIB))
                .unwrap_or(defaults.download_limit),
            random_name: get("RANDOM_NAME")
                .map(|value| parse_flag(&value))
                .unwrap_or(defaults.random_name),
            fetch_timeout: get("FETCH_TIMEOUT")
                .and_then(|value| value.trim().parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.fetch_timeout),
            allowed_hosts: get("ALLOWED_IMAGE_HOSTS")
                .map(|value| split_list(&value))
                .unwrap_or(defaults.allowed_hosts),
        }
    }
}

/// Transport settings for the bundled HTTP server.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub http_addr: String,
    /// Request body limit for uploads, in bytes.
    pub upload_limit: usize,
    /// URL prefix the originals are served under.
    pub img_path: String,
    pub upload_path: String,
    pub preview_path: String,
    pub storage: Config,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: "localhost:8080".to_string(),
            upload_limit: 8 * MIB as usize,
            img_path: "/img".to_string(),
            upload_path: "/upload".to_string(),
            preview_path: "/preview".to_string(),
            storage: Config::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        Self {
            http_addr: get("HTTP_ADDR")
                .map(|value| value.trim().to_string())
                .unwrap_or(defaults.http_addr),
            upload_limit: get("UPLOAD_LIMIT")
                .and_then(|value| value.trim().parse::<usize>().ok())
                .map(|mib| mib.saturating_mul(MIB as usize))
                .unwrap_or(defaults.upload_limit),
            img_path: get("IMG_PATH")
                .map(|value| normalize_route(&value))
                .unwrap_or(defaults.img_path),
            upload_path: get("UPLOAD_PATH")
                .map(|value| normalize_route(&value))
                .unwrap_or(defaults.upload_path),
            preview_path: get("PREVIEW_PATH")
                .map(|value| normalize_route(&value))
                .unwrap_or(defaults.preview_path),
            storage: Config::from_lookup(&lookup),
        }
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|item| item.trim().to_ascii_lowercase())
        .filter(|item| !item.is_empty())
        .collect()
}

fn normalize_route(value: &str) -> String {
    let trimmed = value.trim().trim_end_matches('/');
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}
