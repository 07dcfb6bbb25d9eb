//! Configuration types shared across crates.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::PathBuf;

/// Top-level configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    /// Transformed-image cache. Disabled when absent.
    #[serde(default)]
    pub cache: Option<CacheConfig>,
    /// Request signing. Disabled when absent.
    #[serde(default)]
    pub hmac: Option<HmacConfig>,
    /// Watermark images, addressed by index from `W<id>` tokens.
    #[serde(default)]
    pub watermarks: Vec<PathBuf>,
    #[serde(default)]
    pub backend: BackendConfig,
    /// Source plugins to enable, by name (e.g. `"pdf"`).
    #[serde(default)]
    pub plugins: Vec<String>,
}

impl AppConfig {
    /// Validate every section.
    pub fn validate(&self) -> Result<(), String> {
        self.storage.validate()?;
        if let Some(cache) = &self.cache {
            cache.validate()?;
        }
        if let Some(hmac) = &self.hmac {
            hmac.validate()?;
        }
        Ok(())
    }

    /// Configuration for tests: filesystem storage under `root`, no cache,
    /// no signing.
    pub fn for_testing(root: impl Into<PathBuf>) -> Self {
        Self {
            storage: StorageConfig::Filesystem {
                path: root.into(),
                partition: false,
                partition_depth: default_partition_depth(),
            },
            ..Self::default()
        }
    }
}

/// HTTP server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Value sent verbatim as `Cache-Control` on successful responses.
    #[serde(default)]
    pub cache_control: Option<String>,
    /// Send `Last-Modified` and honour `If-Modified-Since`.
    #[serde(default)]
    pub last_modified_header: bool,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
    /// Request header carrying the device pixel ratio.
    #[serde(default = "default_dpr_header")]
    pub dpr_header: String,
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_dpr_header() -> String {
    "DPR".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            cache_control: None,
            last_modified_header: false,
            metrics_enabled: default_metrics_enabled(),
            dpr_header: default_dpr_header(),
        }
    }
}

/// Where source blobs are read from.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem.
    Filesystem {
        /// Root directory.
        path: PathBuf,
        /// Split hashes into nested directories.
        #[serde(default)]
        partition: bool,
        /// Number of four-character directory levels when partitioning.
        #[serde(default = "default_partition_depth")]
        partition_depth: usize,
    },
    /// Remote object store reachable over HTTP (`GET {base_url}/{hash}`).
    Http {
        base_url: String,
        /// Fetch timeout in seconds; exceeding it yields a 504.
        #[serde(default = "default_fetch_timeout_secs")]
        timeout_secs: u64,
    },
}

fn default_partition_depth() -> usize {
    3
}

fn default_fetch_timeout_secs() -> u64 {
    10
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/blobs"),
            partition: false,
            partition_depth: default_partition_depth(),
        }
    }
}

impl StorageConfig {
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::Filesystem {
                partition: true,
                partition_depth: 0,
                ..
            } => Err("storage partition_depth must be at least 1".to_string()),
            Self::Http { base_url, .. } if base_url.is_empty() => {
                Err("http storage requires base_url".to_string())
            }
            Self::Http {
                timeout_secs: 0, ..
            } => Err("http storage timeout_secs must be positive".to_string()),
            _ => Ok(()),
        }
    }
}

/// Disk cache configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Root directory for cached files.
    pub path: PathBuf,
    /// SQLite index file (default: `<path>/index.sqlite3`).
    #[serde(default)]
    pub index: Option<PathBuf>,
    /// Maximum total size: a byte count or `"NN%"` of the hosting device.
    #[serde(default)]
    pub size: CacheSize,
    /// How long to wait on a locked index before giving up.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_busy_timeout_ms() -> u64 {
    300
}

impl CacheConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            index: None,
            size: CacheSize::default(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }

    pub fn index_path(&self) -> PathBuf {
        self.index
            .clone()
            .unwrap_or_else(|| self.path.join("index.sqlite3"))
    }

    pub fn validate(&self) -> Result<(), String> {
        match self.size {
            CacheSize::Percent(p) if p == 0 || p > 100 => {
                Err(format!("cache size percentage must be 1-100, got {p}"))
            }
            CacheSize::Bytes(0) => Err("cache size must be positive".to_string()),
            _ => Ok(()),
        }
    }
}

/// Cache budget.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheSize {
    Bytes(u64),
    /// Percentage of the device hosting the cache root.
    Percent(u8),
}

impl Default for CacheSize {
    fn default() -> Self {
        Self::Bytes(1_073_741_824) // 1 GiB
    }
}

impl std::str::FromStr for CacheSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(percent) = s.strip_suffix('%') {
            return percent
                .trim()
                .parse()
                .map(Self::Percent)
                .map_err(|_| format!("invalid cache size percentage: {s:?}"));
        }
        s.parse()
            .map(Self::Bytes)
            .map_err(|_| format!("invalid cache size: {s:?}"))
    }
}

impl<'de> Deserialize<'de> for CacheSize {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Bytes(u64),
            Text(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Bytes(n) => Ok(Self::Bytes(n)),
            Repr::Text(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

impl Serialize for CacheSize {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Bytes(n) => serializer.serialize_u64(*n),
            Self::Percent(p) => serializer.serialize_str(&format!("{p}%")),
        }
    }
}

/// Request attribute included in a signature.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignedAttribute {
    Hash,
    Transformations,
    Format,
}

/// Request signing configuration.
///
/// Accepts either a bare key string (signature required, default attribute
/// set) or a table.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(from = "HmacConfigRepr")]
pub struct HmacConfig {
    pub key: String,
    /// Accepted signing recipes, tried in order.
    pub attributes: Vec<Vec<SignedAttribute>>,
    /// Operations (by name or letter) that may be dropped before verifying.
    pub optional: Vec<String>,
    /// Reject unsigned requests.
    pub required: bool,
}

fn default_attributes() -> Vec<Vec<SignedAttribute>> {
    vec![vec![SignedAttribute::Transformations, SignedAttribute::Hash]]
}

fn default_required() -> bool {
    true
}

impl HmacConfig {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            attributes: default_attributes(),
            optional: Vec::new(),
            required: default_required(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.key.is_empty() {
            return Err("hmac key must not be empty".to_string());
        }
        if self.attributes.is_empty() || self.attributes.iter().any(Vec::is_empty) {
            return Err("hmac attribute sets must not be empty".to_string());
        }
        Ok(())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum HmacConfigRepr {
    Key(String),
    Table {
        key: String,
        #[serde(default)]
        attributes: Option<AttributeSets>,
        #[serde(default)]
        optional: Option<OneOrMany>,
        #[serde(default = "default_required")]
        required: bool,
    },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AttributeSets {
    Many(Vec<Vec<SignedAttribute>>),
    One(Vec<SignedAttribute>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl From<HmacConfigRepr> for HmacConfig {
    fn from(repr: HmacConfigRepr) -> Self {
        match repr {
            HmacConfigRepr::Key(key) => Self::new(key),
            HmacConfigRepr::Table {
                key,
                attributes,
                optional,
                required,
            } => Self {
                key,
                attributes: match attributes {
                    Some(AttributeSets::Many(sets)) if !sets.is_empty() => sets,
                    Some(AttributeSets::One(set)) if !set.is_empty() => vec![set],
                    _ => default_attributes(),
                },
                optional: match optional {
                    Some(OneOrMany::One(name)) => vec![name],
                    Some(OneOrMany::Many(names)) => names,
                    None => Vec::new(),
                },
                required,
            },
        }
    }
}

/// Image backend selection.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    /// ImageMagick command-line tools (`convert`, `identify`).
    ImageMagick {
        /// Passed to `-limit memory`.
        #[serde(default)]
        memory_limit: Option<String>,
        /// Passed to `-limit map`.
        #[serde(default)]
        disk_limit: Option<String>,
    },
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::ImageMagick {
            memory_limit: None,
            disk_limit: None,
        }
    }
}
