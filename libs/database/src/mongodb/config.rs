use super::uri::mask_uri;
use core_config::{ConfigError, Environment, FromEnv, env_bool, env_or_default, env_parse};
use serde::Serialize;
use std::fmt;

/// Wire compressors the client knows how to negotiate
pub const KNOWN_COMPRESSORS: [&str; 3] = ["zstd", "snappy", "zlib"];

/// Read preference mode, spelled the way connection strings spell it
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase", ascii_case_insensitive)]
pub enum ReadPreferenceMode {
    Primary,
    #[default]
    PrimaryPreferred,
    Secondary,
    SecondaryPreferred,
    Nearest,
}

/// MongoDB connection configuration
///
/// Treated as immutable once built: the connection manager clones it on connect
/// and never changes the copy it holds.
///
/// # Example
///
/// ```ignore
/// use evpulse_database::mongodb::MongoDbConfig;
/// use core_config::FromEnv;
///
/// // Manual construction
/// let config = MongoDbConfig::new("mongodb://localhost:27017").with_database("evpulse");
///
/// // From environment variables
/// let config = MongoDbConfig::from_env()?;
/// if let Err(violations) = config.validate() {
///     eprintln!("{violations:?}");
/// }
/// ```
#[derive(Clone, PartialEq)]
pub struct MongoDbConfig {
    /// Connection string: mongodb://[user:password@]host[:port][/database][?options]
    pub uri: String,
    pub database: String,

    // Pool
    pub min_pool_size: u32,
    pub max_pool_size: u32,
    pub max_idle_time_ms: u64,

    // Timeouts
    pub server_selection_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    /// Upper bound for a single probe (ping) round-trip
    pub socket_timeout_ms: u64,

    // Retries
    pub retry_writes: bool,
    pub retry_reads: bool,
    pub max_retry_attempts: u32,
    pub retry_delay_seconds: f64,
    pub retry_backoff_multiplier: f64,

    // TLS
    pub tls_enabled: bool,
    pub tls_allow_invalid_certificates: bool,
    pub tls_allow_invalid_hostnames: bool,
    pub tls_ca_file: Option<String>,

    // Write concern
    pub write_concern_w: String,
    pub write_concern_j: bool,
    pub write_concern_wtimeout_ms: u64,

    pub read_preference: ReadPreferenceMode,
    pub app_name: String,
    pub compressors: Vec<String>,
    pub heartbeat_frequency_ms: u64,

    /// Log every state transition at info level
    pub debug_mode: bool,
    /// Log every attempt made by `execute_with_retry`
    pub log_queries: bool,
}

impl MongoDbConfig {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            ..Self::default()
        }
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    pub fn with_pool_size(mut self, min_pool_size: u32, max_pool_size: u32) -> Self {
        self.min_pool_size = min_pool_size;
        self.max_pool_size = max_pool_size;
        self
    }

    pub fn with_retry(mut self, attempts: u32, delay_seconds: f64, multiplier: f64) -> Self {
        self.max_retry_attempts = attempts;
        self.retry_delay_seconds = delay_seconds;
        self.retry_backoff_multiplier = multiplier;
        self
    }

    pub fn with_tls(mut self, enabled: bool) -> Self {
        self.tls_enabled = enabled;
        self
    }

    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = app_name.into();
        self
    }

    /// Connection string with the password replaced, safe for logs
    pub fn masked_uri(&self) -> String {
        mask_uri(&self.uri)
    }

    /// Every violated invariant, in a stable order. Empty when the config is usable.
    pub fn violations(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.uri.is_empty() {
            errors.push("MongoDB URI is required".to_string());
        } else if !(self.uri.starts_with("mongodb://") || self.uri.starts_with("mongodb+srv://")) {
            errors.push("MongoDB URI must start with 'mongodb://' or 'mongodb+srv://'".to_string());
        }

        if self.max_pool_size < self.min_pool_size {
            errors.push("max_pool_size must be >= min_pool_size".to_string());
        }

        if self.server_selection_timeout_ms < 1000 {
            errors.push("server_selection_timeout_ms should be at least 1000ms".to_string());
        }

        if !self.retry_delay_seconds.is_finite() || self.retry_delay_seconds < 0.0 {
            errors.push("retry_delay_seconds must be a finite, non-negative number".to_string());
        }

        if !self.retry_backoff_multiplier.is_finite() || self.retry_backoff_multiplier <= 0.0 {
            errors.push("retry_backoff_multiplier must be a finite, positive number".to_string());
        }

        for compressor in &self.compressors {
            if !KNOWN_COMPRESSORS.contains(&compressor.as_str()) {
                errors.push(format!(
                    "unknown compressor '{}' (expected one of: {})",
                    compressor,
                    KNOWN_COMPRESSORS.join(", ")
                ));
            }
        }

        errors
    }

    /// Pure check of the invariants; never touches the network
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let errors = self.violations();
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    /// Driver-facing option set derived from the fields alone
    pub fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            min_pool_size: self.min_pool_size,
            max_pool_size: self.max_pool_size,
            max_idle_time_ms: self.max_idle_time_ms,
            server_selection_timeout_ms: self.server_selection_timeout_ms,
            connect_timeout_ms: self.connect_timeout_ms,
            socket_timeout_ms: self.socket_timeout_ms,
            retry_writes: self.retry_writes,
            retry_reads: self.retry_reads,
            app_name: self.app_name.clone(),
            heartbeat_frequency_ms: self.heartbeat_frequency_ms,
            compressors: self.compressors.clone(),
            write_concern: WriteConcernOptions {
                w: self.write_concern_w.clone(),
                journal: self.write_concern_j,
                wtimeout_ms: self.write_concern_wtimeout_ms,
            },
            read_preference: self.read_preference,
            tls: self.tls_enabled.then(|| TlsSettings {
                allow_invalid_certificates: self.tls_allow_invalid_certificates,
                allow_invalid_hostnames: self.tls_allow_invalid_hostnames,
                ca_file: self.tls_ca_file.clone(),
            }),
        }
    }
}

impl Default for MongoDbConfig {
    fn default() -> Self {
        Self {
            uri: String::new(),
            database: "evpulse".to_string(),
            min_pool_size: 5,
            max_pool_size: 50,
            max_idle_time_ms: 30_000,
            server_selection_timeout_ms: 30_000,
            connect_timeout_ms: 20_000,
            socket_timeout_ms: 30_000,
            retry_writes: true,
            retry_reads: true,
            max_retry_attempts: 3,
            retry_delay_seconds: 1.0,
            retry_backoff_multiplier: 2.0,
            tls_enabled: true,
            tls_allow_invalid_certificates: false,
            tls_allow_invalid_hostnames: false,
            tls_ca_file: None,
            write_concern_w: "majority".to_string(),
            write_concern_j: true,
            write_concern_wtimeout_ms: 5_000,
            read_preference: ReadPreferenceMode::default(),
            app_name: "EVPulse".to_string(),
            compressors: KNOWN_COMPRESSORS.iter().map(|c| c.to_string()).collect(),
            heartbeat_frequency_ms: 10_000,
            debug_mode: false,
            log_queries: false,
        }
    }
}

/// Load MongoDbConfig from environment variables
///
/// `MONGODB_URI` (falling back to `MONGODB_URL`) may be missing: that is reported
/// by [`MongoDbConfig::validate`], not here. Pool sizes, TLS allowances and debug
/// mode default according to `APP_ENV`.
///
/// Malformed numbers, booleans or read preferences are a [`ConfigError::ParseError`].
impl FromEnv for MongoDbConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let environment = Environment::from_env();
        let production = environment.is_production();
        let development = environment.is_development();

        let uri = std::env::var("MONGODB_URI")
            .or_else(|_| std::env::var("MONGODB_URL"))
            .unwrap_or_default();

        let read_preference = {
            let raw = env_or_default("MONGODB_READ_PREFERENCE", "primaryPreferred");
            raw.trim()
                .parse::<ReadPreferenceMode>()
                .map_err(|_| ConfigError::ParseError {
                    key: "MONGODB_READ_PREFERENCE".to_string(),
                    details: format!("unknown read preference '{}'", raw),
                })?
        };

        let compressors = env_or_default("MONGODB_COMPRESSORS", &KNOWN_COMPRESSORS.join(","))
            .split(',')
            .map(|c| c.trim().to_ascii_lowercase())
            .filter(|c| !c.is_empty())
            .collect();

        Ok(Self {
            uri,
            database: env_or_default("MONGODB_DATABASE", "evpulse"),
            min_pool_size: env_parse("MONGODB_MIN_POOL_SIZE", if production { "5" } else { "2" })?,
            max_pool_size: env_parse(
                "MONGODB_MAX_POOL_SIZE",
                if production { "100" } else { "20" },
            )?,
            max_idle_time_ms: env_parse("MONGODB_MAX_IDLE_TIME_MS", "30000")?,
            server_selection_timeout_ms: env_parse("MONGODB_SERVER_SELECTION_TIMEOUT_MS", "30000")?,
            connect_timeout_ms: env_parse("MONGODB_CONNECT_TIMEOUT_MS", "20000")?,
            socket_timeout_ms: env_parse("MONGODB_SOCKET_TIMEOUT_MS", "30000")?,
            retry_writes: env_bool("MONGODB_RETRY_WRITES", true)?,
            retry_reads: env_bool("MONGODB_RETRY_READS", true)?,
            max_retry_attempts: env_parse("MONGODB_MAX_RETRY_ATTEMPTS", "3")?,
            retry_delay_seconds: env_parse("MONGODB_RETRY_DELAY_SECONDS", "1.0")?,
            retry_backoff_multiplier: env_parse("MONGODB_RETRY_BACKOFF_MULTIPLIER", "2.0")?,
            tls_enabled: env_bool("MONGODB_TLS_ENABLED", true)?,
            tls_allow_invalid_certificates: env_bool("MONGODB_TLS_ALLOW_INVALID_CERTS", development)?,
            tls_allow_invalid_hostnames: env_bool(
                "MONGODB_TLS_ALLOW_INVALID_HOSTNAMES",
                development,
            )?,
            tls_ca_file: std::env::var("MONGODB_TLS_CA_FILE")
                .ok()
                .filter(|path| !path.is_empty()),
            write_concern_w: env_or_default("MONGODB_WRITE_CONCERN_W", "majority"),
            write_concern_j: env_bool("MONGODB_WRITE_CONCERN_J", true)?,
            write_concern_wtimeout_ms: env_parse("MONGODB_WRITE_CONCERN_WTIMEOUT", "5000")?,
            read_preference,
            app_name: env_or_default("MONGODB_APP_NAME", "EVPulse"),
            compressors,
            heartbeat_frequency_ms: env_parse("MONGODB_HEARTBEAT_FREQUENCY_MS", "10000")?,
            debug_mode: env_bool("MONGODB_DEBUG", development)?,
            log_queries: env_bool("MONGODB_LOG_QUERIES", false)?,
        })
    }
}

// Both renderings go through the masked URI so credentials never reach a log line.
impl fmt::Display for MongoDbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MongoDbConfig(uri='{}', database='{}')",
            self.masked_uri(),
            self.database
        )
    }
}

impl fmt::Debug for MongoDbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MongoDbConfig")
            .field("uri", &self.masked_uri())
            .field("database", &self.database)
            .field("min_pool_size", &self.min_pool_size)
            .field("max_pool_size", &self.max_pool_size)
            .field("server_selection_timeout_ms", &self.server_selection_timeout_ms)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("socket_timeout_ms", &self.socket_timeout_ms)
            .field("max_retry_attempts", &self.max_retry_attempts)
            .field("retry_delay_seconds", &self.retry_delay_seconds)
            .field("retry_backoff_multiplier", &self.retry_backoff_multiplier)
            .field("tls_enabled", &self.tls_enabled)
            .field("read_preference", &self.read_preference)
            .field("app_name", &self.app_name)
            .finish_non_exhaustive()
    }
}

/// Write concern part of [`ConnectionOptions`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WriteConcernOptions {
    /// "majority", a node count, or a custom tag set name
    pub w: String,
    pub journal: bool,
    pub wtimeout_ms: u64,
}

/// TLS part of [`ConnectionOptions`], present only when TLS is enabled
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TlsSettings {
    pub allow_invalid_certificates: bool,
    pub allow_invalid_hostnames: bool,
    pub ca_file: Option<String>,
}

/// Engine-facing options derived from a [`MongoDbConfig`].
///
/// Plain data: building it performs no I/O, and the Mongo driver adapter
/// translates it into `mongodb::options::ClientOptions`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionOptions {
    pub min_pool_size: u32,
    pub max_pool_size: u32,
    pub max_idle_time_ms: u64,
    pub server_selection_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub socket_timeout_ms: u64,
    pub retry_writes: bool,
    pub retry_reads: bool,
    pub app_name: String,
    pub heartbeat_frequency_ms: u64,
    pub compressors: Vec<String>,
    pub write_concern: WriteConcernOptions,
    pub read_preference: ReadPreferenceMode,
    pub tls: Option<TlsSettings>,
}
