//! Per-instance YAML configuration.
//!
//! # Layout
//!
//! ```text
//! <config path>            one system instance, or
//! <config dir>/
//!   billing.yaml           one file per system instance
//!   logistics.yml
//! ```
//!
//! # Load pipeline
//!
//! 1. Parse the YAML into loosely-typed raw structs (every key optional).
//! 2. Apply environment overrides: `directory.apiKey` is overridden by
//!    `DIRECTORY_APIKEY`, `broker.auth.plain.password` by
//!    `BROKER_AUTH_PLAIN_PASSWORD`, and so on.
//! 3. Validate into a [`SystemConfig`]; the first problem found is returned
//!    as a [`ConfigError`] naming the file and key.
//!
//! Tests call [`load_system_config_with_env`] with an explicit lookup so they
//! never depend on the process environment.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{io_err, ConfigError};
use crate::prefix::PrefixFormat;
use crate::types::SyncDirection;

pub const DEFAULT_BASE_URL: &str = "https://api.starlify.com/hypermedia";
pub const DEFAULT_AGENT_TYPE: &str = "managed-kafka";
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(20);
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_RETRY_COUNT: u32 = 6;

// ---------------------------------------------------------------------------
// 1. Validated configuration
// ---------------------------------------------------------------------------

/// One fully validated configuration unit: everything a system instance needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemConfig {
    /// File this unit was loaded from; doubles as the instance identity.
    pub source: PathBuf,
    pub direction: SyncDirection,
    pub sync_interval: Duration,
    pub heartbeat_interval: Duration,
    /// Agent type the directory must report for this integration.
    pub agent_type: String,
    pub prefix_format: PrefixFormat,
    pub directory: DirectoryConfig,
    pub broker: BrokerConfig,
}

impl SystemConfig {
    /// Short human label: the file stem.
    pub fn name(&self) -> String {
        self.source
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.source.display().to_string())
    }
}

/// Connection settings for the directory REST API.
#[derive(Clone, PartialEq, Eq)]
pub struct DirectoryConfig {
    pub base_url: String,
    pub api_key: String,
    pub agent_id: String,
    pub middleware_id: String,
    pub timeout: Duration,
    /// Retries for `GET` calls answered with an empty `200`.
    pub retry_count: u32,
}

impl fmt::Debug for DirectoryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectoryConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("agent_id", &self.agent_id)
            .field("middleware_id", &self.middleware_id)
            .field("timeout", &self.timeout)
            .field("retry_count", &self.retry_count)
            .finish()
    }
}

/// Connection settings for the broker cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    pub bootstrap_servers: Vec<String>,
    pub auth: BrokerAuth,
}

/// Authentication strategy, chosen once from whichever credentials are set.
///
/// Priority when several are populated: IAM, then Plain, then OAuth.
#[derive(Clone, PartialEq, Eq, Default)]
pub enum BrokerAuth {
    #[default]
    None,
    Iam {
        key: String,
        secret: String,
    },
    Plain {
        username: String,
        password: String,
    },
    OAuth {
        token: String,
    },
}

impl BrokerAuth {
    fn select(raw: &RawAuth) -> Self {
        if !raw.iam.key.is_empty() && !raw.iam.secret.is_empty() {
            BrokerAuth::Iam {
                key: raw.iam.key.clone(),
                secret: raw.iam.secret.clone(),
            }
        } else if !raw.plain.username.is_empty() && !raw.plain.password.is_empty() {
            BrokerAuth::Plain {
                username: raw.plain.username.clone(),
                password: raw.plain.password.clone(),
            }
        } else if !raw.oauth.token.is_empty() {
            BrokerAuth::OAuth {
                token: raw.oauth.token.clone(),
            }
        } else {
            BrokerAuth::None
        }
    }

    /// Label used in logs; never includes credentials.
    pub fn mechanism(&self) -> &'static str {
        match self {
            BrokerAuth::None => "none",
            BrokerAuth::Iam { .. } => "iam",
            BrokerAuth::Plain { .. } => "plain",
            BrokerAuth::OAuth { .. } => "oauth",
        }
    }
}

impl fmt::Debug for BrokerAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BrokerAuth({})", self.mechanism())
    }
}

// ---------------------------------------------------------------------------
// 2. Raw YAML shape
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawConfig {
    sync: RawSync,
    directory: RawDirectory,
    broker: RawBroker,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawSync {
    direction: String,
    interval_seconds: Option<u64>,
    heartbeat_seconds: Option<u64>,
    agent_type: Option<String>,
    prefix_format: Option<PrefixFormat>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawDirectory {
    base_url: Option<String>,
    api_key: String,
    agent_id: String,
    middleware_id: String,
    timeout_seconds: Option<u64>,
    retry_count: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawBroker {
    bootstrap_servers: Vec<String>,
    auth: RawAuth,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawAuth {
    oauth: RawOAuth,
    iam: RawIam,
    plain: RawPlain,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawOAuth {
    token: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawIam {
    key: String,
    secret: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawPlain {
    username: String,
    password: String,
}

// ---------------------------------------------------------------------------
// 3. Environment overrides
// ---------------------------------------------------------------------------

fn override_string(slot: &mut String, var: &str, env: &dyn Fn(&str) -> Option<String>) {
    if let Some(value) = env(var) {
        *slot = value;
    }
}

fn override_optional<T: std::str::FromStr>(
    slot: &mut Option<T>,
    var: &str,
    env: &dyn Fn(&str) -> Option<String>,
) {
    if let Some(value) = env(var).and_then(|v| v.trim().parse().ok()) {
        *slot = Some(value);
    }
}

fn apply_env_overrides(raw: &mut RawConfig, env: &dyn Fn(&str) -> Option<String>) {
    override_string(&mut raw.sync.direction, "SYNC_DIRECTION", env);
    override_optional(&mut raw.sync.interval_seconds, "SYNC_INTERVALSECONDS", env);
    override_optional(&mut raw.sync.heartbeat_seconds, "SYNC_HEARTBEATSECONDS", env);
    override_optional(&mut raw.sync.agent_type, "SYNC_AGENTTYPE", env);

    override_optional(&mut raw.directory.base_url, "DIRECTORY_BASEURL", env);
    override_string(&mut raw.directory.api_key, "DIRECTORY_APIKEY", env);
    override_string(&mut raw.directory.agent_id, "DIRECTORY_AGENTID", env);
    override_string(&mut raw.directory.middleware_id, "DIRECTORY_MIDDLEWAREID", env);
    override_optional(
        &mut raw.directory.timeout_seconds,
        "DIRECTORY_TIMEOUTSECONDS",
        env,
    );
    override_optional(&mut raw.directory.retry_count, "DIRECTORY_RETRYCOUNT", env);

    if let Some(servers) = env("BROKER_BOOTSTRAPSERVERS") {
        raw.broker.bootstrap_servers = servers
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect();
    }
    let auth = &mut raw.broker.auth;
    override_string(&mut auth.oauth.token, "BROKER_AUTH_OAUTH_TOKEN", env);
    override_string(&mut auth.iam.key, "BROKER_AUTH_IAM_KEY", env);
    override_string(&mut auth.iam.secret, "BROKER_AUTH_IAM_SECRET", env);
    override_string(&mut auth.plain.username, "BROKER_AUTH_PLAIN_USERNAME", env);
    override_string(&mut auth.plain.password, "BROKER_AUTH_PLAIN_PASSWORD", env);
}

// ---------------------------------------------------------------------------
// 4. Validation
// ---------------------------------------------------------------------------

fn required(path: &Path, key: &'static str, value: &str) -> Result<String, ConfigError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ConfigError::MissingKey {
            path: path.to_path_buf(),
            key,
        });
    }
    Ok(value.to_owned())
}

fn seconds(
    path: &Path,
    key: &'static str,
    value: Option<u64>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match value {
        None => Ok(default),
        Some(0) => Err(ConfigError::InvalidValue {
            path: path.to_path_buf(),
            key,
            reason: "must be greater than zero".to_string(),
        }),
        Some(secs) => Ok(Duration::from_secs(secs)),
    }
}

fn validate(path: &Path, raw: RawConfig) -> Result<SystemConfig, ConfigError> {
    let direction_raw = required(path, "sync.direction", &raw.sync.direction)?;
    let direction = direction_raw
        .parse::<SyncDirection>()
        .map_err(|value| ConfigError::InvalidDirection {
            path: path.to_path_buf(),
            value,
        })?;

    let prefix_format = raw.sync.prefix_format.unwrap_or_default();
    if !prefix_format.is_satisfiable() {
        return Err(ConfigError::InvalidValue {
            path: path.to_path_buf(),
            key: "sync.prefixFormat",
            reason: format!(
                "length {} cannot hold start '{}' and end '{}'",
                prefix_format.length, prefix_format.start, prefix_format.end
            ),
        });
    }

    let base_url = raw
        .directory
        .base_url
        .as_deref()
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .unwrap_or(DEFAULT_BASE_URL)
        .trim_end_matches('/')
        .to_owned();

    let directory = DirectoryConfig {
        base_url,
        api_key: required(path, "directory.apiKey", &raw.directory.api_key)?,
        agent_id: required(path, "directory.agentId", &raw.directory.agent_id)?,
        middleware_id: required(path, "directory.middlewareId", &raw.directory.middleware_id)?,
        timeout: seconds(
            path,
            "directory.timeoutSeconds",
            raw.directory.timeout_seconds,
            DEFAULT_REQUEST_TIMEOUT,
        )?,
        retry_count: raw.directory.retry_count.unwrap_or(DEFAULT_RETRY_COUNT),
    };

    let bootstrap_servers: Vec<String> = raw
        .broker
        .bootstrap_servers
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect();
    if bootstrap_servers.is_empty() {
        return Err(ConfigError::MissingKey {
            path: path.to_path_buf(),
            key: "broker.bootstrapServers",
        });
    }

    Ok(SystemConfig {
        source: path.to_path_buf(),
        direction,
        sync_interval: seconds(
            path,
            "sync.intervalSeconds",
            raw.sync.interval_seconds,
            DEFAULT_SYNC_INTERVAL,
        )?,
        heartbeat_interval: seconds(
            path,
            "sync.heartbeatSeconds",
            raw.sync.heartbeat_seconds,
            DEFAULT_HEARTBEAT_INTERVAL,
        )?,
        agent_type: raw
            .sync
            .agent_type
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_AGENT_TYPE.to_string()),
        prefix_format,
        directory,
        broker: BrokerConfig {
            bootstrap_servers,
            auth: BrokerAuth::select(&raw.broker.auth),
        },
    })
}

// ---------------------------------------------------------------------------
// 5. Load
// ---------------------------------------------------------------------------

/// Parse and validate one configuration unit with an explicit env lookup.
pub fn load_system_config_with_env(
    path: &Path,
    env: &dyn Fn(&str) -> Option<String>,
) -> Result<SystemConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    // An empty file deserializes to nothing; treat it as an empty mapping.
    let mut raw: RawConfig = if contents.trim().is_empty() {
        RawConfig::default()
    } else {
        serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?
    };
    apply_env_overrides(&mut raw, env);
    validate(path, raw)
}

/// `load_system_config_with_env` using the process environment.
pub fn load_system_config(path: &Path) -> Result<SystemConfig, ConfigError> {
    load_system_config_with_env(path, &|key| std::env::var(key).ok())
}

// ---------------------------------------------------------------------------
// 6. Discovery
// ---------------------------------------------------------------------------

fn is_config_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"))
            .unwrap_or(false)
}

/// Every `*.yaml` / `*.yml` file directly inside `dir`, sorted. May be empty.
pub fn list_config_files(dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|e| io_err(dir, e))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| is_config_file(path))
        .collect();
    files.sort();
    Ok(files)
}

/// Resolve the startup argument into configuration units.
///
/// A file yields itself; a directory yields its configuration files and must
/// contain at least one.
pub fn discover(path: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let meta = match std::fs::metadata(path) {
        Ok(meta) => meta,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            })
        }
        Err(err) => return Err(io_err(path, err)),
    };

    if !meta.is_dir() {
        return Ok(vec![path.to_path_buf()]);
    }

    let files = list_config_files(path)?;
    if files.is_empty() {
        return Err(ConfigError::Empty {
            path: path.to_path_buf(),
        });
    }
    Ok(files)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
