//! Service configuration loading from file and environment variables.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use s2s_dialback::{generate_secret, DialbackSettings, PolicyChecker};
use s2s_types::{ParseError, PeerPolicy, DEFAULT_S2S_PORT};
use serde::Deserialize;
use thiserror::Error;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub dialback: DialbackConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    /// Where the HTTP status API listens.
    #[serde(default)]
    pub status: StatusConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// The `[dialback]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DialbackConfig {
    /// Shared secret for key derivation. A random one is generated per start
    /// when absent, which only works while a single instance serves a domain.
    pub secret: Option<String>,
    pub allow_legacy: bool,
    pub idle_timeout_secs: u64,
    pub queue_timeout_secs: u64,
    /// Defaults to `idle_timeout_secs`.
    pub auth_timeout_secs: Option<u64>,
    pub connect_timeout_secs: u64,
    pub default_port: u16,
    pub hosts: Vec<HostConfig>,
    pub listeners: Vec<ListenerConfig>,
}

impl Default for DialbackConfig {
    fn default() -> Self {
        Self {
            secret: None,
            allow_legacy: false,
            idle_timeout_secs: 900,
            queue_timeout_secs: 30,
            auth_timeout_secs: None,
            connect_timeout_secs: 20,
            default_port: DEFAULT_S2S_PORT,
            hosts: Vec::new(),
            listeners: Vec::new(),
        }
    }
}

/// One `[[dialback.hosts]]` policy row. Omitted options take the built-in
/// defaults (TLS optional, any auth mechanism, XMPP 1.0 allowed).
#[derive(Debug, Clone, Deserialize)]
pub struct HostConfig {
    /// Peer domain, or `"*"` for the default row.
    pub name: String,
    pub tls: Option<String>,
    pub auth: Option<String>,
    pub xmpp: Option<String>,
}

impl HostConfig {
    /// Parses the row into a policy value.
    ///
    /// # Errors
    ///
    /// Returns the first option that is not a recognized value.
    pub fn policy(&self) -> Result<PeerPolicy, ParseError> {
        let mut policy = PeerPolicy::default();
        if let Some(tls) = &self.tls {
            policy.tls = tls.parse()?;
        }
        if let Some(auth) = &self.auth {
            policy.auth = auth.parse()?;
        }
        if let Some(xmpp) = &self.xmpp {
            policy.xmpp = xmpp.parse()?;
        }
        Ok(policy)
    }
}

/// One `[[dialback.listeners]]` entry. The stream layer binds these; the
/// values are carried through unchanged.
#[derive(Debug, Clone, Deserialize)]
pub struct ListenerConfig {
    #[serde(default = "default_listen_address")]
    pub address: IpAddr,
    #[serde(default = "default_s2s_port")]
    pub port: u16,
    pub rate: Option<RateConfig>,
    pub karma: Option<KarmaConfig>,
}

/// Connection-rate limit: at most `points` connects per `time_secs` per address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RateConfig {
    pub points: u32,
    pub time_secs: u64,
}

/// Read-throttling parameters for the stream layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct KarmaConfig {
    pub initial: i32,
    pub max: i32,
    pub increment: i32,
    pub decrement: i32,
    pub restore: i32,
    pub penalty: i32,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    /// Busy timeout (milliseconds) applied to each SQLite connection.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Maximum number of pooled SQLite connections.
    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
}

/// Network configuration for the status API.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusConfig {
    #[serde(default = "default_status_host")]
    pub host: IpAddr,

    #[serde(default = "default_status_port")]
    pub port: u16,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "s2s_dialback=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_listen_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_s2s_port() -> u16 {
    DEFAULT_S2S_PORT
}

fn default_db_path() -> String {
    "s2s.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_pool_max_size() -> u32 {
    8
}

fn default_status_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_status_port() -> u16 {
    5280
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
        }
    }
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            host: default_status_host(),
            port: default_status_port(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl DialbackConfig {
    /// Builds the core settings. Generates a secret when none is configured.
    pub fn settings(&self) -> DialbackSettings {
        let secret = match &self.secret {
            Some(secret) if !secret.is_empty() => secret.clone(),
            _ => {
                tracing::warn!("no dialback secret configured, generated a random one");
                generate_secret()
            }
        };
        DialbackSettings {
            secret,
            allow_legacy: self.allow_legacy,
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            queue_timeout: Duration::from_secs(self.queue_timeout_secs),
            auth_timeout: Duration::from_secs(
                self.auth_timeout_secs.unwrap_or(self.idle_timeout_secs),
            ),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            default_port: self.default_port,
        }
    }

    /// Builds the policy table from the `hosts` rows.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Policy` naming the first row with an invalid option.
    pub fn policy(&self) -> Result<PolicyChecker, ConfigError> {
        let mut checker = PolicyChecker::new();
        for host in &self.hosts {
            let policy = host.policy().map_err(|source| ConfigError::Policy {
                host: host.name.clone(),
                source,
            })?;
            checker.insert(&host.name, policy);
        }
        Ok(checker)
    }
}

impl Config {
    /// Socket address of the status API.
    pub fn status_addr(&self) -> SocketAddr {
        SocketAddr::new(self.status.host, self.status.port)
    }

    pub fn db_settings(&self) -> s2s_db::DbRuntimeSettings {
        s2s_db::DbRuntimeSettings {
            busy_timeout_ms: self.database.busy_timeout_ms,
            pool_max_size: self.database.pool_max_size,
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// A `[[dialback.hosts]]` row holds an unknown option value.
    #[error("invalid policy for host '{host}': {source}")]
    Policy { host: String, source: ParseError },
}

/// Picks the config path: explicit argument, then `S2S_CONFIG_PATH`, then
/// `config.toml`. Also returns where the choice came from, for logging.
pub fn resolve_config_path(cli_arg: Option<String>) -> (String, &'static str) {
    if let Some(path) = cli_arg.filter(|value| !value.trim().is_empty()) {
        return (path, "cli-arg");
    }

    if let Ok(path) = std::env::var("S2S_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (path, "env-var");
        }
    }

    ("config.toml".to_string(), "default")
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `S2S_SECRET` overrides `dialback.secret`
/// - `S2S_IDLE_TIMEOUT_SECS`, `S2S_QUEUE_TIMEOUT_SECS`, `S2S_AUTH_TIMEOUT_SECS`
///   and `S2S_CONNECT_TIMEOUT_SECS` override the matching `dialback` timeouts
/// - `S2S_DB_PATH` overrides `database.path`
/// - `S2S_STATUS_HOST` and `S2S_STATUS_PORT` override `status`
/// - `S2S_LOG_LEVEL` overrides `logging.level`
/// - `S2S_LOG_JSON` overrides `logging.json` (set to "true" to enable)
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed, or
/// if a host policy row is invalid.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_overrides(&mut config, |name| std::env::var(name).ok());
    config.dialback.policy()?;

    Ok(config)
}

/// Applies `S2S_*` overrides read through `lookup`. Unparseable numeric
/// values are ignored.
pub fn apply_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    fn parsed<T: std::str::FromStr>(value: Option<String>) -> Option<T> {
        value.and_then(|v| v.trim().parse().ok())
    }

    if let Some(secret) = lookup("S2S_SECRET") {
        config.dialback.secret = Some(secret);
    }
    if let Some(secs) = parsed(lookup("S2S_IDLE_TIMEOUT_SECS")) {
        config.dialback.idle_timeout_secs = secs;
    }
    if let Some(secs) = parsed(lookup("S2S_QUEUE_TIMEOUT_SECS")) {
        config.dialback.queue_timeout_secs = secs;
    }
    if let Some(secs) = parsed(lookup("S2S_AUTH_TIMEOUT_SECS")) {
        config.dialback.auth_timeout_secs = Some(secs);
    }
    if let Some(secs) = parsed(lookup("S2S_CONNECT_TIMEOUT_SECS")) {
        config.dialback.connect_timeout_secs = secs;
    }
    if let Some(db_path) = lookup("S2S_DB_PATH") {
        config.database.path = db_path;
    }
    if let Some(host) = parsed(lookup("S2S_STATUS_HOST")) {
        config.status.host = host;
    }
    if let Some(port) = parsed(lookup("S2S_STATUS_PORT")) {
        config.status.port = port;
    }
    if let Some(level) = lookup("S2S_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = lookup("S2S_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use s2s_types::{AuthRequirement, ProtectionLevel, TlsRequirement, XmppRequirement};
    use std::collections::HashMap;
    use std::io::Write;

    const FULL: &str = r#"
[dialback]
secret = "s3cr3t"
allow_legacy = true
idle_timeout_secs = 600
queue_timeout_secs = 10
connect_timeout_secs = 5

[[dialback.hosts]]
name = "*"
tls = "force"

[[dialback.hosts]]
name = "legacy.example"
tls = "no"
auth = "db"
xmpp = "no"

[[dialback.listeners]]
port = 5269
rate = { points = 5, time_secs = 25 }
karma = { initial = 5, max = 10, increment = 1, decrement = 0, restore = 5, penalty = -5 }

[database]
path = "federation.db"

[status]
port = 8080

[logging]
level = "debug"
json = true
"#;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("should create temp file");
        file.write_all(contents.as_bytes())
            .expect("should write config");
        file
    }

    #[test]
    fn missing_file_uses_defaults() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let path = dir.path().join("absent.toml");
        let config = load_config(path.to_str()).expect("missing file should not be an error");

        assert_eq!(config.dialback.idle_timeout_secs, 900);
        assert_eq!(config.dialback.queue_timeout_secs, 30);
        assert_eq!(config.dialback.default_port, 5269);
        assert_eq!(config.status.port, 5280);
    }

    #[test]
    fn parses_full_file() {
        let file = write_config(FULL);
        let config: Config = toml::from_str(
            &std::fs::read_to_string(file.path()).expect("should read config"),
        )
        .expect("should parse");

        assert_eq!(config.dialback.secret.as_deref(), Some("s3cr3t"));
        assert!(config.dialback.allow_legacy);
        assert_eq!(config.dialback.hosts.len(), 2);
        assert_eq!(config.dialback.listeners.len(), 1);
        let listener = &config.dialback.listeners[0];
        assert_eq!(listener.address, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(
            listener.rate,
            Some(RateConfig {
                points: 5,
                time_secs: 25
            })
        );
        assert_eq!(listener.karma.map(|k| k.penalty), Some(-5));
        assert_eq!(config.database.path, "federation.db");
        assert_eq!(config.database.pool_max_size, 8);
        assert_eq!(config.status.port, 8080);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
    }

    #[test]
    fn settings_default_auth_timeout_to_idle_timeout() {
        let file = write_config(FULL);
        let config: Config = toml::from_str(
            &std::fs::read_to_string(file.path()).expect("should read config"),
        )
        .expect("should parse");
        let settings = config.dialback.settings();

        assert_eq!(settings.secret, "s3cr3t");
        assert_eq!(settings.idle_timeout, Duration::from_secs(600));
        assert_eq!(settings.auth_timeout, Duration::from_secs(600));
        assert_eq!(settings.queue_timeout, Duration::from_secs(10));
        assert_eq!(settings.connect_timeout, Duration::from_secs(5));
    }

    #[test]
    fn absent_secret_is_generated() {
        let settings = DialbackConfig::default().settings();
        assert_eq!(settings.secret.len(), 40);
    }

    #[test]
    fn host_rows_become_policy() {
        let file = write_config(FULL);
        let config: Config = toml::from_str(
            &std::fs::read_to_string(file.path()).expect("should read config"),
        )
        .expect("should parse");
        let checker = config.dialback.policy().expect("policy should be valid");

        let default = checker.lookup("other.example");
        assert_eq!(
            default.tls,
            TlsRequirement::Minimum(ProtectionLevel::ENCRYPTED)
        );

        let legacy = checker.lookup("chat.legacy.example");
        assert_eq!(legacy.tls, TlsRequirement::Disabled);
        assert_eq!(legacy.auth, AuthRequirement::DialbackOnly);
        assert_eq!(legacy.xmpp, XmppRequirement::Disabled);
    }

    #[test]
    fn invalid_policy_names_the_host() {
        let file = write_config(
            r#"
[[dialback.hosts]]
name = "bad.example"
tls = "sometimes"
"#,
        );
        let err = load_config(file.path().to_str()).expect_err("should reject policy");
        match err {
            ConfigError::Policy { host, .. } => assert_eq!(host, "bad.example"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn malformed_toml_is_parse_error() {
        let file = write_config("[dialback\nsecret = ");
        let err = load_config(file.path().to_str()).expect_err("should fail to parse");
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn overrides_replace_file_values() {
        let vars: HashMap<&str, &str> = [
            ("S2S_SECRET", "from-env"),
            ("S2S_IDLE_TIMEOUT_SECS", "120"),
            ("S2S_AUTH_TIMEOUT_SECS", "45"),
            ("S2S_QUEUE_TIMEOUT_SECS", "not-a-number"),
            ("S2S_DB_PATH", "/tmp/s2s.db"),
            ("S2S_STATUS_HOST", "0.0.0.0"),
            ("S2S_STATUS_PORT", "9000"),
            ("S2S_LOG_LEVEL", "warn"),
            ("S2S_LOG_JSON", "1"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        apply_overrides(&mut config, |name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(config.dialback.secret.as_deref(), Some("from-env"));
        assert_eq!(config.dialback.idle_timeout_secs, 120);
        assert_eq!(config.dialback.auth_timeout_secs, Some(45));
        assert_eq!(config.dialback.queue_timeout_secs, 30);
        assert_eq!(config.database.path, "/tmp/s2s.db");
        assert_eq!(config.status.host, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(config.status.port, 9000);
        assert_eq!(config.logging.level, "warn");
        assert!(config.logging.json);
    }

    #[test]
    fn explicit_path_wins() {
        let (path, source) = resolve_config_path(Some("custom.toml".to_string()));
        assert_eq!(path, "custom.toml");
        assert_eq!(source, "cli-arg");
    }
}
