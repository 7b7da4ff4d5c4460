//! Resolved cluster configuration.
//!
//! A [`ClusterConfig`] is built once per orchestration run (from
//! `localnet.toml`, environment overrides and CLI flags) and is read-only
//! afterwards. Every field has a default so a partial TOML file is valid.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// The services the orchestrator manages, in start-up order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceKind {
    Emulator,
    Database,
    QueryNode,
    Indexer,
    AppServer,
}

impl ServiceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::Emulator => "emulator",
            ServiceKind::Database => "database",
            ServiceKind::QueryNode => "query-node",
            ServiceKind::Indexer => "indexer",
            ServiceKind::AppServer => "app-server",
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logging verbosity for the orchestrator and the output it forwards from
/// child services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}

/// A plain `host:port` endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

impl ServerConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// `http://host:port` for HTTP control endpoints.
    pub fn http_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// `ws://host:port` for websocket endpoints.
    pub fn ws_url(&self) -> String {
        format!("ws://{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub dbname: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: 5433,
            user: "localnet".to_string(),
            password: "localnet".to_string(),
            dbname: "localnet".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    pub host: String,
    pub port: u16,
    /// Credentials for the indexer's control API, passed as `--server-api`.
    pub control_api_token: String,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: 10000,
            control_api_token: "localnet:localnet".to_string(),
        }
    }
}

impl IndexerConfig {
    pub fn endpoint(&self) -> ServerConfig {
        ServerConfig::new(self.host.clone(), self.port)
    }
}

/// Knobs forwarded verbatim to the emulator's start request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterParams {
    /// Slot length in seconds.
    pub slot_length: Option<f64>,
    /// Epoch size in slots.
    pub epoch_size: Option<u64>,
}

/// How to invoke one external executable: the program plus any leading
/// arguments placed before the orchestrator's own flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Executables for every external collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Binaries {
    pub emulator: CommandSpec,
    pub database_server: CommandSpec,
    pub initdb: CommandSpec,
    pub psql: CommandSpec,
    pub createdb: CommandSpec,
    pub query_node: CommandSpec,
    pub indexer: CommandSpec,
    pub app_server: CommandSpec,
}

impl Default for Binaries {
    fn default() -> Self {
        Self {
            emulator: CommandSpec::new("plutip-server"),
            database_server: CommandSpec::new("postgres"),
            initdb: CommandSpec::new("initdb"),
            psql: CommandSpec::new("psql"),
            createdb: CommandSpec::new("createdb"),
            query_node: CommandSpec::new("ogmios"),
            indexer: CommandSpec::new("ogmios-datum-cache"),
            app_server: CommandSpec::new("ctl-server"),
        }
    }
}

impl Binaries {
    /// Point every collaborator at one multiplexing executable, passing the
    /// role as its first argument (`<program> emulator -p 8082`, ...).
    pub fn all_from(program: impl Into<String>) -> Self {
        let program = program.into();
        let role = |name: &str| CommandSpec::with_args(program.clone(), [name]);
        Self {
            emulator: role("emulator"),
            database_server: role("database"),
            initdb: role("initdb"),
            psql: role("psql"),
            createdb: role("createdb"),
            query_node: role("query-node"),
            indexer: role("indexer"),
            app_server: role("app-server"),
        }
    }
}

/// One service's claim on a TCP port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortClaim {
    pub service: ServiceKind,
    pub host: String,
    pub port: u16,
}

impl fmt::Display for PortClaim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}:{})", self.service, self.host, self.port)
    }
}

/// Fully-resolved configuration for one orchestration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub emulator: ServerConfig,
    pub database: DatabaseConfig,
    pub query_node: ServerConfig,
    pub indexer: IndexerConfig,
    /// The application server is optional; `None` skips it entirely.
    pub app_server: Option<ServerConfig>,
    pub log_level: LogLevel,
    pub cluster_params: ClusterParams,
    pub binaries: Binaries,
    /// Upper bound on a single log-line readiness wait, in seconds.
    pub readiness_timeout_secs: Option<u64>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            emulator: ServerConfig::new("127.0.0.1", 8082),
            database: DatabaseConfig::default(),
            query_node: ServerConfig::new("127.0.0.1", 1338),
            indexer: IndexerConfig::default(),
            app_server: Some(ServerConfig::new("127.0.0.1", 8081)),
            log_level: LogLevel::default(),
            cluster_params: ClusterParams::default(),
            binaries: Binaries::default(),
            readiness_timeout_secs: Some(120),
        }
    }
}

impl ClusterConfig {
    /// Every port a managed service will listen on, in start-up order.
    pub fn port_claims(&self) -> Vec<PortClaim> {
        let mut claims = vec![
            PortClaim {
                service: ServiceKind::Emulator,
                host: self.emulator.host.clone(),
                port: self.emulator.port,
            },
            PortClaim {
                service: ServiceKind::Database,
                host: self.database.host.clone(),
                port: self.database.port,
            },
            PortClaim {
                service: ServiceKind::QueryNode,
                host: self.query_node.host.clone(),
                port: self.query_node.port,
            },
            PortClaim {
                service: ServiceKind::Indexer,
                host: self.indexer.host.clone(),
                port: self.indexer.port,
            },
        ];
        if let Some(app) = &self.app_server {
            claims.push(PortClaim {
                service: ServiceKind::AppServer,
                host: app.host.clone(),
                port: app.port,
            });
        }
        claims
    }

    pub fn readiness_timeout(&self) -> Option<Duration> {
        self.readiness_timeout_secs.map(Duration::from_secs)
    }
}
