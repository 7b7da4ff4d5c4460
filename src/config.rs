//! Loading `localnet.toml` and applying `LOCALNET_*` overrides.
//!
//! A missing file means defaults. Environment variables win over the file,
//! and CLI flags (applied by the caller) win over both. The application
//! server is on by default; `LOCALNET_APP_SERVER_PORT=off` or
//! `--no-app-server` turns it off.

use anyhow::{Context, Result, bail};
use localnet_common::{ClusterConfig, LogLevel, ServerConfig};
use std::collections::HashSet;
use std::path::Path;

pub const CONFIG_FILE: &str = "localnet.toml";

/// Load configuration from a TOML file.
pub fn load(path: &Path) -> Result<ClusterConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse(&content).with_context(|| format!("Invalid config file: {}", path.display()))
}

/// Parse configuration from a TOML string.
pub fn parse(content: &str) -> Result<ClusterConfig> {
    toml::from_str(content).context("Failed to parse localnet.toml")
}

/// Load `localnet.toml` from `dir`, or defaults if there is none.
pub fn load_or_default(dir: &Path) -> Result<ClusterConfig> {
    let path = dir.join(CONFIG_FILE);
    if path.exists() {
        load(&path)
    } else {
        tracing::debug!(dir = %dir.display(), "no {CONFIG_FILE}, using defaults");
        Ok(ClusterConfig::default())
    }
}

/// Write configuration as TOML.
pub fn save(config: &ClusterConfig, path: &Path) -> Result<()> {
    let content = render(config)?;
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write config file: {}", path.display()))?;
    Ok(())
}

pub fn render(config: &ClusterConfig) -> Result<String> {
    toml::to_string_pretty(config).context("Failed to serialize localnet.toml")
}

fn parse_port(var: &str, value: &str) -> Result<u16> {
    value
        .trim()
        .parse::<u16>()
        .with_context(|| format!("{var} must be a port number, got '{value}'"))
}

/// Apply `LOCALNET_*` overrides. `lookup` is `std::env::var` in production
/// and a map in tests.
pub fn apply_env_overrides<F>(config: &mut ClusterConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(level) = lookup("LOCALNET_LOG_LEVEL") {
        config.log_level = level
            .parse::<LogLevel>()
            .map_err(|err| anyhow::anyhow!("LOCALNET_LOG_LEVEL: {err}"))?;
    }
    if let Some(port) = lookup("LOCALNET_EMULATOR_PORT") {
        config.emulator.port = parse_port("LOCALNET_EMULATOR_PORT", &port)?;
    }
    if let Some(port) = lookup("LOCALNET_DATABASE_PORT") {
        config.database.port = parse_port("LOCALNET_DATABASE_PORT", &port)?;
    }
    if let Some(port) = lookup("LOCALNET_QUERY_NODE_PORT") {
        config.query_node.port = parse_port("LOCALNET_QUERY_NODE_PORT", &port)?;
    }
    if let Some(port) = lookup("LOCALNET_INDEXER_PORT") {
        config.indexer.port = parse_port("LOCALNET_INDEXER_PORT", &port)?;
    }
    if let Some(value) = lookup("LOCALNET_APP_SERVER_PORT") {
        config.app_server = match value.trim() {
            "" | "off" | "none" => None,
            port => {
                let port = parse_port("LOCALNET_APP_SERVER_PORT", port)?;
                let host = config
                    .app_server
                    .as_ref()
                    .map(|app| app.host.clone())
                    .unwrap_or_else(|| "127.0.0.1".to_string());
                Some(ServerConfig::new(host, port))
            }
        };
    }
    if let Some(secs) = lookup("LOCALNET_READINESS_TIMEOUT_SECS") {
        let secs = secs
            .trim()
            .parse::<u64>()
            .with_context(|| format!("LOCALNET_READINESS_TIMEOUT_SECS must be seconds, got '{secs}'"))?;
        config.readiness_timeout_secs = (secs > 0).then_some(secs);
    }
    Ok(())
}

/// Problems worth warning about that do not stop a run by themselves.
pub fn validate(config: &ClusterConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    let mut seen = HashSet::new();
    for claim in config.port_claims() {
        if !seen.insert(claim.port) {
            warnings.push(format!(
                "Port {} is configured for more than one service (again for {})",
                claim.port, claim.service
            ));
        }
        if claim.port == 0 {
            warnings.push(format!("{} has port 0", claim.service));
        }
    }

    if config.database.user.is_empty() || config.database.dbname.is_empty() {
        warnings.push("database.user and database.dbname must not be empty".to_string());
    }

    warnings
}

/// Resolve the effective configuration: an explicit file (which must
/// exist) or `localnet.toml` in `dir`, then environment overrides.
pub fn resolve(explicit: Option<&Path>, dir: &Path) -> Result<ClusterConfig> {
    let mut config = match explicit {
        Some(path) => {
            if !path.exists() {
                bail!("Config file not found: {}", path.display());
            }
            load(path)?
        }
        None => load_or_default(dir)?,
    };
    apply_env_overrides(&mut config, |var| std::env::var(var).ok())?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn missing_file_means_defaults() {
        let dir = tempdir().unwrap();
        let config = load_or_default(dir.path()).unwrap();
        assert_eq!(config, ClusterConfig::default());
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            r#"
log_level = "debug"

[emulator]
port = 9000

[database]
dbname = "ctxlib"
"#,
        )
        .unwrap();

        let config = load_or_default(dir.path()).unwrap();
        assert_eq!(config.emulator, ServerConfig::new("127.0.0.1", 9000));
        assert_eq!(config.database.dbname, "ctxlib");
        assert_eq!(config.database.port, 5433);
        assert_eq!(config.log_level, LogLevel::Debug);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "[emulator\nport = 1").unwrap();
        let err = load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("Invalid config file"));
    }

    #[test]
    fn save_then_load_preserves_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        let mut config = ClusterConfig::default();
        config.app_server = Some(ServerConfig::new("127.0.0.1", 9081));
        config.cluster_params.epoch_size = Some(80);
        save(&config, &path).unwrap();
        assert_eq!(load(&path).unwrap(), config);
    }

    #[test]
    fn env_overrides_ports_and_level() {
        let mut config = ClusterConfig::default();
        apply_env_overrides(
            &mut config,
            env(&[
                ("LOCALNET_LOG_LEVEL", "warn"),
                ("LOCALNET_EMULATOR_PORT", "18082"),
                ("LOCALNET_INDEXER_PORT", "11000"),
                ("LOCALNET_READINESS_TIMEOUT_SECS", "0"),
            ]),
        )
        .unwrap();
        assert_eq!(config.log_level, LogLevel::Warn);
        assert_eq!(config.emulator.port, 18082);
        assert_eq!(config.indexer.port, 11000);
        assert_eq!(config.database.port, 5433);
        assert_eq!(config.readiness_timeout_secs, None);
    }

    #[test]
    fn app_server_can_be_disabled_or_moved() {
        let mut config = ClusterConfig::default();
        apply_env_overrides(&mut config, env(&[("LOCALNET_APP_SERVER_PORT", "off")])).unwrap();
        assert_eq!(config.app_server, None);

        apply_env_overrides(&mut config, env(&[("LOCALNET_APP_SERVER_PORT", "9081")])).unwrap();
        assert_eq!(config.app_server, Some(ServerConfig::new("127.0.0.1", 9081)));
    }

    #[test]
    fn bad_env_values_are_rejected() {
        let mut config = ClusterConfig::default();
        let err = apply_env_overrides(&mut config, env(&[("LOCALNET_DATABASE_PORT", "lots")]))
            .unwrap_err();
        assert!(err.to_string().contains("LOCALNET_DATABASE_PORT"));

        let err = apply_env_overrides(&mut config, env(&[("LOCALNET_LOG_LEVEL", "loud")]))
            .unwrap_err();
        assert!(err.to_string().contains("LOCALNET_LOG_LEVEL"));
    }

    #[test]
    fn validate_flags_duplicate_ports() {
        let mut config = ClusterConfig::default();
        assert!(validate(&config).is_empty());
        config.indexer.port = config.emulator.port;
        let warnings = validate(&config);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("indexer"));
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempdir().unwrap();
        let err = resolve(Some(&dir.path().join("nope.toml")), dir.path()).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
