//! Database service: a throwaway cluster initialised in the run's working
//! directory, then provisioned with the configured role and database.

use super::{abandon, flags};
use crate::errors::HarnessError;
use crate::process::{ManagedProcess, run_to_completion};
use crate::retry::{RetryPolicy, retry_or_give_up};
use anyhow::Context;
use localnet_common::{ClusterConfig, DatabaseConfig, ServerConfig, ServiceKind};
use std::path::{Path, PathBuf};

/// Superuser created by `initdb`; used only to provision the real role.
const BOOTSTRAP_USER: &str = "postgres";

/// Filesystem layout of one database instance.
#[derive(Debug, Clone)]
pub struct DatabaseDirs {
    pub data: PathBuf,
    pub sockets: PathBuf,
}

impl DatabaseDirs {
    pub fn under(workdir: &Path) -> Self {
        let root = workdir.join("database");
        Self {
            data: root.join("data"),
            sockets: root.join("sockets"),
        }
    }
}

/// Quote `value` as a SQL string literal.
fn sql_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Quote `value` as a SQL identifier.
fn sql_identifier(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

fn create_role_statement(db: &DatabaseConfig) -> String {
    format!(
        "CREATE ROLE {} WITH LOGIN SUPERUSER CREATEDB PASSWORD {};",
        sql_identifier(&db.user),
        sql_literal(&db.password)
    )
}

fn psql_args(dirs: &DatabaseDirs, db: &DatabaseConfig, sql: &str) -> Vec<String> {
    let mut args = flags([
        ("-h", dirs.sockets.display().to_string()),
        ("-p", db.port.to_string()),
        ("-U", BOOTSTRAP_USER.to_string()),
        ("-d", "postgres".to_string()),
        ("-c", sql.to_string()),
    ]);
    args.push("-q".to_string());
    args
}

/// Initialise, start, probe and provision the database.
pub async fn start(
    config: &ClusterConfig,
    workdir: &Path,
    policy: &RetryPolicy,
) -> Result<ManagedProcess, HarnessError> {
    let db = &config.database;
    let binaries = &config.binaries;
    let dirs = DatabaseDirs::under(workdir);
    tokio::fs::create_dir_all(&dirs.sockets)
        .await
        .with_context(|| format!("Failed to create {}", dirs.sockets.display()))?;

    run_to_completion(
        ServiceKind::Database,
        &binaries.initdb,
        &[
            "-D".to_string(),
            dirs.data.display().to_string(),
            "--locale=C".to_string(),
            "--encoding=UTF8".to_string(),
            "-U".to_string(),
            BOOTSTRAP_USER.to_string(),
        ],
    )
    .await?;

    let args = flags([
        ("-D", dirs.data.display().to_string()),
        ("-p", db.port.to_string()),
        ("-h", db.host.clone()),
        ("-k", dirs.sockets.display().to_string()),
    ]);
    let mut process = ManagedProcess::spawn(
        ServiceKind::Database,
        &binaries.database_server,
        &args,
        Some(ServerConfig::new(db.host.clone(), db.port)),
    )?;
    process.forward_output();

    match probe_and_provision(config, &dirs, policy).await {
        Ok(()) => Ok(process),
        Err(err) => Err(abandon(process, policy, err).await),
    }
}

async fn probe_and_provision(
    config: &ClusterConfig,
    dirs: &DatabaseDirs,
    policy: &RetryPolicy,
) -> Result<(), HarnessError> {
    let db = &config.database;
    let psql = &config.binaries.psql;

    let probe = psql_args(dirs, db, "SELECT 1");
    retry_or_give_up(
        policy,
        format!("database to accept connections on port {}", db.port),
        || run_to_completion(ServiceKind::Database, psql, &probe),
    )
    .await?;
    tracing::debug!(port = db.port, "database accepts connections");

    run_to_completion(
        ServiceKind::Database,
        psql,
        &psql_args(dirs, db, &create_role_statement(db)),
    )
    .await?;

    let mut createdb = flags([
        ("-h", dirs.sockets.display().to_string()),
        ("-p", db.port.to_string()),
        ("-U", db.user.clone()),
        ("-O", db.user.clone()),
    ]);
    createdb.push(db.dbname.clone());
    run_to_completion(ServiceKind::Database, &config.binaries.createdb, &createdb).await?;

    tracing::info!(user = %db.user, dbname = %db.dbname, "database provisioned");
    Ok(())
}
