//! Launchers for each external service.
//!
//! Every `start` function returns a process that is already Ready; the
//! caller owns it and stops it with [`crate::lifecycle::stop_managed`]. If a
//! launcher fails after spawning, it stops its own process before returning
//! so a half-started service never outlives the error.

pub mod app_server;
pub mod database;
pub mod emulator;
pub mod indexer;
pub mod query_node;

use crate::errors::HarnessError;
use crate::lifecycle::stop_managed;
use crate::process::{ManagedProcess, ReadinessPredicate, wait_until_ready};
use crate::retry::RetryPolicy;
use localnet_common::{CommandSpec, ServerConfig, ServiceKind};
use std::time::Duration;

/// Stop a process whose start-up failed and decide which error to report.
/// An exit observed here is the more precise cause.
pub(crate) async fn abandon(
    mut process: ManagedProcess,
    policy: &RetryPolicy,
    cause: HarnessError,
) -> HarnessError {
    let service = process.service();
    let exited = process.try_exit_status();
    if let Err(err) = stop_managed(process, *policy).await {
        tracing::warn!(%service, error = %err, "cleanup after failed start failed");
    }
    match (exited, cause) {
        (_, cause @ HarnessError::ProcessExitedEarly { .. }) => cause,
        (Some(status), cause) => {
            tracing::debug!(%service, %cause, "process had already exited");
            HarnessError::ProcessExitedEarly {
                service,
                status: status.to_string(),
            }
        }
        (None, cause) => cause,
    }
}

/// Spawn a service and block until its output satisfies `predicate`.
pub(crate) async fn spawn_until_ready(
    service: ServiceKind,
    spec: &CommandSpec,
    args: &[String],
    endpoint: ServerConfig,
    predicate: &ReadinessPredicate,
    limit: Option<Duration>,
    policy: &RetryPolicy,
) -> Result<ManagedProcess, HarnessError> {
    let mut process = ManagedProcess::spawn(service, spec, args, Some(endpoint))?;
    match wait_until_ready(&mut process, predicate, limit).await {
        Ok(()) => Ok(process),
        Err(err) => Err(abandon(process, policy, err).await),
    }
}

/// `["--flag", "value", ...]` from pairs.
pub(crate) fn flags<I, V>(pairs: I) -> Vec<String>
where
    I: IntoIterator<Item = (&'static str, V)>,
    V: ToString,
{
    pairs
        .into_iter()
        .flat_map(|(flag, value)| [flag.to_string(), value.to_string()])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::ephemeral_port;

    #[test]
    fn flags_interleave_names_and_values() {
        assert_eq!(
            flags([("--host", "127.0.0.1".to_string()), ("--port", "1338".to_string())]),
            vec!["--host", "127.0.0.1", "--port", "1338"]
        );
    }

    #[tokio::test]
    async fn exit_during_readiness_is_reported_as_exited_early() {
        let port = ephemeral_port().unwrap();
        let err = spawn_until_ready(
            ServiceKind::Indexer,
            &CommandSpec::with_args("sh", ["-c"]),
            &["echo 'connecting to database'; exit 1".to_string()],
            ServerConfig::new("127.0.0.1", port),
            &ReadinessPredicate::contains("Intersection found"),
            Some(Duration::from_secs(5)),
            &RetryPolicy::DEFAULT,
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            HarnessError::ProcessExitedEarly {
                service: ServiceKind::Indexer,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn timeout_stops_the_silent_process() {
        let port = ephemeral_port().unwrap();
        let err = spawn_until_ready(
            ServiceKind::AppServer,
            &CommandSpec::new("sleep"),
            &["30".to_string()],
            ServerConfig::new("127.0.0.1", port),
            &ReadinessPredicate::AnyLine,
            Some(Duration::from_millis(200)),
            &RetryPolicy::DEFAULT,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, HarnessError::ReadinessTimeout { .. }));
    }
}
