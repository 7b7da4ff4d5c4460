//! Brings the whole topology up in dependency order, runs a body against
//! it, and tears everything down in reverse.
//!
//! emulator → cluster → database → query node → indexer → app server →
//! environment → body. Each step is pushed onto one [`CleanupStack`] as
//! soon as it is Ready, so a failure at any step unwinds exactly the steps
//! before it.

use crate::errors::HarnessError;
use crate::lifecycle::{CleanupStack, LifecycleObserver, stop_managed};
use crate::ports;
use crate::process::ManagedProcess;
use crate::retry::RetryPolicy;
use crate::runtime::RuntimeEnvironment;
use crate::services::{app_server, database, emulator, indexer, query_node};
use anyhow::Context;
use futures::FutureExt;
use localnet_common::{ClusterConfig, ServiceKind, StartClusterRequest, UtxoDistribution, Wallets};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use tracing::Instrument;
use uuid::Uuid;

/// Lifecycle name of the emulator's running cluster.
pub const CLUSTER: &str = "cluster";
/// Lifecycle name of the live connections handed to the body.
pub const ENVIRONMENT: &str = "environment";

/// Runs bodies against a freshly started cluster.
///
/// Children die with the run, with the host's `atexit`, or with a dropped
/// run future. SIGTERM and SIGHUP handling is left to the host; binaries
/// that want those signals to kill the cluster call
/// [`crate::process::safety_net::watch_termination_signals`].
pub struct ClusterOrchestrator {
    config: ClusterConfig,
    retry_policy: RetryPolicy,
    observer: Option<Arc<dyn LifecycleObserver>>,
}

impl ClusterOrchestrator {
    pub fn new(config: ClusterConfig) -> Self {
        Self {
            config,
            retry_policy: RetryPolicy::DEFAULT,
            observer: None,
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn LifecycleObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Run `body` against a freshly started cluster funded per
    /// `distribution`.
    ///
    /// Fails with [`HarnessError::PortConflict`] before spawning anything if
    /// a configured port is taken. Otherwise every started service is
    /// stopped before this returns, whatever the body did; a panicking body
    /// resumes its panic after teardown. The error returned is always the
    /// first fatal one.
    pub async fn run<B, Fut, T>(
        &self,
        distribution: UtxoDistribution,
        body: B,
    ) -> Result<T, HarnessError>
    where
        B: FnOnce(Arc<RuntimeEnvironment>, Wallets) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("localnet", %run_id);
        self.run_with_id(run_id, distribution, body)
            .instrument(span)
            .await
    }

    async fn run_with_id<B, Fut, T>(
        &self,
        run_id: Uuid,
        distribution: UtxoDistribution,
        body: B,
    ) -> Result<T, HarnessError>
    where
        B: FnOnce(Arc<RuntimeEnvironment>, Wallets) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        ports::preflight(&self.config)?;

        let workdir = tempfile::Builder::new()
            .prefix("localnet-")
            .tempdir()
            .context("Failed to create the run's working directory")?;
        tracing::debug!(workdir = %workdir.path().display(), "working directory created");

        let mut stack = match &self.observer {
            Some(observer) => CleanupStack::with_observer(observer.clone()),
            None => CleanupStack::new(),
        };
        let outcome = AssertUnwindSafe(self.bring_up_and_run(
            &mut stack,
            run_id,
            workdir.path(),
            distribution,
            body,
        ))
        .catch_unwind()
        .await;

        let result = stack.close(outcome).await;
        match &result {
            Ok(_) => tracing::info!("run finished, cluster torn down"),
            Err(err) => tracing::error!(error = %err, "run failed, cluster torn down"),
        }
        result
    }

    async fn bring_up_and_run<B, Fut, T>(
        &self,
        stack: &mut CleanupStack,
        run_id: Uuid,
        workdir: &Path,
        distribution: UtxoDistribution,
        body: B,
    ) -> Result<T, HarnessError>
    where
        B: FnOnce(Arc<RuntimeEnvironment>, Wallets) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let config = &self.config;
        let policy = self.retry_policy;

        let client = stack
            .acquire(
                ServiceKind::Emulator.as_str(),
                emulator::start(config, &policy),
                move |process: ManagedProcess| stop_managed(process, policy),
            )
            .await?;

        let request = StartClusterRequest::new(&distribution, &config.cluster_params);
        let cluster = stack
            .acquire(
                CLUSTER,
                async {
                    let success = emulator::start_cluster(&client, &request).await?;
                    Ok::<_, HarnessError>((client.clone(), success))
                },
                |client: emulator::EmulatorClient| async move { emulator::stop_cluster(&client).await },
            )
            .await?;
        let wallets = distribution
            .decode_wallets(&cluster.private_keys)
            .map_err(|source| HarnessError::KeyDecode { source })?;

        self.acquire_process(stack, ServiceKind::Database, database::start(config, workdir, &policy))
            .await?;
        self.acquire_process(
            stack,
            ServiceKind::QueryNode,
            query_node::start(config, &cluster, &policy),
        )
        .await?;
        self.acquire_process(stack, ServiceKind::Indexer, indexer::start(config, &policy))
            .await?;
        if let Some(endpoint) = &config.app_server {
            self.acquire_process(
                stack,
                ServiceKind::AppServer,
                app_server::start(config, endpoint, &policy),
            )
            .await?;
        }

        let env = stack
            .acquire(
                ENVIRONMENT,
                async {
                    let env = RuntimeEnvironment::connect(run_id, config.clone(), wallets.clone()).await?;
                    let env = Arc::new(env);
                    Ok::<_, HarnessError>((env.clone(), env))
                },
                |env: Arc<RuntimeEnvironment>| async move {
                    env.close().await;
                    Ok(())
                },
            )
            .await?;

        tracing::info!(wallets = wallets.len(), "cluster ready, running body");
        body(env, wallets).await.map_err(HarnessError::Body)
    }

    async fn acquire_process<F>(
        &self,
        stack: &mut CleanupStack,
        service: ServiceKind,
        start: F,
    ) -> Result<(), HarnessError>
    where
        F: Future<Output = Result<ManagedProcess, HarnessError>>,
    {
        let policy = self.retry_policy;
        stack
            .acquire(
                service.as_str(),
                async move { start.await.map(|process| (process, ())) },
                move |process: ManagedProcess| stop_managed(process, policy),
            )
            .await
    }
}
