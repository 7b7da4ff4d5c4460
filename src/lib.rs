//! Local test-cluster orchestrator.
//!
//! [`ClusterOrchestrator::run`] brings up a private ledger topology (chain
//! emulator, database, query node, indexer and optionally an application
//! server) in dependency order, hands the body a [`RuntimeEnvironment`],
//! and tears everything down in reverse whatever the body did.
//!
//! ```no_run
//! use localnet::{ClusterOrchestrator, UtxoDistribution};
//!
//! # async fn demo() -> Result<(), localnet::HarnessError> {
//! let orchestrator = ClusterOrchestrator::new(localnet::config::resolve(None, ".".as_ref())?);
//! let distribution = UtxoDistribution::uniform(2, vec![5_000_000, 2_000_000]);
//! orchestrator
//!     .run(distribution, |env, wallets| async move {
//!         assert_eq!(wallets.len(), 2);
//!         let _params = env.protocol_parameters();
//!         Ok(())
//!     })
//!     .await
//! # }
//! ```

pub mod config;
pub mod errors;
pub mod lifecycle;
pub mod logging;
pub mod orchestrator;
pub mod ports;
pub mod process;
pub mod retry;
pub mod runtime;
pub mod services;

pub use errors::HarnessError;
pub use lifecycle::{
    CleanupStack, EventLog, LifecycleEvent, LifecycleObserver, ServiceState, with_service,
};
pub use localnet_common::{ClusterConfig, ServiceKind, UtxoDistribution, Wallet, Wallets};
pub use orchestrator::ClusterOrchestrator;
pub use retry::{RetryPolicy, retry};
pub use runtime::RuntimeEnvironment;
