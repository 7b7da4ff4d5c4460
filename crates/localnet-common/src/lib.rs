//! Shared domain types for the localnet cluster orchestrator.
//!
//! Everything here is plain data: the resolved cluster configuration, the
//! wallet funding distribution, private-key decoding and the emulator
//! control-protocol messages. Process management and I/O live in the
//! `localnet` crate.

pub mod config;
pub mod distribution;
pub mod emulator;
pub mod keys;

pub use config::{
    Binaries, ClusterConfig, ClusterParams, CommandSpec, DatabaseConfig, IndexerConfig, LogLevel,
    PortClaim, ServerConfig, ServiceKind,
};
pub use distribution::{UtxoDistribution, Wallet, Wallets};
pub use emulator::{
    ClusterStartupResult, ClusterStartupSuccess, FailureReason, StartClusterRequest,
    StopClusterRequest, StopClusterResponse,
};
pub use keys::{KeyDecodeError, PrivateKey};
