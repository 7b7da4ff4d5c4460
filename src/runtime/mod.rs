//! What a test body gets to work with.

pub mod connection;
pub mod env;
pub mod used;

pub use connection::{IndexerConnection, ProtocolParameters, QueryNodeConnection, WsRpcConnection};
pub use env::RuntimeEnvironment;
pub use used::{OutputRef, UsedOutputs};
