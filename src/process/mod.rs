//! External service processes.
//!
//! - `managed` spawns and signals child processes
//! - `readiness` watches a child's output for its "ready" line
//! - `safety_net` force-kills children if the host process exits first

pub mod managed;
pub mod readiness;
pub mod safety_net;

pub use managed::{ManagedProcess, Signal, run_to_completion};
pub use readiness::{LineStream, ReadinessPredicate, wait_until_ready};
