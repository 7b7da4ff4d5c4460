//! CLI command implementations.
//!
//! Each submodule owns one `Commands` variant:
//!
//! | Module          | Commands handled                                   |
//! |-----------------|-----------------------------------------------------|
//! | `up`            | `Up`                                               |
//! | `preflight`     | `Preflight`                                        |
//! | `config`        | `ShowConfig`                                       |

pub mod config;
pub mod preflight;
pub mod up;

pub use config::cmd_show_config;
pub use preflight::cmd_preflight;
pub use up::cmd_up;
