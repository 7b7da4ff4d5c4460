//! Port availability report (`localnet preflight`).

use anyhow::Result;
use localnet::ports::{is_port_free, preflight};
use localnet_common::ClusterConfig;

pub fn cmd_preflight(config: &ClusterConfig) -> Result<()> {
    let claims = config.port_claims();
    println!("Checking {} ports...", claims.len());
    for claim in &claims {
        let status = if is_port_free(&claim.host, claim.port) {
            "free"
        } else {
            "IN USE"
        };
        println!(
            "  {:<12} {}:{:<6} {}",
            claim.service.as_str(),
            claim.host,
            claim.port,
            status
        );
    }

    preflight(config)?;
    println!("All ports free.");
    Ok(())
}
