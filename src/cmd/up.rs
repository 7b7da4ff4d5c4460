//! Interactive cluster session (`localnet up`).

use anyhow::{Context, Result, bail};
use localnet::{ClusterOrchestrator, RuntimeEnvironment, UtxoDistribution, Wallets};
use localnet_common::ClusterConfig;

pub async fn cmd_up(config: ClusterConfig, wallets: usize, amount: u64, utxos: usize) -> Result<()> {
    if wallets == 0 || utxos == 0 {
        bail!("--wallets and --utxos must be at least 1");
    }
    let distribution = UtxoDistribution::uniform(wallets, vec![amount; utxos]);

    println!("Starting local cluster with {wallets} wallet(s)...");
    ClusterOrchestrator::new(config)
        .run(distribution, |env, wallets| async move {
            print_summary(&env, &wallets);
            println!();
            println!("Cluster is up. Press Ctrl-C to tear it down.");
            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for Ctrl-C")?;
            println!();
            println!("Tearing down...");
            Ok(())
        })
        .await?;
    println!("Cluster stopped.");
    Ok(())
}

fn print_summary(env: &RuntimeEnvironment, wallets: &Wallets) {
    let config = env.config();
    println!();
    println!("Run {}", env.run_id());
    println!("  emulator    {}", config.emulator.http_url());
    println!(
        "  database    postgresql://{}@{}:{}/{}",
        config.database.user, config.database.host, config.database.port, config.database.dbname
    );
    println!("  query node  {}", env.query_node().rpc().url());
    println!("  indexer     {}", env.indexer().rpc().url());
    if let Some(app) = &config.app_server {
        println!("  app server  {}", app.http_url());
    }

    println!();
    println!("Wallets (test keys, CBOR hex):");
    for (index, wallet) in wallets.iter().enumerate() {
        println!(
            "  #{index}  {} lovelace  {}",
            wallet.initial_balance(),
            wallet.private_key.to_cbor_hex()
        );
    }
}
