//! `recon-cli` binary entrypoint.
//!
//! Parses the CLI flags described in `recon_cli::Cli`, builds a
//! `recon_core::System` from them, and runs one enumeration to completion
//! against the in-memory reference graph, printing resolved names and
//! their addresses as they are discovered.
//!
//! Example:
//!
//! $ recon-cli -d example.com -r 8.8.8.8:53 -r 1.1.1.1:53 --timeout-secs 20
//!
//! This does not read a config file and does not load any data-source
//! plugins — both are out-of-scope collaborators; it exercises only the
//! in-process pipeline: event bus, resolver pool, DNS service, data
//! manager, and (if enabled) brute-force/alteration feedback.

use clap::Parser;
use recon_cli::Cli;

#[tokio::main]
async fn main() -> recon_core::Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let timeout = cli.enumeration_timeout();
    let config = cli.into_engine_config()?;
    let uuid = config.uuid;

    log::info!("starting enumeration {uuid} for {} domain(s)", config.domains.len());

    let mut system = recon_core::System::new(config)?;
    system.run().await;

    tokio::time::sleep(timeout).await;
    system.stop(std::time::Duration::from_secs(2)).await;

    let graph = system.graph();
    let rows = graph.get_output(uuid, false).await.unwrap_or_default();
    println!("resolved {} name(s):", rows.len());
    for row in rows {
        let addrs: Vec<String> = row.addresses.iter().map(|a| a.to_string()).collect();
        println!("  {} [{}] -> {}", row.name, row.tag, addrs.join(", "));
    }

    Ok(())
}
