use std::error::Error;

use envconfig::Envconfig;
use epp::datalayer::watch::spawn_feeder;
use epp::logging::{fatal, init_log};
use epp::{EppConfig, wire};
use tokio::signal;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_log();
    let conf = EppConfig::init_from_env()?;
    let wired = wire(&conf)
        .unwrap_or_else(|e| fatal(e, "failed to wire data layer"));
    let sender = wired
        .datalayer
        .watch(&conf.watch_gvk)
        .unwrap_or_else(|e| fatal(e, "failed to start watch"));
    info!(gvk = %conf.watch_gvk, source = %wired.source_name, "data layer ready");

    // without stdin input the channel stays open until shutdown
    let _idle_sender = if conf.watch_stdin {
        spawn_feeder("watch-stdin", std::io::stdin(), sender)?;
        None
    } else {
        Some(sender)
    };

    match signal::ctrl_c().await {
        Ok(()) => {}
        Err(err) => {
            eprintln!("Unable to listen for shutdown signal: {}", err);
            // we also shut down in case of error
        }
    }
    info!("starting a clean up for shutdown");
    wired.datalayer.shutdown().await;
    info!(
        pods = wired.adapters.len(),
        adapters = ?wired.adapters.snapshot(),
        "done clean up"
    );
    Ok(())
}
