//! `adkg-node`: runs one complete ADKG instance in-process across `n` simulated parties and
//! reports the agreed public key, mirroring this crate's reference model's CLI-binary shape
//! (`engine/cli/src/main.rs`'s `clap`-parsed options, `run_cli`-returns-`anyhow::Result`, exit-code
//! convention) adapted to a single-process protocol demo rather than a node connecting out to a
//! live network.

use std::sync::Arc;

use anyhow::{ensure, Context};
use clap::Parser;
use tracing::info;

use adkg::{
    group::GroupElement,
    party::{Params, Roster},
    run_adkg,
    transport::{InProcessTransport, Transport},
};

/// Command-line options for one ADKG demo run.
#[derive(Parser, Debug, Clone)]
#[command(name = "adkg-node", about = "Run one asynchronous distributed key generation instance")]
struct CommandLineOptions {
    /// Total number of parties.
    #[arg(long, default_value_t = 4)]
    n: usize,

    /// Maximum number of tolerated Byzantine parties (requires n >= 3t+1).
    #[arg(long, default_value_t = 1)]
    t: usize,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    std::process::exit(match run().await {
        Ok(()) => 0,
        Err(error) => {
            eprintln!("Error: {error:?}");
            1
        }
    });
}

async fn run() -> anyhow::Result<()> {
    let opts = CommandLineOptions::parse();
    ensure!(opts.n >= 3 * opts.t + 1, "n must be at least 3t+1, got n={} t={}", opts.n, opts.t);

    let params = Params::new(opts.n, opts.t);
    let rosters: Vec<Arc<Roster>> = (0..opts.n).map(|i| Arc::new(Roster::static_pki(params, i))).collect();
    let network = InProcessTransport::new_network(opts.n);

    info!(n = opts.n, t = opts.t, "starting ADKG run");

    let mut handles = Vec::with_capacity(opts.n);
    for (transport, roster) in network.into_iter().zip(rosters) {
        let transport: Arc<dyn Transport> = Arc::new(transport);
        handles.push(tokio::spawn(async move { run_adkg(transport, roster).await.1 }));
    }

    let mut outputs = Vec::with_capacity(opts.n);
    for handle in handles {
        let output = handle.await.context("ADKG task panicked")?.context("ADKG instance failed")?;
        outputs.push(output);
    }

    let pk = outputs[0].pk;
    for out in &outputs {
        ensure!(out.pk == pk, "parties disagreed on the derived public key");
    }

    println!("agreed public key: {}", hex::encode(pk.to_bytes()));
    println!("agreed dealer subset (mks): {:?}", outputs[0].mks);
    Ok(())
}
