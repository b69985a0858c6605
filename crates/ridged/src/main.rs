//! ridged — point-to-point encrypted tunnel daemon.

mod run;
mod transport;

use std::path::Path;

use anyhow::{bail, Result};
use ridge_core::config::Config;
use ridge_core::curve::SecretKey;

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG controls verbosity, e.g. RUST_LOG=debug ridged tunnel.toml
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        Some("keygen") => {
            keygen();
            Ok(())
        }
        Some(config_path) => {
            let config = Config::load(Path::new(config_path))?;
            run::run(config).await
        }
        None => bail!("usage: ridged <config.toml> | ridged keygen"),
    }
}

/// Generate an identity keypair and print it for the config file.
fn keygen() {
    let secret = SecretKey::generate();
    println!("Secret: {}", hex::encode(secret.as_bytes()));
    println!("Public: {}", secret.public().to_hex());
}
