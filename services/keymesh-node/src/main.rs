use anyhow::{anyhow, Context};
use keymesh_core::{logging, Config};
use keymesh_mesh::{Peer, WIRE_VERSION};
use keymesh_store::KeyStore;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

const DEFAULT_CONFIG_PATH: &str = "keymesh.toml";

#[derive(Debug, Serialize)]
struct NodeVersionHandshake {
    version: &'static str,
    wire_version: u32,
}

#[derive(Debug, PartialEq)]
enum Command {
    Run,
    List,
    Export(PathBuf),
}

#[derive(Debug, PartialEq)]
struct Args {
    config_path: PathBuf,
    command: Command,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let raw: Vec<String> = std::env::args().collect();

    if raw.iter().any(|arg| arg == "--version-json") {
        let handshake = NodeVersionHandshake {
            version: env!("CARGO_PKG_VERSION"),
            wire_version: WIRE_VERSION,
        };
        println!("{}", serde_json::to_string(&handshake)?);
        return Ok(());
    }

    let args = parse_args(&raw)?;
    let config = Config::load_or_default(&args.config_path)
        .with_context(|| format!("loading config {}", args.config_path.display()))?;
    logging::init_from_config(&config.node)?;

    let store = KeyStore::open(&config.store.path, config.store.key_bits)
        .with_context(|| format!("opening key store {}", config.store.path.display()))?;

    match args.command {
        Command::List => {
            for fingerprint in store.list_fingerprints(&config.node.channel) {
                println!("{}", fingerprint?);
            }
            store.close()?;
        }
        Command::Export(dir) => {
            let path = store.local_keypair().save(&dir)?;
            println!("{}", path.display());
            store.close()?;
        }
        Command::Run => run(config, store).await?,
    }

    Ok(())
}

async fn run(config: Config, store: KeyStore) -> anyhow::Result<()> {
    let store = Arc::new(store);
    let peer = Peer::new(Arc::clone(&store), &config.node.channel, &config.gossip)?;

    info!(
        nickname = %config.node.nickname,
        channel = %config.node.channel,
        fingerprint = %store.local_fingerprint(),
        keys = peer.fingerprints().len(),
        "Node running"
    );

    let mut updates = peer.subscribe();
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("waiting for shutdown signal")?;
                info!("Shutdown requested");
                break;
            }
            update = updates.recv() => match update {
                Ok(cert) => info!(fingerprint = %cert.fingerprint(), "Accepted key"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Update stream lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    }

    peer.shutdown().await;
    drop(peer);

    let store = Arc::try_unwrap(store).map_err(|_| anyhow!("key store still in use at shutdown"))?;
    store.close()?;
    Ok(())
}

fn parse_args(args: &[String]) -> anyhow::Result<Args> {
    let mut config_path = PathBuf::from(DEFAULT_CONFIG_PATH);
    let mut command = Command::Run;

    let mut args_iter = args.iter().skip(1);
    while let Some(arg) = args_iter.next() {
        match arg.as_str() {
            "--config" => {
                let path = args_iter
                    .next()
                    .ok_or_else(|| anyhow!("--config was provided without a path"))?;
                config_path = PathBuf::from(path);
            }
            "--list" => command = Command::List,
            "--export" => {
                let dir = args_iter
                    .next()
                    .ok_or_else(|| anyhow!("--export was provided without a directory"))?;
                command = Command::Export(PathBuf::from(dir));
            }
            other => return Err(anyhow!("unrecognized argument {other}")),
        }
    }

    Ok(Args {
        config_path,
        command,
    })
}
