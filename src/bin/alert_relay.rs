//! alert_relay - fan alerts out to every connected WebSocket client.
//!
//! Accepts alerts over `POST /message` and over WebSocket text frames and
//! broadcasts each one as `{"title":"Alert","body":...}`.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::{mpsc, Arc};

use visitor_watch::config::{MonitorConfig, CONFIG_ENV};
use visitor_watch::relay;

#[derive(Parser, Debug)]
#[command(name = "alert_relay", about = "Broadcast alerts to WebSocket clients")]
struct Args {
    /// Config file (TOML or JSON).
    #[arg(long, env = CONFIG_ENV)]
    config: Option<PathBuf>,

    /// Address to listen on.
    #[arg(long)]
    addr: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = MonitorConfig::load_from(args.config.as_deref())?;
    if let Some(addr) = args.addr {
        cfg.relay_addr = addr;
        cfg.validate()?;
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let handle = relay::spawn_relay(&cfg.relay_addr, shutdown)?;
    log::info!("alert relay listening on {}", handle.addr);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("error setting Ctrl-C handler")?;

    let _ = rx.recv();
    log::info!(
        "shutdown signal received, closing {} clients...",
        handle.client_count()
    );
    handle.stop()?;
    Ok(())
}
