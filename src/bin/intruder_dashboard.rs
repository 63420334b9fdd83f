//! intruder_dashboard - web dashboard for the intruder monitor.
//!
//! Serves the control page, runs one detection session at a time (webcam or
//! uploaded video) and posts an HTTP alert when a suspicious person is seen.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::{mpsc, Arc};

use visitor_watch::config::{MonitorConfig, CONFIG_ENV};
use visitor_watch::dashboard::{
    Dashboard, DashboardConfig, DetectorFactory, NotifierFactory, DEFAULT_MAX_UPLOAD_BYTES,
};
use visitor_watch::detect::open_object_detector;
use visitor_watch::notify::{HttpNotifier, Notifier};
use visitor_watch::ui;

#[derive(Parser, Debug)]
#[command(
    name = "intruder_dashboard",
    about = "Web dashboard that flags suspicious people and alerts the relay"
)]
struct Args {
    /// Config file (TOML or JSON).
    #[arg(long, env = CONFIG_ENV)]
    config: Option<PathBuf>,

    /// Address the dashboard listens on.
    #[arg(long)]
    addr: Option<String>,

    /// Relay endpoint receiving `{"message": ...}` POSTs.
    #[arg(long)]
    notify_url: Option<String>,

    /// ONNX object detector (requires the backend-tract feature).
    #[arg(long)]
    model: Option<PathBuf>,

    /// JSON detector script replayed instead of a model.
    #[arg(long)]
    script: Option<PathBuf>,

    /// Initial white-percentage threshold (0-100).
    #[arg(long)]
    threshold: Option<u8>,

    /// Largest accepted video upload, in bytes.
    #[arg(long, default_value_t = DEFAULT_MAX_UPLOAD_BYTES)]
    max_upload_bytes: u64,

    /// Output mode: auto, plain, or pretty.
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = ui::Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    let cfg = {
        let _stage = ui.stage("Load configuration");
        let mut cfg = MonitorConfig::load_from(args.config.as_deref())?;
        apply_overrides(&mut cfg, &args);
        cfg.validate()?;
        cfg
    };

    let detector_settings = cfg.intruder.clone();
    let detectors: DetectorFactory = Arc::new(move || open_object_detector(&detector_settings));
    {
        let _stage = ui.stage("Check object detector");
        let detector = detectors()?;
        log::info!(
            "object detector '{}', min confidence {}",
            detector.name(),
            cfg.intruder.detection_confidence
        );
    }

    let notify_url = cfg.intruder.notify_url.clone();
    let send_timeout = cfg.send_timeout;
    let notifiers: NotifierFactory = Arc::new(move || {
        let notifier: Box<dyn Notifier + Send> =
            Box::new(HttpNotifier::new(&notify_url, send_timeout)?);
        Ok(notifier)
    });

    let dashboard = Dashboard::new(
        DashboardConfig {
            addr: cfg.dashboard_addr.clone(),
            intruder: cfg.intruder.clone(),
            max_upload_bytes: args.max_upload_bytes,
        },
        detectors,
        notifiers,
    );
    let shutdown = Arc::new(AtomicBool::new(false));
    let handle = dashboard.spawn(shutdown)?;
    log::info!("dashboard listening on http://{}", handle.addr);
    log::info!(
        "white threshold {}%, alerts to {}",
        cfg.intruder.white_threshold,
        cfg.intruder.notify_url
    );

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("error setting Ctrl-C handler")?;

    log::info!("intruder_dashboard waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping dashboard...");
    handle.stop()?;
    Ok(())
}

fn apply_overrides(cfg: &mut MonitorConfig, args: &Args) {
    if let Some(addr) = &args.addr {
        cfg.dashboard_addr = addr.clone();
    }
    let intruder = &mut cfg.intruder;
    if let Some(url) = &args.notify_url {
        intruder.notify_url = url.clone();
    }
    if let Some(model) = &args.model {
        intruder.model_path = Some(model.clone());
    }
    if let Some(script) = &args.script {
        intruder.script_path = Some(script.clone());
    }
    if let Some(threshold) = args.threshold {
        intruder.white_threshold = threshold;
    }
}
