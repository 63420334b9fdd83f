//! feeding_monitor - classify frames and push a WebSocket alert when a
//! visitor is seen feeding.
//!
//! Frames come from a camera, a video file, or a `stub://` synthetic source.
//! Each frame is classified, and confident "feeding" frames send one alert
//! per cooldown window to the relay.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use visitor_watch::config::{MonitorConfig, CONFIG_ENV};
use visitor_watch::detect::{open_classifier, LabelMap};
use visitor_watch::frame::FrameTransform;
use visitor_watch::ingest::{open_source, SourceSpec};
use visitor_watch::notify::{build_client_config, TlsMaterials, TlsVerification, WebSocketNotifier};
use visitor_watch::overlay;
use visitor_watch::pipeline::{FeedingMonitor, FeedingReport};
use visitor_watch::policy::{ClassificationPolicy, MonotonicClock};
use visitor_watch::ui;

#[derive(Parser, Debug)]
#[command(
    name = "feeding_monitor",
    about = "Classify frames and alert the relay when a visitor is feeding"
)]
struct Args {
    /// Config file (TOML or JSON).
    #[arg(long, env = CONFIG_ENV)]
    config: Option<PathBuf>,

    /// Frame source: camera index, `webcam`, video path, or `stub://...`.
    #[arg(long)]
    source: Option<String>,

    /// Video playback rate: native, unpaced, or frames per second.
    #[arg(long, value_name = "RATE")]
    frame_rate: Option<String>,

    /// Relay WebSocket URL (ws:// or wss://).
    #[arg(long)]
    ws_url: Option<String>,

    /// ONNX classifier (requires the backend-tract feature).
    #[arg(long)]
    model: Option<PathBuf>,

    /// JSON detector script replayed instead of a model.
    #[arg(long)]
    script: Option<PathBuf>,

    /// Label file, one label per line.
    #[arg(long)]
    labels: Option<PathBuf>,

    /// Stop after this many frames.
    #[arg(long)]
    frames: Option<u64>,

    /// Write an annotated JPEG of every flagged frame into this directory.
    #[arg(long, value_name = "DIR")]
    snapshot_dir: Option<PathBuf>,

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
        apply_overrides(&mut cfg, &args)?;
        cfg.validate()?;
        cfg
    };
    let settings = &cfg.feeding;

    let labels = LabelMap::load(&settings.labels_path)
        .with_context(|| format!("load labels from {}", settings.labels_path.display()))?;
    let detector = {
        let _stage = ui.stage("Load classifier");
        open_classifier(settings)?
    };
    log::info!(
        "classifier '{}' with {} labels, flag threshold {}",
        detector.name(),
        labels.len(),
        settings.flag_threshold
    );

    let tls = if settings.ws_url.starts_with("wss://") {
        let materials = TlsMaterials::load(settings.tls_ca_path.as_deref())?;
        let verification = TlsVerification::from_insecure_flag(settings.insecure_skip_verify);
        Some(build_client_config(&materials, verification)?)
    } else {
        None
    };
    let notifier = WebSocketNotifier::new(&settings.ws_url, tls, cfg.send_timeout)?;

    let source = {
        let _stage = ui.stage("Open frame source");
        let spec = SourceSpec::parse(&settings.source)?;
        open_source(&spec, settings.frame_rate)
            .with_context(|| format!("cannot open video source {}", spec))?
    };

    let policy = ClassificationPolicy::new(labels)
        .with_flag_threshold(settings.flag_threshold)
        .with_cooldown(settings.cooldown)
        .with_message(settings.message.clone());
    let mut monitor = FeedingMonitor::new(source, detector, policy, notifier, MonotonicClock::new())
        .with_transform(FrameTransform {
            mirror: settings.mirror,
            resize: None,
        })
        .with_frame_limit(args.frames);

    let stop = Arc::new(AtomicBool::new(false));
    let stop_handler = stop.clone();
    ctrlc::set_handler(move || {
        stop_handler.store(true, Ordering::SeqCst);
    })
    .context("error setting Ctrl-C handler")?;

    if let Some(dir) = &args.snapshot_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("create snapshot directory {}", dir.display()))?;
    }

    log::info!(
        "feeding_monitor running on {}, alerts to {}",
        settings.source,
        settings.ws_url
    );
    let mut progress = ui.frames("feeding");
    let summary = monitor.run(&stop, |report| {
        progress.tick(&describe(report));
        for status in &report.status {
            log::info!("{}", status.text());
        }
        if let Some(dir) = &args.snapshot_dir {
            if let Err(e) = write_snapshot(dir, report) {
                log::warn!("snapshot failed for frame {}: {:#}", report.frame.index, e);
            }
        }
    })?;
    progress.finish(summary.frames);

    log::info!(
        "stopped ({:?}): {} frames, {} skipped, {} alerts sent, {} failed",
        summary.stop_reason,
        summary.frames,
        summary.skipped,
        summary.notifications_sent,
        summary.notification_failures
    );
    Ok(())
}

fn apply_overrides(cfg: &mut MonitorConfig, args: &Args) -> Result<()> {
    let feeding = &mut cfg.feeding;
    if let Some(source) = &args.source {
        feeding.source = source.clone();
    }
    if let Some(rate) = &args.frame_rate {
        feeding.frame_rate = rate.parse().context("--frame-rate")?;
    }
    if let Some(url) = &args.ws_url {
        feeding.ws_url = url.clone();
    }
    if let Some(model) = &args.model {
        feeding.model_path = Some(model.clone());
    }
    if let Some(script) = &args.script {
        feeding.script_path = Some(script.clone());
    }
    if let Some(labels) = &args.labels {
        feeding.labels_path = labels.clone();
    }
    Ok(())
}

fn describe(report: &FeedingReport<'_>) -> String {
    match (&report.decision.label, report.decision.confidence) {
        (Some(label), Some(confidence)) => {
            let marker = if report.decision.flagged.is_some() { "!" } else { "" };
            format!("{}{} ({:.2})", label, marker, confidence)
        }
        _ => "no classification".to_string(),
    }
}

fn write_snapshot(dir: &Path, report: &FeedingReport<'_>) -> Result<()> {
    let Some(category) = &report.decision.flagged else {
        return Ok(());
    };
    let mut image = report.frame.image().clone();
    overlay::annotate_category(&mut image, category);
    let jpeg = overlay::encode_jpeg(&image, overlay::DEFAULT_JPEG_QUALITY)?;
    let path = dir.join(format!("frame-{:06}.jpg", report.frame.index));
    std::fs::write(&path, jpeg).with_context(|| format!("write {}", path.display()))
}
