use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::detect::TensorLayout;
use crate::ingest::FrameRate;
use crate::pipeline::DEFAULT_DETECTION_CONFIDENCE;
use crate::policy::classify::{DEFAULT_FEEDING_MESSAGE, DEFAULT_FLAG_THRESHOLD};
use crate::policy::intrusion::{DEFAULT_INTRUDER_MESSAGE, DEFAULT_WHITE_THRESHOLD};
use crate::policy::DEFAULT_COOLDOWN;

pub const CONFIG_ENV: &str = "VISITOR_WATCH_CONFIG";

const DEFAULT_FEEDING_SOURCE: &str = "stub://enclosure";
const DEFAULT_LABELS_PATH: &str = "labels.txt";
const DEFAULT_CLASSIFIER_INPUT: u32 = 224;
const DEFAULT_WS_URL: &str = "ws://127.0.0.1:3000/";
const DEFAULT_NOTIFY_URL: &str = "http://127.0.0.1:3000/message";
const DEFAULT_DETECTOR_INPUT: u32 = 640;
const DEFAULT_IOU_THRESHOLD: f32 = 0.45;
const DEFAULT_FRAME_WIDTH: u32 = 640;
const DEFAULT_FRAME_HEIGHT: u32 = 480;
const DEFAULT_SKIP_FRAMES: u64 = 5;
const DEFAULT_SKIP_PAUSE_MS: u64 = 30;
const DEFAULT_DASHBOARD_ADDR: &str = "127.0.0.1:8501";
const DEFAULT_RELAY_ADDR: &str = "127.0.0.1:3000";
const DEFAULT_SEND_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct MonitorConfigFile {
    feeding: Option<FeedingConfigFile>,
    intruder: Option<IntruderConfigFile>,
    dashboard: Option<DashboardConfigFile>,
    relay: Option<RelayConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct FeedingConfigFile {
    source: Option<String>,
    /// "native", "unpaced" or frames per second.
    frame_rate: Option<String>,
    model_path: Option<PathBuf>,
    script_path: Option<PathBuf>,
    labels_path: Option<PathBuf>,
    input_width: Option<u32>,
    input_height: Option<u32>,
    layout: Option<String>,
    flag_threshold: Option<f32>,
    ws_url: Option<String>,
    tls_ca_path: Option<PathBuf>,
    insecure_skip_verify: Option<bool>,
    cooldown_secs: Option<u64>,
    message: Option<String>,
    mirror: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct IntruderConfigFile {
    model_path: Option<PathBuf>,
    script_path: Option<PathBuf>,
    input_size: Option<u32>,
    detection_confidence: Option<f32>,
    iou_threshold: Option<f32>,
    white_threshold: Option<u8>,
    notify_url: Option<String>,
    cooldown_secs: Option<u64>,
    message: Option<String>,
    frame_width: Option<u32>,
    frame_height: Option<u32>,
    skip_frames: Option<u64>,
    skip_pause_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DashboardConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RelayConfigFile {
    addr: Option<String>,
}

/// Settings for every binary in the crate.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub feeding: FeedingSettings,
    pub intruder: IntruderSettings,
    pub dashboard_addr: String,
    pub relay_addr: String,
    /// Network timeout for a single alert send.
    pub send_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct FeedingSettings {
    pub source: String,
    pub frame_rate: FrameRate,
    pub model_path: Option<PathBuf>,
    pub script_path: Option<PathBuf>,
    pub labels_path: PathBuf,
    pub input_width: u32,
    pub input_height: u32,
    pub layout: TensorLayout,
    pub flag_threshold: f32,
    pub ws_url: String,
    pub tls_ca_path: Option<PathBuf>,
    pub insecure_skip_verify: bool,
    pub cooldown: Duration,
    pub message: String,
    pub mirror: bool,
}

#[derive(Debug, Clone)]
pub struct IntruderSettings {
    pub model_path: Option<PathBuf>,
    pub script_path: Option<PathBuf>,
    pub input_size: u32,
    pub detection_confidence: f32,
    pub iou_threshold: f32,
    /// Default for the dashboard's threshold slider.
    pub white_threshold: u8,
    pub notify_url: String,
    pub cooldown: Duration,
    pub message: String,
    pub frame_width: u32,
    pub frame_height: u32,
    pub skip_frames: u64,
    pub skip_pause: Duration,
}

impl MonitorConfig {
    /// Load from the file named by `VISITOR_WATCH_CONFIG` (if any), then apply
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var(CONFIG_ENV).ok().map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Built-in defaults, ignoring config files and the environment.
    pub fn defaults() -> Result<Self> {
        Self::from_file(MonitorConfigFile::default())
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => MonitorConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: MonitorConfigFile) -> Result<Self> {
        let feeding = file.feeding.unwrap_or_default();
        let intruder = file.intruder.unwrap_or_default();

        let layout = match feeding.layout.as_deref() {
            Some(layout) => layout.parse()?,
            None => TensorLayout::Nhwc,
        };
        let frame_rate = match feeding.frame_rate.as_deref() {
            Some(rate) => rate.parse().context("feeding.frame_rate")?,
            None => FrameRate::Native,
        };
        let feeding = FeedingSettings {
            source: feeding
                .source
                .unwrap_or_else(|| DEFAULT_FEEDING_SOURCE.to_string()),
            frame_rate,
            model_path: feeding.model_path,
            script_path: feeding.script_path,
            labels_path: feeding
                .labels_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LABELS_PATH)),
            input_width: feeding.input_width.unwrap_or(DEFAULT_CLASSIFIER_INPUT),
            input_height: feeding.input_height.unwrap_or(DEFAULT_CLASSIFIER_INPUT),
            layout,
            flag_threshold: feeding.flag_threshold.unwrap_or(DEFAULT_FLAG_THRESHOLD),
            ws_url: feeding.ws_url.unwrap_or_else(|| DEFAULT_WS_URL.to_string()),
            tls_ca_path: feeding.tls_ca_path,
            insecure_skip_verify: feeding.insecure_skip_verify.unwrap_or(false),
            cooldown: feeding
                .cooldown_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_COOLDOWN),
            message: feeding
                .message
                .unwrap_or_else(|| DEFAULT_FEEDING_MESSAGE.to_string()),
            mirror: feeding.mirror.unwrap_or(true),
        };
        let intruder = IntruderSettings {
            model_path: intruder.model_path,
            script_path: intruder.script_path,
            input_size: intruder.input_size.unwrap_or(DEFAULT_DETECTOR_INPUT),
            detection_confidence: intruder
                .detection_confidence
                .unwrap_or(DEFAULT_DETECTION_CONFIDENCE),
            iou_threshold: intruder.iou_threshold.unwrap_or(DEFAULT_IOU_THRESHOLD),
            white_threshold: intruder.white_threshold.unwrap_or(DEFAULT_WHITE_THRESHOLD),
            notify_url: intruder
                .notify_url
                .unwrap_or_else(|| DEFAULT_NOTIFY_URL.to_string()),
            cooldown: intruder
                .cooldown_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_COOLDOWN),
            message: intruder
                .message
                .unwrap_or_else(|| DEFAULT_INTRUDER_MESSAGE.to_string()),
            frame_width: intruder.frame_width.unwrap_or(DEFAULT_FRAME_WIDTH),
            frame_height: intruder.frame_height.unwrap_or(DEFAULT_FRAME_HEIGHT),
            skip_frames: intruder.skip_frames.unwrap_or(DEFAULT_SKIP_FRAMES),
            skip_pause: Duration::from_millis(
                intruder.skip_pause_ms.unwrap_or(DEFAULT_SKIP_PAUSE_MS),
            ),
        };
        Ok(Self {
            feeding,
            intruder,
            dashboard_addr: file
                .dashboard
                .and_then(|dashboard| dashboard.addr)
                .unwrap_or_else(|| DEFAULT_DASHBOARD_ADDR.to_string()),
            relay_addr: file
                .relay
                .and_then(|relay| relay.addr)
                .unwrap_or_else(|| DEFAULT_RELAY_ADDR.to_string()),
            send_timeout: Duration::from_secs(DEFAULT_SEND_TIMEOUT_SECS),
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(source) = non_empty_env("VISITOR_WATCH_SOURCE") {
            self.feeding.source = source;
        }
        if let Some(url) = non_empty_env("VISITOR_WATCH_WS_URL") {
            self.feeding.ws_url = url;
        }
        if let Some(url) = non_empty_env("VISITOR_WATCH_NOTIFY_URL") {
            self.intruder.notify_url = url;
        }
        if let Some(threshold) = non_empty_env("VISITOR_WATCH_THRESHOLD") {
            self.intruder.white_threshold = threshold.trim().parse().map_err(|_| {
                anyhow!("VISITOR_WATCH_THRESHOLD must be an integer between 0 and 100")
            })?;
        }
        if let Some(cooldown) = non_empty_env("VISITOR_WATCH_COOLDOWN_SECS") {
            let seconds: u64 = cooldown.trim().parse().map_err(|_| {
                anyhow!("VISITOR_WATCH_COOLDOWN_SECS must be an integer number of seconds")
            })?;
            self.feeding.cooldown = Duration::from_secs(seconds);
            self.intruder.cooldown = Duration::from_secs(seconds);
        }
        if let Some(addr) = non_empty_env("VISITOR_WATCH_DASHBOARD_ADDR") {
            self.dashboard_addr = addr;
        }
        if let Some(addr) = non_empty_env("VISITOR_WATCH_RELAY_ADDR") {
            self.relay_addr = addr;
        }
        if let Some(insecure) = non_empty_env("VISITOR_WATCH_INSECURE_TLS") {
            self.feeding.insecure_skip_verify = parse_bool("VISITOR_WATCH_INSECURE_TLS", &insecure)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.intruder.white_threshold > 100 {
            return Err(anyhow!(
                "white threshold must be between 0 and 100, got {}",
                self.intruder.white_threshold
            ));
        }
        if self.feeding.cooldown.is_zero() || self.intruder.cooldown.is_zero() {
            return Err(anyhow!("cooldown must be greater than zero"));
        }
        check_unit_interval("feeding.flag_threshold", self.feeding.flag_threshold)?;
        check_unit_interval(
            "intruder.detection_confidence",
            self.intruder.detection_confidence,
        )?;
        check_unit_interval("intruder.iou_threshold", self.intruder.iou_threshold)?;
        check_url_scheme("feeding.ws_url", &self.feeding.ws_url, &["ws", "wss"])?;
        check_url_scheme(
            "intruder.notify_url",
            &self.intruder.notify_url,
            &["http", "https"],
        )?;
        for (name, addr) in [
            ("dashboard.addr", &self.dashboard_addr),
            ("relay.addr", &self.relay_addr),
        ] {
            addr.parse::<SocketAddr>()
                .map_err(|_| anyhow!("{} must be a socket address like 127.0.0.1:3000, got '{}'", name, addr))?;
        }
        if self.feeding.input_width == 0
            || self.feeding.input_height == 0
            || self.intruder.input_size == 0
            || self.intruder.frame_width == 0
            || self.intruder.frame_height == 0
        {
            return Err(anyhow!("model input and frame sizes must be greater than zero"));
        }
        if self.feeding.tls_ca_path.is_some() && self.feeding.insecure_skip_verify {
            return Err(anyhow!(
                "feeding.tls_ca_path and insecure_skip_verify are mutually exclusive"
            ));
        }
        Ok(())
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(anyhow!("{} must be a boolean, got '{}'", key, other)),
    }
}

fn check_unit_interval(name: &str, value: f32) -> Result<()> {
    if value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(anyhow!("{} must be in (0, 1], got {}", name, value))
    }
}

fn check_url_scheme(name: &str, value: &str, schemes: &[&str]) -> Result<()> {
    let url = url::Url::parse(value).with_context(|| format!("{} is not a valid URL", name))?;
    if !schemes.contains(&url.scheme()) {
        return Err(anyhow!(
            "{} must use one of {:?}, got '{}'",
            name,
            schemes,
            url.scheme()
        ));
    }
    Ok(())
}

fn read_config_file(path: &Path) -> Result<MonitorConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let cfg = MonitorConfig::from_file(MonitorConfigFile::default()).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.feeding.cooldown, Duration::from_secs(5));
        assert_eq!(cfg.intruder.white_threshold, 30);
        assert_eq!(cfg.feeding.layout, TensorLayout::Nhwc);
        assert!(cfg.feeding.mirror);
        assert!(!cfg.feeding.insecure_skip_verify);
    }

    #[test]
    fn rejects_threshold_above_hundred() {
        let mut cfg = MonitorConfig::from_file(MonitorConfigFile::default()).unwrap();
        cfg.intruder.white_threshold = 101;
        assert!(cfg.validate().unwrap_err().to_string().contains("0 and 100"));
    }

    #[test]
    fn rejects_wrong_url_scheme() {
        let mut cfg = MonitorConfig::from_file(MonitorConfigFile::default()).unwrap();
        cfg.feeding.ws_url = "http://relay.local/".to_string();
        assert!(cfg.validate().unwrap_err().to_string().contains("feeding.ws_url"));
    }

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert!(parse_bool("X", "Yes").unwrap());
        assert!(!parse_bool("X", "0").unwrap());
        assert!(parse_bool("X", "maybe").is_err());
    }
}
