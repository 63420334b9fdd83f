//! Web dashboard for the intruder monitor.
//!
//! The HTTP thread owns the session lifecycle; each session runs an
//! [`IntruderMonitor`] on its own worker thread and publishes per-frame
//! results into a shared [`DashboardState`] that `/status` and `/frame.jpg`
//! read back.

use std::collections::VecDeque;
use std::io::Write;
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::config::IntruderSettings;
use crate::detect::DetectorBackend;
use crate::frame::FrameTransform;
use crate::http::{self, HttpRequest, ServerHandle};
use crate::ingest::{open_source, FrameRate, FrameSource, SourceSpec};
use crate::notify::Notifier;
use crate::overlay;
use crate::pipeline::{FramePacing, IntruderMonitor, IntruderReport, RunSummary, StatusMessage, StopReason};
use crate::policy::{AlertState, IntrusionPolicy, MonotonicClock};

const INDEX_HTML: &str = include_str!("index.html");
const MAX_JSON_BODY: usize = 16 * 1024;
const MAX_MESSAGES: usize = 20;
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 512 * 1024 * 1024;

/// Builds a fresh detector for each session.
pub type DetectorFactory = Arc<dyn Fn() -> Result<Box<dyn DetectorBackend>> + Send + Sync>;
/// Builds a fresh alert transport for each session.
pub type NotifierFactory = Arc<dyn Fn() -> Result<Box<dyn Notifier + Send>> + Send + Sync>;

type IntruderSession = IntruderMonitor<
    Box<dyn FrameSource + Send>,
    Box<dyn DetectorBackend>,
    Box<dyn Notifier + Send>,
    MonotonicClock,
>;

/// What the page shows. Written by the session thread, read by the HTTP thread.
#[derive(Debug, Default, Serialize)]
pub struct DashboardState {
    pub running: bool,
    pub source: Option<String>,
    pub threshold: u8,
    pub alert: AlertState,
    pub suspicious: usize,
    pub frames: u64,
    pub notifications: u64,
    pub messages: VecDeque<StatusMessage>,
    pub last_stop: Option<StopReason>,
    pub has_frame: bool,
    #[serde(skip)]
    latest_jpeg: Option<Vec<u8>>,
}

impl DashboardState {
    fn push(&mut self, message: StatusMessage) {
        if self.messages.len() == MAX_MESSAGES {
            self.messages.pop_front();
        }
        self.messages.push_back(message);
    }

    fn begin(&mut self, source: &str, threshold: u8) {
        self.running = true;
        self.source = Some(source.to_string());
        self.threshold = threshold;
        self.alert = AlertState::NoAlert;
        self.suspicious = 0;
        self.frames = 0;
        self.notifications = 0;
        self.last_stop = None;
        self.has_frame = false;
        self.latest_jpeg = None;
    }

    fn record(&mut self, report: &IntruderReport<'_>, jpeg: Option<Vec<u8>>) {
        self.frames += 1;
        self.alert = report.alert_state;
        self.suspicious = report.decision.suspicious.len();
        for status in &report.status {
            if matches!(status, StatusMessage::Info(_)) {
                self.notifications += 1;
            }
            self.push(status.clone());
        }
        if let Some(jpeg) = jpeg {
            self.latest_jpeg = Some(jpeg);
            self.has_frame = true;
        }
    }

    fn finish(&mut self, result: Result<RunSummary>) {
        self.running = false;
        match result {
            Ok(summary) => {
                self.last_stop = Some(summary.stop_reason);
                let text = match summary.stop_reason {
                    StopReason::SourceExhausted => "Reached end of video or cannot fetch frame.",
                    StopReason::Cancelled | StopReason::FrameLimit => "Video display ended.",
                };
                self.push(StatusMessage::Info(text.to_string()));
            }
            Err(e) => self.push(StatusMessage::Warning(format!("Session failed: {:#}", e))),
        }
    }

    pub fn latest_jpeg(&self) -> Option<&[u8]> {
        self.latest_jpeg.as_deref()
    }
}

#[derive(Clone, Debug)]
pub struct DashboardConfig {
    pub addr: String,
    pub intruder: IntruderSettings,
    pub max_upload_bytes: u64,
}

#[derive(Deserialize)]
struct StartRequest {
    source: String,
    #[serde(default)]
    threshold: Option<u8>,
}

struct RunningSession {
    stop: Arc<AtomicBool>,
    join: JoinHandle<()>,
    /// Keeps an uploaded video on disk until the session ends.
    _upload: Option<NamedTempFile>,
}

pub struct Dashboard {
    cfg: DashboardConfig,
    detectors: DetectorFactory,
    notifiers: NotifierFactory,
    state: Arc<Mutex<DashboardState>>,
    session: Option<RunningSession>,
}

impl Dashboard {
    pub fn new(cfg: DashboardConfig, detectors: DetectorFactory, notifiers: NotifierFactory) -> Self {
        let state = DashboardState {
            threshold: cfg.intruder.white_threshold,
            ..DashboardState::default()
        };
        Self {
            cfg,
            detectors,
            notifiers,
            state: Arc::new(Mutex::new(state)),
            session: None,
        }
    }

    pub fn state(&self) -> Arc<Mutex<DashboardState>> {
        self.state.clone()
    }

    /// Start serving on the configured address.
    pub fn spawn(mut self, shutdown: Arc<AtomicBool>) -> Result<ServerHandle> {
        let addr = self.cfg.addr.clone();
        http::spawn_server(&addr, "dashboard", shutdown, move |stream| self.handle(stream))
    }

    fn handle(&mut self, mut stream: TcpStream) -> Result<()> {
        let request = http::read_request_head(&mut stream)?;
        let (method, path) = (request.method.clone(), request.path.clone());
        match (method.as_str(), path.as_str()) {
            ("GET", "/") => {
                http::write_response(&mut stream, 200, "text/html; charset=utf-8", INDEX_HTML.as_bytes())
            }
            ("GET", "/status") => {
                let body = {
                    let state = self.lock_state()?;
                    serde_json::to_vec(&*state)?
                };
                http::write_response(&mut stream, 200, "application/json", &body)
            }
            ("GET", "/frame.jpg") => {
                let jpeg = self.lock_state()?.latest_jpeg.clone();
                match jpeg {
                    Some(jpeg) => http::write_response(&mut stream, 200, "image/jpeg", &jpeg),
                    None => http::write_json_response(&mut stream, 404, r#"{"error":"no_frame"}"#),
                }
            }
            ("POST", "/start") => self.handle_start(stream, request),
            ("POST", "/upload") => self.handle_upload(stream, request),
            ("POST", "/stop") => {
                let was_running = self.stop_session();
                let body = serde_json::json!({ "stopped": was_running }).to_string();
                http::write_json_response(&mut stream, 200, &body)
            }
            (_, "/" | "/status" | "/frame.jpg" | "/start" | "/upload" | "/stop") => {
                http::write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#)
            }
            _ => http::write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#),
        }
    }

    fn handle_start(&mut self, mut stream: TcpStream, mut request: HttpRequest) -> Result<()> {
        if request.content_length()? > MAX_JSON_BODY {
            return http::write_json_response(&mut stream, 413, r#"{"error":"body_too_large"}"#);
        }
        http::read_body(&mut stream, &mut request, MAX_JSON_BODY)?;

        let start: StartRequest = match serde_json::from_slice(&request.body) {
            Ok(start) => start,
            Err(e) => return write_error(&mut stream, 400, &format!("invalid start request: {}", e)),
        };
        let threshold = start.threshold.unwrap_or(self.cfg.intruder.white_threshold);
        match self.start_session(&start.source, threshold, None) {
            Ok(()) => http::write_json_response(&mut stream, 200, r#"{"started":true}"#),
            Err(e) => write_error(&mut stream, 400, &format!("{:#}", e)),
        }
    }

    fn handle_upload(&mut self, mut stream: TcpStream, request: HttpRequest) -> Result<()> {
        let threshold = match request.query_param("threshold") {
            Some(value) => match value.parse::<u8>() {
                Ok(threshold) if threshold <= 100 => threshold,
                _ => return write_error(&mut stream, 400, "threshold must be between 0 and 100"),
            },
            None => self.cfg.intruder.white_threshold,
        };
        if request.content_length()? as u64 > self.cfg.max_upload_bytes {
            return http::write_json_response(&mut stream, 413, r#"{"error":"upload_too_large"}"#);
        }
        let suffix = request
            .query_param("name")
            .and_then(|name| {
                std::path::Path::new(&name)
                    .extension()
                    .map(|ext| format!(".{}", ext.to_string_lossy()))
            })
            .unwrap_or_default();
        let mut upload = tempfile::Builder::new()
            .prefix("visitor-watch-upload-")
            .suffix(&suffix)
            .tempfile()
            .context("create upload file")?;
        let bytes = http::copy_body(&mut stream, &request, upload.as_file_mut(), self.cfg.max_upload_bytes)?;
        upload.as_file_mut().flush()?;
        log::info!("stored {} byte upload at {}", bytes, upload.path().display());

        let source = upload.path().to_string_lossy().to_string();
        match self.start_session(&source, threshold, Some(upload)) {
            Ok(()) => http::write_json_response(&mut stream, 200, r#"{"started":true}"#),
            Err(e) => write_error(&mut stream, 400, &format!("{:#}", e)),
        }
    }

    fn start_session(&mut self, source: &str, threshold: u8, upload: Option<NamedTempFile>) -> Result<()> {
        self.stop_session();
        match self.build_session(source, threshold) {
            Ok(monitor) => {
                let stop = Arc::new(AtomicBool::new(false));
                {
                    let mut state = self.lock_state()?;
                    state.begin(source, threshold);
                    let text = if upload.is_some() {
                        "Playing uploaded video...".to_string()
                    } else {
                        format!("Using {} for video feed...", source)
                    };
                    state.push(StatusMessage::Info(text));
                }
                let state = self.state.clone();
                let stop_thread = stop.clone();
                let join = std::thread::Builder::new()
                    .name("intruder-session".to_string())
                    .spawn(move || run_session(monitor, stop_thread, state))?;
                self.session = Some(RunningSession {
                    stop,
                    join,
                    _upload: upload,
                });
                Ok(())
            }
            Err(e) => {
                log::warn!("cannot start session on {}: {:#}", source, e);
                self.lock_state()?
                    .push(StatusMessage::Warning("Error: Cannot open video source.".to_string()));
                Err(e)
            }
        }
    }

    fn build_session(&self, source: &str, threshold: u8) -> Result<IntruderSession> {
        let settings = &self.cfg.intruder;
        let policy = IntrusionPolicy::new(threshold)?
            .with_cooldown(settings.cooldown)
            .with_message(settings.message.clone());
        let spec = SourceSpec::parse(source)?;
        let source = open_source(&spec, FrameRate::Unpaced)?;
        let detector = (self.detectors)().context("build detector")?;
        let notifier = (self.notifiers)().context("build notifier")?;
        let pacing = (settings.skip_frames > 0).then_some(FramePacing {
            every: settings.skip_frames,
            pause: settings.skip_pause,
        });
        Ok(
            IntruderMonitor::new(source, detector, policy, notifier, MonotonicClock::new())
                .with_transform(FrameTransform {
                    mirror: false,
                    resize: Some((settings.frame_width, settings.frame_height)),
                })
                .with_min_confidence(settings.detection_confidence)
                .with_pacing(pacing),
        )
    }

    /// Stop the running session, if any. Returns whether one was running.
    fn stop_session(&mut self) -> bool {
        let Some(session) = self.session.take() else {
            return false;
        };
        session.stop.store(true, Ordering::SeqCst);
        if session.join.join().is_err() {
            log::error!("intruder session thread panicked");
        }
        true
    }

    fn lock_state(&self) -> Result<std::sync::MutexGuard<'_, DashboardState>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("dashboard state lock poisoned"))
    }
}

impl Drop for Dashboard {
    fn drop(&mut self) {
        self.stop_session();
    }
}

fn run_session(mut monitor: IntruderSession, stop: Arc<AtomicBool>, state: Arc<Mutex<DashboardState>>) {
    let result = monitor.run(&stop, |report| {
        let mut image = report.frame.image().clone();
        overlay::annotate_boxes(&mut image, &report.decision.suspicious);
        let jpeg = match overlay::encode_jpeg(&image, overlay::DEFAULT_JPEG_QUALITY) {
            Ok(jpeg) => Some(jpeg),
            Err(e) => {
                log::debug!("frame {} not encoded: {:#}", report.frame.index, e);
                None
            }
        };
        if let Ok(mut state) = state.lock() {
            state.record(report, jpeg);
        }
    });
    if let Err(e) = &result {
        log::warn!("intruder session ended with error: {:#}", e);
    }
    if let Ok(mut state) = state.lock() {
        state.finish(result);
    }
}

fn write_error(stream: &mut TcpStream, status: u16, message: &str) -> Result<()> {
    let body = serde_json::json!({ "error": message }).to_string();
    http::write_json_response(stream, status, &body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MonitorConfig;
    use crate::detect::{BoundingBox, ScriptedBackend};
    use crate::notify::RecordingNotifier;

    fn dashboard() -> Dashboard {
        let mut intruder = MonitorConfig::defaults().unwrap().intruder;
        intruder.skip_frames = 0;
        intruder.frame_width = 64;
        intruder.frame_height = 48;
        let cfg = DashboardConfig {
            addr: "127.0.0.1:0".to_string(),
            intruder,
            max_upload_bytes: 1024,
        };
        let detectors: DetectorFactory = Arc::new(|| {
            let dark = BoundingBox::new(0.0, 0.0, 32.0, 32.0);
            Ok(Box::new(ScriptedBackend::detector(vec![vec![dark]; 50])) as Box<dyn DetectorBackend>)
        });
        let notifiers: NotifierFactory =
            Arc::new(|| Ok(Box::new(RecordingNotifier::default()) as Box<dyn Notifier + Send>));
        Dashboard::new(cfg, detectors, notifiers)
    }

    fn wait_until_idle(state: &Arc<Mutex<DashboardState>>) {
        for _ in 0..1000 {
            if !state.lock().unwrap().running {
                return;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        panic!("session did not finish");
    }

    #[test]
    fn session_runs_to_exhaustion_and_records_alerts() {
        let mut dashboard = dashboard();
        let state = dashboard.state();
        dashboard
            .start_session("stub://yard?frames=12&scene=dark&width=64&height=48", 30, None)
            .unwrap();
        wait_until_idle(&state);

        let state = state.lock().unwrap();
        assert_eq!(state.frames, 12);
        assert_eq!(state.alert, AlertState::Alert);
        assert_eq!(state.suspicious, 1);
        assert_eq!(state.notifications, 1);
        assert_eq!(state.last_stop, Some(StopReason::SourceExhausted));
        assert!(state.latest_jpeg().is_some());
        assert_eq!(
            state.messages.back().map(StatusMessage::text),
            Some("Reached end of video or cannot fetch frame.")
        );
    }

    #[test]
    fn light_scene_never_alerts() {
        let mut dashboard = dashboard();
        let state = dashboard.state();
        dashboard
            .start_session("stub://yard?frames=5&scene=light&width=64&height=48", 30, None)
            .unwrap();
        wait_until_idle(&state);
        let state = state.lock().unwrap();
        assert_eq!(state.alert, AlertState::NoAlert);
        assert_eq!(state.notifications, 0);
    }

    #[test]
    fn stop_ends_an_unbounded_session() {
        let mut dashboard = dashboard();
        let state = dashboard.state();
        dashboard.start_session("stub://yard?scene=dark&width=64&height=48", 30, None).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert!(dashboard.stop_session());
        let state = state.lock().unwrap();
        assert!(!state.running);
        assert_eq!(state.last_stop, Some(StopReason::Cancelled));
    }

    #[test]
    fn new_session_clears_the_previous_frame() {
        let mut state = DashboardState {
            has_frame: true,
            latest_jpeg: Some(vec![0xFF, 0xD8]),
            last_stop: Some(StopReason::SourceExhausted),
            ..DashboardState::default()
        };
        state.begin("stub://yard", 40);
        assert!(state.running);
        assert!(!state.has_frame);
        assert!(state.latest_jpeg().is_none());
        assert_eq!(state.last_stop, None);
        assert_eq!(state.threshold, 40);
    }

    #[test]
    fn bad_threshold_and_source_are_reported() {
        let mut dashboard = dashboard();
        assert!(dashboard.start_session("stub://yard", 101, None).is_err());
        assert!(dashboard.start_session("/no/such/video.mp4", 30, None).is_err());
        let state = dashboard.state();
        let state = state.lock().unwrap();
        assert!(!state.running);
        assert!(matches!(state.messages.back(), Some(StatusMessage::Warning(_))));
    }
}
