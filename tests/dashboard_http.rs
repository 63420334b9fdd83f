use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};

use visitor_watch::config::MonitorConfig;
use visitor_watch::dashboard::{Dashboard, DashboardConfig, DetectorFactory, NotifierFactory};
use visitor_watch::detect::{BoundingBox, DetectorBackend, ScriptedBackend};
use visitor_watch::http::ServerHandle;
use visitor_watch::notify::{Notifier, RecordingNotifier};

const TIMEOUT: Duration = Duration::from_secs(10);
const MAX_UPLOAD: u64 = 1024;

fn spawn_dashboard() -> ServerHandle {
    let mut intruder = MonitorConfig::defaults().expect("defaults").intruder;
    intruder.skip_frames = 0;
    intruder.frame_width = 64;
    intruder.frame_height = 48;
    let detectors: DetectorFactory = Arc::new(|| {
        let dark = BoundingBox::new(0.0, 0.0, 32.0, 32.0);
        Ok(Box::new(ScriptedBackend::detector(vec![vec![dark]; 50])) as Box<dyn DetectorBackend>)
    });
    let notifiers: NotifierFactory =
        Arc::new(|| Ok(Box::new(RecordingNotifier::default()) as Box<dyn Notifier + Send>));
    let dashboard = Dashboard::new(
        DashboardConfig {
            addr: "127.0.0.1:0".to_string(),
            intruder,
            max_upload_bytes: MAX_UPLOAD,
        },
        detectors,
        notifiers,
    );
    dashboard
        .spawn(Arc::new(AtomicBool::new(false)))
        .expect("spawn dashboard")
}

/// Send a request head only and return the whole response.
fn raw(addr: SocketAddr, head: &str) -> String {
    let mut stream = TcpStream::connect(addr).expect("connect");
    stream.set_read_timeout(Some(TIMEOUT)).expect("read timeout");
    stream.write_all(head.as_bytes()).expect("write request");
    let mut response = String::new();
    stream.read_to_string(&mut response).expect("read response");
    response
}

fn status(base: &str) -> Value {
    ureq::get(&format!("{}/status", base))
        .call()
        .expect("status")
        .into_json()
        .expect("status json")
}

fn wait_until_idle(base: &str) -> Value {
    let deadline = Instant::now() + TIMEOUT;
    loop {
        let state = status(base);
        if state["running"] == false {
            return state;
        }
        assert!(Instant::now() < deadline, "session never finished");
        std::thread::sleep(Duration::from_millis(20));
    }
}

fn expect_status(result: Result<ureq::Response, ureq::Error>, code: u16) -> Value {
    match result {
        Err(ureq::Error::Status(got, response)) => {
            assert_eq!(got, code);
            response.into_json().expect("error json")
        }
        other => panic!("expected {}, got {:?}", code, other.map(|r| r.status())),
    }
}

#[test]
fn start_runs_a_session_and_status_reports_it() {
    let server = spawn_dashboard();
    let base = format!("http://{}", server.addr);

    let page = ureq::get(&format!("{}/", base))
        .call()
        .expect("index")
        .into_string()
        .expect("index body");
    assert!(page.contains("<html"));

    let idle = status(&base);
    assert_eq!(idle["running"], false);
    assert_eq!(idle["has_frame"], false);
    expect_status(ureq::get(&format!("{}/frame.jpg", base)).call(), 404);

    let started: Value = ureq::post(&format!("{}/start", base))
        .send_json(json!({
            "source": "stub://yard?frames=8&scene=dark&width=64&height=48",
            "threshold": 30
        }))
        .expect("start")
        .into_json()
        .expect("start json");
    assert_eq!(started["started"], true);

    let state = wait_until_idle(&base);
    assert_eq!(state["threshold"], 30);
    assert_eq!(state["alert"], "alert");
    assert_eq!(state["suspicious"], 1);
    assert_eq!(state["frames"], 8);
    assert_eq!(state["notifications"], 1);
    assert_eq!(state["last_stop"], "source_exhausted");
    assert_eq!(state["has_frame"], true);
    assert!(state["messages"].as_array().is_some_and(|m| !m.is_empty()));

    let frame = ureq::get(&format!("{}/frame.jpg", base)).call().expect("frame");
    assert_eq!(frame.content_type(), "image/jpeg");
    let mut jpeg = Vec::new();
    frame.into_reader().read_to_end(&mut jpeg).expect("frame body");
    assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);

    let stopped: Value = ureq::post(&format!("{}/stop", base))
        .call()
        .expect("stop")
        .into_json()
        .expect("stop json");
    assert_eq!(stopped["stopped"], true);

    server.stop().expect("stop dashboard");
}

#[test]
fn rejects_bad_requests() {
    let server = spawn_dashboard();
    let base = format!("http://{}", server.addr);

    let err = expect_status(
        ureq::post(&format!("{}/start", base)).send_string("{\"source\":"),
        400,
    );
    assert!(err["error"].as_str().is_some_and(|e| e.contains("invalid start request")));

    let err = expect_status(
        ureq::post(&format!("{}/start", base))
            .send_json(json!({ "source": "stub://yard", "threshold": 101 })),
        400,
    );
    assert!(err["error"].as_str().is_some());

    expect_status(ureq::get(&format!("{}/start", base)).call(), 405);
    expect_status(ureq::get(&format!("{}/elsewhere", base)).call(), 404);

    // Rejected from the head alone: no body is ever sent.
    let response = raw(
        server.addr,
        "POST /upload?threshold=101&name=clip.mp4 HTTP/1.1\r\nHost: x\r\nContent-Length: 512\r\n\r\n",
    );
    assert!(response.starts_with("HTTP/1.1 400"), "{}", response);
    assert!(response.contains("between 0 and 100"));

    let response = raw(
        server.addr,
        &format!(
            "POST /upload?name=clip.mp4 HTTP/1.1\r\nHost: x\r\nContent-Length: {}\r\n\r\n",
            MAX_UPLOAD + 1
        ),
    );
    assert!(response.starts_with("HTTP/1.1 413"), "{}", response);

    let response = raw(
        server.addr,
        "POST /start HTTP/1.1\r\nHost: x\r\nContent-Length: 1000000\r\n\r\n",
    );
    assert!(response.starts_with("HTTP/1.1 413"), "{}", response);

    assert_eq!(status(&base)["running"], false);
    server.stop().expect("stop dashboard");
}

#[test]
fn upload_that_is_not_a_video_is_reported() {
    let server = spawn_dashboard();
    let base = format!("http://{}", server.addr);

    let err = expect_status(
        ureq::post(&format!("{}/upload?threshold=40&name=clip.mp4", base))
            .send_bytes(b"definitely not an mp4"),
        400,
    );
    assert!(err["error"].as_str().is_some());

    let state = status(&base);
    assert_eq!(state["running"], false);
    let last = state["messages"]
        .as_array()
        .and_then(|messages| messages.last())
        .cloned()
        .expect("status message");
    assert_eq!(last["level"], "warning");
    assert_eq!(last["text"], "Error: Cannot open video source.");

    server.stop().expect("stop dashboard");
}
