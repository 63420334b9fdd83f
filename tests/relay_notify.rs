use std::net::TcpStream;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

use visitor_watch::notify::{HttpNotifier, Notifier, WebSocketNotifier};
use visitor_watch::relay::{alert_payload, spawn_relay, RelayHandle};

const TIMEOUT: Duration = Duration::from_secs(5);

fn wait_for_clients(relay: &RelayHandle, count: usize) {
    let deadline = Instant::now() + TIMEOUT;
    while relay.client_count() != count {
        assert!(Instant::now() < deadline, "relay never reached {} clients", count);
        std::thread::sleep(Duration::from_millis(10));
    }
}

fn subscribe(relay: &RelayHandle) -> WebSocket<MaybeTlsStream<TcpStream>> {
    let (socket, _) =
        tungstenite::connect(format!("ws://{}/", relay.addr)).expect("connect listener");
    if let MaybeTlsStream::Plain(stream) = socket.get_ref() {
        stream.set_read_timeout(Some(TIMEOUT)).expect("read timeout");
    }
    socket
}

fn next_text(socket: &mut WebSocket<MaybeTlsStream<TcpStream>>) -> String {
    loop {
        match socket.read().expect("read broadcast") {
            Message::Text(text) => return text,
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame {:?}", other),
        }
    }
}

#[test]
fn http_and_websocket_alerts_reach_listeners() {
    let relay = spawn_relay("127.0.0.1:0", Arc::new(AtomicBool::new(false))).expect("relay");
    let mut listener = subscribe(&relay);
    wait_for_clients(&relay, 1);

    let mut http = HttpNotifier::new(&format!("http://{}/message", relay.addr), TIMEOUT)
        .expect("http notifier");
    http.send("Intruder Alert!").expect("post alert");
    assert_eq!(next_text(&mut listener), alert_payload("Intruder Alert!"));

    let mut ws = WebSocketNotifier::new(&format!("ws://{}/", relay.addr), None, TIMEOUT)
        .expect("ws notifier");
    ws.send("Visitor is Feeding!").expect("ws alert");
    assert_eq!(
        next_text(&mut listener),
        r#"{"title":"Alert","body":"Visitor is Feeding!"}"#
    );

    assert_eq!(relay.hub().broadcast("Gate opened").expect("broadcast"), 2);
    assert_eq!(next_text(&mut listener), alert_payload("Gate opened"));

    drop(ws);
    drop(listener);
    relay.stop().expect("stop relay");
}

#[test]
fn health_and_bad_requests() {
    let relay = spawn_relay("127.0.0.1:0", Arc::new(AtomicBool::new(false))).expect("relay");
    let base = format!("http://{}", relay.addr);

    let health: serde_json::Value = ureq::get(&format!("{}/health", base))
        .call()
        .expect("health")
        .into_json()
        .expect("health json");
    assert_eq!(health["status"], "ok");

    match ureq::post(&format!("{}/message", base)).send_string("not json") {
        Err(ureq::Error::Status(code, _)) => assert_eq!(code, 400),
        other => panic!("expected 400, got {:?}", other.map(|r| r.status())),
    }
    match ureq::get(&format!("{}/elsewhere", base)).call() {
        Err(ureq::Error::Status(code, _)) => assert_eq!(code, 404),
        other => panic!("expected 404, got {:?}", other.map(|r| r.status())),
    }

    relay.stop().expect("stop relay");
}

#[test]
fn http_notifier_reports_unreachable_relay() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let mut http =
        HttpNotifier::new(&format!("http://{}/message", addr), Duration::from_secs(1)).unwrap();
    assert!(http.send("Intruder Alert!").is_err());
}
