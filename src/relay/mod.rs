//! Alert relay: fans alerts out to connected WebSocket clients.
//!
//! - `POST /message` with `{"message": text}` broadcasts text
//! - text frames from any WebSocket client are broadcast the same way
//! - `GET /health` answers `{"status":"ok"}`
//!
//! Every client, the sender included, receives `{"title":"Alert","body":text}`.
//! Each WebSocket client runs on its own thread and is fed through an mpsc
//! channel registered in the shared [`Hub`].

use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tungstenite::{Message, WebSocket};

use crate::http::{self, ServerHandle};

const CLIENT_POLL: Duration = Duration::from_millis(50);
const MAX_MESSAGE_BODY: usize = 64 * 1024;

#[derive(Serialize)]
struct AlertPayload<'a> {
    title: &'static str,
    body: &'a str,
}

#[derive(Deserialize)]
struct MessageRequest {
    message: String,
}

/// JSON frame sent to WebSocket clients for one alert.
pub fn alert_payload(text: &str) -> String {
    let payload = AlertPayload {
        title: "Alert",
        body: text,
    };
    serde_json::to_string(&payload).unwrap_or_default()
}

/// Registry of connected clients.
#[derive(Clone, Default)]
pub struct Hub {
    inner: Arc<Mutex<HubInner>>,
}

#[derive(Default)]
struct HubInner {
    next_id: u64,
    clients: HashMap<u64, Sender<String>>,
}

impl Hub {
    fn subscribe(&self) -> Result<(u64, Receiver<String>)> {
        let (tx, rx) = mpsc::channel();
        let mut inner = self.lock()?;
        let id = inner.next_id;
        inner.next_id += 1;
        inner.clients.insert(id, tx);
        Ok((id, rx))
    }

    fn unsubscribe(&self, id: u64) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.clients.remove(&id);
        }
    }

    /// Queue `text` for every client. Returns how many clients it reached.
    pub fn broadcast(&self, text: &str) -> Result<usize> {
        let payload = alert_payload(text);
        let mut inner = self.lock()?;
        inner
            .clients
            .retain(|_, tx| tx.send(payload.clone()).is_ok());
        Ok(inner.clients.len())
    }

    pub fn client_count(&self) -> usize {
        self.inner
            .lock()
            .map(|inner| inner.clients.len())
            .unwrap_or(0)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HubInner>> {
        self.inner
            .lock()
            .map_err(|_| anyhow!("relay hub lock poisoned"))
    }
}

/// Running relay.
pub struct RelayHandle {
    pub addr: SocketAddr,
    hub: Hub,
    server: ServerHandle,
}

impl RelayHandle {
    pub fn client_count(&self) -> usize {
        self.hub.client_count()
    }

    /// Broadcast from the hosting process without going through HTTP.
    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    pub fn stop(self) -> Result<()> {
        self.server.stop()
    }

    pub fn wait(self) -> Result<()> {
        self.server.wait()
    }
}

/// Bind `addr` and start relaying until `shutdown` is raised.
pub fn spawn_relay(addr: &str, shutdown: Arc<AtomicBool>) -> Result<RelayHandle> {
    let hub = Hub::default();
    let handler_hub = hub.clone();
    let handler_shutdown = shutdown.clone();
    let server = http::spawn_server(addr, "alert relay", shutdown, move |stream| {
        handle_connection(stream, &handler_hub, &handler_shutdown)
    })?;
    Ok(RelayHandle {
        addr: server.addr,
        hub,
        server,
    })
}

fn handle_connection(mut stream: TcpStream, hub: &Hub, shutdown: &Arc<AtomicBool>) -> Result<()> {
    let head = http::peek_request_head(&stream)?;
    if http::is_websocket_upgrade(&head) {
        let hub = hub.clone();
        let shutdown = shutdown.clone();
        std::thread::Builder::new()
            .name("relay-client".to_string())
            .spawn(move || {
                if let Err(e) = serve_client(stream, &hub, &shutdown) {
                    log::debug!("relay client ended: {:#}", e);
                }
            })?;
        return Ok(());
    }

    let mut request = http::read_request_head(&mut stream)?;
    match (request.method.as_str(), request.path.as_str()) {
        ("POST", "/message") => {}
        ("GET", "/health") => {
            return http::write_json_response(&mut stream, 200, r#"{"status":"ok"}"#)
        }
        (_, "/message" | "/health") => {
            return http::write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#)
        }
        _ => return http::write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#),
    }

    if request.content_length()? > MAX_MESSAGE_BODY {
        return http::write_json_response(&mut stream, 413, r#"{"error":"body_too_large"}"#);
    }
    http::read_body(&mut stream, &mut request, MAX_MESSAGE_BODY)?;
    let message: MessageRequest = match serde_json::from_slice(&request.body) {
        Ok(message) => message,
        Err(_) => {
            return http::write_json_response(&mut stream, 400, r#"{"error":"expected {\"message\": text}"}"#)
        }
    };
    let reached = hub.broadcast(&message.message)?;
    log::info!("relayed message to {} clients: {}", reached, message.message);
    http::write_response(&mut stream, 200, "text/plain", b"OK")
}

fn serve_client(stream: TcpStream, hub: &Hub, shutdown: &AtomicBool) -> Result<()> {
    let peer = stream.peer_addr()?;
    let mut ws = tungstenite::accept(stream).map_err(|e| anyhow!("WebSocket handshake failed: {}", e))?;
    ws.get_ref().set_read_timeout(Some(CLIENT_POLL))?;
    let (id, rx) = hub.subscribe()?;
    log::info!("relay client {} connected", peer);

    let result = pump_client(&mut ws, &rx, hub, shutdown);
    hub.unsubscribe(id);
    let _ = ws.close(None);
    let _ = ws.flush();
    log::info!("relay client {} disconnected", peer);
    result
}

fn pump_client(
    ws: &mut WebSocket<TcpStream>,
    rx: &Receiver<String>,
    hub: &Hub,
    shutdown: &AtomicBool,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            return Ok(());
        }
        loop {
            match rx.try_recv() {
                Ok(payload) => ws.send(Message::Text(payload))?,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return Ok(()),
            }
        }
        match ws.read() {
            Ok(Message::Text(text)) => {
                log::info!("received from client: {}", text);
                hub.broadcast(&text)?;
            }
            Ok(Message::Close(_)) => return Ok(()),
            Ok(_) => {}
            Err(tungstenite::Error::Io(e))
                if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                return Ok(())
            }
            Err(e) => return Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_has_title_and_body() {
        assert_eq!(
            alert_payload("Intruder Alert!"),
            r#"{"title":"Alert","body":"Intruder Alert!"}"#
        );
    }

    #[test]
    fn broadcast_drops_departed_clients() {
        let hub = Hub::default();
        let (_, rx_a) = hub.subscribe().unwrap();
        let (_, rx_b) = hub.subscribe().unwrap();
        drop(rx_b);

        assert_eq!(hub.broadcast("hello").unwrap(), 1);
        assert_eq!(rx_a.try_recv().unwrap(), alert_payload("hello"));
        assert_eq!(hub.client_count(), 1);
    }

    #[test]
    fn unsubscribe_removes_client() {
        let hub = Hub::default();
        let (id, _rx) = hub.subscribe().unwrap();
        hub.unsubscribe(id);
        assert_eq!(hub.broadcast("x").unwrap(), 0);
    }
}
