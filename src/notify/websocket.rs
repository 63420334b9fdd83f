use std::io::ErrorKind;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use rustls::ClientConfig;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Connector, Message, WebSocket};
use url::Url;

use super::Notifier;

const DRAIN_TIMEOUT: Duration = Duration::from_millis(1);

type Socket = WebSocket<MaybeTlsStream<TcpStream>>;

/// Persistent WebSocket client that sends one text message per alert.
///
/// The connection is opened on the first send. When a send fails the socket is
/// dropped and the next send reconnects; the failed message is not retried.
pub struct WebSocketNotifier {
    url: Url,
    tls: Option<Arc<ClientConfig>>,
    timeout: Duration,
    socket: Option<Socket>,
}

impl WebSocketNotifier {
    /// `tls` is required for `wss://` URLs and ignored for `ws://`.
    pub fn new(url: &str, tls: Option<Arc<ClientConfig>>, timeout: Duration) -> Result<Self> {
        let url = Url::parse(url).with_context(|| format!("invalid WebSocket URL '{}'", url))?;
        match url.scheme() {
            "ws" => {}
            "wss" if tls.is_some() => {}
            "wss" => return Err(anyhow!("wss:// URL requires a TLS client configuration")),
            other => {
                return Err(anyhow!(
                    "WebSocket URL must use ws or wss, got '{}'",
                    other
                ))
            }
        }
        Ok(Self {
            url,
            tls,
            timeout,
            socket: None,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    fn connect(&mut self) -> Result<Socket> {
        let host = self
            .url
            .host_str()
            .ok_or_else(|| anyhow!("WebSocket URL has no host: {}", self.url))?;
        let port = self
            .url
            .port_or_known_default()
            .ok_or_else(|| anyhow!("WebSocket URL has no port: {}", self.url))?;
        let addr = (host, port)
            .to_socket_addrs()
            .with_context(|| format!("resolve {}:{}", host, port))?
            .next()
            .ok_or_else(|| anyhow!("{}:{} resolved to no addresses", host, port))?;

        let stream = TcpStream::connect_timeout(&addr, self.timeout)
            .with_context(|| format!("connect to {}", addr))?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;
        stream.set_nodelay(true)?;

        let connector = match self.url.scheme() {
            "wss" => self.tls.clone().map(Connector::Rustls),
            _ => Some(Connector::Plain),
        };
        let (socket, response) =
            tungstenite::client_tls_with_config(self.url.as_str(), stream, None, connector)
                .map_err(|e| anyhow!("WebSocket handshake with {} failed: {}", self.url, e))?;
        log::info!(
            "connected to alert endpoint {} ({})",
            self.url,
            response.status()
        );

        if let Some(tcp) = tcp_stream(socket.get_ref()) {
            tcp.set_read_timeout(Some(DRAIN_TIMEOUT))?;
        }
        Ok(socket)
    }
}

fn tcp_stream(stream: &MaybeTlsStream<TcpStream>) -> Option<&TcpStream> {
    match stream {
        MaybeTlsStream::Plain(tcp) => Some(tcp),
        MaybeTlsStream::Rustls(tls) => Some(tls.get_ref()),
        _ => None,
    }
}

/// Read whatever the server pushed back (relay broadcasts, pings) so the
/// receive buffer never fills.
fn drain(socket: &mut Socket) -> Result<()> {
    loop {
        match socket.read() {
            Ok(message) => log::debug!("alert endpoint sent {} bytes", message.len()),
            Err(tungstenite::Error::Io(e))
                if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
            {
                return Ok(())
            }
            Err(e) => return Err(anyhow!("WebSocket read failed: {}", e)),
        }
    }
}

impl Notifier for WebSocketNotifier {
    fn name(&self) -> &'static str {
        "websocket"
    }

    fn send(&mut self, message: &str) -> Result<()> {
        let mut socket = match self.socket.take() {
            Some(socket) => socket,
            None => self.connect()?,
        };
        if let Err(e) = drain(&mut socket) {
            log::debug!("dropping stale WebSocket connection: {:#}", e);
            socket = self.connect()?;
        }
        socket
            .send(Message::Text(message.to_string()))
            .map_err(|e| anyhow!("WebSocket send to {} failed: {}", self.url, e))?;
        self.socket = Some(socket);
        Ok(())
    }
}

impl Drop for WebSocketNotifier {
    fn drop(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            let _ = socket.close(None);
            let _ = socket.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn rejects_unsupported_schemes() {
        assert!(WebSocketNotifier::new("http://localhost:3000", None, Duration::from_secs(1)).is_err());
        let err = WebSocketNotifier::new("wss://localhost:3000", None, Duration::from_secs(1))
            .err()
            .unwrap();
        assert!(err.to_string().contains("TLS"));
    }

    #[test]
    fn connects_lazily_and_sends_text() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut ws = tungstenite::accept(stream).unwrap();
            let mut received = Vec::new();
            while received.len() < 2 {
                match ws.read().unwrap() {
                    Message::Text(text) => received.push(text),
                    _ => continue,
                }
            }
            received
        });

        let mut notifier =
            WebSocketNotifier::new(&format!("ws://{}/", addr), None, Duration::from_secs(5)).unwrap();
        assert!(!notifier.is_connected());
        notifier.send("Visitor is Feeding!").unwrap();
        assert!(notifier.is_connected());
        notifier.send("Visitor is Feeding!").unwrap();

        let received = server.join().unwrap();
        assert_eq!(received, vec!["Visitor is Feeding!", "Visitor is Feeding!"]);
    }

    #[test]
    fn unreachable_endpoint_fails_without_connecting() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let mut notifier =
            WebSocketNotifier::new(&format!("ws://{}/", addr), None, Duration::from_secs(1)).unwrap();
        assert!(notifier.send("Visitor is Feeding!").is_err());
        assert!(!notifier.is_connected());
    }
}
