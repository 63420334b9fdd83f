//! Minimal HTTP/1.1 server plumbing shared by the dashboard and the relay.
//!
//! One request per connection, `Connection: close` on every response. The
//! accept loop runs on its own thread and polls a shutdown flag between
//! non-blocking accepts.

use anyhow::{anyhow, Context, Result};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const MAX_HEAD_BYTES: usize = 8192;
const READ_TIMEOUT: Duration = Duration::from_secs(5);
const ACCEPT_POLL: Duration = Duration::from_millis(50);

#[derive(Debug)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub raw_path: String,
    headers: HashMap<String, String>,
    /// Body bytes read so far. Complete after `read_request`.
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }

    pub fn content_length(&self) -> Result<usize> {
        match self.header("content-length") {
            Some(value) => value
                .trim()
                .parse()
                .map_err(|_| anyhow!("invalid content-length '{}'", value)),
            None => Ok(0),
        }
    }

    pub fn query_param(&self, key: &str) -> Option<String> {
        let query = self.raw_path.split_once('?')?.1;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }
}

/// Read the request line and headers. Any body bytes that arrived with the
/// head are left in `body`.
pub fn read_request_head<R: Read>(stream: &mut R) -> Result<HttpRequest> {
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    let head_end = loop {
        if let Some(pos) = find_head_end(&data) {
            break pos;
        }
        if data.len() > MAX_HEAD_BYTES {
            return Err(anyhow!("request head too large"));
        }
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed before request head"));
        }
        data.extend_from_slice(&buf[..n]);
    };
    let body = data.split_off(head_end + 4);

    let text = String::from_utf8_lossy(&data);
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }
    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
        raw_path: raw_path.to_string(),
        headers,
        body,
    })
}

/// Read a whole request, body included, refusing bodies over `max_body`.
pub fn read_request<R: Read>(stream: &mut R, max_body: usize) -> Result<HttpRequest> {
    let mut request = read_request_head(stream)?;
    read_body(stream, &mut request, max_body)?;
    Ok(request)
}

/// Finish reading the body of a request returned by `read_request_head`.
pub fn read_body<R: Read>(stream: &mut R, request: &mut HttpRequest, max_body: usize) -> Result<()> {
    let length = request.content_length()?;
    if length > max_body {
        return Err(anyhow!(
            "request body of {} bytes exceeds limit of {}",
            length,
            max_body
        ));
    }
    request.body.truncate(length);
    let start = request.body.len();
    if start < length {
        request.body.resize(length, 0);
        stream
            .read_exact(&mut request.body[start..])
            .context("read request body")?;
    }
    Ok(())
}

/// Copy the body of `request` (as announced by Content-Length) into `out`.
///
/// Returns the number of bytes written.
pub fn copy_body<R: Read, W: Write>(
    stream: &mut R,
    request: &HttpRequest,
    out: &mut W,
    max_body: u64,
) -> Result<u64> {
    let length = request.content_length()? as u64;
    if length > max_body {
        return Err(anyhow!(
            "request body of {} bytes exceeds limit of {}",
            length,
            max_body
        ));
    }
    let prefix = &request.body[..request.body.len().min(length as usize)];
    out.write_all(prefix)?;
    let remaining = length - prefix.len() as u64;
    let copied = std::io::copy(&mut stream.by_ref().take(remaining), out).context("read request body")?;
    if copied != remaining {
        return Err(anyhow!(
            "request body ended after {} of {} bytes",
            prefix.len() as u64 + copied,
            length
        ));
    }
    Ok(length)
}

fn find_head_end(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Wait until the full request head is buffered, without consuming it.
pub fn peek_request_head(stream: &TcpStream) -> Result<Vec<u8>> {
    let deadline = Instant::now() + READ_TIMEOUT;
    let mut buf = vec![0u8; MAX_HEAD_BYTES];
    loop {
        let n = stream.peek(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed before request head"));
        }
        if let Some(pos) = find_head_end(&buf[..n]) {
            buf.truncate(pos + 4);
            return Ok(buf);
        }
        if n == buf.len() {
            return Err(anyhow!("request head too large"));
        }
        if Instant::now() >= deadline {
            return Err(anyhow!("timed out waiting for request head"));
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

/// True when a buffered request head asks for a WebSocket upgrade.
pub fn is_websocket_upgrade(head: &[u8]) -> bool {
    let text = String::from_utf8_lossy(head).to_lowercase();
    text.lines().any(|line| {
        line.split_once(':')
            .is_some_and(|(k, v)| k.trim() == "upgrade" && v.trim() == "websocket")
    })
}

pub fn write_json_response<W: Write>(stream: &mut W, status: u16, body: &str) -> Result<()> {
    write_response(stream, status, "application/json", body.as_bytes())
}

pub fn write_response<W: Write>(
    stream: &mut W,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        204 => "HTTP/1.1 204 No Content",
        400 => "HTTP/1.1 400 Bad Request",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        409 => "HTTP/1.1 409 Conflict",
        413 => "HTTP/1.1 413 Payload Too Large",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nAccess-Control-Allow-Origin: *\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    stream.flush()?;
    Ok(())
}

/// Running accept loop.
#[derive(Debug)]
pub struct ServerHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("server thread panicked"))?;
        }
        Ok(())
    }

    /// Block until the accept loop exits.
    pub fn wait(mut self) -> Result<()> {
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("server thread panicked"))?;
        }
        Ok(())
    }
}

/// Bind `addr` and serve accepted connections one at a time with `handler`
/// on a background thread until `shutdown` is raised.
pub fn spawn_server<H>(addr: &str, name: &'static str, shutdown: Arc<AtomicBool>, mut handler: H) -> Result<ServerHandle>
where
    H: FnMut(TcpStream) -> Result<()> + Send + 'static,
{
    let configured_addr: SocketAddr = addr
        .parse()
        .with_context(|| format!("invalid {} address '{}'", name, addr))?;
    let listener = TcpListener::bind(configured_addr)
        .with_context(|| format!("bind {} to {}", name, configured_addr))?;
    let addr = listener.local_addr()?;
    listener.set_nonblocking(true)?;

    let shutdown_thread = shutdown.clone();
    let join = std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            if let Err(err) = run_accept_loop(listener, name, &shutdown_thread, &mut handler) {
                log::error!("{} stopped: {}", name, err);
            }
        })?;

    Ok(ServerHandle {
        addr,
        shutdown,
        join: Some(join),
    })
}

fn run_accept_loop<H>(listener: TcpListener, name: &str, shutdown: &AtomicBool, handler: &mut H) -> Result<()>
where
    H: FnMut(TcpStream) -> Result<()>,
{
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                stream.set_nonblocking(false)?;
                stream.set_read_timeout(Some(READ_TIMEOUT))?;
                if let Err(err) = handler(stream) {
                    log::warn!("{} request from {} failed: {:#}", name, peer, err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL);
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}
