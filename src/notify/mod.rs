//! Alert transports.
//!
//! Notifiers are fire-and-forget: the pipeline reports a failed send and moves
//! on to the next frame.

mod http;
mod tls;
mod websocket;

use anyhow::Result;

pub use http::HttpNotifier;
pub use tls::{build_client_config, TlsMaterials, TlsVerification};
pub use websocket::WebSocketNotifier;

pub trait Notifier {
    /// Transport name for logs.
    fn name(&self) -> &'static str;

    /// Deliver one alert message.
    fn send(&mut self, message: &str) -> Result<()>;
}

impl<N: Notifier + ?Sized> Notifier for Box<N> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn send(&mut self, message: &str) -> Result<()> {
        (**self).send(message)
    }
}

/// Notifier that keeps every message in memory.
#[derive(Clone, Debug, Default)]
pub struct RecordingNotifier {
    pub sent: Vec<String>,
    /// When set, every send fails after being recorded.
    pub fail: bool,
}

impl Notifier for RecordingNotifier {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn send(&mut self, message: &str) -> Result<()> {
        self.sent.push(message.to_string());
        if self.fail {
            return Err(anyhow::anyhow!("recording notifier set to fail"));
        }
        Ok(())
    }
}
