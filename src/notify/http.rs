use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use url::Url;

use super::Notifier;

#[derive(Serialize)]
struct MessageBody<'a> {
    message: &'a str,
}

/// One-shot JSON POST per alert.
pub struct HttpNotifier {
    agent: ureq::Agent,
    url: Url,
}

impl HttpNotifier {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let url = Url::parse(url).with_context(|| format!("invalid alert URL '{}'", url))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(anyhow!(
                "alert URL must use http or https, got '{}'",
                url.scheme()
            ));
        }
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Ok(Self { agent, url })
    }
}

impl Notifier for HttpNotifier {
    fn name(&self) -> &'static str {
        "http"
    }

    fn send(&mut self, message: &str) -> Result<()> {
        match self
            .agent
            .post(self.url.as_str())
            .send_json(MessageBody { message })
        {
            Ok(response) if response.status() == 200 => Ok(()),
            Ok(response) => Err(anyhow!(
                "alert endpoint {} answered {}",
                self.url,
                response.status()
            )),
            Err(ureq::Error::Status(code, _)) => {
                Err(anyhow!("alert endpoint {} answered {}", self.url, code))
            }
            Err(err) => Err(err).with_context(|| format!("POST {}", self.url)),
        }
    }
}
