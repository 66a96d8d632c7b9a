//! Outbound webhook delivery.
//!
//! One bounded-timeout POST per event; retries are intentionally not a
//! delivery concern, since repeated firings come from the event source
//! itself.

use crate::error::{Error, Result};
use futures::io::AsyncReadExt;
use isahc::config::Configurable;
use isahc::{AsyncBody, HttpClient, Request};
use std::time::Duration;

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

pub struct WebhookSender {
    client: HttpClient,
}

impl WebhookSender {
    pub fn new() -> Result<Self> {
        let client = HttpClient::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| Error::Internal(format!("build webhook client: {e}")))?;
        Ok(Self { client })
    }

    /// POST the payload. `Ok` means the endpoint answered 2xx.
    pub async fn deliver(&self, url: &str, payload: &serde_json::Value) -> Result<()> {
        let body = serde_json::to_vec(payload)?;
        let request = Request::post(url)
            .timeout(DELIVERY_TIMEOUT)
            .header("content-type", "application/json")
            .body(AsyncBody::from(body))
            .map_err(|e| Error::InvalidInput(format!("bad webhook url {url:?}: {e}")))?;

        let mut response = self
            .client
            .send_async(request)
            .await
            .map_err(|e| Error::http("webhook delivery", e))?;

        // Drain so the connection can be reused.
        let mut drain = Vec::new();
        let _ = response.body_mut().read_to_end(&mut drain).await;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Error::Internal(format!(
                "webhook endpoint answered {}",
                response.status()
            )))
        }
    }
}
