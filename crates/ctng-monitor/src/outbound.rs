//! Outbound peer delivery.
//!
//! The agreement core emits messages through this seam so it can run
//! behind any transport: production uses a pooled HTTP client, the
//! integration tests use an in-process dispatcher. Delivery is
//! fire-and-forget; failures are logged and the timer subsystem drives
//! retransmission.

use async_trait::async_trait;
use tracing::debug;

/// One-way message delivery to a peer address.
#[async_trait]
pub trait Outbound: Send + Sync {
    /// POST `body` to `http://{addr}{path}`. Never fails from the caller's
    /// point of view.
    async fn post(&self, addr: &str, path: &str, body: Vec<u8>);
}

/// Production transport: a shared `reqwest` client.
pub struct HttpOutbound {
    client: reqwest::Client,
}

impl HttpOutbound {
    pub fn new() -> Self {
        HttpOutbound {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpOutbound {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Outbound for HttpOutbound {
    async fn post(&self, addr: &str, path: &str, body: Vec<u8>) {
        let url = format!("http://{addr}{path}");
        if let Err(err) = self
            .client
            .post(&url)
            .header("content-type", "application/json")
            .body(body)
            .send()
            .await
        {
            debug!(%url, %err, "outbound post failed");
        }
    }
}
