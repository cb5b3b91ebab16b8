//! Per-view isolation channel
//!
//! Plugin code reaches the host only through a [`PluginChannel`]. The
//! plugin id is fixed when the channel is connected, so a request can
//! never claim to come from another plugin.
//!
//! ```text
//!   view surface ──PluginChannel(id="json-tool")──▶ endpoint task
//!                     encoded CapabilityRequest          │
//!                                                        ▼
//!                                     broker.handle("json-tool", request)
//!                                                        │
//!                 ◀──────────── encoded ApiResponse ─────┘
//! ```

use crate::broker::CapabilityBroker;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use unihub_plugin_api::{
    decode, encode, ApiResponse, CapabilityRequest, Transport, TransportError, TransportFuture,
};

const CHANNEL_CAPACITY: usize = 64;

struct Envelope {
    payload: Vec<u8>,
    reply: oneshot::Sender<Vec<u8>>,
}

/// Plugin-side handle of a view's message channel
///
/// Cloning shares the same endpoint; the endpoint task ends when the last
/// handle is dropped.
#[derive(Clone)]
pub struct PluginChannel {
    plugin_id: Arc<str>,
    tx: mpsc::Sender<Envelope>,
}

impl PluginChannel {
    /// Bind a new channel to `plugin_id` and start its endpoint task
    pub fn connect(broker: Arc<CapabilityBroker>, plugin_id: impl Into<String>) -> Self {
        let plugin_id: Arc<str> = Arc::from(plugin_id.into());
        let (tx, mut rx) = mpsc::channel::<Envelope>(CHANNEL_CAPACITY);

        let endpoint_id = Arc::clone(&plugin_id);
        tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                let broker = Arc::clone(&broker);
                let plugin_id = Arc::clone(&endpoint_id);
                tokio::spawn(async move {
                    let response = serve(&broker, &plugin_id, &envelope.payload).await;
                    let _ = envelope.reply.send(response);
                });
            }
            tracing::debug!(plugin = %endpoint_id, "Plugin channel closed");
        });

        Self { plugin_id, tx }
    }

    /// The id every request on this channel is attributed to
    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    /// Send a typed request and decode the response
    pub async fn request(
        &self,
        request: &CapabilityRequest,
    ) -> Result<ApiResponse<Value>, TransportError> {
        let payload = encode(request).map_err(|e| TransportError::Other(e.to_string()))?;
        let reply = self.call(payload).await?;
        decode(&reply).map_err(|e| TransportError::Other(e.to_string()))
    }

    /// Whether the endpoint is still running
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

impl Transport for PluginChannel {
    fn call(&self, payload: Vec<u8>) -> TransportFuture<'_> {
        Box::pin(async move {
            let (reply, response) = oneshot::channel();
            self.tx
                .send(Envelope { payload, reply })
                .await
                .map_err(|_| TransportError::Closed)?;
            response.await.map_err(|_| TransportError::Closed)
        })
    }
}

impl std::fmt::Debug for PluginChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginChannel")
            .field("plugin_id", &self.plugin_id)
            .finish()
    }
}

async fn serve(broker: &CapabilityBroker, plugin_id: &str, payload: &[u8]) -> Vec<u8> {
    let response = match decode::<CapabilityRequest>(payload) {
        Ok(request) => broker.handle(plugin_id, request).await,
        Err(e) => {
            tracing::warn!(plugin = %plugin_id, error = %e, "Malformed plugin request");
            ApiResponse::failure(format!("Malformed request: {}", e))
        }
    };

    match encode(&response) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!(plugin = %plugin_id, error = %e, "Failed to encode response");
            encode(&ApiResponse::<Value>::failure("Failed to encode response")).unwrap_or_default()
        }
    }
}
