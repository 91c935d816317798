//! Push channels: server-initiated updates for one subscription key.
//!
//! A [`PushTransport`] opens a channel for a key and feeds every frame it
//! receives into a [`ChangeSink`]. The registry owns the resulting
//! [`PushChannel`]; when the channel's reader ends, the registry notices and
//! re-establishes it. The WebSocket implementation below runs on
//! `tokio-tungstenite`.

use std::future::Future;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::{ChangeKind, ChangeNotification, SubscriptionKey};
use crate::error::SyncError;

#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Open a live channel for `key`. Frames are delivered through `sink`.
    async fn open(&self, key: &SubscriptionKey, sink: ChangeSink) -> Result<PushChannel, SyncError>;
}

/// Where a push channel delivers change notifications for its key.
#[derive(Debug, Clone)]
pub struct ChangeSink {
    key: SubscriptionKey,
    tx: mpsc::UnboundedSender<ChangeNotification>,
}

impl ChangeSink {
    pub(crate) fn channel(key: SubscriptionKey) -> (Self, mpsc::UnboundedReceiver<ChangeNotification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { key, tx }, rx)
    }

    pub fn key(&self) -> &SubscriptionKey {
        &self.key
    }

    /// Deliver a notification. Returns false once the subscriber is gone.
    pub fn send(&self, kind: ChangeKind, payload: Option<serde_json::Value>) -> bool {
        self.tx
            .send(ChangeNotification::new(self.key.clone(), kind, payload))
            .is_ok()
    }

    pub fn updated(&self, payload: Option<serde_json::Value>) -> bool {
        self.send(ChangeKind::Updated, payload)
    }
}

/// A running push channel. Dropping it stops delivery.
#[derive(Debug)]
pub struct PushChannel {
    reader: JoinHandle<()>,
}

impl PushChannel {
    /// Run `reader` as the channel's delivery loop; the channel ends with it.
    pub fn spawn<F>(reader: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            reader: tokio::spawn(reader),
        }
    }

    /// Resolves when the server side ends the channel.
    pub async fn closed(&mut self) {
        let _ = (&mut self.reader).await;
    }

    pub fn is_closed(&self) -> bool {
        self.reader.is_finished()
    }
}

impl Drop for PushChannel {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Frame format sent by the push endpoint.
#[derive(Debug, Deserialize)]
struct PushFrame {
    kind: ChangeKind,
    #[serde(default)]
    payload: Option<serde_json::Value>,
}

/// Push transport over WebSocket.
///
/// Connects to `{url}?resource=..&filter=..[&token=..]`; every text frame is
/// a `{ "kind": "resource-updated" | "error", "payload": ... }` object.
#[derive(Debug, Clone)]
pub struct WsPushTransport {
    url: String,
    token: Option<String>,
}

impl WsPushTransport {
    pub fn new(url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            url: url.into(),
            token,
        }
    }

    pub fn channel_url(&self, key: &SubscriptionKey) -> Result<url::Url, SyncError> {
        let mut params = vec![
            ("resource", key.resource.as_str()),
            ("filter", key.filter.as_str()),
        ];
        if let Some(token) = &self.token {
            params.push(("token", token.as_str()));
        }
        url::Url::parse_with_params(&self.url, &params)
            .map_err(|e| SyncError::channel(key, format!("invalid push url {}: {e}", self.url)))
    }
}

#[async_trait]
impl PushTransport for WsPushTransport {
    async fn open(&self, key: &SubscriptionKey, sink: ChangeSink) -> Result<PushChannel, SyncError> {
        let url = self.channel_url(key)?;
        let (mut ws_stream, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| SyncError::channel(key, e))?;
        tracing::info!(key = %key, "push channel connected");

        let key = key.clone();
        Ok(PushChannel::spawn(async move {
            while let Some(msg_result) = ws_stream.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => match serde_json::from_str::<PushFrame>(&text) {
                        Ok(frame) => {
                            if !sink.send(frame.kind, frame.payload) {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(key = %key, error = %e, "unparseable push frame")
                        }
                    },
                    Ok(Message::Close(_)) => {
                        tracing::info!(key = %key, "push channel received close frame");
                        break;
                    }
                    Ok(Message::Ping(data)) => {
                        // Pong is handled automatically by tungstenite
                        tracing::trace!(key = %key, len = data.len(), "received ping");
                    }
                    Ok(_) => {
                        // Ignore binary, pong, etc.
                    }
                    Err(e) => {
                        tracing::error!(key = %key, error = %e, "push channel read error");
                        break;
                    }
                }
            }
            tracing::info!(key = %key, "push channel closed");
        }))
    }
}
