//! Change notifications delivered to subscribers.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::SubscriptionKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    /// Something about the resource changed; re-fetch it.
    #[serde(rename = "resource-updated")]
    Updated,
    /// The channel reported a problem. The payload carries the message.
    #[serde(rename = "error")]
    Error,
}

/// Envelope for a change signal. Polling never fetches data itself, so
/// notifications from the polling engine carry no payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeNotification {
    pub id: Uuid,
    pub kind: ChangeKind,
    pub key: SubscriptionKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    pub at: DateTime<Utc>,
}

impl ChangeNotification {
    pub fn new(key: SubscriptionKey, kind: ChangeKind, payload: Option<serde_json::Value>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            key,
            payload,
            at: Utc::now(),
        }
    }

    pub fn updated(key: SubscriptionKey) -> Self {
        Self::new(key, ChangeKind::Updated, None)
    }

    pub fn error(key: SubscriptionKey, message: impl Into<String>) -> Self {
        Self::new(
            key,
            ChangeKind::Error,
            Some(serde_json::Value::String(message.into())),
        )
    }

    pub fn is_update(&self) -> bool {
        self.kind == ChangeKind::Updated
    }
}

/// Async callback invoked once per notification.
///
/// Calling the callback must only build the future; work belongs inside it.
pub type ChangeCallback = Arc<dyn Fn(ChangeNotification) -> BoxFuture<'static, ()> + Send + Sync>;

/// Wrap an async closure as a [`ChangeCallback`].
pub fn change_callback<F, Fut>(f: F) -> ChangeCallback
where
    F: Fn(ChangeNotification) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |notification| Box::pin(f(notification)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_use_wire_names() {
        let n = ChangeNotification::updated(SubscriptionKey::new("groups", "u1"));
        let json = serde_json::to_value(&n).unwrap();
        assert_eq!(json["kind"], "resource-updated");
        assert!(json.get("payload").is_none());

        let e = ChangeNotification::error(SubscriptionKey::new("groups", "u1"), "boom");
        assert!(!e.is_update());
        assert_eq!(serde_json::to_value(&e).unwrap()["kind"], "error");
    }
}
