use async_trait::async_trait;
use chama_shared::Notification;

use super::{absent_as_empty, NOTIFICATIONS};
use crate::api_client::ApiClient;
use crate::error::SyncError;
use crate::sync::SnapshotSource;

/// The user's notifications, newest first.
///
/// Not every server has the notifications endpoint; without it the feed is
/// simply empty.
#[derive(Debug, Clone)]
pub struct NotificationsSource {
    api: ApiClient,
}

impl NotificationsSource {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }
}

#[async_trait]
impl SnapshotSource for NotificationsSource {
    type Item = Notification;

    fn resource(&self) -> &'static str {
        NOTIFICATIONS
    }

    async fn fetch(&self, user_id: &str) -> Result<Vec<Notification>, SyncError> {
        let mut notifications: Vec<Notification> =
            absent_as_empty(self.api.get_optional_user_records(NOTIFICATIONS, user_id).await)?;
        notifications.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(notifications)
    }
}

pub fn unread_count(notifications: &[Notification]) -> usize {
    notifications.iter().filter(|n| !n.read).count()
}
