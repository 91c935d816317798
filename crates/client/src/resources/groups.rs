use async_trait::async_trait;
use chama_shared::Group;

use super::GROUPS;
use crate::api_client::ApiClient;
use crate::error::SyncError;
use crate::sync::SnapshotSource;

/// Groups the user belongs to, in server order.
#[derive(Debug, Clone)]
pub struct GroupsSource {
    api: ApiClient,
}

impl GroupsSource {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }
}

#[async_trait]
impl SnapshotSource for GroupsSource {
    type Item = Group;

    fn resource(&self) -> &'static str {
        GROUPS
    }

    async fn fetch(&self, user_id: &str) -> Result<Vec<Group>, SyncError> {
        Ok(self.api.get_user_records(GROUPS, user_id).await?)
    }
}
