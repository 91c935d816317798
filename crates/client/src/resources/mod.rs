//! Snapshot sources for the chama resources the client keeps fresh.

pub mod contributions;
pub mod groups;
pub mod notifications;

pub use contributions::{merge_transactions, ContributionsSource};
pub use groups::GroupsSource;
pub use notifications::{unread_count, NotificationsSource};

use crate::error::SyncError;

pub const CONTRIBUTIONS: &str = "contributions";
pub const LOANS: &str = "loans";
pub const GROUPS: &str = "groups";
pub const NOTIFICATIONS: &str = "notifications";

/// Read an optional endpoint the server lacks as an empty list.
pub(crate) fn absent_as_empty<T>(result: Result<Vec<T>, SyncError>) -> Result<Vec<T>, SyncError> {
    match result {
        Err(SyncError::NotFound { endpoint }) => {
            tracing::trace!(endpoint = %endpoint, "optional endpoint absent, using empty list");
            Ok(Vec::new())
        }
        other => other,
    }
}
