//! Transaction feed: contributions and loans merged into one timeline.

use async_trait::async_trait;
use chama_shared::{Contribution, Loan, Transaction};

use super::{absent_as_empty, CONTRIBUTIONS, LOANS};
use crate::api_client::ApiClient;
use crate::error::SyncError;
use crate::sync::SnapshotSource;

pub const DEFAULT_TRANSACTION_LIMIT: usize = 50;

/// Source of the user's transaction feed.
///
/// Contributions are required. Loans come from an optional endpoint; a server
/// without it yields a contributions-only feed.
#[derive(Debug, Clone)]
pub struct ContributionsSource {
    api: ApiClient,
    limit: usize,
}

impl ContributionsSource {
    pub fn new(api: ApiClient) -> Self {
        Self {
            api,
            limit: DEFAULT_TRANSACTION_LIMIT,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

#[async_trait]
impl SnapshotSource for ContributionsSource {
    type Item = Transaction;

    fn resource(&self) -> &'static str {
        CONTRIBUTIONS
    }

    async fn fetch(&self, user_id: &str) -> Result<Vec<Transaction>, SyncError> {
        let (contributions, loans) = tokio::try_join!(
            async {
                self.api
                    .get_user_records::<Contribution>(CONTRIBUTIONS, user_id)
                    .await
                    .map_err(SyncError::from)
            },
            async { absent_as_empty(self.api.get_optional_user_records::<Loan>(LOANS, user_id).await) },
        )?;
        tracing::debug!(
            user_id,
            contributions = contributions.len(),
            loans = loans.len(),
            "fetched transaction sources"
        );
        Ok(merge_transactions(&contributions, &loans, self.limit))
    }
}

/// Merge into one feed, newest first, keeping at most `limit` entries.
///
/// Entries with the same date keep contributions ahead of loans.
pub fn merge_transactions(
    contributions: &[Contribution],
    loans: &[Loan],
    limit: usize,
) -> Vec<Transaction> {
    let mut feed: Vec<Transaction> = contributions
        .iter()
        .map(Transaction::from)
        .chain(loans.iter().map(Transaction::from))
        .collect();
    feed.sort_by(|a, b| b.date.cmp(&a.date));
    feed.truncate(limit);
    feed
}
