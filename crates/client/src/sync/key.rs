use serde::{Deserialize, Serialize};

/// Identity of a subscription: a resource name plus a filter (usually a user id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionKey {
    pub resource: String,
    pub filter: String,
}

impl SubscriptionKey {
    pub fn new(resource: impl Into<String>, filter: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            filter: filter.into(),
        }
    }
}

impl std::fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.resource, self.filter)
    }
}
