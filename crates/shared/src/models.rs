//! Shared data models for the chama API and the live-data sync core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

// --- Connection ---

/// Health of live data as seen by the connection monitor.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connected,
    Connecting,
    #[default]
    Disconnected,
    Error,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(self, ConnectionStatus::Connecting)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- Lenient field decoding ---
//
// The API server is not ours. Ids come back as numbers from some endpoints and
// strings from others, and decimal columns are serialized as strings.

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(i64),
}

impl From<RawId> for String {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Text(s) => s,
            RawId::Number(n) => n.to_string(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawAmount {
    Number(f64),
    Text(String),
}

impl RawAmount {
    fn into_f64<E: serde::de::Error>(self) -> Result<f64, E> {
        match self {
            RawAmount::Number(n) => Ok(n),
            RawAmount::Text(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|e| E::custom(format!("invalid amount {s:?}: {e}"))),
        }
    }
}

fn de_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    RawId::deserialize(deserializer).map(String::from)
}

fn de_opt_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(Option::<RawId>::deserialize(deserializer)?.map(String::from))
}

fn de_amount<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    RawAmount::deserialize(deserializer)?.into_f64()
}

fn de_opt_amount<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    Option::<RawAmount>::deserialize(deserializer)?
        .map(RawAmount::into_f64)
        .transpose()
}

// --- Records ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Contribution {
    #[serde(deserialize_with = "de_id")]
    pub id: String,
    #[serde(default, alias = "group_id", deserialize_with = "de_opt_id")]
    pub group_id: Option<String>,
    #[serde(default, alias = "group_name")]
    pub group_name: Option<String>,
    #[serde(deserialize_with = "de_amount")]
    pub amount: f64,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, alias = "payment_method")]
    pub payment_method: Option<String>,
    #[serde(alias = "created_at", alias = "date")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Loan {
    #[serde(deserialize_with = "de_id")]
    pub id: String,
    #[serde(default, alias = "group_id", deserialize_with = "de_opt_id")]
    pub group_id: Option<String>,
    #[serde(default, alias = "group_name")]
    pub group_name: Option<String>,
    #[serde(deserialize_with = "de_amount")]
    pub amount: f64,
    #[serde(default, alias = "interest_rate", deserialize_with = "de_opt_amount")]
    pub interest_rate: Option<f64>,
    #[serde(default, alias = "amount_repaid", deserialize_with = "de_opt_amount")]
    pub amount_repaid: Option<f64>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub purpose: Option<String>,
    #[serde(alias = "created_at", alias = "application_date", alias = "applicationDate")]
    pub created_at: DateTime<Utc>,
    #[serde(default, alias = "due_date")]
    pub due_date: Option<DateTime<Utc>>,
}

impl Loan {
    /// Principal not yet repaid, never negative.
    pub fn outstanding(&self) -> f64 {
        (self.amount - self.amount_repaid.unwrap_or(0.0)).max(0.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    #[serde(deserialize_with = "de_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, alias = "member_count")]
    pub member_count: Option<u32>,
    #[serde(default, alias = "contribution_amount", deserialize_with = "de_opt_amount")]
    pub contribution_amount: Option<f64>,
    #[serde(default, alias = "contribution_frequency")]
    pub contribution_frequency: Option<String>,
    #[serde(default, alias = "total_savings", deserialize_with = "de_opt_amount")]
    pub total_savings: Option<f64>,
    #[serde(default, alias = "created_at")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(deserialize_with = "de_id")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub message: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default, alias = "is_read", alias = "isRead")]
    pub read: bool,
    #[serde(alias = "created_at")]
    pub created_at: DateTime<Utc>,
}

// --- Transaction feed ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum TransactionKind {
    Contribution,
    Loan,
}

/// One entry of the unified transaction feed built from contributions and loans.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    /// Prefixed with the record kind so contribution and loan ids never collide.
    pub id: String,
    pub kind: TransactionKind,
    pub group_id: Option<String>,
    pub group_name: Option<String>,
    pub amount: f64,
    pub status: Option<String>,
    pub description: String,
    pub date: DateTime<Utc>,
}

impl From<&Contribution> for Transaction {
    fn from(c: &Contribution) -> Self {
        let description = match &c.group_name {
            Some(name) => format!("Contribution to {name}"),
            None => "Contribution".to_string(),
        };
        Self {
            id: format!("contribution-{}", c.id),
            kind: TransactionKind::Contribution,
            group_id: c.group_id.clone(),
            group_name: c.group_name.clone(),
            amount: c.amount,
            status: c.status.clone(),
            description,
            date: c.created_at,
        }
    }
}

impl From<&Loan> for Transaction {
    fn from(l: &Loan) -> Self {
        let description = match &l.purpose {
            Some(purpose) if !purpose.trim().is_empty() => format!("Loan: {}", purpose.trim()),
            _ => "Loan".to_string(),
        };
        Self {
            id: format!("loan-{}", l.id),
            kind: TransactionKind::Loan,
            group_id: l.group_id.clone(),
            group_name: l.group_name.clone(),
            amount: l.amount,
            status: l.status.clone(),
            description,
            date: l.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn contribution_accepts_numeric_id_and_string_amount() {
        let c: Contribution = serde_json::from_value(json!({
            "id": 17,
            "group_id": 4,
            "amount": "1500.50",
            "status": "completed",
            "created_at": "2024-03-01T10:00:00Z"
        }))
        .unwrap();

        assert_eq!(c.id, "17");
        assert_eq!(c.group_id.as_deref(), Some("4"));
        assert_eq!(c.amount, 1500.5);
        assert_eq!(c.payment_method, None);
    }

    #[test]
    fn invalid_amount_is_rejected() {
        let result = serde_json::from_value::<Contribution>(json!({
            "id": "c1",
            "amount": "lots",
            "createdAt": "2024-03-01T10:00:00Z"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn loan_maps_into_transaction() {
        let loan: Loan = serde_json::from_value(json!({
            "id": "l9",
            "groupName": "Umoja",
            "amount": 10000,
            "amountRepaid": "2500",
            "purpose": " school fees ",
            "applicationDate": "2024-02-11T08:30:00Z"
        }))
        .unwrap();

        assert_eq!(loan.outstanding(), 7500.0);

        let tx = Transaction::from(&loan);
        assert_eq!(tx.id, "loan-l9");
        assert_eq!(tx.kind, TransactionKind::Loan);
        assert_eq!(tx.description, "Loan: school fees");
        assert_eq!(tx.date, loan.created_at);
    }

    #[test]
    fn notification_reads_type_and_read_flag() {
        let n: Notification = serde_json::from_value(json!({
            "id": 3,
            "title": "Loan approved",
            "message": "Your loan was approved",
            "type": "loan",
            "is_read": true,
            "created_at": "2024-04-01T12:00:00Z"
        }))
        .unwrap();

        assert_eq!(n.kind.as_deref(), Some("loan"));
        assert!(n.read);
    }

    #[test]
    fn connection_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&ConnectionStatus::Connecting).unwrap(),
            "\"connecting\""
        );
        assert_eq!(ConnectionStatus::default(), ConnectionStatus::Disconnected);
    }
}
