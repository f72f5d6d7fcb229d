//! Transaction ledger types and the read-only ledger collaborator.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// One recorded acquisition (positive quantity) or disposal (negative quantity).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(deserialize_with = "normalize_instrument")]
    pub isin: String,
    pub quantity: f64,
    #[serde(default)]
    pub unit_price: f64,
    /// Total amount in the reporting currency. The sign is dropped on load;
    /// the direction comes from `quantity`.
    #[serde(alias = "totalPriceEUR", deserialize_with = "absolute_amount")]
    pub total_price: f64,
    pub date: NaiveDate,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Transaction {
    pub fn new(isin: &str, quantity: f64, unit_price: f64, date: NaiveDate) -> Self {
        Self {
            id: None,
            isin: isin.trim().to_uppercase(),
            quantity,
            unit_price,
            total_price: (quantity * unit_price).abs(),
            date,
            created_at: None,
            updated_at: None,
        }
    }

    pub fn is_acquisition(&self) -> bool {
        self.quantity > 0.0
    }
}

fn normalize_instrument<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Ok(raw.trim().to_uppercase())
}

fn absolute_amount<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(f64::deserialize(deserializer)?.abs())
}

/// Orders transactions by date, then creation time. The sort is stable so
/// entries without timestamps keep their ledger order within a day.
pub fn sort_chronologically(transactions: &mut [Transaction]) {
    transactions.sort_by(|a, b| {
        a.date
            .cmp(&b.date)
            .then_with(|| a.created_at.cmp(&b.created_at))
    });
}

/// Source of the transaction ledger. The engine only ever reads from it.
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn list_transactions(&self, owner: &str) -> Result<Vec<Transaction>>;
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LedgerFile {
    Single(Vec<Transaction>),
    ByOwner(HashMap<String, Vec<Transaction>>),
}

/// A ledger stored as a JSON file, either a plain array of transactions or an
/// object keyed by owner.
pub struct JsonFileLedger {
    path: PathBuf,
}

impl JsonFileLedger {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl Ledger for JsonFileLedger {
    async fn list_transactions(&self, owner: &str) -> Result<Vec<Transaction>> {
        if !self.path.exists() {
            debug!("Ledger file {} not found, treating as empty", self.path.display());
            return Ok(Vec::new());
        }

        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read ledger file: {}", self.path.display()))?;

        let file: LedgerFile = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse ledger file: {}", self.path.display()))?;

        let mut transactions = match file {
            LedgerFile::Single(list) => list,
            LedgerFile::ByOwner(mut by_owner) => by_owner.remove(owner).unwrap_or_default(),
        };
        sort_chronologically(&mut transactions);
        debug!(owner, count = transactions.len(), "Loaded ledger");
        Ok(transactions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_transaction_deserialization() {
        let json = r#"{
            "id": "abc",
            "isin": " ie00b4l5y983 ",
            "quantity": 10,
            "unitPrice": 100.5,
            "totalPriceEUR": 1005.0,
            "date": "2024-01-15",
            "createdAt": "2024-01-15T10:00:00Z"
        }"#;
        let tx: Transaction = serde_json::from_str(json).unwrap();
        assert_eq!(tx.isin, "IE00B4L5Y983");
        assert_eq!(tx.quantity, 10.0);
        assert_eq!(tx.total_price, 1005.0);
        assert_eq!(tx.date, date(2024, 1, 15));
        assert!(tx.created_at.is_some());
        assert!(tx.updated_at.is_none());
    }

    #[test]
    fn test_negative_total_price_is_normalized() {
        let json = r#"{"isin": "IE00B4L5Y983", "quantity": 3, "totalPrice": -273.0, "date": "2024-04-02"}"#;
        let tx: Transaction = serde_json::from_str(json).unwrap();
        assert_eq!(tx.total_price, 273.0);
        assert_eq!(tx.unit_price, 0.0);
    }

    #[test]
    fn test_sort_is_chronological_and_stable() {
        let mut txs = vec![
            Transaction::new("B", 1.0, 10.0, date(2024, 2, 1)),
            Transaction::new("A", 1.0, 10.0, date(2024, 1, 1)),
            Transaction::new("C", 1.0, 10.0, date(2024, 2, 1)),
        ];
        sort_chronologically(&mut txs);
        let order: Vec<_> = txs.iter().map(|t| t.isin.as_str()).collect();
        assert_eq!(order, vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn test_json_ledger_by_owner() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "alice": [
                    {{"isin": "IE00B4L5Y983", "quantity": 5, "unitPrice": 120, "totalPrice": 600, "date": "2024-06-01"}},
                    {{"isin": "IE00B4L5Y983", "quantity": 10, "unitPrice": 100, "totalPrice": 1000, "date": "2024-01-01"}}
                ],
                "bob": []
            }}"#
        )
        .unwrap();

        let ledger = JsonFileLedger::new(file.path());
        let alice = ledger.list_transactions("alice").await.unwrap();
        assert_eq!(alice.len(), 2);
        assert_eq!(alice[0].date, date(2024, 1, 1));
        assert!(ledger.list_transactions("bob").await.unwrap().is_empty());
        assert!(ledger.list_transactions("carol").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_json_ledger_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = JsonFileLedger::new(dir.path().join("ledger.json"));
        assert!(ledger.list_transactions("any").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_json_ledger_malformed_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        let ledger = JsonFileLedger::new(file.path());
        let err = ledger.list_transactions("any").await.unwrap_err();
        assert!(err.to_string().starts_with("Failed to parse ledger file"));
    }
}
