use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::normalizer::TimestampValue;

/// Shown instead of a transaction hash for rows never written on chain.
pub const NOT_ON_CHAIN: &str = "Not on chain";

const TX_PREVIEW_CHARS: usize = 10;

/// Backend identifier. Integers on the wire, free text from manual search.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(id: impl Into<String>) -> Self {
        RecordId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        RecordId(s.to_string())
    }
}

impl From<String> for RecordId {
    fn from(s: String) -> Self {
        RecordId(s)
    }
}

impl From<u64> for RecordId {
    fn from(n: u64) -> Self {
        RecordId(n.to_string())
    }
}

impl Serialize for RecordId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0.parse::<u64>() {
            Ok(n) if n.to_string() == self.0 => serializer.serialize_u64(n),
            _ => serializer.serialize_str(&self.0),
        }
    }
}

impl<'de> Deserialize<'de> for RecordId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Unsigned(u64),
            Signed(i64),
            Text(String),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Unsigned(n) => RecordId(n.to_string()),
            Raw::Signed(n) => RecordId(n.to_string()),
            Raw::Text(s) => RecordId(s),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    #[serde(default, deserialize_with = "null_as_default")]
    pub data: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub modified_by: String,
    #[serde(default)]
    pub timestamp: TimestampValue,
}

/// Audit operation. The backend spells these `I`/`U`/`D` in its own log rows
/// and `INSERT`/`UPDATE`/`DELETE` in rows rebuilt from chain events.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Operation {
    Add,
    Update,
    Delete,
    Verify,
    Other(String),
}

impl Operation {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "I" | "INSERT" | "ADD" => Operation::Add,
            "U" | "UPDATE" => Operation::Update,
            "D" | "DELETE" => Operation::Delete,
            "V" | "VERIFY" => Operation::Verify,
            _ => Operation::Other(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Operation::Add => "add",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::Verify => "verify",
            Operation::Other(raw) => raw,
        }
    }
}

impl From<String> for Operation {
    fn from(raw: String) -> Self {
        Operation::parse(&raw)
    }
}

impl From<Operation> for String {
    fn from(op: Operation) -> Self {
        op.as_str().to_string()
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of a record's audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(default)]
    pub log_id: Option<u64>,
    pub operation: Operation,
    #[serde(default, deserialize_with = "null_as_default")]
    pub user_id: String,
    #[serde(default)]
    pub timestamp: TimestampValue,
    #[serde(default, alias = "txHash")]
    pub blockchain_tx: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_hash: Option<String>,
    #[serde(default, rename = "blockNumber", skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
}

impl HistoryEntry {
    /// First ten characters of the transaction hash, or [`NOT_ON_CHAIN`].
    pub fn tx_label(&self) -> String {
        match self.blockchain_tx.as_deref().filter(|tx| !tx.is_empty()) {
            Some(tx) => {
                let head: String = tx.chars().take(TX_PREVIEW_CHARS).collect();
                format!("{head}...")
            }
            None => NOT_ON_CHAIN.to_string(),
        }
    }

    pub fn status_label(&self) -> &'static str {
        if self.verified {
            "Verified"
        } else {
            "Not Verified"
        }
    }
}

/// Envelope returned by `GET /history/:id`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryPage {
    #[serde(default)]
    pub record_id: Option<RecordId>,
    /// `database` or `blockchain`.
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub count: Option<u64>,
    #[serde(default)]
    pub history: Option<Vec<HistoryEntry>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl HistoryPage {
    pub fn into_entries(self) -> Vec<HistoryEntry> {
        self.history.unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecomputedHashes {
    #[serde(default)]
    pub provenance_log_hash: Option<String>,
    #[serde(default)]
    pub record_table_hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub record_id: RecordId,
    pub verified: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub reason: String,
    #[serde(default)]
    pub onchain_hash: Option<String>,
    #[serde(default)]
    pub recomputed: Option<RecomputedHashes>,
    #[serde(default)]
    pub blockchain_tx: Option<String>,
}

/// Error body of a failed check (`{"status": "error", "message": ...}`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerificationFailure {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub record_id: Option<RecordId>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<String>,
    #[serde(skip)]
    pub http_status: Option<u16>,
}

/// Result of `GET /verify/:id`, whatever status it came back with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Verification {
    Report(VerificationReport),
    Failed(VerificationFailure),
}

impl Verification {
    pub fn is_verified(&self) -> bool {
        matches!(self, Verification::Report(r) if r.verified)
    }

    pub fn message(&self) -> &str {
        match self {
            Verification::Report(r) => &r.reason,
            Verification::Failed(f) => &f.message,
        }
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
