//! Contracts for the durable stores the reconciliation loop bridges to the chain.
//!
//! These live in `ledger-core` so storage backends can implement them without
//! a dependency cycle.

use crate::{constants::VOTE_TYPE, unix_time, Payload};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

/// A transaction waiting in durable storage to be folded into the chain.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingRecord {
    pub id: String,
    pub kind: String,
    pub sender: String,
    pub recipient: String,
    /// JSON text of the transaction payload.
    pub payload: String,
    pub timestamp: f64,
}

impl PendingRecord {
    pub fn new(
        kind: impl Into<String>,
        sender: impl Into<String>,
        recipient: impl Into<String>,
        payload: &Payload,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind: kind.into(),
            sender: sender.into(),
            recipient: recipient.into(),
            payload: Value::Object(payload.clone()).to_string(),
            timestamp: unix_time(),
        }
    }

    /// A ballot cast by `voter_id`, addressed to `recipient`.
    pub fn vote(key: &VoteKey, candidate: &str, recipient: impl Into<String>) -> Self {
        let payload = match json!({
            "type": VOTE_TYPE,
            "election_id": key.election_id,
            "candidate": candidate,
            "candidate_id": key.candidate_id,
            "voter_id": key.voter_id,
        }) {
            Value::Object(map) => map,
            _ => Payload::new(),
        };
        Self::new(VOTE_TYPE, key.voter_id.clone(), recipient, &payload)
    }

    /// Decode the payload text. Anything but a JSON object is an error.
    pub fn parse_payload(&self) -> Result<Payload, serde_json::Error> {
        serde_json::from_str(&self.payload)
    }
}

/// Identifies the externally recorded vote a ledger transaction stands for.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VoteKey {
    pub voter_id: String,
    pub election_id: String,
    pub candidate_id: String,
}

impl VoteKey {
    pub fn new(
        voter_id: impl Into<String>,
        election_id: impl Into<String>,
        candidate_id: impl Into<String>,
    ) -> Self {
        Self {
            voter_id: voter_id.into(),
            election_id: election_id.into(),
            candidate_id: candidate_id.into(),
        }
    }

    /// Key of a vote payload. The voter defaults to the transaction sender.
    pub fn from_payload(payload: &Payload, sender: &str) -> Option<Self> {
        fn field<'p>(payload: &'p Payload, name: &str) -> Option<&'p str> {
            payload.get(name).and_then(Value::as_str)
        }
        Some(Self::new(
            field(payload, "voter_id").unwrap_or(sender),
            field(payload, "election_id")?,
            field(payload, "candidate_id")?,
        ))
    }
}

/// The durable record of a cast vote, annotated once its block is mined.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VoteRecord {
    pub key: VoteKey,
    pub transaction_hash: Option<String>,
    pub block_index: Option<u64>,
    pub created_at: f64,
}

impl VoteRecord {
    pub fn new(key: VoteKey) -> Self {
        Self {
            key,
            transaction_hash: None,
            block_index: None,
            created_at: unix_time(),
        }
    }

    pub fn is_annotated(&self) -> bool {
        self.transaction_hash.is_some()
    }
}

/// Cached summary of the chain for display and monitoring.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub last_block_index: u64,
    pub last_block_hash: Option<String>,
    pub total_transactions: u64,
    pub last_updated: f64,
}

pub trait PendingStore: Send + Sync {
    fn enqueue(&self, record: &PendingRecord) -> Result<()>;
    /// Every stored record, oldest first.
    fn pending(&self) -> Result<Vec<PendingRecord>>;
    /// Remove the records with these ids. Returns how many were removed.
    fn remove(&self, ids: &[String]) -> Result<usize>;
}

pub trait CheckpointStore: Send + Sync {
    fn checkpoint(&self) -> Result<Option<Checkpoint>>;
    fn put_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()>;
}

pub trait VoteStore: Send + Sync {
    fn insert_vote(&self, vote: &VoteRecord) -> Result<()>;
    fn vote(&self, key: &VoteKey) -> Result<Option<VoteRecord>>;
    /// Set the hash and block index on the vote under `key` if it has none yet.
    /// Returns `false` when no unannotated vote exists for the key.
    fn annotate_vote(&self, key: &VoteKey, transaction_hash: &str, block_index: u64)
        -> Result<bool>;
}

/// Everything the reconciliation loop needs from durable storage.
pub trait LedgerStore: PendingStore + CheckpointStore + VoteStore {}

impl<T: PendingStore + CheckpointStore + VoteStore> LedgerStore for T {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vote_record_payload_round_trips_key() {
        let key = VoteKey::new("voter-1", "E1", "cand-7");
        let record = PendingRecord::vote(&key, "Alice", "ELECTION_SYSTEM");
        assert_eq!(record.kind, VOTE_TYPE);
        assert_eq!(record.sender, "voter-1");
        let payload = record.parse_payload().unwrap();
        assert_eq!(payload["type"], "vote");
        assert_eq!(payload["candidate"], "Alice");
        assert_eq!(VoteKey::from_payload(&payload, "ignored"), Some(key));
    }

    #[test]
    fn vote_key_falls_back_to_sender() {
        let payload: Payload =
            serde_json::from_str(r#"{"election_id":"E1","candidate_id":"c"}"#).unwrap();
        assert_eq!(
            VoteKey::from_payload(&payload, "v9"),
            Some(VoteKey::new("v9", "E1", "c"))
        );
        let missing: Payload = serde_json::from_str(r#"{"election_id":"E1"}"#).unwrap();
        assert_eq!(VoteKey::from_payload(&missing, "v9"), None);
    }

    #[test]
    fn non_object_payload_is_rejected() {
        let mut record = PendingRecord::new("vote", "a", "b", &Payload::new());
        record.payload = "[1, 2]".to_string();
        assert!(record.parse_payload().is_err());
        record.payload = "{not json".to_string();
        assert!(record.parse_payload().is_err());
    }
}
