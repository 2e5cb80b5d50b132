use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::sync::atomic::AtomicBool;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

pub mod chain;
pub mod constants;
pub mod error;
pub mod pow;
pub mod store;
pub mod tally;
pub mod verify;

pub use chain::{Chain, ChainConfig, ChainExport};
pub use error::{ChainError, IntegrityError};

use constants::{GENESIS_PREVIOUS_HASH, MINING_REWARD_TYPE, REWARD_ISSUER};

pub type Hash = [u8; 32];

/// Free-form transaction body. Callers are trusted to shape it.
pub type Payload = Map<String, Value>;

/// Seconds since the Unix epoch, with sub-second precision.
pub fn unix_time() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub sender: String,
    pub recipient: String,
    pub payload: Payload,
    pub timestamp: f64,
}

impl Transaction {
    pub fn new(sender: impl Into<String>, recipient: impl Into<String>, payload: Payload) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sender: sender.into(),
            recipient: recipient.into(),
            payload,
            timestamp: unix_time(),
        }
    }

    /// The synthetic transaction crediting `miner` after a block is sealed.
    pub fn reward(miner: &str, amount: i64) -> Self {
        let payload = match json!({ "type": MINING_REWARD_TYPE, "amount": amount }) {
            Value::Object(map) => map,
            _ => Payload::new(),
        };
        Self::new(REWARD_ISSUER, miner, payload)
    }

    /// The payload's `type` field, if it is a string.
    pub fn kind(&self) -> Option<&str> {
        self.field("type")
    }

    pub fn field(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    /// The payload's integer `amount`; anything else counts as zero.
    pub fn amount(&self) -> i64 {
        self.payload
            .get("amount")
            .and_then(Value::as_i64)
            .unwrap_or(0)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub index: u64,
    pub transactions: Vec<Transaction>,
    pub timestamp: f64,
    pub previous_hash: String,
    pub nonce: u64,
    pub hash: String,
}

impl Block {
    /// An unsealed block. `hash` stays empty until [`Block::mine`] succeeds.
    pub fn new(index: u64, transactions: Vec<Transaction>, previous_hash: impl Into<String>) -> Self {
        Self {
            index,
            transactions,
            timestamp: unix_time(),
            previous_hash: previous_hash.into(),
            nonce: 0,
            hash: String::new(),
        }
    }

    pub fn genesis() -> Self {
        Self::new(0, Vec::new(), GENESIS_PREVIOUS_HASH)
    }

    /// Recompute the digest of the block's current fields.
    pub fn calculate_hash(&self) -> Result<String, ChainError> {
        Ok(hex::encode(HashTemplate::new(self)?.digest(self.nonce)))
    }

    /// Search for a nonce giving `difficulty` leading zero hex characters, then
    /// store the nonce and hash. Fields are left untouched on error.
    pub fn mine(&mut self, difficulty: u32, cancel: &AtomicBool) -> Result<(), ChainError> {
        let template = HashTemplate::new(self)?;
        let (nonce, digest) = pow::search(&template, difficulty, cancel)?;
        self.nonce = nonce;
        self.hash = hex::encode(digest);
        Ok(())
    }

    pub fn meets_difficulty(&self, difficulty: u32) -> bool {
        pow::meets_difficulty(&self.hash, difficulty)
    }
}

/// Canonical hash input of a block with the nonce left open.
///
/// The encoding is the compact JSON object
/// `{"index":..,"nonce":..,"previous_hash":..,"timestamp":..,"transactions":[..]}`
/// with keys sorted at every depth (serde_json's default `BTreeMap` object map).
/// `nonce` sorts second, so the bytes split cleanly around it.
#[derive(Clone, Debug)]
pub struct HashTemplate {
    prefix: Vec<u8>,
    suffix: Vec<u8>,
}

impl HashTemplate {
    pub fn new(block: &Block) -> Result<Self, serde_json::Error> {
        let rest = json!({
            "previous_hash": block.previous_hash,
            "timestamp": block.timestamp,
            "transactions": serde_json::to_value(&block.transactions)?,
        });
        let mut suffix = serde_json::to_vec(&rest)?;
        // `{"previous_hash":...}` becomes `,"previous_hash":...}`
        suffix[0] = b',';
        let prefix = format!("{{\"index\":{},\"nonce\":", block.index).into_bytes();
        Ok(Self { prefix, suffix })
    }

    pub fn digest(&self, nonce: u64) -> Hash {
        let mut hasher = Sha256::new();
        hasher.update(&self.prefix);
        hasher.update(nonce.to_string().as_bytes());
        hasher.update(&self.suffix);
        let digest = hasher.finalize();
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest[..]);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    fn payload(value: Value) -> Payload {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    fn fixed_block() -> Block {
        let txs = vec![
            Transaction {
                id: "t-1".to_string(),
                sender: "v1".to_string(),
                recipient: "ELECTION_SYSTEM".to_string(),
                payload: payload(json!({"type": "vote", "election_id": "E1", "candidate": "A"})),
                timestamp: 1_600_000_000.25,
            },
            Transaction {
                id: "t-2".to_string(),
                sender: "Alice".to_string(),
                recipient: "Bob".to_string(),
                payload: payload(json!({"amount": 5})),
                timestamp: 1_600_000_100.5,
            },
        ];
        let mut block = Block::new(1, txs, "00ab");
        block.timestamp = 1_600_000_200.0;
        block
    }

    #[test]
    fn template_matches_full_canonical_encoding() {
        let mut block = fixed_block();
        block.nonce = 4242;
        let full = json!({
            "index": block.index,
            "transactions": serde_json::to_value(&block.transactions).unwrap(),
            "timestamp": block.timestamp,
            "previous_hash": block.previous_hash,
            "nonce": block.nonce,
        });
        let expected = hex::encode(Sha256::digest(serde_json::to_vec(&full).unwrap()));
        assert_eq!(block.calculate_hash().unwrap(), expected);
    }

    #[test]
    fn canonical_encoding_sorts_payload_keys() {
        let block = fixed_block();
        let template = HashTemplate::new(&block).unwrap();
        let text = String::from_utf8(template.suffix.clone()).unwrap();
        let candidate = text.find("\"candidate\"").unwrap();
        let election = text.find("\"election_id\"").unwrap();
        let kind = text.find("\"type\"").unwrap();
        assert!(candidate < election && election < kind);
        assert!(text.starts_with(",\"previous_hash\":\"00ab\""));
    }

    #[test]
    fn hash_is_stable_and_lowercase_hex() {
        let block = fixed_block();
        let h1 = block.calculate_hash().unwrap();
        let h2 = block.calculate_hash().unwrap();
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), constants::HASH_HEX_SIZE);
        assert!(h1.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn block_hash_changes_with_nonce() {
        let mut block = fixed_block();
        let h1 = block.calculate_hash().unwrap();
        block.nonce += 1;
        assert_ne!(h1, block.calculate_hash().unwrap());
    }

    #[test]
    fn block_hash_changes_with_payload() {
        let mut block = fixed_block();
        let h1 = block.calculate_hash().unwrap();
        block.transactions[0]
            .payload
            .insert("candidate".to_string(), json!("B"));
        assert_ne!(h1, block.calculate_hash().unwrap());
    }

    #[test]
    fn mine_sets_nonce_and_hash() {
        let mut block = fixed_block();
        block.mine(2, &AtomicBool::new(false)).unwrap();
        assert!(block.hash.starts_with("00"));
        assert!(block.meets_difficulty(2));
        assert_eq!(block.calculate_hash().unwrap(), block.hash);
    }

    #[test]
    fn genesis_block_example() {
        let genesis = Block::genesis();
        assert_eq!(genesis.index, 0);
        assert_eq!(genesis.previous_hash, "0");
        assert!(genesis.transactions.is_empty());
        assert!(genesis.hash.is_empty());
    }

    #[test]
    fn reward_transaction_shape() {
        let tx = Transaction::reward("M", 10);
        assert_eq!(tx.sender, REWARD_ISSUER);
        assert_eq!(tx.recipient, "M");
        assert_eq!(tx.kind(), Some(MINING_REWARD_TYPE));
        assert_eq!(tx.amount(), 10);
    }

    #[test]
    fn transactions_get_distinct_ids() {
        let a = Transaction::new("a", "b", Payload::new());
        let b = Transaction::new("a", "b", Payload::new());
        assert_ne!(a.id, b.id);
        assert_eq!(a.amount(), 0);
        assert_eq!(a.kind(), None);
    }

    #[test]
    fn transaction_serialization_example() {
        let tx = Transaction {
            id: "t-9".to_string(),
            sender: "Alice".to_string(),
            recipient: "Bob".to_string(),
            payload: payload(json!({"amount": 10})),
            timestamp: 1_600_000_000.0,
        };
        let json = serde_json::to_string(&tx).unwrap();
        let expected = r#"{"id":"t-9","sender":"Alice","recipient":"Bob","payload":{"amount":10},"timestamp":1600000000.0}"#;
        assert_eq!(json, expected);
        let back: Transaction = serde_json::from_str(&json).unwrap();
        assert_eq!(tx, back);
    }
}
