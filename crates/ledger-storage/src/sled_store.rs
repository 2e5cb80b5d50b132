use anyhow::{Context, Result};
use ledger_core::store::{
    Checkpoint, CheckpointStore, PendingRecord, PendingStore, VoteKey, VoteRecord, VoteStore,
};
use serde::{de::DeserializeOwned, Serialize};
use sled::{Db, Tree};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};

const TREE_PENDING: &str = "pending";
const TREE_VOTES: &str = "votes";
const KEY_CHECKPOINT: &[u8] = b"checkpoint";

#[derive(Clone)]
pub struct SledStore {
    db: Db,
    pending: Tree,
    votes: Tree,
}

impl SledStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let db = sled::open(path).with_context(|| format!("opening sled at {}", path.display()))?;
        info!(path = %path.display(), "sled store opened");
        Self::from_db(db)
    }

    /// A store that lives in a scratch directory removed on drop.
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> Result<Self> {
        let pending = db.open_tree(TREE_PENDING)?;
        let votes = db.open_tree(TREE_VOTES)?;
        Ok(Self { db, pending, votes })
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    /// Drop every record from every tree.
    pub fn clear(&self) -> Result<()> {
        self.pending.clear()?;
        self.votes.clear()?;
        self.db.clear()?;
        self.flush()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).context("encoding record")
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes).context("decoding record")
}

fn vote_key(key: &VoteKey) -> Vec<u8> {
    let mut out = Vec::with_capacity(
        key.voter_id.len() + key.election_id.len() + key.candidate_id.len() + 2,
    );
    out.extend_from_slice(key.voter_id.as_bytes());
    out.push(0);
    out.extend_from_slice(key.election_id.as_bytes());
    out.push(0);
    out.extend_from_slice(key.candidate_id.as_bytes());
    out
}

impl PendingStore for SledStore {
    fn enqueue(&self, record: &PendingRecord) -> Result<()> {
        // Monotonic ids keep iteration in arrival order.
        let seq = self.db.generate_id()?;
        self.pending.insert(seq.to_be_bytes(), encode(record)?)?;
        self.flush()?;
        debug!(id = %record.id, kind = %record.kind, "pending record stored");
        Ok(())
    }

    fn pending(&self) -> Result<Vec<PendingRecord>> {
        self.pending
            .iter()
            .values()
            .map(|value| decode(&value?))
            .collect()
    }

    fn remove(&self, ids: &[String]) -> Result<usize> {
        let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let mut removed = 0;
        for entry in self.pending.iter() {
            let (key, value) = entry?;
            let record: PendingRecord = decode(&value)?;
            if wanted.contains(record.id.as_str()) {
                self.pending.remove(key)?;
                removed += 1;
            }
        }
        self.flush()?;
        Ok(removed)
    }
}

impl CheckpointStore for SledStore {
    fn checkpoint(&self) -> Result<Option<Checkpoint>> {
        self.db
            .get(KEY_CHECKPOINT)?
            .map(|value| decode(&value))
            .transpose()
    }

    fn put_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        self.db.insert(KEY_CHECKPOINT, encode(checkpoint)?)?;
        self.flush()
    }
}

impl VoteStore for SledStore {
    fn insert_vote(&self, vote: &VoteRecord) -> Result<()> {
        self.votes.insert(vote_key(&vote.key), encode(vote)?)?;
        self.flush()
    }

    fn vote(&self, key: &VoteKey) -> Result<Option<VoteRecord>> {
        self.votes
            .get(vote_key(key))?
            .map(|value| decode(&value))
            .transpose()
    }

    fn annotate_vote(&self, key: &VoteKey, transaction_hash: &str, block_index: u64) -> Result<bool> {
        let k = vote_key(key);
        loop {
            let Some(current) = self.votes.get(&k)? else {
                return Ok(false);
            };
            let mut vote: VoteRecord = decode(&current)?;
            if vote.is_annotated() {
                return Ok(false);
            }
            vote.transaction_hash = Some(transaction_hash.to_string());
            vote.block_index = Some(block_index);
            let swapped = self
                .votes
                .compare_and_swap(&k, Some(current), Some(encode(&vote)?))?;
            if swapped.is_ok() {
                self.flush()?;
                return Ok(true);
            }
            // Lost a race with another writer; look again.
        }
    }
}
