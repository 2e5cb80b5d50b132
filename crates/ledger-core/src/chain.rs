//! The in-memory chain together with its pending transaction pool.

use crate::{
    constants::{DEFAULT_DIFFICULTY, DEFAULT_MINING_REWARD, MAX_DIFFICULTY},
    error::{ChainError, IntegrityError},
    tally::{self, ElectionResults},
    verify, Block, Payload, Transaction,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, MutexGuard, PoisonError,
};
use tracing::{debug, info, warn};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Required leading zero hex characters in every sealed hash.
    pub difficulty: u32,
    pub mining_reward: i64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            difficulty: DEFAULT_DIFFICULTY,
            mining_reward: DEFAULT_MINING_REWARD,
        }
    }
}

impl ChainConfig {
    pub fn validate(&self) -> Result<(), ChainError> {
        if self.difficulty > MAX_DIFFICULTY {
            return Err(ChainError::DifficultyTooHigh {
                requested: self.difficulty,
                max: MAX_DIFFICULTY,
            });
        }
        Ok(())
    }
}

/// Full dump of the ledger, as served to administrators.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChainExport {
    pub chain: Vec<Block>,
    pub pending_transactions: Vec<Transaction>,
    pub difficulty: u32,
    pub mining_reward: i64,
}

struct State {
    blocks: Vec<Arc<Block>>,
    pool: Vec<Transaction>,
}

/// Append-only hash chain plus the pool of transactions waiting for a block.
///
/// One mutex guards both the blocks and the pool. It is held to take the pool
/// snapshot and again to append the sealed block, never during the nonce
/// search, so callers adding transactions never wait on mining. A second mutex
/// serializes miners so the tip cannot move between snapshot and append.
pub struct Chain {
    config: ChainConfig,
    state: Mutex<State>,
    mining: Mutex<()>,
    cancel: Arc<AtomicBool>,
}

impl Chain {
    /// Build a chain holding a freshly mined genesis block.
    pub fn new(config: ChainConfig) -> Result<Self, ChainError> {
        config.validate()?;
        let cancel = Arc::new(AtomicBool::new(false));
        let mut genesis = Block::genesis();
        genesis.mine(config.difficulty, &cancel)?;
        info!(
            hash = %genesis.hash,
            difficulty = config.difficulty,
            "genesis block mined"
        );
        Ok(Self {
            config,
            state: Mutex::new(State {
                blocks: vec![Arc::new(genesis)],
                pool: Vec::new(),
            }),
            mining: Mutex::new(()),
            cancel,
        })
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    pub fn difficulty(&self) -> u32 {
        self.config.difficulty
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a new transaction. Returns the chain length, a hint of the block
    /// index it will probably land in.
    pub fn add_transaction(
        &self,
        sender: impl Into<String>,
        recipient: impl Into<String>,
        payload: Payload,
    ) -> u64 {
        self.submit(Transaction::new(sender, recipient, payload))
    }

    /// Queue an already built transaction.
    pub fn submit(&self, tx: Transaction) -> u64 {
        let mut state = self.state();
        debug!(id = %tx.id, sender = %tx.sender, "transaction queued");
        state.pool.push(tx);
        state.blocks.len() as u64
    }

    pub fn latest(&self) -> Arc<Block> {
        self.state()
            .blocks
            .last()
            .cloned()
            .expect("chain always holds the genesis block")
    }

    pub fn len(&self) -> usize {
        self.state().blocks.len()
    }

    /// Always false: the genesis block is created with the chain.
    pub fn is_empty(&self) -> bool {
        self.state().blocks.is_empty()
    }

    /// Consistent copy of the block list. Readers never observe a half-appended block.
    pub fn snapshot(&self) -> Vec<Arc<Block>> {
        self.state().blocks.clone()
    }

    pub fn pending(&self) -> Vec<Transaction> {
        self.state().pool.clone()
    }

    pub fn get_block(&self, index: u64) -> Option<Arc<Block>> {
        self.state().blocks.get(index as usize).cloned()
    }

    /// Seal every pooled transaction into a new block, then leave a reward for
    /// `miner` in the pool.
    ///
    /// Returns `Ok(None)` when the pool is empty. Transactions added while the
    /// nonce search runs stay pooled ahead of the reward. On failure the
    /// snapshot is put back at the front of the pool.
    pub fn mine_pending(&self, miner: &str) -> Result<Option<Arc<Block>>, ChainError> {
        let _miner = self.mining.lock().unwrap_or_else(PoisonError::into_inner);

        let mut block = {
            let mut state = self.state();
            if state.pool.is_empty() {
                return Ok(None);
            }
            let previous_hash = state
                .blocks
                .last()
                .map(|tip| tip.hash.clone())
                .expect("chain always holds the genesis block");
            let index = state.blocks.len() as u64;
            Block::new(index, std::mem::take(&mut state.pool), previous_hash)
        };

        debug!(
            index = block.index,
            txs = block.transactions.len(),
            "mining block"
        );
        if let Err(e) = block.mine(self.config.difficulty, &self.cancel) {
            warn!(index = block.index, error = %e, "mining aborted, restoring pool");
            let mut state = self.state();
            let added = std::mem::replace(&mut state.pool, block.transactions);
            state.pool.extend(added);
            return Err(e);
        }

        let block = Arc::new(block);
        let reward = Transaction::reward(miner, self.config.mining_reward);
        {
            let mut state = self.state();
            state.blocks.push(block.clone());
            state.pool.push(reward);
        }
        info!(
            index = block.index,
            nonce = block.nonce,
            hash = %block.hash,
            txs = block.transactions.len(),
            "mined block"
        );
        Ok(Some(block))
    }

    /// Stop any running and all future nonce searches.
    pub fn shutdown(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    pub fn verify(&self) -> Result<(), IntegrityError> {
        verify::verify_chain(&self.snapshot())
    }

    pub fn is_chain_valid(&self) -> bool {
        self.verify().is_ok()
    }

    pub fn get_vote_count(&self, election_id: &str) -> BTreeMap<String, u64> {
        tally::vote_count(&self.snapshot(), election_id)
    }

    pub fn get_election_results(&self, election_id: &str) -> ElectionResults {
        tally::election_results(&self.snapshot(), election_id)
    }

    pub fn get_balance(&self, address: &str) -> i64 {
        tally::balance(&self.snapshot(), address)
    }

    pub fn to_export(&self) -> ChainExport {
        let state = self.state();
        ChainExport {
            chain: state.blocks.iter().map(|b| Block::clone(b)).collect(),
            pending_transactions: state.pool.clone(),
            difficulty: self.config.difficulty,
            mining_reward: self.config.mining_reward,
        }
    }
}
