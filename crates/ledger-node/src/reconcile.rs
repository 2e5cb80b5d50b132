//! Background loop draining the durable pending queue into mined blocks.
//!
//! Each tick runs three phases: fetch the pending records, fold them into the
//! chain and mine, then commit the outcome to durable storage (vote
//! annotations, queue deletion, checkpoint). Progress through the first two
//! phases is remembered per record, so a tick that fails during commit is
//! retried without mining the same records twice. Records already removed
//! from the queue are carried as an unwritten checkpoint increment until a
//! later tick manages to store it.

use anyhow::{anyhow, Result};
use ledger_core::{
    constants::{SYSTEM_MINER, VOTE_TYPE},
    store::{Checkpoint, LedgerStore, PendingRecord, VoteKey},
    unix_time, Block, Chain, Payload,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::{spawn_blocking, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::constants::{DEFAULT_BACKOFF_SECS, DEFAULT_TICK_SECS};

#[derive(Clone, Debug)]
pub struct ReconcilerConfig {
    pub interval: Duration,
    /// Wait after a failed tick.
    pub backoff: Duration,
    pub miner: String,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_TICK_SECS),
            backoff: Duration::from_secs(DEFAULT_BACKOFF_SECS),
            miner: SYSTEM_MINER.to_string(),
        }
    }
}

/// What one tick did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Index of the block mined during this tick.
    pub mined: Option<u64>,
    /// Pending records deleted from the queue.
    pub committed: usize,
    pub annotated: usize,
    pub annotation_misses: usize,
    /// Records left in the queue because their payload is not a JSON object.
    pub malformed: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct MinedRef {
    block_index: u64,
    block_hash: String,
}

impl From<&Block> for MinedRef {
    fn from(block: &Block) -> Self {
        Self {
            block_index: block.index,
            block_hash: block.hash.clone(),
        }
    }
}

/// How far a pending record got before the last tick stopped.
#[derive(Clone, Debug, PartialEq, Eq)]
enum Progress {
    /// In the chain's pool, not yet sealed.
    Queued,
    Mined(MinedRef),
}

pub struct Reconciler<S> {
    chain: Arc<Chain>,
    store: Arc<S>,
    config: ReconcilerConfig,
    progress: HashMap<String, Progress>,
    /// Transactions committed since the checkpoint was last written.
    unsaved: Option<u64>,
}

impl<S: LedgerStore + 'static> Reconciler<S> {
    pub fn new(chain: Arc<Chain>, store: Arc<S>, config: ReconcilerConfig) -> Self {
        Self {
            chain,
            store,
            config,
            progress: HashMap::new(),
            unsaved: None,
        }
    }

    /// Run one fetch, mine and commit pass.
    pub async fn tick(&mut self) -> Result<TickReport> {
        let mut report = TickReport::default();

        // Fetch.
        let store = self.store.clone();
        let records = spawn_blocking(move || store.pending()).await??;
        let mut batch = Vec::with_capacity(records.len());
        for record in records {
            match record.parse_payload() {
                Ok(payload) => batch.push((record, payload)),
                Err(e) => {
                    warn!(id = %record.id, error = %e, "skipping pending record with malformed payload");
                    report.malformed += 1;
                }
            }
        }
        self.progress
            .retain(|id, _| batch.iter().any(|(record, _)| &record.id == id));
        if batch.is_empty() {
            self.save_checkpoint().await?;
            return Ok(report);
        }

        // Fold into the pool, then mine.
        for (record, payload) in &batch {
            if self.progress.contains_key(&record.id) {
                continue;
            }
            self.chain.add_transaction(
                record.sender.clone(),
                record.recipient.clone(),
                payload.clone(),
            );
            self.progress.insert(record.id.clone(), Progress::Queued);
        }
        if self.progress.values().any(|p| *p == Progress::Queued) {
            let chain = self.chain.clone();
            let miner = self.config.miner.clone();
            let block = spawn_blocking(move || chain.mine_pending(&miner))
                .await??
                .ok_or_else(|| anyhow!("pool was drained before mining"))?;
            let mined = MinedRef::from(block.as_ref());
            for progress in self.progress.values_mut() {
                if *progress == Progress::Queued {
                    *progress = Progress::Mined(mined.clone());
                }
            }
            report.mined = Some(block.index);
        }

        // Commit.
        let work: Vec<(PendingRecord, Payload, MinedRef)> = batch
            .into_iter()
            .filter_map(|(record, payload)| match self.progress.get(&record.id) {
                Some(Progress::Mined(mined)) => Some((record, payload, mined.clone())),
                _ => None,
            })
            .collect();
        let store = self.store.clone();
        let outcome = spawn_blocking(move || commit(store.as_ref(), &work)).await??;
        for id in &outcome.ids {
            self.progress.remove(id);
        }
        self.unsaved = Some(self.unsaved.unwrap_or(0) + outcome.ids.len() as u64);
        report.committed = outcome.ids.len();
        report.annotated = outcome.annotated;
        report.annotation_misses = outcome.misses;
        self.save_checkpoint().await?;
        Ok(report)
    }

    /// Fold the unwritten increment into the stored checkpoint, if there is one.
    async fn save_checkpoint(&mut self) -> Result<()> {
        let Some(committed) = self.unsaved else {
            return Ok(());
        };
        let store = self.store.clone();
        let latest = self.chain.latest();
        spawn_blocking(move || {
            let previous = store.checkpoint()?.unwrap_or_default();
            store.put_checkpoint(&Checkpoint {
                last_block_index: latest.index,
                last_block_hash: Some(latest.hash.clone()),
                total_transactions: previous.total_transactions + committed,
                last_updated: unix_time(),
            })
        })
        .await??;
        self.unsaved = None;
        Ok(())
    }

    /// Tick forever on `config.interval`, or `config.backoff` after a failure,
    /// until the handle closes.
    pub fn spawn(self) -> ReconcilerHandle {
        let (close, closed) = watch::channel(());
        let trigger = Trigger(Arc::new(Notify::new()));
        let chain = self.chain.clone();
        let join = tokio::spawn(self.run(closed, trigger.clone()));
        ReconcilerHandle {
            join,
            close,
            trigger,
            chain,
        }
    }

    async fn run(mut self, mut closed: watch::Receiver<()>, trigger: Trigger) {
        info!(
            interval = ?self.config.interval,
            backoff = ?self.config.backoff,
            "reconciliation loop started"
        );
        loop {
            let wait = match self.tick().await {
                Ok(report) => {
                    if let Some(index) = report.mined {
                        info!(
                            block = index,
                            committed = report.committed,
                            annotated = report.annotated,
                            misses = report.annotation_misses,
                            malformed = report.malformed,
                            "reconciliation tick mined a block"
                        );
                    } else {
                        debug!(?report, "reconciliation tick");
                    }
                    self.config.interval
                }
                Err(e) => {
                    error!(error = %e, "reconciliation tick failed");
                    self.config.backoff
                }
            };
            tokio::select! {
                _ = closed.changed() => break,
                _ = tokio::time::sleep(wait) => {}
                _ = trigger.0.notified() => debug!("reconciliation tick triggered"),
            }
        }
        info!("reconciliation loop stopped");
    }
}

struct CommitOutcome {
    ids: Vec<String>,
    annotated: usize,
    misses: usize,
}

fn commit<S: LedgerStore>(
    store: &S,
    work: &[(PendingRecord, Payload, MinedRef)],
) -> Result<CommitOutcome> {
    let mut annotated = 0;
    let mut misses = 0;
    for (record, payload, mined) in work {
        if payload.get("type").and_then(|v| v.as_str()) != Some(VOTE_TYPE) {
            continue;
        }
        let Some(key) = VoteKey::from_payload(payload, &record.sender) else {
            warn!(id = %record.id, "vote payload lacks election or candidate id");
            misses += 1;
            continue;
        };
        if store.annotate_vote(&key, &mined.block_hash, mined.block_index)? {
            annotated += 1;
        } else {
            warn!(
                voter = %key.voter_id,
                election = %key.election_id,
                candidate = %key.candidate_id,
                "no unannotated vote record for ledger vote"
            );
            misses += 1;
        }
    }

    let ids: Vec<String> = work.iter().map(|(record, _, _)| record.id.clone()).collect();
    store.remove(&ids)?;

    Ok(CommitOutcome {
        ids,
        annotated,
        misses,
    })
}

/// Asks the loop to tick now instead of waiting out its interval.
#[derive(Clone)]
pub struct Trigger(Arc<Notify>);

impl Trigger {
    pub fn fire(&self) {
        self.0.notify_one();
    }
}

/// Handle for triggering or closing the reconciliation loop.
pub struct ReconcilerHandle {
    join: JoinHandle<()>,
    close: watch::Sender<()>,
    trigger: Trigger,
    chain: Arc<Chain>,
}

impl ReconcilerHandle {
    pub fn trigger(&self) -> Trigger {
        self.trigger.clone()
    }

    /// Stop the loop, cancelling any nonce search in flight, and wait for it.
    pub async fn close(self) -> Result<()> {
        let Self {
            join, close, chain, ..
        } = self;
        let _ = close.send(());
        chain.shutdown();
        join.await?;
        Ok(())
    }
}
