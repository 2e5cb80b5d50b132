//! Read-only aggregation over sealed blocks: vote tallies and balances.
//!
//! Only transactions inside blocks count; the pending pool is never consulted.

use crate::{
    constants::{REWARD_ISSUER, VOTE_TYPE},
    Block, Transaction,
};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CastVote {
    pub voter_id: String,
    pub candidate: String,
    pub timestamp: f64,
    pub block_index: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ElectionResults {
    pub election_id: String,
    pub total_votes: u64,
    pub vote_counts: BTreeMap<String, u64>,
    pub votes: Vec<CastVote>,
}

/// Vote transactions for `election_id` that name a candidate, with the index
/// of the block holding them, in chain order.
fn votes<'a, B: Borrow<Block>>(
    blocks: &'a [B],
    election_id: &'a str,
) -> impl Iterator<Item = (u64, &'a Transaction, &'a str)> + 'a {
    blocks.iter().flat_map(move |block| {
        let block: &Block = block.borrow();
        block.transactions.iter().filter_map(move |tx| {
            if tx.kind() != Some(VOTE_TYPE) || tx.field("election_id") != Some(election_id) {
                return None;
            }
            tx.field("candidate")
                .filter(|candidate| !candidate.is_empty())
                .map(|candidate| (block.index, tx, candidate))
        })
    })
}

pub fn vote_count<B: Borrow<Block>>(blocks: &[B], election_id: &str) -> BTreeMap<String, u64> {
    let mut counts = BTreeMap::new();
    for (_, _, candidate) in votes(blocks, election_id) {
        *counts.entry(candidate.to_string()).or_insert(0) += 1;
    }
    counts
}

pub fn election_results<B: Borrow<Block>>(blocks: &[B], election_id: &str) -> ElectionResults {
    let mut vote_counts = BTreeMap::new();
    let mut cast = Vec::new();
    for (block_index, tx, candidate) in votes(blocks, election_id) {
        *vote_counts.entry(candidate.to_string()).or_insert(0) += 1;
        cast.push(CastVote {
            voter_id: tx.sender.clone(),
            candidate: candidate.to_string(),
            timestamp: tx.timestamp,
            block_index,
        });
    }
    ElectionResults {
        election_id: election_id.to_string(),
        total_votes: cast.len() as u64,
        vote_counts,
        votes: cast,
    }
}

/// Credits to `address` minus its debits. The reward issuer is never debited.
/// The total saturates at the bounds of `i64`.
pub fn balance<B: Borrow<Block>>(blocks: &[B], address: &str) -> i64 {
    let mut total = 0i64;
    for block in blocks {
        let block: &Block = block.borrow();
        for tx in &block.transactions {
            if tx.recipient == address {
                total = total.saturating_add(tx.amount());
            }
            if tx.sender == address && tx.sender != REWARD_ISSUER {
                total = total.saturating_sub(tx.amount());
            }
        }
    }
    total
}
