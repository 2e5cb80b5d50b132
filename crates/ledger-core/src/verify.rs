//! Recomputation-based audit of a block sequence.

use crate::{error::IntegrityError, Block};
use std::borrow::Borrow;

/// Recompute every block's hash after genesis and check each link to its
/// predecessor. Stops at the first violation.
pub fn verify_chain<B: Borrow<Block>>(blocks: &[B]) -> Result<(), IntegrityError> {
    for pair in blocks.windows(2) {
        let previous: &Block = pair[0].borrow();
        let current: &Block = pair[1].borrow();
        let recomputed = current
            .calculate_hash()
            .map_err(|_| IntegrityError::Unhashable {
                index: current.index,
            })?;
        if recomputed != current.hash {
            return Err(IntegrityError::HashMismatch {
                index: current.index,
            });
        }
        if current.previous_hash != previous.hash {
            return Err(IntegrityError::BrokenLink {
                index: current.index,
            });
        }
    }
    Ok(())
}

pub fn is_chain_valid<B: Borrow<Block>>(blocks: &[B]) -> bool {
    verify_chain(blocks).is_ok()
}
