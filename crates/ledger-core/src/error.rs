use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("difficulty {requested} exceeds the ceiling of {max}")]
    DifficultyTooHigh { requested: u32, max: u32 },
    #[error("mining was cancelled")]
    Cancelled,
    #[error("nonce space exhausted without meeting the difficulty")]
    NonceSpaceExhausted,
    #[error("failed to encode block for hashing: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Why a chain failed verification, and at which block.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntegrityError {
    #[error("block {index} hash does not match its contents")]
    HashMismatch { index: u64 },
    #[error("block {index} does not link to the hash of block {}", .index.saturating_sub(1))]
    BrokenLink { index: u64 },
    #[error("block {index} hash could not be recomputed")]
    Unhashable { index: u64 },
}

impl IntegrityError {
    pub fn index(&self) -> u64 {
        match self {
            Self::HashMismatch { index } | Self::BrokenLink { index } | Self::Unhashable { index } => {
                *index
            }
        }
    }
}
