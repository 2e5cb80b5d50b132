//! Proof-of-work nonce search.

use crate::{error::ChainError, Hash, HashTemplate};
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};

/// Number of leading zero hex characters in the digest.
pub fn count_leading_zero_nibbles(hash: &Hash) -> u32 {
    let mut total = 0u32;
    for b in hash {
        if *b == 0 {
            total += 2;
        } else {
            if *b < 0x10 {
                total += 1;
            }
            break;
        }
    }
    total
}

/// Whether a hex-rendered hash starts with `difficulty` `'0'` characters.
pub fn meets_difficulty(hash: &str, difficulty: u32) -> bool {
    let difficulty = difficulty as usize;
    hash.len() >= difficulty && hash.bytes().take(difficulty).all(|b| b == b'0')
}

/// Search nonces in parallel until a digest has at least `difficulty` leading
/// zero hex characters. Every attempt polls `cancel`.
pub fn search(
    template: &HashTemplate,
    difficulty: u32,
    cancel: &AtomicBool,
) -> Result<(u64, Hash), ChainError> {
    if cancel.load(Ordering::Relaxed) {
        return Err(ChainError::Cancelled);
    }

    // Rayon splits the range across threads; a raised flag ends every split.
    let found = (0u64..u64::MAX).into_par_iter().find_any(|nonce| {
        cancel.load(Ordering::Relaxed)
            || count_leading_zero_nibbles(&template.digest(*nonce)) >= difficulty
    });

    let nonce = found.ok_or(ChainError::NonceSpaceExhausted)?;
    let digest = template.digest(nonce);
    if count_leading_zero_nibbles(&digest) >= difficulty {
        Ok((nonce, digest))
    } else {
        Err(ChainError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Block;

    #[test]
    fn leading_zero_nibbles_examples() {
        let mut h = [0u8; 32];
        assert_eq!(count_leading_zero_nibbles(&h), 64);
        h[0] = 0x0F;
        assert_eq!(count_leading_zero_nibbles(&h), 1);
        h = [0u8; 32];
        h[1] = 0x80;
        assert_eq!(count_leading_zero_nibbles(&h), 2);
        h[1] = 0x04;
        assert_eq!(count_leading_zero_nibbles(&h), 3);
        h[0] = 0x10;
        assert_eq!(count_leading_zero_nibbles(&h), 0);
    }

    #[test]
    fn nibbles_agree_with_hex_rendering() {
        let mut h = [0xffu8; 32];
        h[0] = 0x00;
        h[1] = 0x0a;
        assert_eq!(count_leading_zero_nibbles(&h), 3);
        assert!(meets_difficulty(&hex::encode(h), 3));
        assert!(!meets_difficulty(&hex::encode(h), 4));
    }

    #[test]
    fn meets_difficulty_edge_cases() {
        assert!(meets_difficulty("abc", 0));
        assert!(meets_difficulty("00ff", 2));
        assert!(!meets_difficulty("0", 2));
        assert!(!meets_difficulty("", 1));
    }

    #[test]
    fn search_finds_valid_nonce() {
        let block = Block::new(3, Vec::new(), "00");
        let template = HashTemplate::new(&block).unwrap();
        let (nonce, digest) = search(&template, 3, &AtomicBool::new(false)).unwrap();
        assert_eq!(template.digest(nonce), digest);
        assert!(count_leading_zero_nibbles(&digest) >= 3);
    }

    #[test]
    fn search_honours_cancellation() {
        let block = Block::new(3, Vec::new(), "00");
        let template = HashTemplate::new(&block).unwrap();
        // 64 zero nibbles is unreachable, so only the flag can end the search.
        let cancel = AtomicBool::new(true);
        let err = search(&template, 64, &cancel).unwrap_err();
        assert!(matches!(err, ChainError::Cancelled));
    }

    #[test]
    fn search_stops_when_cancelled_midway() {
        use std::sync::Arc;
        use std::time::Duration;

        let block = Block::new(3, Vec::new(), "00");
        let template = HashTemplate::new(&block).unwrap();
        let cancel = Arc::new(AtomicBool::new(false));
        let flag = cancel.clone();
        let worker = std::thread::spawn(move || search(&template, 64, &flag));
        std::thread::sleep(Duration::from_millis(50));
        cancel.store(true, Ordering::Relaxed);
        let res = worker.join().unwrap();
        assert!(matches!(res, Err(ChainError::Cancelled)));
    }
}
