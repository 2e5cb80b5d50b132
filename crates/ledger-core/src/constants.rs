pub const HASH_SIZE: usize = 32;
pub const HASH_HEX_SIZE: usize = HASH_SIZE * 2;
pub const GENESIS_PREVIOUS_HASH: &str = "0";
pub const DEFAULT_DIFFICULTY: u32 = 4;
/// Hex zeros beyond this make a single block take minutes on commodity hardware.
pub const MAX_DIFFICULTY: u32 = 8;
pub const DEFAULT_MINING_REWARD: i64 = 10;
pub const REWARD_ISSUER: &str = "BLOCKCHAIN_REWARD";
pub const SYSTEM_MINER: &str = "SYSTEM_MINER";
pub const VOTE_TYPE: &str = "vote";
pub const MINING_REWARD_TYPE: &str = "mining_reward";
