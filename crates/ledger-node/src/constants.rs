pub(crate) const DEFAULT_TICK_SECS: u64 = 10;
pub(crate) const DEFAULT_BACKOFF_SECS: u64 = 30;
/// Recipient of every ballot transaction.
pub(crate) const ELECTION_SYSTEM: &str = "ELECTION_SYSTEM";
