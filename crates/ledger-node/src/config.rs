use crate::constants::{DEFAULT_BACKOFF_SECS, DEFAULT_TICK_SECS};
use crate::reconcile::ReconcilerConfig;
use anyhow::{Context, Result};
use clap::Parser;
use ledger_core::constants::{DEFAULT_DIFFICULTY, DEFAULT_MINING_REWARD, SYSTEM_MINER};
use ledger_core::ChainConfig;
use std::{net::SocketAddr, path::PathBuf, time::Duration};

#[derive(Parser, Debug, Clone)]
#[command(name = "ledger-node")]
#[command(about = "Vote ledger node: in-memory hash chain fed from a durable pending queue")]
pub struct Args {
    /// Address to listen on, e.g. 127.0.0.1:8080
    #[arg(long, default_value = "127.0.0.1:8080")]
    pub listen: String,

    /// Data directory for sled
    #[arg(long, default_value = "./data")]
    pub data_dir: PathBuf,

    /// Leading zero hex characters required in block hashes
    #[arg(long, default_value_t = DEFAULT_DIFFICULTY)]
    pub difficulty: u32,

    /// Amount credited to the miner after each block
    #[arg(long, default_value_t = DEFAULT_MINING_REWARD)]
    pub mining_reward: i64,

    /// Seconds between reconciliation ticks
    #[arg(long, default_value_t = DEFAULT_TICK_SECS)]
    pub tick_secs: u64,

    /// Seconds to wait after a failed tick
    #[arg(long, default_value_t = DEFAULT_BACKOFF_SECS)]
    pub backoff_secs: u64,

    /// Address credited with mining rewards
    #[arg(long, default_value = SYSTEM_MINER)]
    pub miner: String,
}

impl Args {
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.listen
            .parse()
            .with_context(|| format!("invalid listen address `{}`", self.listen))
    }

    pub fn chain_config(&self) -> Result<ChainConfig> {
        let config = ChainConfig {
            difficulty: self.difficulty,
            mining_reward: self.mining_reward,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            interval: Duration::from_secs(self.tick_secs),
            backoff: Duration::from_secs(self.backoff_secs),
            miner: self.miner.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_values() {
        let args = Args::try_parse_from(["ledger-node"]).unwrap();
        assert_eq!(args.listen_addr().unwrap().port(), 8080);
        let chain = args.chain_config().unwrap();
        assert_eq!(chain.difficulty, 4);
        assert_eq!(chain.mining_reward, 10);
        let reconciler = args.reconciler_config();
        assert_eq!(reconciler.interval, Duration::from_secs(10));
        assert_eq!(reconciler.backoff, Duration::from_secs(30));
        assert_eq!(reconciler.miner, "SYSTEM_MINER");
    }

    #[test]
    fn rejects_excessive_difficulty() {
        let args = Args::try_parse_from(["ledger-node", "--difficulty", "12"]).unwrap();
        assert!(args.chain_config().is_err());
    }

    #[test]
    fn rejects_bad_listen_address() {
        let args = Args::try_parse_from(["ledger-node", "--listen", "nowhere"]).unwrap();
        assert!(args.listen_addr().is_err());
    }
}
