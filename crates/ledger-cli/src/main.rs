use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "ledger-cli")]
#[command(about = "CLI client for the vote ledger node")]
struct Cli {
    /// Node base URL (e.g. http://127.0.0.1:8080)
    #[arg(long, global = true, default_value = "http://127.0.0.1:8080")]
    node: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Add a transaction straight to the node's pool
    Submit {
        #[arg(long)]
        sender: String,
        #[arg(long)]
        recipient: String,
        /// Payload as a JSON object, e.g. '{"amount": 5}'
        #[arg(long, default_value = "{}")]
        payload: String,
    },
    /// Durably queue a vote
    Vote {
        #[arg(long)]
        voter: String,
        #[arg(long)]
        election: String,
        #[arg(long)]
        candidate: String,
        #[arg(long)]
        candidate_id: String,
    },
    /// Ask the node to reconcile and mine now
    Mine,
    /// Show the latest block
    Head,
    /// Verify chain integrity
    Verify,
    /// Show results for an election
    Results {
        election: String,
    },
    /// Show the balance of an address
    Balance {
        address: String,
    },
}

#[derive(Serialize)]
struct Tx {
    sender: String,
    recipient: String,
    payload: Value,
}

#[derive(Serialize)]
struct Vote {
    voter_id: String,
    election_id: String,
    candidate: String,
    candidate_id: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .pretty()
        .init();

    let cli = Cli::parse();
    let node = cli.node.trim_end_matches('/').to_string();
    let client = reqwest::Client::new();

    let res = match cli.cmd {
        Command::Submit {
            sender,
            recipient,
            payload,
        } => {
            let payload: Value = serde_json::from_str(&payload)?;
            if !payload.is_object() {
                bail!("payload must be a JSON object");
            }
            let tx = Tx {
                sender,
                recipient,
                payload,
            };
            client.post(format!("{node}/transactions")).json(&tx).send().await?
        }
        Command::Vote {
            voter,
            election,
            candidate,
            candidate_id,
        } => {
            let vote = Vote {
                voter_id: voter,
                election_id: election,
                candidate,
                candidate_id,
            };
            client.post(format!("{node}/votes")).json(&vote).send().await?
        }
        Command::Mine => client.post(format!("{node}/mine")).send().await?,
        Command::Head => client.get(format!("{node}/chain/head")).send().await?,
        Command::Verify => client.get(format!("{node}/chain/valid")).send().await?,
        Command::Results { election } => {
            client
                .get(format!("{node}/elections/{election}/results"))
                .send()
                .await?
        }
        Command::Balance { address } => {
            client.get(format!("{node}/balances/{address}")).send().await?
        }
    };

    let status = res.status();
    let body = res.text().await?;
    debug!(%status, "node responded");
    println!("status: {}", status);
    match serde_json::from_str::<Value>(&body) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{body}"),
    }
    if !status.is_success() {
        bail!("request failed with {status}");
    }
    Ok(())
}
