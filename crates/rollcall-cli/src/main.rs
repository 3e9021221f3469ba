use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;

#[zbus::proxy(
    interface = "org.rollcall.Matcher1",
    default_service = "org.rollcall.Matcher1",
    default_path = "/org/rollcall/Matcher1"
)]
trait Matcher {
    async fn enroll(&self, identity: &str, embedding: &[f64]) -> zbus::Result<String>;
    async fn revoke(&self, identity: &str) -> zbus::Result<bool>;
    async fn verify(&self, identity: &str, probe: &[f64]) -> zbus::Result<String>;
    async fn identify(&self, probe: &[f64]) -> zbus::Result<String>;
    async fn compare(&self, a: &[f64], b: &[f64]) -> zbus::Result<String>;
    async fn rank(&self, probe: &[f64], limit: u32) -> zbus::Result<String>;
    async fn list_identities(&self) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(
    name = "rollcall",
    about = "rollcall face matching CLI",
    after_help = "Identities are ordered as strings, so on equal scores \"10\" wins over \"9\". \
                  Zero-pad numeric ids (e.g. 0009, 0010) to keep numeric order."
)]
struct Cli {
    /// Talk to a daemon on the session bus instead of the system bus
    #[arg(long, global = true)]
    session: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll (or replace) an identity's reference embedding
    Enroll {
        identity: String,
        /// JSON file holding the embedding ("-" for stdin)
        embedding: PathBuf,
    },
    /// Remove an enrolled identity
    Revoke { identity: String },
    /// Check a probe embedding against one identity
    Verify {
        identity: String,
        /// JSON file holding the probe embedding ("-" for stdin)
        probe: PathBuf,
    },
    /// Find the best matching identity for a probe embedding
    Identify {
        /// JSON file holding the probe embedding ("-" for stdin)
        probe: PathBuf,
    },
    /// Score two embeddings against each other
    Compare { a: PathBuf, b: PathBuf },
    /// List the best candidates for a probe embedding
    Rank {
        probe: PathBuf,
        /// Number of candidates to return
        #[arg(short, long, default_value_t = 5)]
        limit: u32,
    },
    /// List enrolled identities
    List,
    /// Show daemon status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let conn = if cli.session {
        zbus::Connection::session().await
    } else {
        zbus::Connection::system().await
    }
    .context("connecting to D-Bus")?;
    let proxy = MatcherProxy::new(&conn)
        .await
        .context("rollcalld is not reachable")?;

    match cli.command {
        Commands::Enroll {
            identity,
            embedding,
        } => {
            let embedding = read_embedding(&embedding)?;
            tracing::debug!(identity, dimension = embedding.len(), "enrolling");
            let enrolled_at = proxy.enroll(&identity, &embedding).await?;
            println!("Enrolled {identity} at {enrolled_at}");
        }
        Commands::Revoke { identity } => {
            if proxy.revoke(&identity).await? {
                println!("Revoked {identity}");
            } else {
                println!("{identity} was not enrolled");
            }
        }
        Commands::Verify { identity, probe } => {
            let probe = read_embedding(&probe)?;
            print_json(&proxy.verify(&identity, &probe).await?)?;
        }
        Commands::Identify { probe } => {
            let probe = read_embedding(&probe)?;
            print_json(&proxy.identify(&probe).await?)?;
        }
        Commands::Compare { a, b } => {
            let a = read_embedding(&a)?;
            let b = read_embedding(&b)?;
            print_json(&proxy.compare(&a, &b).await?)?;
        }
        Commands::Rank { probe, limit } => {
            let probe = read_embedding(&probe)?;
            print_json(&proxy.rank(&probe, limit).await?)?;
        }
        Commands::List => print_json(&proxy.list_identities().await?)?,
        Commands::Status => print_json(&proxy.status().await?)?,
    }

    Ok(())
}

fn read_embedding(path: &Path) -> Result<Vec<f64>> {
    let raw = if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("reading embedding from stdin")?;
        buf
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("reading embedding from {}", path.display()))?
    };
    parse_embedding(&raw).with_context(|| format!("parsing embedding in {}", path.display()))
}

/// Accepts a bare array of numbers or an object with an `embedding` array.
fn parse_embedding(raw: &str) -> Result<Vec<f64>> {
    let value: Value = serde_json::from_str(raw)?;
    let array = match &value {
        Value::Array(values) => values,
        Value::Object(map) => match map.get("embedding") {
            Some(Value::Array(values)) => values,
            _ => bail!("expected an \"embedding\" array"),
        },
        _ => bail!("expected a JSON array of numbers"),
    };
    if array.is_empty() {
        bail!("embedding is empty");
    }
    array
        .iter()
        .enumerate()
        .map(|(i, v)| {
            v.as_f64()
                .with_context(|| format!("element {i} is not a number"))
        })
        .collect()
}

fn print_json(raw: &str) -> Result<()> {
    let value: Value = serde_json::from_str(raw).context("daemon returned invalid JSON")?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
