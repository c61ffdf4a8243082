use anyhow::Context;
use clap::Parser;
use smtpd_table::TABLE_PROTOCOL_VERSION;
use std::collections::BTreeSet;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

const SMTPD_VERSION: &str = "7.4.0";
const OPAQUE_TOKEN: &str = "deadbeefabadf00d";

/// Drive an OpenSMTPD table backend through one query.
///
/// The backend is spawned as a child process with its stdio piped, taken
/// through the config/register handshake, asked exactly one question, and
/// the single reply line is printed.
#[derive(Debug, Parser)]
#[command(about)]
struct Opt {
    /// Table name presented to the backend.
    #[arg(long)]
    table: String,

    /// Lookup service to query.
    #[arg(long)]
    service: String,

    /// Fetch a value from the service.
    #[arg(long)]
    fetch: bool,

    /// Check whether KEY exists in the service.
    #[arg(long, value_name = "KEY")]
    check: Option<String>,

    /// Look KEY up in the service.
    #[arg(long, value_name = "KEY")]
    lookup: Option<String>,

    /// Backend program and its arguments.
    #[arg(required = true, trailing_var_arg = true)]
    backend: Vec<String>,
}

enum Query {
    Fetch,
    Check(String),
    Lookup(String),
}

impl Opt {
    fn query(&self) -> anyhow::Result<Query> {
        match (self.fetch, &self.check, &self.lookup) {
            (true, None, None) => Ok(Query::Fetch),
            (false, Some(key), None) => Ok(Query::Check(key.clone())),
            (false, None, Some(key)) => Ok(Query::Lookup(key.clone())),
            _ => anyhow::bail!("exactly one of --fetch, --check or --lookup must be given"),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opt = Opt::parse();
    let query = opt.query()?;

    let mut child = Command::new(&opt.backend[0])
        .args(&opt.backend[1..])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("spawning {:?}", opt.backend))?;
    let mut stdin = child.stdin.take().context("backend stdin not captured")?;
    let mut stdout = BufReader::new(child.stdout.take().context("backend stdout not captured")?).lines();

    stdin
        .write_all(
            format!(
                "config|smtpd-version|{SMTPD_VERSION}\n\
                 config|protocol|{TABLE_PROTOCOL_VERSION}\n\
                 config|ready\n"
            )
            .as_bytes(),
        )
        .await?;
    stdin.flush().await?;

    let mut services = BTreeSet::new();
    loop {
        let line = stdout
            .next_line()
            .await?
            .context("backend closed its pipe during registration")?;
        if line == "register|ready" {
            break;
        }
        if let Some(service) = line.strip_prefix("register|") {
            services.insert(service.to_string());
        }
    }
    anyhow::ensure!(
        services.contains(&opt.service),
        "service {} is not registered by the backend (it registered: {})",
        opt.service,
        services.into_iter().collect::<Vec<_>>().join(", "),
    );

    let now = chrono::Utc::now().timestamp();
    let frame = match &query {
        Query::Fetch => format!(
            "table|{TABLE_PROTOCOL_VERSION}|{now}|{}|fetch|{}|{OPAQUE_TOKEN}",
            opt.table, opt.service
        ),
        Query::Check(key) => format!(
            "table|{TABLE_PROTOCOL_VERSION}|{now}|{}|check|{}|{OPAQUE_TOKEN}|{key}",
            opt.table, opt.service
        ),
        Query::Lookup(key) => format!(
            "table|{TABLE_PROTOCOL_VERSION}|{now}|{}|lookup|{}|{OPAQUE_TOKEN}|{key}",
            opt.table, opt.service
        ),
    };
    stdin.write_all(format!("{frame}\n").as_bytes()).await?;
    stdin.flush().await?;

    let reply = stdout
        .next_line()
        .await?
        .context("backend closed its pipe before replying")?;
    println!("{reply}");

    Ok(())
}
