//! A table backend answering queries from a flat file of `key value`
//! pairs, loaded once at startup. Lines starting with `#` and blank
//! lines are skipped; a key without a value maps to the empty string.

use anyhow::Context;
use clap::Parser;
use smtpd_table::{Service, Table};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Serve OpenSMTPD table lookups from a static file.
#[derive(Debug, Parser)]
#[command(about)]
struct Opt {
    /// Service to answer for.
    #[arg(long, default_value = "alias")]
    service: Service,

    /// File of whitespace-separated `key value` pairs.
    file: PathBuf,
}

fn load_entries(path: &PathBuf) -> anyhow::Result<BTreeMap<String, String>> {
    let data = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let mut entries = BTreeMap::new();
    for line in data.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.split_whitespace();
        let Some(key) = fields.next() else {
            continue;
        };
        entries.insert(key.to_string(), fields.collect::<Vec<_>>().join(" "));
    }
    Ok(entries)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout belongs to the protocol; diagnostics go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let opt = Opt::parse();
    let entries = Arc::new(load_entries(&opt.file)?);
    tracing::info!(
        "serving {} entries from {} as service {}",
        entries.len(),
        opt.file.display(),
        opt.service
    );

    let mut table = Table::new();

    let checked = entries.clone();
    table.on_check(opt.service, move |_ctx, key| {
        let checked = checked.clone();
        async move { Ok(checked.contains_key(&key)) }
    });

    let looked_up = entries.clone();
    table.on_lookup(opt.service, move |_ctx, key| {
        let looked_up = looked_up.clone();
        async move { Ok(looked_up.get(&key).cloned()) }
    });

    let fetched = entries.clone();
    table.on_fetch(opt.service, move |_ctx| {
        let fetched = fetched.clone();
        async move { Ok(fetched.values().next().cloned()) }
    });

    table.on_update(|ctx| async move {
        // entries are loaded once; an update just acknowledges
        tracing::info!("table {} asked us to refresh", ctx.table);
        Ok(())
    });

    table.dispatch().await?;
    Ok(())
}
