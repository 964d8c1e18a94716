use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use drive_core::DriveClient;
use drivewalk::{
    Drive, Entry, ExportTable, MemoryDirCache, PacedClient, Pacer, RemoteError, WalkConfig,
    resolve_root_id,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "drivewalk=info";

#[derive(Debug, Clone, PartialEq, Eq)]
enum CliMode {
    Run { path: String, json: bool },
    Help,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut path = None;
    let mut json = false;
    for arg in args.into_iter().skip(1) {
        match arg.as_str() {
            "--json" => json = true,
            "--help" | "-h" => return Ok(CliMode::Help),
            other if other.starts_with('-') => anyhow::bail!("unknown argument: {other}"),
            other => {
                if path.replace(other.to_string()).is_some() {
                    anyhow::bail!("only one path may be given");
                }
            }
        }
    }
    Ok(CliMode::Run {
        path: path.unwrap_or_default(),
        json,
    })
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn format_entry(entry: &Entry) -> String {
    match entry {
        Entry::Dir(dir) => format!("{}/", dir.remote),
        Entry::Dangling(shortcut) => format!("{:>12} {} (dangling)", "-", shortcut.base.remote),
        other => match other.size() {
            Some(size) => format!("{:>12} {}", size, other.remote()),
            None => format!("{:>12} {}", "-", other.remote()),
        },
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let (path, json) = match parse_cli_mode(std::env::args())? {
        CliMode::Help => {
            println!("Usage: drivewalk [--json] [PATH]");
            println!("  PATH     Directory below the root to list (default: whole drive)");
            println!("  --json   Print one JSON object per entry");
            return Ok(());
        }
        CliMode::Run { path, json } => (path, json),
    };
    init_tracing();

    let config = WalkConfig::from_env()?;
    let client = match config.api_base_url.as_deref() {
        Some(base) => DriveClient::with_base_url(base, config.token.clone()),
        None => DriveClient::new(config.token.clone()),
    }
    .context("failed to build API client")?;
    let pacer = Pacer::new(config.pacer_config(), Arc::new(config.retry_classifier()));
    let api = Arc::new(PacedClient::new(client, pacer));

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, stopping listing");
            on_signal.cancel();
        }
    });

    let root_id = match config.root_folder_id.clone() {
        Some(id) => id,
        None => {
            let id = resolve_root_id(api.as_ref(), &cancel)
                .await
                .context("failed to resolve root folder")?;
            info!(root_folder_id = %id, "set DRIVEWALK_ROOT_FOLDER_ID to skip this lookup");
            id
        }
    };

    let exports = match api.get_about("exportFormats", &cancel).await {
        Ok(about) => ExportTable::from_about(&about, &config.list.export_extensions),
        Err(RemoteError::Cancelled) => anyhow::bail!("interrupted before listing started"),
        Err(err) => {
            warn!(error = %err, "failed to fetch export formats, documents will be skipped");
            ExportTable::default()
        }
    };

    let drive = Drive::new(
        api,
        Arc::new(MemoryDirCache::new(&root_id)),
        Arc::new(exports),
        &root_id,
        config.list.clone(),
        config.crawl,
    );

    let stdout = std::io::stdout();
    let mut out = std::io::BufWriter::new(stdout.lock());
    let stats = drive
        .crawl_with_stats(&path, &cancel, |entry| -> anyhow::Result<()> {
            if json {
                serde_json::to_writer(&mut out, &entry)?;
                writeln!(out)?;
            } else {
                writeln!(out, "{}", format_entry(&entry))?;
            }
            Ok(())
        })
        .await
        .with_context(|| format!("failed to list {path:?}"))?;
    out.flush()?;
    info!(
        entries = stats.entries,
        batches = stats.batches,
        requeued = stats.requeued,
        "done"
    );
    Ok(())
}
