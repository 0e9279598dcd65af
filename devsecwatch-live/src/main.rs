/**
 * DEVSECWATCH-WATCH - headless live session against a DevSecWatch backend
 *
 * Connects the push channel for the signed-in user, logs every toast and
 * unread-count change, and optionally follows one scan until it is done.
 * Ctrl-C disconnects cleanly.
 */

use anyhow::{Context, Result};
use clap::Parser;
use devsecwatch_live::{
    load_config, load_config_from, ChannelSink, FileCredentials, LiveSession, PollState,
    ToastKind,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "devsecwatch-watch", version, about = "Follow DevSecWatch scan notifications live")]
struct Args {
    /// YAML configuration file (defaults to $DEVSECWATCH_CONFIG or devsecwatch.yaml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Backend base URL, overrides the configuration
    #[arg(long)]
    api_url: Option<String>,

    /// Token file written by the login flow
    #[arg(long)]
    token_file: Option<PathBuf>,

    /// Follow this scan until it completes or fails
    #[arg(long)]
    scan: Option<i64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("devsecwatch_live=info,devsecwatch_watch=info")),
        )
        .init();

    let args = Args::parse();

    let mut cfg = match &args.config {
        Some(path) => {
            let mut cfg = load_config_from(path).await;
            cfg.apply_env();
            cfg
        }
        None => load_config().await,
    };
    if let Some(api_url) = args.api_url {
        cfg.api_url = api_url;
    }
    if let Some(path) = args.token_file {
        cfg.credentials.token_file = Some(path);
    }
    cfg.validate().context("invalid configuration")?;

    let token_file = cfg
        .credentials
        .token_file
        .clone()
        .context("no token file: pass --token-file or set DEVSECWATCH_TOKEN_FILE")?;
    let credentials = Arc::new(FileCredentials::new(token_file));

    let (sink, mut toasts) = ChannelSink::new();
    let session = LiveSession::over_http(&cfg, credentials, Arc::new(sink))
        .context("cannot build live session")?;

    match session.sync_identity().await {
        Some(identity) => info!(%identity, api = %cfg.api_url, "watching notifications"),
        None => warn!("not signed in, only scan polling is available"),
    }

    let poll = args.scan.map(|scan_id| {
        session.poll_scan(scan_id, move |scan| {
            info!(
                scan_id,
                status = ?scan.status,
                total = scan.total_vulnerabilities,
                critical = scan.critical_count,
                high = scan.high_count,
                medium = scan.medium_count,
                low = scan.low_count,
                "scan finished"
            );
        })
    });

    let mut snapshots = session.subscribe();
    let mut last_unread = None;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, shutting down");
                break;
            }
            Some(toast) = toasts.recv() => match toast.kind {
                ToastKind::Error => error!("{}", toast.message),
                ToastKind::Warning => warn!("{}", toast.message),
                ToastKind::Success | ToastKind::Info => info!("{}", toast.message),
            },
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let unread = snapshots.borrow_and_update().unread_count;
                if last_unread != Some(unread) {
                    info!(unread, "unread notifications");
                    last_unread = Some(unread);
                }
            }
            state = finished(&poll) => {
                if state == PollState::Done && !session.is_connected() && session.connection().identity().is_none() {
                    // nothing else to watch
                    break;
                }
            }
        }
    }

    if let Some(handle) = &poll {
        handle.cancel();
    }
    session.shutdown().await;
    Ok(())
}

async fn finished(poll: &Option<devsecwatch_live::PollHandle>) -> PollState {
    match poll {
        Some(handle) if handle.state() == PollState::Polling => handle.finished().await,
        _ => std::future::pending().await,
    }
}
