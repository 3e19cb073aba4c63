use std::sync::Arc;

use anyhow::{Context, Result};
use change_feed::{ChangeFeed, LocalFeed};
use clap::Parser;
use inbox_realtime::config::{AppConfig, Cli};
use inbox_realtime::telemetry::init_tracing;
use inbox_realtime::navigation::{close_thread, load_message_list, open_thread};
use inbox_realtime::{
    Container, ControllerError, DocumentView, FragmentSource, HttpFragmentSource,
    RealtimeController, RealtimeHandle,
};
use serde_json::json;
use supabase_realtime::{SupabaseConfig, SupabaseFeed};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::{signal, time::timeout};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::try_from(Cli::parse())?;
    init_tracing(&config.log_filter).context("failed to install tracing subscriber")?;

    let feed: Arc<dyn ChangeFeed> = match &config.supabase {
        Some(settings) => {
            let mut supabase = SupabaseConfig::new(settings.project_url.clone(), &settings.anon_key);
            supabase.join_timeout = settings.join_timeout;
            supabase.heartbeat_interval = settings.heartbeat_interval;
            supabase
                .socket_url()
                .context("invalid supabase project url")?;
            Arc::new(SupabaseFeed::new(supabase))
        }
        None => {
            let local = LocalFeed::new();
            local.refuse_subscriptions(Some("no realtime provider configured".into()));
            Arc::new(local)
        }
    };
    let fragments = Arc::new(
        HttpFragmentSource::new(
            config.dashboard_url.clone(),
            config.auth_token.as_deref(),
            config.fetch_timeout,
        )
        .context("failed to build dashboard client")?,
    );
    let view = Arc::new(DocumentView::new());

    info!(
        dashboard = %config.dashboard_url,
        supabase = %config.supabase.as_ref().map(|s| s.project_url.as_str()).unwrap_or("unset"),
        poll_interval_ms = config.realtime.poll_interval.as_millis() as u64,
        reconnect_secs = ?config.realtime.reconnect_interval.map(|d| d.as_secs()),
        "starting inbox-realtime"
    );

    view.mount(Container::MessageList);
    load_message_list(fragments.as_ref(), &view).await;

    let (handle, task) = RealtimeController::spawn(
        config.realtime.clone(),
        feed,
        fragments.clone(),
        view.clone(),
    );
    handle.init_global().await?;
    if let Some(thread) = config.initial_thread.as_deref() {
        open(&handle, fragments.as_ref(), &view, thread).await?;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("interrupt received");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    break;
                };
                let mut words = line.split_whitespace();
                match (words.next(), words.next()) {
                    (Some("open"), Some(thread)) => {
                        open(&handle, fragments.as_ref(), &view, thread).await?;
                    }
                    (Some("back"), None) => close_thread(&handle, &view).await?,
                    (Some("status"), None) => print_status(&handle, &view).await?,
                    (Some("quit"), None) => break,
                    (None, _) => {}
                    _ => warn!(input = %line, "unknown command; expected open <thread>, back, status or quit"),
                }
            }
        }
    }

    handle.teardown().await?;
    drop(handle);
    if timeout(config.shutdown_grace, task).await.is_err() {
        warn!(grace_secs = config.shutdown_grace.as_secs(), "controller did not stop in time");
    }
    Ok(())
}

async fn open(
    handle: &RealtimeHandle,
    fragments: &dyn FragmentSource,
    view: &DocumentView,
    thread: &str,
) -> Result<()> {
    match open_thread(handle, fragments, view, thread).await {
        Err(ControllerError::EmptyThreadId) => {
            warn!("thread id must not be empty");
            Ok(())
        }
        other => other.context("failed to open thread"),
    }
}

async fn print_status(handle: &RealtimeHandle, view: &DocumentView) -> Result<()> {
    let snapshot = handle.snapshot().await?;
    let status = json!({
        "controller": snapshot,
        "previews": view.preview_order(),
        "messages": view.message_order(),
        "scrolls": view.scroll_count(),
    });
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}
