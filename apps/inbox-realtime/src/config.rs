use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use url::Url;

use crate::poller::DEFAULT_POLL_INTERVAL;

/// Controller tuning.
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Zero falls back to [`DEFAULT_POLL_INTERVAL`].
    pub poll_interval: Duration,
    /// Re-subscribe the global feed this long after it fails. `None` (or
    /// zero) keeps the session in polling until the provider recovers on
    /// its own.
    pub reconnect_interval: Option<Duration>,
    /// Treat a global DELETE as a preview refresh for its thread.
    pub refresh_preview_on_delete: bool,
    pub command_buffer: usize,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            reconnect_interval: None,
            refresh_preview_on_delete: false,
            command_buffer: 64,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SupabaseSettings {
    pub project_url: Url,
    pub anon_key: String,
    pub join_timeout: Duration,
    pub heartbeat_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub dashboard_url: Url,
    pub auth_token: Option<String>,
    /// `None` runs without a push provider, i.e. polling only.
    pub supabase: Option<SupabaseSettings>,
    pub initial_thread: Option<String>,
    pub realtime: RealtimeConfig,
    pub fetch_timeout: Duration,
    pub shutdown_grace: Duration,
    pub log_filter: String,
}

#[derive(Debug, Parser)]
#[command(
    name = "inbox-realtime",
    version,
    about = "Mirrors the Neurocrow inbox and keeps it in sync with message changes"
)]
pub struct Cli {
    /// Base URL of the admin dashboard serving the HTML fragments.
    #[arg(long, env = "INBOX_DASHBOARD_URL", default_value = "http://127.0.0.1:8080/")]
    pub dashboard_url: String,

    /// Dashboard session token, sent as the `auth_token` cookie.
    #[arg(long, env = "INBOX_AUTH_TOKEN")]
    pub auth_token: Option<String>,

    /// Supabase project URL. Without it the mirror runs in polling mode.
    #[arg(long, env = "SUPABASE_URL")]
    pub supabase_url: Option<String>,

    /// Supabase anon key.
    #[arg(long, env = "SUPABASE_ANON_KEY")]
    pub supabase_key: Option<String>,

    /// Thread to open on startup.
    #[arg(long)]
    pub thread: Option<String>,

    #[arg(long, env = "INBOX_POLL_INTERVAL_SECS", default_value_t = 5)]
    pub poll_interval_secs: u64,

    /// Retry a failed global subscription after this many seconds.
    #[arg(long, env = "INBOX_RECONNECT_SECS")]
    pub reconnect_secs: Option<u64>,

    /// Refresh the thread preview when a message is deleted.
    #[arg(long, env = "INBOX_REFRESH_PREVIEW_ON_DELETE", default_value_t = false)]
    pub refresh_preview_on_delete: bool,

    #[arg(long, env = "INBOX_FETCH_TIMEOUT_SECS", default_value_t = 10)]
    pub fetch_timeout_secs: u64,

    #[arg(long, env = "INBOX_JOIN_TIMEOUT_SECS", default_value_t = 10)]
    pub join_timeout_secs: u64,

    #[arg(long, env = "INBOX_HEARTBEAT_SECS", default_value_t = 25)]
    pub heartbeat_secs: u64,

    /// Time allowed for the controller to release its channels on exit.
    #[arg(long, env = "INBOX_SHUTDOWN_GRACE_SECS", default_value_t = 3)]
    pub shutdown_grace_secs: u64,

    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_filter: String,
}

impl TryFrom<Cli> for AppConfig {
    type Error = anyhow::Error;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        let mut dashboard_url = Url::parse(&cli.dashboard_url)
            .with_context(|| format!("invalid dashboard url: {}", cli.dashboard_url))?;
        // Fragment paths are joined relative to the base.
        if !dashboard_url.path().ends_with('/') {
            let path = format!("{}/", dashboard_url.path());
            dashboard_url.set_path(&path);
        }

        let supabase = match (cli.supabase_url, cli.supabase_key) {
            (Some(url), Some(key)) => {
                let project_url =
                    Url::parse(&url).with_context(|| format!("invalid supabase url: {url}"))?;
                if key.trim().is_empty() {
                    bail!("supabase anon key must not be empty");
                }
                Some(SupabaseSettings {
                    project_url,
                    anon_key: key,
                    join_timeout: Duration::from_secs(cli.join_timeout_secs),
                    heartbeat_interval: Duration::from_secs(cli.heartbeat_secs.max(1)),
                })
            }
            (Some(_), None) => bail!("--supabase-url requires --supabase-key"),
            (None, _) => None,
        };

        if cli.poll_interval_secs == 0 {
            bail!("poll interval must be at least one second");
        }

        let realtime = RealtimeConfig {
            poll_interval: Duration::from_secs(cli.poll_interval_secs),
            reconnect_interval: cli
                .reconnect_secs
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            refresh_preview_on_delete: cli.refresh_preview_on_delete,
            ..RealtimeConfig::default()
        };

        Ok(AppConfig {
            dashboard_url,
            auth_token: cli.auth_token.filter(|token| !token.is_empty()),
            supabase,
            initial_thread: cli.thread,
            realtime,
            fetch_timeout: Duration::from_secs(cli.fetch_timeout_secs),
            shutdown_grace: Duration::from_secs(cli.shutdown_grace_secs),
            log_filter: cli.log_filter,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> anyhow::Result<AppConfig> {
        let mut argv = vec!["inbox-realtime"];
        argv.extend_from_slice(args);
        AppConfig::try_from(Cli::try_parse_from(argv)?)
    }

    #[test]
    fn dashboard_url_gets_a_trailing_slash() {
        let config = parse(&["--dashboard-url", "https://dash.example.com/admin"]).expect("config");
        assert_eq!(config.dashboard_url.as_str(), "https://dash.example.com/admin/");
        assert!(config.supabase.is_none());
        assert_eq!(config.realtime.poll_interval, Duration::from_secs(5));
        assert_eq!(config.realtime.reconnect_interval, None);
    }

    #[test]
    fn supabase_settings_are_validated() {
        let config = parse(&[
            "--supabase-url",
            "https://abc.supabase.co",
            "--supabase-key",
            "anon",
            "--reconnect-secs",
            "30",
        ])
        .expect("config");
        let supabase = config.supabase.expect("supabase settings");
        assert_eq!(supabase.project_url.host_str(), Some("abc.supabase.co"));
        assert_eq!(
            config.realtime.reconnect_interval,
            Some(Duration::from_secs(30))
        );

        assert!(parse(&["--supabase-url", "not a url", "--supabase-key", "anon"]).is_err());
        assert!(parse(&["--supabase-url", "https://abc.supabase.co", "--supabase-key", " "]).is_err());
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        assert!(parse(&["--poll-interval-secs", "0"]).is_err());
    }

    #[test]
    fn zero_reconnect_disables_retries() {
        let config = parse(&["--reconnect-secs", "0"]).expect("config");
        assert_eq!(config.realtime.reconnect_interval, None);
    }
}
