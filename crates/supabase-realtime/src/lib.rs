//! Supabase Realtime adapter for [`change_feed::ChangeFeed`].
//!
//! Every subscription opens its own websocket to
//! `<project>/realtime/v1/websocket`, joins `realtime:<channel>` with a
//! `postgres_changes` config and forwards row changes until released.
//! Releasing the subscription sends `phx_leave` and closes the socket.

mod channel;
pub mod phoenix;

use std::sync::Arc;
use std::time::Duration;

use change_feed::{ChangeFeed, ChannelSpec, FeedError, FeedResult, FeedSubscription};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::channel::ChannelTask;

pub const PROTOCOL_VSN: &str = "1.0.0";

#[derive(Debug, Error)]
pub enum SupabaseError {
    #[error("unsupported project url scheme `{0}`")]
    UnsupportedScheme(String),
    #[error("project url cannot be used as a base: {0}")]
    InvalidProjectUrl(Url),
}

#[derive(Debug, Clone)]
pub struct SupabaseConfig {
    pub project_url: Url,
    pub api_key: String,
    /// User JWT sent with the join so row level security applies.
    pub access_token: Option<String>,
    pub join_timeout: Duration,
    pub heartbeat_interval: Duration,
}

impl SupabaseConfig {
    pub fn new(project_url: Url, api_key: impl Into<String>) -> Self {
        Self {
            project_url,
            api_key: api_key.into(),
            access_token: None,
            join_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(25),
        }
    }

    pub fn socket_url(&self) -> Result<Url, SupabaseError> {
        let mut url = self.project_url.clone();
        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => return Err(SupabaseError::UnsupportedScheme(other.to_string())),
        };
        url.set_scheme(scheme)
            .map_err(|_| SupabaseError::UnsupportedScheme(scheme.to_string()))?;
        if url.cannot_be_a_base() {
            return Err(SupabaseError::InvalidProjectUrl(self.project_url.clone()));
        }
        let path = format!(
            "{}/realtime/v1/websocket",
            url.path().trim_end_matches('/')
        );
        url.set_path(&path);
        url.query_pairs_mut()
            .clear()
            .append_pair("apikey", &self.api_key)
            .append_pair("vsn", PROTOCOL_VSN);
        Ok(url)
    }
}

#[derive(Debug, Clone)]
pub struct SupabaseFeed {
    config: Arc<SupabaseConfig>,
}

impl SupabaseFeed {
    pub fn new(config: SupabaseConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

impl ChangeFeed for SupabaseFeed {
    fn subscribe(&self, spec: &ChannelSpec) -> FeedResult<FeedSubscription> {
        let socket_url = self
            .config
            .socket_url()
            .map_err(|err| FeedError::Transport(err.to_string()))?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|err| FeedError::Transport(err.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let task = ChannelTask {
            config: self.config.clone(),
            socket_url,
            spec: spec.clone(),
            tx,
            cancel: cancel.clone(),
        };
        runtime.spawn(task.run());
        debug!(target = "supabase.realtime", channel = %spec.name, "channel task spawned");

        Ok(FeedSubscription::new(spec.clone(), rx).on_release(move || cancel.cancel()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(url: &str) -> SupabaseConfig {
        SupabaseConfig::new(Url::parse(url).expect("url"), "anon-key")
    }

    #[test]
    fn socket_url_switches_to_websocket_scheme() {
        let url = config("https://abc.supabase.co").socket_url().expect("socket url");
        assert_eq!(
            url.as_str(),
            "wss://abc.supabase.co/realtime/v1/websocket?apikey=anon-key&vsn=1.0.0"
        );

        let local = config("http://127.0.0.1:54321/").socket_url().expect("socket url");
        assert_eq!(
            local.as_str(),
            "ws://127.0.0.1:54321/realtime/v1/websocket?apikey=anon-key&vsn=1.0.0"
        );
    }

    #[test]
    fn socket_url_rejects_foreign_schemes() {
        let err = config("ftp://abc.supabase.co").socket_url().expect_err("ftp");
        assert!(matches!(err, SupabaseError::UnsupportedScheme(scheme) if scheme == "ftp"));
    }

    #[test]
    fn subscribe_outside_runtime_is_a_transport_error() {
        let feed = SupabaseFeed::new(config("https://abc.supabase.co"));
        let spec = ChannelSpec::table("messages", "public", "messages");
        let err = feed.subscribe(&spec).expect_err("no runtime");
        assert!(matches!(err, FeedError::Transport(_)));
    }
}
