//! Push-provider abstraction for row change feeds.
//!
//! A [`ChangeFeed`] hands out [`FeedSubscription`]s for a [`ChannelSpec`].
//! Each subscription yields channel status transitions and raw row changes
//! in the shape push providers deliver them (`{eventType, new, old}`).
//! Dropping a subscription releases the underlying channel.

use std::collections::HashMap;
use std::fmt;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelSpec {
    pub name: String,
    pub schema: String,
    pub table: String,
    /// Server-side row filter in PostgREST syntax, e.g. `thread_id=eq.42`.
    pub filter: Option<String>,
}

impl ChannelSpec {
    pub fn table(
        name: impl Into<String>,
        schema: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            schema: schema.into(),
            table: table.into(),
            filter: None,
        }
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelStatus {
    Subscribed,
    ChannelError,
    TimedOut,
    Closed,
}

impl ChannelStatus {
    pub fn is_failure(self) -> bool {
        !matches!(self, ChannelStatus::Subscribed)
    }
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ChannelStatus::Subscribed => "SUBSCRIBED",
            ChannelStatus::ChannelError => "CHANNEL_ERROR",
            ChannelStatus::TimedOut => "TIMED_OUT",
            ChannelStatus::Closed => "CLOSED",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Row change exactly as the provider delivered it. Records are left as raw
/// JSON; consumers validate them into their own types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawChange {
    #[serde(rename = "eventType")]
    pub kind: ChangeKind,
    #[serde(default)]
    pub new: Option<Value>,
    #[serde(default)]
    pub old: Option<Value>,
}

impl RawChange {
    pub fn insert(new: Value) -> Self {
        Self {
            kind: ChangeKind::Insert,
            new: Some(new),
            old: None,
        }
    }

    pub fn update(new: Value, old: Option<Value>) -> Self {
        Self {
            kind: ChangeKind::Update,
            new: Some(new),
            old,
        }
    }

    pub fn delete(old: Value) -> Self {
        Self {
            kind: ChangeKind::Delete,
            new: None,
            old: Some(old),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeedSignal {
    Status(ChannelStatus),
    Change(RawChange),
}

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("feed transport error: {0}")]
    Transport(String),
}

pub type FeedResult<T> = Result<T, FeedError>;

type ReleaseHook = Box<dyn FnOnce() + Send>;

/// Live subscription to one channel. Signals arrive in provider order.
pub struct FeedSubscription {
    spec: ChannelSpec,
    rx: mpsc::UnboundedReceiver<FeedSignal>,
    release: Option<ReleaseHook>,
}

impl FeedSubscription {
    pub fn new(spec: ChannelSpec, rx: mpsc::UnboundedReceiver<FeedSignal>) -> Self {
        Self {
            spec,
            rx,
            release: None,
        }
    }

    /// Registers a hook run once when the subscription is dropped.
    pub fn on_release<F>(mut self, hook: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.release = Some(Box::new(hook));
        self
    }

    pub fn spec(&self) -> &ChannelSpec {
        &self.spec
    }

    /// Next signal, or `None` once the provider side has gone away.
    pub async fn recv(&mut self) -> Option<FeedSignal> {
        self.rx.recv().await
    }
}

impl fmt::Debug for FeedSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedSubscription")
            .field("spec", &self.spec)
            .field("has_release_hook", &self.release.is_some())
            .finish()
    }
}

impl Drop for FeedSubscription {
    fn drop(&mut self) {
        self.rx.close();
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

pub trait ChangeFeed: Send + Sync {
    fn subscribe(&self, spec: &ChannelSpec) -> FeedResult<FeedSubscription>;
}

/// In-memory feed for tests and offline runs. Channels are keyed by
/// [`ChannelSpec::name`]; emitted signals reach every live subscriber.
#[derive(Debug)]
pub struct LocalFeed {
    channels: RwLock<HashMap<String, Vec<mpsc::UnboundedSender<FeedSignal>>>>,
    history: RwLock<Vec<ChannelSpec>>,
    initial_status: RwLock<Option<ChannelStatus>>,
    refusal: RwLock<Option<String>>,
}

impl Default for LocalFeed {
    fn default() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            history: RwLock::new(Vec::new()),
            initial_status: RwLock::new(Some(ChannelStatus::Subscribed)),
            refusal: RwLock::new(None),
        }
    }
}

impl LocalFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Status delivered to every new subscription right away. `None` leaves
    /// subscriptions pending until a status is emitted.
    pub fn set_initial_status(&self, status: Option<ChannelStatus>) {
        *self.initial_status.write() = status;
    }

    /// Makes `subscribe` fail with a transport error while set.
    pub fn refuse_subscriptions(&self, reason: Option<String>) {
        *self.refusal.write() = reason;
    }

    /// Sends a signal to the live subscribers of `channel` and returns how
    /// many received it.
    pub fn emit(&self, channel: &str, signal: FeedSignal) -> usize {
        let mut guard = self.channels.write();
        let Some(senders) = guard.get_mut(channel) else {
            return 0;
        };
        senders.retain(|tx| !tx.is_closed());
        senders
            .iter()
            .filter(|tx| tx.send(signal.clone()).is_ok())
            .count()
    }

    pub fn emit_change(&self, channel: &str, change: RawChange) -> usize {
        self.emit(channel, FeedSignal::Change(change))
    }

    pub fn emit_status(&self, channel: &str, status: ChannelStatus) -> usize {
        self.emit(channel, FeedSignal::Status(status))
    }

    /// Drops the provider side of every subscription on `channel`, as if the
    /// connection went away. Returns how many subscriptions were cut.
    pub fn disconnect(&self, channel: &str) -> usize {
        self.channels
            .write()
            .remove(channel)
            .map(|senders| senders.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .read()
            .get(channel)
            .map(|senders| senders.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }

    /// Every spec ever subscribed, oldest first.
    pub fn subscriptions(&self) -> Vec<ChannelSpec> {
        self.history.read().clone()
    }
}

impl ChangeFeed for LocalFeed {
    fn subscribe(&self, spec: &ChannelSpec) -> FeedResult<FeedSubscription> {
        if let Some(reason) = self.refusal.read().clone() {
            return Err(FeedError::Transport(reason));
        }
        self.history.write().push(spec.clone());

        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(status) = *self.initial_status.read() {
            let _ = tx.send(FeedSignal::Status(status));
        }
        self.channels
            .write()
            .entry(spec.name.clone())
            .or_default()
            .push(tx);
        Ok(FeedSubscription::new(spec.clone(), rx))
    }
}
