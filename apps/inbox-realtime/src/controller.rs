//! The session actor.
//!
//! One task owns the session state, both feed subscriptions, the fallback
//! poller and every in-flight fetch. Callers drive it through a cloneable
//! [`RealtimeHandle`]. The select loop is biased so that feed signals are
//! drained before fetch completions, timers and commands.

use std::future::pending;
use std::sync::Arc;

use change_feed::{ChangeFeed, ChannelSpec, FeedSignal, FeedSubscription, RawChange};
use futures_util::future::BoxFuture;
use futures_util::stream::{FuturesOrdered, FuturesUnordered, StreamExt};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

use crate::applier::{Fetched, PendingFetch, Scope, ViewApplier};
use crate::config::RealtimeConfig;
use crate::fragments::FragmentSource;
use crate::model::{ChangeEvent, ThreadId};
use crate::poller::FallbackPoller;
use crate::reconciler::{self, GlobalPolicy, ViewDecision};
use crate::session::{Epoch, SessionState};
use crate::view::ViewSurface;

pub const GLOBAL_CHANNEL: &str = "messages";
const SCHEMA: &str = "public";
const TABLE: &str = "messages";

pub fn global_channel() -> ChannelSpec {
    ChannelSpec::table(GLOBAL_CHANNEL, SCHEMA, TABLE)
}

pub fn thread_channel(thread: &ThreadId) -> ChannelSpec {
    ChannelSpec::table(format!("thread_{thread}"), SCHEMA, TABLE)
        .with_filter(format!("thread_id=eq.{thread}"))
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ControllerError {
    #[error("thread id must not be empty")]
    EmptyThreadId,
    #[error("realtime controller has stopped")]
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HandleState {
    Unsubscribed,
    Subscribing,
    Subscribed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControllerSnapshot {
    pub active_thread: Option<ThreadId>,
    pub epoch: Epoch,
    pub global: HandleState,
    pub thread: HandleState,
    pub thread_channel: Option<String>,
    pub polling: bool,
    pub poll_cycles: u64,
    pub reconnect_pending: bool,
    pub thread_fetches: usize,
    pub list_fetches: usize,
}

enum Command {
    InitGlobal(oneshot::Sender<()>),
    SwitchThread(ThreadId, oneshot::Sender<()>),
    LeaveThread(oneshot::Sender<()>),
    Teardown(oneshot::Sender<()>),
    Snapshot(oneshot::Sender<ControllerSnapshot>),
}

/// Navigation entry points. Dropping the last handle tears the session down
/// and stops the controller task.
#[derive(Debug, Clone)]
pub struct RealtimeHandle {
    commands: mpsc::Sender<Command>,
}

impl RealtimeHandle {
    /// Establishes (or replaces) the aggregate feed.
    pub async fn init_global(&self) -> Result<(), ControllerError> {
        self.request(Command::InitGlobal).await
    }

    pub async fn switch_thread(&self, thread: impl Into<String>) -> Result<(), ControllerError> {
        let thread = ThreadId::parse(thread).ok_or(ControllerError::EmptyThreadId)?;
        self.request(|reply| Command::SwitchThread(thread, reply))
            .await
    }

    pub async fn leave_thread(&self) -> Result<(), ControllerError> {
        self.request(Command::LeaveThread).await
    }

    pub async fn teardown(&self) -> Result<(), ControllerError> {
        self.request(Command::Teardown).await
    }

    pub async fn snapshot(&self) -> Result<ControllerSnapshot, ControllerError> {
        self.request(Command::Snapshot).await
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, ControllerError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| ControllerError::Stopped)?;
        response.await.map_err(|_| ControllerError::Stopped)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FeedKind {
    Global,
    Thread,
}

impl FeedKind {
    fn as_str(self) -> &'static str {
        match self {
            FeedKind::Global => "global",
            FeedKind::Thread => "thread",
        }
    }
}

/// One subscription slot and its handle state.
#[derive(Debug)]
struct FeedSlot {
    kind: FeedKind,
    state: HandleState,
    subscription: Option<FeedSubscription>,
}

impl FeedSlot {
    fn new(kind: FeedKind) -> Self {
        Self {
            kind,
            state: HandleState::Unsubscribed,
            subscription: None,
        }
    }

    fn channel(&self) -> Option<&str> {
        self.subscription.as_ref().map(|sub| sub.spec().name.as_str())
    }

    fn release(&mut self) {
        if let Some(sub) = self.subscription.take() {
            debug!(target = "inbox.realtime", feed = self.kind.as_str(), channel = %sub.spec().name, "releasing subscription");
        }
        self.state = HandleState::Unsubscribed;
    }

    /// Next signal from the live subscription. `None` means the provider
    /// went away; with no subscription this never resolves.
    async fn recv(&mut self) -> Option<FeedSignal> {
        match self.subscription.as_mut() {
            Some(sub) => sub.recv().await,
            None => pending().await,
        }
    }
}

pub struct RealtimeController {
    config: RealtimeConfig,
    feed: Arc<dyn ChangeFeed>,
    applier: ViewApplier,
    session: SessionState,
    global: FeedSlot,
    thread: FeedSlot,
    poller: FallbackPoller,
    reconnect_at: Option<Instant>,
    thread_ops: FuturesOrdered<BoxFuture<'static, Fetched>>,
    list_ops: FuturesUnordered<BoxFuture<'static, Fetched>>,
    commands: mpsc::Receiver<Command>,
}

impl RealtimeController {
    pub fn new(
        config: RealtimeConfig,
        feed: Arc<dyn ChangeFeed>,
        fragments: Arc<dyn FragmentSource>,
        view: Arc<dyn ViewSurface>,
    ) -> (Self, RealtimeHandle) {
        let (tx, rx) = mpsc::channel(config.command_buffer.max(1));
        let controller = Self {
            poller: FallbackPoller::new(config.poll_interval),
            config,
            feed,
            applier: ViewApplier::new(fragments, view),
            session: SessionState::new(),
            global: FeedSlot::new(FeedKind::Global),
            thread: FeedSlot::new(FeedKind::Thread),
            reconnect_at: None,
            thread_ops: FuturesOrdered::new(),
            list_ops: FuturesUnordered::new(),
            commands: rx,
        };
        (controller, RealtimeHandle { commands: tx })
    }

    /// Builds a controller and runs it on the current runtime.
    pub fn spawn(
        config: RealtimeConfig,
        feed: Arc<dyn ChangeFeed>,
        fragments: Arc<dyn FragmentSource>,
        view: Arc<dyn ViewSurface>,
    ) -> (RealtimeHandle, JoinHandle<()>) {
        let (controller, handle) = Self::new(config, feed, fragments, view);
        let task = tokio::spawn(controller.run());
        (handle, task)
    }

    pub async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                signal = self.global.recv() => self.on_global_signal(signal),
                signal = self.thread.recv() => self.on_thread_signal(signal),
                Some(fetched) = self.thread_ops.next(), if !self.thread_ops.is_empty() => {
                    self.on_thread_fetched(fetched)
                }
                Some(fetched) = self.list_ops.next(), if !self.list_ops.is_empty() => {
                    self.applier.commit(fetched);
                }
                _ = self.poller.tick() => self.poll_cycle(),
                _ = sleep_until(self.reconnect_at) => {
                    self.reconnect_at = None;
                    info!(target = "inbox.realtime", "retrying global subscription");
                    self.init_global();
                }
                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => {
                        self.teardown();
                        break;
                    }
                },
            }
        }
        debug!(target = "inbox.realtime", "controller stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::InitGlobal(reply) => {
                self.init_global();
                let _ = reply.send(());
            }
            Command::SwitchThread(thread, reply) => {
                self.switch_thread(thread);
                let _ = reply.send(());
            }
            Command::LeaveThread(reply) => {
                self.leave_thread();
                let _ = reply.send(());
            }
            Command::Teardown(reply) => {
                self.teardown();
                let _ = reply.send(());
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    fn init_global(&mut self) {
        self.global.release();
        let spec = global_channel();
        match self.feed.subscribe(&spec) {
            Ok(sub) => {
                info!(target = "inbox.realtime", channel = %spec.name, "subscribing to global feed");
                self.global.subscription = Some(sub);
                self.global.state = HandleState::Subscribing;
            }
            Err(err) => {
                warn!(target = "inbox.realtime", channel = %spec.name, error = %err, "global subscribe failed");
                self.on_global_failure();
            }
        }
    }

    fn switch_thread(&mut self, thread: ThreadId) {
        self.thread.release();
        let epoch = self.session.enter(thread.clone());
        self.cancel_thread_ops();

        let spec = thread_channel(&thread);
        match self.feed.subscribe(&spec) {
            Ok(sub) => {
                info!(target = "inbox.realtime", thread = %thread, epoch = epoch.value(), channel = %spec.name, "subscribing to thread feed");
                self.thread.subscription = Some(sub);
                self.thread.state = HandleState::Subscribing;
            }
            Err(err) => {
                warn!(target = "inbox.realtime", thread = %thread, error = %err, "thread subscribe failed");
                self.thread.state = HandleState::Failed;
            }
        }
    }

    fn leave_thread(&mut self) {
        self.thread.release();
        let epoch = self.session.clear();
        self.cancel_thread_ops();
        debug!(target = "inbox.realtime", epoch = epoch.value(), "left thread view");
    }

    fn teardown(&mut self) {
        self.thread.release();
        self.global.release();
        let epoch = self.session.clear();
        self.poller.stop();
        self.reconnect_at = None;
        self.cancel_thread_ops();
        self.list_ops = FuturesUnordered::new();
        info!(target = "inbox.realtime", epoch = epoch.value(), "realtime session torn down");
    }

    fn snapshot(&self) -> ControllerSnapshot {
        ControllerSnapshot {
            active_thread: self.session.active_thread().cloned(),
            epoch: self.session.epoch(),
            global: self.global.state,
            thread: self.thread.state,
            thread_channel: self.thread.channel().map(str::to_string),
            polling: self.poller.is_running(),
            poll_cycles: self.poller.cycles(),
            reconnect_pending: self.reconnect_at.is_some(),
            thread_fetches: self.thread_ops.len(),
            list_fetches: self.list_ops.len(),
        }
    }

    fn cancel_thread_ops(&mut self) {
        if !self.thread_ops.is_empty() {
            debug!(target = "inbox.realtime", dropped = self.thread_ops.len(), "cancelling thread fetches");
        }
        self.thread_ops = FuturesOrdered::new();
    }

    fn on_global_signal(&mut self, signal: Option<FeedSignal>) {
        match signal {
            Some(FeedSignal::Status(status)) if status.is_failure() => {
                warn!(target = "inbox.realtime", status = %status, "global feed failed");
                self.on_global_failure();
            }
            Some(FeedSignal::Status(_)) => {
                info!(target = "inbox.realtime", "global feed subscribed");
                self.global.state = HandleState::Subscribed;
                self.reconnect_at = None;
                self.poller.stop();
            }
            Some(FeedSignal::Change(raw)) => {
                if self.global.state != HandleState::Subscribed {
                    debug!(target = "inbox.realtime", state = ?self.global.state, "global change before subscribe, dropped");
                    return;
                }
                let Some(event) = ingest(FeedKind::Global, &raw) else {
                    return;
                };
                let policy = GlobalPolicy {
                    refresh_preview_on_delete: self.config.refresh_preview_on_delete,
                };
                let decision = reconciler::reconcile_global(&event, policy);
                self.dispatch(decision);
            }
            None => {
                warn!(target = "inbox.realtime", "global feed closed by provider");
                self.global.subscription = None;
                self.on_global_failure();
            }
        }
    }

    fn on_global_failure(&mut self) {
        self.global.state = HandleState::Failed;
        self.poller.start();
        if let Some(interval) = self.config.reconnect_interval.filter(|interval| !interval.is_zero()) {
            if self.reconnect_at.is_none() {
                self.reconnect_at = Some(Instant::now() + interval);
            }
        }
    }

    fn on_thread_signal(&mut self, signal: Option<FeedSignal>) {
        match signal {
            Some(FeedSignal::Status(status)) if status.is_failure() => {
                warn!(target = "inbox.realtime", channel = self.thread.channel().unwrap_or_default(), status = %status, "thread feed failed");
                self.thread.state = HandleState::Failed;
            }
            Some(FeedSignal::Status(_)) => {
                info!(target = "inbox.realtime", channel = self.thread.channel().unwrap_or_default(), "thread feed subscribed");
                self.thread.state = HandleState::Subscribed;
            }
            Some(FeedSignal::Change(raw)) => {
                if self.thread.state != HandleState::Subscribed {
                    debug!(target = "inbox.realtime", state = ?self.thread.state, "thread change before subscribe, dropped");
                    return;
                }
                let Some(event) = ingest(FeedKind::Thread, &raw) else {
                    return;
                };
                let decision = reconciler::reconcile_thread(&event, &self.session);
                self.dispatch(decision);
            }
            None => {
                warn!(target = "inbox.realtime", "thread feed closed by provider");
                self.thread.subscription = None;
                self.thread.state = HandleState::Failed;
            }
        }
    }

    fn dispatch(&mut self, decision: ViewDecision) {
        if let ViewDecision::Ignore(reason) = &decision {
            debug!(target = "inbox.realtime", reason = ?reason, "change ignored");
            return;
        }
        if let Some(pending) = self.applier.begin(decision, self.session.epoch()) {
            self.enqueue(pending);
        }
    }

    fn enqueue(&mut self, pending: PendingFetch) {
        match pending.scope {
            Scope::Thread(_) => self.thread_ops.push_back(pending.future),
            Scope::List => self.list_ops.push(pending.future),
        }
    }

    fn on_thread_fetched(&mut self, fetched: Fetched) {
        if let Scope::Thread(epoch) = fetched.scope {
            if !self.session.is_current(epoch) {
                debug!(target = "inbox.realtime", op = fetched.op.label(), epoch = epoch.value(), "stale thread fetch discarded");
                return;
            }
        }
        self.applier.commit(fetched);
    }

    fn poll_cycle(&mut self) {
        debug!(target = "inbox.poller", cycle = self.poller.cycles(), thread = ?self.session.active_thread(), "poll cycle");
        if let Some(thread) = self.session.active_thread().cloned() {
            let pending = self.applier.begin_thread_reload(thread, self.session.epoch());
            self.enqueue(pending);
        }
        let pending = self.applier.begin_list_reload();
        self.enqueue(pending);
    }
}

/// Validates a raw change at the ingestion boundary.
fn ingest(kind: FeedKind, raw: &RawChange) -> Option<ChangeEvent> {
    match ChangeEvent::from_raw(raw) {
        Ok(event) => {
            debug!(target = "inbox.realtime", feed = kind.as_str(), event = ?event.kind(), message = %event.message_id(), thread = %event.thread_id(), "change received");
            Some(event)
        }
        Err(err) => {
            warn!(target = "inbox.realtime", feed = kind.as_str(), event = ?raw.kind, error = %err, "dropping malformed change");
            None
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => pending().await,
    }
}
