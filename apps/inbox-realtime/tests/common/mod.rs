#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use change_feed::{LocalFeed, RawChange};
use inbox_realtime::{
    Container, DocumentView, FetchError, Fragment, FragmentSource, MessageId, RealtimeConfig,
    RealtimeController, RealtimeHandle, ThreadId, ViewSurface,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::task::JoinHandle;

/// Scripted fragment source. Every request is recorded as
/// `endpoint` or `endpoint:arg` before any delay or failure applies.
#[derive(Default)]
pub struct FakeFragments {
    calls: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
    delays: Mutex<HashMap<String, Duration>>,
}

impl FakeFragments {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    /// Fails every request to `endpoint` with a 500.
    pub fn fail(&self, endpoint: &str) {
        self.failing.lock().insert(endpoint.to_string());
    }

    /// Holds the response for `call` (e.g. `message-bubble:m1`).
    pub fn delay(&self, call: &str, delay: Duration) {
        self.delays.lock().insert(call.to_string(), delay);
    }

    async fn respond(&self, endpoint: &str, arg: Option<&str>) -> Result<Fragment, FetchError> {
        let call = match arg {
            Some(arg) => format!("{endpoint}:{arg}"),
            None => endpoint.to_string(),
        };
        self.calls.lock().push(call.clone());

        let delay = self.delays.lock().get(&call).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.lock().contains(endpoint) {
            return Err(FetchError::UnexpectedStatus {
                status: 500,
                body: format!("{endpoint} unavailable"),
            });
        }
        Ok(Fragment::new(render(endpoint, arg)))
    }
}

fn render(endpoint: &str, arg: Option<&str>) -> String {
    match (endpoint, arg) {
        ("thread-preview", Some(thread)) => {
            format!("<li id=\"thread-preview-{thread}\">{thread}</li>")
        }
        ("message-bubble", Some(id)) => format!("<div data-message-id=\"{id}\">{id}</div>"),
        ("chat-messages", Some(thread)) => format!(
            "<div data-message-id=\"{thread}-a\">a</div><div data-message-id=\"{thread}-b\">b</div>"
        ),
        ("message-list", None) => "<li id=\"thread-preview-T1\">T1</li>".to_string(),
        _ => String::new(),
    }
}

#[async_trait]
impl FragmentSource for FakeFragments {
    async fn thread_preview(&self, thread: &ThreadId) -> Result<Fragment, FetchError> {
        self.respond("thread-preview", Some(thread.as_str())).await
    }

    async fn message_bubble(&self, message: &MessageId) -> Result<Fragment, FetchError> {
        self.respond("message-bubble", Some(message.as_str())).await
    }

    async fn chat_messages(&self, thread: &ThreadId) -> Result<Fragment, FetchError> {
        self.respond("chat-messages", Some(thread.as_str())).await
    }

    async fn message_list(&self) -> Result<Fragment, FetchError> {
        self.respond("message-list", None).await
    }
}

/// `ViewSurface` that records every mutation and counts lookups while
/// delegating to a mounted [`DocumentView`].
pub struct RecordingSurface {
    pub document: DocumentView,
    mutations: Mutex<Vec<String>>,
    lookups: AtomicUsize,
}

impl Default for RecordingSurface {
    fn default() -> Self {
        Self {
            document: DocumentView::mounted(),
            mutations: Mutex::new(Vec::new()),
            lookups: AtomicUsize::new(0),
        }
    }
}

impl RecordingSurface {
    pub fn mutations(&self) -> Vec<String> {
        self.mutations.lock().clone()
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    fn record(&self, entry: String) {
        self.mutations.lock().push(entry);
    }
}

impl ViewSurface for RecordingSurface {
    fn is_mounted(&self, container: Container) -> bool {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.document.is_mounted(container)
    }

    fn has_message(&self, message: &MessageId) -> bool {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.document.has_message(message)
    }

    fn upsert_thread_preview(&self, thread: &ThreadId, html: &str) -> bool {
        self.record(format!("preview {thread}"));
        self.document.upsert_thread_preview(thread, html)
    }

    fn append_message(&self, message: &MessageId, html: &str) -> bool {
        self.record(format!("append {message}"));
        self.document.append_message(message, html)
    }

    fn replace_message(&self, message: &MessageId, html: &str) -> bool {
        self.record(format!("replace {message}"));
        self.document.replace_message(message, html)
    }

    fn remove_message(&self, message: &MessageId) -> bool {
        self.record(format!("remove {message}"));
        self.document.remove_message(message)
    }

    fn scroll_to_bottom(&self) -> bool {
        self.record("scroll".to_string());
        self.document.scroll_to_bottom()
    }

    fn replace_thread_messages(&self, html: &str) -> bool {
        self.record("replace_thread".to_string());
        self.document.replace_thread_messages(html)
    }

    fn replace_message_list(&self, html: &str) -> bool {
        self.record("replace_list".to_string());
        self.document.replace_message_list(html)
    }
}

pub struct Harness {
    pub feed: Arc<LocalFeed>,
    pub fragments: Arc<FakeFragments>,
    pub surface: Arc<RecordingSurface>,
    pub handle: RealtimeHandle,
    pub task: JoinHandle<()>,
}

impl Harness {
    pub fn start(config: RealtimeConfig) -> Self {
        Self::with_feed(config, LocalFeed::new())
    }

    pub fn with_feed(config: RealtimeConfig, feed: LocalFeed) -> Self {
        let feed = Arc::new(feed);
        let fragments = Arc::new(FakeFragments::default());
        let surface = Arc::new(RecordingSurface::default());
        let (handle, task) = RealtimeController::spawn(
            config,
            feed.clone(),
            fragments.clone(),
            surface.clone(),
        );
        Self {
            feed,
            fragments,
            surface,
            handle,
            task,
        }
    }

    /// Default config with the global feed already subscribed.
    pub async fn subscribed() -> Self {
        let harness = Self::start(RealtimeConfig::default());
        harness.handle.init_global().await.expect("init global");
        harness
    }
}

pub fn message(id: &str, thread: &str) -> Value {
    json!({"id": id, "thread_id": thread, "content": format!("body of {id}")})
}

pub fn insert(id: &str, thread: &str) -> RawChange {
    RawChange::insert(message(id, thread))
}

pub fn update(id: &str, thread: &str) -> RawChange {
    RawChange::update(message(id, thread), Some(json!({"id": id})))
}

pub fn delete(id: &str, thread: &str) -> RawChange {
    RawChange::delete(json!({"id": id, "thread_id": thread}))
}

/// Polls `check` on the (usually paused) clock until it holds.
pub async fn wait_until<F>(mut check: F)
where
    F: FnMut() -> bool,
{
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
