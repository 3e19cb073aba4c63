//! Rendering boundary. The controller only ever talks to a [`ViewSurface`];
//! [`DocumentView`] is the headless implementation the binary mirrors the
//! dashboard into.

use parking_lot::Mutex;
use scraper::{ElementRef, Html, Selector};
use tracing::warn;

use crate::model::{MessageId, ThreadId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Container {
    MessageList,
    ThreadView,
}

/// Every mutation returns `false` when its container or target element is
/// absent; callers treat that as a no-op, not an error.
pub trait ViewSurface: Send + Sync {
    fn is_mounted(&self, container: Container) -> bool;
    fn has_message(&self, message: &MessageId) -> bool;

    /// Replaces the preview for `thread` (inserting it if new) and moves it
    /// to the top of the list.
    fn upsert_thread_preview(&self, thread: &ThreadId, html: &str) -> bool;
    fn append_message(&self, message: &MessageId, html: &str) -> bool;
    fn replace_message(&self, message: &MessageId, html: &str) -> bool;
    fn remove_message(&self, message: &MessageId) -> bool;
    fn scroll_to_bottom(&self) -> bool;

    fn replace_thread_messages(&self, html: &str) -> bool;
    fn replace_message_list(&self, html: &str) -> bool;
}

/// How a container's top-level elements are keyed.
#[derive(Debug, Clone, Copy)]
enum Keying {
    Message,
    Preview,
}

const PREVIEW_PREFIX: &str = "thread-preview-";

impl Keying {
    fn selector(self) -> &'static str {
        match self {
            Keying::Message => "[data-message-id]",
            Keying::Preview => "[id^=\"thread-preview-\"]",
        }
    }

    fn key(self, element: &ElementRef<'_>) -> Option<String> {
        let value = element.value();
        let key = match self {
            Keying::Message => value.attr("data-message-id")?,
            Keying::Preview => value.attr("id")?.strip_prefix(PREVIEW_PREFIX)?,
        };
        (!key.is_empty()).then(|| key.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Element {
    key: String,
    html: String,
}

#[derive(Debug, Default)]
struct Pane {
    elements: Vec<Element>,
}

impl Pane {
    fn position(&self, key: &str) -> Option<usize> {
        self.elements.iter().position(|element| element.key == key)
    }

    fn keys(&self) -> Vec<String> {
        self.elements.iter().map(|element| element.key.clone()).collect()
    }

    fn render(&self) -> String {
        self.elements.iter().map(|element| element.html.as_str()).collect()
    }
}

#[derive(Debug, Default)]
struct Document {
    list: Option<Pane>,
    thread: Option<Pane>,
    scrolls: u64,
}

/// In-memory document holding the message list and thread view panes.
/// Fragments are split into keyed elements by their `data-message-id` and
/// `id="thread-preview-<id>"` attributes.
#[derive(Debug, Default)]
pub struct DocumentView {
    doc: Mutex<Document>,
}

impl DocumentView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Both containers mounted and empty.
    pub fn mounted() -> Self {
        let view = Self::new();
        view.mount(Container::MessageList);
        view.mount(Container::ThreadView);
        view
    }

    pub fn mount(&self, container: Container) {
        let mut doc = self.doc.lock();
        let pane = match container {
            Container::MessageList => &mut doc.list,
            Container::ThreadView => &mut doc.thread,
        };
        pane.get_or_insert_with(Pane::default);
    }

    pub fn unmount(&self, container: Container) {
        let mut doc = self.doc.lock();
        match container {
            Container::MessageList => doc.list = None,
            Container::ThreadView => doc.thread = None,
        }
    }

    /// Thread ids of the rendered previews, top first.
    pub fn preview_order(&self) -> Vec<String> {
        self.doc.lock().list.as_ref().map(Pane::keys).unwrap_or_default()
    }

    /// Message ids in the thread view, oldest first.
    pub fn message_order(&self) -> Vec<String> {
        self.doc.lock().thread.as_ref().map(Pane::keys).unwrap_or_default()
    }

    pub fn scroll_count(&self) -> u64 {
        self.doc.lock().scrolls
    }

    pub fn render(&self, container: Container) -> Option<String> {
        let doc = self.doc.lock();
        let pane = match container {
            Container::MessageList => doc.list.as_ref(),
            Container::ThreadView => doc.thread.as_ref(),
        };
        pane.map(Pane::render)
    }
}

impl ViewSurface for DocumentView {
    fn is_mounted(&self, container: Container) -> bool {
        let doc = self.doc.lock();
        match container {
            Container::MessageList => doc.list.is_some(),
            Container::ThreadView => doc.thread.is_some(),
        }
    }

    fn has_message(&self, message: &MessageId) -> bool {
        self.doc
            .lock()
            .thread
            .as_ref()
            .and_then(|pane| pane.position(message.as_str()))
            .is_some()
    }

    fn upsert_thread_preview(&self, thread: &ThreadId, html: &str) -> bool {
        let mut doc = self.doc.lock();
        let Some(list) = doc.list.as_mut() else {
            return false;
        };
        if let Some(index) = list.position(thread.as_str()) {
            list.elements.remove(index);
        }
        list.elements.insert(
            0,
            Element {
                key: thread.as_str().to_string(),
                html: html.to_string(),
            },
        );
        true
    }

    fn append_message(&self, message: &MessageId, html: &str) -> bool {
        let mut doc = self.doc.lock();
        let Some(pane) = doc.thread.as_mut() else {
            return false;
        };
        pane.elements.push(Element {
            key: message.as_str().to_string(),
            html: html.to_string(),
        });
        true
    }

    fn replace_message(&self, message: &MessageId, html: &str) -> bool {
        let mut doc = self.doc.lock();
        let Some(pane) = doc.thread.as_mut() else {
            return false;
        };
        match pane.position(message.as_str()) {
            Some(index) => {
                pane.elements[index].html = html.to_string();
                true
            }
            None => false,
        }
    }

    fn remove_message(&self, message: &MessageId) -> bool {
        let mut doc = self.doc.lock();
        let Some(pane) = doc.thread.as_mut() else {
            return false;
        };
        match pane.position(message.as_str()) {
            Some(index) => {
                pane.elements.remove(index);
                true
            }
            None => false,
        }
    }

    fn scroll_to_bottom(&self) -> bool {
        let mut doc = self.doc.lock();
        if doc.thread.is_none() {
            return false;
        }
        doc.scrolls += 1;
        true
    }

    fn replace_thread_messages(&self, html: &str) -> bool {
        let mut doc = self.doc.lock();
        let Some(pane) = doc.thread.as_mut() else {
            return false;
        };
        pane.elements = split_elements(html, Keying::Message);
        true
    }

    fn replace_message_list(&self, html: &str) -> bool {
        let mut doc = self.doc.lock();
        let Some(pane) = doc.list.as_mut() else {
            return false;
        };
        pane.elements = split_elements(html, Keying::Preview);
        true
    }
}

/// Splits a fragment into its outermost keyed elements. Keyed elements
/// nested inside another keyed element stay part of their parent; unkeyed
/// markup between them is dropped.
fn split_elements(html: &str, keying: Keying) -> Vec<Element> {
    let selector = match Selector::parse(keying.selector()) {
        Ok(selector) => selector,
        Err(err) => {
            warn!(target = "inbox.view", error = %err, "invalid element selector");
            return Vec::new();
        }
    };
    let fragment = Html::parse_fragment(html);
    let elements = fragment
        .select(&selector)
        .filter(|element| {
            !element
                .ancestors()
                .filter_map(ElementRef::wrap)
                .any(|parent| selector.matches(&parent))
        })
        .filter_map(|element| {
            Some(Element {
                key: keying.key(&element)?,
                html: element.html(),
            })
        })
        .collect();
    elements
}
