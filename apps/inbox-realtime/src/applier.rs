//! Turns view decisions into fetches and commits their results.
//!
//! `begin_*` methods return a [`PendingFetch`]: a boxed future the
//! controller owns and polls. Nothing is spawned here, so dropping the
//! future cancels the request. `commit` applies a finished fetch to the
//! view.

use std::sync::Arc;

use futures_util::future::{self, BoxFuture, FutureExt};
use tracing::{debug, warn};

use crate::fragments::{FetchError, Fragment, FragmentSource};
use crate::model::{Message, MessageId, ThreadId};
use crate::reconciler::ViewDecision;
use crate::session::Epoch;
use crate::view::{Container, ViewSurface};

/// Whether a fetch belongs to the open thread or to the aggregate list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Committed in issue order and dropped when the epoch moves on.
    Thread(Epoch),
    List,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewOp {
    UpsertPreview { thread: ThreadId },
    AppendMessage { message: MessageId },
    ReplaceMessage { message: MessageId },
    RemoveMessage { message: MessageId },
    ReplaceThread { thread: ThreadId },
    ReplaceList,
}

impl ViewOp {
    pub fn label(&self) -> &'static str {
        match self {
            ViewOp::UpsertPreview { .. } => "upsert_preview",
            ViewOp::AppendMessage { .. } => "append_message",
            ViewOp::ReplaceMessage { .. } => "replace_message",
            ViewOp::RemoveMessage { .. } => "remove_message",
            ViewOp::ReplaceThread { .. } => "replace_thread",
            ViewOp::ReplaceList => "replace_list",
        }
    }
}

/// Outcome of a fetch, carried back to the controller.
#[derive(Debug)]
pub struct Fetched {
    pub scope: Scope,
    pub op: ViewOp,
    /// `None` for operations that need no fragment.
    pub result: Result<Option<Fragment>, FetchError>,
}

pub struct PendingFetch {
    pub scope: Scope,
    pub future: BoxFuture<'static, Fetched>,
}

impl std::fmt::Debug for PendingFetch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingFetch")
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commit {
    Applied,
    /// Container or element missing.
    Skipped,
    Failed,
}

#[derive(Clone)]
pub struct ViewApplier {
    fragments: Arc<dyn FragmentSource>,
    view: Arc<dyn ViewSurface>,
}

impl ViewApplier {
    pub fn new(fragments: Arc<dyn FragmentSource>, view: Arc<dyn ViewSurface>) -> Self {
        Self { fragments, view }
    }

    /// Plans the fetch a decision needs. Returns `None` when the decision is
    /// an ignore or the target is not on screen.
    pub fn begin(&self, decision: ViewDecision, epoch: Epoch) -> Option<PendingFetch> {
        match decision {
            ViewDecision::RefreshPreview { thread } => self.begin_preview(thread),
            ViewDecision::AppendMessage { message } => self.begin_append(message, epoch),
            ViewDecision::ReplaceMessage { message } => self.begin_replace(message, epoch),
            ViewDecision::RemoveMessage { message } => self.begin_remove(message, epoch),
            ViewDecision::Ignore(_) => None,
        }
    }

    fn begin_preview(&self, thread: ThreadId) -> Option<PendingFetch> {
        if !self.view.is_mounted(Container::MessageList) {
            debug!(target = "inbox.view", thread = %thread, "message list not mounted, skipping preview refresh");
            return None;
        }
        let fragments = self.fragments.clone();
        let future = async move {
            let result = fragments.thread_preview(&thread).await.map(Some);
            Fetched {
                scope: Scope::List,
                op: ViewOp::UpsertPreview { thread },
                result,
            }
        };
        Some(PendingFetch {
            scope: Scope::List,
            future: future.boxed(),
        })
    }

    fn begin_append(&self, message: Message, epoch: Epoch) -> Option<PendingFetch> {
        if !self.view.is_mounted(Container::ThreadView) {
            debug!(target = "inbox.view", message = %message.id, "thread view not mounted, skipping append");
            return None;
        }
        let scope = Scope::Thread(epoch);
        let fragments = self.fragments.clone();
        let id = message.id;
        let future = async move {
            let result = fragments.message_bubble(&id).await.map(Some);
            Fetched {
                scope,
                op: ViewOp::AppendMessage { message: id },
                result,
            }
        };
        Some(PendingFetch {
            scope,
            future: future.boxed(),
        })
    }

    fn begin_replace(&self, message: Message, epoch: Epoch) -> Option<PendingFetch> {
        if !self.view.has_message(&message.id) {
            debug!(target = "inbox.view", message = %message.id, "message not rendered, skipping update");
            return None;
        }
        let scope = Scope::Thread(epoch);
        let fragments = self.fragments.clone();
        let id = message.id;
        let future = async move {
            let result = fragments.message_bubble(&id).await.map(Some);
            Fetched {
                scope,
                op: ViewOp::ReplaceMessage { message: id },
                result,
            }
        };
        Some(PendingFetch {
            scope,
            future: future.boxed(),
        })
    }

    /// Removal needs no fragment but still queues behind earlier thread
    /// fetches so an in-flight append cannot resurrect the message.
    fn begin_remove(&self, message: Message, epoch: Epoch) -> Option<PendingFetch> {
        if !self.view.is_mounted(Container::ThreadView) {
            return None;
        }
        let scope = Scope::Thread(epoch);
        let fetched = Fetched {
            scope,
            op: ViewOp::RemoveMessage {
                message: message.id,
            },
            result: Ok(None),
        };
        Some(PendingFetch {
            scope,
            future: future::ready(fetched).boxed(),
        })
    }

    /// Full reload of the open thread, used by the fallback poller.
    pub fn begin_thread_reload(&self, thread: ThreadId, epoch: Epoch) -> PendingFetch {
        let scope = Scope::Thread(epoch);
        let fragments = self.fragments.clone();
        let future = async move {
            let result = fragments.chat_messages(&thread).await.map(Some);
            Fetched {
                scope,
                op: ViewOp::ReplaceThread { thread },
                result,
            }
        };
        PendingFetch {
            scope,
            future: future.boxed(),
        }
    }

    /// Full reload of the message list, used by the fallback poller.
    pub fn begin_list_reload(&self) -> PendingFetch {
        let fragments = self.fragments.clone();
        let future = async move {
            let result = fragments.message_list().await.map(Some);
            Fetched {
                scope: Scope::List,
                op: ViewOp::ReplaceList,
                result,
            }
        };
        PendingFetch {
            scope: Scope::List,
            future: future.boxed(),
        }
    }

    pub fn commit(&self, fetched: Fetched) -> Commit {
        let Fetched { op, result, .. } = fetched;
        let fragment = match result {
            Ok(fragment) => fragment,
            Err(err) => {
                warn!(target = "inbox.view", op = op.label(), error = %err, "fragment fetch failed");
                return Commit::Failed;
            }
        };
        let html = fragment.as_ref().map(Fragment::html).unwrap_or_default();

        let applied = match &op {
            ViewOp::UpsertPreview { thread } => self.view.upsert_thread_preview(thread, html),
            ViewOp::AppendMessage { message } => {
                let appended = self.view.append_message(message, html);
                if appended {
                    self.view.scroll_to_bottom();
                }
                appended
            }
            ViewOp::ReplaceMessage { message } => self.view.replace_message(message, html),
            ViewOp::RemoveMessage { message } => self.view.remove_message(message),
            ViewOp::ReplaceThread { .. } => {
                let replaced = self.view.replace_thread_messages(html);
                if replaced {
                    self.view.scroll_to_bottom();
                }
                replaced
            }
            ViewOp::ReplaceList => self.view.replace_message_list(html),
        };

        if applied {
            debug!(target = "inbox.view", op = op.label(), "view updated");
            Commit::Applied
        } else {
            debug!(target = "inbox.view", op = op.label(), "view target missing, skipped");
            Commit::Skipped
        }
    }
}
