//! Decides which view mutation, if any, a validated change requires.
//!
//! Both entry points are pure: they look at the event and the current
//! session, and never touch the view or the network.

use crate::model::{ChangeEvent, Message, ThreadId};
use crate::session::SessionState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Thread-feed event for a thread other than the one being viewed.
    OtherThread,
    /// Thread-feed event while no thread is open.
    NoActiveThread,
    /// Global DELETE with the refresh policy disabled.
    DeleteNotTracked,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ViewDecision {
    RefreshPreview { thread: ThreadId },
    AppendMessage { message: Message },
    ReplaceMessage { message: Message },
    RemoveMessage { message: Message },
    Ignore(IgnoreReason),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GlobalPolicy {
    pub refresh_preview_on_delete: bool,
}

pub fn reconcile_global(event: &ChangeEvent, policy: GlobalPolicy) -> ViewDecision {
    match event {
        ChangeEvent::Insert { entity } | ChangeEvent::Update { entity, .. } => {
            ViewDecision::RefreshPreview {
                thread: entity.thread_id.clone(),
            }
        }
        ChangeEvent::Delete { entity } if policy.refresh_preview_on_delete => {
            ViewDecision::RefreshPreview {
                thread: entity.thread_id.clone(),
            }
        }
        ChangeEvent::Delete { .. } => ViewDecision::Ignore(IgnoreReason::DeleteNotTracked),
    }
}

pub fn reconcile_thread(event: &ChangeEvent, session: &SessionState) -> ViewDecision {
    if session.active_thread().is_none() {
        return ViewDecision::Ignore(IgnoreReason::NoActiveThread);
    }
    if !session.is_viewing(event.thread_id()) {
        return ViewDecision::Ignore(IgnoreReason::OtherThread);
    }

    match event {
        ChangeEvent::Insert { entity } => ViewDecision::AppendMessage {
            message: entity.clone(),
        },
        ChangeEvent::Update { entity, .. } => ViewDecision::ReplaceMessage {
            message: entity.clone(),
        },
        ChangeEvent::Delete { entity } => ViewDecision::RemoveMessage {
            message: entity.clone(),
        },
    }
}
