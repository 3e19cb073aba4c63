use std::fmt;

use serde::Serialize;

use crate::model::ThreadId;

/// Monotonic counter stamped onto thread-scoped work. Results carrying an
/// older epoch are discarded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Epoch(u64);

impl Epoch {
    pub fn value(self) -> u64 {
        self.0
    }

    fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What the viewer is looking at. Owned by exactly one controller.
#[derive(Debug, Default)]
pub struct SessionState {
    active_thread: Option<ThreadId>,
    epoch: Epoch,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_thread(&self) -> Option<&ThreadId> {
        self.active_thread.as_ref()
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn is_viewing(&self, thread: &ThreadId) -> bool {
        self.active_thread.as_ref() == Some(thread)
    }

    pub fn is_current(&self, epoch: Epoch) -> bool {
        self.epoch == epoch
    }

    pub fn enter(&mut self, thread: ThreadId) -> Epoch {
        self.active_thread = Some(thread);
        self.advance()
    }

    pub fn clear(&mut self) -> Epoch {
        self.active_thread = None;
        self.advance()
    }

    fn advance(&mut self) -> Epoch {
        self.epoch = self.epoch.next();
        self.epoch
    }
}
