//! Navigation glue between a [`DocumentView`] and the controller.
//!
//! The controller is told about a navigation before the thread pane is
//! touched, so nothing still in flight for the previous thread can land in
//! the pane of the next one.

use tracing::warn;

use crate::controller::{ControllerError, RealtimeHandle};
use crate::fragments::FragmentSource;
use crate::model::ThreadId;
use crate::view::{Container, DocumentView, ViewSurface};

/// Opens `thread`: switches the controller, remounts the thread pane and
/// loads its messages. A failed load leaves the pane empty until the next
/// poll or change.
pub async fn open_thread(
    handle: &RealtimeHandle,
    fragments: &dyn FragmentSource,
    view: &DocumentView,
    thread: &str,
) -> Result<(), ControllerError> {
    let thread = ThreadId::parse(thread).ok_or(ControllerError::EmptyThreadId)?;
    handle.switch_thread(thread.as_str()).await?;

    view.unmount(Container::ThreadView);
    view.mount(Container::ThreadView);
    match fragments.chat_messages(&thread).await {
        Ok(fragment) => {
            view.replace_thread_messages(fragment.html());
            view.scroll_to_bottom();
        }
        Err(err) => warn!(target = "inbox.view", thread = %thread, error = %err, "initial thread load failed"),
    }
    Ok(())
}

/// Back navigation.
pub async fn close_thread(handle: &RealtimeHandle, view: &DocumentView) -> Result<(), ControllerError> {
    handle.leave_thread().await?;
    view.unmount(Container::ThreadView);
    Ok(())
}

pub async fn load_message_list(fragments: &dyn FragmentSource, view: &DocumentView) {
    match fragments.message_list().await {
        Ok(fragment) => {
            view.replace_message_list(fragment.html());
        }
        Err(err) => warn!(target = "inbox.view", error = %err, "initial message list load failed"),
    }
}
