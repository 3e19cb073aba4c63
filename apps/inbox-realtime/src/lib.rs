//! Realtime synchronization for the inbox dashboard.
//!
//! A [`controller::RealtimeController`] keeps two push subscriptions alive
//! (every message change, and the changes of the open thread), turns each
//! change into the smallest view update it requires, and falls back to
//! periodic full reloads while the push channel is down.

pub mod applier;
pub mod config;
pub mod controller;
pub mod fragments;
pub mod model;
pub mod navigation;
pub mod poller;
pub mod reconciler;
pub mod session;
pub mod telemetry;
pub mod view;

pub use config::RealtimeConfig;
pub use controller::{
    ControllerError, ControllerSnapshot, HandleState, RealtimeController, RealtimeHandle,
};
pub use fragments::{FetchError, Fragment, FragmentSource, HttpFragmentSource};
pub use model::{ChangeEvent, EventError, Message, MessageId, ThreadId};
pub use view::{Container, DocumentView, ViewSurface};
