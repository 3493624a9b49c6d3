//! Subscription types published to consumers.

use crate::client::Inbound;
use crate::error::ErrorInfo;
use crate::types::{ConnectionStatus, Generation, TemplateId};
use crate::view::MaterializedView;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Requests a reload from any thread.
///
/// The reload is carried out by the owner the next time it drains its inbox.
#[derive(Clone, Debug)]
pub struct ReloadHandle {
    sender: Sender<Inbound>,
}

impl ReloadHandle {
    pub(crate) fn new(sender: Sender<Inbound>) -> Self {
        Self { sender }
    }

    /// Request a reload. Returns false if the owner is gone.
    pub fn reload(&self) -> bool {
        self.sender.send(Inbound::Reload).is_ok()
    }
}

/// State of a single-template subscription, published on every change.
#[derive(Clone, Debug)]
pub struct SubscriptionUpdate {
    /// Template of the current descriptor (None before the first start).
    pub template_id: Option<TemplateId>,
    pub view: MaterializedView,
    pub status: ConnectionStatus,
    /// True until the initial snapshot of the current handle has loaded.
    pub loading: bool,
    /// True while the stream is live.
    pub connected: bool,
    pub error: Option<ErrorInfo>,
    pub generation: Generation,
    pub reload: ReloadHandle,
}

/// State of a multi-template subscription, published on every change.
#[derive(Clone, Debug)]
pub struct CoordinatorUpdate {
    pub views: BTreeMap<TemplateId, MaterializedView>,
    pub status: ConnectionStatus,
    pub loading: bool,
    pub connected: bool,
    /// First error encountered among the templates currently failing.
    pub error: Option<ErrorInfo>,
    /// Template that produced `error`.
    pub error_template: Option<TemplateId>,
    pub reload: ReloadHandle,
}

/// Bounded fan-out to watchers. Watchers that fall behind are dropped.
pub(crate) struct Watchers<T> {
    senders: Vec<Sender<T>>,
    buffer: usize,
}

impl<T: Clone> Watchers<T> {
    pub(crate) fn new(buffer: usize) -> Self {
        Self {
            senders: Vec::new(),
            buffer,
        }
    }

    /// Add a watcher, primed with the current state.
    pub(crate) fn subscribe(&mut self, current: T) -> Receiver<T> {
        let (sender, receiver) = bounded(self.buffer);
        // Fresh channel with capacity >= 1, cannot be full
        let _ = sender.try_send(current);
        self.senders.push(sender);
        receiver
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.senders.len()
    }

    /// Send an update to every watcher, dropping the ones that can't take it.
    pub(crate) fn publish(&mut self, update: T) {
        self.senders.retain(|sender| match sender.try_send(update.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("Watcher buffer full, dropping watcher");
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!("Watcher disconnected");
                false
            }
        });
    }
}
