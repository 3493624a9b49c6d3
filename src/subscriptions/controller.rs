//! Single-template subscription controller.

use crate::client::{Envelope, EventSink, Inbound, StreamEvent, StreamHandle, StreamStatus};
use crate::context::LedgerContext;
use crate::error::{ErrorInfo, LedgerError, Result};
use crate::types::{ConnectionStatus, Generation, StreamDescriptor, TemplateId};
use crate::view::MaterializedView;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::types::{ReloadHandle, SubscriptionUpdate, Watchers};

/// Owns one stream handle and the view built from it.
///
/// The controller is driven by its owner: events pushed by the handle are
/// queued in an inbox and applied by [`drain`](Self::drain) or
/// [`poll`](Self::poll), which also fire a pending reconnect once its
/// deadline has passed. All state changes happen on the owner's thread.
///
/// Each handle is opened with a sink tagged by the current [`Generation`].
/// Envelopes carrying any other generation, or arriving while no handle is
/// owned, are discarded.
///
/// Watchers receive at most one update per call that changes state: a
/// burst of events applied by one [`drain`](Self::drain) is published once.
pub struct SubscriptionController {
    ctx: LedgerContext,
    /// Resolved descriptor of the current (or last) subscription.
    descriptor: Option<StreamDescriptor>,
    generation: Generation,
    handle: Option<Box<dyn StreamHandle>>,
    view: MaterializedView,
    status: ConnectionStatus,
    loading: bool,
    error: Option<ErrorInfo>,
    /// Deadline of the pending reconnect, if any.
    reconnect_at: Option<Instant>,
    inbox_tx: Sender<Inbound>,
    inbox_rx: Receiver<Inbound>,
    watchers: Watchers<SubscriptionUpdate>,
    /// State changed since the last update was published.
    dirty: bool,
}

impl SubscriptionController {
    /// Create an idle controller.
    pub fn new(ctx: &LedgerContext) -> Self {
        let (inbox_tx, inbox_rx) = unbounded();
        Self {
            ctx: ctx.clone(),
            descriptor: None,
            generation: Generation::default(),
            handle: None,
            view: MaterializedView::new(),
            status: ConnectionStatus::Initializing,
            loading: false,
            error: None,
            reconnect_at: None,
            inbox_tx,
            inbox_rx,
            watchers: Watchers::new(ctx.config().watcher_buffer),
            dirty: false,
        }
    }

    // --- Lifecycle ---

    /// Start streaming `descriptor`, replacing any running subscription.
    ///
    /// Only descriptor misuse is returned as an error. Setup failures are
    /// reported through the status and retried.
    pub fn start(&mut self, descriptor: StreamDescriptor) -> Result<()> {
        let resolved = self.ctx.resolve(&descriptor)?;
        self.teardown();
        self.descriptor = Some(resolved);
        self.error = None;
        self.connect();
        self.flush();
        Ok(())
    }

    /// Close the handle, cancel any pending reconnect and discard queued
    /// messages, reload requests included. Idempotent.
    pub fn stop(&mut self) {
        let released = self.teardown();
        let discarded = self.inbox_rx.try_iter().count();
        if discarded > 0 {
            debug!(template = ?self.template_id(), discarded, "Discarded queued messages on stop");
        }
        if self.status == ConnectionStatus::Closed && !released {
            return;
        }

        debug!(template = ?self.template_id(), generation = %self.generation, "Subscription stopped");
        self.status = ConnectionStatus::Closed;
        self.loading = false;
        self.mark_changed();
        self.flush();
    }

    /// Restart with the same descriptor and an empty view.
    pub fn reload(&mut self) -> Result<()> {
        if self.descriptor.is_none() {
            return Err(LedgerError::NotStarted);
        }
        self.teardown();
        self.error = None;
        self.connect();
        self.flush();
        Ok(())
    }

    /// Switch to a new descriptor. No-op if it resolves to the running one.
    pub fn set_descriptor(&mut self, descriptor: StreamDescriptor) -> Result<()> {
        let resolved = self.ctx.resolve(&descriptor)?;
        if self.is_running() && self.descriptor.as_ref() == Some(&resolved) {
            return Ok(());
        }
        self.teardown();
        self.descriptor = Some(resolved);
        self.error = None;
        self.connect();
        self.flush();
        Ok(())
    }

    /// Release the handle and the pending reconnect. Returns true if either existed.
    fn teardown(&mut self) -> bool {
        let mut released = false;
        if let Some(mut handle) = self.handle.take() {
            handle.close();
            released = true;
        }
        if self.reconnect_at.take().is_some() {
            released = true;
        }
        released
    }

    /// Open a fresh handle under a new generation.
    fn connect(&mut self) {
        let descriptor = match self.descriptor.clone() {
            Some(d) => d,
            None => return,
        };

        self.generation = self.generation.next();
        self.view = MaterializedView::new();
        self.status = ConnectionStatus::Connecting;
        self.loading = true;
        debug!(template = %descriptor.template_id, generation = %self.generation, "Opening stream");
        self.mark_changed();

        let sink = EventSink::new(self.generation, self.inbox_tx.clone());
        let opened = self
            .ctx
            .client()
            .open_stream(&descriptor, sink)
            .and_then(|mut handle| match handle.start() {
                Ok(()) => Ok(handle),
                Err(e) => {
                    handle.close();
                    Err(e)
                }
            });

        match opened {
            Ok(handle) => self.handle = Some(handle),
            Err(e) => self.fail(ErrorInfo::from(&e)),
        }
    }

    /// Drop the handle, record the error and schedule one reconnect.
    fn fail(&mut self, error: ErrorInfo) {
        if let Some(mut handle) = self.handle.take() {
            handle.close();
        }

        let delay = self.ctx.config().reconnect_delay();
        warn!(
            template = ?self.template_id(),
            generation = %self.generation,
            error = %error,
            delay_ms = delay.as_millis() as u64,
            "Subscription failed, reconnect scheduled"
        );

        self.status = ConnectionStatus::Error;
        self.loading = false;
        self.error = Some(error);
        self.reconnect_at = Some(Instant::now() + delay);
        self.mark_changed();
    }

    // --- Event Application ---

    /// Handle one inbox message. Returns true if the state changed.
    ///
    /// Reload requests are ignored once the controller has been stopped.
    pub(crate) fn dispatch(&mut self, message: Inbound) -> bool {
        match message {
            Inbound::Stream(envelope) => self.apply(envelope),
            Inbound::Reload if self.status == ConnectionStatus::Closed => {
                debug!(template = ?self.template_id(), "Reload request after stop ignored");
                false
            }
            Inbound::Reload => match self.reload() {
                Ok(()) => true,
                Err(e) => {
                    debug!(error = %e, "Reload request ignored");
                    false
                }
            },
        }
    }

    /// Apply a tagged stream event. Stale envelopes are discarded.
    fn apply(&mut self, envelope: Envelope) -> bool {
        if envelope.generation != self.generation || self.handle.is_none() {
            debug!(
                template = ?self.template_id(),
                stale = %envelope.generation,
                current = %self.generation,
                "Discarding stale stream event"
            );
            return false;
        }

        match envelope.event {
            StreamEvent::Status(StreamStatus::Live) => {
                if self.status == ConnectionStatus::Live {
                    return false;
                }
                info!(
                    template = ?self.template_id(),
                    generation = %self.generation,
                    contracts = self.view.len(),
                    "Subscription live"
                );
                self.status = ConnectionStatus::Live;
                self.loading = false;
                self.error = None;
            }
            StreamEvent::Status(StreamStatus::Connecting) => {
                if self.status == ConnectionStatus::Connecting {
                    return false;
                }
                self.status = ConnectionStatus::Connecting;
            }
            StreamEvent::Failed(message) => {
                let error = if self.status == ConnectionStatus::Live {
                    ErrorInfo::stream(message)
                } else {
                    ErrorInfo::setup(message)
                };
                self.fail(error);
                return true;
            }
            StreamEvent::Closed => {
                self.fail(ErrorInfo::closed());
                return true;
            }
            event => {
                let applied = event
                    .into_change()
                    .map_or(false, |change| self.view.apply(change));
                if !applied {
                    return false;
                }
            }
        }

        self.mark_changed();
        true
    }

    // --- Driving ---

    /// Apply everything queued, then fire a due reconnect. Never blocks.
    ///
    /// Returns the number of inbox messages processed.
    pub fn drain(&mut self) -> usize {
        let mut processed = 0;
        while let Ok(message) = self.inbox_rx.try_recv() {
            self.dispatch(message);
            processed += 1;
        }
        self.tick(Instant::now());
        self.flush();
        processed
    }

    /// Wait up to `timeout` (or until the reconnect deadline) for a message,
    /// then drain.
    pub fn poll(&mut self, timeout: Duration) -> usize {
        let wait = match self.reconnect_at {
            Some(at) => at.saturating_duration_since(Instant::now()).min(timeout),
            None => timeout,
        };

        let mut processed = 0;
        if let Ok(message) = self.inbox_rx.recv_timeout(wait) {
            self.dispatch(message);
            processed += 1;
        }
        processed + self.drain()
    }

    /// Fire the pending reconnect if its deadline is at or before `now`.
    pub fn tick(&mut self, now: Instant) -> bool {
        match self.reconnect_at {
            Some(at) if at <= now => {
                self.reconnect_at = None;
                info!(template = ?self.template_id(), "Reconnecting subscription");
                self.connect();
                self.flush();
                true
            }
            _ => false,
        }
    }

    /// Deadline of the pending reconnect.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.reconnect_at
    }

    pub(crate) fn inbox(&self) -> &Receiver<Inbound> {
        &self.inbox_rx
    }

    // --- Observation ---

    pub fn view(&self) -> &MaterializedView {
        &self.view
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Live
    }

    pub fn error(&self) -> Option<&ErrorInfo> {
        self.error.as_ref()
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn descriptor(&self) -> Option<&StreamDescriptor> {
        self.descriptor.as_ref()
    }

    pub fn template_id(&self) -> Option<&TemplateId> {
        self.descriptor.as_ref().map(|d| &d.template_id)
    }

    fn is_running(&self) -> bool {
        matches!(
            self.status,
            ConnectionStatus::Connecting | ConnectionStatus::Live | ConnectionStatus::Error
        )
    }

    /// Handle for requesting a reload from another thread.
    pub fn reload_handle(&self) -> ReloadHandle {
        ReloadHandle::new(self.inbox_tx.clone())
    }

    /// Current published state.
    pub fn snapshot(&self) -> SubscriptionUpdate {
        SubscriptionUpdate {
            template_id: self.template_id().cloned(),
            view: self.view.clone(),
            status: self.status,
            loading: self.loading,
            connected: self.is_connected(),
            error: self.error.clone(),
            generation: self.generation,
            reload: self.reload_handle(),
        }
    }

    /// Receive an update on every change, starting with the current state.
    pub fn watch(&mut self) -> Receiver<SubscriptionUpdate> {
        let current = self.snapshot();
        self.watchers.subscribe(current)
    }

    fn mark_changed(&mut self) {
        self.dirty = true;
    }

    /// Publish the current state if it changed since the last update.
    fn flush(&mut self) {
        if !std::mem::take(&mut self.dirty) || self.watchers.is_empty() {
            return;
        }
        let update = self.snapshot();
        self.watchers.publish(update);
    }
}

impl Drop for SubscriptionController {
    fn drop(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            handle.close();
        }
    }
}
