//! Multi-template subscription coordinator.

use crate::client::Inbound;
use crate::context::LedgerContext;
use crate::error::{ErrorInfo, LedgerError, Result};
use crate::types::{ConnectionStatus, StreamDescriptor, TemplateId};
use crate::view::MaterializedView;
use crossbeam_channel::{unbounded, Receiver, Select, Sender};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::controller::SubscriptionController;
use super::status::aggregate;
use super::types::{CoordinatorUpdate, ReloadHandle, Watchers};

/// Runs one [`SubscriptionController`] per template and merges their status.
///
/// Any change to the template mapping restarts every child. The aggregate
/// error is the first one encountered among the children currently failing,
/// not a list of all of them. Like the controller, one update is published
/// per call that changes state.
pub struct StreamCoordinator {
    ctx: LedgerContext,
    /// Resolved descriptors of the current (or last) mapping.
    descriptors: Option<BTreeMap<TemplateId, StreamDescriptor>>,
    children: BTreeMap<TemplateId, SubscriptionController>,
    running: bool,
    status: ConnectionStatus,
    first_error: Option<(TemplateId, ErrorInfo)>,
    control_tx: Sender<Inbound>,
    control_rx: Receiver<Inbound>,
    watchers: Watchers<CoordinatorUpdate>,
    dirty: bool,
}

impl StreamCoordinator {
    pub fn new(ctx: &LedgerContext) -> Self {
        let (control_tx, control_rx) = unbounded();
        Self {
            ctx: ctx.clone(),
            descriptors: None,
            children: BTreeMap::new(),
            running: false,
            status: ConnectionStatus::Initializing,
            first_error: None,
            control_tx,
            control_rx,
            watchers: Watchers::new(ctx.config().watcher_buffer),
            dirty: false,
        }
    }

    // --- Lifecycle ---

    /// Start one subscription per entry, replacing any running ones.
    pub fn start(&mut self, descriptors: BTreeMap<TemplateId, StreamDescriptor>) -> Result<()> {
        let resolved = self.resolve_all(&descriptors)?;
        self.restart(resolved);
        self.flush();
        Ok(())
    }

    /// Switch to a new mapping. No-op if it resolves to the running one.
    pub fn set_descriptors(
        &mut self,
        descriptors: BTreeMap<TemplateId, StreamDescriptor>,
    ) -> Result<()> {
        let resolved = self.resolve_all(&descriptors)?;
        if self.running && self.descriptors.as_ref() == Some(&resolved) {
            return Ok(());
        }
        self.restart(resolved);
        self.flush();
        Ok(())
    }

    /// Restart every child with the current mapping.
    pub fn reload(&mut self) -> Result<()> {
        let descriptors = self.descriptors.clone().ok_or(LedgerError::NotStarted)?;
        self.restart(descriptors);
        self.flush();
        Ok(())
    }

    /// Stop and drop every child, discarding queued reload requests. Idempotent.
    pub fn stop(&mut self) {
        let discarded = self.control_rx.try_iter().count();
        if discarded > 0 {
            debug!(discarded, "Discarded queued control messages on stop");
        }
        if !self.running && self.status == ConnectionStatus::Closed {
            return;
        }
        self.shutdown_children();
        self.running = false;
        debug!("Coordinator stopped");
        self.refresh(None);
        self.flush();
    }

    fn resolve_all(
        &self,
        descriptors: &BTreeMap<TemplateId, StreamDescriptor>,
    ) -> Result<BTreeMap<TemplateId, StreamDescriptor>> {
        descriptors
            .iter()
            .map(|(template_id, descriptor)| {
                if *template_id != descriptor.template_id {
                    return Err(LedgerError::InvalidDescriptor(format!(
                        "key {} does not match descriptor template {}",
                        template_id, descriptor.template_id
                    )));
                }
                Ok((template_id.clone(), self.ctx.resolve(descriptor)?))
            })
            .collect()
    }

    fn shutdown_children(&mut self) {
        for (_, mut child) in std::mem::take(&mut self.children) {
            child.stop();
        }
        self.first_error = None;
    }

    fn restart(&mut self, descriptors: BTreeMap<TemplateId, StreamDescriptor>) {
        self.shutdown_children();

        info!(templates = descriptors.len(), "Starting subscriptions");
        for (template_id, descriptor) in descriptors.iter() {
            let mut child = SubscriptionController::new(&self.ctx);
            // Already resolved, cannot be rejected
            if let Err(e) = child.start(descriptor.clone()) {
                debug!(template = %template_id, error = %e, "Child rejected descriptor");
                continue;
            }
            self.children.insert(template_id.clone(), child);
        }

        self.descriptors = Some(descriptors);
        self.running = true;
        self.refresh(None);
    }

    // --- Driving ---

    /// Apply everything queued for every child, then fire due reconnects.
    ///
    /// Returns the number of messages processed.
    pub fn drain(&mut self) -> usize {
        let mut processed = 0;

        while let Ok(message) = self.control_rx.try_recv() {
            processed += 1;
            if let Inbound::Reload = message {
                if !self.running {
                    debug!("Reload request while stopped ignored");
                    continue;
                }
                if let Err(e) = self.reload() {
                    debug!(error = %e, "Reload request ignored");
                }
            }
        }

        let templates: Vec<TemplateId> = self.children.keys().cloned().collect();
        for template_id in templates {
            loop {
                let message = match self.children.get(&template_id) {
                    Some(child) => match child.inbox().try_recv() {
                        Ok(message) => message,
                        Err(_) => break,
                    },
                    None => break,
                };
                processed += 1;

                let changed = self
                    .children
                    .get_mut(&template_id)
                    .map_or(false, |child| child.dispatch(message));
                if changed {
                    self.refresh(Some(&template_id));
                }
            }
        }

        self.tick(Instant::now());
        self.flush();
        processed
    }

    /// Wait up to `timeout` (or until the earliest reconnect deadline) for
    /// any child or control message, then drain.
    pub fn poll(&mut self, timeout: Duration) -> usize {
        let wait = match self.next_deadline() {
            Some(at) => at.saturating_duration_since(Instant::now()).min(timeout),
            None => timeout,
        };

        {
            let mut select = Select::new();
            select.recv(&self.control_rx);
            for child in self.children.values() {
                select.recv(child.inbox());
            }
            // Timing out just means nothing arrived
            let _ = select.ready_timeout(wait);
        }

        self.drain()
    }

    /// Fire every child reconnect due at or before `now`.
    pub fn tick(&mut self, now: Instant) -> bool {
        let templates: Vec<TemplateId> = self.children.keys().cloned().collect();
        let mut fired = false;
        for template_id in templates {
            let changed = self
                .children
                .get_mut(&template_id)
                .map_or(false, |child| child.tick(now));
            if changed {
                fired = true;
                self.refresh(Some(&template_id));
            }
        }
        self.flush();
        fired
    }

    /// Earliest pending reconnect deadline among the children.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.children
            .values()
            .filter_map(|child| child.next_deadline())
            .min()
    }

    /// Recompute the aggregate after a change and mark it for publishing.
    fn refresh(&mut self, trigger: Option<&TemplateId>) {
        self.status = if self.running {
            aggregate(self.children.values().map(|child| child.status()))
        } else {
            ConnectionStatus::Closed
        };

        let failing = |id: &TemplateId| {
            self.children
                .get(id)
                .map_or(false, |child| child.status() == ConnectionStatus::Error)
        };

        let recorded_still_failing = self
            .first_error
            .as_ref()
            .map_or(false, |(id, _)| failing(id));

        if !recorded_still_failing {
            let next = trigger
                .filter(|id| failing(*id))
                .or_else(|| self.children.keys().find(|id| failing(*id)));

            self.first_error = next.and_then(|id| {
                let error = self.children.get(id)?.error()?.clone();
                Some((id.clone(), error))
            });
        }

        self.dirty = true;
    }

    // --- Observation ---

    /// View of one template. Asking for a template that isn't subscribed
    /// is an error.
    pub fn view_for(&self, template_id: &TemplateId) -> Result<&MaterializedView> {
        self.children
            .get(template_id)
            .map(|child| child.view())
            .ok_or_else(|| LedgerError::UnknownTemplate(template_id.clone()))
    }

    /// Views of every template, in template order.
    pub fn views(&self) -> impl Iterator<Item = (&TemplateId, &MaterializedView)> + '_ {
        self.children.iter().map(|(id, child)| (id, child.view()))
    }

    /// Controller of one template.
    pub fn child(&self, template_id: &TemplateId) -> Option<&SubscriptionController> {
        self.children.get(template_id)
    }

    pub fn templates(&self) -> impl Iterator<Item = &TemplateId> + '_ {
        self.children.keys()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn is_loading(&self) -> bool {
        self.children.values().any(|child| child.is_loading())
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Live
    }

    /// First error encountered among the failing templates.
    pub fn error(&self) -> Option<&ErrorInfo> {
        self.first_error.as_ref().map(|(_, error)| error)
    }

    /// Template that produced [`error`](Self::error).
    pub fn error_template(&self) -> Option<&TemplateId> {
        self.first_error.as_ref().map(|(id, _)| id)
    }

    pub fn reload_handle(&self) -> ReloadHandle {
        ReloadHandle::new(self.control_tx.clone())
    }

    /// Current published state.
    pub fn snapshot(&self) -> CoordinatorUpdate {
        CoordinatorUpdate {
            views: self
                .views()
                .map(|(id, view)| (id.clone(), view.clone()))
                .collect(),
            status: self.status,
            loading: self.is_loading(),
            connected: self.is_connected(),
            error: self.error().cloned(),
            error_template: self.error_template().cloned(),
            reload: self.reload_handle(),
        }
    }

    /// Receive an update on every change, starting with the current state.
    pub fn watch(&mut self) -> Receiver<CoordinatorUpdate> {
        let current = self.snapshot();
        self.watchers.subscribe(current)
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
