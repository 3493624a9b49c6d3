//! In-process ledger for demos and tests.
//!
//! Keeps active contracts and a journal in memory, serves streams and
//! one-shot queries through [`LedgerClient`], and can inject setup and
//! stream failures on demand.

use crate::client::{EventSink, LedgerClient, StreamHandle};
use crate::error::{LedgerError, Result};
use crate::types::{Contract, ContractId, Offset, Party, StartOffset, StreamDescriptor, TemplateId};
use crate::view::MaterializedView;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// A journal entry.
#[derive(Clone, Debug)]
enum Change {
    Created(Contract),
    Archived(Contract),
}

/// Internal stream state.
struct StreamSlot {
    descriptor: StreamDescriptor,
    sink: EventSink,
    started: bool,
    /// Failed or closed from the ledger side; no further deliveries.
    dead: bool,
}

impl StreamSlot {
    fn deliverable(&self) -> bool {
        self.started && !self.dead
    }
}

#[derive(Default)]
struct LedgerState {
    active: MaterializedView,
    journal: Vec<(Offset, Change)>,
    head: Offset,
    streams: BTreeMap<u64, StreamSlot>,
    next_stream: u64,
    open_count: usize,
    failing_opens: usize,
    failing_queries: usize,
}

impl LedgerState {
    /// Push a change to every live stream that can see it.
    fn publish(&mut self, change: &Change) {
        let mut gone = Vec::new();
        for (id, slot) in self.streams.iter() {
            if !slot.deliverable() {
                continue;
            }
            let delivered = match change {
                Change::Created(contract) if visible(&slot.descriptor, contract) => {
                    slot.sink.created(shape(&slot.descriptor, contract))
                }
                Change::Archived(contract) if visible(&slot.descriptor, contract) => {
                    slot.sink.archived(contract.contract_id.clone())
                }
                _ => true,
            };
            if !delivered {
                gone.push(*id);
            }
        }
        for id in gone {
            debug!(stream = id, "Stream owner gone, dropping slot");
            self.streams.remove(&id);
        }
    }
}

/// Whether a stream described by `descriptor` sees `contract`.
fn visible(descriptor: &StreamDescriptor, contract: &Contract) -> bool {
    if contract.template_id != descriptor.template_id {
        return false;
    }

    if let Some(parties) = &descriptor.acting_parties {
        if !contract.stakeholders().any(|p| parties.contains(p)) {
            return false;
        }
    }

    match &descriptor.query {
        Some(query) => matches_query(query, &contract.payload),
        None => true,
    }
}

/// Strip what the descriptor did not ask for.
fn shape(descriptor: &StreamDescriptor, contract: &Contract) -> Contract {
    let mut contract = contract.clone();
    if !descriptor.include_created_event_blob {
        contract.created_event_blob = None;
    }
    contract
}

/// Field-equality match of a query against a payload, recursive for objects.
pub fn matches_query(query: &serde_json::Value, payload: &serde_json::Value) -> bool {
    match (query, payload) {
        (serde_json::Value::Object(fields), serde_json::Value::Object(values)) => {
            fields.iter().all(|(name, expected)| {
                values
                    .get(name)
                    .map_or(false, |actual| matches_query(expected, actual))
            })
        }
        (serde_json::Value::Object(_), _) => false,
        _ => query == payload,
    }
}

/// In-memory ledger.
#[derive(Clone, Default)]
pub struct InMemoryLedger {
    state: Arc<Mutex<LedgerState>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a contract signed by `signatories`.
    pub fn create(
        &self,
        template_id: impl Into<TemplateId>,
        payload: serde_json::Value,
        signatories: Vec<Party>,
    ) -> Contract {
        self.create_with_observers(template_id, payload, signatories, Vec::new())
    }

    /// Create a contract with signatories and observers.
    pub fn create_with_observers(
        &self,
        template_id: impl Into<TemplateId>,
        payload: serde_json::Value,
        signatories: Vec<Party>,
        observers: Vec<Party>,
    ) -> Contract {
        let mut state = self.state.lock();
        let offset = state.head.next();
        state.head = offset;

        let mut contract = Contract::new(format!("#{}:0", offset.0), template_id, payload)
            .with_signatories(signatories)
            .with_observers(observers);
        contract.created_event_blob = Some(contract.payload.to_string());

        let change = Change::Created(contract.clone());
        state.active.upsert(contract.clone());
        state.publish(&change);
        state.journal.push((offset, change));

        contract
    }

    /// Archive an active contract.
    pub fn archive(&self, id: &ContractId) -> Result<Contract> {
        let mut state = self.state.lock();
        let contract = state
            .active
            .remove(id)
            .ok_or_else(|| LedgerError::ContractNotFound(id.to_string()))?;

        let offset = state.head.next();
        state.head = offset;

        let change = Change::Archived(contract.clone());
        state.publish(&change);
        state.journal.push((offset, change));

        Ok(contract)
    }

    /// Current ledger end.
    pub fn head(&self) -> Offset {
        self.state.lock().head
    }

    /// Make the next `n` calls to `open_stream` fail.
    pub fn fail_next_opens(&self, n: usize) {
        self.state.lock().failing_opens = n;
    }

    /// Make the next `n` one-shot queries fail.
    pub fn fail_next_queries(&self, n: usize) {
        self.state.lock().failing_queries = n;
    }

    /// Report a failure on every started stream.
    pub fn fail_streams(&self, message: &str) {
        let mut state = self.state.lock();
        for slot in state.streams.values_mut().filter(|s| s.deliverable()) {
            slot.sink.failed(message);
            slot.dead = true;
        }
    }

    /// Close every started stream from the ledger side.
    pub fn close_streams(&self) {
        let mut state = self.state.lock();
        for slot in state.streams.values_mut().filter(|s| s.deliverable()) {
            slot.sink.closed();
            slot.dead = true;
        }
    }

    /// Total number of `open_stream` calls, failed ones included.
    pub fn open_count(&self) -> usize {
        self.state.lock().open_count
    }

    /// Streams opened and not yet closed by their owner.
    pub fn active_streams(&self) -> usize {
        self.state.lock().streams.len()
    }
}

impl LedgerClient for InMemoryLedger {
    fn open_stream(
        &self,
        descriptor: &StreamDescriptor,
        sink: EventSink,
    ) -> Result<Box<dyn StreamHandle>> {
        let mut state = self.state.lock();
        state.open_count += 1;

        if state.failing_opens > 0 {
            state.failing_opens -= 1;
            return Err(LedgerError::StreamOpen(format!(
                "ledger unavailable for {}",
                descriptor.template_id
            )));
        }

        let id = state.next_stream;
        state.next_stream += 1;
        state.streams.insert(
            id,
            StreamSlot {
                descriptor: descriptor.clone(),
                sink,
                started: false,
                dead: false,
            },
        );
        debug!(stream = id, template = %descriptor.template_id, "Stream opened");

        Ok(Box::new(MemoryStream {
            id,
            state: Arc::clone(&self.state),
        }))
    }

    fn query(&self, descriptor: &StreamDescriptor) -> Result<Vec<Contract>> {
        let mut state = self.state.lock();
        if state.failing_queries > 0 {
            state.failing_queries -= 1;
            return Err(LedgerError::Query(format!(
                "active contracts of {} unavailable",
                descriptor.template_id
            )));
        }
        Ok(state
            .active
            .iter()
            .filter(|c| visible(descriptor, c))
            .map(|c| shape(descriptor, c))
            .collect())
    }
}

/// Stream handle served by [`InMemoryLedger`].
struct MemoryStream {
    id: u64,
    state: Arc<Mutex<LedgerState>>,
}

impl StreamHandle for MemoryStream {
    fn start(&mut self) -> Result<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let slot = state
            .streams
            .get_mut(&self.id)
            .ok_or_else(|| LedgerError::StreamOpen("stream already closed".to_string()))?;
        if slot.started {
            return Ok(());
        }
        slot.started = true;

        match slot.descriptor.begin {
            StartOffset::End => {
                for contract in state.active.iter() {
                    if visible(&slot.descriptor, contract) {
                        slot.sink.created(shape(&slot.descriptor, contract));
                    }
                }
            }
            StartOffset::At(from) => {
                for (offset, change) in state.journal.iter() {
                    if *offset <= from {
                        continue;
                    }
                    match change {
                        Change::Created(c) if visible(&slot.descriptor, c) => {
                            slot.sink.created(shape(&slot.descriptor, c));
                        }
                        Change::Archived(c) if visible(&slot.descriptor, c) => {
                            slot.sink.archived(c.contract_id.clone());
                        }
                        _ => {}
                    }
                }
            }
        }

        slot.sink.live();
        Ok(())
    }

    fn close(&mut self) {
        if self.state.lock().streams.remove(&self.id).is_some() {
            debug!(stream = self.id, "Stream closed");
        }
    }
}

impl Drop for MemoryStream {
    fn drop(&mut self) {
        self.close();
    }
}
