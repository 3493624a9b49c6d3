//! The ledger client seam.
//!
//! Connection management, authentication and offset handling live behind
//! [`LedgerClient`]. A subscription hands the client an [`EventSink`] when it
//! opens a stream; the returned [`StreamHandle`] pushes events into that sink
//! from whatever thread it likes until it is closed.

use crate::error::Result;
use crate::types::{Contract, ContractId, Generation, StreamDescriptor};
use crate::view::ViewChange;
use crossbeam_channel::Sender;

/// Stream lifecycle signal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamStatus {
    /// The handle lost its connection and is re-establishing it.
    Connecting,
    /// Initial snapshot delivered, further events are incremental.
    Live,
}

/// Events emitted by a stream handle.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    /// A contract became visible.
    Created(Contract),
    /// A contract was archived.
    Archived(ContractId),
    /// Lifecycle signal.
    Status(StreamStatus),
    /// Terminal error on the handle.
    Failed(String),
    /// The handle closed.
    Closed,
}

impl StreamEvent {
    /// The view change carried by this event, if any.
    pub fn into_change(self) -> Option<ViewChange> {
        match self {
            StreamEvent::Created(contract) => Some(ViewChange::Added(contract)),
            StreamEvent::Archived(id) => Some(ViewChange::Removed(id)),
            _ => None,
        }
    }
}

/// A stream event tagged with the generation of the handle that produced it.
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    pub generation: Generation,
    pub event: StreamEvent,
}

/// Messages delivered to a subscription's inbox.
#[derive(Clone, Debug)]
pub enum Inbound {
    Stream(Envelope),
    Reload,
}

/// Where a stream handle delivers its events.
///
/// Every event is tagged with the generation the sink was created for, so
/// the owner can drop events from handles it has already replaced.
#[derive(Clone, Debug)]
pub struct EventSink {
    generation: Generation,
    sender: Sender<Inbound>,
}

impl EventSink {
    pub fn new(generation: Generation, sender: Sender<Inbound>) -> Self {
        Self { generation, sender }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Deliver an event. Returns false if the owner is gone.
    pub fn send(&self, event: StreamEvent) -> bool {
        self.sender
            .send(Inbound::Stream(Envelope {
                generation: self.generation,
                event,
            }))
            .is_ok()
    }

    pub fn created(&self, contract: Contract) -> bool {
        self.send(StreamEvent::Created(contract))
    }

    pub fn archived(&self, id: ContractId) -> bool {
        self.send(StreamEvent::Archived(id))
    }

    pub fn status(&self, status: StreamStatus) -> bool {
        self.send(StreamEvent::Status(status))
    }

    pub fn live(&self) -> bool {
        self.status(StreamStatus::Live)
    }

    pub fn failed(&self, message: impl Into<String>) -> bool {
        self.send(StreamEvent::Failed(message.into()))
    }

    pub fn closed(&self) -> bool {
        self.send(StreamEvent::Closed)
    }
}

/// A live stream opened by a [`LedgerClient`].
pub trait StreamHandle: Send {
    /// Begin delivering events.
    fn start(&mut self) -> Result<()>;

    /// Stop delivering events and release the connection. Idempotent.
    fn close(&mut self);
}

/// The ledger client collaborator.
pub trait LedgerClient: Send + Sync {
    /// Open a stream for a resolved descriptor. Events go to `sink`.
    fn open_stream(
        &self,
        descriptor: &StreamDescriptor,
        sink: EventSink,
    ) -> Result<Box<dyn StreamHandle>>;

    /// One-shot query of the active contracts matching a descriptor.
    fn query(&self, descriptor: &StreamDescriptor) -> Result<Vec<Contract>>;
}
