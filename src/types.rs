//! Core types for ledger subscriptions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a contract template (the entity kind a subscription selects).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TemplateId(pub String);

impl TemplateId {
    pub fn new(id: impl Into<String>) -> Self {
        TemplateId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TemplateId({})", self.0)
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TemplateId {
    fn from(s: &str) -> Self {
        TemplateId(s.to_string())
    }
}

/// Stable, opaque identity of a contract.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContractId(pub String);

impl ContractId {
    pub fn new(id: impl Into<String>) -> Self {
        ContractId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ContractId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContractId({})", self.0)
    }
}

impl fmt::Display for ContractId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContractId {
    fn from(s: &str) -> Self {
        ContractId(s.to_string())
    }
}

/// A ledger party.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Party(pub String);

impl Party {
    pub fn new(id: impl Into<String>) -> Self {
        Party(id.into())
    }
}

impl fmt::Debug for Party {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Party({})", self.0)
    }
}

impl fmt::Display for Party {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Party {
    fn from(s: &str) -> Self {
        Party(s.to_string())
    }
}

/// Position in the ledger's transaction stream.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Offset(pub u64);

impl fmt::Debug for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Offset({})", self.0)
    }
}

impl Offset {
    pub fn next(self) -> Self {
        Offset(self.0 + 1)
    }
}

/// Where a stream starts reading.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StartOffset {
    /// Current active contracts, then live changes.
    #[default]
    End,
    /// Changes strictly after the given offset, then live changes.
    At(Offset),
}

/// A single active contract as seen by a subscription.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    pub contract_id: ContractId,
    pub template_id: TemplateId,
    pub payload: serde_json::Value,
    pub signatories: Vec<Party>,
    #[serde(default)]
    pub observers: Vec<Party>,
    /// Opaque created-event blob, present only when the subscription asked
    /// for the full payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_event_blob: Option<String>,
}

impl Contract {
    pub fn new(
        contract_id: impl Into<ContractId>,
        template_id: impl Into<TemplateId>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            contract_id: contract_id.into(),
            template_id: template_id.into(),
            payload,
            signatories: Vec::new(),
            observers: Vec::new(),
            created_event_blob: None,
        }
    }

    pub fn with_signatories(mut self, parties: Vec<Party>) -> Self {
        self.signatories = parties;
        self
    }

    pub fn with_observers(mut self, parties: Vec<Party>) -> Self {
        self.observers = parties;
        self
    }

    /// Signatories followed by observers.
    pub fn stakeholders(&self) -> impl Iterator<Item = &Party> {
        self.signatories.iter().chain(self.observers.iter())
    }
}

/// Parameters defining one subscription's scope and starting point.
///
/// Immutable for the lifetime of a subscription. Changing any field means
/// tearing the subscription down and opening a new one.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub template_id: TemplateId,

    #[serde(default)]
    pub begin: StartOffset,

    /// Ask the ledger for the full created-event payload.
    #[serde(default)]
    pub include_created_event_blob: bool,

    /// Parties to read as (None = every party of the session).
    #[serde(default)]
    pub acting_parties: Option<Vec<Party>>,

    /// Field-equality filter on the contract payload (None = all contracts).
    #[serde(default)]
    pub query: Option<serde_json::Value>,
}

impl StreamDescriptor {
    /// Subscribe to a template with default options.
    pub fn new(template_id: impl Into<TemplateId>) -> Self {
        Self {
            template_id: template_id.into(),
            begin: StartOffset::End,
            include_created_event_blob: false,
            acting_parties: None,
            query: None,
        }
    }

    pub fn from_offset(mut self, offset: Offset) -> Self {
        self.begin = StartOffset::At(offset);
        self
    }

    pub fn with_created_event_blob(mut self) -> Self {
        self.include_created_event_blob = true;
        self
    }

    pub fn acting_as(mut self, parties: Vec<Party>) -> Self {
        self.acting_parties = Some(parties);
        self
    }

    pub fn with_query(mut self, query: serde_json::Value) -> Self {
        self.query = Some(query);
        self
    }
}

impl From<String> for TemplateId {
    fn from(s: String) -> Self {
        TemplateId(s)
    }
}

impl From<String> for ContractId {
    fn from(s: String) -> Self {
        ContractId(s)
    }
}

/// Connection status of a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// Created, never started.
    Initializing,
    /// Waiting for the stream to deliver its initial snapshot.
    Connecting,
    /// Initial snapshot loaded, receiving incremental changes.
    Live,
    /// Last attempt failed; a reconnect is pending.
    Error,
    /// Stopped by the owner.
    Closed,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionStatus::Initializing => "initializing",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Live => "live",
            ConnectionStatus::Error => "error",
            ConnectionStatus::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Monotonic tag distinguishing successive handle lifetimes of one controller.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Generation(pub u64);

impl Generation {
    pub fn next(self) -> Self {
        Generation(self.0 + 1)
    }
}

impl fmt::Debug for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Gen({})", self.0)
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
