//! # Ledger Stream
//!
//! Live, self-healing views of a distributed ledger's contract streams.
//!
//! ## Core Concepts
//!
//! - **Client**: The ledger collaborator that opens streams and answers queries
//! - **Views**: Insertion-ordered contract maps folded from add/remove events
//! - **Controllers**: Own one stream, reconnect on failure, publish updates
//! - **Coordinators**: Run one controller per template with a merged status
//! - **Context**: Client, session parties and configuration, passed explicitly
//!
//! ## Example
//!
//! ```ignore
//! use ledger_stream::{InMemoryLedger, LedgerContext, Party, StreamDescriptor};
//!
//! let ledger = Arc::new(InMemoryLedger::new());
//! let ctx = LedgerContext::new(ledger.clone(), vec![Party::new("alice")]);
//!
//! let mut orders = ctx.subscribe(StreamDescriptor::new("Order"))?;
//! ledger.create("Order", json!({"qty": 3}), vec![Party::new("alice")]);
//!
//! orders.drain();
//! assert!(orders.is_connected());
//! assert_eq!(orders.view().len(), 1);
//! ```

pub mod client;
pub mod context;
pub mod error;
pub mod memory;
pub mod subscriptions;
pub mod types;
pub mod view;

// Re-exports
pub use client::{EventSink, Envelope, Inbound, LedgerClient, StreamEvent, StreamHandle, StreamStatus};
pub use context::{LedgerConfig, LedgerContext};
pub use error::{ErrorInfo, ErrorKind, LedgerError, Result};
pub use memory::InMemoryLedger;
pub use subscriptions::{
    CoordinatorUpdate, ReloadHandle, StreamCoordinator, SubscriptionController, SubscriptionUpdate,
};
pub use types::*;
pub use view::{apply_change, fold, MaterializedView, ViewChange};
