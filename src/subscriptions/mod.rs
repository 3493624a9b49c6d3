//! Live subscriptions to ledger streams.
//!
//! This module keeps local views synchronized with remote, possibly
//! interrupted, contract streams:
//! - One controller per template owns a stream handle and its view
//! - Failed streams are reconnected after a fixed delay with a fresh view
//! - A coordinator runs several templates and merges their status
//!
//! Consumers never see stream failures as errors; they watch the published
//! status instead.
//!
//! # Example
//!
//! ```ignore
//! let ctx = LedgerContext::new(client, vec![Party::new("alice")]);
//! let mut orders = ctx.subscribe(StreamDescriptor::new("Order"))?;
//! let updates = orders.watch();
//!
//! loop {
//!     orders.poll(Duration::from_millis(100));
//!     for update in updates.try_iter() {
//!         match update.status {
//!             ConnectionStatus::Live => println!("{} orders", update.view.len()),
//!             ConnectionStatus::Error => println!("Retrying: {:?}", update.error),
//!             _ => {}
//!         }
//!     }
//! }
//! ```

mod controller;
mod coordinator;
mod status;
mod types;

pub use controller::SubscriptionController;
pub use coordinator::StreamCoordinator;
pub use status::aggregate;
pub use types::{CoordinatorUpdate, ReloadHandle, SubscriptionUpdate};
