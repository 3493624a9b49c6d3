//! View change application.

use super::MaterializedView;
use crate::types::{Contract, ContractId};

/// A single change to a materialized view.
#[derive(Clone, Debug, PartialEq)]
pub enum ViewChange {
    /// Contract created (or re-delivered). Last write wins.
    Added(Contract),
    /// Contract archived. Removing an absent contract is a no-op.
    Removed(ContractId),
}

/// Apply a change to a view.
///
/// Pure with respect to everything but the view itself, so it can be used
/// standalone to replay a recorded stream.
pub fn apply_change(mut view: MaterializedView, change: ViewChange) -> MaterializedView {
    view.apply(change);
    view
}

/// Fold a sequence of changes into a fresh view.
pub fn fold<I>(changes: I) -> MaterializedView
where
    I: IntoIterator<Item = ViewChange>,
{
    changes.into_iter().fold(MaterializedView::new(), apply_change)
}
