//! Status aggregation across several subscriptions.

use crate::types::ConnectionStatus;

/// Reduce child statuses to one.
///
/// - `Error` if any child is in error
/// - `Live` if every child is live (vacuously true for no children)
/// - `Closed` / `Initializing` if every child is in that state
/// - `Connecting` otherwise
pub fn aggregate<I>(statuses: I) -> ConnectionStatus
where
    I: IntoIterator<Item = ConnectionStatus>,
{
    let mut all_live = true;
    let mut all_closed = true;
    let mut all_initializing = true;

    for status in statuses {
        match status {
            ConnectionStatus::Error => return ConnectionStatus::Error,
            ConnectionStatus::Live => {
                all_closed = false;
                all_initializing = false;
            }
            ConnectionStatus::Closed => {
                all_live = false;
                all_initializing = false;
            }
            ConnectionStatus::Initializing => {
                all_live = false;
                all_closed = false;
            }
            ConnectionStatus::Connecting => {
                all_live = false;
                all_closed = false;
                all_initializing = false;
            }
        }
    }

    if all_live {
        ConnectionStatus::Live
    } else if all_closed {
        ConnectionStatus::Closed
    } else if all_initializing {
        ConnectionStatus::Initializing
    } else {
        ConnectionStatus::Connecting
    }
}
