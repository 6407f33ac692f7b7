//! Per-message delivery state: sent -> delivered -> seen.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    #[default]
    Sent,
    Delivered,
    Seen,
}

impl DeliveryState {
    pub fn from_flags(delivered: bool, seen: bool) -> Self {
        if seen {
            Self::Seen
        } else if delivered {
            Self::Delivered
        } else {
            Self::Sent
        }
    }

    /// Moves forward to `to`. Returns false and leaves the state untouched
    /// when `to` is not ahead of the current state.
    pub fn advance(&mut self, to: DeliveryState) -> bool {
        if to > *self {
            *self = to;
            true
        } else {
            false
        }
    }

    pub fn is_delivered(&self) -> bool {
        *self >= Self::Delivered
    }

    pub fn is_seen(&self) -> bool {
        *self == Self::Seen
    }
}
