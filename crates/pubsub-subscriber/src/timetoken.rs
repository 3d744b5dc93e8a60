//! Per-session cursor store.

use crate::types::{Cursor, Timetoken};

/// Last-seen position of one subscription session.
///
/// The timetoken only moves forward; [`reset`](TimetokenStore::reset) is the
/// single way back to zero.
#[derive(Debug, Default, Clone)]
pub struct TimetokenStore {
    cursor: Cursor,
}

impl TimetokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn timetoken(&self) -> Timetoken {
        self.cursor.timetoken
    }

    /// Move to `next`. A cursor behind the current one is ignored and `false`
    /// is returned; an equal one only refreshes the region.
    pub fn advance(&mut self, next: Cursor) -> bool {
        if next.timetoken < self.cursor.timetoken {
            tracing::warn!(
                current = %self.cursor.timetoken,
                received = %next.timetoken,
                "server returned an older timetoken, keeping current position"
            );
            return false;
        }
        self.cursor.timetoken = next.timetoken;
        if next.region.is_some() {
            self.cursor.region = next.region;
        }
        true
    }

    /// Forget the position; the next poll is a fresh handshake.
    pub fn reset(&mut self) {
        tracing::debug!(previous = %self.cursor.timetoken, "timetoken reset");
        self.cursor = Cursor::default();
    }
}
