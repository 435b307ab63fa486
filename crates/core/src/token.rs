//! Optimistic concurrency token for saga rows.

use serde::{Deserialize, Serialize};

/// Version marker stored alongside every saga row.
///
/// Assigned [`ConcurrencyToken::INITIAL`] on insert and advanced by one on
/// every update. An update or delete is only applied when the stored token
/// still equals the token read at load time.
///
/// Business logic never sees this value; it stays inside the storage session.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConcurrencyToken(i64);

impl ConcurrencyToken {
    pub const INITIAL: ConcurrencyToken = ConcurrencyToken(1);

    pub fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> i64 {
        self.0
    }

    /// Token the row carries after a successful update.
    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl core::fmt::Display for ConcurrencyToken {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "v{}", self.0)
    }
}
