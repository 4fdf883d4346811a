//! Opaque, process-wide monotonically increasing version token.

use std::sync::atomic::{AtomicU64, Ordering};

static NEXT: AtomicU64 = AtomicU64::new(1);

/// Identifies a point in the data history of a register. Every successful
/// read-with-new-data or write produces one; ordering is total within a
/// process and is guaranteed non-decreasing across all accessors sharing a
/// backend (SPEC_FULL.md §5).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VersionNumber(u64);

impl VersionNumber {
    /// Allocates a new version number, strictly greater than every version
    /// previously allocated in this process.
    pub fn new() -> Self {
        VersionNumber(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// The sentinel "nothing happened yet" version, smaller than any value
    /// returned by [`VersionNumber::new`].
    pub const fn none() -> Self {
        VersionNumber(0)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strictly_increasing() {
        let a = VersionNumber::new();
        let b = VersionNumber::new();
        assert!(b > a);
    }

    #[test]
    fn none_is_smallest() {
        assert!(VersionNumber::new() > VersionNumber::none());
    }
}
