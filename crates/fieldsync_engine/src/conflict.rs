//! Conflict resolution between local and remote record copies.

/// Which copy wins a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Winner {
    /// Keep the local copy and resubmit it with force.
    Local,
    /// Overwrite the local copy with the server's.
    Remote,
}

/// Last-writer-wins on modification timestamps.
///
/// The remote copy wins only when it is strictly newer. A tie keeps
/// the local copy: in this workload records are edited on one device,
/// so equal timestamps almost always mean the same write seen twice,
/// and keeping the local copy makes resolution deterministic without
/// a second clock source.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictResolver;

impl ConflictResolver {
    /// Picks the winning copy from the two modification timestamps.
    #[must_use]
    pub fn resolve(local_updated_at_ms: u64, remote_updated_at_ms: u64) -> Winner {
        if remote_updated_at_ms > local_updated_at_ms {
            Winner::Remote
        } else {
            Winner::Local
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn strictly_newer_remote_wins() {
        assert_eq!(ConflictResolver::resolve(100, 101), Winner::Remote);
        assert_eq!(ConflictResolver::resolve(101, 100), Winner::Local);
    }

    #[test]
    fn tie_keeps_local() {
        assert_eq!(ConflictResolver::resolve(100, 100), Winner::Local);
    }

    proptest! {
        #[test]
        fn resolution_is_deterministic(local in any::<u64>(), remote in any::<u64>()) {
            let first = ConflictResolver::resolve(local, remote);
            let second = ConflictResolver::resolve(local, remote);
            prop_assert_eq!(first, second);
            prop_assert_eq!(first == Winner::Remote, remote > local);
        }
    }
}
