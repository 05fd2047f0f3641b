use std::fmt;

/// Up-to-dateness of a bead within the provenance web.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Freshness {
    /// Referenced as input but not present in the bead set.
    Phantom,
    /// Not the latest version within its cluster.
    Superseded,
    /// Latest in its cluster and all inputs reference up-to-date beads.
    UpToDate,
    /// Latest in its cluster, but some input references a stale version.
    OutOfDate,
}

impl fmt::Display for Freshness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Freshness::Phantom => "PHANTOM",
            Freshness::Superseded => "SUPERSEDED",
            Freshness::UpToDate => "UP_TO_DATE",
            Freshness::OutOfDate => "OUT_OF_DATE",
        };
        write!(f, "{}", label)
    }
}
