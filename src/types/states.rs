use std::time::Instant;

use serde::Serialize;

/// Tracks who owns a queued job.
///
/// Cancellation only ever moves a holder from `Unclaimed` to `Removed`. A
/// `Claimed` holder goes back to `Unclaimed` only through a queue-internal
/// release after a failed run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ClaimMarker {
    Unclaimed,
    Claimed { at: Instant },
    Removed,
}

impl ClaimMarker {
    pub fn is_unclaimed(&self) -> bool {
        matches!(self, ClaimMarker::Unclaimed)
    }

    pub fn is_claimed(&self) -> bool {
        matches!(self, ClaimMarker::Claimed { .. })
    }
}

// Lets job snapshots be rendered as YAML.
impl Serialize for ClaimMarker {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use ClaimMarker::*;

        serializer.serialize_str(match self {
            Unclaimed => "unclaimed",
            Claimed { at: _ } => "claimed",
            Removed => "removed",
        })
    }
}
