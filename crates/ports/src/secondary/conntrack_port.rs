use domain::common::entity::AddressFamily;
use domain::conntrack::entity::FlowTuple;
use domain::conntrack::error::ConnTrackError;
use domain::verdict::entity::Mark;

/// Secondary port for the kernel connection-tracking table.
///
/// Only used to invalidate permanent decisions; never on the packet path.
pub trait ConnTrackPort: Send + Sync {
    /// Delete every entry of `family` whose mark equals `mark`.
    /// Returns the number of entries removed.
    fn delete_by_mark(&self, family: AddressFamily, mark: Mark) -> Result<u64, ConnTrackError>;

    /// Delete the entry tracking one flow.
    fn delete_flow(&self, tuple: &FlowTuple) -> Result<(), ConnTrackError>;
}
