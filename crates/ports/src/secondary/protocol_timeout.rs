use domain::timeout::entity::ProtocolTimeouts;

/// Protocol state-machine timeout table.
///
/// Implemented by the in-memory table in the adapter layer.
pub trait ProtocolTimeoutTable: Send + Sync {
    fn timeouts(&self) -> ProtocolTimeouts;

    /// Replace the table; callers merge non-zero fields beforehand.
    fn set_timeouts(&self, timeouts: &ProtocolTimeouts);

    /// Switch the TCP state table between its normal and hardened variants.
    fn timeout_change(&self, secure: bool);
}
