//! Engine counters.

/// Remote traffic counters, cumulative since the engine started.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Writes confirmed by the remote store.
    pub pushes: u64,
    /// Push attempts restarted after a stale version token.
    pub conflicts_retried: u64,
    /// Payloads moved to a blob after a size rejection.
    pub blob_spills: u64,
    /// Waits on a server-supplied retry delay.
    pub rate_limit_waits: u64,
    /// Fetch round trips issued, failed ones included.
    pub fetch_round_trips: u64,
    /// Records returned by fetches.
    pub fetched_records: u64,
    /// Operations abandoned on an unclassified remote error.
    pub unclassified_failures: u64,
    /// Last remote error message.
    pub last_error: Option<String>,
}
