/// Platform-abstracted view of process memory pressure.
///
/// The pipeline consults this before each chunk wave. Both operations are
/// advisory: `current_usage` may be a coarse estimate and `request_reclaim`
/// may be a no-op on runtimes with no reclaim hook. Implementations must
/// not treat either as a guarantee.
pub trait ResourceMonitor: Send + Sync {
    /// Current memory usage in bytes, best effort.
    fn current_usage(&self) -> u64;

    /// Ask the runtime to release memory. Advisory; default is a no-op.
    fn request_reclaim(&self) {}
}

/// Monitor for platforms without a usage probe: reports zero usage, so the
/// pipeline never pauses.
pub struct NoopMonitor;

impl ResourceMonitor for NoopMonitor {
    fn current_usage(&self) -> u64 {
        0
    }
}
