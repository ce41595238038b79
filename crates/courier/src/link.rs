//! Escalation seam between the I/O components and the connection manager.

/// Receives communication failures detected by the read loop, the output
/// channel or the dispatcher.
pub(crate) trait LinkMonitor: Send + Sync {
    /// Reports that the link is no longer usable.
    fn comm_failure(&self, message: &str, reason: &str);
}
