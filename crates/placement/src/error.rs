use dsched_kubehub::ClusterError;

/// Failure while deciding a placement. Any variant means no patch is produced.
#[derive(Debug, thiserror::Error)]
pub enum PlacementError {
    /// The Pod or workload object lacks a field the engine needs.
    #[error("decode: {0}")]
    Decode(String),
    /// An owner object could not be read or Pods could not be listed.
    #[error("lookup failed: {0}")]
    Lookup(#[from] ClusterError),
    /// The availability annotation is missing or malformed.
    #[error("annotation {annotation} on {workload} {reason}")]
    Policy {
        annotation: &'static str,
        workload: String,
        reason: String,
    },
}
