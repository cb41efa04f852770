/// The central error type used throughout ros1-node.
///
/// Every fallible operation at the public surface (advertise, subscribe,
/// setParameter, ...) returns this type. Internal, per-connection faults
/// (a single decode failure, a single peer socket closing) are *not*
/// represented here -- those are reported as events on the owning
/// `Publication`/`Subscription`/connection and logged, per the error
/// handling design: this enum is for errors a caller can act on.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Returned when communication with the master is fully lost.
    /// Callers should treat in-flight registrations as pending retry;
    /// the node is expected to be self-healing once the master returns.
    #[error("No connection to ROS master")]
    Disconnected,
    /// An operation took unexpectedly long. Used for master/param RPCs,
    /// never for the backoff-driven reconnect loops (those retry forever
    /// by design).
    #[error("Operation timed out: {0}")]
    Timeout(String),
    /// A message could not be serialized/deserialized, or a connection
    /// header failed md5sum/type validation.
    #[error("Serialization error: {0}")]
    SerializationError(String),
    /// The master or a peer's follower RPC server reported a non-success
    /// status code for a request we made.
    #[error("Peer reported an error: {0}")]
    ServerError(String),
    /// A fundamental networking error: bind failure, DNS failure, etc.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    /// A topic, caller id, or parameter key did not meet ROS naming rules.
    #[error("Name does not meet ROS requirements: {0}")]
    InvalidName(String),
    /// Escape hatch for everything else (XML-RPC transport failures,
    /// resolver failures, etc.) that doesn't cleanly fit another variant.
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

/// Generic result type used throughout ros1-node.
pub type Result<T> = std::result::Result<T, Error>;
