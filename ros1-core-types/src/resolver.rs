use crate::{RosValue, Result};
use std::sync::Arc;

/// A decoder: turns the raw bytes of one ROS message body into a `RosValue`.
pub type MessageReader = dyn Fn(&[u8]) -> Result<RosValue> + Send + Sync;
/// An encoder: turns a `RosValue` into the raw bytes of one ROS message body.
pub type MessageWriter = dyn Fn(&RosValue) -> Result<Vec<u8>> + Send + Sync;

/// The outcome of resolving a ROS data type name (and, optionally, its
/// `.msg`-file text) to something the node runtime can use on the wire.
///
/// `md5sum` and `definition_text` are the connection-header fields every
/// TCPROS handshake exchanges; `reader`/`writer` are the message codec
/// this crate deliberately does not implement -- a caller supplies them,
/// turning bytes into a structured value and back.
#[derive(Clone)]
pub struct ResolvedType {
    pub md5sum: String,
    pub definition_text: String,
    pub reader: Arc<MessageReader>,
    pub writer: Arc<MessageWriter>,
}

impl std::fmt::Debug for ResolvedType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedType")
            .field("md5sum", &self.md5sum)
            .field("definition_text", &self.definition_text)
            .finish_non_exhaustive()
    }
}

/// The interface the node runtime consumes for the (out of scope) ROS
/// message-definition parser. An implementation of this trait is injected
/// at `Node` construction; `ros1-node` never parses `.msg` files itself.
///
/// `definition_text` is `Some` only when the caller supplied message
/// definition text explicitly (e.g. `advertise` with an inline
/// definition); when `None` the resolver is expected to already know the
/// type (e.g. it was generated ahead of time from a `.msg` file on disk),
/// or to resolve it purely from a peer's `message_definition` handshake
/// field passed through `definition_text` on the subscriber side.
pub trait MessageDefinitionResolver: Send + Sync {
    fn resolve(&self, data_type: &str, definition_text: Option<&str>) -> Result<ResolvedType>;
}
