//! # ros1-core-types
//!
//! Shared vocabulary for `ros1-node`: the crate-wide error type, the
//! `RosValue` structured-value model that a decoded message is handed to
//! callers as, the `MessageDefinitionResolver` trait that stands in for
//! the (out of scope) ROS message-definition parser, and the `Name`
//! newtype used for topic/caller-id validation.
//!
//! Message encoding/decoding itself is treated as an external collaborator:
//! this crate only describes the shape of that collaborator's interface,
//! it does not parse `.msg` files.

mod error;
mod name;
mod resolver;
mod value;

pub use error::{Error, Result};
pub use name::Name;
pub use resolver::{MessageDefinitionResolver, MessageReader, MessageWriter, ResolvedType};
pub use value::{Duration, RosValue, Time};
