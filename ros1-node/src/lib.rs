//! # ros1-node
//!
//! A standalone implementation of the ROS1 node runtime: the peer-to-peer
//! TCPROS transport plus the master/follower XML-RPC glue that negotiates
//! it. This crate owns components A through G of the node runtime design:
//!
//! - [`framing`] (A) -- the length-delimited TCPROS frame codec.
//! - [`header`] (B) -- the connection-header (`key=value`) codec.
//! - [`backoff`] (C) -- truncated exponential backoff and a cancellable
//!   retry-forever primitive.
//! - [`publisher_connection`] (D) -- the outbound, subscriber-side TCPROS
//!   client state machine.
//! - [`subscriber_connection`] (E) -- the inbound, publisher-side TCPROS
//!   server state machine.
//! - [`node`] (F, G) -- the `Node` runtime itself, the master/param XML-RPC
//!   clients, and the follower XML-RPC server.
//!
//! Message encoding/decoding, the concrete XML-RPC wire codec, and process
//! discovery (hostname/PID) sit at the edges of this crate per the system
//! this implements; see `ros1_core_types::MessageDefinitionResolver` for
//! the injected seam and [`node::hostname`] for the one piece of process
//! discovery this crate performs directly.

pub mod backoff;
pub mod framing;
pub mod header;
pub mod node;
pub mod publication;
pub mod publisher_connection;
pub mod stats;
pub mod subscriber_connection;
pub mod subscription;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use framing::{FrameDecoder, FramingError};
pub use header::ConnectionHeader;
pub use node::follower::{FollowerRpcTransport, RpcReply};
pub use node::master_client::{MasterClient, SystemState, SystemStateEntry, XmlRpcMasterClient};
pub use node::param_client::{ParamClient, ParamValue, XmlRpcParamClient};
pub use node::{Node, NodeEvent};
pub use publication::{Publication, PublicationInfo};
pub use publisher_connection::{
    PublisherConnection, PublisherConnectionEvent, TransportInfo,
};
pub use stats::{Stats, StatsCounters};
pub use subscriber_connection::{SubscriberConnection, SubscriberConnectionEvent};
pub use subscription::{Subscription, SubscriptionEvent};

pub use ros1_core_types::{
    Error, MessageDefinitionResolver, MessageReader, MessageWriter, Name, Result, ResolvedType,
    RosValue,
};
