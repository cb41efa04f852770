//! `Publication`: the data model a `Node::advertise` call returns and
//! fans published messages out through

use crate::framing::encode_frame;
use crate::stats::Stats;
use crate::subscriber_connection::{PublicationSnapshot, SubscriberConnection};
use ros1_core_types::{ResolvedType, Result, RosValue};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Immutable identity and wire-format facts about an advertised topic.
#[derive(Clone, Debug)]
pub struct PublicationInfo {
    pub topic: String,
    pub data_type: String,
    pub md5sum: String,
    pub latching: bool,
    pub message_definition: String,
    pub caller_id: String,
}

struct State {
    connections: HashMap<u64, Arc<SubscriberConnection>>,
    latched_frame: Option<Vec<u8>>,
}

/// Owns the set of `SubscriberConnection`s attached to one advertised
/// topic, plus (if latching) the most recently published frame.
///
/// `connection_id`s are minted by the owning node's single generator
/// and handed in at `attach` time;
/// a `Publication` never mints its own.
pub struct Publication {
    info: PublicationInfo,
    state: RwLock<State>,
    resolved: ResolvedType,
}

impl Publication {
    pub fn new(info: PublicationInfo, resolved: ResolvedType) -> Self {
        Self {
            info,
            state: RwLock::new(State {
                connections: HashMap::new(),
                latched_frame: None,
            }),
            resolved,
        }
    }

    pub fn info(&self) -> &PublicationInfo {
        &self.info
    }

    /// A snapshot used by `SubscriberConnection::accept` to validate and
    /// respond to a handshake, taken without holding any lock across the
    /// I/O that follows.
    pub async fn snapshot(&self) -> PublicationSnapshot {
        let state = self.state.read().await;
        PublicationSnapshot {
            topic: self.info.topic.clone(),
            data_type: self.info.data_type.clone(),
            md5sum: self.info.md5sum.clone(),
            latching: self.info.latching,
            message_definition: self.info.message_definition.clone(),
            caller_id: self.info.caller_id.clone(),
            latched_frame: state.latched_frame.clone(),
        }
    }

    /// Registers an already-accepted connection under a fresh id.
    pub async fn attach(&self, id: u64, connection: Arc<SubscriberConnection>) {
        self.state.write().await.connections.insert(id, connection);
    }

    pub async fn detach(&self, id: u64) {
        if let Some(conn) = self.state.write().await.connections.remove(&id) {
            conn.close();
        }
    }

    pub async fn connection_count(&self) -> usize {
        self.state.read().await.connections.len()
    }

    /// Per-connection `(connectionId, Stats, peerCallerId, peerAddr,
    /// connected)` tuples, for `getBusStats`/`getBusInfo`
    pub async fn connection_stats(
        &self,
    ) -> Vec<(u64, Stats, String, std::net::SocketAddr, bool)> {
        use crate::subscriber_connection::ConnectionState;
        self.state
            .read()
            .await
            .connections
            .iter()
            .map(|(id, conn)| {
                (
                    *id,
                    conn.stats(),
                    conn.peer_caller_id().to_string(),
                    conn.peer_addr(),
                    conn.state() != ConnectionState::Closed,
                )
            })
            .collect()
    }

    /// Encodes `value` once with the bound writer, replaces the latched
    /// cache atomically (if latching), then fans the framed payload out
    /// to every currently attached connection. Fan-out is no-fail-fast: a
    /// `send_framed` to one connection never blocks or prevents delivery
    /// to the others
    pub async fn publish(&self, value: &RosValue) -> Result<()> {
        let payload = (self.resolved.writer)(value)?;
        let framed = encode_frame(&payload);

        let mut state = self.state.write().await;
        if self.info.latching {
            state.latched_frame = Some(framed.clone());
        }
        for conn in state.connections.values() {
            conn.send_framed(framed.clone());
        }
        Ok(())
    }

    /// Closes every attached subscriber connection. Called on
    /// `unadvertise` and on node shutdown
    pub async fn close(&self) {
        let mut state = self.state.write().await;
        for conn in state.connections.values() {
            conn.close();
        }
        state.connections.clear();
    }
}

impl Drop for Publication {
    fn drop(&mut self) {
        // `close()` is async (needs the lock); best-effort synchronous
        // cleanup here covers the case where a caller dropped the
        // `Arc<Publication>` without calling `close()` first. The Node's
        // `unadvertise`/`shutdown` paths always call `close()` explicitly
        // and are the supported teardown path.
        if let Ok(state) = self.state.try_read() {
            if !state.connections.is_empty() {
                log::debug!(
                    "dropping publication for topic {} with {} connection(s) still attached",
                    self.info.topic,
                    state.connections.len()
                );
            }
            for conn in state.connections.values() {
                conn.close();
            }
        }
    }
}

#[allow(dead_code)]
fn _assert_send_sync() {
    fn assert<T: Send + Sync>() {}
    assert::<Publication>();
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc as StdArc;

    fn resolved() -> ResolvedType {
        ResolvedType {
            md5sum: "*".into(),
            definition_text: String::new(),
            reader: StdArc::new(|b: &[u8]| Ok(RosValue::Bytes(b.to_vec()))),
            writer: StdArc::new(|v: &RosValue| match v {
                RosValue::Bytes(b) => Ok(b.clone()),
                _ => Ok(Vec::new()),
            }),
        }
    }

    fn info() -> PublicationInfo {
        PublicationInfo {
            topic: "/t".into(),
            data_type: "std_msgs/Bool".into(),
            md5sum: "*".into(),
            latching: true,
            message_definition: "bool data".into(),
            caller_id: "/talker".into(),
        }
    }

    #[tokio::test]
    async fn publish_before_any_subscriber_populates_the_latch_cache() {
        let publication = Publication::new(info(), resolved());
        publication.publish(&RosValue::Bytes(vec![0x01])).await.unwrap();
        let snap = publication.snapshot().await;
        assert_eq!(snap.latched_frame, Some(encode_frame(&[0x01])));
    }

    #[tokio::test]
    async fn attach_increments_connection_count() {
        let publication = Publication::new(info(), resolved());
        assert_eq!(publication.connection_count().await, 0);
    }
}
