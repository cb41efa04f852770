//! `Subscription`: the data model a `Node::subscribe` call returns and
//! that owns the set of `PublisherConnection`s feeding it

use crate::publisher_connection::{PublisherConnection, PublisherConnectionEvent, TransportInfo};
use crate::stats::Stats;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

/// Events a `Subscription` raises upward, one level above the raw
/// per-connection events: `header` is reported once per connection but
/// callers who only care about decoded traffic usually only watch
/// `Message`/`Error`
#[derive(Clone, Debug)]
pub enum SubscriptionEvent {
    Header { connection_id: u64 },
    Message { connection_id: u64, value: ros1_core_types::RosValue, raw: Vec<u8> },
    Error { connection_id: u64, message: String },
}

pub struct Subscription {
    topic: String,
    data_type: String,
    md5sum: String,
    tcp_nodelay: bool,
    connections: RwLock<HashMap<u64, Arc<PublisherConnection>>>,
    /// Publisher follower URL -> connection id, so `Node::publisher_update`
    /// can diff the master's pushed publisher set against what we already
    /// hold a connection to
    by_publisher_url: RwLock<HashMap<String, u64>>,
    events: broadcast::Sender<SubscriptionEvent>,
}

impl Subscription {
    pub fn new(topic: String, data_type: String, md5sum: String, tcp_nodelay: bool) -> Self {
        let (events, _rx) = broadcast::channel(256);
        Self {
            topic,
            data_type,
            md5sum,
            tcp_nodelay,
            connections: RwLock::new(HashMap::new()),
            by_publisher_url: RwLock::new(HashMap::new()),
            events,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn data_type(&self) -> &str {
        &self.data_type
    }

    pub fn md5sum(&self) -> &str {
        &self.md5sum
    }

    pub fn tcp_nodelay(&self) -> bool {
        self.tcp_nodelay
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SubscriptionEvent> {
        self.events.subscribe()
    }

    /// Registers a new connection for `publisher_url`, wiring its raw
    /// events into this subscription's semantic event stream.
    pub async fn attach(&self, id: u64, publisher_url: String, connection: Arc<PublisherConnection>) {
        let mut rx = connection.subscribe();
        let events = self.events.clone();
        tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                let forwarded = match event {
                    PublisherConnectionEvent::Header(_) => SubscriptionEvent::Header { connection_id: id },
                    PublisherConnectionEvent::Message { value, raw } => {
                        SubscriptionEvent::Message { connection_id: id, value, raw }
                    }
                    PublisherConnectionEvent::Error(message) => {
                        SubscriptionEvent::Error { connection_id: id, message }
                    }
                };
                let _ = events.send(forwarded);
            }
        });
        self.connections.write().await.insert(id, connection);
        self.by_publisher_url.write().await.insert(publisher_url, id);
    }

    pub async fn detach(&self, id: u64) {
        if let Some(conn) = self.connections.write().await.remove(&id) {
            conn.close();
        }
        self.by_publisher_url.write().await.retain(|_, v| *v != id);
    }

    pub async fn detach_by_publisher_url(&self, publisher_url: &str) {
        let id = self.by_publisher_url.write().await.remove(publisher_url);
        if let Some(id) = id {
            if let Some(conn) = self.connections.write().await.remove(&id) {
                conn.close();
            }
        }
    }

    /// Connection ids currently attached.
    pub async fn connection_ids(&self) -> Vec<u64> {
        self.connections.read().await.keys().copied().collect()
    }

    /// Publisher follower URLs we currently hold a connection to.
    pub async fn publisher_urls(&self) -> Vec<String> {
        self.by_publisher_url.read().await.keys().cloned().collect()
    }

    /// Per-connection `(connectionId, Stats, TransportInfo, peerCallerId,
    /// connected)` tuples, for `getBusStats`/`getBusInfo`
    /// `TransportInfo`/`peerCallerId` are `None` until the connection has
    /// completed its handshake.
    pub async fn connection_details(
        &self,
    ) -> Vec<(u64, Stats, Option<TransportInfo>, Option<String>, bool)> {
        self.connections
            .read()
            .await
            .iter()
            .map(|(id, conn)| {
                (
                    *id,
                    conn.stats(),
                    conn.transport_info(),
                    conn.peer_caller_id(),
                    conn.connected(),
                )
            })
            .collect()
    }

    pub async fn close(&self) {
        let mut conns = self.connections.write().await;
        for conn in conns.values() {
            conn.close();
        }
        conns.clear();
        self.by_publisher_url.write().await.clear();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Ok(conns) = self.connections.try_read() {
            if !conns.is_empty() {
                log::debug!(
                    "dropping subscription for topic {} with {} connection(s) still attached",
                    self.topic,
                    conns.len()
                );
            }
            for conn in conns.values() {
                conn.close();
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::header::ConnectionHeader;
    use std::net::SocketAddr;

    #[tokio::test]
    async fn attach_and_detach_track_connection_ids() {
        let subscription = Subscription::new("/t".into(), "std_msgs/Bool".into(), "*".into(), false);
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let header = ConnectionHeader::request("/t", "*", "/c", "std_msgs/Bool", false);
        let conn = Arc::new(PublisherConnection::new(addr, header));
        subscription.attach(1, "http://127.0.0.1:9999/".into(), conn).await;
        assert_eq!(subscription.connection_ids().await, vec![1]);
        assert_eq!(subscription.publisher_urls().await, vec!["http://127.0.0.1:9999/".to_string()]);
        subscription.detach(1).await;
        assert!(subscription.connection_ids().await.is_empty());
        assert!(subscription.publisher_urls().await.is_empty());
    }
}
