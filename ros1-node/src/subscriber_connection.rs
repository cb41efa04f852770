//! Component E: the inbound, publisher-side TCPROS server state machine
//!

use crate::framing::{encode_frame, FrameDecoder};
use crate::header::ConnectionHeader;
use crate::stats::{Stats, StatsCounters};
use abort_on_drop::ChildTask;
use ros1_core_types::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    AwaitingHeader,
    Responded,
    Serving,
    Closed,
}

#[derive(Clone, Debug)]
pub enum SubscriberConnectionEvent {
    Subscribe,
    Error(String),
    Closed,
}

/// The slice of a `Publication`'s immutable fields a handshake needs to
/// validate against and reply with -- a snapshot, not a reference, so the
/// validating code has no lock held across the socket I/O that follows.
#[derive(Clone, Debug)]
pub struct PublicationSnapshot {
    pub topic: String,
    pub data_type: String,
    pub md5sum: String,
    pub latching: bool,
    pub message_definition: String,
    pub caller_id: String,
    /// Pre-framed (`u32le length || payload`) bytes of the last published
    /// message, if latching and at least one publish has happened
    ///
    pub latched_frame: Option<Vec<u8>>,
}

fn type_matches(declared: &str, published: &str) -> bool {
    declared == "*" || published == "*" || declared == published
}

fn md5_matches(declared: &str, published: &str) -> bool {
    declared == "*" || published == "*" || declared == published
}

/// Checks that `topic`, `callerid`, and `type` are all present Returns the reason for rejection, if any.
fn validate_required_fields(header: &ConnectionHeader) -> Option<String> {
    for key in ["topic", "callerid", "type"] {
        if header.get(key).is_none() {
            return Some(format!("missing required field {key}"));
        }
    }
    None
}

/// Validates a just-received request header against the publication it
/// names (required fields already checked by `validate_required_fields`).
/// Returns the reason string for rejection, or `None` if it should be
/// accepted.
fn validate(header: &ConnectionHeader, publication: &PublicationSnapshot) -> Option<String> {
    let declared_type = header.get("type").unwrap_or_default();
    if !type_matches(declared_type, &publication.data_type) {
        return Some(format!(
            "type mismatch: declared {declared_type}, published {}",
            publication.data_type
        ));
    }
    if let Some(declared_md5) = header.get("md5sum") {
        if !md5_matches(declared_md5, &publication.md5sum) {
            return Some(format!(
                "md5sum mismatch: declared {declared_md5}, published {}",
                publication.md5sum
            ));
        }
    }
    None
}

/// A served inbound TCP session. Holds a channel the owning `Publication`
/// writes pre-framed outbound payloads into; the connection's write task
/// drains it independently of every other connection
pub struct SubscriberConnection {
    state: Arc<std::sync::Mutex<ConnectionState>>,
    stats: Arc<StatsCounters>,
    write_tx: mpsc::Sender<Vec<u8>>,
    events: broadcast::Sender<SubscriberConnectionEvent>,
    closed: Arc<AtomicBool>,
    peer_caller_id: String,
    peer_addr: std::net::SocketAddr,
    _task: ChildTask<()>,
}

impl SubscriberConnection {
    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap()
    }

    pub fn stats(&self) -> Stats {
        self.stats.snapshot()
    }

    /// The `callerid` the peer declared in its request header, for
    /// `getBusInfo`'s destination column
    pub fn peer_caller_id(&self) -> &str {
        &self.peer_caller_id
    }

    pub fn peer_addr(&self) -> std::net::SocketAddr {
        self.peer_addr
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SubscriberConnectionEvent> {
        self.events.subscribe()
    }

    /// Queues a pre-framed payload for delivery. Never blocks the caller
    /// (fan-out publish must not stall on one slow subscriber): if the
    /// outbound queue is full, the message is dropped and a `dropped`
    /// counter increments, rather than waiting.
    pub fn send_framed(&self, framed: Vec<u8>) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        if self.write_tx.try_send(framed).is_err() {
            self.stats.record_dropped();
        }
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        *self.state.lock().unwrap() = ConnectionState::Closed;
    }

    /// Performs the handshake synchronously (reads the request header,
    /// looks up the named publication via `lookup`, validates, writes the
    /// response header plus any latched payload) and, on success, spawns
    /// the background read (discard) / write (fan-out drain) tasks and
    /// returns the handle alongside the topic it was accepted for (so the
    /// caller -- a single Node-wide listener serves every publication --
    /// knows which `Publication` to attach it to). On rejection, the
    /// socket is closed and `Err` is returned; no connection is created
    /// and no `subscribe` event fires
    pub async fn accept<F, Fut>(mut stream: TcpStream, lookup: F) -> Result<(Self, String)>
    where
        F: FnOnce(String) -> Fut,
        Fut: std::future::Future<Output = Option<PublicationSnapshot>>,
    {
        let mut decoder = FrameDecoder::new();
        let mut read_buf = [0u8; 8192];
        let request_header = loop {
            let n = stream
                .read(&mut read_buf)
                .await
                .map_err(Error::from)?;
            if n == 0 {
                return Err(Error::Disconnected);
            }
            let frames = decoder
                .feed(&read_buf[..n])
                .map_err(|e| Error::SerializationError(e.to_string()))?;
            if let Some(first) = frames.into_iter().next() {
                break ConnectionHeader::decode(&first);
            }
        };

        if let Some(reason) = validate_required_fields(&request_header) {
            return Err(Error::ServerError(reason));
        }
        let topic = request_header.get("topic").unwrap().to_string();
        let peer_caller_id = request_header.get("callerid").unwrap_or_default().to_string();
        let peer_addr = stream.peer_addr().map_err(Error::from)?;

        let publication = match lookup(topic.clone()).await {
            Some(p) => p,
            None => return Err(Error::ServerError(format!("topic {topic} is not advertised"))),
        };

        if let Some(reason) = validate(&request_header, &publication) {
            return Err(Error::ServerError(reason));
        }

        if request_header.wants_tcp_nodelay() {
            let _ = stream.set_nodelay(true);
        }

        let response = ConnectionHeader::response(
            &publication.caller_id,
            publication.latching,
            &publication.md5sum,
            &publication.message_definition,
            &publication.topic,
            &publication.data_type,
        );
        stream.write_all(&response.encode()).await?;

        if let Some(latched) = &publication.latched_frame {
            stream.write_all(latched).await?;
        }

        let state = Arc::new(std::sync::Mutex::new(ConnectionState::Responded));
        let stats = Arc::new(StatsCounters::new(false));
        let (events, _rx) = broadcast::channel(16);
        let (write_tx, mut write_rx) = mpsc::channel::<Vec<u8>>(256);
        let closed = Arc::new(AtomicBool::new(false));

        let task_state = state.clone();
        let task_stats = stats.clone();
        let task_events = events.clone();
        let task_closed = closed.clone();

        let task = tokio::spawn(async move {
            *task_state.lock().unwrap() = ConnectionState::Serving;
            let _ = task_events.send(SubscriberConnectionEvent::Subscribe);

            let (mut read_half, mut write_half) = stream.into_split();

            let reader_stats = task_stats.clone();
            let reader_closed = task_closed.clone();
            let reader = tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                loop {
                    match read_half.read(&mut buf).await {
                        Ok(0) | Err(_) => {
                            reader_closed.store(true, Ordering::SeqCst);
                            return;
                        }
                        Ok(n) => reader_stats.record_received_bytes(n as u64),
                    }
                }
            });

            while let Some(framed) = write_rx.recv().await {
                if task_closed.load(Ordering::SeqCst) {
                    break;
                }
                match write_half.write_all(&framed).await {
                    Ok(()) => {
                        task_stats.record_sent_bytes(framed.len() as u64);
                        task_stats.record_message_sent();
                    }
                    Err(e) => {
                        let _ = task_events.send(SubscriberConnectionEvent::Error(e.to_string()));
                        break;
                    }
                }
            }

            task_closed.store(true, Ordering::SeqCst);
            *task_state.lock().unwrap() = ConnectionState::Closed;
            let _ = task_events.send(SubscriberConnectionEvent::Closed);
            reader.abort();
        });

        Ok((
            Self {
                state,
                stats,
                write_tx,
                events,
                closed,
                peer_caller_id,
                peer_addr,
                _task: ChildTask::from(task),
            },
            topic,
        ))
    }
}

/// Frame-encodes a response header, for callers (e.g. the latched-cache
/// writer in `Publication`) that need the raw bytes directly.
pub fn encode_response(header: &ConnectionHeader) -> Vec<u8> {
    encode_frame(&header.encode())
}

#[cfg(test)]
mod test {
    use super::*;
    use tokio::io::AsyncWriteExt as _;
    use tokio::net::{TcpListener, TcpStream};

    fn publication() -> PublicationSnapshot {
        PublicationSnapshot {
            topic: "/chatter".into(),
            data_type: "std_msgs/Bool".into(),
            md5sum: "abc123".into(),
            latching: false,
            message_definition: "bool data".into(),
            caller_id: "/talker".into(),
            latched_frame: None,
        }
    }

    async fn connect_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, server)
    }

    #[tokio::test]
    async fn accepts_a_matching_header_and_emits_subscribe() {
        let (mut client, server) = connect_pair().await;
        let request = ConnectionHeader::request("/chatter", "abc123", "/listener", "std_msgs/Bool", false);
        client.write_all(&request.encode()).await.unwrap();

        let (conn, topic) = SubscriberConnection::accept(server, |_t| async { Some(publication()) })
            .await
            .unwrap();
        assert_eq!(topic, "/chatter");
        let mut events = conn.subscribe_events();
        let ev = tokio::time::timeout(std::time::Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(ev, SubscriberConnectionEvent::Subscribe));
    }

    #[tokio::test]
    async fn rejects_mismatched_type() {
        let (mut client, server) = connect_pair().await;
        let request = ConnectionHeader::request("/chatter", "abc123", "/listener", "nav_msgs/Odometry", false);
        client.write_all(&request.encode()).await.unwrap();

        let result = SubscriberConnection::accept(server, |_t| async { Some(publication()) }).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn rejects_unknown_topic() {
        let (mut client, server) = connect_pair().await;
        let request = ConnectionHeader::request("/other", "abc123", "/listener", "std_msgs/Bool", false);
        client.write_all(&request.encode()).await.unwrap();
        let result = SubscriberConnection::accept(server, |_t| async { None }).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn wildcard_md5_on_either_side_is_accepted() {
        let (mut client, server) = connect_pair().await;
        let request = ConnectionHeader::request("/chatter", "*", "/listener", "std_msgs/Bool", false);
        client.write_all(&request.encode()).await.unwrap();
        let result = SubscriberConnection::accept(server, |_t| async { Some(publication()) }).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn latched_payload_is_replayed_immediately_after_the_response_header() {
        let mut pub_snapshot = publication();
        pub_snapshot.latching = true;
        pub_snapshot.latched_frame = Some(encode_frame(&[0x01]));

        let (mut client, server) = connect_pair().await;
        let request = ConnectionHeader::request("/chatter", "abc123", "/listener", "std_msgs/Bool", false);
        client.write_all(&request.encode()).await.unwrap();

        let (_conn, _topic) = SubscriberConnection::accept(server, |_t| async { Some(pub_snapshot) })
            .await
            .unwrap();

        let mut decoder = FrameDecoder::new();
        let mut buf = [0u8; 4096];
        let mut frames = Vec::new();
        while frames.len() < 2 {
            let n = client.read(&mut buf).await.unwrap();
            frames.extend(decoder.feed(&buf[..n]).unwrap());
        }
        assert_eq!(frames[1], vec![0x01]);
    }
}
