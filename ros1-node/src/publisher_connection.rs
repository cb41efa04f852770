//! Component D: the outbound, subscriber-side TCPROS client state machine
//!

use crate::backoff::{retry_forever, BackoffConfig, CancelToken};
use crate::framing::{encode_frame, FrameDecoder};
use crate::header::ConnectionHeader;
use crate::stats::{Stats, StatsCounters};
use abort_on_drop::ChildTask;
use ros1_core_types::{Error, MessageDefinitionResolver, Result, RosValue};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    AwaitingHeader,
    Streaming,
    Closed,
}

/// Local/remote endpoint description surfaced through `getBusInfo`
#[derive(Clone, Debug)]
pub struct TransportInfo {
    pub local_addr: Option<SocketAddr>,
    pub remote_addr: SocketAddr,
}

#[derive(Clone, Debug)]
pub enum PublisherConnectionEvent {
    Header(ConnectionHeader),
    Message { value: RosValue, raw: Vec<u8> },
    Error(String),
}

struct Shared {
    state: std::sync::Mutex<ConnectionState>,
    stats: StatsCounters,
    transport: std::sync::Mutex<Option<TransportInfo>>,
    /// The publisher's own `callerid`, learned from its response header;
    /// `None` until the handshake completes (`getBusInfo`'s destination
    /// column).
    peer_caller_id: std::sync::Mutex<Option<String>>,
}

/// A subscriber-side session to one remote publisher for one topic. Owns a
/// background task that runs the connect/handshake/stream/reconnect loop
/// until `close()` is called or the process exits.
pub struct PublisherConnection {
    shared: Arc<Shared>,
    events: broadcast::Sender<PublisherConnectionEvent>,
    cancel: CancelToken,
    request_header: ConnectionHeader,
    remote_addr: SocketAddr,
    _task: std::sync::Mutex<Option<ChildTask<()>>>,
    closed: Arc<AtomicBool>,
    backoff: BackoffConfig,
}

impl PublisherConnection {
    /// Builds a connection in the `Idle` state. Call `start()` to begin
    /// connecting.
    pub fn new(remote_addr: SocketAddr, request_header: ConnectionHeader) -> Self {
        let (events, _rx) = broadcast::channel(64);
        Self {
            shared: Arc::new(Shared {
                state: std::sync::Mutex::new(ConnectionState::Idle),
                stats: StatsCounters::new(true),
                transport: std::sync::Mutex::new(None),
                peer_caller_id: std::sync::Mutex::new(None),
            }),
            events,
            cancel: CancelToken::new(),
            request_header,
            remote_addr,
            _task: std::sync::Mutex::new(None),
            closed: Arc::new(AtomicBool::new(false)),
            backoff: BackoffConfig::default(),
        }
    }

    /// Overrides the reconnect backoff config; must be called before
    /// `start()`. Exists so tests can exercise the reconnect path without
    /// waiting out the real default cap
    pub fn with_backoff_config(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PublisherConnectionEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.lock().unwrap()
    }

    pub fn connected(&self) -> bool {
        self.state() == ConnectionState::Streaming
    }

    pub fn stats(&self) -> Stats {
        self.shared.stats.snapshot()
    }

    pub fn header(&self) -> &ConnectionHeader {
        &self.request_header
    }

    pub fn peer_caller_id(&self) -> Option<String> {
        self.shared.peer_caller_id.lock().unwrap().clone()
    }

    pub fn transport_info(&self) -> Option<TransportInfo> {
        self.shared.transport.lock().unwrap().clone()
    }

    /// Spawns the background connect/stream/reconnect loop. `resolver` is
    /// consulted once per successful handshake to obtain a reader bound to
    /// the peer's `message_definition` text
    pub fn start(&self, resolver: Arc<dyn MessageDefinitionResolver>) {
        let shared = self.shared.clone();
        let events = self.events.clone();
        let cancel = self.cancel.clone();
        let request_header = self.request_header.clone();
        let remote_addr = self.remote_addr;
        let closed = self.closed.clone();
        let cfg = self.backoff;

        let task = tokio::spawn(async move {
            set_state(&shared, ConnectionState::Connecting);
            loop {
                if cancel.is_cancelled() {
                    set_state(&shared, ConnectionState::Closed);
                    return;
                }
                let connected = retry_forever(cfg, &cancel, |_retries| {
                    let remote_addr = remote_addr;
                    async move { TcpStream::connect(remote_addr).await }
                })
                .await;

                let Some(mut stream) = connected else {
                    set_state(&shared, ConnectionState::Closed);
                    return;
                };

                *shared.transport.lock().unwrap() = Some(TransportInfo {
                    local_addr: stream.local_addr().ok(),
                    remote_addr,
                });

                set_state(&shared, ConnectionState::AwaitingHeader);
                let session_result = run_session(
                    &shared,
                    &events,
                    &cancel,
                    &mut stream,
                    &request_header,
                    resolver.as_ref(),
                )
                .await;

                if cancel.is_cancelled() || closed.load(Ordering::SeqCst) {
                    set_state(&shared, ConnectionState::Closed);
                    return;
                }

                if let Err(err) = session_result {
                    let _ = events.send(PublisherConnectionEvent::Error(err.to_string()));
                }
                set_state(&shared, ConnectionState::Connecting);
            }
        });

        *self._task.lock().unwrap() = Some(ChildTask::from(task));
    }

    /// Transitions to `Closed` permanently; the background task, if any,
    /// stops reconnecting.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.cancel.cancel();
        set_state(&self.shared, ConnectionState::Closed);
    }
}

fn set_state(shared: &Shared, state: ConnectionState) {
    *shared.state.lock().unwrap() = state;
}

/// Runs one handshake + streaming session to completion (until the socket
/// closes or errors); returns the error that ended it, if any.
async fn run_session(
    shared: &Shared,
    events: &broadcast::Sender<PublisherConnectionEvent>,
    cancel: &CancelToken,
    stream: &mut TcpStream,
    request_header: &ConnectionHeader,
    resolver: &dyn MessageDefinitionResolver,
) -> Result<()> {
    let request_bytes = request_header.encode();
    stream.write_all(&request_bytes).await?;
    shared.stats.record_sent_bytes(request_bytes.len() as u64);

    let mut decoder = FrameDecoder::new();
    let mut read_buf = [0u8; 8192];

    // AwaitingHeader: read frames until we get at least one (the response
    // header). A publisher that writes its response header immediately
    // followed by a latched payload -- exactly what `SubscriberConnection`
    // does -- can coalesce both into this same chunk on loopback, so any
    // frames after the first must be carried forward rather than dropped.
    let (response_header, leftover_frames) = loop {
        let n = tokio::select! {
            n = stream.read(&mut read_buf) => n?,
            _ = cancel.cancelled() => return Ok(()),
        };
        if n == 0 {
            return Err(Error::Disconnected);
        }
        shared.stats.record_received_bytes(n as u64);
        let mut frames = decoder
            .feed(&read_buf[..n])
            .map_err(|e| Error::SerializationError(e.to_string()))?
            .into_iter();
        if let Some(first) = frames.next() {
            break (ConnectionHeader::decode(&first), frames.collect::<Vec<_>>());
        }
    };

    let msg_def_text = response_header.get("message_definition");
    let data_type = response_header.get("type").unwrap_or_default();
    let resolved = resolver.resolve(data_type, msg_def_text)?;

    if let Some(caller_id) = response_header.get("callerid") {
        *shared.peer_caller_id.lock().unwrap() = Some(caller_id.to_string());
    }

    set_state(shared, ConnectionState::Streaming);
    let _ = events.send(PublisherConnectionEvent::Header(response_header));

    for raw in leftover_frames {
        match (resolved.reader)(&raw) {
            Ok(value) => {
                shared.stats.record_message_received();
                let _ = events.send(PublisherConnectionEvent::Message { value, raw });
            }
            Err(e) => {
                let _ = events.send(PublisherConnectionEvent::Error(e.to_string()));
            }
        }
    }

    loop {
        let n = tokio::select! {
            n = stream.read(&mut read_buf) => n?,
            _ = cancel.cancelled() => return Ok(()),
        };
        if n == 0 {
            return Err(Error::Disconnected);
        }
        shared.stats.record_received_bytes(n as u64);
        let frames = match decoder.feed(&read_buf[..n]) {
            Ok(frames) => frames,
            Err(e) => return Err(Error::SerializationError(e.to_string())),
        };
        for raw in frames {
            match (resolved.reader)(&raw) {
                Ok(value) => {
                    shared.stats.record_message_received();
                    let _ = events.send(PublisherConnectionEvent::Message { value, raw });
                }
                Err(e) => {
                    let _ = events.send(PublisherConnectionEvent::Error(e.to_string()));
                }
            }
        }
    }
}

/// Frame-encodes a request header directly, for tests and callers that
/// want the raw bytes without constructing a full connection.
pub fn encode_request(header: &ConnectionHeader) -> Vec<u8> {
    encode_frame(&header.encode())
}

#[cfg(test)]
mod test {
    use super::*;
    use ros1_core_types::ResolvedType;
    use std::sync::Arc;
    use tokio::net::TcpListener;

    struct EchoResolver;
    impl MessageDefinitionResolver for EchoResolver {
        fn resolve(&self, _data_type: &str, _definition_text: Option<&str>) -> Result<ResolvedType> {
            Ok(ResolvedType {
                md5sum: "*".into(),
                definition_text: String::new(),
                reader: Arc::new(|bytes: &[u8]| Ok(RosValue::Bytes(bytes.to_vec()))),
                writer: Arc::new(|_v: &RosValue| Ok(Vec::new())),
            })
        }
    }

    #[tokio::test]
    async fn handshake_then_one_message_yields_header_then_message_events() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = sock.read(&mut buf).await.unwrap();
            let _request = &buf[..n]; // request header, ignored by this fake publisher
            let response = ConnectionHeader::response("/talker", false, "*", "", "/chatter", "std_msgs/Bool");
            sock.write_all(&response.encode()).await.unwrap();
            sock.write_all(&encode_frame(&[0x01])).await.unwrap();
        });

        let request = ConnectionHeader::request("/chatter", "*", "/listener", "std_msgs/Bool", true);
        let conn = PublisherConnection::new(addr, request);
        let mut rx = conn.subscribe();
        conn.start(Arc::new(EchoResolver));

        let first = tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(first, PublisherConnectionEvent::Header(_)));

        let second = tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match second {
            PublisherConnectionEvent::Message { raw, .. } => assert_eq!(raw, vec![0x01]),
            other => panic!("expected Message, got {other:?}"),
        }

        conn.close();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn close_stops_the_reconnect_loop() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener); // nothing listening; connect attempts will fail and retry

        let request = ConnectionHeader::request("/t", "*", "/c", "std_msgs/Bool", false);
        let conn = PublisherConnection::new(addr, request);
        conn.start(Arc::new(EchoResolver));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        conn.close();
        assert_eq!(conn.state(), ConnectionState::Closed);
    }
}
