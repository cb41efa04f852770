//! Component F: the `Node` runtime that owns publications and
//! subscriptions, talks to the master, and reacts to pushed updates
//!

pub mod actor;
pub mod follower;
pub mod hostname;
pub mod master_client;
pub mod param_client;

use crate::backoff::{retry_forever, BackoffConfig, CancelToken};
use crate::header::ConnectionHeader;
use crate::publication::{Publication, PublicationInfo};
use crate::subscriber_connection::SubscriberConnection;
use crate::subscription::Subscription;
use actor::NodeServerHandle;
use async_trait::async_trait;
use follower::{FollowerRpcTransport, RpcReply};
use log::{debug, error, info, warn};
use master_client::MasterClient;
use param_client::ParamClient;
use ros1_core_types::{Error, MessageDefinitionResolver, Name, Result};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Mutex, RwLock};

/// Events raised by follower-RPC-driven activity that has no more natural
/// home (param pushes from the master's `paramUpdate` call).
#[derive(Clone, Debug)]
pub enum NodeEvent {
    ParamUpdate {
        key: String,
        previous: Option<serde_xmlrpc::Value>,
        new: serde_xmlrpc::Value,
    },
}

struct SubscriptionRegistration {
    cancel: CancelToken,
}

pub struct Node {
    caller_id: Name,
    pid: u32,
    master: Arc<dyn MasterClient>,
    param_client: Arc<dyn ParamClient>,
    resolver: Arc<dyn MessageDefinitionResolver>,
    handle: NodeServerHandle,
    /// The IP the follower server and (later) the TCP listener bind to;
    /// known before either is bound, so it lives outside the two
    /// interior-mutable cells below.
    bind_ip: IpAddr,
    hostname: String,
    /// `caller_api`/`follower_addr` both depend on the follower server's
    /// bound port, which is only known once `start()` has actually bound
    /// it -- but the follower server itself needs a stable
    /// `Arc<dyn FollowerRpcTransport>` pointing at *this* node before that
    /// bind happens. Rather than constructing two divergent `Node`s (one
    /// live behind the follower server, one returned to the caller), these
    /// fields are set exactly once, after the bind, on the single `Node`
    /// both sides share.
    caller_api: std::sync::OnceLock<String>,
    follower_addr: std::sync::OnceLock<SocketAddr>,
    _follower_task: Mutex<Option<abort_on_drop::ChildTask<()>>>,
    tcp_listener: Mutex<Option<(Arc<TcpListener>, abort_on_drop::ChildTask<()>)>>,
    param_cache: RwLock<HashMap<String, serde_xmlrpc::Value>>,
    registrations: Mutex<HashMap<String, SubscriptionRegistration>>,
    stopped: Arc<AtomicBool>,
    events: broadcast::Sender<NodeEvent>,
    /// Set once, immediately after `Arc::new` in `start()`, so methods that
    /// take `&self` can still obtain an `Arc<Self>` to hand to spawned
    /// tasks (`publisherUpdate`'s follower-RPC dispatch, in particular,
    /// only has `&self` to work with). Observational only -- it never
    /// keeps the node alive past its last real owner
    self_weak: std::sync::OnceLock<std::sync::Weak<Node>>,
}

impl Node {
    /// Starts a node against a live XML-RPC master: binds the follower
    /// XML-RPC server, computes `caller_api`, but does not yet bind any
    /// inbound TCP listener (that happens lazily on first `advertise`).
    pub async fn start(
        caller_id: Name,
        master_uri: impl Into<String>,
        hostname: Option<String>,
        resolver: Arc<dyn MessageDefinitionResolver>,
    ) -> Result<Arc<Self>> {
        let master_uri = master_uri.into();
        Self::start_with_clients(
            caller_id,
            Arc::new(master_client::XmlRpcMasterClient::new(master_uri.clone())),
            Arc::new(param_client::XmlRpcParamClient::new(master_uri)),
            hostname,
            resolver,
        )
        .await
    }

    /// Starts a node against injected master/param clients -- the seam
    /// `tests/seed_cases.rs` uses to run the node against an in-process
    /// fake master instead of a live XML-RPC one
    pub async fn start_with_clients(
        caller_id: Name,
        master: Arc<dyn MasterClient>,
        param_client: Arc<dyn ParamClient>,
        hostname: Option<String>,
        resolver: Arc<dyn MessageDefinitionResolver>,
    ) -> Result<Arc<Self>> {
        let hostname = hostname.unwrap_or_else(hostname::resolve_hostname);
        let bind_ip: IpAddr = hostname.parse().unwrap_or(IpAddr::from([0, 0, 0, 0]));

        let node = Arc::new(Self {
            caller_id,
            pid: std::process::id(),
            master,
            param_client,
            resolver,
            handle: NodeServerHandle::spawn(),
            bind_ip,
            hostname: hostname.clone(),
            caller_api: std::sync::OnceLock::new(),
            follower_addr: std::sync::OnceLock::new(),
            _follower_task: Mutex::new(None),
            tcp_listener: Mutex::new(None),
            param_cache: RwLock::new(HashMap::new()),
            registrations: Mutex::new(HashMap::new()),
            stopped: Arc::new(AtomicBool::new(false)),
            events: broadcast::channel(256).0,
            self_weak: std::sync::OnceLock::new(),
        });
        let _ = node.self_weak.set(Arc::downgrade(&node));

        // The follower server needs a stable `Arc<dyn FollowerRpcTransport>`
        // pointing at this exact node before its bound port (and thus
        // `caller_api`) is known; `caller_api`/`follower_addr` are filled in
        // on this same `Arc` immediately after, so there is only ever one
        // live `Node` -- never a second, divergent one.
        let (follower_addr, follower_task) =
            follower::serve(SocketAddr::new(bind_ip, 0), node.clone() as Arc<dyn FollowerRpcTransport>)
                .await
                .map_err(Error::from)?;

        let _ = node.follower_addr.set(follower_addr);
        let _ = node
            .caller_api
            .set(format!("http://{hostname}:{}/", follower_addr.port()));
        *node._follower_task.lock().await = Some(follower_task);

        Ok(node)
    }

    pub fn caller_id(&self) -> &Name {
        &self.caller_id
    }

    pub fn caller_api(&self) -> &str {
        self.caller_api.get().map(String::as_str).unwrap_or("")
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<NodeEvent> {
        self.events.subscribe()
    }

    async fn ensure_listener(&self) -> Result<u16> {
        let mut guard = self.tcp_listener.lock().await;
        if let Some((listener, _)) = guard.as_ref() {
            return Ok(listener.local_addr()?.port());
        }
        let bind_addr = SocketAddr::new(self.bind_ip, 0);
        let listener = Arc::new(TcpListener::bind(bind_addr).await?);
        let port = listener.local_addr()?.port();

        let accept_listener = listener.clone();
        let handle = self.handle.clone();
        let stopped = self.stopped.clone();
        let task = tokio::spawn(async move {
            loop {
                let (stream, peer) = match accept_listener.accept().await {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!("inbound tcpros accept failed: {e}");
                        continue;
                    }
                };
                if stopped.load(Ordering::SeqCst) {
                    return;
                }
                let handle = handle.clone();
                tokio::spawn(async move {
                    accept_subscriber(stream, peer, handle).await;
                });
            }
        });

        *guard = Some((listener, abort_on_drop::ChildTask::from(task)));
        Ok(port)
    }

    /// `advertise(topic, dataType, latching?, messageDefinitionText?,
    /// md5sum?)`: idempotent, fatal-on-master-failure
    pub async fn advertise(
        &self,
        topic: &str,
        data_type: &str,
        latching: bool,
        message_definition_text: Option<&str>,
        md5sum: Option<&str>,
    ) -> Result<Arc<Publication>> {
        let name = Name::new(topic)?;
        if let Some(existing) = self.handle.get_publication(name.as_str()).await {
            return Ok(existing);
        }

        let port = self.ensure_listener().await?;
        let resolved = self.resolver.resolve(data_type, message_definition_text)?;

        let info = PublicationInfo {
            topic: name.as_str().to_string(),
            data_type: data_type.to_string(),
            md5sum: md5sum.map(String::from).unwrap_or_else(|| resolved.md5sum.clone()),
            latching,
            message_definition: message_definition_text
                .map(String::from)
                .unwrap_or_else(|| resolved.definition_text.clone()),
            caller_id: self.caller_id.as_str().to_string(),
        };

        let publication = Arc::new(Publication::new(info, resolved));
        self.handle
            .insert_publication(name.as_str().to_string(), publication.clone())
            .await;

        // Master failure is fatal to this call; the publication is left
        // registered locally (a documented dangling-publication tradeoff).
        self.master
            .register_publisher(self.caller_id.as_str(), name.as_str(), data_type, self.caller_api())
            .await?;

        let _ = port;
        Ok(publication)
    }

    /// `unadvertise(topic)`: closes and removes the publication; the
    /// master unregister call is fire-and-forget
    pub async fn unadvertise(&self, topic: &str) {
        let Some(publication) = self.handle.remove_publication(topic).await else {
            return;
        };
        publication.close().await;

        let master = self.master.clone();
        let caller_id = self.caller_id.as_str().to_string();
        let caller_api = self.caller_api().to_string();
        let topic = topic.to_string();
        tokio::spawn(async move {
            if let Err(e) = master.unregister_publisher(&caller_id, &topic, &caller_api).await {
                warn!("unregisterPublisher({topic}) failed: {e}");
            }
        });
    }

    /// `subscribe(topic, dataType, md5sum?, tcp_nodelay?)`: idempotent;
    /// registration with the master, and each resulting
    /// `_subscribe_to_publisher`, run in the background
    pub async fn subscribe(
        &self,
        topic: &str,
        data_type: &str,
        md5sum: Option<&str>,
        tcp_nodelay: bool,
    ) -> Result<Arc<Subscription>> {
        let name = Name::new(topic)?;
        if let Some(existing) = self.handle.get_subscription(name.as_str()).await {
            return Ok(existing);
        }

        let subscription = Arc::new(Subscription::new(
            name.as_str().to_string(),
            data_type.to_string(),
            md5sum.unwrap_or("*").to_string(),
            tcp_nodelay,
        ));
        self.handle
            .insert_subscription(name.as_str().to_string(), subscription.clone())
            .await;

        let cancel = CancelToken::new();
        self.registrations.lock().await.insert(
            name.as_str().to_string(),
            SubscriptionRegistration { cancel: cancel.clone() },
        );

        let master = self.master.clone();
        let caller_id = self.caller_id.as_str().to_string();
        let caller_api = self.caller_api().to_string();
        let topic_owned = name.as_str().to_string();
        let data_type_owned = data_type.to_string();
        let subscription_weak = Arc::downgrade(&subscription);
        let node_for_task = self.self_ref();

        tokio::spawn(async move {
            let cfg = BackoffConfig::default();
            let result = retry_forever(cfg, &cancel, |_retries| {
                let master = master.clone();
                let caller_id = caller_id.clone();
                let topic_owned = topic_owned.clone();
                let data_type_owned = data_type_owned.clone();
                let caller_api = caller_api.clone();
                async move {
                    master
                        .register_subscriber(&caller_id, &topic_owned, &data_type_owned, &caller_api)
                        .await
                }
            })
            .await;

            let Some(publisher_urls) = result else {
                return; // cancelled (unsubscribed before registration completed)
            };

            if subscription_weak.upgrade().is_none() {
                return; // torn down meanwhile
            }

            if let Some(node) = node_for_task {
                for url in publisher_urls {
                    let node = node.clone();
                    let topic_owned = topic_owned.clone();
                    tokio::spawn(async move {
                        node.subscribe_to_publisher(&url, &topic_owned).await;
                    });
                }
            }
        });

        Ok(subscription)
    }

    /// `unsubscribe(topic)`: cancels any in-flight registration, closes
    /// the subscription, fires-and-forgets `unregisterSubscriber`.
    pub async fn unsubscribe(&self, topic: &str) {
        if let Some(reg) = self.registrations.lock().await.remove(topic) {
            reg.cancel.cancel();
        }
        let Some(subscription) = self.handle.remove_subscription(topic).await else {
            return;
        };
        subscription.close().await;

        let master = self.master.clone();
        let caller_id = self.caller_id.as_str().to_string();
        let caller_api = self.caller_api().to_string();
        let topic = topic.to_string();
        tokio::spawn(async move {
            if let Err(e) = master.unregister_subscriber(&caller_id, &topic, &caller_api).await {
                warn!("unregisterSubscriber({topic}) failed: {e}");
            }
        });
    }

    /// `_subscribe_to_publisher(pubUrl, subscription)`
    async fn subscribe_to_publisher(self: Arc<Self>, publisher_url: &str, topic: &str) {
        let Some(subscription) = self.handle.get_subscription(topic).await else {
            return; // torn down meanwhile
        };

        let (addr, port) = match request_topic(publisher_url, self.caller_id.as_str(), topic).await {
            Ok(endpoint) => endpoint,
            Err(e) => {
                warn!("requestTopic({topic}) to {publisher_url} failed, abandoning: {e}");
                return;
            }
        };

        // Re-check liveness: the subscription may have been torn down
        // while the requestTopic RPC was in flight.
        if self.handle.get_subscription(topic).await.is_none() {
            return;
        }

        let socket_addr = match tokio::net::lookup_host((addr.as_str(), port)).await {
            Ok(mut addrs) => match addrs.next() {
                Some(a) => a,
                None => {
                    warn!("could not resolve publisher endpoint {addr}:{port}");
                    return;
                }
            },
            Err(e) => {
                warn!("could not resolve publisher endpoint {addr}:{port}: {e}");
                return;
            }
        };

        let request_header = ConnectionHeader::request(
            topic,
            subscription.md5sum(),
            self.caller_id.as_str(),
            subscription.data_type(),
            subscription.tcp_nodelay(),
        );

        let id = self.handle.next_connection_id().await;
        let connection = Arc::new(crate::publisher_connection::PublisherConnection::new(
            socket_addr,
            request_header,
        ));
        subscription.attach(id, publisher_url.to_string(), connection.clone()).await;
        connection.start(self.resolver.clone());
    }

    /// `publisherUpdate(topic, newPublishers, callerId)`: diffs against
    /// the current publisher set and reacts
    pub async fn publisher_update(self: Arc<Self>, topic: &str, new_publishers: Vec<String>) {
        let Some(subscription) = self.handle.get_subscription(topic).await else {
            return;
        };
        let current: std::collections::HashSet<String> = subscription.publisher_urls().await.into_iter().collect();
        let incoming: std::collections::HashSet<String> = new_publishers.into_iter().collect();

        for gone in current.difference(&incoming) {
            subscription.detach_by_publisher_url(gone).await;
        }
        for new_url in incoming.difference(&current) {
            let node = self.clone();
            let new_url = new_url.clone();
            let topic = topic.to_string();
            tokio::spawn(async move {
                node.subscribe_to_publisher(&new_url, &topic).await;
            });
        }
    }

    /// `paramUpdate(key, value, callerId)`
    pub async fn param_update(&self, key: &str, value: serde_xmlrpc::Value) {
        let normalized = normalize_param_key(key);
        let previous = self.param_cache.write().await.insert(normalized.clone(), value.clone());
        let _ = self.events.send(NodeEvent::ParamUpdate { key: normalized, previous, new: value });
    }

    /// `setParameter(k, v)`: writes through the master, then locally
    /// replays the `paramUpdate` path (the master does not echo our own
    /// writes back to us).
    pub async fn set_parameter(&self, key: &str, value: serde_xmlrpc::Value) -> Result<()> {
        self.param_client.set_param(self.caller_id.as_str(), key, value.clone()).await?;
        self.param_update(key, value).await;
        Ok(())
    }

    pub async fn subscribe_param(&self, key: &str) -> Result<Option<serde_xmlrpc::Value>> {
        let value = self
            .param_client
            .subscribe_param(self.caller_id.as_str(), self.caller_api(), key)
            .await?;
        if let Some(value) = &value {
            self.param_update(key, value.clone()).await;
        }
        Ok(value)
    }

    pub async fn unsubscribe_param(&self, key: &str) -> Result<()> {
        self.param_client
            .unsubscribe_param(self.caller_id.as_str(), self.caller_api(), key)
            .await
    }

    /// Fetches the server's full key list, subscribes to any we don't
    /// already know, and drops local cache entries it no longer knows
    /// about Per-key failures are logged and do not abort
    /// the rest.
    pub async fn subscribe_all_params(&self) -> Result<()> {
        let server_keys: std::collections::HashSet<String> =
            self.param_client.get_param_names(self.caller_id.as_str()).await?.into_iter().collect();

        let local_keys: Vec<String> = self.param_cache.read().await.keys().cloned().collect();
        for stale in local_keys.iter().filter(|k| !server_keys.contains(*k)) {
            self.param_cache.write().await.remove(stale);
        }

        for key in server_keys {
            if self.param_cache.read().await.contains_key(&key) {
                continue;
            }
            if let Err(e) = self.subscribe_param(&key).await {
                warn!("subscribeParam({key}) failed: {e}");
            }
        }
        Ok(())
    }

    pub async fn unsubscribe_all_params(&self) -> Result<()> {
        let keys: Vec<String> = self.param_cache.read().await.keys().cloned().collect();
        for key in keys {
            if let Err(e) = self.unsubscribe_param(&key).await {
                warn!("unsubscribeParam({key}) failed: {e}");
            }
        }
        Ok(())
    }

    /// Marks the node stopped, unsubscribes all parameters (best-effort),
    /// closes every publication and subscription, and stops the follower
    /// server. Every exit path closes unconditionally
    pub async fn shutdown(&self) {
        self.stopped.store(true, Ordering::SeqCst);

        for reg in self.registrations.lock().await.drain() {
            reg.1.cancel.cancel();
        }

        if let Err(e) = self.unsubscribe_all_params().await {
            warn!("unsubscribe_all_params during shutdown failed: {e}");
        }

        let (pubs, subs) = self.handle.drain_all().await;
        for publication in pubs {
            publication.close().await;
        }
        for subscription in subs {
            subscription.close().await;
        }

        if let Some((_listener, task)) = self.tcp_listener.lock().await.take() {
            drop(task);
        }
        info!("node {} shut down", self.caller_id);
    }

    /// `(topic, dataType)` for every currently advertised publication, for
    /// introspection callers that don't need a live `Arc<Publication>`.
    pub async fn publications(&self) -> Vec<(String, String)> {
        self.handle.list_publications().await
    }

    /// `(topic, dataType)` for every currently active subscription.
    pub async fn subscriptions(&self) -> Vec<(String, String)> {
        self.handle.list_subscriptions().await
    }

    /// Upgrades the weak self-reference set in `start()`. `None` only if
    /// every `Arc<Node>` owner has already been dropped.
    fn self_ref(&self) -> Option<Arc<Self>> {
        self.self_weak.get()?.upgrade()
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        if !self.stopped.load(Ordering::SeqCst) {
            debug!("dropping node {} without an explicit shutdown()", self.caller_id);
        }
    }
}

fn normalize_param_key(key: &str) -> String {
    if key.len() > 1 && key.ends_with('/') {
        key.trim_end_matches('/').to_string()
    } else {
        key.to_string()
    }
}

async fn accept_subscriber(stream: TcpStream, peer: SocketAddr, handle: NodeServerHandle) {
    let lookup_handle = handle.clone();
    let result = SubscriberConnection::accept(stream, move |topic| {
        let handle = lookup_handle.clone();
        async move {
            let publication = handle.get_publication(&topic).await?;
            Some(publication.snapshot().await)
        }
    })
    .await;

    let (connection, topic) = match result {
        Ok(pair) => pair,
        Err(e) => {
            debug!("rejected inbound tcpros connection from {peer}: {e}");
            return;
        }
    };

    if let Some(publication) = handle.get_publication(&topic).await {
        let id = handle.next_connection_id().await;
        publication.attach(id, Arc::new(connection)).await;
    }
}

/// `requestTopic` client call to a peer's follower XML-RPC server.
async fn request_topic(follower_url: &str, caller_id: &str, topic: &str) -> Result<(String, u16)> {
    let http = reqwest::Client::new();
    let body = serde_xmlrpc::request_to_string(
        "requestTopic",
        vec![
            caller_id.into(),
            topic.into(),
            serde_xmlrpc::Value::Array(vec![serde_xmlrpc::Value::Array(vec!["TCPROS".into()])]),
        ],
    )
    .map_err(|e| Error::SerializationError(e.to_string()))?;

    let response = http
        .post(follower_url)
        .body(body)
        .send()
        .await
        .map_err(|e| Error::ServerError(e.to_string()))?;
    let text = response.text().await.map_err(|e| Error::ServerError(e.to_string()))?;

    let (code, status_message, (protocol, host, port)) =
        serde_xmlrpc::response_from_str::<(i32, String, (String, String, u16))>(&text)
            .map_err(|e| Error::SerializationError(e.to_string()))?;

    if code != 1 {
        return Err(Error::ServerError(format!("requestTopic failed ({code}): {status_message}")));
    }
    if protocol != "TCPROS" {
        return Err(Error::ServerError(format!("unsupported protocol {protocol}")));
    }
    Ok((host, port))
}

#[async_trait]
impl FollowerRpcTransport for Node {
    async fn get_bus_stats(&self, _caller_id: &str) -> RpcReply {
        // Service slot is always empty: service calls are a non-goal
        //
        let mut publish_stats = Vec::new();
        for publication in self.handle.all_publications().await {
            let topic = publication.info().topic.clone();
            let mut conns = Vec::new();
            let mut bytes_sent_total = 0u64;
            for (id, stats, _peer_id, _peer_addr, connected) in publication.connection_stats().await {
                bytes_sent_total += stats.bytes_sent;
                conns.push(serde_xmlrpc::Value::Array(vec![
                    (id as i32).into(),
                    (stats.bytes_sent as i32).into(),
                    (stats.messages_sent as i32).into(),
                    connected.into(),
                ]));
            }
            publish_stats.push(serde_xmlrpc::Value::Array(vec![
                topic.into(),
                (bytes_sent_total as i32).into(),
                serde_xmlrpc::Value::Array(conns),
            ]));
        }

        let mut subscribe_stats = Vec::new();
        for subscription in self.handle.all_subscriptions().await {
            let topic = subscription.topic().to_string();
            let conns = subscription
                .connection_details()
                .await
                .into_iter()
                .map(|(id, stats, _transport, _peer_id, connected)| {
                    serde_xmlrpc::Value::Array(vec![
                        (id as i32).into(),
                        (stats.bytes_received as i32).into(),
                        (stats.dropped_estimate as i32).into(),
                        connected.into(),
                    ])
                })
                .collect();
            subscribe_stats
                .push(serde_xmlrpc::Value::Array(vec![topic.into(), serde_xmlrpc::Value::Array(conns)]));
        }

        RpcReply::ok(
            "",
            serde_xmlrpc::Value::Array(vec![
                serde_xmlrpc::Value::Array(publish_stats),
                serde_xmlrpc::Value::Array(subscribe_stats),
                serde_xmlrpc::Value::Array(Vec::new()),
            ]),
        )
    }

    /// Flattens every publication's and subscription's connections into
    /// one `busInfo` list: `(connectionId, destinationId, direction,
    /// transport, topic, connected)` per entry, matching the shape
    /// `rosnode info` expects
    async fn get_bus_info(&self, _caller_id: &str) -> RpcReply {
        let mut entries = Vec::new();

        for publication in self.handle.all_publications().await {
            let topic = publication.info().topic.clone();
            for (id, _stats, peer_id, peer_addr, connected) in publication.connection_stats().await {
                let destination = if peer_id.is_empty() { peer_addr.to_string() } else { peer_id };
                entries.push(serde_xmlrpc::Value::Array(vec![
                    (id as i32).into(),
                    destination.into(),
                    "o".into(),
                    "TCPROS".into(),
                    topic.clone().into(),
                    connected.into(),
                ]));
            }
        }

        for subscription in self.handle.all_subscriptions().await {
            let topic = subscription.topic().to_string();
            for (id, _stats, transport, peer_id, connected) in subscription.connection_details().await {
                let destination = peer_id.unwrap_or_else(|| {
                    transport
                        .map(|t| t.remote_addr.to_string())
                        .unwrap_or_else(|| "?".to_string())
                });
                entries.push(serde_xmlrpc::Value::Array(vec![
                    (id as i32).into(),
                    destination.into(),
                    "i".into(),
                    "TCPROS".into(),
                    topic.clone().into(),
                    connected.into(),
                ]));
            }
        }

        RpcReply::ok("", serde_xmlrpc::Value::Array(entries))
    }

    async fn shutdown(&self, caller_id: &str, message: Option<String>) -> RpcReply {
        info!("shutdown requested by {caller_id}: {}", message.unwrap_or_default());
        if let Some(node) = self.self_ref() {
            tokio::spawn(async move {
                node.shutdown().await;
            });
        }
        RpcReply::ok("", 0i32.into())
    }

    async fn get_pid(&self, _caller_id: &str) -> RpcReply {
        RpcReply::ok("", (self.pid as i32).into())
    }

    async fn get_subscriptions(&self, _caller_id: &str) -> RpcReply {
        let subs = self.handle.list_subscriptions().await;
        let value = serde_xmlrpc::Value::Array(
            subs.into_iter()
                .map(|(topic, ty)| serde_xmlrpc::Value::Array(vec![topic.into(), ty.into()]))
                .collect(),
        );
        RpcReply::ok("", value)
    }

    async fn get_publications(&self, _caller_id: &str) -> RpcReply {
        let pubs = self.handle.list_publications().await;
        let value = serde_xmlrpc::Value::Array(
            pubs.into_iter()
                .map(|(topic, ty)| serde_xmlrpc::Value::Array(vec![topic.into(), ty.into()]))
                .collect(),
        );
        RpcReply::ok("", value)
    }

    async fn param_update(&self, _caller_id: &str, key: &str, value: serde_xmlrpc::Value) -> RpcReply {
        Node::param_update(self, key, value).await;
        RpcReply::ok("", 1i32.into())
    }

    async fn publisher_update(&self, _caller_id: &str, topic: &str, publishers: Vec<String>) -> RpcReply {
        // The diff/reconnect logic needs `Arc<Self>` to spawn further
        // `_subscribe_to_publisher` tasks; `self_ref()` upgrades the weak
        // self-reference stashed in `start()` to get one.
        let Some(node) = self.self_ref() else {
            return RpcReply::error("node is shutting down");
        };
        node.publisher_update(topic, publishers).await;
        RpcReply::ok("", 1i32.into())
    }

    async fn request_topic(
        &self,
        _caller_id: &str,
        topic: &str,
        protocols: Vec<Vec<String>>,
        local_http_addr: SocketAddr,
    ) -> RpcReply {
        let Some(publication) = self.handle.get_publication(topic).await else {
            return RpcReply::error(format!("topic {topic} is not published"));
        };

        let wants_tcpros = protocols
            .iter()
            .any(|p| p.first().map(|s| s == "TCPROS").unwrap_or(false));
        if !wants_tcpros {
            return RpcReply::error("unsupported protocol");
        }

        let listener_port = match self.tcp_listener.lock().await.as_ref() {
            Some((listener, _)) => match listener.local_addr() {
                Ok(addr) => addr.port(),
                Err(e) => return RpcReply::error(format!("listener address unavailable: {e}")),
            },
            None => return RpcReply::error("cannot receive incoming connections"),
        };

        // Echo the local address of the HTTP socket that received this
        // very RPC, paired with the TCP listener's (not the HTTP
        // server's) port -- so the caller reaches us on the same route
        // it already used
        let _ = publication;
        RpcReply::ok(
            "",
            serde_xmlrpc::Value::Array(vec![
                "TCPROS".into(),
                local_http_addr.ip().to_string().into(),
                (listener_port as i32).into(),
            ]),
        )
    }
}
