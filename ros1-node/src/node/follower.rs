//! Component G: the follower XML-RPC surface other nodes and the master
//! call on us

use async_trait::async_trait;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server};
use log::{error, warn};
use std::convert::Infallible;
use std::net::SocketAddr;

/// `(code, statusMessage, value)` -- the convention every follower and
/// master RPC method follows `code == 1` is success.
#[derive(Clone, Debug)]
pub struct RpcReply {
    pub code: i32,
    pub message: String,
    pub value: serde_xmlrpc::Value,
}

impl RpcReply {
    pub fn ok(message: impl Into<String>, value: serde_xmlrpc::Value) -> Self {
        Self {
            code: 1,
            message: message.into(),
            value,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            code: 0,
            message: message.into(),
            value: serde_xmlrpc::Value::Array(Vec::new()),
        }
    }
}

/// The nine methods a follower must answer
/// Implemented by the node runtime's actor handle; this trait is the
/// boundary that lets the hyper server below stay generic over it.
#[async_trait]
pub trait FollowerRpcTransport: Send + Sync {
    async fn get_bus_stats(&self, caller_id: &str) -> RpcReply;
    async fn get_bus_info(&self, caller_id: &str) -> RpcReply;
    async fn shutdown(&self, caller_id: &str, message: Option<String>) -> RpcReply;
    async fn get_pid(&self, caller_id: &str) -> RpcReply;
    async fn get_subscriptions(&self, caller_id: &str) -> RpcReply;
    async fn get_publications(&self, caller_id: &str) -> RpcReply;
    async fn param_update(&self, caller_id: &str, key: &str, value: serde_xmlrpc::Value) -> RpcReply;
    async fn publisher_update(&self, caller_id: &str, topic: &str, publishers: Vec<String>) -> RpcReply;
    /// `peer_addr` is the local address of the HTTP socket that received
    /// the RPC -- `requestTopic`'s policy echoes it back
    async fn request_topic(
        &self,
        caller_id: &str,
        topic: &str,
        protocols: Vec<Vec<String>>,
        local_http_addr: SocketAddr,
    ) -> RpcReply;
}

fn value_as_string(value: &serde_xmlrpc::Value) -> Option<String> {
    match value {
        serde_xmlrpc::Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

fn value_as_string_array(value: &serde_xmlrpc::Value) -> Option<Vec<String>> {
    match value {
        serde_xmlrpc::Value::Array(items) => items.iter().map(value_as_string).collect(),
        _ => None,
    }
}

fn value_as_protocol_list(value: &serde_xmlrpc::Value) -> Option<Vec<Vec<String>>> {
    match value {
        serde_xmlrpc::Value::Array(items) => items.iter().map(value_as_string_array).collect(),
        _ => None,
    }
}

/// Validates argument arity/types and dispatches to `transport`. All
/// argument validation happens before any side effect
pub async fn dispatch(
    method: &str,
    params: Vec<serde_xmlrpc::Value>,
    local_http_addr: SocketAddr,
    transport: &dyn FollowerRpcTransport,
) -> RpcReply {
    let caller_id = match params.first().and_then(value_as_string) {
        Some(c) => c,
        None => return RpcReply::error(format!("{method}: missing or non-string callerId")),
    };

    match method {
        "getBusStats" => transport.get_bus_stats(&caller_id).await,
        "getBusInfo" => transport.get_bus_info(&caller_id).await,
        "shutdown" => {
            let message = params.get(1).and_then(value_as_string);
            transport.shutdown(&caller_id, message).await
        }
        "getPid" => transport.get_pid(&caller_id).await,
        "getSubscriptions" => transport.get_subscriptions(&caller_id).await,
        "getPublications" => transport.get_publications(&caller_id).await,
        "paramUpdate" => {
            let (Some(key), Some(value)) = (
                params.get(1).and_then(value_as_string),
                params.get(2).cloned(),
            ) else {
                return RpcReply::error("paramUpdate: expected (caller, key, value)");
            };
            transport.param_update(&caller_id, &key, value).await
        }
        "publisherUpdate" => {
            let (Some(topic), Some(publishers)) = (
                params.get(1).and_then(value_as_string),
                params.get(2).and_then(value_as_string_array),
            ) else {
                return RpcReply::error("publisherUpdate: expected (caller, topic, publishers)");
            };
            transport.publisher_update(&caller_id, &topic, publishers).await
        }
        "requestTopic" => {
            let (Some(topic), Some(protocols)) = (
                params.get(1).and_then(value_as_string),
                params.get(2).and_then(value_as_protocol_list),
            ) else {
                return RpcReply::error("requestTopic: expected (caller, topic, protocols)");
            };
            transport
                .request_topic(&caller_id, &topic, protocols, local_http_addr)
                .await
        }
        other => RpcReply::error(format!("unknown method {other}")),
    }
}

async fn handle_request(
    req: Request<Body>,
    local_http_addr: SocketAddr,
    transport: std::sync::Arc<dyn FollowerRpcTransport>,
) -> Result<Response<Body>, Infallible> {
    let body = match hyper::body::to_bytes(req.into_body()).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("follower rpc: failed to read request body: {e}");
            return Ok(Response::builder().status(400).body(Body::empty()).unwrap());
        }
    };
    let body_str = String::from_utf8_lossy(&body);

    let (method, params) = match serde_xmlrpc::request_from_str(&body_str) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!("follower rpc: malformed xml-rpc request: {e}");
            return Ok(Response::builder().status(400).body(Body::empty()).unwrap());
        }
    };

    let reply = dispatch(&method, params, local_http_addr, transport.as_ref()).await;

    let response_body = match serde_xmlrpc::response_to_string((reply.code, reply.message, reply.value)) {
        Ok(s) => s,
        Err(e) => {
            error!("follower rpc: failed to serialize response: {e}");
            return Ok(Response::builder().status(500).body(Body::empty()).unwrap());
        }
    };

    Ok(Response::new(Body::from(response_body)))
}

/// Starts the follower XML-RPC server bound to `bind_addr`. Returns the
/// actual bound address (so the node can compute its `caller_api`) and a
/// handle owning the server task.
pub async fn serve(
    bind_addr: SocketAddr,
    transport: std::sync::Arc<dyn FollowerRpcTransport>,
) -> std::io::Result<(SocketAddr, abort_on_drop::ChildTask<()>)> {
    let make_svc = make_service_fn(move |conn: &hyper::server::conn::AddrStream| {
        let transport = transport.clone();
        let local_addr = conn.local_addr();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                handle_request(req, local_addr, transport.clone())
            }))
        }
    });

    let server = Server::try_bind(&bind_addr)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    let server = server.serve(make_svc);
    let local_addr = server.local_addr();

    let task = tokio::spawn(async move {
        if let Err(e) = server.await {
            error!("follower rpc server exited with error: {e}");
        }
    });

    Ok((local_addr, abort_on_drop::ChildTask::from(task)))
}

#[cfg(test)]
mod test {
    use super::*;

    struct FakeTransport;

    #[async_trait]
    impl FollowerRpcTransport for FakeTransport {
        async fn get_bus_stats(&self, _caller_id: &str) -> RpcReply {
            RpcReply::ok("", serde_xmlrpc::Value::Array(Vec::new()))
        }
        async fn get_bus_info(&self, _caller_id: &str) -> RpcReply {
            RpcReply::ok("", "".into())
        }
        async fn shutdown(&self, _caller_id: &str, _message: Option<String>) -> RpcReply {
            RpcReply::ok("", 0i32.into())
        }
        async fn get_pid(&self, _caller_id: &str) -> RpcReply {
            RpcReply::ok("", 1234i32.into())
        }
        async fn get_subscriptions(&self, _caller_id: &str) -> RpcReply {
            RpcReply::ok("", serde_xmlrpc::Value::Array(Vec::new()))
        }
        async fn get_publications(&self, _caller_id: &str) -> RpcReply {
            RpcReply::ok("", serde_xmlrpc::Value::Array(Vec::new()))
        }
        async fn param_update(&self, _caller_id: &str, _key: &str, _value: serde_xmlrpc::Value) -> RpcReply {
            RpcReply::ok("", 1i32.into())
        }
        async fn publisher_update(&self, _caller_id: &str, _topic: &str, _publishers: Vec<String>) -> RpcReply {
            RpcReply::ok("", 1i32.into())
        }
        async fn request_topic(
            &self,
            _caller_id: &str,
            _topic: &str,
            _protocols: Vec<Vec<String>>,
            _local_http_addr: SocketAddr,
        ) -> RpcReply {
            RpcReply::error("not published")
        }
    }

    #[tokio::test]
    async fn missing_caller_id_is_rejected_before_dispatch() {
        let reply = dispatch(
            "getPid",
            vec![],
            "127.0.0.1:0".parse().unwrap(),
            &FakeTransport,
        )
        .await;
        assert_eq!(reply.code, 0);
    }

    #[tokio::test]
    async fn unknown_method_is_rejected() {
        let reply = dispatch(
            "deleteEverything",
            vec!["/caller".into()],
            "127.0.0.1:0".parse().unwrap(),
            &FakeTransport,
        )
        .await;
        assert_eq!(reply.code, 0);
    }

    #[tokio::test]
    async fn request_topic_requires_topic_and_protocols() {
        let reply = dispatch(
            "requestTopic",
            vec!["/caller".into()],
            "127.0.0.1:0".parse().unwrap(),
            &FakeTransport,
        )
        .await;
        assert_eq!(reply.code, 0);
    }

    #[tokio::test]
    async fn get_pid_dispatches_through() {
        let reply = dispatch(
            "getPid",
            vec!["/caller".into()],
            "127.0.0.1:0".parse().unwrap(),
            &FakeTransport,
        )
        .await;
        assert_eq!(reply.code, 1);
    }
}
