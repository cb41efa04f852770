//! In-process test doubles for the master and parameter server RPC clients,
//! plus a message-definition resolver fixed to `std_msgs/Bool` (falling back
//! to a raw byte passthrough for anything else). These let
//! `tests/seed_cases.rs` run a real `Node` end to end without a live XML-RPC
//! master process, swapping fakes in behind a trait rather than spinning up
//! `roscore`.

use crate::node::master_client::{MasterClient, SystemState};
use crate::node::param_client::{ParamClient, ParamValue};
use async_trait::async_trait;
use ros1_core_types::{MessageDefinitionResolver, Result, ResolvedType, RosValue};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct FakeMasterState {
    publishers: HashMap<String, Vec<String>>,
    subscribers: HashMap<String, Vec<String>>,
}

/// A `MasterClient` backed by a plain in-memory registry, shared (via
/// `clone()`) across every `Node` in a test so that `registerSubscriber`
/// sees publishers a sibling node already registered.
///
/// `registerPublisher`/`registerSubscriber` return the other side's
/// already-known caller APIs directly, mirroring the real master's
/// behavior of handing back current registrants synchronously; this
/// fake never pushes `publisherUpdate` on its own; tests that need that
/// push call `Node::publisher_update` directly (it is the same method
/// the follower RPC dispatches to).
#[derive(Clone, Default)]
pub struct FakeMasterClient {
    state: Arc<Mutex<FakeMasterState>>,
}

impl FakeMasterClient {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MasterClient for FakeMasterClient {
    async fn register_publisher(
        &self,
        _caller_id: &str,
        topic: &str,
        _topic_type: &str,
        caller_api: &str,
    ) -> Result<Vec<String>> {
        let mut state = self.state.lock().unwrap();
        let list = state.publishers.entry(topic.to_string()).or_default();
        if !list.iter().any(|s| s == caller_api) {
            list.push(caller_api.to_string());
        }
        Ok(state.subscribers.get(topic).cloned().unwrap_or_default())
    }

    async fn unregister_publisher(&self, _caller_id: &str, topic: &str, caller_api: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(list) = state.publishers.get_mut(topic) {
            list.retain(|s| s != caller_api);
        }
        Ok(())
    }

    async fn register_subscriber(
        &self,
        _caller_id: &str,
        topic: &str,
        _topic_type: &str,
        caller_api: &str,
    ) -> Result<Vec<String>> {
        let mut state = self.state.lock().unwrap();
        let list = state.subscribers.entry(topic.to_string()).or_default();
        if !list.iter().any(|s| s == caller_api) {
            list.push(caller_api.to_string());
        }
        Ok(state.publishers.get(topic).cloned().unwrap_or_default())
    }

    async fn unregister_subscriber(&self, _caller_id: &str, topic: &str, caller_api: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(list) = state.subscribers.get_mut(topic) {
            list.retain(|s| s != caller_api);
        }
        Ok(())
    }

    async fn get_published_topics(&self, _caller_id: &str, _subgraph: &str) -> Result<Vec<(String, String)>> {
        let state = self.state.lock().unwrap();
        Ok(state.publishers.keys().map(|t| (t.clone(), "*".to_string())).collect())
    }

    async fn get_system_state(&self, _caller_id: &str) -> Result<SystemState> {
        let state = self.state.lock().unwrap();
        Ok(SystemState {
            publishers: state.publishers.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            subscribers: state.subscribers.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            services: Vec::new(),
        })
    }
}

/// A `ParamClient` backed by a plain in-memory map. `subscribeParam`
/// returns the current value (if any); there is no push notification path
/// since no test currently exercises a master-initiated `paramUpdate`.
#[derive(Clone, Default)]
pub struct FakeParamClient {
    values: Arc<Mutex<HashMap<String, ParamValue>>>,
}

impl FakeParamClient {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ParamClient for FakeParamClient {
    async fn get_param_names(&self, _caller_id: &str) -> Result<Vec<String>> {
        Ok(self.values.lock().unwrap().keys().cloned().collect())
    }

    async fn set_param(&self, _caller_id: &str, key: &str, value: ParamValue) -> Result<()> {
        self.values.lock().unwrap().insert(key.to_string(), value);
        Ok(())
    }

    async fn subscribe_param(
        &self,
        _caller_id: &str,
        _caller_api: &str,
        key: &str,
    ) -> Result<Option<ParamValue>> {
        Ok(self.values.lock().unwrap().get(key).cloned())
    }

    async fn unsubscribe_param(&self, _caller_id: &str, _caller_api: &str, _key: &str) -> Result<()> {
        Ok(())
    }
}

fn bool_reader(data: &[u8]) -> Result<RosValue> {
    let value = data.first().copied().unwrap_or(0) != 0;
    Ok(RosValue::Struct(vec![("data".to_string(), RosValue::Bool(value))]))
}

fn bool_writer(value: &RosValue) -> Result<Vec<u8>> {
    let truthy = match value.field("data") {
        Some(RosValue::Bool(b)) => *b,
        _ => false,
    };
    Ok(vec![truthy as u8])
}

/// Resolves `std_msgs/Bool` to a one-byte reader/writer; anything else
/// passes raw bytes through unchanged as `RosValue::Bytes`. `md5sum` is
/// always the wildcard so two independently-constructed resolvers (one per
/// test node) never disagree on a type they each resolve themselves.
#[derive(Clone, Default)]
pub struct FixedDefinitionResolver;

impl FixedDefinitionResolver {
    pub fn new() -> Self {
        Self
    }
}

impl MessageDefinitionResolver for FixedDefinitionResolver {
    fn resolve(&self, data_type: &str, definition_text: Option<&str>) -> Result<ResolvedType> {
        if data_type == "std_msgs/Bool" {
            return Ok(ResolvedType {
                md5sum: "*".to_string(),
                definition_text: definition_text.unwrap_or("bool data").to_string(),
                reader: Arc::new(bool_reader),
                writer: Arc::new(bool_writer),
            });
        }
        Ok(ResolvedType {
            md5sum: "*".to_string(),
            definition_text: definition_text.unwrap_or_default().to_string(),
            reader: Arc::new(|b: &[u8]| Ok(RosValue::Bytes(b.to_vec()))),
            writer: Arc::new(|v: &RosValue| match v {
                RosValue::Bytes(b) => Ok(b.clone()),
                _ => Ok(Vec::new()),
            }),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn fake_master_returns_already_registered_peers() {
        let master = FakeMasterClient::new();
        master
            .register_publisher("/b", "/a", "std_msgs/Bool", "http://b:1/")
            .await
            .unwrap();
        let publishers = master
            .register_subscriber("/a", "/a", "std_msgs/Bool", "http://a:2/")
            .await
            .unwrap();
        assert_eq!(publishers, vec!["http://b:1/".to_string()]);
    }

    #[test]
    fn bool_round_trips_through_the_fixed_resolver() {
        let resolver = FixedDefinitionResolver::new();
        let resolved = resolver.resolve("std_msgs/Bool", None).unwrap();
        let encoded = (resolved.writer)(&RosValue::Struct(vec![("data".into(), RosValue::Bool(true))])).unwrap();
        assert_eq!(encoded, vec![0x01]);
        let decoded = (resolved.reader)(&encoded).unwrap();
        assert_eq!(decoded.field("data"), Some(&RosValue::Bool(true)));
    }
}
