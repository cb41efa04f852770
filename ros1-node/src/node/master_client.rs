//! XML-RPC client calls to the ROS master, built on a `reqwest::Client`
//! plus `serde_xmlrpc::{request_to_string, response_from_str}`.

use async_trait::async_trait;
use ros1_core_types::{Error, Result};

/// One entry of `getSystemState`'s three (publishers, subscribers,
/// services) sections: a topic/service name paired with its participants.
pub type SystemStateEntry = (String, Vec<String>);

#[derive(Clone, Debug, Default)]
pub struct SystemState {
    pub publishers: Vec<SystemStateEntry>,
    pub subscribers: Vec<SystemStateEntry>,
    pub services: Vec<SystemStateEntry>,
}

/// The master RPC surface a `Node` depends on. A trait so tests can swap
/// in an in-process fake
#[async_trait]
pub trait MasterClient: Send + Sync {
    async fn register_publisher(
        &self,
        caller_id: &str,
        topic: &str,
        topic_type: &str,
        caller_api: &str,
    ) -> Result<Vec<String>>;

    async fn unregister_publisher(&self, caller_id: &str, topic: &str, caller_api: &str) -> Result<()>;

    async fn register_subscriber(
        &self,
        caller_id: &str,
        topic: &str,
        topic_type: &str,
        caller_api: &str,
    ) -> Result<Vec<String>>;

    async fn unregister_subscriber(&self, caller_id: &str, topic: &str, caller_api: &str) -> Result<()>;

    async fn get_published_topics(&self, caller_id: &str, subgraph: &str) -> Result<Vec<(String, String)>>;

    async fn get_system_state(&self, caller_id: &str) -> Result<SystemState>;
}

/// Concrete XML-RPC adapter over `reqwest` + `serde_xmlrpc`.
pub struct XmlRpcMasterClient {
    http: reqwest::Client,
    master_uri: String,
}

impl XmlRpcMasterClient {
    pub fn new(master_uri: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            master_uri: master_uri.into(),
        }
    }

    async fn call(&self, method: &str, params: Vec<serde_xmlrpc::Value>) -> Result<serde_xmlrpc::Value> {
        let body = serde_xmlrpc::request_to_string(method, params)
            .map_err(|e| Error::SerializationError(e.to_string()))?;
        let response = self
            .http
            .post(&self.master_uri)
            .body(body)
            .send()
            .await
            .map_err(|e| Error::ServerError(e.to_string()))?;
        let text = response
            .text()
            .await
            .map_err(|e| Error::ServerError(e.to_string()))?;
        let (code, status_message, value) = serde_xmlrpc::response_from_str::<(
            i32,
            String,
            serde_xmlrpc::Value,
        )>(&text)
        .map_err(|e| Error::SerializationError(e.to_string()))?;
        if code != 1 {
            return Err(Error::ServerError(format!("{method} failed ({code}): {status_message}")));
        }
        Ok(value)
    }
}

fn value_to_string_list(value: serde_xmlrpc::Value) -> Vec<String> {
    match value {
        serde_xmlrpc::Value::Array(items) => items
            .into_iter()
            .filter_map(|v| match v {
                serde_xmlrpc::Value::String(s) => Some(s),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

#[async_trait]
impl MasterClient for XmlRpcMasterClient {
    async fn register_publisher(
        &self,
        caller_id: &str,
        topic: &str,
        topic_type: &str,
        caller_api: &str,
    ) -> Result<Vec<String>> {
        let value = self
            .call(
                "registerPublisher",
                vec![caller_id.into(), topic.into(), topic_type.into(), caller_api.into()],
            )
            .await?;
        Ok(value_to_string_list(value))
    }

    async fn unregister_publisher(&self, caller_id: &str, topic: &str, caller_api: &str) -> Result<()> {
        self.call(
            "unregisterPublisher",
            vec![caller_id.into(), topic.into(), caller_api.into()],
        )
        .await?;
        Ok(())
    }

    async fn register_subscriber(
        &self,
        caller_id: &str,
        topic: &str,
        topic_type: &str,
        caller_api: &str,
    ) -> Result<Vec<String>> {
        let value = self
            .call(
                "registerSubscriber",
                vec![caller_id.into(), topic.into(), topic_type.into(), caller_api.into()],
            )
            .await?;
        Ok(value_to_string_list(value))
    }

    async fn unregister_subscriber(&self, caller_id: &str, topic: &str, caller_api: &str) -> Result<()> {
        self.call(
            "unregisterSubscriber",
            vec![caller_id.into(), topic.into(), caller_api.into()],
        )
        .await?;
        Ok(())
    }

    async fn get_published_topics(&self, caller_id: &str, subgraph: &str) -> Result<Vec<(String, String)>> {
        let value = self
            .call("getPublishedTopics", vec![caller_id.into(), subgraph.into()])
            .await?;
        match value {
            serde_xmlrpc::Value::Array(items) => Ok(items
                .into_iter()
                .filter_map(|item| match item {
                    serde_xmlrpc::Value::Array(pair) if pair.len() == 2 => {
                        match (&pair[0], &pair[1]) {
                            (serde_xmlrpc::Value::String(t), serde_xmlrpc::Value::String(ty)) => {
                                Some((t.clone(), ty.clone()))
                            }
                            _ => None,
                        }
                    }
                    _ => None,
                })
                .collect()),
            _ => Ok(Vec::new()),
        }
    }

    async fn get_system_state(&self, caller_id: &str) -> Result<SystemState> {
        let value = self.call("getSystemState", vec![caller_id.into()]).await?;
        let sections = match value {
            serde_xmlrpc::Value::Array(sections) if sections.len() == 3 => sections,
            _ => return Ok(SystemState::default()),
        };
        let parse_section = |section: &serde_xmlrpc::Value| -> Vec<SystemStateEntry> {
            match section {
                serde_xmlrpc::Value::Array(entries) => entries
                    .iter()
                    .filter_map(|entry| match entry {
                        serde_xmlrpc::Value::Array(pair) if pair.len() == 2 => {
                            let name = match &pair[0] {
                                serde_xmlrpc::Value::String(s) => s.clone(),
                                _ => return None,
                            };
                            let participants = value_to_string_list(pair[1].clone());
                            Some((name, participants))
                        }
                        _ => None,
                    })
                    .collect(),
                _ => Vec::new(),
            }
        };
        Ok(SystemState {
            publishers: parse_section(&sections[0]),
            subscribers: parse_section(&sections[1]),
            services: parse_section(&sections[2]),
        })
    }
}
