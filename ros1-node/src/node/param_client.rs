//! XML-RPC client calls to the ROS parameter server, same adapter shape as `master_client`.

use async_trait::async_trait;
use ros1_core_types::{Error, Result};

/// A parameter value as it travels over XML-RPC: reuses the library's
/// dynamic value type rather than inventing a parallel one.
pub type ParamValue = serde_xmlrpc::Value;

#[async_trait]
pub trait ParamClient: Send + Sync {
    async fn get_param_names(&self, caller_id: &str) -> Result<Vec<String>>;
    async fn set_param(&self, caller_id: &str, key: &str, value: ParamValue) -> Result<()>;
    /// `None` return means the server reported the empty-object "unset"
    /// sentinel
    async fn subscribe_param(&self, caller_id: &str, caller_api: &str, key: &str) -> Result<Option<ParamValue>>;
    async fn unsubscribe_param(&self, caller_id: &str, caller_api: &str, key: &str) -> Result<()>;
}

pub struct XmlRpcParamClient {
    http: reqwest::Client,
    param_server_uri: String,
}

impl XmlRpcParamClient {
    pub fn new(param_server_uri: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            param_server_uri: param_server_uri.into(),
        }
    }

    async fn call(&self, method: &str, params: Vec<serde_xmlrpc::Value>) -> Result<serde_xmlrpc::Value> {
        let body = serde_xmlrpc::request_to_string(method, params)
            .map_err(|e| Error::SerializationError(e.to_string()))?;
        let response = self
            .http
            .post(&self.param_server_uri)
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

/// An XML-RPC empty struct (`{}`) is how the source represents "unset"
///
fn is_empty_object(value: &serde_xmlrpc::Value) -> bool {
    matches!(value, serde_xmlrpc::Value::Struct(map) if map.is_empty())
}

#[async_trait]
impl ParamClient for XmlRpcParamClient {
    async fn get_param_names(&self, caller_id: &str) -> Result<Vec<String>> {
        let value = self.call("getParamNames", vec![caller_id.into()]).await?;
        match value {
            serde_xmlrpc::Value::Array(items) => Ok(items
                .into_iter()
                .filter_map(|v| match v {
                    serde_xmlrpc::Value::String(s) => Some(s),
                    _ => None,
                })
                .collect()),
            _ => Ok(Vec::new()),
        }
    }

    async fn set_param(&self, caller_id: &str, key: &str, value: ParamValue) -> Result<()> {
        self.call("setParam", vec![caller_id.into(), key.into(), value]).await?;
        Ok(())
    }

    async fn subscribe_param(&self, caller_id: &str, caller_api: &str, key: &str) -> Result<Option<ParamValue>> {
        let value = self
            .call("subscribeParam", vec![caller_id.into(), caller_api.into(), key.into()])
            .await?;
        if is_empty_object(&value) {
            Ok(None)
        } else {
            Ok(Some(value))
        }
    }

    async fn unsubscribe_param(&self, caller_id: &str, caller_api: &str, key: &str) -> Result<()> {
        self.call(
            "unsubscribeParam",
            vec![caller_id.into(), caller_api.into(), key.into()],
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn empty_struct_is_recognized_as_the_unset_sentinel() {
        assert!(is_empty_object(&serde_xmlrpc::Value::Struct(Default::default())));
        assert!(!is_empty_object(&serde_xmlrpc::Value::String("x".into())));
    }
}
