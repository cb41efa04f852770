//! Shared bits for the two demo binaries (`talker`, `listener`): a
//! minimal [`ros1_core_types::MessageDefinitionResolver`] for
//! `std_msgs/String`, since this workspace has no `.msg`-file codegen of
//! its own -- that parser lives outside this crate's boundary.

use ros1_core_types::{MessageDefinitionResolver, ResolvedType, Result, RosValue};
use std::sync::Arc;

const STD_MSGS_STRING_DEFINITION: &str = "string data\n";

fn read_string(bytes: &[u8]) -> Result<RosValue> {
    let len = u32::from_le_bytes(bytes[0..4].try_into().unwrap_or_default()) as usize;
    let data = String::from_utf8_lossy(&bytes[4..4 + len.min(bytes.len().saturating_sub(4))]).into_owned();
    Ok(RosValue::Struct(vec![("data".to_string(), RosValue::String(data))]))
}

fn write_string(value: &RosValue) -> Result<Vec<u8>> {
    let data = match value.field("data") {
        Some(RosValue::String(s)) => s.as_str(),
        _ => "",
    };
    let mut out = Vec::with_capacity(4 + data.len());
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    out.extend_from_slice(data.as_bytes());
    Ok(out)
}

/// Resolves `std_msgs/String` only; any other data type is an error, since
/// these binaries exist to demonstrate the wire protocol, not to be a
/// general-purpose ROS client.
pub struct StdMsgsStringResolver;

impl MessageDefinitionResolver for StdMsgsStringResolver {
    fn resolve(&self, data_type: &str, definition_text: Option<&str>) -> Result<ResolvedType> {
        if data_type != "std_msgs/String" {
            return Err(ros1_core_types::Error::SerializationError(format!(
                "demo resolver only knows std_msgs/String, got {data_type}"
            )));
        }
        Ok(ResolvedType {
            md5sum: "992ce8a1687cec8c8bd883ec73ca41d1".to_string(),
            definition_text: definition_text.unwrap_or(STD_MSGS_STRING_DEFINITION).to_string(),
            reader: Arc::new(read_string),
            writer: Arc::new(write_string),
        })
    }
}
