//! Component B: the TCPROS connection header codec.
//!
//! A connection header is a flat list of `key=value` strings, each
//! `u32le(byte_length) || utf8(s)`, concatenated; the whole list is one
//! framed message under [`crate::framing`]

use crate::framing::encode_frame;
use std::collections::BTreeMap;

/// Encodes a set of header fields as the payload of one framed message.
fn encode_fields(fields: &BTreeMap<String, String>) -> Vec<u8> {
    let mut inner = Vec::new();
    for (key, value) in fields {
        let kv = format!("{key}={value}");
        inner.extend_from_slice(&(kv.len() as u32).to_le_bytes());
        inner.extend_from_slice(kv.as_bytes());
    }
    inner
}

/// Parses a header payload (length prefix of the *outer* frame already
/// stripped by [`crate::framing::FrameDecoder`]) into its fields.
///
/// Tolerates a missing `=` (the whole string becomes the key, value is
/// empty) and clamps any declared field length to the remaining buffer
/// size, defensive against malformed peers
fn decode_fields(payload: &[u8]) -> BTreeMap<String, String> {
    let mut fields = BTreeMap::new();
    let mut cursor = 0;
    while cursor + 4 <= payload.len() {
        let declared_len =
            u32::from_le_bytes(payload[cursor..cursor + 4].try_into().unwrap()) as usize;
        cursor += 4;
        let remaining = payload.len() - cursor;
        let len = declared_len.min(remaining);
        let field_bytes = &payload[cursor..cursor + len];
        cursor += len;
        let field = String::from_utf8_lossy(field_bytes);
        match field.find('=') {
            Some(idx) => {
                fields.insert(field[..idx].to_string(), field[idx + 1..].to_string());
            }
            None => {
                fields.insert(field.into_owned(), String::new());
            }
        }
    }
    fields
}

/// A parsed or in-progress-to-be-sent ROS connection header.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectionHeader {
    fields: BTreeMap<String, String>,
}

impl ConnectionHeader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }

    /// Serializes this header as the bytes of one complete framed message,
    /// ready to be written directly to the socket.
    pub fn encode(&self) -> Vec<u8> {
        encode_frame(&encode_fields(&self.fields))
    }

    /// Parses a header *frame payload* (i.e. the bytes already yielded by
    /// a `FrameDecoder`, with the outer length prefix stripped).
    pub fn decode(payload: &[u8]) -> Self {
        Self {
            fields: decode_fields(payload),
        }
    }

    /// Subscriber -> publisher request header fields
    pub fn request(topic: &str, md5sum: &str, caller_id: &str, data_type: &str, tcp_nodelay: bool) -> Self {
        let mut header = Self::new();
        header
            .set("topic", topic)
            .set("md5sum", md5sum)
            .set("callerid", caller_id)
            .set("type", data_type)
            .set("tcp_nodelay", if tcp_nodelay { "1" } else { "0" });
        header
    }

    /// Publisher -> subscriber response header fields
    pub fn response(
        caller_id: &str,
        latching: bool,
        md5sum: &str,
        message_definition: &str,
        topic: &str,
        data_type: &str,
    ) -> Self {
        let mut header = Self::new();
        header
            .set("callerid", caller_id)
            .set("latching", if latching { "1" } else { "0" })
            .set("md5sum", md5sum)
            .set("message_definition", message_definition)
            .set("topic", topic)
            .set("type", data_type);
        header
    }

    /// True if the string `"1"` is stored for `tcp_nodelay`
    pub fn wants_tcp_nodelay(&self) -> bool {
        self.get("tcp_nodelay") == Some("1")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trips_a_request_header() {
        let header = ConnectionHeader::request("/chatter", "abc123", "/talker", "std_msgs/String", true);
        let frame = header.encode();
        // Frame is itself a full length-delimited message; decode with the
        // generic framing codec first, as a real peer would.
        let mut decoder = crate::framing::FrameDecoder::new();
        let mut payloads = decoder.feed(&frame).unwrap();
        assert_eq!(payloads.len(), 1);
        let parsed = ConnectionHeader::decode(&payloads.remove(0));
        assert_eq!(parsed, header);
    }

    #[test]
    fn tolerates_missing_equals() {
        // Manually build a payload with one malformed ("keyonly") field.
        let mut inner = Vec::new();
        let kv = "keyonly";
        inner.extend_from_slice(&(kv.len() as u32).to_le_bytes());
        inner.extend_from_slice(kv.as_bytes());
        let parsed = ConnectionHeader::decode(&inner);
        assert_eq!(parsed.get("keyonly"), Some(""));
    }

    #[test]
    fn clamps_declared_length_to_remaining_buffer() {
        let mut inner = Vec::new();
        inner.extend_from_slice(&1000u32.to_le_bytes()); // claims 1000 bytes
        inner.extend_from_slice(b"topic=short"); // only 11 actually present
        let parsed = ConnectionHeader::decode(&inner);
        assert_eq!(parsed.get("topic"), Some("short"));
    }

    #[test]
    fn tcp_nodelay_is_truthy_only_for_the_string_one() {
        let mut header = ConnectionHeader::new();
        header.set("tcp_nodelay", "1");
        assert!(header.wants_tcp_nodelay());
        header.set("tcp_nodelay", "0");
        assert!(!header.wants_tcp_nodelay());
        header.set("tcp_nodelay", "true");
        assert!(!header.wants_tcp_nodelay());
    }

    #[test]
    fn parse_of_serialize_is_identity_for_arbitrary_maps() {
        let mut header = ConnectionHeader::new();
        header.set("a", "1").set("bb", "").set("c_c", "hello world");
        let payload = encode_fields(header.fields());
        let parsed = ConnectionHeader::decode(&payload);
        assert_eq!(parsed, header);
    }
}
