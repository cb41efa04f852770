use std::cmp::Ordering::{Equal, Greater, Less};

/// A generic, dynamically-typed ROS message value.
///
/// This is the structured value an injected message reader produces and
/// an injected message writer consumes. The node runtime never
/// constructs or inspects the contents of a `Struct`/`Array` itself --
/// it only carries it between the wire and the caller, similar to how a
/// generic subscription carries an opaque byte buffer when the concrete
/// message type isn't known, just with the decoding already done.
#[derive(Clone, Debug, PartialEq)]
pub enum RosValue {
    Bool(bool),
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    String(String),
    Time(Time),
    Duration(Duration),
    Array(Vec<RosValue>),
    Struct(Vec<(String, RosValue)>),
    Bytes(Vec<u8>),
}

impl RosValue {
    /// Convenience accessor for the common case of a struct field lookup.
    pub fn field(&self, name: &str) -> Option<&RosValue> {
        match self {
            RosValue::Struct(fields) => {
                fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
            }
            _ => None,
        }
    }
}

/// Matches the integral ROS1 time type, with extensions for ease of use.
/// NOTE: in ROS1 "Time" is not a message in and of itself;
/// `std_msgs/Time` wraps this for use on the wire.
#[derive(::serde::Deserialize, ::serde::Serialize, Debug, Default, Clone, Eq, PartialEq)]
pub struct Time {
    pub secs: u32,
    pub nsecs: u32,
}

impl Time {
    fn seconds(&self) -> f64 {
        f64::from(self.secs) + f64::from(self.nsecs) / 1e9
    }
}

impl PartialOrd for Time {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        if self.seconds() == other.seconds() {
            Some(Equal)
        } else if self.seconds() > other.seconds() {
            Some(Greater)
        } else {
            Some(Less)
        }
    }
}

impl From<std::time::SystemTime> for Time {
    fn from(val: std::time::SystemTime) -> Self {
        let delta = val
            .duration_since(std::time::UNIX_EPOCH)
            .expect("system time predates the unix epoch");
        Time {
            secs: delta.as_secs() as u32,
            nsecs: delta.subsec_nanos(),
        }
    }
}

/// Matches the integral ROS1 duration type.
/// NOTE: is not a message in and of itself; use `std_msgs/Duration`.
#[derive(::serde::Deserialize, ::serde::Serialize, Debug, Default, Clone, PartialEq)]
pub struct Duration {
    pub sec: i32,
    pub nsec: i32,
}
