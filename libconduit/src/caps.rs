//! Peer capability sets.
//!
//! A peer advertises a mapping from capability name to a primitive value or a list of primitives. Capabilities a
//! peer does not mention (or mentions as `null`) fall back to [`Capability::fallback`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CapsPrimitive {
    Null,
    Bool(bool),
    Number(u64),
    String(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CapsValue {
    Primitive(CapsPrimitive),
    List(Vec<CapsPrimitive>),
}

pub type Caps = BTreeMap<String, CapsValue>;

impl CapsPrimitive {
    /// Whether the value counts as "enabled": `false`, `null`, `0` and the empty string do not.
    pub fn is_truthy(&self) -> bool {
        match self {
            CapsPrimitive::Null => false,
            CapsPrimitive::Bool(b) => *b,
            CapsPrimitive::Number(n) => *n != 0,
            CapsPrimitive::String(s) => !s.is_empty(),
        }
    }
}

impl CapsValue {
    pub fn is_truthy(&self) -> bool {
        match self {
            CapsValue::Primitive(p) => p.is_truthy(),
            CapsValue::List(_) => true,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, CapsValue::Primitive(CapsPrimitive::Null))
    }
}

impl From<bool> for CapsValue {
    fn from(value: bool) -> Self {
        CapsValue::Primitive(CapsPrimitive::Bool(value))
    }
}

impl From<u64> for CapsValue {
    fn from(value: u64) -> Self {
        CapsValue::Primitive(CapsPrimitive::Number(value))
    }
}

impl From<&str> for CapsValue {
    fn from(value: &str) -> Self {
        CapsValue::Primitive(CapsPrimitive::String(value.to_string()))
    }
}

impl From<CapsPrimitive> for CapsValue {
    fn from(value: CapsPrimitive) -> Self {
        CapsValue::Primitive(value)
    }
}

impl From<Vec<CapsPrimitive>> for CapsValue {
    fn from(values: Vec<CapsPrimitive>) -> Self {
        CapsValue::List(values)
    }
}

/// The protocol features a peer can advertise.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Capability {
    /// The peer needs `Delivered` acknowledgements for the messages it sends.
    Delivery,
    Mediate,
    Receive,
    WebRtc,
    ToDevice,
    ImmutableMetadata,
}

impl Capability {
    pub fn name(&self) -> &'static str {
        match self {
            Capability::Delivery => "Delivery",
            Capability::Mediate => "Mediate",
            Capability::Receive => "Receive",
            Capability::WebRtc => "webRTC",
            Capability::ToDevice => "toDevice",
            Capability::ImmutableMetadata => "immutableMetadata",
        }
    }

    /// The value assumed for peers that do not advertise this capability.
    pub fn fallback(&self) -> CapsValue {
        match self {
            Capability::Delivery | Capability::Mediate | Capability::Receive => CapsValue::from(true),
            Capability::WebRtc | Capability::ToDevice | Capability::ImmutableMetadata => CapsValue::from(false),
        }
    }
}

impl Display for Capability {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Looks up `cap` in a (possibly absent) capability set, falling back to the default table.
pub fn get_cap(caps: Option<&Caps>, cap: Capability) -> CapsValue {
    caps.and_then(|c| c.get(cap.name())).filter(|v| !v.is_null()).cloned().unwrap_or_else(|| cap.fallback())
}
