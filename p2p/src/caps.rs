//! The url form peers use to advertise their capabilities, e.g.
//! `mxc://raiden.network/cap?Delivery=true&webRTC=0&k=v1&k=v2&x=null`.
//!
//! List values are written as repeated keys. Decoding infers the type of every value: integer literals become
//! numbers, `none`/`null` become null, `true`/`false` become booleans and anything else stays a string.

use crate::errors::CapsError;
use libconduit::caps::{Caps, CapsPrimitive, CapsValue};
use log::*;
use url::Url;

pub const CAPS_URL_BASE: &str = "mxc://raiden.network/cap";

fn primitive_to_string(value: &CapsPrimitive) -> String {
    match value {
        CapsPrimitive::Null => "null".to_string(),
        CapsPrimitive::Bool(b) => b.to_string(),
        CapsPrimitive::Number(n) => n.to_string(),
        CapsPrimitive::String(s) => s.clone(),
    }
}

fn parse_primitive(value: &str) -> CapsPrimitive {
    if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
        // Literals too large for a u64 are kept as strings
        if let Ok(n) = value.parse() {
            return CapsPrimitive::Number(n);
        }
        return CapsPrimitive::String(value.to_string());
    }
    match value.to_lowercase().as_str() {
        "none" | "null" => CapsPrimitive::Null,
        "false" => CapsPrimitive::Bool(false),
        "true" => CapsPrimitive::Bool(true),
        _ => CapsPrimitive::String(value.to_string()),
    }
}

pub fn encode_caps(caps: &Caps) -> String {
    let mut url = match Url::parse(CAPS_URL_BASE) {
        Ok(url) => url,
        // The base is a valid constant url
        Err(_) => return CAPS_URL_BASE.to_string(),
    };
    if !caps.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (key, value) in caps {
            match value {
                CapsValue::Primitive(p) => {
                    pairs.append_pair(key, &primitive_to_string(p));
                }
                CapsValue::List(values) => {
                    for p in values {
                        pairs.append_pair(key, &primitive_to_string(p));
                    }
                }
            }
        }
    }
    url.to_string()
}

pub fn try_decode_caps(caps: &str) -> Result<Caps, CapsError> {
    if caps.is_empty() {
        return Err(CapsError::Empty);
    }
    let url = Url::parse(caps)?;
    let mut result = Caps::new();
    for (key, value) in url.query_pairs() {
        let value = parse_primitive(&value);
        match result.remove(key.as_ref()) {
            None => {
                result.insert(key.into_owned(), CapsValue::Primitive(value));
            }
            Some(CapsValue::Primitive(prev)) => {
                result.insert(key.into_owned(), CapsValue::List(vec![prev, value]));
            }
            Some(CapsValue::List(mut prev)) => {
                prev.push(value);
                result.insert(key.into_owned(), CapsValue::List(prev));
            }
        }
    }
    Ok(result)
}

/// Decodes a caps url. Empty or unparseable strings yield `None`.
pub fn decode_caps(caps: &str) -> Option<Caps> {
    match try_decode_caps(caps) {
        Ok(caps) => Some(caps),
        Err(e) => {
            debug!("Ignoring capabilities {caps:?}. {e}");
            None
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use libconduit::caps::{get_cap, Capability};

    fn sample() -> Caps {
        let mut caps = Caps::new();
        caps.insert("Delivery".into(), CapsValue::from(true));
        caps.insert("Mediate".into(), CapsValue::from(false));
        caps.insert("k2".into(), CapsValue::from(vec![CapsPrimitive::String("v2".into()), CapsPrimitive::Number(3)]));
        caps.insert("k4".into(), CapsValue::Primitive(CapsPrimitive::Null));
        caps.insert("k5".into(), CapsValue::from(123));
        caps.insert("note".into(), CapsValue::from("a b&c=d"));
        caps
    }

    #[test]
    fn encode_format() {
        let mut caps = Caps::new();
        caps.insert("k1".into(), CapsValue::from(true));
        let list = vec![CapsPrimitive::String("v2".into()), CapsPrimitive::String("v3".into())];
        caps.insert("k2".into(), CapsValue::from(list));
        caps.insert("k4".into(), CapsValue::Primitive(CapsPrimitive::Null));
        caps.insert("k5".into(), CapsValue::from(123));
        assert_eq!(encode_caps(&caps), "mxc://raiden.network/cap?k1=true&k2=v2&k2=v3&k4=null&k5=123");
        assert_eq!(encode_caps(&Caps::new()), "mxc://raiden.network/cap");
    }

    #[test]
    fn round_trip() {
        let caps = sample();
        let encoded = encode_caps(&caps);
        assert_eq!(decode_caps(&encoded), Some(caps));
    }

    #[test]
    fn type_inference() {
        let caps = decode_caps("mxc://raiden.network/cap?a=None&b=NULL&c=True&d=FALSE&e=007&f=12x&g=").unwrap();
        assert_eq!(caps["a"], CapsValue::Primitive(CapsPrimitive::Null));
        assert_eq!(caps["b"], CapsValue::Primitive(CapsPrimitive::Null));
        assert_eq!(caps["c"], CapsValue::from(true));
        assert_eq!(caps["d"], CapsValue::from(false));
        assert_eq!(caps["e"], CapsValue::from(7));
        assert_eq!(caps["f"], CapsValue::from("12x"));
        assert_eq!(caps["g"], CapsValue::from(""));
        let huge = decode_caps("mxc://raiden.network/cap?n=123456789012345678901234567890").unwrap();
        assert_eq!(huge["n"], CapsValue::from("123456789012345678901234567890"));
    }

    #[test]
    fn invalid_strings() {
        assert_eq!(decode_caps(""), None);
        assert_eq!(try_decode_caps(""), Err(CapsError::Empty));
        assert_eq!(decode_caps("not a url"), None);
        assert_eq!(decode_caps("mxc://raiden.network/cap"), Some(Caps::new()));
    }

    #[test]
    fn decoded_caps_fall_back_to_defaults() {
        let caps = decode_caps("mxc://raiden.network/cap?Delivery=0&Receive=null").unwrap();
        assert!(!get_cap(Some(&caps), Capability::Delivery).is_truthy());
        assert!(get_cap(Some(&caps), Capability::Receive).is_truthy());
        assert!(get_cap(Some(&caps), Capability::Mediate).is_truthy());
        assert!(!get_cap(Some(&caps), Capability::WebRtc).is_truthy());
    }
}
