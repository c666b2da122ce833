//! Decoding and authentication of the lines peers send us.
//!
//! Input from peers is untrusted. Anything that does not decode, or whose signature does not belong to the sender,
//! is logged and dropped; it never surfaces as an error of the engine.

use crate::errors::CodecError;
use crate::message_types::Message;
use libconduit::primitives::Address;
use log::*;
use serde_json::Value;

pub fn encode_message(message: &Message) -> Result<String, CodecError> {
    Ok(serde_json::to_string(message)?)
}

/// Decodes a single line. A signed message is only accepted from its signer.
pub fn try_decode_message(line: &Value, sender: Address) -> Result<Message, CodecError> {
    let Value::String(line) = line else { return Err(CodecError::NotAString) };
    try_decode_line(line, sender)
}

fn try_decode_line(line: &str, sender: Address) -> Result<Message, CodecError> {
    let message: Message = serde_json::from_str(line)?;
    if let Some(recovered) = message.signer()? {
        if recovered != sender {
            return Err(CodecError::SignatureMismatch { expected: sender, recovered });
        }
    }
    Ok(message)
}

pub fn decode_and_validate_message(line: &Value, sender: Address) -> Option<Message> {
    match try_decode_message(line, sender) {
        Ok(message) => Some(message),
        Err(e) => {
            warn!("Could not decode message from {sender}: {line}: {e}");
            None
        }
    }
}

/// Splits a message body into its lines and decodes each, dropping the invalid ones.
pub fn decode_body(body: &Value, sender: Address) -> Vec<Message> {
    let Value::String(body) = body else {
        warn!("Could not decode message from {sender}: {body}: {}", CodecError::NotAString);
        return Vec::new();
    };
    body.lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|line| match try_decode_line(line, sender) {
            Ok(message) => Some(message),
            Err(e) => {
                warn!("Could not decode message from {sender}: {line}: {e}");
                None
            }
        })
        .collect()
}
