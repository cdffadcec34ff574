//! Boundary representation of values.
//!
//! Event payloads, reference call arguments and native arguments cross the
//! boundary as a JSON array of [`Payload`]. Functions never cross by value:
//! they are turned into script references first.

use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    Nil,
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<Payload>),
    /// A script reference id, callable through `call_ref`.
    Ref(i32),
    /// Opaque host object, materialised by the result-as-object routine.
    Object(Vec<u8>),
}

impl Payload {
    pub fn pack(items: &[Payload]) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(items)?)
    }

    /// An empty buffer is an empty argument list.
    pub fn unpack(bytes: &[u8]) -> Result<Vec<Payload>> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(vec![]);
        }
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Payload::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl From<f64> for Payload {
    fn from(v: f64) -> Self {
        Payload::Number(v)
    }
}
impl From<&str> for Payload {
    fn from(v: &str) -> Self {
        Payload::String(v.to_string())
    }
}
impl From<bool> for Payload {
    fn from(v: bool) -> Self {
        Payload::Bool(v)
    }
}
