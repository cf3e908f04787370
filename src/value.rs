//! Values crossing the trust boundary.
//!
//! Sandboxed modules are dynamically typed; the host is not. Everything a
//! module passes into a capability arrives as a [`Value`], and a single
//! parsing step converts it into a typed request or a typed validation
//! error. Downstream code never re-checks shapes.

use std::collections::VecDeque;

/// A dynamically-typed value at the sandbox seam.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Bytes(Vec<u8>),
}

impl Value {
    /// The boundary type name, as embedded verbatim in type-mismatch
    /// messages. Byte sequences report the name modules know them by.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Bytes(_) => "Uint8Array",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

impl std::fmt::Display for Value {
    /// Loose stringification, used when a capability accepts "anything that
    /// can be coerced to text" (activity messages).
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::String(s) => write!(f, "{s}"),
            Value::Bytes(b) => write!(f, "Uint8Array({})", b.len()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// A lazy, finite, single-pass sequence of byte chunks.
///
/// This is the "byte stream" shape shared by capability responses. The
/// current transports always yield exactly one chunk, but consumers must
/// treat the sequence as non-restartable: once a chunk is pulled, it is
/// gone.
#[derive(Debug)]
pub struct ByteChunks {
    chunks: VecDeque<Vec<u8>>,
}

impl ByteChunks {
    pub fn empty() -> Self {
        Self {
            chunks: VecDeque::new(),
        }
    }

    /// Wrap a single response datagram as a one-chunk sequence.
    pub fn from_single(bytes: Vec<u8>) -> Self {
        Self {
            chunks: VecDeque::from([bytes]),
        }
    }

    pub fn from_chunks(chunks: Vec<Vec<u8>>) -> Self {
        Self {
            chunks: chunks.into(),
        }
    }

    /// Pull the next chunk. Returns `None` once the sequence is exhausted.
    pub fn next_chunk(&mut self) -> Option<Vec<u8>> {
        self.chunks.pop_front()
    }

    pub fn is_exhausted(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Drain the remaining chunks into one contiguous buffer.
    pub fn collect_remaining(mut self) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = self.next_chunk() {
            out.extend_from_slice(&chunk);
        }
        out
    }
}

impl Iterator for ByteChunks {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_chunk()
    }
}
