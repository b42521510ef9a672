//! Binary request/response protocol for the version service.
//!
//! Wire format: one bincode-encoded (standard config) message per WebSocket
//! binary frame.
//! ```text
//! client                                  server
//!   │ Request  { request_id, RequestBody }  │
//!   │ ────────────────────────────────────► │
//!   │ Response { request_id, ResponseBody } │
//!   │ ◄──────────────────────────────────── │
//! ```
//! Responses carry the id of the request they answer; requests on one
//! connection may be answered out of order.
//!
//! Performance target: encode + decode of a 1KB CreateVersion < 5μs.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::history::{VersionContent, VersionInfo};
use crate::key::FileKey;

/// Operations a client can request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestBody {
    CreateVersion {
        key: FileKey,
        author: String,
        content: String,
    },
    /// `version: None` reads the latest version.
    GetVersion { key: FileKey, version: Option<u64> },
    ListVersions { key: FileKey },
    RemoveEdit {
        key: FileKey,
        version: u64,
        author: String,
    },
    Ping,
}

/// Client-facing failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    NotFound,
    Compacted,
    RebaseConflict,
    ConcurrencyConflict,
    Timeout,
    Invalid,
    Internal,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::NotFound => "not found",
            ErrorCode::Compacted => "compacted",
            ErrorCode::RebaseConflict => "rebase conflict",
            ErrorCode::ConcurrencyConflict => "concurrency conflict",
            ErrorCode::Timeout => "timeout",
            ErrorCode::Invalid => "invalid request",
            ErrorCode::Internal => "internal error",
        };
        f.write_str(name)
    }
}

/// Server answers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseBody {
    Created(VersionInfo),
    Version(VersionContent),
    Versions(Vec<VersionInfo>),
    Removed(VersionInfo),
    Pong,
    Error { code: ErrorCode, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub request_id: u64,
    pub body: RequestBody,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub request_id: u64,
    pub body: ResponseBody,
}

impl Request {
    pub fn new(request_id: u64, body: RequestBody) -> Self {
        Self { request_id, body }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        encode(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        decode(bytes)
    }
}

impl Response {
    pub fn new(request_id: u64, body: ResponseBody) -> Self {
        Self { request_id, body }
    }

    pub fn error(request_id: u64, code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(
            request_id,
            ResponseBody::Error {
                code,
                message: message.into(),
            },
        )
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        encode(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        decode(bytes)
    }
}

fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>, ProtocolError> {
    bincode::serde::encode_to_vec(msg, bincode::config::standard())
        .map_err(|e| ProtocolError::Serialization(e.to_string()))
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    let (msg, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
    Ok(msg)
}

/// Protocol and transport errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("deserialization error: {0}")]
    Deserialization(String),
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("connection closed")]
    ConnectionClosed,
    #[error("request timed out")]
    Timeout,
    /// The server answered with an error.
    #[error("{code}: {message}")]
    Remote { code: ErrorCode, message: String },
    /// The server answered with a body that does not fit the request.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::EntryKind;

    #[test]
    fn test_request_roundtrip() {
        let key = FileKey::random();
        let request = Request::new(
            7,
            RequestBody::CreateVersion {
                key,
                author: "alice".into(),
                content: "line one\nline two\n".into(),
            },
        );
        let decoded = Request::decode(&request.encode().unwrap()).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn test_response_roundtrip() {
        let info = VersionInfo {
            version: 3,
            author: "bob".into(),
            timestamp_ms: 1_700_000_000_000,
            kind: EntryKind::Removal { removed_version: 2 },
            length: 12,
        };
        let response = Response::new(
            9,
            ResponseBody::Version(VersionContent {
                info,
                content: "hello, world".into(),
            }),
        );
        let decoded = Response::decode(&response.encode().unwrap()).unwrap();
        assert_eq!(decoded, response);
    }

    #[test]
    fn test_error_response() {
        let response = Response::error(1, ErrorCode::RebaseConflict, "hunks [0] failed");
        let decoded = Response::decode(&response.encode().unwrap()).unwrap();
        assert_eq!(
            decoded.body,
            ResponseBody::Error {
                code: ErrorCode::RebaseConflict,
                message: "hunks [0] failed".into()
            }
        );
    }

    #[test]
    fn test_ping_is_small() {
        let encoded = Request::new(1, RequestBody::Ping).encode().unwrap();
        assert!(encoded.len() < 8, "ping encoded to {} bytes", encoded.len());
    }

    #[test]
    fn test_decode_invalid_bytes() {
        assert!(matches!(
            Request::decode(&[0xFF, 0xFE, 0xFD]),
            Err(ProtocolError::Deserialization(_))
        ));
    }

    #[test]
    fn test_remote_error_display() {
        let err = ProtocolError::Remote {
            code: ErrorCode::NotFound,
            message: "version 9 does not exist".into(),
        };
        assert_eq!(err.to_string(), "not found: version 9 does not exist");
    }
}
