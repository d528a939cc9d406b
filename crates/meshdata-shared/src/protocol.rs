//! Messages between replicas and the store host.
//!
//! Each request and response is a single JSON document carried as one
//! transport exchange.

use bytes::Bytes;
use meshdata_transport::{call, ClientRequestFactory};
use meshdata_types::{ChangeSet, Record, Schema, StorePath};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::store::Operation;
use crate::{Result, SharedDataError};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum HubRequest {
    /// Create a store; fails if one exists.
    Create { path: StorePath, schema: Schema },
    /// Get or create a store and return its snapshot.
    Open { path: StorePath, schema: Schema },
    /// Wait up to `wait_ms` for change sets newer than `since`.
    Poll {
        path: StorePath,
        epoch: u64,
        since: u64,
        wait_ms: u64,
    },
    /// Apply operations atomically.
    Commit { path: StorePath, ops: Vec<Operation> },
    /// Immediate children of `parent`.
    List { parent: StorePath },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Snapshot {
    pub epoch: u64,
    pub version: u64,
    pub records: Vec<Record>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum HubResponse {
    Created,
    Snapshot(Snapshot),
    Changes { change_sets: Vec<ChangeSet> },
    /// The poller's epoch or version is no longer valid; resynchronize.
    Reset,
    Committed { change_set: ChangeSet },
    Children { paths: Vec<StorePath> },
    Error { kind: ErrorKind, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum ErrorKind {
    AlreadyExist,
    NotFound,
    SchemaMismatch,
    InvalidRecord,
    Stopped,
    BadRequest,
    Internal,
}

impl HubResponse {
    pub(crate) fn from_error(err: &SharedDataError) -> Self {
        let kind = match err {
            SharedDataError::AlreadyExist(_) => ErrorKind::AlreadyExist,
            SharedDataError::NotFound(_) => ErrorKind::NotFound,
            SharedDataError::SchemaMismatch(_) => ErrorKind::SchemaMismatch,
            SharedDataError::InvalidRecord(_) => ErrorKind::InvalidRecord,
            SharedDataError::Stopped => ErrorKind::Stopped,
            SharedDataError::Serialization(_) | SharedDataError::Types(_) => ErrorKind::BadRequest,
            _ => ErrorKind::Internal,
        };
        Self::Error {
            kind,
            message: err.to_string(),
        }
    }

    /// Turns an error response into the matching local error.
    pub(crate) fn into_result(self, path: &StorePath) -> Result<Self> {
        match self {
            Self::Error { kind, message } => Err(match kind {
                ErrorKind::AlreadyExist => SharedDataError::AlreadyExist(path.clone()),
                ErrorKind::NotFound => SharedDataError::NotFound(path.clone()),
                ErrorKind::SchemaMismatch => SharedDataError::SchemaMismatch(path.clone()),
                ErrorKind::InvalidRecord => SharedDataError::InvalidRecord(message),
                ErrorKind::Stopped => SharedDataError::Stopped,
                ErrorKind::BadRequest | ErrorKind::Internal => SharedDataError::Remote(message),
            }),
            other => Ok(other),
        }
    }
}

/// Client half of the protocol, bound to one hub url.
pub(crate) struct HubClient {
    factory: Arc<dyn ClientRequestFactory>,
}

impl HubClient {
    pub(crate) fn new(factory: Arc<dyn ClientRequestFactory>) -> Self {
        Self { factory }
    }

    pub(crate) fn url(&self) -> &str {
        self.factory.url()
    }

    /// Sends one request. `path` names the store for error mapping.
    pub(crate) fn send(&self, request: &HubRequest, path: &StorePath) -> Result<HubResponse> {
        let encoded = serde_json::to_vec(request)?;
        let response = call(self.factory.as_ref(), &encoded)?;
        let decoded: HubResponse = serde_json::from_slice(&response)?;
        decoded.into_result(path)
    }

    pub(crate) fn release(&self) {
        self.factory.release();
    }
}

pub(crate) fn decode_request(request: &Bytes) -> Result<HubRequest> {
    Ok(serde_json::from_slice(request)?)
}

pub(crate) fn encode_response(response: &HubResponse) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(response)?)
}

pub(crate) fn unexpected(response: &HubResponse) -> SharedDataError {
    SharedDataError::Protocol(format!("unexpected response: {response:?}"))
}
