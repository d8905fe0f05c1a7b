//! Typed requests accepted from a client and the responses sent back to it.

use crate::error::{StorageError, StorageResult};
use crate::types::{
    CacheIdentifier, CacheListing, CacheQueryOptions, CacheRequest, ClientOrigin, Record,
    RecordIdentifier, RequestIdentifier, SessionId,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum CacheStorageRequest {
    Open {
        request_id: RequestIdentifier,
        origin: ClientOrigin,
        cache_name: String,
    },
    Remove {
        request_id: RequestIdentifier,
        cache: CacheIdentifier,
    },
    Caches {
        request_id: RequestIdentifier,
        origin: ClientOrigin,
        #[serde(default)]
        update_counter: u64,
    },
    RetrieveRecords {
        request_id: RequestIdentifier,
        cache: CacheIdentifier,
        #[serde(default)]
        url: Option<String>,
    },
    DeleteMatchingRecords {
        request_id: RequestIdentifier,
        cache: CacheIdentifier,
        request: CacheRequest,
        #[serde(default)]
        options: CacheQueryOptions,
    },
    PutRecords {
        request_id: RequestIdentifier,
        cache: CacheIdentifier,
        records: Vec<Record>,
    },
    Reference {
        cache: CacheIdentifier,
    },
    Dereference {
        cache: CacheIdentifier,
    },
    ClearMemoryRepresentation {
        request_id: RequestIdentifier,
        origin: ClientOrigin,
    },
    EngineRepresentation {
        request_id: RequestIdentifier,
    },
}

impl CacheStorageRequest {
    /// Correlation id, absent for fire-and-forget requests.
    pub fn request_id(&self) -> Option<RequestIdentifier> {
        match self {
            Self::Open { request_id, .. }
            | Self::Remove { request_id, .. }
            | Self::Caches { request_id, .. }
            | Self::RetrieveRecords { request_id, .. }
            | Self::DeleteMatchingRecords { request_id, .. }
            | Self::PutRecords { request_id, .. }
            | Self::ClearMemoryRepresentation { request_id, .. }
            | Self::EngineRepresentation { request_id } => Some(*request_id),
            Self::Reference { .. } | Self::Dereference { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CacheStorageResponse {
    OpenCompleted {
        request_id: RequestIdentifier,
        result: StorageResult<CacheIdentifier>,
    },
    RemoveCompleted {
        request_id: RequestIdentifier,
        result: StorageResult<CacheIdentifier>,
    },
    UpdateCaches {
        request_id: RequestIdentifier,
        result: StorageResult<CacheListing>,
    },
    UpdateRecords {
        request_id: RequestIdentifier,
        result: StorageResult<Vec<Record>>,
    },
    DeleteRecordsCompleted {
        request_id: RequestIdentifier,
        result: StorageResult<Vec<RecordIdentifier>>,
    },
    PutRecordsCompleted {
        request_id: RequestIdentifier,
        result: StorageResult<Vec<RecordIdentifier>>,
    },
    ClearMemoryRepresentationCompleted {
        request_id: RequestIdentifier,
        error: Option<StorageError>,
    },
    EngineRepresentationCompleted {
        request_id: RequestIdentifier,
        representation: String,
    },
}

impl CacheStorageResponse {
    pub fn request_id(&self) -> RequestIdentifier {
        match self {
            Self::OpenCompleted { request_id, .. }
            | Self::RemoveCompleted { request_id, .. }
            | Self::UpdateCaches { request_id, .. }
            | Self::UpdateRecords { request_id, .. }
            | Self::DeleteRecordsCompleted { request_id, .. }
            | Self::PutRecordsCompleted { request_id, .. }
            | Self::ClearMemoryRepresentationCompleted { request_id, .. }
            | Self::EngineRepresentationCompleted { request_id, .. } => *request_id,
        }
    }

    /// The error carried by this response, if any.
    pub fn error(&self) -> Option<StorageError> {
        match self {
            Self::OpenCompleted { result, .. } | Self::RemoveCompleted { result, .. } => {
                result.as_ref().err().copied()
            }
            Self::UpdateCaches { result, .. } => result.as_ref().err().copied(),
            Self::UpdateRecords { result, .. } => result.as_ref().err().copied(),
            Self::DeleteRecordsCompleted { result, .. }
            | Self::PutRecordsCompleted { result, .. } => result.as_ref().err().copied(),
            Self::ClearMemoryRepresentationCompleted { error, .. } => *error,
            Self::EngineRepresentationCompleted { .. } => None,
        }
    }
}

/// A request as carried by a transport: addressed by session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub session: SessionId,
    pub request: CacheStorageRequest,
}

/// A response as handed to a transport: addressed by session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub session: SessionId,
    pub response: CacheStorageResponse,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_open_request() {
        let line = r#"{"method":"open","request_id":3,"origin":{"top_origin":"https://a.test","client_origin":"https://a.test"},"cache_name":"v1"}"#;
        let request: CacheStorageRequest = serde_json::from_str(line).unwrap();
        assert_eq!(
            request,
            CacheStorageRequest::Open {
                request_id: 3,
                origin: ClientOrigin::same_origin("https://a.test"),
                cache_name: "v1".to_string(),
            }
        );
        assert_eq!(request.request_id(), Some(3));
    }

    #[test]
    fn test_reference_has_no_request_id() {
        let request: CacheStorageRequest =
            serde_json::from_str(r#"{"method":"reference","cache":7}"#).unwrap();
        assert_eq!(request, CacheStorageRequest::Reference { cache: 7 });
        assert_eq!(request.request_id(), None);
    }

    #[test]
    fn test_optional_fields_default() {
        let request: CacheStorageRequest =
            serde_json::from_str(r#"{"method":"retrieve_records","request_id":1,"cache":2}"#)
                .unwrap();
        assert_eq!(
            request,
            CacheStorageRequest::RetrieveRecords {
                request_id: 1,
                cache: 2,
                url: None
            }
        );
    }

    #[test]
    fn test_response_error_accessor() {
        let failed = CacheStorageResponse::PutRecordsCompleted {
            request_id: 9,
            result: Err(StorageError::QuotaExceeded),
        };
        assert_eq!(failed.request_id(), 9);
        assert_eq!(failed.error(), Some(StorageError::QuotaExceeded));

        let cleared = CacheStorageResponse::ClearMemoryRepresentationCompleted {
            request_id: 10,
            error: None,
        };
        assert_eq!(cleared.error(), None);
    }

    #[test]
    fn test_response_wire_shape() {
        let response = CacheStorageResponse::OpenCompleted {
            request_id: 1,
            result: Ok(7),
        };
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["type"], "OpenCompleted");
        assert_eq!(value["request_id"], 1);
        assert_eq!(value["result"]["Ok"], 7);
    }
}
