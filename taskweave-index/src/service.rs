// Copyright 2025 Taskweave (https://github.com/taskweave)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Vector service collaborator interface.
//!
//! All calls are network operations. Errors are classified so the circuit
//! breaker only counts failures that indicate the service is unreachable;
//! a bad request got an answer and proves the opposite.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use taskweave_core::resilience::FailureClass;
use thiserror::Error;

/// Errors from the external vector service.
#[derive(Debug, Clone, Error)]
pub enum VectorServiceError {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("service error: {0}")]
    Service(String),
}

impl FailureClass for VectorServiceError {
    fn is_retryable(&self) -> bool {
        match self {
            VectorServiceError::Timeout
            | VectorServiceError::Connection(_)
            | VectorServiceError::Service(_) => true,
            VectorServiceError::BadRequest(_) => false,
        }
    }
}

/// Payload stored with every vector point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointPayload {
    pub task_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_task_id: Option<String>,
    pub workspace: String,
    /// Leading excerpt of the chunk's content, for result display.
    pub excerpt: String,
    pub chunk_index: usize,
}

/// A vector point keyed by `task_id:chunk_index`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorPoint {
    /// Stable external key; repeated delivery of the same key is
    /// idempotent at the storage layer.
    pub key: String,
    pub vector: Vec<f32>,
    pub payload: PointPayload,
}

/// A search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredPoint {
    pub key: String,
    pub score: f32,
    pub payload: PointPayload,
}

/// Collection status as reported by the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub status: String,
    pub point_count: u64,
}

/// Abstract vector-similarity service.
#[async_trait]
pub trait VectorService: Send + Sync {
    /// Create the collection if it does not exist.
    async fn ensure_collection(
        &self,
        collection: &str,
        dimension: usize,
    ) -> Result<(), VectorServiceError>;

    /// Insert or overwrite points. At-least-once delivery is fine: the
    /// point key makes redelivery idempotent.
    async fn upsert(
        &self,
        collection: &str,
        points: Vec<VectorPoint>,
    ) -> Result<(), VectorServiceError>;

    /// Delete points by key.
    async fn delete(&self, collection: &str, keys: Vec<String>) -> Result<(), VectorServiceError>;

    /// Exact point count.
    async fn count(&self, collection: &str) -> Result<u64, VectorServiceError>;

    /// Collection status and size.
    async fn collection_info(&self, collection: &str)
        -> Result<CollectionInfo, VectorServiceError>;

    /// K-nearest search.
    async fn search(
        &self,
        collection: &str,
        vector: Vec<f32>,
        limit: usize,
    ) -> Result<Vec<ScoredPoint>, VectorServiceError>;

    /// Drop the whole collection.
    async fn delete_collection(&self, collection: &str) -> Result<(), VectorServiceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(VectorServiceError::Timeout.is_retryable());
        assert!(VectorServiceError::Connection("refused".into()).is_retryable());
        assert!(VectorServiceError::Service("500".into()).is_retryable());
        assert!(!VectorServiceError::BadRequest("bad vector size".into()).is_retryable());
    }
}
