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

//! Qdrant REST implementation of the vector service.
//!
//! Qdrant point ids must be integers or UUIDs, so external keys are mapped
//! to deterministic UUIDs derived from a content hash of the key; the
//! original key travels in the payload. Same key, same id, which is what
//! makes redelivery idempotent.

use crate::service::{
    CollectionInfo, PointPayload, ScoredPoint, VectorPoint, VectorService, VectorServiceError,
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// REST client for a Qdrant-compatible vector service.
pub struct QdrantClient {
    http: reqwest::Client,
    base_url: String,
}

impl QdrantClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, VectorServiceError> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, VectorServiceError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VectorServiceError::Connection(e.to_string()))?;
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Ok(Self { http, base_url })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn check(
        &self,
        response: Result<reqwest::Response, reqwest::Error>,
    ) -> Result<serde_json::Value, VectorServiceError> {
        let response = response.map_err(classify_transport)?;
        let status = response.status();
        if status.is_success() {
            response
                .json::<serde_json::Value>()
                .await
                .map_err(classify_transport)
        } else {
            let body = response.text().await.unwrap_or_default();
            if status.is_client_error() {
                Err(VectorServiceError::BadRequest(format!("{status}: {body}")))
            } else {
                Err(VectorServiceError::Service(format!("{status}: {body}")))
            }
        }
    }
}

fn classify_transport(e: reqwest::Error) -> VectorServiceError {
    if e.is_timeout() {
        VectorServiceError::Timeout
    } else if e.is_connect() {
        VectorServiceError::Connection(e.to_string())
    } else {
        VectorServiceError::Service(e.to_string())
    }
}

/// Deterministic UUID for an external point key.
pub fn point_uuid(key: &str) -> String {
    let hash = blake3::hash(key.as_bytes());
    let bytes = hash.as_bytes();
    format!(
        "{}-{}-{}-{}-{}",
        hex::encode(&bytes[0..4]),
        hex::encode(&bytes[4..6]),
        hex::encode(&bytes[6..8]),
        hex::encode(&bytes[8..10]),
        hex::encode(&bytes[10..16]),
    )
}

#[derive(Debug, Deserialize)]
struct QdrantHit {
    score: f32,
    payload: Option<serde_json::Value>,
}

#[async_trait]
impl VectorService for QdrantClient {
    async fn ensure_collection(
        &self,
        collection: &str,
        dimension: usize,
    ) -> Result<(), VectorServiceError> {
        let info = self
            .http
            .get(self.url(&format!("/collections/{collection}")))
            .send()
            .await
            .map_err(classify_transport)?;

        if info.status().is_success() {
            return Ok(());
        }
        if info.status() != reqwest::StatusCode::NOT_FOUND {
            let status = info.status();
            let body = info.text().await.unwrap_or_default();
            if status.is_client_error() {
                return Err(VectorServiceError::BadRequest(format!("{status}: {body}")));
            }
            return Err(VectorServiceError::Service(format!("{status}: {body}")));
        }

        tracing::info!(collection, dimension, "creating vector collection");
        let body = json!({
            "vectors": { "size": dimension, "distance": "Cosine" }
        });
        self.check(
            self.http
                .put(self.url(&format!("/collections/{collection}")))
                .json(&body)
                .send()
                .await,
        )
        .await?;
        Ok(())
    }

    async fn upsert(
        &self,
        collection: &str,
        points: Vec<VectorPoint>,
    ) -> Result<(), VectorServiceError> {
        let points: Vec<serde_json::Value> = points
            .iter()
            .map(|p| {
                let mut payload = serde_json::to_value(&p.payload).unwrap_or_default();
                if let Some(map) = payload.as_object_mut() {
                    map.insert("point_key".to_string(), json!(p.key));
                }
                json!({
                    "id": point_uuid(&p.key),
                    "vector": p.vector,
                    "payload": payload,
                })
            })
            .collect();

        self.check(
            self.http
                .put(self.url(&format!("/collections/{collection}/points?wait=true")))
                .json(&json!({ "points": points }))
                .send()
                .await,
        )
        .await?;
        Ok(())
    }

    async fn delete(&self, collection: &str, keys: Vec<String>) -> Result<(), VectorServiceError> {
        let ids: Vec<String> = keys.iter().map(|k| point_uuid(k)).collect();
        self.check(
            self.http
                .post(self.url(&format!("/collections/{collection}/points/delete?wait=true")))
                .json(&json!({ "points": ids }))
                .send()
                .await,
        )
        .await?;
        Ok(())
    }

    async fn count(&self, collection: &str) -> Result<u64, VectorServiceError> {
        let value = self
            .check(
                self.http
                    .post(self.url(&format!("/collections/{collection}/points/count")))
                    .json(&json!({ "exact": true }))
                    .send()
                    .await,
            )
            .await?;
        Ok(value["result"]["count"].as_u64().unwrap_or(0))
    }

    async fn collection_info(
        &self,
        collection: &str,
    ) -> Result<CollectionInfo, VectorServiceError> {
        let value = self
            .check(
                self.http
                    .get(self.url(&format!("/collections/{collection}")))
                    .send()
                    .await,
            )
            .await?;
        let result = &value["result"];
        Ok(CollectionInfo {
            status: result["status"].as_str().unwrap_or("unknown").to_string(),
            point_count: result["points_count"].as_u64().unwrap_or(0),
        })
    }

    async fn search(
        &self,
        collection: &str,
        vector: Vec<f32>,
        limit: usize,
    ) -> Result<Vec<ScoredPoint>, VectorServiceError> {
        let value = self
            .check(
                self.http
                    .post(self.url(&format!("/collections/{collection}/points/search")))
                    .json(&json!({
                        "vector": vector,
                        "limit": limit,
                        "with_payload": true,
                    }))
                    .send()
                    .await,
            )
            .await?;

        let hits: Vec<QdrantHit> = serde_json::from_value(value["result"].clone())
            .map_err(|e| VectorServiceError::Service(format!("malformed search result: {e}")))?;

        let mut out = Vec::with_capacity(hits.len());
        for hit in hits {
            let payload_value = hit.payload.unwrap_or_default();
            let key = payload_value["point_key"].as_str().unwrap_or("").to_string();
            let payload: PointPayload = serde_json::from_value(payload_value)
                .map_err(|e| VectorServiceError::Service(format!("malformed payload: {e}")))?;
            out.push(ScoredPoint {
                key,
                score: hit.score,
                payload,
            });
        }
        Ok(out)
    }

    async fn delete_collection(&self, collection: &str) -> Result<(), VectorServiceError> {
        self.check(
            self.http
                .delete(self.url(&format!("/collections/{collection}")))
                .send()
                .await,
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_uuid_is_deterministic() {
        let a = point_uuid("task-1:0");
        let b = point_uuid("task-1:0");
        let c = point_uuid("task-1:1");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_point_uuid_shape() {
        let id = point_uuid("task-1:0");
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 5);
        assert_eq!(parts[0].len(), 8);
        assert_eq!(parts[1].len(), 4);
        assert_eq!(parts[2].len(), 4);
        assert_eq!(parts[3].len(), 4);
        assert_eq!(parts[4].len(), 12);
    }

    #[test]
    fn test_base_url_trailing_slash_stripped() {
        let client = QdrantClient::new("http://localhost:6333/").unwrap();
        assert_eq!(client.url("/collections/c"), "http://localhost:6333/collections/c");
    }
}
