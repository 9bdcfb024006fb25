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

//! Semantic indexer.
//!
//! Keeps the external vector collection synchronized with reconstructed
//! skeletons. Unchanged content is detected by hash and skipped before any
//! network traffic. Every service call runs under the shared circuit
//! breaker; an open circuit surfaces as a distinct "unavailable" signal the
//! caller can treat as soft, since hierarchy and truncation stay usable
//! without search.
//!
//! Calls for the same task id are serialized (last writer wins on the
//! content hash); different task ids index in parallel freely.

use crate::chunker::{Chunker, ChunkingConfig};
use crate::embed::{EmbedError, Embedder};
use crate::service::{
    CollectionInfo, PointPayload, ScoredPoint, VectorPoint, VectorService, VectorServiceError,
};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use taskweave_core::resilience::{BreakerState, CircuitBreaker, CircuitConfig, CircuitError};
use taskweave_core::skeleton::ConversationSkeleton;
use thiserror::Error;
use tokio::sync::Mutex;

/// Indexer tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Target collection name.
    pub collection: String,
    /// Characters of chunk text stored in the payload excerpt.
    #[serde(default = "default_excerpt_chars")]
    pub excerpt_chars: usize,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub circuit: CircuitConfig,
}

fn default_excerpt_chars() -> usize {
    256
}

impl IndexerConfig {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            excerpt_chars: default_excerpt_chars(),
            chunking: ChunkingConfig::default(),
            circuit: CircuitConfig::default(),
        }
    }
}

/// Errors from indexer operations.
#[derive(Debug, Error)]
pub enum IndexError {
    /// The circuit is open; try again after the cooldown. Soft: callers
    /// may skip indexing and proceed.
    #[error("indexer unavailable, retry after {retry_after:?}")]
    Unavailable { retry_after: Duration },
    #[error("vector service: {0}")]
    Service(#[from] VectorServiceError),
    #[error("embedder: {0}")]
    Embed(#[from] EmbedError),
    #[error("invalid indexer config: {0}")]
    Config(String),
}

/// Outcome of one `index` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IndexOutcome {
    /// Points upserted.
    Indexed { points: usize },
    /// Content hash unchanged; no network call issued.
    Unchanged,
    /// Circuit open; nothing was sent.
    Unavailable { retry_after: Duration },
}

/// Aggregate result of `reindex_all`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReindexReport {
    pub indexed: usize,
    pub unchanged: usize,
    pub failed: usize,
    /// Tasks not attempted because the circuit opened mid-pass.
    pub skipped_unavailable: usize,
}

/// Breaker state plus collection stats, for status reporting upward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexerStatus {
    pub breaker: BreakerState,
    /// `None` when the service could not be reached.
    pub collection: Option<CollectionInfo>,
}

/// Synchronizes skeleton content into the external vector service.
pub struct SemanticIndexer {
    service: Arc<dyn VectorService>,
    embedder: Arc<dyn Embedder>,
    breaker: Arc<CircuitBreaker>,
    chunker: Chunker,
    config: IndexerConfig,
    /// task_id → blake3 hex of the last successfully indexed content.
    content_hashes: DashMap<String, String>,
    /// task_id → serialization lock.
    task_locks: DashMap<String, Arc<Mutex<()>>>,
    collection_ready: AtomicBool,
}

impl SemanticIndexer {
    pub fn new(
        service: Arc<dyn VectorService>,
        embedder: Arc<dyn Embedder>,
        config: IndexerConfig,
    ) -> Result<Self, IndexError> {
        let chunker = Chunker::new(config.chunking.clone()).map_err(IndexError::Config)?;
        let breaker = Arc::new(CircuitBreaker::new(config.circuit.clone()));
        Ok(Self {
            service,
            embedder,
            breaker,
            chunker,
            config,
            content_hashes: DashMap::new(),
            task_locks: DashMap::new(),
            collection_ready: AtomicBool::new(false),
        })
    }

    /// The shared breaker, for status checks and for guards composed by
    /// callers.
    pub fn breaker(&self) -> Arc<CircuitBreaker> {
        Arc::clone(&self.breaker)
    }

    /// Index one skeleton. Re-indexing unchanged content is a no-op at the
    /// storage layer, detected before any network traffic.
    pub async fn index(&self, skeleton: &ConversationSkeleton) -> Result<IndexOutcome, IndexError> {
        match self.index_inner(skeleton).await {
            Err(IndexError::Unavailable { retry_after }) => {
                Ok(IndexOutcome::Unavailable { retry_after })
            }
            other => other,
        }
    }

    async fn index_inner(
        &self,
        skeleton: &ConversationSkeleton,
    ) -> Result<IndexOutcome, IndexError> {
        let lock = self
            .task_locks
            .entry(skeleton.task_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _serialized = lock.lock().await;

        let content = skeleton.content_text();
        let hash = blake3::hash(content.as_bytes()).to_hex().to_string();
        if self
            .content_hashes
            .get(&skeleton.task_id)
            .map_or(false, |h| *h == hash)
        {
            tracing::debug!(task_id = skeleton.task_id.as_str(), "content unchanged, skipping");
            return Ok(IndexOutcome::Unchanged);
        }

        self.ensure_collection().await?;

        let chunks = self.chunker.chunk(&content);
        let mut points = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            let vector = self.embedder.embed(&chunk.text).await?;
            let excerpt: String = chunk.text.chars().take(self.config.excerpt_chars).collect();
            points.push(VectorPoint {
                key: format!("{}:{}", skeleton.task_id, chunk.index),
                vector,
                payload: PointPayload {
                    task_id: skeleton.task_id.clone(),
                    parent_task_id: skeleton.parent_task_id.clone(),
                    workspace: skeleton.workspace.as_str().to_string(),
                    excerpt,
                    chunk_index: chunk.index,
                },
            });
        }

        let point_count = points.len();
        if point_count > 0 {
            let collection = self.config.collection.clone();
            let service = Arc::clone(&self.service);
            self.guarded(move || async move { service.upsert(&collection, points).await })
                .await?;
        }

        self.content_hashes.insert(skeleton.task_id.clone(), hash);
        tracing::debug!(
            task_id = skeleton.task_id.as_str(),
            points = point_count,
            "task indexed"
        );
        Ok(IndexOutcome::Indexed { points: point_count })
    }

    /// Re-index a whole collection of skeletons. Individual failures are
    /// counted and the pass continues; an open circuit stops the pass and
    /// counts the remainder as skipped.
    pub async fn reindex_all(&self, skeletons: &[ConversationSkeleton]) -> ReindexReport {
        let mut report = ReindexReport::default();
        for (position, skeleton) in skeletons.iter().enumerate() {
            match self.index(skeleton).await {
                Ok(IndexOutcome::Indexed { .. }) => report.indexed += 1,
                Ok(IndexOutcome::Unchanged) => report.unchanged += 1,
                Ok(IndexOutcome::Unavailable { retry_after }) => {
                    report.skipped_unavailable = skeletons.len() - position;
                    tracing::warn!(
                        ?retry_after,
                        skipped = report.skipped_unavailable,
                        "circuit opened during reindex; stopping pass"
                    );
                    break;
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(
                        task_id = skeleton.task_id.as_str(),
                        error = %e,
                        "failed to index task"
                    );
                }
            }
        }
        report
    }

    /// K-nearest search over indexed content.
    pub async fn query_similar(
        &self,
        vector: Vec<f32>,
        k: usize,
    ) -> Result<Vec<ScoredPoint>, IndexError> {
        let collection = self.config.collection.clone();
        let service = Arc::clone(&self.service);
        self.guarded(move || async move { service.search(&collection, vector, k).await })
            .await
    }

    /// Breaker state plus collection stats. Never fails: an unreachable
    /// service reports `collection: None`.
    pub async fn collection_status(&self) -> IndexerStatus {
        let breaker = self.breaker.state_at(Instant::now());
        let collection = self.config.collection.clone();
        let service = Arc::clone(&self.service);
        let collection = match self
            .guarded(move || async move { service.collection_info(&collection).await })
            .await
        {
            Ok(info) => Some(info),
            Err(e) => {
                tracing::debug!(error = %e, "collection status unavailable");
                None
            }
        };
        IndexerStatus { breaker, collection }
    }

    /// Drop and recreate the collection, forgetting all content hashes.
    pub async fn reset_collection(&self) -> Result<(), IndexError> {
        let collection = self.config.collection.clone();
        let service = Arc::clone(&self.service);
        self.guarded(move || async move { service.delete_collection(&collection).await })
            .await?;
        self.content_hashes.clear();
        self.collection_ready.store(false, Ordering::SeqCst);
        tracing::info!(collection = self.config.collection.as_str(), "collection reset");
        Ok(())
    }

    async fn ensure_collection(&self) -> Result<(), IndexError> {
        if self.collection_ready.load(Ordering::SeqCst) {
            return Ok(());
        }
        let collection = self.config.collection.clone();
        let dimension = self.embedder.dimension();
        let service = Arc::clone(&self.service);
        self.guarded(move || async move { service.ensure_collection(&collection, dimension).await })
            .await?;
        self.collection_ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn guarded<T, F, Fut>(&self, op: F) -> Result<T, IndexError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, VectorServiceError>>,
    {
        match self.breaker.call(op).await {
            Ok(value) => Ok(value),
            Err(CircuitError::Open { retry_after }) => Err(IndexError::Unavailable { retry_after }),
            Err(CircuitError::Inner(e)) => Err(IndexError::Service(e)),
        }
    }
}
