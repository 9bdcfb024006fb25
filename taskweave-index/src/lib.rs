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

//! Taskweave Index
//!
//! Semantic indexing of reconstructed conversation skeletons into an
//! external vector service, with chunking, content-hash change detection,
//! and circuit-breaker protection so the rest of the pipeline keeps
//! working when the service is down.

pub mod chunker;
pub mod embed;
pub mod indexer;
pub mod qdrant;
pub mod service;

pub use chunker::{Chunk, Chunker, ChunkingConfig};
pub use embed::{EmbedError, Embedder};
pub use indexer::{
    IndexError, IndexOutcome, IndexerConfig, IndexerStatus, ReindexReport, SemanticIndexer,
};
pub use qdrant::{point_uuid, QdrantClient};
pub use service::{
    CollectionInfo, PointPayload, ScoredPoint, VectorPoint, VectorService, VectorServiceError,
};
