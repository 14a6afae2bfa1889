//! palank-rag - 로컬 RAG 검색 코어
//!
//! 텍스트를 청크로 나누고, 임베딩해 플랫 벡터 인덱스에 저장한 뒤
//! 메타데이터 필터와 재정렬을 거쳐 검색합니다. 인덱스와 문서는 파일 또는
//! Redis에 저장되며, 로드 시 개수가 맞지 않으면 재임베딩으로 복구합니다.
//!
//! ## 사용법
//! ```rust,no_run
//! use palank_rag::{AddOptions, MetadataFilters, Pipeline, PipelineConfig, QueryOptions};
//!
//! # fn main() -> palank_rag::Result<()> {
//! let pipeline = Pipeline::from_config(PipelineConfig::default());
//! pipeline.add_texts(
//!     ["Hand hygiene reduces infection rates."],
//!     AddOptions::new().with("category", "guideline"),
//! )?;
//!
//! let options = QueryOptions::new()
//!     .top_k(1)
//!     .filters(MetadataFilters::new().equals("category", "guideline"));
//! for result in pipeline.query("infection control", &options)? {
//!     println!("{:.3} {}", result.score, result.text);
//! }
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod knowledge;
pub mod persistence;

// Re-exports
pub use config::{BackendKind, EmbeddingConfig, EmbeddingProviderKind, PersistenceConfig, PipelineConfig};
pub use embedding::{create_embedder, get_api_key, Embedder, EmbeddingProvider, HashingEmbedding, HttpEmbedding};
pub use error::{RagError, Result};
pub use knowledge::{
    chunk_text, get_data_dir, AddOptions, ChunkConfig, ChunkingEngine, ChunkingStrategy,
    DocumentChunk, FilterCondition, FlatIndex, IndexKind, Metadata, MetadataFilters, Pipeline,
    PipelineStats, QueryOptions, Reranker, SearchResult,
};
pub use persistence::{
    ArtifactBackend, Artifacts, FileBackend, KeyValueBackend, KeyValueStore, MemoryKeyValueStore,
    RedisStore, StorageBackend,
};
