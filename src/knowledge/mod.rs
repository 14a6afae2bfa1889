//! Knowledge 모듈 - RAG 검색 코어
//!
//! - Chunker: 문단/문장/문자 단위 텍스트 분할
//! - Vector: 플랫 벡터 인덱스 (내적 / 제곱 L2)
//! - Store: 인덱스와 위치가 정렬된 청크 레코드 저장소
//! - Filter: 메타데이터 필터 (Equals / OneOf / Predicate)
//! - Retrieval: 후보 수집, 필터링, 재정렬
//! - Pipeline: 위 구성요소를 묶는 진입점

mod chunker;
mod filter;
mod pipeline;
mod retrieval;
mod store;
mod vector;

// Re-exports
pub use chunker::{
    chunk_text, ChunkConfig, ChunkingEngine, ChunkingStrategy, SplitMethod,
};
pub use filter::{FilterCondition, MetadataFilters, PredicateFn};
pub use pipeline::{AddOptions, Pipeline, PipelineStats};
pub use retrieval::{QueryOptions, QueryPlan, Reranker, RetrievalEngine, SearchResult};
pub use store::{get_data_dir, DocumentChunk, DocumentStore, Metadata, StoreStats};
pub use vector::{
    inner_product, l2_normalize, squared_l2, FlatIndex, Hit, IndexDecodeError, IndexKind,
};
