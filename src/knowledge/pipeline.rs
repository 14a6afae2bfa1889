//! Pipeline - 수집/검색/영속화 진입점
//!
//! 벡터 인덱스와 문서 저장소를 함께 소유하며 `index[i] ↔ store[i]` 정렬을
//! 항상 유지합니다. 두 상태는 하나의 `RwLock` 안에 있습니다.
//!
//! - 검색은 공유 락으로 동시에 실행됩니다 (쿼리 임베딩은 락 밖에서)
//! - 수집/초기화/저장/로드는 배타 락을 작업 전체 동안 잡습니다
//!
//! ## 사용법
//! ```rust,ignore
//! let pipeline = Pipeline::from_config(PipelineConfig::default());
//! pipeline.add_texts(["CRISPR-Cas9 is a gene-editing tool."], AddOptions::default())?;
//! let results = pipeline.query("gene editing", &QueryOptions::new().top_k(1))?;
//! ```

use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use serde_json::Value;

use super::chunker::{ChunkConfig, ChunkingEngine, ChunkingStrategy};
use super::retrieval::{QueryOptions, RetrievalEngine, SearchResult};
use super::store::{DocumentChunk, DocumentStore, Metadata};
use super::vector::{FlatIndex, IndexKind};
use crate::config::PipelineConfig;
use crate::embedding::{create_embedder, Embedder};
use crate::error::{RagError, Result};
use crate::persistence::{ArtifactBackend, Artifacts, FileBackend, StorageBackend};

// ============================================================================
// Types
// ============================================================================

/// 수집 옵션
#[derive(Debug, Clone)]
pub struct AddOptions {
    /// 모든 청크에 복사되는 메타데이터
    pub metadata: Metadata,
    /// 출처 ID (메타데이터에 `source_id`가 없을 때만 기록)
    pub source_id: Option<String>,
    pub chunk_size: Option<usize>,
    pub chunk_overlap: Option<usize>,
    pub chunking_strategy: Option<ChunkingStrategy>,
    /// false면 입력 하나 = 청크 하나
    pub auto_chunk: bool,
}

impl Default for AddOptions {
    fn default() -> Self {
        Self {
            metadata: Metadata::new(),
            source_id: None,
            chunk_size: None,
            chunk_overlap: None,
            chunking_strategy: None,
            auto_chunk: true,
        }
    }
}

impl AddOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// 메타데이터 항목 하나 추가
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn source_id(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }

    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = Some(chunk_size);
        self
    }

    pub fn chunk_overlap(mut self, chunk_overlap: usize) -> Self {
        self.chunk_overlap = Some(chunk_overlap);
        self
    }

    pub fn strategy(mut self, strategy: ChunkingStrategy) -> Self {
        self.chunking_strategy = Some(strategy);
        self
    }

    pub fn auto_chunk(mut self, auto_chunk: bool) -> Self {
        self.auto_chunk = auto_chunk;
        self
    }
}

/// 파이프라인 통계
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineStats {
    pub chunk_count: usize,
    pub vector_count: usize,
    pub dimension: Option<usize>,
    pub index_kind: IndexKind,
    pub total_text_chars: usize,
    pub backend: String,
    pub embedder: String,
}

/// 락으로 보호되는 상태
#[derive(Debug)]
struct State {
    index: FlatIndex,
    store: DocumentStore,
    /// 자동 로드 시도 여부
    loaded: bool,
}

impl State {
    fn empty(kind: IndexKind) -> Self {
        Self {
            index: FlatIndex::new(kind),
            store: DocumentStore::new(),
            loaded: false,
        }
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// RAG 파이프라인
#[derive(Debug)]
pub struct Pipeline {
    config: PipelineConfig,
    embedder: Embedder,
    storage: StorageBackend,
    retrieval: RetrievalEngine,
    state: RwLock<State>,
}

impl Pipeline {
    /// 지정한 임베딩 능력으로 생성 (백엔드는 설정에서 결정)
    pub fn new(config: PipelineConfig, embedder: Embedder) -> Self {
        let storage = StorageBackend::from_config(&config);
        Self::with_storage(config, embedder, storage)
    }

    /// 임베딩과 백엔드를 모두 지정해 생성
    pub fn with_storage(config: PipelineConfig, embedder: Embedder, storage: StorageBackend) -> Self {
        let config = config.normalized();
        tracing::debug!(
            "Pipeline created (index: {}, embedder: {}, backend: {})",
            config.index_kind,
            embedder.name(),
            storage.describe()
        );

        Self {
            retrieval: RetrievalEngine::new(config.candidate_multiplier),
            state: RwLock::new(State::empty(config.index_kind)),
            config,
            embedder,
            storage,
        }
    }

    /// 설정만으로 생성 (임베딩과 백엔드 모두 설정에서 결정)
    pub fn from_config(config: PipelineConfig) -> Self {
        let embedder = create_embedder(&config.embedding_model, &config.embedding);
        Self::new(config, embedder)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn embedder(&self) -> &Embedder {
        &self.embedder
    }

    pub fn storage(&self) -> &StorageBackend {
        &self.storage
    }

    // ------------------------------------------------------------------------
    // Ingest
    // ------------------------------------------------------------------------

    /// 문서 추가
    ///
    /// 공백뿐인 입력은 건너뜁니다. 호출 하나의 모든 청크를 한 번에 임베딩하고,
    /// 벡터와 레코드를 함께 추가합니다 (실패하면 아무것도 추가되지 않음).
    pub fn add_texts<I, S>(&self, texts: I, options: AddOptions) -> Result<Vec<DocumentChunk>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.ensure_loaded()?;

        let prepared: Vec<String> = texts
            .into_iter()
            .map(|t| t.as_ref().trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        if prepared.is_empty() {
            return Ok(vec![]);
        }

        let drafts = self.draft_chunks(&prepared, &options);
        if drafts.is_empty() {
            return Ok(vec![]);
        }

        let mut state = self.write_state()?;
        let chunks = assign_ids(&state.store, drafts);
        state.store.check_batch(&chunks)?;

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self
            .embedder
            .embed(&texts, self.config.normalize_embeddings)?;
        state.index.check_batch(&vectors)?;

        state.index.add(&vectors)?;
        state.store.append(chunks.clone())?;

        tracing::info!(
            "Added {} chunks from {} documents (total: {})",
            chunks.len(),
            prepared.len(),
            state.store.len()
        );
        Ok(chunks)
    }

    /// 분할 없이 입력 하나를 청크 하나로 추가
    pub fn add_raw_chunks<I, S>(&self, texts: I, options: AddOptions) -> Result<Vec<DocumentChunk>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.add_texts(texts, options.auto_chunk(false))
    }

    /// 청크 텍스트와 메타데이터 준비 (ID는 아직 없음)
    fn draft_chunks(&self, documents: &[String], options: &AddOptions) -> Vec<(String, Metadata)> {
        let mut base = options.metadata.clone();
        if let Some(ref source_id) = options.source_id {
            base.entry("source_id")
                .or_insert_with(|| Value::String(source_id.clone()));
        }

        let defaults = self.config.chunk_config();
        let engine = ChunkingEngine::new(ChunkConfig::new(
            options.chunk_size.unwrap_or(defaults.chunk_size),
            options.chunk_overlap.unwrap_or(defaults.chunk_overlap),
            options.chunking_strategy.unwrap_or(defaults.strategy),
        ));

        let mut drafts = Vec::new();
        for (document_index, document) in documents.iter().enumerate() {
            let pieces = if options.auto_chunk {
                engine.chunk(document)
            } else {
                vec![document.clone()]
            };

            for (chunk_index, text) in pieces.into_iter().enumerate() {
                let mut metadata = base.clone();
                metadata.insert("document_index".into(), document_index.into());
                metadata.insert("chunk_index".into(), chunk_index.into());
                metadata.insert("chunk_char_length".into(), text.chars().count().into());
                drafts.push((text, metadata));
            }
        }
        drafts
    }

    // ------------------------------------------------------------------------
    // Query
    // ------------------------------------------------------------------------

    /// 검색
    ///
    /// 인덱스가 비어 있으면 임베딩 호출 없이 빈 목록을 반환합니다.
    pub fn query(&self, text: &str, options: &QueryOptions) -> Result<Vec<SearchResult>> {
        self.ensure_loaded()?;

        let plan = self.retrieval.plan(options, self.config.default_top_k);
        if self.read_state()?.index.is_empty() {
            tracing::debug!("Query on empty index");
            return Ok(vec![]);
        }

        let query_vector = self
            .embedder
            .embed(&[text.to_string()], self.config.normalize_embeddings)?
            .into_iter()
            .next()
            .ok_or_else(|| RagError::embedder(anyhow::anyhow!("no vector for query")))?;

        let candidates = {
            let state = self.read_state()?;
            self.retrieval.collect(
                &query_vector,
                &state.index,
                &state.store,
                plan,
                &options.filters,
            )?
        };

        let results = self
            .retrieval
            .finish(text, candidates, options.reranker.as_deref(), plan);
        tracing::debug!("Query returned {} results", results.len());
        Ok(results)
    }

    // ------------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------------

    /// 설정된 백엔드에 저장
    pub fn save(&self) -> Result<()> {
        self.ensure_loaded()?;
        self.save_with(self.storage.backend()?)
    }

    /// 지정한 파일 경로에 저장
    pub fn save_to(&self, index_path: impl AsRef<Path>, documents_path: impl AsRef<Path>) -> Result<()> {
        self.ensure_loaded()?;
        self.save_with(&FileBackend::new(
            index_path.as_ref(),
            documents_path.as_ref(),
        ))
    }

    /// 임의의 백엔드에 저장
    pub fn save_with(&self, backend: &dyn ArtifactBackend) -> Result<()> {
        let state = self.write_state()?;
        let artifacts = Artifacts::new(state.index.to_bytes(), state.store.iter())?;
        backend.write(&artifacts)?;

        tracing::info!(
            "Saved {} chunks to {}",
            state.store.len(),
            backend.describe()
        );
        Ok(())
    }

    /// 설정된 백엔드에서 로드
    pub fn load(&self) -> Result<()> {
        self.load_with(self.storage.backend()?)
    }

    /// 지정한 파일 경로에서 로드
    pub fn load_from(&self, index_path: impl AsRef<Path>, documents_path: impl AsRef<Path>) -> Result<()> {
        self.load_with(&FileBackend::new(
            index_path.as_ref(),
            documents_path.as_ref(),
        ))
    }

    /// 임의의 백엔드에서 로드
    ///
    /// 새 상태를 모두 만든 뒤 교체하므로, 실패하면 기존 상태가 유지됩니다.
    pub fn load_with(&self, backend: &dyn ArtifactBackend) -> Result<()> {
        let mut state = self.write_state()?;
        let (index, store) = self.restore(backend.read()?)?;

        tracing::info!(
            "Loaded {} chunks from {}",
            store.len(),
            backend.describe()
        );
        *state = State {
            index,
            store,
            loaded: true,
        };
        Ok(())
    }

    /// 아티팩트로 상태 복원
    ///
    /// 인덱스가 손상됐거나 개수/종류가 문서와 맞지 않으면 재임베딩으로 복구합니다.
    fn restore(&self, artifacts: Artifacts) -> Result<(FlatIndex, DocumentStore)> {
        let store = DocumentStore::from_chunks(artifacts.chunks());

        let index = match FlatIndex::from_bytes(&artifacts.index) {
            Ok(index) if index.kind() != self.config.index_kind => {
                tracing::warn!(
                    "Index kind {} differs from configured {}, rebuilding",
                    index.kind(),
                    self.config.index_kind
                );
                self.rebuild_index(&store)?
            }
            Ok(index) if index.count() != store.len() => {
                tracing::warn!(
                    "Index has {} vectors but {} documents were loaded, rebuilding",
                    index.count(),
                    store.len()
                );
                self.rebuild_index(&store)?
            }
            Ok(index) => index,
            Err(e) => {
                tracing::warn!("Index artifact unreadable ({}), rebuilding", e);
                self.rebuild_index(&store)?
            }
        };

        Ok((index, store))
    }

    /// 저장소의 모든 청크를 다시 임베딩해 인덱스 생성
    fn rebuild_index(&self, store: &DocumentStore) -> Result<FlatIndex> {
        let mut index = FlatIndex::new(self.config.index_kind);
        if store.is_empty() {
            return Ok(index);
        }

        let texts: Vec<String> = store.iter().map(|c| c.text.clone()).collect();
        let vectors = self
            .embedder
            .embed(&texts, self.config.normalize_embeddings)?;
        index.add(&vectors)?;

        tracing::info!("Rebuilt index with {} vectors", index.count());
        Ok(index)
    }

    /// 자동 로드 (최초 1회)
    ///
    /// 저장된 상태가 없으면 조용히 넘어가고, 그 외 실패는 경고 후 빈 상태로 계속합니다.
    fn ensure_loaded(&self) -> Result<()> {
        if !self.config.auto_load || self.read_state()?.loaded {
            return Ok(());
        }

        let mut state = self.write_state()?;
        if state.loaded {
            return Ok(());
        }
        state.loaded = true;

        let backend = match self.storage.backend() {
            Ok(backend) => backend,
            Err(e) => {
                tracing::debug!("Auto-load skipped: {}", e);
                return Ok(());
            }
        };

        match backend.read().and_then(|artifacts| self.restore(artifacts)) {
            Ok((index, store)) => {
                tracing::info!("Auto-loaded {} chunks from {}", store.len(), backend.describe());
                state.index = index;
                state.store = store;
            }
            Err(RagError::NotFound(what)) => {
                tracing::debug!("No saved state at {}, starting empty", what);
            }
            Err(e) => {
                tracing::warn!("Auto-load failed, starting empty: {}", e);
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // State
    // ------------------------------------------------------------------------

    /// 메모리 상태 초기화 (저장된 아티팩트는 그대로)
    pub fn reset(&self) -> Result<()> {
        let mut state = self.write_state()?;
        let cleared = state.store.len();
        *state = State {
            loaded: true,
            ..State::empty(self.config.index_kind)
        };

        tracing::info!("Reset pipeline ({} chunks cleared)", cleared);
        Ok(())
    }

    /// 저장된 청크 수
    pub fn len(&self) -> Result<usize> {
        self.ensure_loaded()?;
        Ok(self.read_state()?.store.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// ID로 청크 조회
    pub fn get_chunk(&self, id: &str) -> Result<Option<DocumentChunk>> {
        self.ensure_loaded()?;
        Ok(self.read_state()?.store.get_by_id(id).cloned())
    }

    /// 통계
    pub fn stats(&self) -> Result<PipelineStats> {
        self.ensure_loaded()?;
        let state = self.read_state()?;
        let store = state.store.stats();

        Ok(PipelineStats {
            chunk_count: store.chunk_count,
            vector_count: state.index.count(),
            dimension: state.index.dimension(),
            index_kind: state.index.kind(),
            total_text_chars: store.total_text_chars,
            backend: self.storage.describe(),
            embedder: self.embedder.name().to_string(),
        })
    }

    fn read_state(&self) -> Result<RwLockReadGuard<'_, State>> {
        self.state.read().map_err(|_| RagError::LockPoisoned)
    }

    fn write_state(&self) -> Result<RwLockWriteGuard<'_, State>> {
        self.state.write().map_err(|_| RagError::LockPoisoned)
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 청크 ID 부여
///
/// 메타데이터에 `chunk_id`가 있으면 그대로 사용하고 (중복은 이후 검증에서 거부),
/// 없으면 `{source_id 또는 "chunk"}-{위치}`를 만듭니다. 만든 ID가 이미 쓰였으면
/// `{힌트}-{uuid}`로 대체합니다.
fn assign_ids(store: &DocumentStore, drafts: Vec<(String, Metadata)>) -> Vec<DocumentChunk> {
    let start = store.len();
    let mut taken = std::collections::HashSet::new();

    drafts
        .into_iter()
        .enumerate()
        .map(|(offset, (text, mut metadata))| {
            let id = match metadata.get("chunk_id") {
                Some(value) => value_to_string(value),
                None => {
                    let hint = metadata
                        .get("source_id")
                        .map(value_to_string)
                        .unwrap_or_else(|| "chunk".to_string());
                    let candidate = format!("{}-{}", hint, start + offset);
                    if store.contains_id(&candidate) || taken.contains(&candidate) {
                        format!("{}-{}", hint, uuid::Uuid::new_v4())
                    } else {
                        candidate
                    }
                }
            };

            taken.insert(id.clone());
            metadata
                .entry("chunk_id")
                .or_insert_with(|| Value::String(id.clone()));
            DocumentChunk::new(id, text, metadata)
        })
        .collect()
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ============================================================================
// Tests
// ============================================================================
