//! 파이프라인 설정
//!
//! 기본값 ← TOML 파일 ← `RAG_*` 환경변수 순서로 병합합니다.
//! 중첩 키는 `__`로 구분합니다 (예: `RAG_EMBEDDING__PROVIDER=http`).

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};
use crate::knowledge::{get_data_dir, ChunkConfig, ChunkingStrategy, IndexKind};

// ============================================================================
// PipelineConfig
// ============================================================================

/// 파이프라인 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// 임베딩 모델 식별자
    pub embedding_model: String,
    /// 청크 최대 길이 (문자 수)
    pub chunk_size: usize,
    /// 인접 청크 간 겹침 (문자 수)
    pub chunk_overlap: usize,
    /// 기본 검색 결과 수
    pub default_top_k: usize,
    /// 임베딩 L2 정규화 여부
    pub normalize_embeddings: bool,
    pub index_kind: IndexKind,
    /// 인덱스 아티팩트 경로 (없으면 데이터 디렉토리)
    pub index_path: Option<PathBuf>,
    /// 문서 아티팩트 경로 (없으면 데이터 디렉토리)
    pub documents_path: Option<PathBuf>,
    /// 첫 작업 시 저장된 상태 자동 로드
    pub auto_load: bool,
    /// 필터 적용 전 후보 배수
    pub candidate_multiplier: usize,
    pub chunking_strategy: ChunkingStrategy,
    pub embedding: EmbeddingConfig,
    pub persistence: PersistenceConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            embedding_model: "all-MiniLM-L6-v2".to_string(),
            chunk_size: 1000,
            chunk_overlap: 200,
            default_top_k: 3,
            normalize_embeddings: true,
            index_kind: IndexKind::FlatIp,
            index_path: None,
            documents_path: None,
            auto_load: false,
            candidate_multiplier: 3,
            chunking_strategy: ChunkingStrategy::Auto,
            embedding: EmbeddingConfig::default(),
            persistence: PersistenceConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// 설정 로드
    ///
    /// `path`가 주어지면 해당 TOML 파일을, 아니면 데이터 디렉토리의
    /// `config.toml`을 (있을 때만) 병합합니다.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| get_data_dir().join("config.toml"));

        Self::figment(&file)
            .extract::<Self>()
            .map(Self::normalized)
            .map_err(|e| RagError::Configuration(e.to_string()))
    }

    /// 병합 순서가 적용된 Figment
    pub fn figment(file: &Path) -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed("RAG_").split("__"))
    }

    /// 범위 보정
    ///
    /// `chunk_size ≥ 1`, `chunk_overlap < chunk_size`, `default_top_k ≥ 1`,
    /// `candidate_multiplier ≥ 1`을 보장합니다.
    pub fn normalized(mut self) -> Self {
        let chunk = self.chunk_config();
        self.chunk_size = chunk.chunk_size;
        self.chunk_overlap = chunk.chunk_overlap;

        if self.default_top_k == 0 {
            tracing::warn!("default_top_k must be at least 1, using 1");
            self.default_top_k = 1;
        }
        if self.candidate_multiplier == 0 {
            tracing::warn!("candidate_multiplier must be at least 1, using 1");
            self.candidate_multiplier = 1;
        }
        self
    }

    /// 청크 설정 (보정됨)
    pub fn chunk_config(&self) -> ChunkConfig {
        ChunkConfig::new(self.chunk_size, self.chunk_overlap, self.chunking_strategy)
    }

    /// 인덱스 아티팩트 경로
    pub fn resolved_index_path(&self) -> PathBuf {
        self.index_path
            .clone()
            .unwrap_or_else(|| get_data_dir().join("index.bin"))
    }

    /// 문서 아티팩트 경로
    pub fn resolved_documents_path(&self) -> PathBuf {
        self.documents_path
            .clone()
            .unwrap_or_else(|| get_data_dir().join("documents.jsonl"))
    }
}

// ============================================================================
// EmbeddingConfig
// ============================================================================

/// 임베딩 프로바이더 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProviderKind {
    /// 오프라인 해싱 임베딩
    #[default]
    Hashing,
    /// OpenAI 호환 HTTP 엔드포인트
    Http,
}

/// 임베딩 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProviderKind,
    pub endpoint: String,
    /// API 키를 읽을 환경변수 이름
    pub api_key_env: String,
    /// 키가 없을 때 프로바이더를 사용 불가로 처리
    pub api_key_required: bool,
    /// 해싱 임베딩 차원
    pub dimension: usize,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderKind::Hashing,
            endpoint: crate::embedding::DEFAULT_ENDPOINT.to_string(),
            api_key_env: "RAG_EMBEDDING_API_KEY".to_string(),
            api_key_required: true,
            dimension: 384,
            timeout_secs: crate::embedding::DEFAULT_TIMEOUT.as_secs(),
        }
    }
}

// ============================================================================
// PersistenceConfig
// ============================================================================

/// 영속화 백엔드 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    File,
    Redis,
}

/// 영속화 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub backend: BackendKind,
    pub redis_url: String,
    /// 키 접두사 (`{prefix}:index`, `{prefix}:documents`)
    pub key_prefix: String,
    /// 연결 확인 타임아웃 (밀리초)
    pub connect_timeout_ms: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::File,
            redis_url: "redis://127.0.0.1:6379/0".to_string(),
            key_prefix: "rag".to_string(),
            connect_timeout_ms: 500,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
