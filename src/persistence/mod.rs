//! 영속화 모듈 - 인덱스/문서 아티팩트 저장
//!
//! 아티팩트는 두 가지입니다:
//! - 인덱스: `FlatIndex::to_bytes()` 바이트
//! - 문서: 인덱스 순서의 JSON 레코드 라인 (`{"id","text","metadata"}`)
//!
//! 백엔드:
//! - `FileBackend`: 파일 두 개 (임시 파일 기록 후 rename)
//! - `KeyValueBackend`: `{prefix}:index` 바이트 + `{prefix}:documents` 리스트
//!
//! 네트워크 백엔드에 연결할 수 없으면 `StorageBackend::Ephemeral`로 동작합니다.

mod file;
mod kv;

pub use file::FileBackend;
pub use kv::{KeyValueBackend, KeyValueStore, MemoryKeyValueStore, RedisStore};

use std::sync::Arc;

use serde_json::Value;

use crate::config::{BackendKind, PipelineConfig};
use crate::error::{RagError, Result};
use crate::knowledge::{DocumentChunk, Metadata};

// ============================================================================
// Types
// ============================================================================

/// 저장 단위 (인덱스 바이트 + 문서 레코드 라인)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Artifacts {
    pub index: Vec<u8>,
    pub documents: Vec<String>,
}

impl Artifacts {
    /// 청크 목록을 레코드 라인으로 인코딩
    pub fn new<'a>(
        index: Vec<u8>,
        chunks: impl IntoIterator<Item = &'a DocumentChunk>,
    ) -> Result<Self> {
        let documents = chunks
            .into_iter()
            .map(encode_record)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { index, documents })
    }

    /// 레코드 라인 디코딩 (빈 줄과 빈 텍스트는 건너뜀)
    pub fn chunks(&self) -> Vec<DocumentChunk> {
        self.documents
            .iter()
            .filter_map(|line| decode_record(line))
            .collect()
    }
}

/// 아티팩트 저장소
pub trait ArtifactBackend: Send + Sync {
    /// 두 아티팩트 기록
    fn write(&self, artifacts: &Artifacts) -> Result<()>;

    /// 두 아티팩트 읽기
    ///
    /// 인덱스가 없으면 `RagError::NotFound`, 문서가 없으면 빈 목록입니다.
    fn read(&self) -> Result<Artifacts>;

    /// 로그/상태 표시용 설명
    fn describe(&self) -> String;
}

/// 생성 시점에 결정된 영속화 백엔드
#[derive(Clone)]
pub enum StorageBackend {
    Ready(Arc<dyn ArtifactBackend>),
    /// 메모리 전용 (사유)
    Ephemeral(String),
}

impl std::fmt::Debug for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.describe())
    }
}

impl StorageBackend {
    pub fn ready(backend: impl ArtifactBackend + 'static) -> Self {
        Self::Ready(Arc::new(backend))
    }

    pub fn is_ephemeral(&self) -> bool {
        matches!(self, Self::Ephemeral(_))
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Ready(backend) => backend.describe(),
            Self::Ephemeral(reason) => format!("ephemeral ({})", reason),
        }
    }

    /// 사용 가능한 백엔드 (메모리 전용이면 실패)
    pub fn backend(&self) -> Result<&dyn ArtifactBackend> {
        match self {
            Self::Ready(backend) => Ok(backend.as_ref()),
            Self::Ephemeral(reason) => Err(RagError::backend(anyhow::anyhow!(
                "running in ephemeral mode: {}",
                reason
            ))),
        }
    }

    /// 설정으로 백엔드 결정
    ///
    /// Redis에 연결할 수 없으면 경고 후 메모리 전용 모드로 전환합니다.
    pub fn from_config(config: &PipelineConfig) -> Self {
        match config.persistence.backend {
            BackendKind::File => Self::ready(FileBackend::new(
                config.resolved_index_path(),
                config.resolved_documents_path(),
            )),
            BackendKind::Redis => {
                let timeout =
                    std::time::Duration::from_millis(config.persistence.connect_timeout_ms);
                match RedisStore::connect(&config.persistence.redis_url, timeout) {
                    Ok(store) => {
                        tracing::info!("Connected to Redis at {}", config.persistence.redis_url);
                        Self::ready(KeyValueBackend::new(store, &config.persistence.key_prefix))
                    }
                    Err(e) => {
                        tracing::warn!(
                            "Redis unavailable at {} ({:#}), falling back to ephemeral in-memory mode",
                            config.persistence.redis_url,
                            e
                        );
                        Self::Ephemeral(format!("redis unreachable: {}", e))
                    }
                }
            }
        }
    }
}

// ============================================================================
// Record Encoding
// ============================================================================

/// 청크를 레코드 라인으로 인코딩
pub fn encode_record(chunk: &DocumentChunk) -> Result<String> {
    Ok(serde_json::to_string(chunk)?)
}

/// 레코드 라인 디코딩
///
/// - `{`로 시작하고 JSON 객체로 파싱되면 레코드 (`id` 또는 `chunk_id`)
/// - 그 외(파싱 실패 포함)는 레거시 텍스트 라인으로 보고 새 ID 부여
/// - 빈 줄, 텍스트가 빈 레코드는 `None`
pub fn decode_record(line: &str) -> Option<DocumentChunk> {
    let cleaned = line.trim();
    if cleaned.is_empty() {
        return None;
    }

    if cleaned.starts_with('{') {
        if let Ok(Value::Object(payload)) = serde_json::from_str::<Value>(cleaned) {
            return decode_object(payload);
        }
        tracing::debug!("Treating unparseable record line as legacy text");
    }

    Some(DocumentChunk::new(
        uuid::Uuid::new_v4().to_string(),
        cleaned,
        Metadata::new(),
    ))
}

fn decode_object(mut payload: serde_json::Map<String, Value>) -> Option<DocumentChunk> {
    // 공백 여부만 판단하고 텍스트는 저장된 그대로 유지
    let text = match payload.remove("text") {
        Some(Value::String(text)) if !text.trim().is_empty() => text,
        _ => return None,
    };

    let metadata = match payload.remove("metadata") {
        Some(Value::Object(map)) => map,
        _ => Metadata::new(),
    };

    let id = ["id", "chunk_id"]
        .iter()
        .find_map(|key| {
            payload
                .get(*key)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        })
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    Some(DocumentChunk::new(id, text, metadata))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_roundtrip() {
        let mut metadata = Metadata::new();
        metadata.insert("category".into(), json!("guideline"));
        let chunk = DocumentChunk::new("doc-0", "Wash hands.", metadata);

        let line = encode_record(&chunk).unwrap();
        assert!(!line.contains('\n'));
        assert_eq!(decode_record(&line), Some(chunk));
    }

    #[test]
    fn test_legacy_line() {
        let chunk = decode_record("  plain legacy text  ").unwrap();
        assert_eq!(chunk.text, "plain legacy text");
        assert!(chunk.metadata.is_empty());
        assert!(uuid::Uuid::parse_str(&chunk.id).is_ok());
    }

    #[test]
    fn test_brace_line_that_is_not_json_is_legacy() {
        let chunk = decode_record("{not json at all").unwrap();
        assert_eq!(chunk.text, "{not json at all");
    }

    #[test]
    fn test_record_variants() {
        assert!(decode_record("   ").is_none());
        assert!(decode_record(r#"{"id":"x","text":"   "}"#).is_none());

        let chunk = decode_record(r#"{"chunk_id":"legacy-7","text":"hi","metadata":null}"#).unwrap();
        assert_eq!(chunk.id, "legacy-7");
        assert!(chunk.metadata.is_empty());

        let chunk = decode_record(r#"{"text":"no id"}"#).unwrap();
        assert!(!chunk.id.is_empty());
    }

    #[test]
    fn test_record_text_kept_verbatim() {
        let chunk = DocumentChunk::new("doc-2", " six.\nSeven eight.\n", Metadata::new());
        let line = encode_record(&chunk).unwrap();
        assert_eq!(decode_record(&line).unwrap().text, " six.\nSeven eight.\n");

        // 레코드 라인 앞뒤 공백은 텍스트에 영향 없음
        let padded = format!("  {}  ", line);
        assert_eq!(decode_record(&padded), Some(chunk));
    }

    #[test]
    fn test_artifacts_chunks_skips_blank() {
        let artifacts = Artifacts {
            index: vec![],
            documents: vec![
                r#"{"id":"a","text":"alpha","metadata":{}}"#.to_string(),
                String::new(),
                "beta".to_string(),
            ],
        };
        let chunks = artifacts.chunks();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].id, "a");
        assert_eq!(chunks[1].text, "beta");
    }

    #[test]
    fn test_ephemeral_backend_rejects() {
        let backend = StorageBackend::Ephemeral("redis unreachable".to_string());
        assert!(backend.is_ephemeral());
        assert!(matches!(
            backend.backend(),
            Err(RagError::ProviderUnavailable { .. })
        ));
        assert!(backend.describe().starts_with("ephemeral"));
    }

    #[test]
    fn test_unreachable_redis_falls_back() {
        let mut config = PipelineConfig::default();
        config.persistence.backend = BackendKind::Redis;
        config.persistence.redis_url = "redis://127.0.0.1:1/0".to_string();
        config.persistence.connect_timeout_ms = 200;

        assert!(StorageBackend::from_config(&config).is_ephemeral());
    }
}
