//! Document Store - 청크 레코드 저장소
//!
//! 벡터 인덱스와 위치가 정렬된 append-only 청크 목록입니다.
//! `store[i]`는 항상 인덱스의 `i`번째 벡터에 대응합니다.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{RagError, Result};

// ============================================================================
// Data Directory
// ============================================================================

/// 데이터 디렉토리 경로 (~/.palank-rag/)
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".palank-rag")
}

// ============================================================================
// Types
// ============================================================================

/// 청크 메타데이터 (문자열 키 → JSON 값)
pub type Metadata = serde_json::Map<String, Value>;

/// 저장된 청크
///
/// 생성 후에는 변경되지 않습니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    /// 스토어 내 고유 ID
    pub id: String,
    /// 청크 텍스트
    pub text: String,
    /// 메타데이터
    #[serde(default)]
    pub metadata: Metadata,
}

impl DocumentChunk {
    pub fn new(id: impl Into<String>, text: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            metadata,
        }
    }
}

/// 저장소 통계
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub chunk_count: usize,
    pub total_text_chars: usize,
}

// ============================================================================
// DocumentStore
// ============================================================================

/// 청크 레코드 저장소
#[derive(Debug, Clone, Default)]
pub struct DocumentStore {
    chunks: Vec<DocumentChunk>,
    positions: HashMap<String, usize>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 로드된 레코드로 저장소 구성
    ///
    /// 중복 ID는 첫 번째만 유지하고, 이후 중복에는 새 UUID를 부여합니다.
    pub fn from_chunks(chunks: Vec<DocumentChunk>) -> Self {
        let mut store = Self::new();
        for mut chunk in chunks {
            if store.positions.contains_key(&chunk.id) {
                let fresh = uuid::Uuid::new_v4().to_string();
                tracing::warn!(
                    "Duplicate chunk id '{}' in loaded records, reassigned to {}",
                    chunk.id,
                    fresh
                );
                chunk.id = fresh;
            }
            store.positions.insert(chunk.id.clone(), store.chunks.len());
            store.chunks.push(chunk);
        }
        store
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// 위치로 청크 조회
    pub fn get(&self, position: usize) -> Option<&DocumentChunk> {
        self.chunks.get(position)
    }

    /// ID로 청크 조회
    pub fn get_by_id(&self, id: &str) -> Option<&DocumentChunk> {
        self.positions.get(id).and_then(|&pos| self.chunks.get(pos))
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.positions.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DocumentChunk> {
        self.chunks.iter()
    }

    /// 배치 추가 검증 (저장소 변경 없음)
    ///
    /// 기존 ID 또는 배치 내 중복 ID가 있으면 실패합니다.
    pub fn check_batch(&self, chunks: &[DocumentChunk]) -> Result<()> {
        let mut seen = std::collections::HashSet::with_capacity(chunks.len());
        for chunk in chunks {
            if self.contains_id(&chunk.id) || !seen.insert(chunk.id.as_str()) {
                return Err(RagError::DuplicateChunkId(chunk.id.clone()));
            }
        }
        Ok(())
    }

    /// 청크 배치 추가 (전부 또는 전무)
    pub fn append(&mut self, chunks: Vec<DocumentChunk>) -> Result<()> {
        self.check_batch(&chunks)?;
        for chunk in chunks {
            self.positions.insert(chunk.id.clone(), self.chunks.len());
            self.chunks.push(chunk);
        }
        Ok(())
    }

    /// 모든 청크 제거
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.positions.clear();
    }

    /// 저장소 통계
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            chunk_count: self.chunks.len(),
            total_text_chars: self.chunks.iter().map(|c| c.text.chars().count()).sum(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chunk(id: &str, text: &str) -> DocumentChunk {
        DocumentChunk::new(id, text, Metadata::new())
    }

    #[test]
    fn test_append_and_lookup() {
        let mut store = DocumentStore::new();
        store
            .append(vec![chunk("a-0", "alpha"), chunk("a-1", "beta")])
            .unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(store.get(1).map(|c| c.text.as_str()), Some("beta"));
        assert_eq!(store.get_by_id("a-0").map(|c| c.text.as_str()), Some("alpha"));
        assert!(store.get(2).is_none());
    }

    #[test]
    fn test_duplicate_ids_rejected_atomically() {
        let mut store = DocumentStore::new();
        store.append(vec![chunk("x", "first")]).unwrap();

        let err = store
            .append(vec![chunk("y", "second"), chunk("x", "again")])
            .unwrap_err();
        assert!(matches!(err, RagError::DuplicateChunkId(ref id) if id == "x"));
        assert_eq!(store.len(), 1);
        assert!(!store.contains_id("y"));

        assert!(store
            .append(vec![chunk("z", "one"), chunk("z", "two")])
            .is_err());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_from_chunks_reassigns_duplicates() {
        let store = DocumentStore::from_chunks(vec![
            chunk("dup", "first"),
            chunk("dup", "second"),
            chunk("other", "third"),
        ]);

        assert_eq!(store.len(), 3);
        assert_eq!(store.get(0).map(|c| c.id.as_str()), Some("dup"));
        let second = store.get(1).unwrap();
        assert_ne!(second.id, "dup");
        assert_eq!(store.get_by_id(&second.id).map(|c| c.text.as_str()), Some("second"));
    }

    #[test]
    fn test_clear_and_stats() {
        let mut metadata = Metadata::new();
        metadata.insert("category".into(), json!("trial"));

        let mut store = DocumentStore::new();
        store
            .append(vec![
                DocumentChunk::new("k-0", "1234567890", metadata),
                chunk("k-1", "세계"),
            ])
            .unwrap();

        let stats = store.stats();
        assert_eq!(stats.chunk_count, 2);
        assert_eq!(stats.total_text_chars, 12);

        store.clear();
        assert!(store.is_empty());
        assert!(!store.contains_id("k-0"));
    }

    #[test]
    fn test_chunk_serialization_defaults_metadata() {
        let parsed: DocumentChunk =
            serde_json::from_str(r#"{"id":"c-1","text":"hello"}"#).unwrap();
        assert!(parsed.metadata.is_empty());
        assert_eq!(parsed.id, "c-1");
    }

    #[test]
    fn test_data_dir_name() {
        assert!(get_data_dir().ends_with(".palank-rag"));
    }
}
