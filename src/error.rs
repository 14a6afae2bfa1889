//! 에러 타입
//!
//! 라이브러리 경계에서는 `RagError`를 반환하고,
//! 프로바이더 내부와 CLI는 `anyhow`를 사용합니다.

use std::path::PathBuf;

use thiserror::Error;

/// RAG 코어 에러
#[derive(Debug, Error)]
pub enum RagError {
    /// 잘못된 설정 (저장 경로 누락, 지원하지 않는 인덱스 종류 등)
    #[error("configuration error: {0}")]
    Configuration(String),

    /// 로드할 인덱스 아티팩트가 없음
    #[error("no index artifact found at {0}")]
    NotFound(String),

    /// 임베딩 프로바이더 또는 영속화 백엔드에 접근 불가
    #[error("{what} unavailable: {source}")]
    ProviderUnavailable {
        /// 접근하지 못한 대상
        what: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// 임베딩 차원이 인덱스 차원과 다름
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// 호출자가 지정한 청크 ID가 이미 존재함
    #[error("duplicate chunk id: {0}")]
    DuplicateChunkId(String),

    /// 파일 입출력 실패
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// 직렬화 / 역직렬화 실패
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("pipeline state lock poisoned")]
    LockPoisoned,
}

impl RagError {
    /// 임베딩 프로바이더 접근 실패
    pub fn embedder(source: impl Into<anyhow::Error>) -> Self {
        Self::ProviderUnavailable {
            what: "embedding provider",
            source: source.into(),
        }
    }

    /// 영속화 백엔드 접근 실패
    pub fn backend(source: impl Into<anyhow::Error>) -> Self {
        Self::ProviderUnavailable {
            what: "persistence backend",
            source: source.into(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// RAG 코어 결과 타입
pub type Result<T> = std::result::Result<T, RagError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_unavailable_message() {
        let err = RagError::embedder(anyhow::anyhow!("connection refused"));
        assert_eq!(
            err.to_string(),
            "embedding provider unavailable: connection refused"
        );

        let err = RagError::backend(anyhow::anyhow!("timeout"));
        assert!(err.to_string().starts_with("persistence backend unavailable"));
    }

    #[test]
    fn test_dimension_mismatch_message() {
        let err = RagError::DimensionMismatch {
            expected: 384,
            actual: 768,
        };
        assert_eq!(err.to_string(), "dimension mismatch: expected 384, got 768");
    }
}
