//! 임베딩 모듈 - 텍스트 벡터화
//!
//! 텍스트를 고정 차원 벡터로 변환하는 프로바이더 인터페이스와 구현체입니다.
//!
//! - `HttpEmbedding`: OpenAI 호환 `/embeddings` 엔드포인트 (배치 요청 1회)
//! - `HashingEmbedding`: 네트워크 없이 동작하는 결정적 해싱 임베딩
//!
//! 프로바이더는 파이프라인 생성 시 한 번만 `Embedder::Ready` 또는
//! `Embedder::Unavailable`로 결정되며, 이후 다시 탐지하지 않습니다.
//!
//! ## 사용법
//! ```rust,ignore
//! let embedder = HttpEmbedding::new(endpoint, "text-embedding-3-small", Some(key), timeout)?;
//! let vectors = embedder.embed_batch(&["Hello, world!".to_string()])?;
//! ```

mod hashing;

pub use hashing::HashingEmbedding;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::config::{EmbeddingConfig, EmbeddingProviderKind};
use crate::error::RagError;
use crate::knowledge::l2_normalize;

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// 임베딩 프로바이더 트레이트
///
/// 호출은 동기(blocking)입니다. 재시도 정책은 호출자 책임입니다.
pub trait EmbeddingProvider: Send + Sync {
    /// 배치 임베딩 (입력 순서와 같은 순서로 반환)
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// 단일 텍스트 임베딩
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])?
            .into_iter()
            .next()
            .context("provider returned no vector")
    }

    /// 프로바이더 이름
    fn name(&self) -> &str;
}

// ============================================================================
// Embedder (resolved capability)
// ============================================================================

/// 생성 시점에 결정된 임베딩 능력
#[derive(Clone)]
pub enum Embedder {
    Ready(Arc<dyn EmbeddingProvider>),
    /// 사용 불가 (사유)
    Unavailable(String),
}

impl fmt::Debug for Embedder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready(p) => f.debug_tuple("Ready").field(&p.name()).finish(),
            Self::Unavailable(reason) => f.debug_tuple("Unavailable").field(reason).finish(),
        }
    }
}

impl Embedder {
    pub fn ready(provider: impl EmbeddingProvider + 'static) -> Self {
        Self::Ready(Arc::new(provider))
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Ready(p) => p.name(),
            Self::Unavailable(_) => "unavailable",
        }
    }

    /// 텍스트 배치 임베딩
    ///
    /// 벡터 수가 입력 수와 다르면 프로바이더 실패로 처리합니다.
    /// `normalize`가 참이면 각 벡터를 L2 정규화합니다.
    pub fn embed(&self, texts: &[String], normalize: bool) -> Result<Vec<Vec<f32>>, RagError> {
        let provider = match self {
            Self::Ready(p) => p,
            Self::Unavailable(reason) => {
                return Err(RagError::embedder(anyhow::anyhow!("{}", reason)));
            }
        };

        if texts.is_empty() {
            return Ok(vec![]);
        }

        let mut vectors = provider.embed_batch(texts).map_err(RagError::embedder)?;
        if vectors.len() != texts.len() {
            return Err(RagError::embedder(anyhow::anyhow!(
                "{} returned {} vectors for {} texts",
                provider.name(),
                vectors.len(),
                texts.len()
            )));
        }

        if normalize {
            vectors.iter_mut().for_each(|v| l2_normalize(v));
        }

        tracing::debug!("Embedded {} texts with {}", texts.len(), provider.name());
        Ok(vectors)
    }
}

// ============================================================================
// OpenAI-compatible HTTP Embedding
// ============================================================================

/// 기본 임베딩 엔드포인트
pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/embeddings";

/// 기본 요청 타임아웃
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// OpenAI 호환 HTTP 임베딩 구현체
///
/// Ollama, vLLM, LM Studio 등 `/v1/embeddings`를 제공하는 서버와 호환됩니다.
#[derive(Debug)]
pub struct HttpEmbedding {
    client: reqwest::blocking::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

/// 요청 본문
#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

/// 응답
#[derive(Debug, Deserialize)]
struct EmbedResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

/// 에러 응답
#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

impl HttpEmbedding {
    /// 새 HTTP 임베딩 인스턴스 생성
    ///
    /// # Arguments
    /// * `endpoint` - 임베딩 API URL
    /// * `model` - 모델 식별자
    /// * `api_key` - Bearer 토큰 (로컬 서버는 없어도 됨)
    /// * `timeout` - 요청 타임아웃
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            model: model.into(),
            api_key,
        })
    }

    /// 설정에서 생성
    ///
    /// `api_key_required`인데 키가 없으면 실패합니다.
    pub fn from_config(model: &str, config: &EmbeddingConfig) -> Result<Self> {
        let api_key = get_api_key(&config.api_key_env);
        if api_key.is_none() && config.api_key_required {
            anyhow::bail!(
                "API key not found. Set {} or OPENAI_API_KEY environment variable,\n\
                 or set embedding.api_key_required = false for a local server.",
                config.api_key_env
            );
        }

        Self::new(
            config.endpoint.clone(),
            model,
            api_key,
            Duration::from_secs(config.timeout_secs),
        )
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl EmbeddingProvider for HttpEmbedding {
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let request = EmbedRequest {
            model: &self.model,
            input: texts,
        };

        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(ref key) = self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .with_context(|| format!("Failed to send embedding request to {}", self.endpoint))?;

        let status = response.status();
        let body = response.text().context("Failed to read response body")?;

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<ApiError>(&body) {
                anyhow::bail!("Embedding API error ({}): {}", status, error.error.message);
            }
            anyhow::bail!("Embedding API error ({}): {}", status, body);
        }

        let mut parsed: EmbedResponse =
            serde_json::from_str(&body).context("Failed to parse embedding response")?;
        parsed.data.sort_by_key(|d| d.index);

        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }

    fn name(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// API Key Management
// ============================================================================

/// API 키 로드 (환경변수에서)
///
/// 우선순위:
/// 1. 설정된 환경변수 (`embedding.api_key_env`)
/// 2. `OPENAI_API_KEY`
pub fn get_api_key(primary_env: &str) -> Option<String> {
    [primary_env, "OPENAI_API_KEY"]
        .into_iter()
        .find_map(|name| match std::env::var(name) {
            Ok(key) if !key.is_empty() => {
                tracing::debug!("Using API key from {}", name);
                Some(key)
            }
            _ => None,
        })
}

// ============================================================================
// Factory Function
// ============================================================================

/// 설정으로 임베딩 능력 결정
///
/// 생성에 실패하면 경고를 남기고 `Unavailable`을 반환합니다.
pub fn create_embedder(model: &str, config: &EmbeddingConfig) -> Embedder {
    match config.provider {
        EmbeddingProviderKind::Hashing => {
            let embedder = HashingEmbedding::new(config.dimension);
            tracing::info!(
                "Using hashing embedding (dimension: {})",
                embedder.dimension()
            );
            Embedder::ready(embedder)
        }
        EmbeddingProviderKind::Http => match HttpEmbedding::from_config(model, config) {
            Ok(embedder) => {
                tracing::info!(
                    "Using HTTP embedding {} at {}",
                    embedder.model(),
                    config.endpoint
                );
                Embedder::ready(embedder)
            }
            Err(e) => {
                tracing::warn!("Embedding provider unavailable: {}", e);
                Embedder::Unavailable(e.to_string())
            }
        },
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProvider {
        vectors: Vec<Vec<f32>>,
    }

    impl EmbeddingProvider for FixedProvider {
        fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(self.vectors.clone())
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    #[test]
    fn test_unavailable_embedder_fails() {
        let embedder = Embedder::Unavailable("no credentials".to_string());
        assert!(!embedder.is_available());
        let err = embedder.embed(&["x".to_string()], true).unwrap_err();
        assert!(matches!(err, RagError::ProviderUnavailable { .. }));
        assert!(err.to_string().contains("no credentials"));
    }

    #[test]
    fn test_embedder_normalizes() {
        let embedder = Embedder::ready(FixedProvider {
            vectors: vec![vec![3.0, 4.0]],
        });
        let vectors = embedder.embed(&["x".to_string()], true).unwrap();
        assert!((vectors[0][0] - 0.6).abs() < 1e-6);

        let raw = embedder.embed(&["x".to_string()], false).unwrap();
        assert_eq!(raw[0], vec![3.0, 4.0]);
    }

    #[test]
    fn test_embedder_rejects_wrong_vector_count() {
        let embedder = Embedder::ready(FixedProvider {
            vectors: vec![vec![1.0]],
        });
        let texts = vec!["a".to_string(), "b".to_string()];
        assert!(matches!(
            embedder.embed(&texts, false),
            Err(RagError::ProviderUnavailable { .. })
        ));
        assert!(embedder.embed(&[], false).unwrap().is_empty());
    }

    #[test]
    fn test_http_embedding_requires_key_when_configured() {
        let config = EmbeddingConfig {
            provider: EmbeddingProviderKind::Http,
            api_key_env: "PALANK_RAG_TEST_MISSING_KEY".to_string(),
            api_key_required: true,
            ..EmbeddingConfig::default()
        };
        // OPENAI_API_KEY가 설정된 환경에서는 생성이 성공할 수 있음
        if std::env::var("OPENAI_API_KEY").is_err() {
            assert!(HttpEmbedding::from_config("text-embedding-3-small", &config).is_err());
            assert!(!create_embedder("text-embedding-3-small", &config).is_available());
        }

        let local = EmbeddingConfig {
            api_key_required: false,
            ..config
        };
        assert!(HttpEmbedding::from_config("nomic-embed-text", &local).is_ok());
    }

    #[test]
    fn test_http_embedding_unreachable_endpoint() {
        let embedder = HttpEmbedding::new(
            "http://127.0.0.1:9/v1/embeddings",
            "test-model",
            None,
            Duration::from_secs(2),
        )
        .unwrap();
        assert!(embedder.embed("hello").is_err());
    }

    #[test]
    fn test_hashing_factory() {
        let embedder = create_embedder("all-MiniLM-L6-v2", &EmbeddingConfig::default());
        assert!(embedder.is_available());
        assert_eq!(embedder.name(), "hashing");
    }
}
