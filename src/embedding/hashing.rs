//! Hashing Embedding - 오프라인 결정적 임베딩
//!
//! 소문자 단어 토큰을 SHA-256으로 버킷에 해싱하는 feature hashing 방식입니다.
//! 같은 입력은 항상 같은 벡터가 되며, 네트워크나 모델 파일이 필요 없습니다.

use std::collections::HashMap;

use anyhow::Result;
use sha2::{Digest, Sha256};

use super::EmbeddingProvider;

/// 기본 차원
pub const DEFAULT_DIMENSION: usize = 384;

/// 해싱 임베딩 구현체
#[derive(Debug, Clone)]
pub struct HashingEmbedding {
    dimension: usize,
}

impl Default for HashingEmbedding {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSION)
    }
}

impl HashingEmbedding {
    /// 새 인스턴스 생성 (차원 최소 1)
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// 단일 텍스트 벡터화
    ///
    /// 토큰 빈도는 `1 + ln(tf)`로 완화하고, 해시 비트로 부호를 정해
    /// 버킷 충돌이 서로 상쇄되도록 합니다.
    pub fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut counts: HashMap<String, u32> = HashMap::new();
        for token in tokenize(text) {
            *counts.entry(token).or_insert(0) += 1;
        }

        let mut vector = vec![0.0f32; self.dimension];
        for (token, tf) in counts {
            let digest = Sha256::digest(token.as_bytes());
            let mut head = [0u8; 8];
            head.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(head) % self.dimension as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign * (1.0 + (tf as f32).ln());
        }
        vector
    }
}

/// 영숫자 연속 구간을 소문자 토큰으로 분리
fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

impl EmbeddingProvider for HashingEmbedding {
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.vectorize(t)).collect())
    }

    fn name(&self) -> &str {
        "hashing"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::{inner_product, l2_normalize};

    fn cosine(a: &str, b: &str) -> f32 {
        let embedder = HashingEmbedding::default();
        let mut va = embedder.vectorize(a);
        let mut vb = embedder.vectorize(b);
        l2_normalize(&mut va);
        l2_normalize(&mut vb);
        inner_product(&va, &vb)
    }

    #[test]
    fn test_deterministic() {
        let embedder = HashingEmbedding::new(64);
        let a = embedder.vectorize("Gene editing with CRISPR");
        let b = embedder.vectorize("gene EDITING, with crispr!");
        assert_eq!(a.len(), 64);
        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_text_is_zero_vector() {
        let v = HashingEmbedding::new(16).vectorize("  ...  ");
        assert!(v.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_shared_tokens_score_higher() {
        let related = cosine("gene editing tool", "CRISPR-Cas9 gene editing tool");
        let unrelated = cosine("gene editing tool", "the powerhouse of the cell");
        assert!(related > unrelated);
        assert!((cosine("same words", "same words") - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_batch_order_and_name() {
        let embedder = HashingEmbedding::new(32);
        let texts = vec!["one".to_string(), "two".to_string()];
        let vectors = embedder.embed_batch(&texts).unwrap();
        assert_eq!(vectors[0], embedder.vectorize("one"));
        assert_eq!(vectors[1], embedder.vectorize("two"));
        assert_eq!(embedder.name(), "hashing");
        assert_eq!(HashingEmbedding::new(0).dimension(), 1);
    }
}
