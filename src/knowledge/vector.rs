//! Vector Index - 플랫 벡터 인덱스
//!
//! 모든 벡터를 삽입 순서대로 연속 메모리에 저장하고
//! 전수 비교(exact search)로 최근접 이웃을 찾습니다.
//!
//! - `flat_ip`: 내적, 클수록 유사 (정규화된 벡터면 코사인 유사도)
//! - `flat_l2`: 제곱 유클리드 거리, 작을수록 유사
//!
//! 인덱스는 append-only 입니다. 삭제/수정 연산은 없고 `reset`만 있습니다.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::error::{RagError, Result};

// ============================================================================
// Index Kind
// ============================================================================

/// 인덱스 종류 (랭킹 규칙 포함)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    /// 내적 - 점수 내림차순
    #[default]
    FlatIp,
    /// 제곱 L2 거리 - 점수 오름차순
    FlatL2,
}

impl IndexKind {
    /// 두 점수의 "더 좋은 순" 비교
    ///
    /// `Ordering::Less`이면 `a`가 앞에 옵니다.
    pub fn rank(self, a: f32, b: f32) -> Ordering {
        match self {
            Self::FlatIp => b.total_cmp(&a),
            Self::FlatL2 => a.total_cmp(&b),
        }
    }

    /// 벡터 간 점수 (이 인덱스 종류의 고유 척도)
    pub fn score(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Self::FlatIp => inner_product(a, b),
            Self::FlatL2 => squared_l2(a, b),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::FlatIp => "flat_ip",
            Self::FlatL2 => "flat_l2",
        }
    }

    fn tag(self) -> u8 {
        match self {
            Self::FlatIp => 0,
            Self::FlatL2 => 1,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::FlatIp),
            1 => Some(Self::FlatL2),
            _ => None,
        }
    }
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IndexKind {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "flat_ip" => Ok(Self::FlatIp),
            "flat_l2" => Ok(Self::FlatL2),
            other => Err(RagError::Configuration(format!(
                "unsupported index kind '{}' (expected flat_ip or flat_l2)",
                other
            ))),
        }
    }
}

// ============================================================================
// Types
// ============================================================================

/// 검색 히트 (인덱스 내 위치 + 점수)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    pub position: usize,
    pub score: f32,
}

/// 인덱스 아티팩트 디코딩 실패
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IndexDecodeError {
    #[error("not an index artifact (bad magic)")]
    BadMagic,
    #[error("unknown index kind tag {0}")]
    UnknownKind(u8),
    #[error("artifact truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("artifact checksum mismatch")]
    ChecksumMismatch,
}

// ============================================================================
// FlatIndex
// ============================================================================

/// 아티팩트 매직 바이트
const MAGIC: &[u8; 8] = b"PKRIDX01";
/// magic + kind + dimension + count
const HEADER_LEN: usize = 8 + 1 + 4 + 8;
const CHECKSUM_LEN: usize = 32;

/// 플랫 벡터 인덱스
///
/// 차원은 첫 `add` 호출에서 결정됩니다.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatIndex {
    kind: IndexKind,
    dimension: Option<usize>,
    data: Vec<f32>,
}

impl FlatIndex {
    /// 빈 인덱스 생성 (차원 미정)
    pub fn new(kind: IndexKind) -> Self {
        Self {
            kind,
            dimension: None,
            data: Vec::new(),
        }
    }

    pub fn kind(&self) -> IndexKind {
        self.kind
    }

    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// 저장된 벡터 수
    pub fn count(&self) -> usize {
        match self.dimension {
            Some(dim) => self.data.len() / dim,
            None => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// 위치로 벡터 조회
    pub fn vector(&self, position: usize) -> Option<&[f32]> {
        let dim = self.dimension?;
        self.data.get(position * dim..(position + 1) * dim)
    }

    /// 배치 차원 검증 (인덱스 변경 없음)
    ///
    /// 차원이 아직 없으면 첫 벡터의 차원을 기준으로 합니다.
    pub fn check_batch(&self, vectors: &[Vec<f32>]) -> Result<usize> {
        let expected = match (self.dimension, vectors.first()) {
            (Some(dim), _) => dim,
            (None, Some(first)) => first.len(),
            (None, None) => return Ok(0),
        };

        if expected == 0 {
            return Err(RagError::DimensionMismatch {
                expected: 1,
                actual: 0,
            });
        }

        if let Some(bad) = vectors.iter().find(|v| v.len() != expected) {
            return Err(RagError::DimensionMismatch {
                expected,
                actual: bad.len(),
            });
        }

        Ok(expected)
    }

    /// 벡터 배치 추가
    ///
    /// 하나라도 차원이 맞지 않으면 아무것도 추가하지 않습니다.
    pub fn add(&mut self, vectors: &[Vec<f32>]) -> Result<()> {
        let dim = self.check_batch(vectors)?;
        if vectors.is_empty() {
            return Ok(());
        }

        self.dimension = Some(dim);
        self.data.reserve(dim * vectors.len());
        for v in vectors {
            self.data.extend_from_slice(v);
        }

        Ok(())
    }

    /// 최근접 `k`개 검색 (좋은 순)
    ///
    /// 동점은 삽입 순서를 유지합니다.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Hit>> {
        let Some(dim) = self.dimension else {
            return Ok(vec![]);
        };
        if query.len() != dim {
            return Err(RagError::DimensionMismatch {
                expected: dim,
                actual: query.len(),
            });
        }
        if k == 0 {
            return Ok(vec![]);
        }

        let mut hits: Vec<Hit> = self
            .data
            .chunks_exact(dim)
            .enumerate()
            .map(|(position, v)| Hit {
                position,
                score: self.kind.score(query, v),
            })
            .collect();

        hits.sort_by(|a, b| self.kind.rank(a.score, b.score));
        hits.truncate(k);
        Ok(hits)
    }

    /// 모든 벡터 제거 (종류와 차원은 유지)
    pub fn reset(&mut self) {
        self.data.clear();
    }

    // ------------------------------------------------------------------------
    // Serialization
    // ------------------------------------------------------------------------

    /// 아티팩트 바이트로 직렬화
    ///
    /// `magic | kind(u8) | dimension(u32 LE) | count(u64 LE) | f32 LE... | sha256`
    pub fn to_bytes(&self) -> Vec<u8> {
        let dim = self.dimension.unwrap_or(0);
        let mut bytes = Vec::with_capacity(HEADER_LEN + self.data.len() * 4 + CHECKSUM_LEN);

        bytes.extend_from_slice(MAGIC);
        bytes.push(self.kind.tag());
        bytes.extend_from_slice(&(dim as u32).to_le_bytes());
        bytes.extend_from_slice(&(self.count() as u64).to_le_bytes());
        for value in &self.data {
            bytes.extend_from_slice(&value.to_le_bytes());
        }

        let checksum = Sha256::digest(&bytes);
        bytes.extend_from_slice(&checksum);
        bytes
    }

    /// 아티팩트 바이트에서 복원
    pub fn from_bytes(bytes: &[u8]) -> std::result::Result<Self, IndexDecodeError> {
        if bytes.len() < HEADER_LEN + CHECKSUM_LEN {
            return Err(if bytes.starts_with(MAGIC) || bytes.len() < MAGIC.len() {
                IndexDecodeError::Truncated {
                    expected: HEADER_LEN + CHECKSUM_LEN,
                    actual: bytes.len(),
                }
            } else {
                IndexDecodeError::BadMagic
            });
        }
        if &bytes[..8] != MAGIC {
            return Err(IndexDecodeError::BadMagic);
        }

        let kind = IndexKind::from_tag(bytes[8]).ok_or(IndexDecodeError::UnknownKind(bytes[8]))?;
        let dim = u32::from_le_bytes([bytes[9], bytes[10], bytes[11], bytes[12]]) as usize;
        let mut count_bytes = [0u8; 8];
        count_bytes.copy_from_slice(&bytes[13..21]);
        let count = u64::from_le_bytes(count_bytes) as usize;

        let expected = count
            .checked_mul(dim)
            .and_then(|n| n.checked_mul(4))
            .and_then(|n| n.checked_add(HEADER_LEN + CHECKSUM_LEN))
            .unwrap_or(usize::MAX);
        if bytes.len() != expected {
            return Err(IndexDecodeError::Truncated {
                expected,
                actual: bytes.len(),
            });
        }

        let (body, checksum) = bytes.split_at(bytes.len() - CHECKSUM_LEN);
        if Sha256::digest(body).as_slice() != checksum {
            return Err(IndexDecodeError::ChecksumMismatch);
        }

        let data = body[HEADER_LEN..]
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();

        Ok(Self {
            kind,
            dimension: (dim > 0).then_some(dim),
            data,
        })
    }
}

// ============================================================================
// Utility Functions
// ============================================================================

/// 내적
pub fn inner_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// 제곱 유클리드 거리
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// L2 정규화 (제자리)
///
/// 영벡터는 그대로 둡니다.
pub fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
