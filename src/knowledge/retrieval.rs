//! Retrieval - 후보 수집, 필터링, 재정렬
//!
//! 검색 흐름:
//! 1. `max_candidates = max(top_k * candidate_multiplier, top_k)`
//! 2. 인덱스에서 `max_candidates`개 최근접 이웃 검색
//! 3. 인덱스 순서대로 범위 확인 → 메타데이터 필터 → 중복 ID 제거
//! 4. 인덱스 종류의 랭킹 규칙으로 좋은 순 정렬
//! 5. reranker가 비어 있지 않은 목록을 돌려주면 교체
//! 6. 상위 `top_k`개 반환

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use super::filter::MetadataFilters;
use super::store::{DocumentStore, Metadata};
use super::vector::FlatIndex;
use crate::error::Result;

// ============================================================================
// Types
// ============================================================================

/// 검색 결과
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub text: String,
    pub metadata: Metadata,
    /// 인덱스 고유 척도 (`flat_ip`: 클수록, `flat_l2`: 작을수록 유사)
    pub score: f32,
    pub chunk_id: String,
}

/// 후보 재정렬기
///
/// 빈 목록을 반환하면 원래 후보 순서를 유지합니다.
pub trait Reranker: Send + Sync {
    fn rerank(&self, query: &str, candidates: &[SearchResult]) -> Vec<SearchResult>;
}

impl<F> Reranker for F
where
    F: Fn(&str, &[SearchResult]) -> Vec<SearchResult> + Send + Sync,
{
    fn rerank(&self, query: &str, candidates: &[SearchResult]) -> Vec<SearchResult> {
        self(query, candidates)
    }
}

/// 검색 옵션
#[derive(Clone, Default)]
pub struct QueryOptions {
    /// 반환 개수 (없으면 설정의 `default_top_k`)
    pub top_k: Option<usize>,
    pub filters: MetadataFilters,
    pub reranker: Option<Arc<dyn Reranker>>,
    /// 후보 수 직접 지정 (`top_k` 이상으로 보정)
    pub max_candidates: Option<usize>,
}

impl fmt::Debug for QueryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryOptions")
            .field("top_k", &self.top_k)
            .field("filters", &self.filters)
            .field("reranker", &self.reranker.is_some())
            .field("max_candidates", &self.max_candidates)
            .finish()
    }
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn filters(mut self, filters: MetadataFilters) -> Self {
        self.filters = filters;
        self
    }

    pub fn reranker(mut self, reranker: impl Reranker + 'static) -> Self {
        self.reranker = Some(Arc::new(reranker));
        self
    }

    pub fn max_candidates(mut self, max_candidates: usize) -> Self {
        self.max_candidates = Some(max_candidates);
        self
    }
}

/// 보정된 검색 범위
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryPlan {
    pub top_k: usize,
    pub max_candidates: usize,
}

// ============================================================================
// RetrievalEngine
// ============================================================================

/// 검색 엔진
///
/// 상태를 소유하지 않습니다. 인덱스와 저장소는 호출자가 빌려줍니다.
#[derive(Debug, Clone, Copy)]
pub struct RetrievalEngine {
    candidate_multiplier: usize,
}

impl RetrievalEngine {
    pub fn new(candidate_multiplier: usize) -> Self {
        Self {
            candidate_multiplier: candidate_multiplier.max(1),
        }
    }

    /// 옵션과 기본값으로 검색 범위 결정
    pub fn plan(&self, options: &QueryOptions, default_top_k: usize) -> QueryPlan {
        let top_k = options.top_k.unwrap_or(default_top_k).max(1);
        let max_candidates = options
            .max_candidates
            .unwrap_or_else(|| top_k.saturating_mul(self.candidate_multiplier))
            .max(top_k);

        QueryPlan {
            top_k,
            max_candidates,
        }
    }

    /// 후보 수집 (검색 → 필터 → 중복 제거 → 정렬)
    ///
    /// 결과는 최대 `plan.max_candidates`개이며 좋은 순입니다.
    pub fn collect(
        &self,
        query_vector: &[f32],
        index: &FlatIndex,
        store: &DocumentStore,
        plan: QueryPlan,
        filters: &MetadataFilters,
    ) -> Result<Vec<SearchResult>> {
        if index.is_empty() {
            return Ok(vec![]);
        }

        let hits = index.search(query_vector, plan.max_candidates)?;
        let mut seen = std::collections::HashSet::new();
        let mut candidates = Vec::with_capacity(hits.len());

        for hit in hits {
            let Some(chunk) = store.get(hit.position) else {
                tracing::debug!("Skipping out-of-range hit at position {}", hit.position);
                continue;
            };
            if !filters.matches(&chunk.metadata) {
                continue;
            }
            if !seen.insert(chunk.id.as_str()) {
                continue;
            }

            candidates.push(SearchResult {
                text: chunk.text.clone(),
                metadata: chunk.metadata.clone(),
                score: hit.score,
                chunk_id: chunk.id.clone(),
            });
            if candidates.len() >= plan.max_candidates {
                break;
            }
        }

        let kind = index.kind();
        candidates.sort_by(|a, b| kind.rank(a.score, b.score));

        tracing::debug!(
            "Collected {} candidates from {} vectors",
            candidates.len(),
            index.count()
        );
        Ok(candidates)
    }

    /// 재정렬 적용 후 `top_k`개로 자르기
    pub fn finish(
        &self,
        query: &str,
        mut candidates: Vec<SearchResult>,
        reranker: Option<&dyn Reranker>,
        plan: QueryPlan,
    ) -> Vec<SearchResult> {
        if let Some(reranker) = reranker {
            if !candidates.is_empty() {
                let reranked = reranker.rerank(query, &candidates);
                if reranked.is_empty() {
                    tracing::debug!("Reranker returned nothing, keeping index order");
                } else {
                    candidates = reranked;
                }
            }
        }

        candidates.truncate(plan.top_k);
        candidates
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::{DocumentChunk, IndexKind};
    use serde_json::json;

    fn fixture(kind: IndexKind) -> (FlatIndex, DocumentStore) {
        let mut index = FlatIndex::new(kind);
        index
            .add(&[vec![1.0, 0.0], vec![0.0, 1.0], vec![0.7, 0.7]])
            .unwrap();

        let categories = ["guideline", "trial", "guideline"];
        let chunks = categories
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let mut metadata = Metadata::new();
                metadata.insert("category".into(), json!(c));
                DocumentChunk::new(format!("c-{}", i), format!("text {}", i), metadata)
            })
            .collect();

        (index, DocumentStore::from_chunks(chunks))
    }

    fn ids(results: &[SearchResult]) -> Vec<&str> {
        results.iter().map(|r| r.chunk_id.as_str()).collect()
    }

    #[test]
    fn test_plan() {
        let engine = RetrievalEngine::new(3);
        let plan = engine.plan(&QueryOptions::new(), 2);
        assert_eq!(plan, QueryPlan { top_k: 2, max_candidates: 6 });

        let plan = engine.plan(&QueryOptions::new().top_k(0), 5);
        assert_eq!(plan.top_k, 1);

        let plan = engine.plan(&QueryOptions::new().top_k(4).max_candidates(2), 3);
        assert_eq!(plan.max_candidates, 4);
    }

    #[test]
    fn test_collect_ranks_inner_product_descending() {
        let (index, store) = fixture(IndexKind::FlatIp);
        let engine = RetrievalEngine::new(3);
        let plan = engine.plan(&QueryOptions::new().top_k(3), 3);

        let results = engine
            .collect(&[1.0, 0.0], &index, &store, plan, &MetadataFilters::new())
            .unwrap();
        assert_eq!(ids(&results), vec!["c-0", "c-2", "c-1"]);
        assert!(results[0].score >= results[1].score);
    }

    #[test]
    fn test_collect_ranks_l2_ascending() {
        let (index, store) = fixture(IndexKind::FlatL2);
        let engine = RetrievalEngine::new(3);
        let plan = engine.plan(&QueryOptions::new().top_k(3), 3);

        let results = engine
            .collect(&[0.0, 1.0], &index, &store, plan, &MetadataFilters::new())
            .unwrap();
        assert_eq!(ids(&results), vec!["c-1", "c-2", "c-0"]);
        assert_eq!(results[0].score, 0.0);
        assert!(results[1].score <= results[2].score);
    }

    #[test]
    fn test_collect_applies_filters() {
        let (index, store) = fixture(IndexKind::FlatIp);
        let engine = RetrievalEngine::new(3);
        let plan = engine.plan(&QueryOptions::new().top_k(3), 3);

        let filters = MetadataFilters::new().equals("category", "trial");
        let results = engine
            .collect(&[1.0, 0.0], &index, &store, plan, &filters)
            .unwrap();
        assert_eq!(ids(&results), vec!["c-1"]);

        let none = MetadataFilters::new().predicate("category", |_| false);
        assert!(engine
            .collect(&[1.0, 0.0], &index, &store, plan, &none)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_collect_skips_positions_missing_from_store() {
        let (index, _) = fixture(IndexKind::FlatIp);
        let store = DocumentStore::from_chunks(vec![DocumentChunk::new(
            "only",
            "only",
            Metadata::new(),
        )]);
        let engine = RetrievalEngine::new(3);
        let plan = engine.plan(&QueryOptions::new().top_k(3), 3);

        let results = engine
            .collect(&[0.0, 1.0], &index, &store, plan, &MetadataFilters::new())
            .unwrap();
        assert_eq!(ids(&results), vec!["only"]);
    }

    #[test]
    fn test_collect_empty_index() {
        let engine = RetrievalEngine::new(3);
        let plan = engine.plan(&QueryOptions::new(), 3);
        let results = engine
            .collect(
                &[1.0],
                &FlatIndex::new(IndexKind::FlatIp),
                &DocumentStore::new(),
                plan,
                &MetadataFilters::new(),
            )
            .unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_finish_with_reranker() {
        let (index, store) = fixture(IndexKind::FlatIp);
        let engine = RetrievalEngine::new(3);
        let options = QueryOptions::new()
            .top_k(2)
            .reranker(|_q: &str, c: &[SearchResult]| c.iter().rev().cloned().collect());
        let plan = engine.plan(&options, 3);

        let candidates = engine
            .collect(&[1.0, 0.0], &index, &store, plan, &MetadataFilters::new())
            .unwrap();
        let results = engine.finish("q", candidates, options.reranker.as_deref(), plan);
        assert_eq!(ids(&results), vec!["c-1", "c-2"]);
    }

    #[test]
    fn test_finish_ignores_empty_rerank() {
        let (index, store) = fixture(IndexKind::FlatIp);
        let engine = RetrievalEngine::new(3);
        let options = QueryOptions::new()
            .top_k(1)
            .reranker(|_q: &str, _c: &[SearchResult]| Vec::new());
        let plan = engine.plan(&options, 3);

        let candidates = engine
            .collect(&[1.0, 0.0], &index, &store, plan, &MetadataFilters::new())
            .unwrap();
        let results = engine.finish("q", candidates, options.reranker.as_deref(), plan);
        assert_eq!(ids(&results), vec!["c-0"]);
    }
}
