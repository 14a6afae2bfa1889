//! Metadata Filter - 검색 후보 메타데이터 필터
//!
//! 필터 항목은 세 가지 형태 중 하나입니다:
//! - `Equals`: 값이 정확히 같음
//! - `OneOf`: 값이 집합에 포함됨
//! - `Predicate`: 임의의 판정 함수 (실패하면 후보 탈락)
//!
//! 모든 항목을 통과해야 후보가 채택됩니다.
//! 메타데이터에 키가 없으면 `Equals`/`OneOf`는 항상 불일치이고,
//! `Predicate`에는 `None`이 전달됩니다.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use super::store::Metadata;

/// 판정 함수 타입
pub type PredicateFn = dyn Fn(Option<&Value>) -> anyhow::Result<bool> + Send + Sync;

// ============================================================================
// FilterCondition
// ============================================================================

/// 단일 필터 조건
#[derive(Clone)]
pub enum FilterCondition {
    Equals(Value),
    OneOf(Vec<Value>),
    Predicate(Arc<PredicateFn>),
}

impl fmt::Debug for FilterCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equals(v) => f.debug_tuple("Equals").field(v).finish(),
            Self::OneOf(vs) => f.debug_tuple("OneOf").field(vs).finish(),
            Self::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

impl FilterCondition {
    pub fn equals(value: impl Into<Value>) -> Self {
        Self::Equals(value.into())
    }

    pub fn one_of<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::OneOf(values.into_iter().map(Into::into).collect())
    }

    /// 실패하지 않는 판정 함수
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(Option<&Value>) -> bool + Send + Sync + 'static,
    {
        Self::Predicate(Arc::new(move |v: Option<&Value>| -> anyhow::Result<bool> {
            Ok(f(v))
        }))
    }

    /// 실패할 수 있는 판정 함수 (`Err`는 탈락으로 처리)
    pub fn try_predicate<F>(f: F) -> Self
    where
        F: Fn(Option<&Value>) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        Self::Predicate(Arc::new(f))
    }

    /// 값이 조건을 만족하는지 판정
    pub fn matches(&self, value: Option<&Value>) -> bool {
        match self {
            Self::Equals(expected) => value == Some(expected),
            Self::OneOf(allowed) => value.is_some_and(|v| allowed.contains(v)),
            Self::Predicate(f) => match f(value) {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::debug!("Metadata predicate failed, rejecting candidate: {}", e);
                    false
                }
            },
        }
    }
}

// ============================================================================
// MetadataFilters
// ============================================================================

/// 키별 필터 조건 모음
#[derive(Debug, Clone, Default)]
pub struct MetadataFilters {
    conditions: Vec<(String, FilterCondition)>,
}

impl MetadataFilters {
    pub fn new() -> Self {
        Self::default()
    }

    /// 조건 추가 (같은 키는 교체)
    pub fn with(mut self, key: impl Into<String>, condition: FilterCondition) -> Self {
        let key = key.into();
        match self.conditions.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = condition,
            None => self.conditions.push((key, condition)),
        }
        self
    }

    pub fn equals(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(key, FilterCondition::equals(value))
    }

    pub fn one_of<I, V>(self, key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.with(key, FilterCondition::one_of(values))
    }

    pub fn predicate<F>(self, key: impl Into<String>, f: F) -> Self
    where
        F: Fn(Option<&Value>) -> bool + Send + Sync + 'static,
    {
        self.with(key, FilterCondition::predicate(f))
    }

    pub fn try_predicate<F>(self, key: impl Into<String>, f: F) -> Self
    where
        F: Fn(Option<&Value>) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        self.with(key, FilterCondition::try_predicate(f))
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    /// 메타데이터가 모든 조건을 만족하는지 판정
    pub fn matches(&self, metadata: &Metadata) -> bool {
        self.conditions
            .iter()
            .all(|(key, condition)| condition.matches(metadata.get(key)))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn metadata(pairs: &[(&str, Value)]) -> Metadata {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_equals() {
        let meta = metadata(&[("category", json!("guideline")), ("year", json!(2021))]);

        assert!(MetadataFilters::new().equals("category", "guideline").matches(&meta));
        assert!(!MetadataFilters::new().equals("category", "trial").matches(&meta));
        assert!(MetadataFilters::new().equals("year", 2021).matches(&meta));
        assert!(!MetadataFilters::new().equals("missing", Value::Null).matches(&meta));
    }

    #[test]
    fn test_one_of() {
        let meta = metadata(&[("category", json!("trial"))]);

        assert!(MetadataFilters::new()
            .one_of("category", ["guideline", "trial"])
            .matches(&meta));
        assert!(!MetadataFilters::new()
            .one_of("category", ["review"])
            .matches(&meta));
        assert!(!MetadataFilters::new()
            .one_of("source_id", ["a", "b"])
            .matches(&meta));
    }

    #[test]
    fn test_predicate_receives_missing_as_none() {
        let meta = metadata(&[("score", json!(7))]);

        let filters = MetadataFilters::new()
            .predicate("score", |v| v.and_then(Value::as_i64).is_some_and(|n| n > 5))
            .predicate("absent", |v| v.is_none());
        assert!(filters.matches(&meta));

        let always_false = MetadataFilters::new().predicate("score", |_| false);
        assert!(!always_false.matches(&meta));
    }

    #[test]
    fn test_failing_predicate_rejects() {
        let meta = metadata(&[("score", json!("not a number"))]);

        let filters = MetadataFilters::new().try_predicate("score", |v| {
            let n = v
                .and_then(Value::as_f64)
                .ok_or_else(|| anyhow::anyhow!("score is not numeric"))?;
            Ok(n > 0.5)
        });
        assert!(!filters.matches(&meta));
    }

    #[test]
    fn test_all_conditions_must_match() {
        let meta = metadata(&[("category", json!("trial")), ("phase", json!(3))]);

        let filters = MetadataFilters::new()
            .equals("category", "trial")
            .one_of("phase", [1, 2]);
        assert!(!filters.matches(&meta));

        let filters = filters.one_of("phase", [2, 3]);
        assert_eq!(filters.len(), 2);
        assert!(filters.matches(&meta));
        assert!(MetadataFilters::new().matches(&meta));
    }
}
