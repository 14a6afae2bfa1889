//! Key-Value 백엔드
//!
//! - `KeyValueStore`: get/set/list 연산을 제공하는 클라이언트 능력
//! - `RedisStore`: Redis 동기 연결 (뮤텍스로 보호)
//! - `MemoryKeyValueStore`: 프로세스 내 구현 (테스트, 임베딩용)
//! - `KeyValueBackend`: 위 저장소를 `ArtifactBackend`로 감싸는 어댑터

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result as AnyResult};
use redis::Commands;

use super::{ArtifactBackend, Artifacts};
use crate::error::{RagError, Result};

// ============================================================================
// KeyValueStore Trait
// ============================================================================

/// Key-Value 클라이언트 능력
pub trait KeyValueStore: Send + Sync {
    /// 연결 확인
    fn ping(&self) -> AnyResult<()>;

    fn get(&self, key: &str) -> AnyResult<Option<Vec<u8>>>;

    fn set(&self, key: &str, value: &[u8]) -> AnyResult<()>;

    fn delete(&self, key: &str) -> AnyResult<()>;

    /// 리스트 끝에 추가
    fn list_push(&self, key: &str, values: &[String]) -> AnyResult<()>;

    /// 리스트 전체 조회 (키가 없으면 빈 목록)
    fn list_range(&self, key: &str) -> AnyResult<Vec<String>>;

    /// 값 하나와 리스트 하나를 한 번에 교체
    ///
    /// 전부 반영되거나 아무것도 반영되지 않아야 합니다.
    fn replace(&self, value_key: &str, value: &[u8], list_key: &str, items: &[String])
        -> AnyResult<()>;

    /// 로그/상태 표시용 이름
    fn describe(&self) -> String;
}

// ============================================================================
// Redis
// ============================================================================

/// Redis 저장소
pub struct RedisStore {
    url: String,
    conn: Mutex<redis::Connection>,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").field("url", &self.url).finish()
    }
}

impl RedisStore {
    /// 연결 후 PING으로 확인
    pub fn connect(url: &str, timeout: Duration) -> AnyResult<Self> {
        let client = redis::Client::open(url).context("Invalid Redis URL")?;
        let conn = client
            .get_connection_with_timeout(timeout)
            .with_context(|| format!("Failed to connect to {}", url))?;

        let store = Self {
            url: url.to_string(),
            conn: Mutex::new(conn),
        };
        store.ping().context("Redis PING failed")?;
        Ok(store)
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut redis::Connection) -> redis::RedisResult<T>,
    ) -> AnyResult<T> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| anyhow::anyhow!("Redis connection lock poisoned"))?;
        Ok(f(&mut conn)?)
    }
}

impl KeyValueStore for RedisStore {
    fn ping(&self) -> AnyResult<()> {
        self.with_conn(|c| redis::cmd("PING").query::<String>(c))
            .map(|_| ())
    }

    fn get(&self, key: &str) -> AnyResult<Option<Vec<u8>>> {
        self.with_conn(|c| c.get(key))
    }

    fn set(&self, key: &str, value: &[u8]) -> AnyResult<()> {
        self.with_conn(|c| c.set(key, value))
    }

    fn delete(&self, key: &str) -> AnyResult<()> {
        self.with_conn(|c| c.del(key))
    }

    fn list_push(&self, key: &str, values: &[String]) -> AnyResult<()> {
        // RPUSH는 값이 하나 이상 필요
        if values.is_empty() {
            return Ok(());
        }
        self.with_conn(|c| c.rpush(key, values))
    }

    fn list_range(&self, key: &str) -> AnyResult<Vec<String>> {
        self.with_conn(|c| c.lrange(key, 0, -1))
    }

    fn replace(&self, value_key: &str, value: &[u8], list_key: &str, items: &[String])
        -> AnyResult<()> {
        // MULTI/EXEC 트랜잭션
        let mut pipe = redis::pipe();
        pipe.atomic().del(list_key).ignore();
        if !items.is_empty() {
            pipe.rpush(list_key, items).ignore();
        }
        pipe.set(value_key, value).ignore();

        self.with_conn(|c| pipe.query::<()>(c))
    }

    fn describe(&self) -> String {
        format!("redis ({})", self.url)
    }
}

// ============================================================================
// In-memory
// ============================================================================

#[derive(Debug, Default)]
struct MemoryState {
    values: HashMap<String, Vec<u8>>,
    lists: HashMap<String, Vec<String>>,
}

/// 프로세스 내 Key-Value 저장소
///
/// 복제본은 같은 상태를 공유합니다.
#[derive(Debug, Clone, Default)]
pub struct MemoryKeyValueStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MemoryState) -> T) -> AnyResult<T> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))?;
        Ok(f(&mut state))
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn ping(&self) -> AnyResult<()> {
        self.with_state(|_| ())
    }

    fn get(&self, key: &str) -> AnyResult<Option<Vec<u8>>> {
        self.with_state(|s| s.values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> AnyResult<()> {
        self.with_state(|s| {
            s.values.insert(key.to_string(), value.to_vec());
        })
    }

    fn delete(&self, key: &str) -> AnyResult<()> {
        self.with_state(|s| {
            s.values.remove(key);
            s.lists.remove(key);
        })
    }

    fn list_push(&self, key: &str, values: &[String]) -> AnyResult<()> {
        self.with_state(|s| {
            s.lists
                .entry(key.to_string())
                .or_default()
                .extend_from_slice(values);
        })
    }

    fn list_range(&self, key: &str) -> AnyResult<Vec<String>> {
        self.with_state(|s| s.lists.get(key).cloned().unwrap_or_default())
    }

    fn replace(&self, value_key: &str, value: &[u8], list_key: &str, items: &[String])
        -> AnyResult<()> {
        self.with_state(|s| {
            s.lists.insert(list_key.to_string(), items.to_vec());
            s.values.insert(value_key.to_string(), value.to_vec());
        })
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

// ============================================================================
// KeyValueBackend
// ============================================================================

/// Key-Value 저장소 기반 아티팩트 백엔드
///
/// 키: `{prefix}:index` (바이트), `{prefix}:documents` (레코드 리스트)
pub struct KeyValueBackend {
    store: Box<dyn KeyValueStore>,
    index_key: String,
    documents_key: String,
}

impl std::fmt::Debug for KeyValueBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyValueBackend")
            .field("store", &self.store.describe())
            .field("index_key", &self.index_key)
            .finish()
    }
}

impl KeyValueBackend {
    pub fn new(store: impl KeyValueStore + 'static, prefix: &str) -> Self {
        Self {
            store: Box::new(store),
            index_key: format!("{}:index", prefix),
            documents_key: format!("{}:documents", prefix),
        }
    }

    pub fn index_key(&self) -> &str {
        &self.index_key
    }

    pub fn documents_key(&self) -> &str {
        &self.documents_key
    }
}

impl ArtifactBackend for KeyValueBackend {
    fn write(&self, artifacts: &Artifacts) -> Result<()> {
        self.store
            .replace(
                &self.index_key,
                &artifacts.index,
                &self.documents_key,
                &artifacts.documents,
            )
            .map_err(RagError::backend)?;

        tracing::debug!(
            "Wrote {} index bytes and {} records to {}",
            artifacts.index.len(),
            artifacts.documents.len(),
            self.describe()
        );
        Ok(())
    }

    fn read(&self) -> Result<Artifacts> {
        let index = self
            .store
            .get(&self.index_key)
            .map_err(RagError::backend)?
            .ok_or_else(|| RagError::NotFound(self.index_key.clone()))?;
        let documents = self
            .store
            .list_range(&self.documents_key)
            .map_err(RagError::backend)?;

        Ok(Artifacts { index, documents })
    }

    fn describe(&self) -> String {
        format!("{} [{}]", self.store.describe(), self.index_key)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_memory_store_operations() {
        let store = MemoryKeyValueStore::new();
        store.ping().unwrap();

        assert!(store.get("k").unwrap().is_none());
        store.set("k", b"value").unwrap();
        assert_eq!(store.get("k").unwrap(), Some(b"value".to_vec()));

        store.list_push("l", &["a".to_string()]).unwrap();
        store.list_push("l", &["b".to_string(), "c".to_string()]).unwrap();
        assert_eq!(store.list_range("l").unwrap(), vec!["a", "b", "c"]);

        store.delete("l").unwrap();
        assert!(store.list_range("l").unwrap().is_empty());
    }

    #[test]
    fn test_memory_store_clones_share_state() {
        let store = MemoryKeyValueStore::new();
        let other = store.clone();
        store.set("shared", b"1").unwrap();
        assert_eq!(other.get("shared").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn test_backend_roundtrip_replaces_documents() {
        let store = MemoryKeyValueStore::new();
        let backend = KeyValueBackend::new(store.clone(), "medical");
        assert_eq!(backend.index_key(), "medical:index");
        assert_eq!(backend.documents_key(), "medical:documents");
        assert!(matches!(backend.read(), Err(RagError::NotFound(_))));

        let first = Artifacts {
            index: vec![1, 2],
            documents: vec!["one".to_string(), "two".to_string()],
        };
        backend.write(&first).unwrap();
        assert_eq!(backend.read().unwrap(), first);

        let second = Artifacts {
            index: vec![3],
            documents: vec!["three".to_string()],
        };
        backend.write(&second).unwrap();
        assert_eq!(backend.read().unwrap(), second);
        assert_eq!(store.list_range("medical:documents").unwrap().len(), 1);
    }

    /// 두 번째 쓰기 호출부터 실패하는 저장소
    struct FailingStore {
        inner: MemoryKeyValueStore,
        writes: AtomicUsize,
    }

    impl FailingStore {
        fn check_write(&self) -> AnyResult<()> {
            if self.writes.fetch_add(1, Ordering::SeqCst) >= 1 {
                anyhow::bail!("connection reset");
            }
            Ok(())
        }
    }

    impl KeyValueStore for FailingStore {
        fn ping(&self) -> AnyResult<()> {
            self.inner.ping()
        }

        fn get(&self, key: &str) -> AnyResult<Option<Vec<u8>>> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &[u8]) -> AnyResult<()> {
            self.check_write()?;
            self.inner.set(key, value)
        }

        fn delete(&self, key: &str) -> AnyResult<()> {
            self.check_write()?;
            self.inner.delete(key)
        }

        fn list_push(&self, key: &str, values: &[String]) -> AnyResult<()> {
            self.check_write()?;
            self.inner.list_push(key, values)
        }

        fn list_range(&self, key: &str) -> AnyResult<Vec<String>> {
            self.inner.list_range(key)
        }

        fn replace(&self, value_key: &str, value: &[u8], list_key: &str, items: &[String])
            -> AnyResult<()> {
            self.check_write()?;
            self.inner.replace(value_key, value, list_key, items)
        }

        fn describe(&self) -> String {
            "failing".to_string()
        }
    }

    #[test]
    fn test_failed_write_keeps_previous_artifacts() {
        let store = MemoryKeyValueStore::new();
        let backend = KeyValueBackend::new(
            FailingStore {
                inner: store.clone(),
                writes: AtomicUsize::new(0),
            },
            "medical",
        );

        let first = Artifacts {
            index: vec![1, 2],
            documents: vec!["one".to_string(), "two".to_string()],
        };
        backend.write(&first).unwrap();

        let second = Artifacts {
            index: vec![3],
            documents: vec!["three".to_string()],
        };
        assert!(matches!(
            backend.write(&second),
            Err(RagError::ProviderUnavailable { .. })
        ));

        // 인덱스와 문서 모두 이전 상태 그대로
        assert_eq!(backend.read().unwrap(), first);
        assert_eq!(store.list_range("medical:documents").unwrap(), vec!["one", "two"]);
    }

    #[test]
    fn test_memory_replace_with_empty_list() {
        let store = MemoryKeyValueStore::new();
        store.list_push("l", &["stale".to_string()]).unwrap();
        store.replace("v", b"x", "l", &[]).unwrap();
        assert!(store.list_range("l").unwrap().is_empty());
        assert_eq!(store.get("v").unwrap(), Some(b"x".to_vec()));
    }

    #[test]
    fn test_redis_unreachable() {
        let result = RedisStore::connect("redis://127.0.0.1:1/0", Duration::from_millis(200));
        assert!(result.is_err());
        assert!(RedisStore::connect("not a url", Duration::from_millis(200)).is_err());
    }
}
