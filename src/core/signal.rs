//! 存活租约与停止信号
//!
//! 两者都建立在带 TTL 的键存储上：
//! - **RunLease**：`session:run:{id}`，运行期间持有，TTL = 运行超时 + 60s，进程崩溃后自然过期
//! - **StopSignal**：`session:stop:{id}`，TTL 60s，控制器在角色之间检查，消费后清除

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::store::StoreError;

const RUN_KEY_PREFIX: &str = "session:run:";
const STOP_KEY_PREFIX: &str = "session:stop:";

/// 租约在运行超时之外额外保留的时间
pub const LEASE_GRACE: Duration = Duration::from_secs(60);
pub const STOP_SIGNAL_TTL: Duration = Duration::from_secs(60);

/// 带 TTL 的键存储（多实例部署时可换成 Redis 等实现）
#[async_trait]
pub trait SignalStore: Send + Sync {
    async fn set(&self, key: &str, ttl: Duration) -> Result<(), StoreError>;

    /// 键不存在（或已过期）时写入并返回 true
    async fn set_if_absent(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    async fn clear(&self, key: &str) -> Result<(), StoreError>;
}

/// 进程内实现
#[derive(Debug, Default)]
pub struct InMemorySignalStore {
    entries: RwLock<HashMap<String, Instant>>,
}

impl InMemorySignalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SignalStore for InMemorySignalStore {
    async fn set(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), Instant::now() + ttl);
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        if entries.get(key).is_some_and(|exp| *exp > now) {
            return Ok(false);
        }
        entries.insert(key.to_string(), now + ttl);
        Ok(true)
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let entries = self.entries.read().await;
        Ok(entries.get(key).is_some_and(|exp| *exp > Instant::now()))
    }

    async fn clear(&self, key: &str) -> Result<(), StoreError> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

/// 会话运行租约：一个会话同一时间只允许一次运行
#[derive(Clone)]
pub struct RunLease {
    store: Arc<dyn SignalStore>,
    ttl: Duration,
}

impl RunLease {
    pub fn new(store: Arc<dyn SignalStore>, run_timeout: Duration) -> Self {
        Self {
            store,
            ttl: run_timeout + LEASE_GRACE,
        }
    }

    fn key(session_id: &str) -> String {
        format!("{}{}", RUN_KEY_PREFIX, session_id)
    }

    /// 获取租约；已有运行时返回 false
    pub async fn acquire(&self, session_id: &str) -> Result<bool, StoreError> {
        self.store.set_if_absent(&Self::key(session_id), self.ttl).await
    }

    pub async fn release(&self, session_id: &str) -> Result<(), StoreError> {
        self.store.clear(&Self::key(session_id)).await
    }

    pub async fn is_running(&self, session_id: &str) -> Result<bool, StoreError> {
        self.store.exists(&Self::key(session_id)).await
    }
}

/// 会话停止信号
#[derive(Clone)]
pub struct StopSignal {
    store: Arc<dyn SignalStore>,
}

impl StopSignal {
    pub fn new(store: Arc<dyn SignalStore>) -> Self {
        Self { store }
    }

    fn key(session_id: &str) -> String {
        format!("{}{}", STOP_KEY_PREFIX, session_id)
    }

    pub async fn request(&self, session_id: &str) -> Result<(), StoreError> {
        self.store.set(&Self::key(session_id), STOP_SIGNAL_TTL).await
    }

    pub async fn is_requested(&self, session_id: &str) -> Result<bool, StoreError> {
        self.store.exists(&Self::key(session_id)).await
    }

    pub async fn clear(&self, session_id: &str) -> Result<(), StoreError> {
        self.store.clear(&Self::key(session_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lease_is_exclusive_until_released() {
        let lease = RunLease::new(Arc::new(InMemorySignalStore::new()), Duration::from_secs(10));
        assert!(lease.acquire("s1").await.unwrap());
        assert!(!lease.acquire("s1").await.unwrap());
        assert!(lease.acquire("s2").await.unwrap());
        assert!(lease.is_running("s1").await.unwrap());

        lease.release("s1").await.unwrap();
        assert!(!lease.is_running("s1").await.unwrap());
        assert!(lease.acquire("s1").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_expire_after_ttl() {
        let store: Arc<dyn SignalStore> = Arc::new(InMemorySignalStore::new());
        let stop = StopSignal::new(Arc::clone(&store));
        stop.request("s1").await.unwrap();
        assert!(stop.is_requested("s1").await.unwrap());

        tokio::time::advance(STOP_SIGNAL_TTL + Duration::from_secs(1)).await;
        assert!(!stop.is_requested("s1").await.unwrap());

        // 过期的租约可被重新获取（崩溃恢复）
        let lease = RunLease::new(store, Duration::from_secs(1));
        assert!(lease.acquire("s1").await.unwrap());
        tokio::time::advance(Duration::from_secs(62)).await;
        assert!(lease.acquire("s1").await.unwrap());
    }
}
