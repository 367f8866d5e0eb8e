//! 事件日志与消息存储
//!
//! - **EventStore**：只追加事件；按时间戳游标严格向后读取，供回放与轮询
//! - **MessageStore**：完整消息，ID 唯一；支持最近 N 条 / 从某条起 / 某条之前三种分页
//!
//! 实现：`InMemoryStore`（始终可用）与 `SqliteStore`（需启用 `async-sqlite` feature）。

pub mod memory;
#[cfg(feature = "async-sqlite")]
pub mod sqlite;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{Event, Message, Timestamp};

pub use memory::InMemoryStore;
#[cfg(feature = "async-sqlite")]
pub use sqlite::SqliteStore;

/// 事件保留时长（超过后可由 `purge_events_before` 清理）
pub const EVENT_RETENTION_DAYS: i64 = 7;

#[derive(Error, Debug)]
pub enum StoreError {
    /// 主键冲突（消息 / 事件 ID 已存在）
    #[error("Duplicate {kind} id: {id}")]
    Duplicate { kind: &'static str, id: String },

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[cfg(feature = "async-sqlite")]
impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

/// 消息分页方式
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessagePage {
    /// 最近 N 条（按时间升序返回）
    Recent,
    /// 从该消息起（含）向后，升序
    From(String),
    /// 该消息之前（不含）的最近 N 条，升序
    Before(String),
}

#[async_trait]
pub trait EventStore: Send + Sync {
    async fn append_event(&self, event: &Event) -> Result<(), StoreError>;

    /// 会话最早的 `limit` 条事件（升序）
    async fn session_events(&self, session_id: &str, limit: usize) -> Result<Vec<Event>, StoreError>;

    /// 时间戳严格大于 `after` 的前 `limit` 条事件（升序）
    async fn events_after(
        &self,
        session_id: &str,
        after: Timestamp,
        limit: usize,
    ) -> Result<Vec<Event>, StoreError>;

    async fn latest_finish_event(&self, session_id: &str) -> Result<Option<Event>, StoreError>;

    /// 删除所有会话中早于 `before` 的事件，返回删除条数
    async fn purge_events_before(&self, before: Timestamp) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// 追加消息；ID 已存在时返回 `StoreError::Duplicate`
    async fn append_message(&self, message: &Message) -> Result<(), StoreError>;

    async fn find_message(&self, session_id: &str, id: &str) -> Result<Option<Message>, StoreError>;

    /// 会话最新一条消息（新用户消息的父消息）
    async fn last_message(&self, session_id: &str) -> Result<Option<Message>, StoreError>;

    /// 分页读取；锚点 ID 不存在时回落为 Recent
    async fn messages_page(
        &self,
        session_id: &str,
        page: &MessagePage,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError>;
}

/// 同时提供事件与消息存储
pub trait Store: EventStore + MessageStore {}

impl<T: EventStore + MessageStore> Store for T {}

/// 按当前时间计算的保留截止点
pub fn retention_cutoff() -> Timestamp {
    let cutoff = chrono::Utc::now() - chrono::Duration::days(EVENT_RETENTION_DAYS);
    Timestamp::from_micros(cutoff.timestamp_micros())
}
