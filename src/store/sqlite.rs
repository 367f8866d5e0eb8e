//! SQLite 事件/消息存储（sqlx，异步）
//!
//! 需要启用 `async-sqlite` feature。时间戳以微秒整数入库，`(session_id, ts)` 建索引以支撑游标查询；
//! 消息整体以 JSON 存在 `body` 列，其余列只用于过滤与排序。

use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;

use super::{EventStore, MessagePage, MessageStore, StoreError};
use crate::model::{Event, EventType, Message, Timestamp};

/// SQLite 存储
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// 打开（不存在则创建）数据库并建表
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db_url = format!("sqlite:{}?mode=rwc", db_path.as_ref().display());

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await?;

        let store = Self { pool };
        store.init_tables().await?;
        Ok(store)
    }

    pub async fn init_tables(&self) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS events (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                ts INTEGER NOT NULL,
                event_type TEXT NOT NULL,
                message_id TEXT,
                agent_name TEXT,
                trace_id TEXT,
                data TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                parent_id TEXT,
                ts INTEGER NOT NULL,
                role TEXT NOT NULL,
                body TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_events_session_ts ON events(session_id, ts)")
            .execute(&self.pool)
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_session_ts ON messages(session_id, ts)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

fn map_insert_error(e: sqlx::Error, kind: &'static str, id: &str) -> StoreError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Duplicate {
            kind,
            id: id.to_string(),
        },
        _ => StoreError::from(e),
    }
}

fn row_to_event(row: &SqliteRow) -> Result<Event, StoreError> {
    let event_type: String = row.try_get("event_type")?;
    let data: String = row.try_get("data")?;
    Ok(Event {
        id: row.try_get("id")?,
        session_id: row.try_get("session_id")?,
        timestamp: Timestamp::from_micros(row.try_get("ts")?),
        event_type: event_type.parse::<EventType>().map_err(StoreError::Backend)?,
        message_id: row.try_get("message_id")?,
        agent_name: row.try_get("agent_name")?,
        trace_id: row.try_get("trace_id")?,
        data: serde_json::from_str(&data)?,
    })
}

fn row_to_message(row: &SqliteRow) -> Result<Message, StoreError> {
    let body: String = row.try_get("body")?;
    Ok(serde_json::from_str(&body)?)
}

const EVENT_COLUMNS: &str = "id, session_id, ts, event_type, message_id, agent_name, trace_id, data";

#[async_trait]
impl EventStore for SqliteStore {
    async fn append_event(&self, event: &Event) -> Result<(), StoreError> {
        let data = serde_json::to_string(&event.data)?;
        sqlx::query(
            "INSERT INTO events (id, session_id, ts, event_type, message_id, agent_name, trace_id, data)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&event.id)
        .bind(&event.session_id)
        .bind(event.timestamp.as_micros())
        .bind(event.event_type.as_str())
        .bind(&event.message_id)
        .bind(&event.agent_name)
        .bind(&event.trace_id)
        .bind(&data)
        .execute(&self.pool)
        .await
        .map_err(|e| map_insert_error(e, "event", &event.id))?;
        Ok(())
    }

    async fn session_events(&self, session_id: &str, limit: usize) -> Result<Vec<Event>, StoreError> {
        let sql = format!(
            "SELECT {} FROM events WHERE session_id = ? ORDER BY ts ASC LIMIT ?",
            EVENT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(session_id)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_event).collect()
    }

    async fn events_after(
        &self,
        session_id: &str,
        after: Timestamp,
        limit: usize,
    ) -> Result<Vec<Event>, StoreError> {
        let sql = format!(
            "SELECT {} FROM events WHERE session_id = ? AND ts > ? ORDER BY ts ASC LIMIT ?",
            EVENT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(session_id)
            .bind(after.as_micros())
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_event).collect()
    }

    async fn latest_finish_event(&self, session_id: &str) -> Result<Option<Event>, StoreError> {
        let sql = format!(
            "SELECT {} FROM events WHERE session_id = ? AND event_type = ? ORDER BY ts DESC LIMIT 1",
            EVENT_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(session_id)
            .bind(EventType::Finish.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_event).transpose()
    }

    async fn purge_events_before(&self, before: Timestamp) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM events WHERE ts < ?")
            .bind(before.as_micros())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn append_message(&self, message: &Message) -> Result<(), StoreError> {
        let body = serde_json::to_string(message)?;
        sqlx::query(
            "INSERT INTO messages (id, session_id, parent_id, ts, role, body) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&message.id)
        .bind(&message.session_id)
        .bind(&message.parent_id)
        .bind(message.timestamp.as_micros())
        .bind(message.kind.role_name())
        .bind(&body)
        .execute(&self.pool)
        .await
        .map_err(|e| map_insert_error(e, "message", &message.id))?;
        Ok(())
    }

    async fn find_message(&self, session_id: &str, id: &str) -> Result<Option<Message>, StoreError> {
        let row = sqlx::query("SELECT body FROM messages WHERE session_id = ? AND id = ?")
            .bind(session_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_message).transpose()
    }

    async fn last_message(&self, session_id: &str) -> Result<Option<Message>, StoreError> {
        let row = sqlx::query("SELECT body FROM messages WHERE session_id = ? ORDER BY ts DESC LIMIT 1")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_message).transpose()
    }

    async fn messages_page(
        &self,
        session_id: &str,
        page: &MessagePage,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        let anchor = match page {
            MessagePage::Recent => None,
            MessagePage::From(id) | MessagePage::Before(id) => self
                .find_message(session_id, id)
                .await?
                .map(|m| m.timestamp.as_micros()),
        };

        let rows = match (page, anchor) {
            (MessagePage::From(_), Some(ts)) => {
                sqlx::query("SELECT body FROM messages WHERE session_id = ? AND ts >= ? ORDER BY ts ASC LIMIT ?")
                    .bind(session_id)
                    .bind(ts)
                    .bind(limit as i64)
                    .fetch_all(&self.pool)
                    .await?
            }
            (MessagePage::Before(_), Some(ts)) => {
                let mut rows = sqlx::query(
                    "SELECT body FROM messages WHERE session_id = ? AND ts < ? ORDER BY ts DESC LIMIT ?",
                )
                .bind(session_id)
                .bind(ts)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?;
                rows.reverse();
                rows
            }
            // Recent，或锚点不存在
            _ => {
                let mut rows =
                    sqlx::query("SELECT body FROM messages WHERE session_id = ? ORDER BY ts DESC LIMIT ?")
                        .bind(session_id)
                        .bind(limit as i64)
                        .fetch_all(&self.pool)
                        .await?;
                rows.reverse();
                rows
            }
        };
        rows.iter().map(row_to_message).collect()
    }
}
