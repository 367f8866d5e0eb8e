//! 内存存储（本地演示与测试）

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{EventStore, MessagePage, MessageStore, StoreError};
use crate::model::{Event, EventType, Message, Timestamp};

#[derive(Debug, Default)]
struct Inner {
    /// session_id -> 按时间戳升序的事件
    events: HashMap<String, Vec<Event>>,
    event_ids: HashSet<String>,
    /// session_id -> 按时间戳升序的消息
    messages: HashMap<String, Vec<Message>>,
    message_ids: HashSet<String>,
}

/// 内存事件/消息存储
#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventStore for InMemoryStore {
    async fn append_event(&self, event: &Event) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if !inner.event_ids.insert(event.id.clone()) {
            return Err(StoreError::Duplicate {
                kind: "event",
                id: event.id.clone(),
            });
        }
        let list = inner.events.entry(event.session_id.clone()).or_default();
        let pos = list.partition_point(|e| e.timestamp <= event.timestamp);
        list.insert(pos, event.clone());
        Ok(())
    }

    async fn session_events(&self, session_id: &str, limit: usize) -> Result<Vec<Event>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .events
            .get(session_id)
            .map(|list| list.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn events_after(
        &self,
        session_id: &str,
        after: Timestamp,
        limit: usize,
    ) -> Result<Vec<Event>, StoreError> {
        let inner = self.inner.read().await;
        let Some(list) = inner.events.get(session_id) else {
            return Ok(Vec::new());
        };
        let start = list.partition_point(|e| e.timestamp <= after);
        Ok(list[start..].iter().take(limit).cloned().collect())
    }

    async fn latest_finish_event(&self, session_id: &str) -> Result<Option<Event>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.events.get(session_id).and_then(|list| {
            list.iter()
                .rev()
                .find(|e| e.event_type == EventType::Finish)
                .cloned()
        }))
    }

    async fn purge_events_before(&self, before: Timestamp) -> Result<u64, StoreError> {
        let mut inner = self.inner.write().await;
        let mut removed_ids = Vec::new();
        for list in inner.events.values_mut() {
            let cut = list.partition_point(|e| e.timestamp < before);
            removed_ids.extend(list.drain(..cut).map(|e| e.id));
        }
        inner.events.retain(|_, list| !list.is_empty());
        for id in &removed_ids {
            inner.event_ids.remove(id);
        }
        Ok(removed_ids.len() as u64)
    }
}

#[async_trait]
impl MessageStore for InMemoryStore {
    async fn append_message(&self, message: &Message) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if !inner.message_ids.insert(message.id.clone()) {
            return Err(StoreError::Duplicate {
                kind: "message",
                id: message.id.clone(),
            });
        }
        let list = inner.messages.entry(message.session_id.clone()).or_default();
        let pos = list.partition_point(|m| m.timestamp <= message.timestamp);
        list.insert(pos, message.clone());
        Ok(())
    }

    async fn find_message(&self, session_id: &str, id: &str) -> Result<Option<Message>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .messages
            .get(session_id)
            .and_then(|list| list.iter().find(|m| m.id == id).cloned()))
    }

    async fn last_message(&self, session_id: &str) -> Result<Option<Message>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.messages.get(session_id).and_then(|list| list.last().cloned()))
    }

    async fn messages_page(
        &self,
        session_id: &str,
        page: &MessagePage,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        let inner = self.inner.read().await;
        let Some(list) = inner.messages.get(session_id) else {
            return Ok(Vec::new());
        };

        let anchor = |id: &str| list.iter().find(|m| m.id == id).map(|m| m.timestamp);
        let recent = |end: usize| list[end.saturating_sub(limit)..end].to_vec();

        let page = match page {
            MessagePage::Recent => recent(list.len()),
            MessagePage::From(id) => match anchor(id) {
                Some(ts) => {
                    let start = list.partition_point(|m| m.timestamp < ts);
                    list[start..].iter().take(limit).cloned().collect()
                }
                None => recent(list.len()),
            },
            MessagePage::Before(id) => match anchor(id) {
                Some(ts) => recent(list.partition_point(|m| m.timestamp < ts)),
                None => recent(list.len()),
            },
        };
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn seed_messages(store: &InMemoryStore, n: usize) -> Vec<Message> {
        let mut out = Vec::new();
        for i in 0..n {
            let msg = Message::user("s1", out.last().map(|m: &Message| m.id.clone()), &format!("m{}", i));
            store.append_message(&msg).await.unwrap();
            out.push(msg);
        }
        out
    }

    #[tokio::test]
    async fn test_duplicate_message_id_rejected() {
        let store = InMemoryStore::new();
        let msg = Message::user("s1", None, "hi");
        store.append_message(&msg).await.unwrap();
        let err = store.append_message(&msg).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { kind: "message", .. }));
    }

    #[tokio::test]
    async fn test_message_pages() {
        let store = InMemoryStore::new();
        let msgs = seed_messages(&store, 6).await;
        let texts = |v: Vec<Message>| v.into_iter().map(|m| m.text()).collect::<Vec<_>>();

        let recent = store.messages_page("s1", &MessagePage::Recent, 2).await.unwrap();
        assert_eq!(texts(recent), vec!["m4", "m5"]);

        let from = store
            .messages_page("s1", &MessagePage::From(msgs[2].id.clone()), 2)
            .await
            .unwrap();
        assert_eq!(texts(from), vec!["m2", "m3"]);

        let before = store
            .messages_page("s1", &MessagePage::Before(msgs[3].id.clone()), 2)
            .await
            .unwrap();
        assert_eq!(texts(before), vec!["m1", "m2"]);

        let unknown = store
            .messages_page("s1", &MessagePage::Before("missing".into()), 3)
            .await
            .unwrap();
        assert_eq!(texts(unknown), vec!["m3", "m4", "m5"]);

        assert_eq!(store.last_message("s1").await.unwrap().unwrap().id, msgs[5].id);
        assert!(store.find_message("s1", &msgs[0].id).await.unwrap().is_some());
        assert!(store.find_message("s2", &msgs[0].id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_events_after_is_strict() {
        let store = InMemoryStore::new();
        let mut events = Vec::new();
        for i in 0..5 {
            let ev = Event::new("s1", EventType::Custom, json!({ "i": i }));
            store.append_event(&ev).await.unwrap();
            events.push(ev);
        }
        let after = store.events_after("s1", events[1].timestamp, 100).await.unwrap();
        assert_eq!(after.len(), 3);
        assert_eq!(after[0].id, events[2].id);

        let limited = store.events_after("s1", events[0].timestamp, 2).await.unwrap();
        assert_eq!(limited.len(), 2);
        assert!(store.events_after("nope", events[0].timestamp, 2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_latest_finish_and_purge() {
        let store = InMemoryStore::new();
        let first = Event::new("s1", EventType::Finish, json!({"status": "success"}));
        store.append_event(&first).await.unwrap();
        let second = Event::new("s1", EventType::Finish, json!({"status": "stopped"}));
        store.append_event(&second).await.unwrap();
        store
            .append_event(&Event::new("s1", EventType::NodeStart, json!({})))
            .await
            .unwrap();

        let latest = store.latest_finish_event("s1").await.unwrap().unwrap();
        assert_eq!(latest.id, second.id);

        let removed = store.purge_events_before(second.timestamp).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.session_events("s1", 100).await.unwrap().len(), 2);
    }
}
