//! SSE 投递帧
//!
//! 数据 = 事件负载 + `event_type` / `session_id` / `timestamp`，以及可选的 `trace_id` / `message_id`；
//! 文本格式：`event: <category>\nid: <id>\ndata: <json>\n\n`。

use serde_json::{json, Map, Value};

use crate::model::{Event, EventCategory, EventType, Timestamp};

/// 合成错误的 ID（不对应任何持久化事件）
pub const SYNTHETIC_TIMEOUT_ID: &str = "timeout";
pub const SYNTHETIC_AGENT_STOPPED_ID: &str = "agent_stopped";
pub const SYNTHETIC_ERROR_ID: &str = "error";

/// 投递给客户端的一项
#[derive(Debug, Clone, PartialEq)]
pub struct SseFrame {
    pub category: EventCategory,
    pub id: String,
    pub data: Value,
}

impl SseFrame {
    pub fn from_event(event: &Event) -> Self {
        let mut data = Map::new();
        data.insert("event_type".into(), json!(event.event_type.as_str()));
        data.insert("session_id".into(), json!(event.session_id));
        data.insert("timestamp".into(), json!(event.timestamp));
        match &event.data {
            Value::Object(payload) => {
                for (k, v) in payload {
                    data.insert(k.clone(), v.clone());
                }
            }
            Value::Null => {}
            other => {
                data.insert("payload".into(), other.clone());
            }
        }
        if let Some(trace_id) = &event.trace_id {
            data.insert("trace_id".into(), json!(trace_id));
        }
        if let Some(message_id) = &event.message_id {
            data.insert("message_id".into(), json!(message_id));
        }
        Self {
            category: event.event_type.category(),
            id: event.id.clone(),
            data: Value::Object(data),
        }
    }

    /// 网关自己生成的错误项（超时、生产者消失、读取失败）
    pub fn synthetic_error(session_id: &str, id: &str, error: impl Into<String>) -> Self {
        Self {
            category: EventCategory::Error,
            id: id.to_string(),
            data: json!({
                "event_type": EventType::AgentError.as_str(),
                "session_id": session_id,
                "timestamp": Timestamp::now(),
                "error": error.into(),
            }),
        }
    }

    pub fn timeout(session_id: &str, max_wait_secs: u64) -> Self {
        Self::synthetic_error(
            session_id,
            SYNTHETIC_TIMEOUT_ID,
            format!("Task timeout after {} seconds", max_wait_secs),
        )
    }

    pub fn agent_stopped(session_id: &str) -> Self {
        Self::synthetic_error(
            session_id,
            SYNTHETIC_AGENT_STOPPED_ID,
            "Agent stopped without finish event",
        )
    }

    pub fn event_type(&self) -> Option<&str> {
        self.data.get("event_type").and_then(Value::as_str)
    }

    pub fn to_sse_string(&self) -> String {
        format!("event: {}\nid: {}\ndata: {}\n\n", self.category, self.id, self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_payload_is_merged() {
        let ev = Event::new("s1", EventType::LlmStream, json!({"delta": "hi", "content_type": "text"}))
            .with_message_id("m1")
            .with_trace(Some("tr".into()));
        let frame = SseFrame::from_event(&ev);
        assert_eq!(frame.category, EventCategory::Delta);
        assert_eq!(frame.id, ev.id);
        assert_eq!(frame.data["delta"], "hi");
        assert_eq!(frame.data["event_type"], "llm_stream");
        assert_eq!(frame.data["session_id"], "s1");
        assert_eq!(frame.data["message_id"], "m1");
        assert_eq!(frame.data["trace_id"], "tr");
        assert_eq!(frame.data["timestamp"].as_f64(), Some(ev.timestamp.as_secs_f64()));
    }

    #[test]
    fn test_optional_ids_omitted() {
        let ev = Event::new("s1", EventType::Finish, json!({"status": "success"}));
        let frame = SseFrame::from_event(&ev);
        assert!(frame.data.get("trace_id").is_none());
        assert!(frame.data.get("message_id").is_none());
        assert_eq!(frame.category.as_str(), "finish");
    }

    #[test]
    fn test_sse_text_framing() {
        let frame = SseFrame::agent_stopped("s1");
        let text = frame.to_sse_string();
        assert!(text.starts_with("event: error\nid: agent_stopped\ndata: {"));
        assert!(text.ends_with("}\n\n"));
        assert_eq!(frame.event_type(), Some("agent_error"));
    }
}
