//! 事件模型：只追加的会话事件日志条目
//!
//! 每个事件带单调时间戳（即续传游标）、类型与 JSON 负载；类型决定投递分类与是否终止流。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Timestamp;

/// 事件类型（封闭集合）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    AgentStart,
    AgentEnd,
    AgentError,
    LlmStart,
    LlmStream,
    LlmEnd,
    ToolStart,
    ToolEnd,
    MessageDelta,
    MessageComplete,
    NodeStart,
    NodeEnd,
    StageChange,
    Custom,
    Finish,
}

/// 投递给客户端时的分类（SSE 的 `event:` 字段）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCategory {
    Delta,
    Message,
    Status,
    Error,
    Custom,
    Finish,
    NodeStart,
    NodeEnd,
    StageChange,
}

impl EventCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventCategory::Delta => "delta",
            EventCategory::Message => "message",
            EventCategory::Status => "status",
            EventCategory::Error => "error",
            EventCategory::Custom => "custom",
            EventCategory::Finish => "finish",
            EventCategory::NodeStart => "node_start",
            EventCategory::NodeEnd => "node_end",
            EventCategory::StageChange => "stage_change",
        }
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl EventType {
    pub const ALL: [EventType; 15] = [
        EventType::AgentStart,
        EventType::AgentEnd,
        EventType::AgentError,
        EventType::LlmStart,
        EventType::LlmStream,
        EventType::LlmEnd,
        EventType::ToolStart,
        EventType::ToolEnd,
        EventType::MessageDelta,
        EventType::MessageComplete,
        EventType::NodeStart,
        EventType::NodeEnd,
        EventType::StageChange,
        EventType::Custom,
        EventType::Finish,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::AgentStart => "agent_start",
            EventType::AgentEnd => "agent_end",
            EventType::AgentError => "agent_error",
            EventType::LlmStart => "llm_start",
            EventType::LlmStream => "llm_stream",
            EventType::LlmEnd => "llm_end",
            EventType::ToolStart => "tool_start",
            EventType::ToolEnd => "tool_end",
            EventType::MessageDelta => "message_delta",
            EventType::MessageComplete => "message_complete",
            EventType::NodeStart => "node_start",
            EventType::NodeEnd => "node_end",
            EventType::StageChange => "stage_change",
            EventType::Custom => "custom",
            EventType::Finish => "finish",
        }
    }

    pub fn category(&self) -> EventCategory {
        match self {
            EventType::MessageDelta | EventType::LlmStream => EventCategory::Delta,
            EventType::MessageComplete => EventCategory::Message,
            EventType::AgentStart
            | EventType::AgentEnd
            | EventType::LlmStart
            | EventType::LlmEnd
            | EventType::ToolStart
            | EventType::ToolEnd => EventCategory::Status,
            EventType::AgentError => EventCategory::Error,
            EventType::Custom => EventCategory::Custom,
            EventType::Finish => EventCategory::Finish,
            EventType::NodeStart => EventCategory::NodeStart,
            EventType::NodeEnd => EventCategory::NodeEnd,
            EventType::StageChange => EventCategory::StageChange,
        }
    }

    /// 一定终止实时流的事件
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventType::Finish | EventType::AgentError)
    }

    /// 不直接终止，但生产者可能在其后崩溃，需要尽快做一次存活检查
    pub fn requires_liveness_check(&self) -> bool {
        matches!(self, EventType::AgentEnd)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown event type: {}", s))
    }
}

/// 会话事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub session_id: String,
    pub timestamp: Timestamp,
    pub event_type: EventType,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub agent_name: Option<String>,
    #[serde(default)]
    pub trace_id: Option<String>,
    #[serde(default)]
    pub data: Value,
}

impl Event {
    /// 新事件：uuid v4 作为 ID，时间戳取当前（进程内严格递增）
    pub fn new(session_id: impl Into<String>, event_type: EventType, data: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            timestamp: Timestamp::now(),
            event_type,
            message_id: None,
            agent_name: None,
            trace_id: None,
            data,
        }
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    pub fn with_agent(mut self, agent_name: Option<String>) -> Self {
        self.agent_name = agent_name;
        self
    }

    pub fn with_trace(mut self, trace_id: Option<String>) -> Self {
        self.trace_id = trace_id;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.event_type.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_mapping() {
        assert_eq!(EventType::MessageDelta.category(), EventCategory::Delta);
        assert_eq!(EventType::LlmStream.category(), EventCategory::Delta);
        assert_eq!(EventType::MessageComplete.category(), EventCategory::Message);
        for t in [
            EventType::AgentStart,
            EventType::AgentEnd,
            EventType::LlmStart,
            EventType::LlmEnd,
            EventType::ToolStart,
            EventType::ToolEnd,
        ] {
            assert_eq!(t.category(), EventCategory::Status, "{}", t);
        }
        assert_eq!(EventType::AgentError.category().as_str(), "error");
        assert_eq!(EventType::StageChange.category().as_str(), "stage_change");
        assert_eq!(EventType::Finish.category().as_str(), "finish");
    }

    #[test]
    fn test_terminal_asymmetry() {
        assert!(EventType::Finish.is_terminal());
        assert!(EventType::AgentError.is_terminal());
        assert!(!EventType::AgentEnd.is_terminal());
        assert!(EventType::AgentEnd.requires_liveness_check());
    }

    #[test]
    fn test_type_string_roundtrip() {
        for t in EventType::ALL {
            assert_eq!(t.as_str().parse::<EventType>().unwrap(), t);
            assert_eq!(serde_json::to_value(t).unwrap(), t.as_str());
        }
        assert!("nope".parse::<EventType>().is_err());
    }
}
