//! 消息模型
//!
//! - **Message**：持久化的完整消息（写入后不可变），带会话、父消息、产生角色与追踪 ID
//! - **ChatMessage**：轻量对话消息（仅种类 + 内容），用于执行器输入/输出与历史重放
//! - **MessageKind**：封闭的四种消息种类，序列化为 `role` 字段，附带 `tool_calls` / `tool_call_id`

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Timestamp;

/// 助手发起的一次工具调用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, args: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            args,
        }
    }
}

/// 消息种类
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum MessageKind {
    User,
    Assistant {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
    },
    System,
    Tool {
        tool_call_id: String,
    },
}

impl MessageKind {
    pub fn assistant() -> Self {
        MessageKind::Assistant {
            tool_calls: Vec::new(),
        }
    }

    pub fn role_name(&self) -> &'static str {
        match self {
            MessageKind::User => "user",
            MessageKind::Assistant { .. } => "assistant",
            MessageKind::System => "system",
            MessageKind::Tool { .. } => "tool",
        }
    }

    pub fn is_assistant(&self) -> bool {
        matches!(self, MessageKind::Assistant { .. })
    }

    pub fn tool_calls(&self) -> &[ToolCall] {
        match self {
            MessageKind::Assistant { tool_calls } => tool_calls,
            _ => &[],
        }
    }
}

/// 多模态内容片段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    Image {
        url: String,
    },
    File {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },
    ToolCall {
        id: String,
        name: String,
        #[serde(default)]
        args: Value,
    },
    ToolResult {
        tool_call_id: String,
        content: String,
    },
}

/// 消息内容：纯文本或有序片段列表
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl Default for Content {
    fn default() -> Self {
        Content::Text(String::new())
    }
}

impl From<String> for Content {
    fn from(s: String) -> Self {
        Content::Text(s)
    }
}

impl From<&str> for Content {
    fn from(s: &str) -> Self {
        Content::Text(s.to_string())
    }
}

impl Content {
    /// 文本视图：纯文本原样返回；片段列表拼接其中的 text 片段
    pub fn as_text(&self) -> String {
        match self {
            Content::Text(s) => s.clone(),
            Content::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Content::Text(s) => s.is_empty(),
            Content::Parts(parts) => parts.is_empty(),
        }
    }
}

/// 轻量对话消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(flatten)]
    pub kind: MessageKind,
    #[serde(default)]
    pub content: Content,
}

impl ChatMessage {
    pub fn user(content: impl Into<Content>) -> Self {
        Self {
            kind: MessageKind::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<Content>) -> Self {
        Self {
            kind: MessageKind::assistant(),
            content: content.into(),
        }
    }

    pub fn assistant_with_tools(content: impl Into<Content>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            kind: MessageKind::Assistant { tool_calls },
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<Content>) -> Self {
        Self {
            kind: MessageKind::System,
            content: content.into(),
        }
    }

    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<Content>) -> Self {
        Self {
            kind: MessageKind::Tool {
                tool_call_id: tool_call_id.into(),
            },
            content: content.into(),
        }
    }

    pub fn text(&self) -> String {
        self.content.as_text()
    }
}

/// 持久化的完整消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub session_id: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(flatten)]
    pub kind: MessageKind,
    #[serde(default)]
    pub content: Content,
    pub timestamp: Timestamp,
    #[serde(default)]
    pub agent_name: Option<String>,
    #[serde(default)]
    pub trace_id: Option<String>,
}

impl Message {
    /// 由对话消息构造待持久化消息，时间戳取当前
    pub fn from_chat(
        id: impl Into<String>,
        session_id: impl Into<String>,
        parent_id: Option<String>,
        chat: ChatMessage,
    ) -> Self {
        Self {
            id: id.into(),
            session_id: session_id.into(),
            parent_id,
            kind: chat.kind,
            content: chat.content,
            timestamp: Timestamp::now(),
            agent_name: None,
            trace_id: None,
        }
    }

    /// 新建用户消息（ID 为 uuid v4）
    pub fn user(session_id: impl Into<String>, parent_id: Option<String>, text: &str) -> Self {
        Self::from_chat(
            uuid::Uuid::new_v4().to_string(),
            session_id,
            parent_id,
            ChatMessage::user(text),
        )
    }

    pub fn with_agent(mut self, agent_name: impl Into<String>) -> Self {
        self.agent_name = Some(agent_name.into());
        self
    }

    pub fn with_trace(mut self, trace_id: Option<String>) -> Self {
        self.trace_id = trace_id;
        self
    }

    pub fn to_chat(&self) -> ChatMessage {
        ChatMessage {
            kind: self.kind.clone(),
            content: self.content.clone(),
        }
    }

    pub fn text(&self) -> String {
        self.content.as_text()
    }
}

/// 重放前清理历史，保证工具调用链完整：
///
/// - 助手消息的 tool_calls 若在下一条 user/system 消息之前没有全部得到 tool 回复，则去掉 tool_calls（保留文本）
/// - 找不到对应助手调用的 tool 消息（孤儿）直接丢弃
pub fn sanitize_history(messages: Vec<ChatMessage>) -> Vec<ChatMessage> {
    let mut out = Vec::with_capacity(messages.len());
    // 当前可被 tool 消息应答的调用 ID（来自仍保留 tool_calls 的助手消息）
    let mut open_calls: HashSet<String> = HashSet::new();

    for (i, msg) in messages.iter().enumerate() {
        match &msg.kind {
            MessageKind::User | MessageKind::System => {
                open_calls.clear();
                out.push(msg.clone());
            }
            MessageKind::Assistant { tool_calls } if !tool_calls.is_empty() => {
                let answered = answered_before_boundary(&messages[i + 1..]);
                let complete = tool_calls.iter().all(|c| answered.contains(c.id.as_str()));
                if complete {
                    open_calls.extend(tool_calls.iter().map(|c| c.id.clone()));
                    out.push(msg.clone());
                } else {
                    tracing::debug!(
                        calls = tool_calls.len(),
                        "stripping unanswered tool_calls from replayed assistant message"
                    );
                    out.push(ChatMessage {
                        kind: MessageKind::assistant(),
                        content: msg.content.clone(),
                    });
                }
            }
            MessageKind::Assistant { .. } => out.push(msg.clone()),
            MessageKind::Tool { tool_call_id } => {
                if open_calls.contains(tool_call_id) {
                    out.push(msg.clone());
                } else {
                    tracing::debug!(tool_call_id = %tool_call_id, "dropping orphan tool message");
                }
            }
        }
    }
    out
}

/// 在下一条 user/system 消息之前出现的 tool 回复 ID
fn answered_before_boundary(rest: &[ChatMessage]) -> HashSet<&str> {
    rest.iter()
        .take_while(|m| !matches!(m.kind, MessageKind::User | MessageKind::System))
        .filter_map(|m| match &m.kind {
            MessageKind::Tool { tool_call_id } => Some(tool_call_id.as_str()),
            _ => None,
        })
        .collect()
}
