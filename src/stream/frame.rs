//! 执行帧：多路复用执行流中的一个单元
//!
//! 每帧带命名空间（嵌套执行路径，如 `["engineer:abc", "tools:1"]`）与通道：
//! - **Updates**：某节点一步完成后的状态更新
//! - **Messages**：Token 级增量，或一条完整消息（助手 / 工具 / 系统）

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::ChatMessage;

/// 嵌套执行路径；空路径表示根图
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace(pub Vec<String>);

impl Namespace {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// 单段路径：`{node}:{task_id}`
    pub fn node(node: &str, task_id: &str) -> Self {
        Self(vec![format!("{}:{}", node, task_id)])
    }

    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segs = self.0.clone();
        segs.push(segment.into());
        Self(segs)
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// 第一段中 `:` 之前的部分
    pub fn top_level(&self) -> Option<&str> {
        self.0
            .first()
            .map(|seg| seg.split(':').next().unwrap_or(seg.as_str()))
            .filter(|s| !s.is_empty())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

/// 节点状态更新
#[derive(Debug, Clone, PartialEq)]
pub struct StateUpdate {
    pub node: String,
    pub values: Value,
}

/// 流式工具调用片段（按 index 合并）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolCallChunk {
    pub index: usize,
    pub id: Option<String>,
    pub name: Option<String>,
    pub args: String,
}

/// Token 级增量
#[derive(Debug, Clone, PartialEq)]
pub struct MessageDelta {
    /// 所属消息 ID；同 ID 的增量拼成一条消息
    pub id: String,
    pub content: String,
    pub tool_call_chunks: Vec<ToolCallChunk>,
}

impl MessageDelta {
    pub fn text(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            tool_call_chunks: Vec::new(),
        }
    }

    pub fn tool_chunk(id: impl Into<String>, chunk: ToolCallChunk) -> Self {
        Self {
            id: id.into(),
            content: String::new(),
            tool_call_chunks: vec![chunk],
        }
    }
}

/// Messages 通道的负载
#[derive(Debug, Clone, PartialEq)]
pub enum MessageUnit {
    Delta(MessageDelta),
    /// 完整消息；没有 ID 时由重建器分配
    Complete {
        id: Option<String>,
        message: ChatMessage,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageFrame {
    /// 产生该消息的节点名
    pub node: String,
    pub unit: MessageUnit,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Channel {
    Updates(StateUpdate),
    Messages(MessageFrame),
}

/// 一帧
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub namespace: Namespace,
    pub channel: Channel,
}

impl Frame {
    pub fn update(namespace: Namespace, node: impl Into<String>, values: Value) -> Self {
        Self {
            namespace,
            channel: Channel::Updates(StateUpdate {
                node: node.into(),
                values,
            }),
        }
    }

    pub fn delta(namespace: Namespace, node: impl Into<String>, delta: MessageDelta) -> Self {
        Self {
            namespace,
            channel: Channel::Messages(MessageFrame {
                node: node.into(),
                unit: MessageUnit::Delta(delta),
            }),
        }
    }

    pub fn complete(
        namespace: Namespace,
        node: impl Into<String>,
        id: Option<String>,
        message: ChatMessage,
    ) -> Self {
        Self {
            namespace,
            channel: Channel::Messages(MessageFrame {
                node: node.into(),
                unit: MessageUnit::Complete { id, message },
            }),
        }
    }

    /// 帧所属的顶层节点：命名空间第一段 `:` 之前；根帧取通道里的节点名
    pub fn top_level_node(&self) -> Option<&str> {
        if let Some(top) = self.namespace.top_level() {
            return Some(top);
        }
        let node = match &self.channel {
            Channel::Updates(u) => u.node.as_str(),
            Channel::Messages(m) => m.node.as_str(),
        };
        (!node.is_empty()).then_some(node)
    }
}
