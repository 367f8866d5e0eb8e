//! 增量累加器：把同一消息 ID 的 Token 增量拼成一条完整助手消息

use std::collections::BTreeMap;

use serde_json::{json, Value};

use super::frame::{MessageDelta, Namespace, ToolCallChunk};
use crate::model::{ChatMessage, ToolCall};

#[derive(Debug, Default)]
struct PartialToolCall {
    id: Option<String>,
    name: Option<String>,
    args: String,
}

/// 正在拼装的消息
#[derive(Debug)]
pub struct Accumulator {
    id: String,
    node: String,
    namespace: Namespace,
    content: String,
    tool_calls: BTreeMap<usize, PartialToolCall>,
}

impl Accumulator {
    pub fn new(id: impl Into<String>, node: impl Into<String>, namespace: Namespace) -> Self {
        Self {
            id: id.into(),
            node: node.into(),
            namespace,
            content: String::new(),
            tool_calls: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn push(&mut self, delta: &MessageDelta) {
        self.content.push_str(&delta.content);
        for chunk in &delta.tool_call_chunks {
            self.push_tool_chunk(chunk);
        }
    }

    fn push_tool_chunk(&mut self, chunk: &ToolCallChunk) {
        let slot = self.tool_calls.entry(chunk.index).or_default();
        if slot.id.is_none() {
            slot.id = chunk.id.clone();
        }
        if slot.name.is_none() {
            slot.name = chunk.name.clone();
        }
        slot.args.push_str(&chunk.args);
    }

    /// 完成拼装：工具参数此时才按 JSON 解析
    pub fn finish(self) -> ChatMessage {
        let msg_id = self.id;
        let tool_calls = self
            .tool_calls
            .into_iter()
            .map(|(index, partial)| {
                ToolCall::new(
                    partial
                        .id
                        .unwrap_or_else(|| format!("{}_call_{}", msg_id, index)),
                    partial.name.unwrap_or_default(),
                    parse_args(&partial.args),
                )
            })
            .collect();
        ChatMessage::assistant_with_tools(self.content, tool_calls)
    }
}

/// 参数解析：空串为 `{}`；无法解析时为 `{"__raw": 原文}`
fn parse_args(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return json!({});
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "unparseable streamed tool arguments");
            json!({ "__raw": raw })
        }
    }
}
