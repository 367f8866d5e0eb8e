//! 路由决策（Directive）解析
//!
//! 角色回合内可通过 `workflow_decision` 工具调用给出决策；没有时识别文本块
//! `[WORKFLOW_DECISION]{...}[/WORKFLOW_DECISION]`；两者都没有则用默认动作。
//! 同一回合出现多个决策时，最后一个有效的生效。

use std::sync::OnceLock;

use regex::Regex;
use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::model::ChatMessage;

/// 决策工具名
pub const DECISION_TOOL_NAME: &str = "workflow_decision";

/// 角色给出的路由决策
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Directive {
    /// 下一步动作，如 continue、end、back_to_architect、back_to_engineer
    pub next_action: String,
    /// 做出该决策的理由
    #[serde(default)]
    pub reason: Option<String>,
    /// 交给下一个角色的指令；为空时下一个角色使用其默认指令
    #[serde(default)]
    pub instruction_for_next: Option<String>,
}

impl Directive {
    pub fn new(next_action: impl Into<String>) -> Self {
        Self {
            next_action: next_action.into(),
            reason: None,
            instruction_for_next: None,
        }
    }

    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction_for_next = Some(instruction.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// 空动作视为无效；空白指令归一为 None
    fn normalized(mut self) -> Result<Self, DirectiveError> {
        if self.next_action.trim().is_empty() {
            return Err(DirectiveError::MissingAction);
        }
        self.next_action = self.next_action.trim().to_string();
        if self
            .instruction_for_next
            .as_deref()
            .is_some_and(|s| s.trim().is_empty())
        {
            self.instruction_for_next = None;
        }
        Ok(self)
    }
}

#[derive(Error, Debug)]
enum DirectiveError {
    #[error("no decision found")]
    NotFound,

    #[error("decision has no next_action")]
    MissingAction,

    #[error("malformed decision: {0}")]
    Malformed(String),
}

fn decision_block_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)\[WORKFLOW_DECISION\](.*?)\[/WORKFLOW_DECISION\]").ok())
        .as_ref()
}

/// 从一个角色回合产生的消息中解析决策；找不到有效决策时返回 `default_action`
pub fn parse_directive(messages: &[ChatMessage], default_action: &str) -> Directive {
    from_tool_calls(messages)
        .or_else(|_| from_text_blocks(messages))
        .unwrap_or_else(|e| {
            tracing::debug!(reason = %e, default_action, "no workflow decision, using default");
            Directive::new(default_action)
        })
}

fn from_tool_calls(messages: &[ChatMessage]) -> Result<Directive, DirectiveError> {
    let candidates = messages
        .iter()
        .rev()
        .flat_map(|m| m.kind.tool_calls().iter().rev())
        .filter(|c| c.name == DECISION_TOOL_NAME);
    for call in candidates {
        match decode(call.args.clone()) {
            Ok(d) => return Ok(d),
            Err(e) => tracing::warn!(tool_call_id = %call.id, error = %e, "skipping malformed workflow_decision call"),
        }
    }
    Err(DirectiveError::NotFound)
}

fn from_text_blocks(messages: &[ChatMessage]) -> Result<Directive, DirectiveError> {
    let Some(re) = decision_block_regex() else {
        return Err(DirectiveError::NotFound);
    };
    for msg in messages.iter().rev() {
        let text = msg.text();
        if text.is_empty() {
            continue;
        }
        let blocks: Vec<&str> = re
            .captures_iter(&text)
            .filter_map(|c| c.get(1).map(|m| m.as_str()))
            .collect();
        for body in blocks.into_iter().rev() {
            let parsed = serde_json::from_str::<Value>(body.trim())
                .map_err(|e| DirectiveError::Malformed(e.to_string()))
                .and_then(decode);
            match parsed {
                Ok(d) => return Ok(d),
                Err(e) => tracing::warn!(error = %e, "skipping malformed decision block"),
            }
        }
    }
    Err(DirectiveError::NotFound)
}

fn decode(args: Value) -> Result<Directive, DirectiveError> {
    if !args.is_object() {
        return Err(DirectiveError::Malformed("arguments are not an object".into()));
    }
    let directive: Directive =
        serde_json::from_value(args).map_err(|e| DirectiveError::Malformed(e.to_string()))?;
    directive.normalized()
}

/// 决策参数的 JSON Schema
pub fn workflow_decision_schema() -> Value {
    let schema = schema_for!(Directive);
    serde_json::to_value(&schema).unwrap_or(Value::Null)
}

/// 供执行器向模型声明的决策工具（name / description / parameters）
pub fn workflow_decision_tool() -> Value {
    json!({
        "name": DECISION_TOOL_NAME,
        "description": "Decide which team role acts next once your own work is done.",
        "parameters": workflow_decision_schema(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ToolCall;

    fn decision_call(id: &str, args: Value) -> ChatMessage {
        ChatMessage::assistant_with_tools("", vec![ToolCall::new(id, DECISION_TOOL_NAME, args)])
    }

    #[test]
    fn test_tool_call_wins_over_text_block() {
        let msgs = vec![
            ChatMessage::assistant(
                r#"[WORKFLOW_DECISION]{"next_action":"end"}[/WORKFLOW_DECISION]"#,
            ),
            decision_call(
                "c1",
                json!({"next_action": "back_to_architect", "instruction_for_next": "API path mismatch"}),
            ),
        ];
        let d = parse_directive(&msgs, "continue");
        assert_eq!(d.next_action, "back_to_architect");
        assert_eq!(d.instruction_for_next.as_deref(), Some("API path mismatch"));
    }

    #[test]
    fn test_last_tool_decision_wins() {
        let msgs = vec![
            decision_call("c1", json!({"next_action": "continue"})),
            ChatMessage::tool("c1", "ok"),
            decision_call("c2", json!({"next_action": "back_to_engineer"})),
        ];
        assert_eq!(parse_directive(&msgs, "continue").next_action, "back_to_engineer");
    }

    #[test]
    fn test_malformed_call_is_skipped() {
        let msgs = vec![
            decision_call("c1", json!({"next_action": "end"})),
            decision_call("c2", json!({"reason": "forgot the action"})),
            decision_call("c3", json!("not an object")),
        ];
        assert_eq!(parse_directive(&msgs, "continue").next_action, "end");
    }

    #[test]
    fn test_text_block_fallback_multiline() {
        let text = "done.\n[WORKFLOW_DECISION]\n{\n  \"next_action\": \"back_to_pm\",\n  \"reason\": \"gaps\",\n  \"instruction_for_next\": \"  \"\n}\n[/WORKFLOW_DECISION]";
        let d = parse_directive(&[ChatMessage::assistant(text)], "continue");
        assert_eq!(d.next_action, "back_to_pm");
        assert_eq!(d.reason.as_deref(), Some("gaps"));
        assert_eq!(d.instruction_for_next, None);
    }

    #[test]
    fn test_bad_text_block_falls_back_to_default() {
        let msgs = vec![ChatMessage::assistant("[WORKFLOW_DECISION]{oops[/WORKFLOW_DECISION]")];
        let d = parse_directive(&msgs, "continue");
        assert_eq!(d, Directive::new("continue"));
    }

    #[test]
    fn test_empty_messages_default() {
        assert_eq!(parse_directive(&[], "end"), Directive::new("end"));
    }

    #[test]
    fn test_schema_lists_fields() {
        let schema = workflow_decision_schema();
        let props = &schema["properties"];
        assert!(props.get("next_action").is_some());
        assert!(props.get("instruction_for_next").is_some());
        assert_eq!(schema["required"], json!(["next_action"]));
        assert_eq!(workflow_decision_tool()["name"], DECISION_TOOL_NAME);
    }
}
