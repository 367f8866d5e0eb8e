//! 单次运行的状态（由控制器独占，运行结束即丢弃）

use serde_json::{json, Value};

use super::directive::Directive;
use super::role::{Next, Role, Stage};
use crate::model::ChatMessage;

#[derive(Debug, Clone)]
pub struct RunState {
    /// 有序历史：载入的会话历史 + 用户消息 + 每个角色回合的摘要
    pub history: Vec<ChatMessage>,
    pub framework: String,
    pub current_stage: Option<Stage>,
    pub next_role: Option<Next>,
    /// 上一个角色交给下一个角色的指令（只使用一次）
    pub next_role_instruction: Option<String>,
    pub role_steps: usize,
    /// 按执行顺序记录的角色
    pub visited: Vec<Role>,
}

impl RunState {
    pub fn new(history: Vec<ChatMessage>, framework: impl Into<String>) -> Self {
        Self {
            history,
            framework: framework.into(),
            current_stage: None,
            next_role: None,
            next_role_instruction: None,
            role_steps: 0,
            visited: Vec::new(),
        }
    }

    /// 取出本回合指令：有上一角色的指令则用它，否则用默认模板
    pub fn take_instruction(&mut self, role: Role) -> String {
        self.next_role_instruction
            .take()
            .unwrap_or_else(|| role.default_instruction(&self.framework))
    }

    /// 执行器输入：历史 + 本回合指令
    pub fn turn_messages(&self, instruction: &str) -> Vec<ChatMessage> {
        let mut messages = self.history.clone();
        messages.push(ChatMessage::user(instruction));
        messages
    }

    /// 记录一个角色回合的结果与路由去向
    pub fn record_turn(&mut self, role: Role, output: &[ChatMessage], directive: &Directive, next: Next) {
        let last_output = output
            .iter()
            .rev()
            .find(|m| m.kind.is_assistant() && !m.content.is_empty())
            .or(output.last())
            .map(|m| m.text())
            .unwrap_or_default();
        self.history
            .push(ChatMessage::assistant(format!("[{}] {}", role.label(), last_output)));
        if let Some(stage) = role.stage() {
            self.current_stage = Some(stage);
        }
        self.next_role = Some(next);
        self.next_role_instruction = directive.instruction_for_next.clone();
        self.visited.push(role);
    }

    /// 角色回合结束后的根状态更新（stage_change 由此产生）
    pub fn update_values(&self, directive: &Directive) -> Value {
        json!({
            "current_stage": self.current_stage.map(|s| s.as_str()),
            "next_role": self.next_role.map(|n| n.as_str()),
            "next_action": directive.next_action,
            "reason": directive.reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instruction_override_is_consumed_once() {
        let mut state = RunState::new(vec![ChatMessage::user("Build a todo app")], "vue");
        state.next_role_instruction = Some("API path mismatch".into());
        assert_eq!(state.take_instruction(Role::Architect), "API path mismatch");
        assert_eq!(
            state.take_instruction(Role::Architect),
            Role::Architect.default_instruction("vue")
        );
    }

    #[test]
    fn test_record_turn_appends_tagged_summary() {
        let mut state = RunState::new(Vec::new(), "nextjs");
        let directive = Directive::new("continue").with_instruction("focus on auth");
        state.record_turn(
            Role::ProjectManager,
            &[ChatMessage::assistant("tasks.md ready")],
            &directive,
            Next::Role(Role::Engineer),
        );
        assert_eq!(state.history[0].text(), "[PJM] tasks.md ready");
        assert_eq!(state.current_stage, None);
        assert_eq!(state.next_role_instruction.as_deref(), Some("focus on auth"));

        state.record_turn(Role::Qa, &[], &Directive::new("end"), Next::End);
        assert_eq!(state.current_stage, Some(Stage::Testing));
        let values = state.update_values(&Directive::new("end"));
        assert_eq!(values["current_stage"], "testing");
        assert_eq!(values["next_role"], "end");
        assert_eq!(state.visited, vec![Role::ProjectManager, Role::Qa]);
    }
}
