//! 意图识别：已有对话的会话里，决定第一个接手的角色
//!
//! 新会话（历史中没有助手消息）总是交给 boss，不调用分类器；
//! 分类器失败或回复中找不到角色名时同样回落到 boss。

use std::sync::Arc;

use async_trait::async_trait;

use super::role::Role;
use crate::core::HiveError;
use crate::llm::LlmClient;
use crate::model::{ChatMessage, MessageKind};

/// 最新用户消息截断长度（字符）
const MAX_USER_CHARS: usize = 500;
/// 上下文中单条消息截断长度
const MAX_CONTEXT_ITEM_CHARS: usize = 200;
/// 上下文总长度
const MAX_CONTEXT_CHARS: usize = 800;
/// 取最近几条消息作为上下文
pub const CONTEXT_MESSAGES: usize = 6;

const INTENT_PROMPT: &str = "你是一个意图分类器。根据用户最新消息和对话上下文，判断用户意图，返回应该路由到的 agent。

可选 agent 及含义：
- boss: 新需求、功能需求、产品需求、PRD、需求分析
- engineer: 启动开发服务、运行命令、写代码、修改代码、实现功能、部署
- qa: 运行测试、测试
- product_manager: 修改 PRD
- architect: 修改架构
- project_manager: 修改任务

用户最新消息：{last_user_content}

对话上下文（最近几条）：{context}

只返回一个词，必须是以下之一：boss, engineer, qa, product_manager, architect, project_manager
";

/// 分类器：最新用户消息 + 最近上下文 → 角色
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, latest_user: &str, context: &[ChatMessage]) -> Result<Role, HiveError>;
}

/// 基于 LLM 的分类器
pub struct LlmClassifier {
    llm: Arc<dyn LlmClient>,
}

impl LlmClassifier {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    fn build_prompt(latest_user: &str, context: &[ChatMessage]) -> String {
        let lines = context
            .iter()
            .map(|m| {
                let who = if matches!(m.kind, MessageKind::User) { "用户" } else { "助手" };
                format!("{}: {}", who, truncate_chars(&m.text(), MAX_CONTEXT_ITEM_CHARS))
            })
            .collect::<Vec<_>>()
            .join("\n");
        INTENT_PROMPT
            .replace("{last_user_content}", &truncate_chars(latest_user, MAX_USER_CHARS))
            .replace("{context}", &truncate_chars(&lines, MAX_CONTEXT_CHARS))
    }
}

#[async_trait]
impl Classifier for LlmClassifier {
    async fn classify(&self, latest_user: &str, context: &[ChatMessage]) -> Result<Role, HiveError> {
        let prompt = Self::build_prompt(latest_user, context);
        let reply = self.llm.complete(&[ChatMessage::user(prompt)]).await?;
        Ok(parse_role_from_reply(&reply))
    }
}

/// 按固定角色顺序，返回第一个出现在回复中的角色名；都没有时为 boss
pub fn parse_role_from_reply(reply: &str) -> Role {
    let s = reply.trim().to_lowercase();
    Role::ALL
        .iter()
        .copied()
        .find(|r| s.contains(r.as_str()))
        .unwrap_or(Role::Boss)
}

/// 选择首个角色
pub async fn route_first_role(classifier: Option<&dyn Classifier>, history: &[ChatMessage]) -> Role {
    if !history.iter().any(|m| m.kind.is_assistant()) {
        tracing::debug!("fresh session, routing to boss");
        return Role::Boss;
    }
    let Some(classifier) = classifier else {
        return Role::Boss;
    };
    let latest_user = history
        .iter()
        .rev()
        .find(|m| matches!(m.kind, MessageKind::User))
        .map(|m| m.text())
        .unwrap_or_default();
    if latest_user.is_empty() {
        return Role::Boss;
    }
    let start = history.len().saturating_sub(CONTEXT_MESSAGES);
    match classifier.classify(&latest_user, &history[start..]).await {
        Ok(role) => {
            tracing::info!(role = %role, "intent classified");
            role
        }
        Err(e) => {
            tracing::warn!(error = %e, "intent classification failed, routing to boss");
            Role::Boss
        }
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmError, MockLlmClient};

    fn history_with_reply() -> Vec<ChatMessage> {
        vec![
            ChatMessage::user("Build a todo app"),
            ChatMessage::assistant("[Boss] requirements written"),
            ChatMessage::user("please run the tests"),
        ]
    }

    #[test]
    fn test_parse_role_from_reply() {
        assert_eq!(parse_role_from_reply("  QA  "), Role::Qa);
        assert_eq!(parse_role_from_reply("engineer."), Role::Engineer);
        assert_eq!(parse_role_from_reply("project_manager"), Role::ProjectManager);
        assert_eq!(parse_role_from_reply("I don't know"), Role::Boss);
    }

    #[tokio::test]
    async fn test_fresh_session_skips_classifier() {
        let llm = Arc::new(MockLlmClient::replying("qa"));
        let classifier = LlmClassifier::new(llm.clone());
        let role = route_first_role(Some(&classifier), &[ChatMessage::user("Build a todo app")]).await;
        assert_eq!(role, Role::Boss);
        assert!(llm.calls().is_empty());
    }

    #[tokio::test]
    async fn test_existing_session_uses_classifier() {
        let llm = Arc::new(MockLlmClient::replying("qa"));
        let classifier = LlmClassifier::new(llm.clone());
        let role = route_first_role(Some(&classifier), &history_with_reply()).await;
        assert_eq!(role, Role::Qa);

        let calls = llm.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0][0].text().contains("please run the tests"));
    }

    #[tokio::test]
    async fn test_classifier_failure_routes_to_boss() {
        let llm = Arc::new(MockLlmClient::failing(LlmError::Timeout(30)));
        let classifier = LlmClassifier::new(llm);
        assert_eq!(route_first_role(Some(&classifier), &history_with_reply()).await, Role::Boss);
        assert_eq!(route_first_role(None, &history_with_reply()).await, Role::Boss);
    }

    #[test]
    fn test_prompt_truncation() {
        let long = "x".repeat(2000);
        let context: Vec<ChatMessage> = (0..6).map(|_| ChatMessage::assistant(long.clone())).collect();
        let prompt = LlmClassifier::build_prompt(&long, &context);
        assert!(prompt.chars().count() < INTENT_PROMPT.chars().count() + 500 + 800);
    }
}
