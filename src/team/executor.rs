//! 角色执行器接口
//!
//! 一个角色回合内的模型调用与工具执行不在本 crate 范围内；执行器边跑边把帧推进有界通道，
//! 回合结束时返回本回合产生的完整消息（决策从中解析）。

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::role::Role;
use crate::core::HiveError;
use crate::model::ChatMessage;
use crate::stream::Frame;

/// 请求级上下文：显式传给每次执行器调用，不依赖任何全局查找
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    pub session_id: String,
    /// 执行器工作区（容器 / 目录）标识
    pub workspace_id: Option<String>,
    pub framework: String,
    pub trace_id: Option<String>,
}

impl RunContext {
    pub fn new(session_id: impl Into<String>, framework: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            workspace_id: None,
            framework: framework.into(),
            trace_id: Some(uuid::Uuid::new_v4().to_string()),
        }
    }

    pub fn with_workspace(mut self, workspace_id: impl Into<String>) -> Self {
        self.workspace_id = Some(workspace_id.into());
        self
    }
}

/// 一个角色回合的输入
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub context: RunContext,
    pub role: Role,
    /// 本回合指令（已在 messages 末尾作为用户消息追加）
    pub instruction: String,
    pub messages: Vec<ChatMessage>,
}

/// 一个角色回合的输出
#[derive(Debug, Clone, Default)]
pub struct TurnOutput {
    pub messages: Vec<ChatMessage>,
}

/// 角色执行器
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    /// 执行一个角色回合；帧发送失败（接收端已关闭）时应尽快结束
    async fn execute(&self, request: TurnRequest, frames: mpsc::Sender<Frame>) -> Result<TurnOutput, HiveError>;
}
