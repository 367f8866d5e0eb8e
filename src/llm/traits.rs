//! LLM 客户端抽象
//!
//! 意图分类只需要非流式完成；角色回合内的模型调用由执行器自己负责，不经过这里。

use async_trait::async_trait;
use thiserror::Error;

use crate::model::ChatMessage;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Timeout after {0}s")]
    Timeout(u64),

    #[error("Empty response")]
    EmptyResponse,
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError>;
}
