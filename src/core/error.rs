//! 运行错误类型
//!
//! 除决策解析失败（仅记录日志、回落默认动作）外，以下错误都会终止整次运行；
//! 终止前仍会写出 agent_error + finish 事件，保证客户端的流能结束。

use thiserror::Error;

use crate::llm::LlmError;
use crate::store::StoreError;

/// 团队运行过程中的错误
#[derive(Error, Debug)]
pub enum HiveError {
    /// 角色执行器抛错（整次运行失败，不做单角色重试）
    #[error("Executor failed in {role}: {message}")]
    Executor { role: String, message: String },

    /// 持久化失败：向上传播，绝不吞掉（否则重放保证失效）
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Classifier error: {0}")]
    Classifier(String),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Config error: {0}")]
    Config(String),

    /// 同一会话已有运行中的任务（租约未释放）
    #[error("Session {0} already has a running agent")]
    AlreadyRunning(String),

    /// 角色步数超过上限
    #[error("Role step limit of {0} exceeded")]
    StepLimitExceeded(usize),

    #[error("Run timed out after {0}s")]
    Timeout(u64),
}

impl HiveError {
    /// 写入 agent_error 事件的 error_type
    pub fn error_type(&self) -> &'static str {
        match self {
            HiveError::Executor { .. } => "ExecutorError",
            HiveError::Store(_) => "StoreError",
            HiveError::Classifier(_) => "ClassifierError",
            HiveError::Llm(_) => "LlmError",
            HiveError::Config(_) => "ConfigError",
            HiveError::AlreadyRunning(_) => "AlreadyRunning",
            HiveError::StepLimitExceeded(_) => "StepLimitExceeded",
            HiveError::Timeout(_) => "Timeout",
        }
    }

    pub fn executor(role: impl Into<String>, message: impl Into<String>) -> Self {
        HiveError::Executor {
            role: role.into(),
            message: message.into(),
        }
    }
}

impl From<config::ConfigError> for HiveError {
    fn from(e: config::ConfigError) -> Self {
        HiveError::Config(e.to_string())
    }
}
