//! Hive - Rust 多角色智能体团队
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、运行租约与停止信号、优雅关闭
//! - **gateway**: 可续传事件投递（回放 + 轮询）与会话级操作
//! - **llm**: LLM 客户端抽象（意图识别用）与 Mock
//! - **model**: 消息、事件、时间戳
//! - **observability**: tracing 初始化
//! - **store**: 事件日志与消息存储（内存 / SQLite）
//! - **stream**: 执行帧模型与流重建器
//! - **team**: 角色、决策解析、意图路由、执行器接口、工作流控制器

pub mod config;
pub mod core;
pub mod gateway;
pub mod llm;
pub mod model;
pub mod observability;
pub mod store;
pub mod stream;
pub mod team;
