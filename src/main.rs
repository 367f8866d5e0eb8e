//! Hive - 本地演示
//!
//! 入口：以内存存储 + Mock 执行器跑一遍团队流程，把投递流按 SSE 文本格式打印到 stdout。
//! 用法：`cargo run -- "做一个待办应用"`

use std::sync::Arc;

use anyhow::Context;
use futures_util::StreamExt;
use hive::{
    config::load_config,
    core::InMemorySignalStore,
    gateway::TeamService,
    llm::MockLlmClient,
    store::InMemoryStore,
    team::{LlmClassifier, MockAgentExecutor},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    hive::observability::init();

    let cfg = load_config(None).context("Failed to load config")?;
    let prompt = std::env::args()
        .skip(1)
        .collect::<Vec<_>>()
        .join(" ");
    let prompt = if prompt.trim().is_empty() {
        "Build a todo app".to_string()
    } else {
        prompt
    };

    let service = TeamService::new(
        Arc::new(InMemoryStore::new()),
        Arc::new(MockAgentExecutor::new()),
        Arc::new(InMemorySignalStore::new()),
        cfg,
    )
    .with_classifier(Arc::new(LlmClassifier::new(Arc::new(MockLlmClient::default()))));

    let session_id = uuid::Uuid::new_v4().to_string();
    let run = service
        .generate(&session_id, &prompt, None)
        .await
        .context("Failed to start team run")?;
    tracing::info!(session_id = %session_id, trace_id = ?run.trace_id, "demo run started");

    let mut stream = run.stream;
    while let Some(frame) = stream.next().await {
        print!("{}", frame.to_sse_string());
    }
    Ok(())
}
