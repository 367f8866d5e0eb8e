//! 会话级操作：发起运行、续传、停止、历史
//!
//! 每个会话同一时间只有一次运行（运行租约保证）；运行在后台任务里进行，
//! 调用方拿到的是从触发前游标开始的投递流，与运行本身解耦。

use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::core::{HiveError, RunLease, SignalStore, StopSignal};
use crate::model::{Message, Timestamp};
use crate::store::{MessagePage, MessageStore, Store};
use crate::team::{AgentExecutor, Classifier, RunContext, WorkflowController};

use super::delivery::{DeliveryGateway, DeliveryStream};

/// stop 等待运行退出时的检查间隔
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// 一次已触发的运行
pub struct Generation {
    /// 本次持久化的用户消息
    pub user_message: Message,
    pub trace_id: Option<String>,
    pub stream: DeliveryStream,
}

pub struct TeamService {
    store: Arc<dyn Store>,
    executor: Arc<dyn AgentExecutor>,
    classifier: Option<Arc<dyn Classifier>>,
    lease: RunLease,
    stop: StopSignal,
    gateway: DeliveryGateway,
    config: AppConfig,
}

impl TeamService {
    pub fn new(
        store: Arc<dyn Store>,
        executor: Arc<dyn AgentExecutor>,
        signals: Arc<dyn SignalStore>,
        config: AppConfig,
    ) -> Self {
        let lease = RunLease::new(Arc::clone(&signals), config.team.run_timeout());
        let stop = StopSignal::new(signals);
        let gateway = DeliveryGateway::new(Arc::clone(&store), lease.clone(), config.gateway.clone());
        Self {
            store,
            executor,
            classifier: None,
            lease,
            stop,
            gateway,
            config,
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn gateway(&self) -> &DeliveryGateway {
        &self.gateway
    }

    /// 持久化用户消息并在后台启动一次团队运行
    ///
    /// 会话已有运行时返回 `HiveError::AlreadyRunning`，此时不写入任何消息。
    pub async fn generate(
        &self,
        session_id: &str,
        prompt: &str,
        framework: Option<&str>,
    ) -> Result<Generation, HiveError> {
        if !self.lease.acquire(session_id).await? {
            tracing::warn!(session_id = %session_id, "run already active");
            return Err(HiveError::AlreadyRunning(session_id.to_string()));
        }
        // 上一次运行自然结束后残留的停止信号不能作用于本次运行
        if let Err(e) = self.stop.clear(session_id).await {
            self.release_lease(session_id).await;
            return Err(e.into());
        }
        let user_message = match self.persist_prompt(session_id, prompt).await {
            Ok(m) => m,
            Err(e) => {
                self.release_lease(session_id).await;
                return Err(e);
            }
        };
        // 触发前记下游标，运行写出的第一个事件也严格晚于它
        let cutoff = Timestamp::now();

        let framework = framework
            .map(String::from)
            .unwrap_or_else(|| self.config.app.framework.clone());
        let ctx = RunContext::new(session_id, framework);
        let trace_id = ctx.trace_id.clone();

        let mut controller =
            WorkflowController::new(Arc::clone(&self.store), Arc::clone(&self.executor), self.config.team.clone())
                .with_stop_signal(self.stop.clone());
        if let Some(classifier) = &self.classifier {
            controller = controller.with_classifier(Arc::clone(classifier));
        }
        let lease = self.lease.clone();
        let message = user_message.clone();
        tokio::spawn(async move {
            if let Err(e) = controller.run(&ctx, &message).await {
                tracing::error!(session_id = %ctx.session_id, error = %e, "run ended with persistence failure");
            }
            if let Err(e) = lease.release(&ctx.session_id).await {
                tracing::warn!(session_id = %ctx.session_id, error = %e, "lease release failed");
            }
        });

        Ok(Generation {
            user_message,
            trace_id,
            stream: self.gateway.stream(session_id, Some(cutoff)),
        })
    }

    async fn release_lease(&self, session_id: &str) {
        if let Err(e) = self.lease.release(session_id).await {
            tracing::warn!(session_id = %session_id, error = %e, "lease release failed");
        }
    }

    async fn persist_prompt(&self, session_id: &str, prompt: &str) -> Result<Message, HiveError> {
        let parent = self.store.last_message(session_id).await?.map(|m| m.id);
        let message = Message::user(session_id, parent, prompt);
        self.store.append_message(&message).await?;
        Ok(message)
    }

    /// 续传：`since` 之后的事件（`None` 为完整历史），然后跟随运行
    pub fn resume(&self, session_id: &str, since: Option<Timestamp>) -> DeliveryStream {
        self.gateway.stream(session_id, since)
    }

    /// 请求停止；在等待上限内运行退出返回 true
    pub async fn stop(&self, session_id: &str) -> Result<bool, HiveError> {
        if !self.lease.is_running(session_id).await? {
            return Ok(true);
        }
        self.stop.request(session_id).await?;
        tracing::info!(session_id = %session_id, "stop requested");

        let deadline = tokio::time::Instant::now() + self.config.gateway.stop_wait();
        while tokio::time::Instant::now() < deadline {
            tokio::time::sleep(STOP_POLL_INTERVAL).await;
            if !self.lease.is_running(session_id).await? {
                return Ok(true);
            }
        }
        tracing::warn!(session_id = %session_id, "run did not exit before stop deadline");
        Ok(false)
    }

    pub async fn is_running(&self, session_id: &str) -> Result<bool, HiveError> {
        Ok(self.lease.is_running(session_id).await?)
    }

    pub async fn history(
        &self,
        session_id: &str,
        page: &MessagePage,
        limit: usize,
    ) -> Result<Vec<Message>, HiveError> {
        Ok(self.store.messages_page(session_id, page, limit).await?)
    }
}
