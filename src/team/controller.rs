//! 工作流控制器：驱动 intent → 角色 → … → END 的状态机
//!
//! 每个角色回合：取指令 → 调用执行器（帧经有界通道实时交给重建器）→ 解析决策 → 查转移表。
//! 停止信号只在角色之间检查；任何错误都终止整次运行，但仍写出终止事件，客户端的流不会挂起。

use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc;

use super::directive::parse_directive;
use super::executor::{AgentExecutor, RunContext, TurnOutput, TurnRequest};
use super::intent::{route_first_role, Classifier};
use super::role::{resolve_next_role, Next, Role};
use super::state::RunState;
use crate::config::TeamSection;
use crate::core::{HiveError, StopSignal};
use crate::model::{sanitize_history, ChatMessage, EventType, Message};
use crate::store::{MessagePage, MessageStore, Store, StoreError};
use crate::stream::{Frame, Namespace, StreamReconstructor};

/// intent 节点名（不是角色，只负责选出第一个角色）
pub const INTENT_NODE: &str = "intent";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    Failed,
    Stopped,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Failed => "error",
            RunStatus::Stopped => "stopped",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunResult {
    pub status: RunStatus,
    pub error: Option<String>,
    /// 实际执行过的角色（按顺序）
    pub roles: Vec<Role>,
}

pub struct WorkflowController {
    store: Arc<dyn Store>,
    executor: Arc<dyn AgentExecutor>,
    classifier: Option<Arc<dyn Classifier>>,
    stop: Option<StopSignal>,
    settings: TeamSection,
}

impl WorkflowController {
    pub fn new(store: Arc<dyn Store>, executor: Arc<dyn AgentExecutor>, settings: TeamSection) -> Self {
        Self {
            store,
            executor,
            classifier: None,
            stop: None,
            settings,
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = Some(stop);
        self
    }

    /// 以已持久化的用户消息触发一次运行
    ///
    /// 返回 `Err` 仅在持久化失败时（此前已尽力写出终止事件）；其余失败以 `RunStatus::Failed` 返回。
    pub async fn run(&self, ctx: &RunContext, user_message: &Message) -> Result<RunResult, HiveError> {
        tracing::info!(
            session_id = %ctx.session_id,
            trace_id = ?ctx.trace_id,
            framework = %ctx.framework,
            "team run started"
        );
        let mut rec = StreamReconstructor::new(
            Arc::clone(&self.store),
            ctx.session_id.clone(),
            ctx.trace_id.clone(),
            Some(user_message.id.clone()),
        );
        let mut state = RunState::new(Vec::new(), ctx.framework.clone());

        let start = json!({
            "prompt": user_message.text(),
            "framework": ctx.framework,
            "mode": "team",
        });
        let outcome = match rec
            .emit(EventType::AgentStart, start, Some(user_message.id.clone()), None)
            .await
        {
            Ok(_) => {
                let timeout = self.settings.run_timeout();
                match tokio::time::timeout(timeout, self.drive(ctx, user_message, &mut rec, &mut state)).await {
                    Ok(res) => res,
                    Err(_) => Err(HiveError::Timeout(timeout.as_secs())),
                }
            }
            Err(e) => Err(HiveError::from(e)),
        };

        let result = match outcome {
            Ok(status) => self.conclude(&mut rec, &state, status).await,
            Err(e) => self.fail(&mut rec, e).await,
        };
        let roles = state.visited.clone();
        match &result {
            Ok((status, error)) => tracing::info!(
                session_id = %ctx.session_id,
                status = status.as_str(),
                error = ?error,
                roles = roles.len(),
                "team run finished"
            ),
            Err(e) => tracing::error!(session_id = %ctx.session_id, error = %e, "team run aborted"),
        }
        result.map(|(status, error)| RunResult { status, error, roles })
    }

    async fn drive(
        &self,
        ctx: &RunContext,
        user_message: &Message,
        rec: &mut StreamReconstructor,
        state: &mut RunState,
    ) -> Result<RunStatus, HiveError> {
        state.history = self.load_history(ctx, user_message).await?;

        let first = route_first_role(self.classifier.as_deref(), &state.history).await;
        state.next_role = Some(Next::Role(first));
        rec.handle(Frame::update(
            Namespace::root(),
            INTENT_NODE,
            json!({ "next_role": first.as_str() }),
        ))
        .await?;

        let mut role = first;
        loop {
            if self.stop_requested(&ctx.session_id).await? {
                tracing::info!(session_id = %ctx.session_id, role = %role, "stop signal received");
                return Ok(RunStatus::Stopped);
            }
            state.role_steps += 1;
            if state.role_steps > self.settings.max_role_steps {
                return Err(HiveError::StepLimitExceeded(self.settings.max_role_steps));
            }

            let instruction = state.take_instruction(role);
            tracing::info!(session_id = %ctx.session_id, role = %role, step = state.role_steps, "role turn");
            let request = TurnRequest {
                context: ctx.clone(),
                role,
                messages: state.turn_messages(&instruction),
                instruction,
            };
            let output = self.run_turn(request, rec).await?;

            let directive = parse_directive(&output.messages, "continue");
            let next = resolve_next_role(role, &directive.next_action);
            tracing::info!(
                session_id = %ctx.session_id,
                role = %role,
                next_action = %directive.next_action,
                next = next.as_str(),
                "role decided"
            );
            state.record_turn(role, &output.messages, &directive, next);
            rec.handle(Frame::update(Namespace::root(), role.as_str(), state.update_values(&directive)))
                .await?;

            match next {
                Next::End => return Ok(RunStatus::Success),
                Next::Role(r) => role = r,
            }
        }
    }

    /// 执行器与帧消费并发进行；消费端出错时丢弃接收端，执行器的发送随之失败
    async fn run_turn(
        &self,
        request: TurnRequest,
        rec: &mut StreamReconstructor,
    ) -> Result<TurnOutput, HiveError> {
        let (tx, rx) = mpsc::channel::<Frame>(self.settings.frame_buffer.max(1));
        let exec = self.executor.execute(request, tx);
        let drain = async move {
            let mut rx = rx;
            while let Some(frame) = rx.recv().await {
                rec.handle(frame).await?;
            }
            Ok::<(), StoreError>(())
        };
        let (output, drained) = tokio::join!(exec, drain);
        drained?;
        output
    }

    async fn load_history(
        &self,
        ctx: &RunContext,
        user_message: &Message,
    ) -> Result<Vec<ChatMessage>, HiveError> {
        let previous = self
            .store
            .messages_page(
                &ctx.session_id,
                &MessagePage::Before(user_message.id.clone()),
                self.settings.history_limit,
            )
            .await?;
        // 锚点不存在时存储会回落为最近 N 条，可能包含用户消息本身
        let previous: Vec<_> = previous
            .iter()
            .filter(|m| m.id != user_message.id)
            .map(Message::to_chat)
            .collect();
        let mut history = sanitize_history(previous);
        history.push(user_message.to_chat());
        Ok(history)
    }

    async fn stop_requested(&self, session_id: &str) -> Result<bool, HiveError> {
        let Some(stop) = &self.stop else {
            return Ok(false);
        };
        if stop.is_requested(session_id).await? {
            stop.clear(session_id).await?;
            return Ok(true);
        }
        Ok(false)
    }

    async fn conclude(
        &self,
        rec: &mut StreamReconstructor,
        state: &RunState,
        status: RunStatus,
    ) -> Result<(RunStatus, Option<String>), HiveError> {
        rec.finish().await?;
        let stage = state.current_stage.map(|s| s.as_str());
        rec.emit(
            EventType::AgentEnd,
            json!({ "status": status.as_str(), "stage": stage }),
            None,
            None,
        )
        .await?;
        rec.emit(EventType::Finish, json!({ "status": status.as_str() }), None, None)
            .await?;
        Ok((status, None))
    }

    async fn fail(
        &self,
        rec: &mut StreamReconstructor,
        error: HiveError,
    ) -> Result<(RunStatus, Option<String>), HiveError> {
        tracing::error!(session_id = %rec.session_id(), error = %error, "team run failed");
        if let Err(e) = rec.flush().await {
            tracing::warn!(error = %e, "flush after failure did not complete");
        }
        let message = error.to_string();
        let details = match &error {
            HiveError::Executor { role, .. } => json!({ "role": role }),
            HiveError::StepLimitExceeded(limit) => json!({ "max_role_steps": limit }),
            _ => json!({}),
        };
        let terminal = async {
            rec.emit(
                EventType::AgentError,
                json!({
                    "error": message,
                    "error_type": error.error_type(),
                    "details": details,
                }),
                None,
                rec.current_node().map(String::from),
            )
            .await?;
            rec.emit(
                EventType::Finish,
                json!({ "status": RunStatus::Failed.as_str(), "error": message }),
                None,
                None,
            )
            .await?;
            Ok::<(), StoreError>(())
        };
        let written = terminal.await;

        match error {
            HiveError::Store(e) => Err(HiveError::Store(e)),
            other => {
                written?;
                Ok((RunStatus::Failed, Some(other.to_string())))
            }
        }
    }
}
