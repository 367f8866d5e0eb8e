//! 流重建器：把多路复用的执行帧还原为有序、持久化、可重放的事件与完整消息
//!
//! 不变量：
//! - 同一时间只有一个活动累加器；遇到不同消息 ID 的增量、完整消息或节点边界时先落盘（flush）
//! - 已落盘的消息 ID 再次出现增量时（嵌套执行交错），续写部分改用派生 ID `{id}-{n}`，
//!   其 `llm_stream` 与落盘消息使用同一派生 ID
//! - 顶层节点变化：flush → `node_end(旧)` → `node_start(新)`，每帧都检查
//! - 完整消息立即持久化并发 `message_complete`；本次运行已落盘的 ID 不会重复写入
//! - 文本增量发 `llm_stream`，工具参数片段发 `message_delta`，两者互不混杂
//! - 状态更新中的 `current_stage` 变化恰好产生一次 `stage_change`
//! - 每条落盘消息的父消息是上一条落盘消息（运行开始时为用户消息）

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::{json, Value};

use super::accumulator::Accumulator;
use super::frame::{Channel, Frame, MessageDelta, MessageUnit, Namespace, StateUpdate};
use crate::model::{ChatMessage, Event, EventType, Message, MessageKind};
use crate::store::{EventStore, MessageStore, Store, StoreError};

/// 单次运行的流重建器（由控制器独占）
pub struct StreamReconstructor {
    store: Arc<dyn Store>,
    session_id: String,
    trace_id: Option<String>,
    parent_id: Option<String>,
    last_node: Option<String>,
    current_stage: Option<String>,
    persisted: HashSet<String>,
    /// 原始消息 ID → 已派生的续写次数
    continuations: HashMap<String, usize>,
    active: Option<Accumulator>,
    /// 活动累加器对应的原始增量 ID（派生时与累加器 ID 不同）
    active_source: Option<String>,
}

impl StreamReconstructor {
    pub fn new(
        store: Arc<dyn Store>,
        session_id: impl Into<String>,
        trace_id: Option<String>,
        parent_id: Option<String>,
    ) -> Self {
        Self {
            store,
            session_id: session_id.into(),
            trace_id,
            parent_id,
            last_node: None,
            current_stage: None,
            persisted: HashSet::new(),
            continuations: HashMap::new(),
            active: None,
            active_source: None,
        }
    }

    pub fn current_stage(&self) -> Option<&str> {
        self.current_stage.as_deref()
    }

    pub fn current_node(&self) -> Option<&str> {
        self.last_node.as_deref()
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// 处理一帧
    pub async fn handle(&mut self, frame: Frame) -> Result<(), StoreError> {
        if let Some(node) = frame.top_level_node() {
            if self.last_node.as_deref() != Some(node) {
                let node = node.to_string();
                self.enter_node(node).await?;
            }
        }

        let Frame { namespace, channel } = frame;
        match channel {
            Channel::Updates(update) => self.on_update(update).await,
            Channel::Messages(msg) => match msg.unit {
                MessageUnit::Delta(delta) => self.on_delta(&namespace, &msg.node, delta).await,
                MessageUnit::Complete { id, message } => self.on_complete(id, message).await,
            },
        }
    }

    /// 运行结束：落盘剩余增量并关闭最后一个节点
    pub async fn finish(&mut self) -> Result<(), StoreError> {
        self.flush().await?;
        if let Some(prev) = self.last_node.take() {
            self.emit_node(EventType::NodeEnd, &prev).await?;
        }
        Ok(())
    }

    /// 落盘活动累加器
    pub async fn flush(&mut self) -> Result<(), StoreError> {
        self.active_source = None;
        let Some(acc) = self.active.take() else {
            return Ok(());
        };
        let id = acc.id().to_string();
        let node = acc.node().to_string();
        tracing::trace!(message_id = %id, namespace = ?acc.namespace().segments(), "flushing accumulator");
        let message = acc.finish();
        if message.content.is_empty() && message.kind.tool_calls().is_empty() {
            tracing::debug!(message_id = %id, "skipping empty accumulated message");
            return Ok(());
        }
        let agent = self.last_node.clone().unwrap_or(node);
        self.persist(id, Some(agent), message).await
    }

    /// 写一条事件（控制器的生命周期事件也经由这里，保证单一写入者）
    pub async fn emit(
        &self,
        event_type: EventType,
        data: Value,
        message_id: Option<String>,
        agent_name: Option<String>,
    ) -> Result<Event, StoreError> {
        let mut event = Event::new(self.session_id.clone(), event_type, data)
            .with_agent(agent_name)
            .with_trace(self.trace_id.clone());
        event.message_id = message_id;
        self.store.append_event(&event).await?;
        tracing::trace!(
            session_id = %self.session_id,
            event_type = %event_type,
            "event appended"
        );
        Ok(event)
    }

    async fn enter_node(&mut self, node: String) -> Result<(), StoreError> {
        self.flush().await?;
        if let Some(prev) = self.last_node.take() {
            self.emit_node(EventType::NodeEnd, &prev).await?;
        }
        self.emit_node(EventType::NodeStart, &node).await?;
        self.last_node = Some(node);
        Ok(())
    }

    async fn emit_node(&self, event_type: EventType, node: &str) -> Result<(), StoreError> {
        self.emit(event_type, json!({ "node_name": node }), None, Some(node.to_string()))
            .await?;
        Ok(())
    }

    async fn on_update(&mut self, update: StateUpdate) -> Result<(), StoreError> {
        let Some(stage) = update.values.get("current_stage").and_then(Value::as_str) else {
            return Ok(());
        };
        if self.current_stage.as_deref() == Some(stage) {
            return Ok(());
        }
        let data = json!({
            "from_stage": self.current_stage,
            "to_stage": stage,
        });
        let agent = self.last_node.clone().or(Some(update.node));
        self.current_stage = Some(stage.to_string());
        self.emit(EventType::StageChange, data, None, agent).await?;
        Ok(())
    }

    async fn on_delta(
        &mut self,
        namespace: &Namespace,
        node: &str,
        delta: MessageDelta,
    ) -> Result<(), StoreError> {
        if self.active.is_some() && self.active_source.as_deref() != Some(delta.id.as_str()) {
            self.flush().await?;
        }
        if self.active.is_none() {
            let id = self.stream_id(&delta.id);
            self.active = Some(Accumulator::new(id, node, namespace.clone()));
            self.active_source = Some(delta.id.clone());
        }
        let Some(acc) = self.active.as_mut() else {
            return Ok(());
        };
        acc.push(&delta);
        let message_id = acc.id().to_string();

        let agent = self.last_node.clone().or_else(|| Some(node.to_string()));
        if !delta.content.is_empty() {
            let data = json!({
                "delta": delta.content,
                "content_type": "text",
                "namespace": namespace.segments(),
            });
            self.emit(EventType::LlmStream, data, Some(message_id.clone()), agent.clone())
                .await?;
        }
        for chunk in &delta.tool_call_chunks {
            let data = json!({
                "delta": chunk.args,
                "content_type": "tool_call",
                "tool_call_id": chunk.id,
                "tool_call_index": chunk.index,
                "tool_call_name": chunk.name,
                "namespace": namespace.segments(),
            });
            self.emit(EventType::MessageDelta, data, Some(message_id.clone()), agent.clone())
                .await?;
        }
        Ok(())
    }

    /// 新累加器的消息 ID：原始 ID 已落盘时派生 `{id}-{n}`
    fn stream_id(&mut self, source: &str) -> String {
        if !self.persisted.contains(source) {
            return source.to_string();
        }
        let n = self.continuations.entry(source.to_string()).or_insert(0);
        loop {
            *n += 1;
            let candidate = format!("{}-{}", source, n);
            if !self.persisted.contains(&candidate) {
                return candidate;
            }
        }
    }

    async fn on_complete(&mut self, id: Option<String>, message: ChatMessage) -> Result<(), StoreError> {
        self.flush().await?;
        match &message.kind {
            MessageKind::Assistant { .. } | MessageKind::Tool { .. } | MessageKind::System => {}
            MessageKind::User => {
                tracing::warn!(session_id = %self.session_id, "ignoring user message in execution stream");
                return Ok(());
            }
        }
        let id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let agent = self.last_node.clone();
        self.persist(id, agent, message).await
    }

    async fn persist(
        &mut self,
        id: String,
        agent_name: Option<String>,
        chat: ChatMessage,
    ) -> Result<(), StoreError> {
        if self.persisted.contains(&id) {
            tracing::debug!(message_id = %id, "message already persisted in this run, skipping");
            return Ok(());
        }
        let mut message = Message::from_chat(id.clone(), self.session_id.clone(), self.parent_id.clone(), chat)
            .with_trace(self.trace_id.clone());
        message.agent_name = agent_name.clone();
        self.store.append_message(&message).await?;
        self.persisted.insert(id.clone());
        self.parent_id = Some(id.clone());

        let data = json!({
            "content": message.text(),
            "role": message.kind.role_name(),
            "message": message,
        });
        self.emit(EventType::MessageComplete, data, Some(id), agent_name)
            .await?;
        Ok(())
    }
}
