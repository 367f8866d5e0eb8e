//! 可续传投递：回放 + 轮询
//!
//! 流程：
//! 1. 回放游标之后（无游标则全部）的历史事件，遇到终止事件立即结束
//! 2. 按固定间隔轮询新事件，游标随已投递事件前移
//! 3. 连续空轮询达到阈值（或刚投递过 `agent_end` 后的第一次空轮询）时检查生产者是否存活：
//!    仍在运行则重置计数；已退出则先补投最后一批事件，再补发存储中的 finish，没有就合成 `agent_stopped` 错误
//! 4. 超过总时长上限合成 `timeout` 错误；读取失败合成 `error` 错误
//!
//! 每个读者各自持有游标，互不影响；流总是以终止项结束（客户端断开除外）。

use std::collections::VecDeque;
use std::sync::Arc;

use futures_util::stream::{self, BoxStream, StreamExt};
use tokio::time::Instant;

use super::sse::{SseFrame, SYNTHETIC_ERROR_ID};
use crate::config::GatewaySection;
use crate::core::RunLease;
use crate::model::{Event, Timestamp};
use crate::store::{EventStore, Store, StoreError};

/// 投递流（`'static`，可直接交给 HTTP 层）
pub type DeliveryStream = BoxStream<'static, SseFrame>;

#[derive(Clone)]
pub struct DeliveryGateway {
    store: Arc<dyn Store>,
    lease: RunLease,
    settings: GatewaySection,
}

impl DeliveryGateway {
    pub fn new(store: Arc<dyn Store>, lease: RunLease, settings: GatewaySection) -> Self {
        Self { store, lease, settings }
    }

    /// 从游标之后（严格大于）开始投递；`None` 表示完整历史
    pub fn stream(&self, session_id: impl Into<String>, since: Option<Timestamp>) -> DeliveryStream {
        let tail = Tail {
            gateway: self.clone(),
            session_id: session_id.into(),
            cursor: since,
            phase: Phase::Replay,
            pending: VecDeque::new(),
            started: Instant::now(),
            polls: 0,
            idle_polls: 0,
            liveness_due: false,
        };
        tracing::info!(session_id = %tail.session_id, since = ?since, "delivery stream opened");

        stream::unfold(tail, |mut tail| async move {
            loop {
                if let Some(frame) = tail.pending.pop_front() {
                    return Some((frame, tail));
                }
                match tail.phase {
                    Phase::Done => return None,
                    Phase::Replay => tail.replay().await,
                    Phase::Poll => tail.poll().await,
                }
            }
        })
        .boxed()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Replay,
    Poll,
    Done,
}

/// 单个读者的投递状态
struct Tail {
    gateway: DeliveryGateway,
    session_id: String,
    cursor: Option<Timestamp>,
    phase: Phase,
    pending: VecDeque<SseFrame>,
    started: Instant,
    polls: u64,
    idle_polls: u32,
    /// 已投递 agent_end，下一次空轮询立即检查存活
    liveness_due: bool,
}

impl Tail {
    async fn fetch(&self, limit: usize) -> Result<Vec<Event>, StoreError> {
        let store = &self.gateway.store;
        match self.cursor {
            Some(after) => store.events_after(&self.session_id, after, limit).await,
            None => store.session_events(&self.session_id, limit).await,
        }
    }

    /// 入队事件并推进游标；遇到终止事件返回 true
    fn deliver(&mut self, events: Vec<Event>) -> bool {
        for event in events {
            self.cursor = Some(event.timestamp);
            self.pending.push_back(SseFrame::from_event(&event));
            if event.is_terminal() {
                tracing::info!(
                    session_id = %self.session_id,
                    event_type = %event.event_type,
                    "terminal event delivered"
                );
                return true;
            }
            if event.event_type.requires_liveness_check() {
                self.liveness_due = true;
            }
        }
        false
    }

    fn abort(&mut self, error: StoreError) {
        tracing::error!(session_id = %self.session_id, error = %error, "delivery fetch failed");
        self.pending
            .push_back(SseFrame::synthetic_error(&self.session_id, SYNTHETIC_ERROR_ID, error.to_string()));
        self.phase = Phase::Done;
    }

    async fn replay(&mut self) {
        match self.fetch(self.gateway.settings.replay_limit).await {
            Ok(events) => {
                tracing::debug!(session_id = %self.session_id, count = events.len(), "replaying history");
                self.phase = if self.deliver(events) { Phase::Done } else { Phase::Poll };
            }
            Err(e) => self.abort(e),
        }
    }

    async fn poll(&mut self) {
        let settings = self.gateway.settings.clone();
        if self.polls > 0 {
            tokio::time::sleep(settings.poll_interval()).await;
        }
        self.polls += 1;

        if self.started.elapsed() > settings.max_wait() {
            tracing::warn!(
                session_id = %self.session_id,
                polls = self.polls,
                "delivery ceiling reached"
            );
            self.pending
                .push_back(SseFrame::timeout(&self.session_id, settings.max_wait_secs));
            self.phase = Phase::Done;
            return;
        }

        let events = match self.fetch(settings.poll_limit).await {
            Ok(events) => events,
            Err(e) => return self.abort(e),
        };
        if !events.is_empty() {
            self.idle_polls = 0;
            if self.deliver(events) {
                self.phase = Phase::Done;
            }
            return;
        }

        self.idle_polls += 1;
        if self.idle_polls < settings.idle_polls_before_liveness_check && !self.liveness_due {
            return;
        }
        self.liveness_due = false;
        match self.gateway.lease.is_running(&self.session_id).await {
            Ok(true) => self.idle_polls = 0,
            Ok(false) => self.conclude_stopped().await,
            Err(e) => self.abort(e),
        }
    }

    /// 生产者已退出：先补投空轮询之后写入的事件，再补发迟到的 finish，否则合成 agent_stopped
    async fn conclude_stopped(&mut self) {
        self.phase = Phase::Done;
        match self.fetch(self.gateway.settings.poll_limit).await {
            Ok(events) => {
                if self.deliver(events) {
                    return;
                }
            }
            Err(e) => return self.abort(e),
        }
        let finish = match self.gateway.store.latest_finish_event(&self.session_id).await {
            Ok(finish) => finish,
            Err(e) => return self.abort(e),
        };
        // 早于游标的 finish 属于之前的运行
        let late = finish.filter(|ev| self.cursor.map_or(true, |c| ev.timestamp > c));
        match late {
            Some(ev) => {
                tracing::info!(session_id = %self.session_id, "late finish delivered");
                self.pending.push_back(SseFrame::from_event(&ev));
            }
            None => {
                tracing::warn!(session_id = %self.session_id, "producer stopped without finish");
                self.pending.push_back(SseFrame::agent_stopped(&self.session_id));
            }
        }
    }
}
