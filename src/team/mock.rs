//! Mock 角色执行器（本地演示与测试，无需模型）
//!
//! 每个回合按脚本流式输出一段文本，再通过 `workflow_decision` 工具调用（或文本块）给出决策；
//! 未配置脚本的回合默认 `continue`。

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::directive::{Directive, DECISION_TOOL_NAME};
use super::executor::{AgentExecutor, TurnOutput, TurnRequest};
use super::role::Role;
use crate::core::{HiveError, StopSignal};
use crate::model::{ChatMessage, ToolCall};
use crate::stream::{Frame, MessageDelta, Namespace, ToolCallChunk};

/// 文本增量的切片长度（字符）
const DELTA_CHARS: usize = 16;

/// 一个脚本化回合
#[derive(Debug, Clone)]
pub enum MockTurn {
    /// 通过工具调用给出决策
    Decide(Directive),
    /// 通过文本块给出决策
    TextBlock(Directive),
    /// 不给决策（控制器按默认动作处理）
    Silent,
    /// 输出一段增量后失败
    Fail(String),
}

#[derive(Default)]
pub struct MockAgentExecutor {
    scripts: Mutex<HashMap<Role, VecDeque<MockTurn>>>,
    requests: Mutex<Vec<TurnRequest>>,
    frame_delay: Option<Duration>,
    stop_after: Option<(Role, StopSignal)>,
}

impl MockAgentExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 为角色追加一个脚本回合（按调用顺序消费）
    pub fn with_turn(self, role: Role, turn: MockTurn) -> Self {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.entry(role).or_default().push_back(turn);
        }
        self
    }

    /// 每帧之间的延迟，便于观察流式输出 / 测试停止
    pub fn with_frame_delay(mut self, delay: Duration) -> Self {
        self.frame_delay = Some(delay);
        self
    }

    /// 该角色回合输出完毕后请求停止（模拟用户在回合进行中点击停止）
    pub fn with_stop_after(mut self, role: Role, stop: StopSignal) -> Self {
        self.stop_after = Some((role, stop));
        self
    }

    /// 已执行回合收到的请求（按顺序）
    pub fn requests(&self) -> Vec<TurnRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    fn next_turn(&self, role: Role) -> MockTurn {
        self.scripts
            .lock()
            .ok()
            .and_then(|mut s| s.get_mut(&role).and_then(|q| q.pop_front()))
            .unwrap_or(MockTurn::Decide(Directive::new("continue")))
    }

    async fn send(&self, frames: &mpsc::Sender<Frame>, role: Role, frame: Frame) -> Result<(), HiveError> {
        if let Some(delay) = self.frame_delay {
            tokio::time::sleep(delay).await;
        }
        frames
            .send(frame)
            .await
            .map_err(|_| HiveError::executor(role.as_str(), "frame channel closed"))
    }
}

fn split_chars(s: &str, n: usize) -> Vec<String> {
    let chars: Vec<char> = s.chars().collect();
    chars.chunks(n.max(1)).map(|c| c.iter().collect()).collect()
}

#[async_trait]
impl AgentExecutor for MockAgentExecutor {
    async fn execute(&self, request: TurnRequest, frames: mpsc::Sender<Frame>) -> Result<TurnOutput, HiveError> {
        let role = request.role;
        if let Ok(mut reqs) = self.requests.lock() {
            reqs.push(request.clone());
        }
        let turn = self.next_turn(role);
        let output = self.play(&request, turn, &frames).await?;
        if let Some((stop_role, stop)) = &self.stop_after {
            if *stop_role == role {
                stop.request(&request.context.session_id).await?;
            }
        }
        Ok(output)
    }
}

impl MockAgentExecutor {
    async fn play(
        &self,
        request: &TurnRequest,
        turn: MockTurn,
        frames: &mpsc::Sender<Frame>,
    ) -> Result<TurnOutput, HiveError> {
        let role = request.role;
        let ns = Namespace::node(role.as_str(), &uuid::Uuid::new_v4().to_string());
        let msg_id = uuid::Uuid::new_v4().to_string();
        let brief: String = request.instruction.chars().take(40).collect();
        let mut text = format!("{} finished: {}", role.label(), brief);

        if let MockTurn::Fail(reason) = &turn {
            let delta = MessageDelta::text(msg_id, "working...");
            self.send(frames, role, Frame::delta(ns, "model", delta)).await?;
            return Err(HiveError::executor(role.as_str(), reason.clone()));
        }

        if let MockTurn::TextBlock(d) = &turn {
            let body = serde_json::to_string(d).unwrap_or_default();
            text.push_str(&format!("\n[WORKFLOW_DECISION]{}[/WORKFLOW_DECISION]", body));
        }

        for piece in split_chars(&text, DELTA_CHARS) {
            let delta = MessageDelta::text(msg_id.clone(), piece);
            self.send(frames, role, Frame::delta(ns.clone(), "model", delta)).await?;
        }

        let MockTurn::Decide(directive) = turn else {
            return Ok(TurnOutput {
                messages: vec![ChatMessage::assistant(text)],
            });
        };

        let call_id = format!("call_{}", uuid::Uuid::new_v4().simple());
        let args = serde_json::to_value(&directive).unwrap_or_default();
        let raw = args.to_string();
        let half = raw.chars().count() / 2;
        for (i, part) in [
            raw.chars().take(half).collect::<String>(),
            raw.chars().skip(half).collect::<String>(),
        ]
        .into_iter()
        .enumerate()
        {
            let chunk = ToolCallChunk {
                index: 0,
                id: (i == 0).then(|| call_id.clone()),
                name: (i == 0).then(|| DECISION_TOOL_NAME.to_string()),
                args: part,
            };
            let delta = MessageDelta::tool_chunk(msg_id.clone(), chunk);
            self.send(frames, role, Frame::delta(ns.clone(), "model", delta)).await?;
        }

        let tool_msg = ChatMessage::tool(call_id.clone(), "decision recorded");
        self.send(
            frames,
            role,
            Frame::complete(ns, "tools", Some(uuid::Uuid::new_v4().to_string()), tool_msg.clone()),
        )
        .await?;

        Ok(TurnOutput {
            messages: vec![
                ChatMessage::assistant_with_tools(text, vec![ToolCall::new(call_id, DECISION_TOOL_NAME, args)]),
                tool_msg,
            ],
        })
    }
}
