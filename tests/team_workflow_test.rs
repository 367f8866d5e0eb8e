//! 团队工作流集成测试：回退路由、重复回合、流式增量与落盘消息的一致性

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use hive::config::TeamSection;
use hive::core::HiveError;
use hive::model::{Event, EventType, Message, Timestamp};
use hive::store::{EventStore, InMemoryStore, MessagePage, MessageStore, StoreError};
use hive::team::{Directive, MockAgentExecutor, MockTurn, Role, RunContext, RunStatus, WorkflowController};

async fn run_team(exec: MockAgentExecutor) -> (Arc<InMemoryStore>, Arc<MockAgentExecutor>, RunStatus) {
    let store = Arc::new(InMemoryStore::new());
    let exec = Arc::new(exec);
    let controller = WorkflowController::new(store.clone(), exec.clone(), TeamSection::default());
    let user = Message::user("s1", None, "Build a todo app");
    store.append_message(&user).await.unwrap();
    let result = controller
        .run(&RunContext::new("s1", "nextjs"), &user)
        .await
        .unwrap();
    (store, exec, result.status)
}

async fn all_events(store: &InMemoryStore) -> Vec<Event> {
    store.session_events("s1", 100_000).await.unwrap()
}

fn node_count(events: &[Event], kind: EventType, node: &str) -> usize {
    events
        .iter()
        .filter(|e| e.event_type == kind && e.data["node_name"] == node)
        .count()
}

#[tokio::test]
async fn test_engineer_routes_back_to_architect_with_instruction() {
    let exec = MockAgentExecutor::new().with_turn(
        Role::Engineer,
        MockTurn::Decide(Directive::new("back_to_architect").with_instruction("API path mismatch")),
    );
    let (store, exec, status) = run_team(exec).await;
    assert_eq!(status, RunStatus::Success);

    let requests = exec.requests();
    let roles: Vec<_> = requests.iter().map(|r| r.role).collect();
    assert_eq!(
        roles,
        vec![
            Role::Boss,
            Role::ProductManager,
            Role::Architect,
            Role::ProjectManager,
            Role::Engineer,
            Role::Architect,
            Role::ProjectManager,
            Role::Engineer,
            Role::Qa,
        ]
    );
    // 回退后的架构师收到的指令就是工程师给出的那句
    assert_eq!(requests[5].instruction, "API path mismatch");
    assert_eq!(
        requests[5].messages.last().map(|m| m.text()),
        Some("API path mismatch".to_string())
    );
    // 指令只用一次
    assert_eq!(requests[6].instruction, Role::ProjectManager.default_instruction("nextjs"));

    let events = all_events(&store).await;
    assert_eq!(node_count(&events, EventType::NodeStart, "architect"), 2);
}

#[tokio::test]
async fn test_qa_loops_back_to_engineer_twice() {
    let fix = |text: &str| MockTurn::Decide(Directive::new("back_to_engineer").with_instruction(text));
    let exec = MockAgentExecutor::new()
        .with_turn(Role::Qa, fix("login button broken"))
        .with_turn(Role::Qa, fix("signup form broken"))
        .with_turn(Role::Qa, MockTurn::Decide(Directive::new("continue")));
    let (store, exec, status) = run_team(exec).await;
    assert_eq!(status, RunStatus::Success);

    let events = all_events(&store).await;
    assert!(node_count(&events, EventType::NodeEnd, "engineer") >= 2);
    assert!(node_count(&events, EventType::NodeEnd, "qa") >= 2);
    assert_eq!(node_count(&events, EventType::NodeStart, "qa"), 3);

    let engineer_instructions: Vec<_> = exec
        .requests()
        .into_iter()
        .filter(|r| r.role == Role::Engineer)
        .map(|r| r.instruction)
        .collect();
    assert_eq!(engineer_instructions.len(), 3);
    assert_eq!(engineer_instructions[1], "login button broken");
    assert_eq!(engineer_instructions[2], "signup form broken");

    let finish = events.last().unwrap();
    assert_eq!(finish.event_type, EventType::Finish);
    assert_eq!(finish.data["status"], "success");
}

#[tokio::test]
async fn test_streamed_text_matches_persisted_messages() {
    let exec = MockAgentExecutor::new()
        .with_turn(Role::Boss, MockTurn::TextBlock(Directive::new("continue")))
        .with_turn(Role::ProductManager, MockTurn::Silent);
    let (store, _, status) = run_team(exec).await;
    assert_eq!(status, RunStatus::Success);

    let events = all_events(&store).await;
    let mut streamed: HashMap<String, String> = HashMap::new();
    for e in events.iter().filter(|e| e.event_type == EventType::LlmStream) {
        let id = e.message_id.clone().unwrap();
        streamed
            .entry(id)
            .or_default()
            .push_str(e.data["delta"].as_str().unwrap_or_default());
    }
    assert!(!streamed.is_empty());
    for (id, text) in &streamed {
        let msg = store.find_message("s1", id).await.unwrap().unwrap();
        assert_eq!(&msg.text(), text);
    }

    // 时间戳严格递增，父子链首尾相接
    assert!(events.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    let messages = store
        .messages_page("s1", &MessagePage::Recent, 1000)
        .await
        .unwrap();
    for pair in messages.windows(2) {
        assert_eq!(pair[1].parent_id.as_deref(), Some(pair[0].id.as_str()));
    }
}

#[tokio::test]
async fn test_every_message_complete_is_persisted_once() {
    let (store, _, _) = run_team(MockAgentExecutor::new()).await;
    let events = all_events(&store).await;
    let completes: Vec<_> = events
        .iter()
        .filter(|e| e.event_type == EventType::MessageComplete)
        .collect();
    let messages = store
        .messages_page("s1", &MessagePage::Recent, 1000)
        .await
        .unwrap();
    // 用户消息不经过重建器
    assert_eq!(completes.len(), messages.len() - 1);
    for e in completes {
        let id = e.message_id.as_deref().unwrap();
        assert_eq!(e.data["message"]["id"], id);
    }
}

/// 消息写入总是失败的存储（事件照常写入）
struct ReadOnlyMessages {
    inner: InMemoryStore,
}

#[async_trait]
impl EventStore for ReadOnlyMessages {
    async fn append_event(&self, event: &Event) -> Result<(), StoreError> {
        self.inner.append_event(event).await
    }

    async fn session_events(&self, session_id: &str, limit: usize) -> Result<Vec<Event>, StoreError> {
        self.inner.session_events(session_id, limit).await
    }

    async fn events_after(&self, session_id: &str, after: Timestamp, limit: usize) -> Result<Vec<Event>, StoreError> {
        self.inner.events_after(session_id, after, limit).await
    }

    async fn latest_finish_event(&self, session_id: &str) -> Result<Option<Event>, StoreError> {
        self.inner.latest_finish_event(session_id).await
    }

    async fn purge_events_before(&self, before: Timestamp) -> Result<u64, StoreError> {
        self.inner.purge_events_before(before).await
    }
}

#[async_trait]
impl MessageStore for ReadOnlyMessages {
    async fn append_message(&self, _message: &Message) -> Result<(), StoreError> {
        Err(StoreError::Backend("disk full".into()))
    }

    async fn find_message(&self, session_id: &str, id: &str) -> Result<Option<Message>, StoreError> {
        self.inner.find_message(session_id, id).await
    }

    async fn last_message(&self, session_id: &str) -> Result<Option<Message>, StoreError> {
        self.inner.last_message(session_id).await
    }

    async fn messages_page(&self, session_id: &str, page: &MessagePage, limit: usize) -> Result<Vec<Message>, StoreError> {
        self.inner.messages_page(session_id, page, limit).await
    }
}

#[tokio::test]
async fn test_message_write_failure_is_propagated() {
    let inner = InMemoryStore::new();
    let user = Message::user("s1", None, "Build a todo app");
    inner.append_message(&user).await.unwrap();
    let store = Arc::new(ReadOnlyMessages { inner });

    let exec = Arc::new(MockAgentExecutor::new());
    let controller = WorkflowController::new(store.clone(), exec.clone(), TeamSection::default());
    let result = controller.run(&RunContext::new("s1", "nextjs"), &user).await;
    assert!(matches!(result, Err(HiveError::Store(StoreError::Backend(_)))));
    // 第一条消息落盘失败后不再进入下一个角色
    assert_eq!(exec.requests().len(), 1);

    let events = store.session_events("s1", 100_000).await.unwrap();
    assert!(events.iter().all(|e| e.event_type != EventType::MessageComplete));
    let n = events.len();
    assert_eq!(events[n - 2].event_type, EventType::AgentError);
    assert_eq!(events[n - 2].data["error_type"], "StoreError");
    assert_eq!(events[n - 1].event_type, EventType::Finish);
    assert_eq!(events[n - 1].data["status"], "error");
}
