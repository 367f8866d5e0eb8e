//! 角色团队：角色转移表、决策解析、意图识别、执行器接口与工作流控制器

pub mod controller;
pub mod directive;
pub mod executor;
pub mod intent;
pub mod mock;
pub mod role;
pub mod state;

pub use controller::{RunResult, RunStatus, WorkflowController, INTENT_NODE};
pub use directive::{parse_directive, workflow_decision_schema, workflow_decision_tool, Directive, DECISION_TOOL_NAME};
pub use executor::{AgentExecutor, RunContext, TurnOutput, TurnRequest};
pub use intent::{parse_role_from_reply, route_first_role, Classifier, LlmClassifier};
pub use mock::{MockAgentExecutor, MockTurn};
pub use role::{resolve_next_role, Next, Role, Stage};
pub use state::RunState;
