//! 投递网关
//!
//! - **sse**：事件 → SSE 帧（含合成错误）
//! - **delivery**：回放 + 轮询的可续传投递流
//! - **service**：会话级操作（generate / resume / stop / history）

pub mod delivery;
pub mod service;
pub mod sse;

pub use delivery::{DeliveryGateway, DeliveryStream};
pub use service::{Generation, TeamService};
pub use sse::{SseFrame, SYNTHETIC_AGENT_STOPPED_ID, SYNTHETIC_ERROR_ID, SYNTHETIC_TIMEOUT_ID};
