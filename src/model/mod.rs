//! 持久化数据模型：消息、事件、时间戳游标

pub mod event;
pub mod message;
pub mod timestamp;

pub use event::{Event, EventCategory, EventType};
pub use message::{sanitize_history, ChatMessage, Content, ContentPart, Message, MessageKind, ToolCall};
pub use timestamp::Timestamp;
