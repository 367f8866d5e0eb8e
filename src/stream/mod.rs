//! 流重建：执行帧 → 有序事件 + 完整消息

pub mod accumulator;
pub mod frame;
pub mod reconstructor;

pub use accumulator::Accumulator;
pub use frame::{Channel, Frame, MessageDelta, MessageFrame, MessageUnit, Namespace, StateUpdate, ToolCallChunk};
pub use reconstructor::StreamReconstructor;
