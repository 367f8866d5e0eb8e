//! 核心基础设施：错误类型、存活租约与停止信号、优雅关闭

pub mod error;
pub mod shutdown;
pub mod signal;

pub use error::HiveError;
pub use shutdown::ShutdownManager;
pub use signal::{InMemorySignalStore, RunLease, SignalStore, StopSignal};
