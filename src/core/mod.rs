//! 核心：错误类型、任务阶段分类、跨进程记忆锁

pub mod error;
pub mod lock;
pub mod phase;

pub use error::{MemoryError, MemoryResult, ToolError};
pub use lock::FileLock;
pub use phase::{classify, PhaseAdvice, TaskPhase};
