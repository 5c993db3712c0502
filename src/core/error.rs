//! 记忆子系统错误类型
//!
//! 只有调用方违反约定（如完成不存在的任务、引入循环依赖）才返回 Err；
//! 文件缺失、元数据损坏、陈旧锁等可预期的降级情况由各模块内部记录日志后兜底，不向上抛出。

use thiserror::Error;

use crate::memory::TaskStatus;

/// 任务生命周期、子任务图与持久化相关错误
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    /// id 会拼进文件名，不能含路径分隔符或 `..`
    #[error("Invalid task id: '{0}'")]
    InvalidTaskId(String),

    #[error("Subtask not found: {0}")]
    SubtaskNotFound(String),

    /// 状态只能单调推进：active → completed/failed → archived
    #[error("Invalid transition for task {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("Unknown dependency '{dependency}' for subtask {subtask}")]
    UnknownDependency { subtask: String, dependency: String },

    /// 添加该依赖边会形成环；path 为环上的子任务序列
    #[error("Dependency cycle: {}", path.join(" -> "))]
    DependencyCycle { path: Vec<String> },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type MemoryResult<T> = Result<T, MemoryError>;

/// 工具调用路径上的错误（由 ToolExecutor 统一映射）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    Unknown(String),

    #[error("Tool execution failed: {0}")]
    Failed(String),

    #[error("Tool timeout: {0}")]
    Timeout(String),

    /// 同一写操作连续重复，未执行
    #[error("Loop detected: {0}")]
    Loop(String),
}
