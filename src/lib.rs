//! bee-memory - Agent 记忆治理子系统
//!
//! 模块划分：
//! - **agent**: 单任务记忆协调（工作记忆 + 观察压缩 + 阶段判断 + 情景文档）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、阶段分类、跨进程记忆锁
//! - **memory**: 工作记忆、上下文压缩、情景文档、任务生命周期、子任务图、共享会话、相似检索
//! - **observability**: tracing 初始化
//! - **tools**: Tool trait、注册表、执行器与重复调用熔断

pub mod agent;
pub mod config;
pub mod core;
pub mod memory;
pub mod observability;
pub mod tools;

pub use agent::AgentMemory;
pub use crate::core::error::{MemoryError, MemoryResult, ToolError};
pub use memory::MemoryManager;
