//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `BEE__*` 覆盖（双下划线表示嵌套，如 `BEE__MEMORY__RETENTION_DAYS=14`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::memory::{CompressorConfig, RetentionPolicy};
use crate::tools::BreakerConfig;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub memory: MemorySection,
    /// 观察压缩，直接对应 CompressorConfig
    pub context: CompressorConfig,
    pub breaker: BreakerConfig,
    pub agent: AgentSection,
    pub lock: LockSection,
    pub tools: ToolsSection,
}

/// [memory] 段：记忆根目录与保留策略
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemorySection {
    pub root: PathBuf,
    /// 已完成任务保留天数，超过后归档
    pub retention_days: i64,
    pub auto_archive: bool,
    pub auto_cleanup: bool,
    pub max_active_tasks: usize,
}

impl Default for MemorySection {
    fn default() -> Self {
        let policy = RetentionPolicy::default();
        Self {
            root: PathBuf::from(".bee_memory"),
            retention_days: policy.retention_days,
            auto_archive: policy.auto_archive,
            auto_cleanup: policy.auto_cleanup,
            max_active_tasks: policy.max_active_tasks,
        }
    }
}

impl MemorySection {
    pub fn policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            retention_days: self.retention_days,
            auto_archive: self.auto_archive,
            auto_cleanup: self.auto_cleanup,
            max_active_tasks: self.max_active_tasks,
        }
    }
}

/// [agent] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    /// 单个任务的最大迭代次数，用于阶段判断
    pub max_iterations: usize,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self { max_iterations: 100 }
    }
}

/// [lock] 段：共享记忆锁等待上限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LockSection {
    pub timeout_ms: u64,
}

impl Default for LockSection {
    fn default() -> Self {
        Self { timeout_ms: 2000 }
    }
}

impl LockSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// [tools] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self { tool_timeout_secs: 30 }
    }
}

impl ToolsSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }
}

/// 从 config 目录加载配置，环境变量 BEE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 BEE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("BEE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
