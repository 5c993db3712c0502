//! 重复调用熔断
//!
//! 只读工具的相同调用（工具名 + 规范化参数）在最近窗口内已出现 threshold 次时，
//! 不再执行，直接返回最近一次缓存结果并附带 [FORCED CACHE] 提示。
//! 缓存是容量固定的环形缓冲区，只记录执行成功的只读调用。
//! 非只读工具不缓存；同一调用连续出现 mutating_repeat_limit 次时拒绝执行并返回 LOOP DETECTED。

use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::error::ToolError;
use crate::config::AppConfig;
use crate::tools::{ToolExecutor, ToolRegistry};

/// 默认只读工具名单（工具自身声明 read_only 时无需列入）
pub const DEFAULT_READ_ONLY_TOOLS: &[&str] = &[
    "read_file",
    "list_files",
    "file_tree",
    "search_files",
    "grep",
    "get_file_info",
    "git_status",
    "git_log",
    "git_diff",
    "docker_ps",
    "docker_logs",
    "docker_inspect",
    "docker_stats",
    "docker_images",
    "system_info",
    "check_command",
    "get_env",
    "list_processes",
    "check_port",
    "http_request",
];

/// 熔断配置（对应配置文件 [breaker] 段）
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// 环形缓冲区容量
    pub capacity: usize,
    /// 检查最近多少次记录
    pub window: usize,
    /// 窗口内相同签名达到该次数即熔断
    pub threshold: usize,
    /// 非只读工具连续相同调用的上限（含本次）
    pub mutating_repeat_limit: usize,
    pub read_only_tools: Vec<String>,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            capacity: 20,
            window: 5,
            threshold: 2,
            mutating_repeat_limit: 3,
            read_only_tools: DEFAULT_READ_ONLY_TOOLS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// 调用签名：工具名 + 键排序后的 JSON 参数
pub fn call_signature(tool_name: &str, params: &Value) -> String {
    format!("{}:{}", tool_name, canonical(params))
}

/// 递归按键排序重建对象（preserve_order 特性开启时 Map 保留插入顺序）
fn canonical(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = serde_json::Map::new();
            for k in keys {
                out.insert(k.clone(), canonical(&map[k]));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
        other => other.clone(),
    }
}

#[derive(Debug)]
pub struct CallBreaker {
    capacity: usize,
    window: usize,
    threshold: usize,
    /// (签名, 输出)，最旧在前
    entries: VecDeque<(String, String)>,
}

impl CallBreaker {
    pub fn new(capacity: usize, window: usize, threshold: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            window,
            threshold: threshold.max(1),
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn from_config(config: &BreakerConfig) -> Self {
        Self::new(config.capacity, config.window, config.threshold)
    }

    /// 调用前检查：命中时返回带提示的缓存结果，调用方不应再执行
    pub fn check(&self, tool_name: &str, params: &Value) -> Option<String> {
        let sig = call_signature(tool_name, params);
        let recent = self.entries.iter().rev().take(self.window);
        let repeats = recent.filter(|(s, _)| *s == sig).count();
        if repeats < self.threshold {
            return None;
        }
        let (_, output) = self.entries.iter().rev().find(|(s, _)| *s == sig)?;
        tracing::warn!(tool = %tool_name, repeats, "duplicate read-only call, returning cached result");
        Some(format!(
            "[FORCED CACHE] This exact call was already made {} times with the same parameters. \
             Stop repeating it and use the result below.\n\n{}",
            repeats, output
        ))
    }

    /// 记录一次成功的只读调用
    pub fn record(&mut self, tool_name: &str, params: &Value, output: &str) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries
            .push_back((call_signature(tool_name, params), output.to_string()));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// 一次受保护工具调用的结果
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ToolOutcome {
    pub succeeded: bool,
    pub output: String,
    #[serde(skip)]
    pub error: Option<ToolError>,
    /// 是否由熔断直接返回缓存（未实际执行）
    pub cached: bool,
}

/// 带重复调用熔断的执行器
pub struct GuardedExecutor {
    executor: ToolExecutor,
    breaker: CallBreaker,
    read_only: HashSet<String>,
    mutating_repeat_limit: usize,
    /// 上一次调用的签名与连续出现次数（任何工具都参与计数）
    last_call: Option<(String, usize)>,
}

impl GuardedExecutor {
    pub fn new(executor: ToolExecutor, config: &BreakerConfig) -> Self {
        Self {
            executor,
            breaker: CallBreaker::from_config(config),
            read_only: config.read_only_tools.iter().cloned().collect(),
            mutating_repeat_limit: config.mutating_repeat_limit,
            last_call: None,
        }
    }

    /// 按 [tools] 超时与 [breaker] 配置组装
    pub fn from_app_config(registry: ToolRegistry, config: &AppConfig) -> Self {
        Self::new(
            ToolExecutor::new(registry, config.tools.timeout()),
            &config.breaker,
        )
    }

    pub fn is_read_only(&self, tool_name: &str) -> bool {
        self.executor.is_read_only(tool_name) || self.read_only.contains(tool_name)
    }

    pub fn breaker(&self) -> &CallBreaker {
        &self.breaker
    }

    pub fn executor(&self) -> &ToolExecutor {
        &self.executor
    }

    pub async fn execute(&mut self, tool_name: &str, params: Value) -> ToolOutcome {
        let read_only = self.is_read_only(tool_name);
        let streak = self.track_streak(call_signature(tool_name, &params));
        if !read_only && self.mutating_repeat_limit > 0 && streak >= self.mutating_repeat_limit {
            tracing::warn!(tool = %tool_name, streak, "repeated mutating call blocked");
            let message = format!(
                "LOOP DETECTED: You called {} {} times in a row! CHANGE YOUR APPROACH!",
                tool_name, streak
            );
            return ToolOutcome {
                succeeded: false,
                output: message.clone(),
                error: Some(ToolError::Loop(message)),
                cached: false,
            };
        }
        if read_only {
            if let Some(cached) = self.breaker.check(tool_name, &params) {
                return ToolOutcome {
                    succeeded: true,
                    output: cached,
                    error: None,
                    cached: true,
                };
            }
        }

        match self.executor.execute(tool_name, params.clone()).await {
            Ok(output) => {
                if read_only {
                    self.breaker.record(tool_name, &params, &output);
                }
                ToolOutcome {
                    succeeded: true,
                    output,
                    error: None,
                    cached: false,
                }
            }
            Err(e) => ToolOutcome {
                succeeded: false,
                output: e.to_string(),
                error: Some(e),
                cached: false,
            },
        }
    }

    /// 记录本次调用并返回同一签名的连续次数（含本次）
    fn track_streak(&mut self, signature: String) -> usize {
        let streak = match self.last_call.take() {
            Some((last, n)) if last == signature => n + 1,
            _ => 1,
        };
        self.last_call = Some((signature, streak));
        streak
    }
}
