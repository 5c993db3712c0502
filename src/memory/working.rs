//! 工作记忆：当前任务内的读/写/命令/工具使用记录
//!
//! 纯内存、仅在一次任务运行内有效，不持久化；任务之间需显式 clear。
//! files_read 刻意保留重复项，用于循环检测。

use std::collections::HashSet;

use chrono::{DateTime, Local};
use serde::Serialize;

/// 单个文件被读取超过该次数视为循环
const MAX_READS_PER_FILE: usize = 2;
/// 单个工具使用超过该次数视为循环
const MAX_TOOL_USES: usize = 10;
/// 最近读取窗口
const RECENT_READ_WINDOW: usize = 5;
/// 最近窗口内不同文件数不超过该值视为来回读取
const RECENT_DISTINCT_LIMIT: usize = 2;

/// 一条命令执行记录
#[derive(Clone, Debug, Serialize)]
pub struct CommandRecord {
    pub cmd: String,
    pub timestamp: DateTime<Local>,
    pub succeeded: bool,
}

/// 工作记忆统计
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WorkingMemoryStats {
    pub files_read_count: usize,
    pub files_written_count: usize,
    pub commands_run_count: usize,
    pub unique_files_read: usize,
    pub tools_used: Vec<(String, usize)>,
    pub current_phase: String,
    pub phase_progress: String,
}

#[derive(Clone, Debug)]
pub struct WorkingMemory {
    files_read: Vec<String>,
    files_read_set: HashSet<String>,
    files_written: Vec<String>,
    files_written_set: HashSet<String>,
    commands_run: Vec<CommandRecord>,
    /// 工具计数，按首次使用顺序保存，保证遍历顺序稳定
    tools_used: Vec<(String, usize)>,
    current_phase: String,
    phase_progress: String,
}

impl Default for WorkingMemory {
    fn default() -> Self {
        Self {
            files_read: Vec::new(),
            files_read_set: HashSet::new(),
            files_written: Vec::new(),
            files_written_set: HashSet::new(),
            commands_run: Vec::new(),
            tools_used: Vec::new(),
            current_phase: "initialization".to_string(),
            phase_progress: "0/0".to_string(),
        }
    }
}

impl WorkingMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一次文件读取；返回是否首次读取。重复读取同样会追加
    pub fn record_read(&mut self, path: impl Into<String>) -> bool {
        let path = path.into();
        let is_new = self.files_read_set.insert(path.clone());
        self.files_read.push(path);
        is_new
    }

    /// 记录一次文件写入（去重，保持首次写入顺序）
    pub fn record_write(&mut self, path: impl Into<String>) {
        let path = path.into();
        if self.files_written_set.insert(path.clone()) {
            self.files_written.push(path);
        }
    }

    pub fn record_command(&mut self, cmd: impl Into<String>, succeeded: bool) {
        self.commands_run.push(CommandRecord {
            cmd: cmd.into(),
            timestamp: Local::now(),
            succeeded,
        });
    }

    pub fn increment_tool(&mut self, name: &str) {
        match self.tools_used.iter_mut().find(|(n, _)| n == name) {
            Some((_, count)) => *count += 1,
            None => self.tools_used.push((name.to_string(), 1)),
        }
    }

    pub fn update_phase(&mut self, phase: impl Into<String>, progress: impl Into<String>) {
        self.current_phase = phase.into();
        self.phase_progress = progress.into();
    }

    pub fn files_read(&self) -> &[String] {
        &self.files_read
    }

    pub fn files_written(&self) -> &[String] {
        &self.files_written
    }

    pub fn commands_run(&self) -> &[CommandRecord] {
        &self.commands_run
    }

    pub fn tool_count(&self, name: &str) -> usize {
        self.tools_used
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, c)| *c)
            .unwrap_or(0)
    }

    pub fn current_phase(&self) -> &str {
        &self.current_phase
    }

    pub fn phase_progress(&self) -> &str {
        &self.phase_progress
    }

    /// 循环检测：任一规则命中即返回原因；只读，无副作用
    pub fn detect_loop(&self) -> Option<String> {
        // 规则 1：单个文件读取超过 2 次（按首次出现顺序报告）
        let mut counted: Vec<(&str, usize)> = Vec::new();
        for path in &self.files_read {
            match counted.iter_mut().find(|(p, _)| *p == path.as_str()) {
                Some((_, c)) => *c += 1,
                None => counted.push((path.as_str(), 1)),
            }
        }
        if let Some((path, count)) = counted.iter().find(|(_, c)| *c > MAX_READS_PER_FILE) {
            return Some(format!("File '{}' read {} times", path, count));
        }

        // 规则 2：单个工具使用超过 10 次
        if let Some((tool, count)) = self.tools_used.iter().find(|(_, c)| *c > MAX_TOOL_USES) {
            return Some(format!("Tool '{}' used {} times", tool, count));
        }

        // 规则 3：最近 5 次读取只在不超过 2 个文件之间来回
        if self.files_read.len() >= RECENT_READ_WINDOW {
            let recent = &self.files_read[self.files_read.len() - RECENT_READ_WINDOW..];
            let mut distinct: Vec<&str> = Vec::new();
            for p in recent {
                if !distinct.contains(&p.as_str()) {
                    distinct.push(p.as_str());
                }
            }
            if distinct.len() <= RECENT_DISTINCT_LIMIT {
                return Some(format!(
                    "Last {} reads only touched: {}",
                    RECENT_READ_WINDOW,
                    distinct.join(", ")
                ));
            }
        }

        None
    }

    pub fn stats(&self) -> WorkingMemoryStats {
        WorkingMemoryStats {
            files_read_count: self.files_read.len(),
            files_written_count: self.files_written.len(),
            commands_run_count: self.commands_run.len(),
            unique_files_read: self.files_read_set.len(),
            tools_used: self.tools_used.clone(),
            current_phase: self.current_phase.clone(),
            phase_progress: self.phase_progress.clone(),
        }
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// 构建供 Planner 使用的 Prompt 片段
    pub fn to_prompt_section(&self) -> String {
        let mut s = String::new();
        s.push_str(&format!(
            "## Working Memory\nPhase: {} ({})\n\n",
            self.current_phase, self.phase_progress
        ));

        s.push_str(&format!("### Files read ({} total)\n", self.files_read.len()));
        if self.files_read.is_empty() {
            s.push_str("- None\n");
        } else {
            for f in tail(&self.files_read, 10) {
                s.push_str(&format!("- {}\n", f));
            }
        }

        s.push_str(&format!("\n### Files written ({} total)\n", self.files_written.len()));
        if self.files_written.is_empty() {
            s.push_str("- None\n");
        } else {
            for f in tail(&self.files_written, 5) {
                s.push_str(&format!("- {}\n", f));
            }
        }

        s.push_str(&format!("\n### Commands ({} total)\n", self.commands_run.len()));
        for c in tail(&self.commands_run, 3) {
            let cmd: String = c.cmd.chars().take(50).collect();
            let mark = if c.succeeded { "ok" } else { "fail" };
            s.push_str(&format!("- [{}] {}\n", mark, cmd));
        }

        if !self.tools_used.is_empty() {
            s.push_str("\n### Tool usage\n");
            let mut sorted = self.tools_used.clone();
            // 稳定排序：次数相同按首次使用顺序
            sorted.sort_by(|a, b| b.1.cmp(&a.1));
            for (tool, count) in sorted.iter().take(5) {
                let warn = if *count > 5 { " (overused)" } else { "" };
                s.push_str(&format!("- {}: {} times{}\n", tool, count, warn));
            }
        }

        s.push_str(
            "\nDo not re-read files listed above. Past 10 reads, start analysing instead of collecting.\n",
        );
        s
    }
}

fn tail<T>(items: &[T], n: usize) -> &[T] {
    &items[items.len().saturating_sub(n)..]
}
