//! 子任务依赖图
//!
//! 主任务可拆分为多个子任务，每个子任务拥有独立的情景文档（通过注入的 MemoryManager 注册）。
//! 子任务按创建顺序调度；依赖全部完成才为 pending，否则为 blocked。
//! 持久化：<root>/tasks/active/subtasks_<main_id>/subtasks.json

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::core::error::{MemoryError, MemoryResult};
use crate::memory::episodic::validate_task_id;
use crate::memory::lifecycle::MemoryManager;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Blocked,
}

impl SubtaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubtaskStatus::Pending => "pending",
            SubtaskStatus::InProgress => "in_progress",
            SubtaskStatus::Completed => "completed",
            SubtaskStatus::Failed => "failed",
            SubtaskStatus::Blocked => "blocked",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Subtask {
    pub id: String,
    pub description: String,
    pub status: SubtaskStatus,
    pub parent_id: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    pub created_at: DateTime<Local>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Local>>,
}

/// 子任务进度汇总
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SubtaskProgress {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub in_progress: usize,
    pub pending: usize,
    pub blocked: usize,
    /// 完成百分比（0-100）
    pub completion_rate: f64,
}

/// 持久化格式
#[derive(Serialize, Deserialize)]
struct SubtaskFile {
    main_task_id: String,
    updated_at: DateTime<Local>,
    subtasks: Vec<Subtask>,
}

#[derive(Debug)]
pub struct SubtaskManager {
    main_task_id: String,
    path: PathBuf,
    /// 按创建顺序保存
    subtasks: Vec<Subtask>,
}

impl SubtaskManager {
    /// 打开主任务的子任务图；文件缺失或损坏时从空图开始
    pub fn open(root: impl AsRef<Path>, main_task_id: &str) -> MemoryResult<Self> {
        validate_task_id(main_task_id)?;
        let dir = root
            .as_ref()
            .join("tasks")
            .join("active")
            .join(format!("subtasks_{}", main_task_id));
        std::fs::create_dir_all(&dir)?;
        let path = dir.join("subtasks.json");
        let subtasks = load_subtasks(&path);
        let mgr = Self {
            main_task_id: main_task_id.to_string(),
            path,
            subtasks,
        };
        if !mgr.subtasks.is_empty() {
            tracing::info!(main_task_id, count = mgr.subtasks.len(), "subtasks loaded");
        }
        if let Some(cycle) = mgr.find_cycle() {
            tracing::warn!(main_task_id, cycle = %cycle.join(" -> "), "loaded subtask graph contains a cycle");
        }
        Ok(mgr)
    }

    pub fn main_task_id(&self) -> &str {
        &self.main_task_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 创建子任务并注册其情景文档；依赖必须是已存在的子任务
    pub fn create_subtask(
        &mut self,
        memory: &mut MemoryManager,
        description: &str,
        dependencies: &[&str],
    ) -> MemoryResult<String> {
        let id = self.next_id();
        if let Some(missing) = dependencies.iter().find(|d| self.get(d).is_none()) {
            return Err(MemoryError::UnknownDependency {
                subtask: id,
                dependency: missing.to_string(),
            });
        }
        let dependencies: Vec<String> = dependencies.iter().map(|d| d.to_string()).collect();
        let status = if self.deps_met(&dependencies) {
            SubtaskStatus::Pending
        } else {
            SubtaskStatus::Blocked
        };

        memory.create_task(description, Some(id.as_str()))?;
        self.subtasks.push(Subtask {
            id: id.clone(),
            description: description.to_string(),
            status,
            parent_id: self.main_task_id.clone(),
            dependencies,
            result: None,
            error: None,
            created_at: Local::now(),
            completed_at: None,
        });
        self.save()?;
        tracing::info!(subtask_id = %id, status = status.as_str(), "subtask created");
        Ok(id)
    }

    fn next_id(&self) -> String {
        let mut n = self.subtasks.len() + 1;
        loop {
            let id = format!("{}_sub{}", self.main_task_id, n);
            if self.get(&id).is_none() {
                return id;
            }
            n += 1;
        }
    }

    /// 按创建顺序返回第一个依赖已满足的 pending 子任务；
    /// 扫描过程中依赖未满足的 pending 子任务会被标记为 blocked
    pub fn next_ready(&mut self) -> Option<String> {
        let mut changed = false;
        let mut ready = None;
        for i in 0..self.subtasks.len() {
            if self.subtasks[i].status != SubtaskStatus::Pending {
                continue;
            }
            if self.deps_met(&self.subtasks[i].dependencies) {
                ready = Some(self.subtasks[i].id.clone());
                break;
            }
            self.subtasks[i].status = SubtaskStatus::Blocked;
            changed = true;
        }
        if changed {
            self.save_logged();
        }
        ready
    }

    /// 开始执行；子任务不存在、依赖未满足或已开始/结束时返回 false
    pub fn start(&mut self, id: &str) -> bool {
        let Some(idx) = self.index_of(id) else {
            tracing::warn!(subtask_id = %id, "subtask not found");
            return false;
        };
        if !self.deps_met(&self.subtasks[idx].dependencies) {
            tracing::warn!(subtask_id = %id, "dependencies not met");
            self.subtasks[idx].status = SubtaskStatus::Blocked;
            self.save_logged();
            return false;
        }
        match self.subtasks[idx].status {
            SubtaskStatus::Pending | SubtaskStatus::Blocked => {}
            other => {
                tracing::warn!(subtask_id = %id, status = other.as_str(), "subtask cannot start");
                return false;
            }
        }
        self.subtasks[idx].status = SubtaskStatus::InProgress;
        self.save_logged();
        tracing::info!(subtask_id = %id, "subtask started");
        true
    }

    /// 结束子任务，同步完成其情景文档，并解除已满足依赖的 blocked 子任务。
    /// 只有 pending / in_progress 的子任务可以结束，其余状态返回 false
    pub fn complete(
        &mut self,
        memory: &mut MemoryManager,
        id: &str,
        result: Option<&str>,
        succeeded: bool,
    ) -> bool {
        let Some(idx) = self.index_of(id) else {
            tracing::warn!(subtask_id = %id, "subtask not found");
            return false;
        };
        match self.subtasks[idx].status {
            SubtaskStatus::Pending | SubtaskStatus::InProgress => {}
            other => {
                tracing::warn!(subtask_id = %id, status = other.as_str(), "subtask cannot complete");
                return false;
            }
        }
        {
            let subtask = &mut self.subtasks[idx];
            if succeeded {
                subtask.status = SubtaskStatus::Completed;
                subtask.result = result.map(str::to_string);
            } else {
                subtask.status = SubtaskStatus::Failed;
                subtask.error = result.map(str::to_string);
            }
            subtask.completed_at = Some(Local::now());
        }
        if let Err(e) = memory.complete_task(id, succeeded) {
            tracing::debug!(subtask_id = %id, error = %e, "subtask document not completed");
        }
        tracing::info!(subtask_id = %id, succeeded, "subtask completed");
        self.unblock();
        self.save_logged();
        true
    }

    fn unblock(&mut self) {
        for i in 0..self.subtasks.len() {
            if self.subtasks[i].status == SubtaskStatus::Blocked
                && self.deps_met(&self.subtasks[i].dependencies)
            {
                self.subtasks[i].status = SubtaskStatus::Pending;
                tracing::info!(subtask_id = %self.subtasks[i].id, "subtask unblocked");
            }
        }
    }

    /// 追加依赖边 id -> dep；会形成环时拒绝
    pub fn add_dependency(&mut self, id: &str, dep: &str) -> MemoryResult<()> {
        let idx = self
            .index_of(id)
            .ok_or_else(|| MemoryError::SubtaskNotFound(id.to_string()))?;
        if self.get(dep).is_none() {
            return Err(MemoryError::UnknownDependency {
                subtask: id.to_string(),
                dependency: dep.to_string(),
            });
        }
        if self.subtasks[idx].dependencies.iter().any(|d| d == dep) {
            return Ok(());
        }
        if let Some(mut path) = self.dependency_path(dep, id) {
            path.insert(0, id.to_string());
            return Err(MemoryError::DependencyCycle { path });
        }

        self.subtasks[idx].dependencies.push(dep.to_string());
        if self.subtasks[idx].status == SubtaskStatus::Pending
            && !self.deps_met(&self.subtasks[idx].dependencies)
        {
            self.subtasks[idx].status = SubtaskStatus::Blocked;
        }
        self.save()
    }

    /// 沿依赖边从 from 出发能否到达 to；可达时返回路径（含两端）
    fn dependency_path(&self, from: &str, to: &str) -> Option<Vec<String>> {
        let mut stack: Vec<Vec<String>> = vec![vec![from.to_string()]];
        let mut seen: Vec<String> = Vec::new();
        while let Some(path) = stack.pop() {
            let last = path.last()?.clone();
            if last == to {
                return Some(path);
            }
            if seen.contains(&last) {
                continue;
            }
            seen.push(last.clone());
            if let Some(node) = self.get(&last) {
                for dep in node.dependencies.iter().rev() {
                    let mut next = path.clone();
                    next.push(dep.clone());
                    stack.push(next);
                }
            }
        }
        None
    }

    /// 检查整张图是否有环；有则返回环上路径（首尾相同）
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        fn visit(
            mgr: &SubtaskManager,
            id: &str,
            marks: &mut HashMap<String, Mark>,
            stack: &mut Vec<String>,
        ) -> Option<Vec<String>> {
            match marks.get(id) {
                Some(Mark::Done) => return None,
                Some(Mark::Visiting) => {
                    let start = stack.iter().position(|s| s == id)?;
                    let mut cycle = stack[start..].to_vec();
                    cycle.push(id.to_string());
                    return Some(cycle);
                }
                None => {}
            }
            marks.insert(id.to_string(), Mark::Visiting);
            stack.push(id.to_string());
            if let Some(node) = mgr.get(id) {
                for dep in &node.dependencies {
                    if let Some(cycle) = visit(mgr, dep, marks, stack) {
                        return Some(cycle);
                    }
                }
            }
            stack.pop();
            marks.insert(id.to_string(), Mark::Done);
            None
        }

        let mut marks = HashMap::new();
        for s in &self.subtasks {
            let mut stack = Vec::new();
            if let Some(cycle) = visit(self, &s.id, &mut marks, &mut stack) {
                return Some(cycle);
            }
        }
        None
    }

    pub fn progress_summary(&self) -> SubtaskProgress {
        let mut p = SubtaskProgress {
            total: self.subtasks.len(),
            ..Default::default()
        };
        for s in &self.subtasks {
            match s.status {
                SubtaskStatus::Completed => p.completed += 1,
                SubtaskStatus::Failed => p.failed += 1,
                SubtaskStatus::InProgress => p.in_progress += 1,
                SubtaskStatus::Pending => p.pending += 1,
                SubtaskStatus::Blocked => p.blocked += 1,
            }
        }
        if p.total > 0 {
            p.completion_rate = p.completed as f64 / p.total as f64 * 100.0;
        }
        p
    }

    pub fn to_markdown(&self) -> String {
        if self.subtasks.is_empty() {
            return "No subtasks".to_string();
        }
        let p = self.progress_summary();
        let mut out = format!(
            "## Subtasks (total: {})\n\n**Progress**: {}/{} ({:.1}%)\n\n| # | Description | Status | Dependencies |\n|---|-------------|--------|--------------|\n",
            p.total, p.completed, p.total, p.completion_rate
        );
        for (i, s) in self.subtasks.iter().enumerate() {
            let description: String = s.description.chars().take(50).collect();
            let deps = if s.dependencies.is_empty() {
                "-".to_string()
            } else {
                s.dependencies.join(", ")
            };
            out.push_str(&format!(
                "| {} | {} | {} | {} |\n",
                i + 1,
                description,
                s.status.as_str(),
                deps
            ));
        }
        out
    }

    pub fn get(&self, id: &str) -> Option<&Subtask> {
        self.subtasks.iter().find(|s| s.id == id)
    }

    pub fn all(&self) -> &[Subtask] {
        &self.subtasks
    }

    fn index_of(&self, id: &str) -> Option<usize> {
        self.subtasks.iter().position(|s| s.id == id)
    }

    /// 依赖全部存在且已完成
    fn deps_met(&self, deps: &[String]) -> bool {
        deps.iter().all(|d| {
            self.get(d)
                .is_some_and(|s| s.status == SubtaskStatus::Completed)
        })
    }

    fn save(&self) -> MemoryResult<()> {
        let file = SubtaskFile {
            main_task_id: self.main_task_id.clone(),
            updated_at: Local::now(),
            subtasks: self.subtasks.clone(),
        };
        std::fs::write(&self.path, serde_json::to_string_pretty(&file)?)?;
        Ok(())
    }

    fn save_logged(&self) {
        if let Err(e) = self.save() {
            tracing::warn!(path = %self.path.display(), error = %e, "subtask save failed");
        }
    }
}

fn load_subtasks(path: &Path) -> Vec<Subtask> {
    let Ok(data) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    match serde_json::from_str::<SubtaskFile>(&data) {
        Ok(file) => file.subtasks,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "subtask file unreadable, starting empty");
            Vec::new()
        }
    }
}
